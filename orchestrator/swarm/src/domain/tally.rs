// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-proposal vote accumulation.

use constellation_core::domain::agent::AgentId;
use constellation_core::domain::messages::ProposalId;
use std::collections::{HashMap, HashSet};

/// What happened to a recorded vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteRecord {
    Accepted,
    /// Same voter, same choice again.
    Duplicate,
    /// Same voter, opposite choice; the first vote stands.
    Equivocation,
    /// Voter was not alive when the proposal was created.
    Ineligible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyStatus {
    Pending,
    Approved,
    /// Outstanding voters can no longer lift grants to quorum.
    Rejected,
}

#[derive(Debug, Clone)]
pub struct VoteTally {
    proposal_id: ProposalId,
    eligible: HashSet<AgentId>,
    votes: HashMap<AgentId, bool>,
    quorum: usize,
}

impl VoteTally {
    pub fn new(proposal_id: ProposalId, eligible: HashSet<AgentId>, quorum: usize) -> Self {
        Self {
            proposal_id,
            eligible,
            votes: HashMap::new(),
            quorum,
        }
    }

    pub fn proposal_id(&self) -> ProposalId {
        self.proposal_id
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn record(&mut self, voter: &AgentId, granted: bool) -> VoteRecord {
        if !self.eligible.contains(voter) {
            return VoteRecord::Ineligible;
        }
        match self.votes.get(voter) {
            Some(previous) if *previous == granted => VoteRecord::Duplicate,
            Some(_) => VoteRecord::Equivocation,
            None => {
                self.votes.insert(voter.clone(), granted);
                VoteRecord::Accepted
            }
        }
    }

    pub fn grants(&self) -> usize {
        self.votes.values().filter(|g| **g).count()
    }

    pub fn denies(&self) -> usize {
        self.votes.values().filter(|g| !**g).count()
    }

    pub fn outstanding(&self) -> usize {
        self.eligible.len().saturating_sub(self.votes.len())
    }

    pub fn status(&self) -> TallyStatus {
        let grants = self.grants();
        if grants >= self.quorum {
            TallyStatus::Approved
        } else if grants + self.outstanding() < self.quorum {
            TallyStatus::Rejected
        } else {
            TallyStatus::Pending
        }
    }
}
