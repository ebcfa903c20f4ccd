// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Consensus Engine
//!
//! Leader-proposed, quorum-voted binding decisions.
//!
//! ```text
//! leader                                   peers
//!   | -- proposal_request (broadcast) -->   |
//!   |                                       | evaluate (bounded by vote deadline)
//!   | <-- vote_grant / vote_deny (direct) --|
//!   | tally until quorum / impossible / timeout
//!   | -- action_approved (broadcast) ----->  | apply once per proposal id
//! ```
//!
//! | Outcome | Condition |
//! |---------|-----------|
//! | `Approved` | grants reach `max(1, ceil(fraction × alive))` |
//! | `Denied` | outstanding voters can no longer reach quorum |
//! | `FallbackApproved` | timeout, fallback enabled and the leader's own vote granted |
//! | `TimedOut` | timeout otherwise |
//!
//! Each tally is owned by the task awaiting its proposal. The engine only
//! holds the channel sender used to route inbound votes; removing it on
//! resolution is what makes late votes no-ops.

use crate::application::election::LeadershipView;
use crate::application::evaluator::{AlwaysGrantEvaluator, VoteDecision, VoteEvaluator};
use crate::application::executor::ActionExecutor;
use crate::domain::dedup::ExecutedSet;
use crate::domain::error::CoordinationError;
use crate::domain::proposal::{
    Proposal, ProposalOutcome, ProposalResult, RoleReassignmentParams, ROLE_REASSIGNMENT_ACTION,
};
use crate::domain::quorum::quorum_size;
use crate::domain::tally::{TallyStatus, VoteRecord, VoteTally};
use async_trait::async_trait;
use chrono::Utc;
use constellation_core::domain::agent::AgentId;
use constellation_core::domain::events::CoordinationEvent;
use constellation_core::domain::messages::{
    ActionApproved, CoordMessage, Envelope, ProposalId, ProposalRequest, ProposalVote, Term,
};
use constellation_core::domain::node_config::ConsensusConfig;
use constellation_core::domain::registry::PeerRegistry;
use constellation_core::domain::transport::{MessageBus, Qos};
use constellation_core::infrastructure::event_bus::EventBus;
use constellation_core::infrastructure::metrics::CoordinationMetrics;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Proposal entry point used by the orchestrator and the role reassigner.
#[async_trait]
pub trait ConsensusService: Send + Sync {
    /// Run one proposal round. `Denied` and `TimedOut` are reported as
    /// outcomes, not errors.
    async fn propose(
        &self,
        action: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<ProposalResult, CoordinationError>;
}

pub struct ConsensusEngine {
    self_id: AgentId,
    config: ConsensusConfig,
    leadership: Arc<dyn LeadershipView>,
    bus: Arc<dyn MessageBus>,
    registry: Arc<dyn PeerRegistry>,
    executor: Arc<dyn ActionExecutor>,
    evaluator: Arc<dyn VoteEvaluator>,
    timeout_fallback: bool,
    metrics: Arc<CoordinationMetrics>,
    events: EventBus,
    pending: Mutex<HashMap<ProposalId, mpsc::Sender<ProposalVote>>>,
    executed: Mutex<ExecutedSet>,
    /// Executed ids whose application failed; duplicates report the failure.
    failed: Mutex<ExecutedSet>,
}

impl ConsensusEngine {
    pub fn new(
        self_id: AgentId,
        config: ConsensusConfig,
        leadership: Arc<dyn LeadershipView>,
        bus: Arc<dyn MessageBus>,
        registry: Arc<dyn PeerRegistry>,
        executor: Arc<dyn ActionExecutor>,
        metrics: Arc<CoordinationMetrics>,
    ) -> Self {
        let capacity = config.dedup_capacity;
        Self {
            self_id,
            config,
            leadership,
            bus,
            registry,
            executor,
            evaluator: Arc::new(AlwaysGrantEvaluator),
            timeout_fallback: true,
            metrics,
            events: EventBus::with_default_capacity(),
            pending: Mutex::new(HashMap::new()),
            executed: Mutex::new(ExecutedSet::new(capacity)),
            failed: Mutex::new(ExecutedSet::new(capacity)),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn VoteEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_timeout_fallback(mut self, enabled: bool) -> Self {
        self.timeout_fallback = enabled;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn self_id(&self) -> &AgentId {
        &self.self_id
    }

    /// Proposals currently awaiting votes.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn has_executed(&self, proposal_id: &ProposalId) -> bool {
        self.executed.lock().contains(proposal_id)
    }

    /// Run a full proposal round for `proposal` as leader.
    pub async fn submit(&self, proposal: Proposal) -> Result<ProposalResult, CoordinationError> {
        let started = std::time::Instant::now();
        let proposal_id = proposal.proposal_id;

        if !self.leadership.is_leader() {
            self.metrics.consensus.not_leader.increment();
            debug!(proposal_id = %proposal_id, action = %proposal.action, "Rejecting proposal: not the leader");
            return Err(CoordinationError::NotLeader {
                leader: self.leadership.leader_id(),
            });
        }
        let term = self.leadership.current_term();

        let mut eligible: HashSet<AgentId> = self.registry.alive_peers().await.into_iter().collect();
        eligible.insert(self.self_id.clone());
        let alive = eligible.len();
        if alive < self.config.min_alive_peers {
            self.metrics.consensus.quorum_unavailable.increment();
            warn!(
                proposal_id = %proposal_id,
                alive,
                required = self.config.min_alive_peers,
                "Not enough alive peers to propose"
            );
            return Err(CoordinationError::QuorumUnavailable {
                alive,
                required: self.config.min_alive_peers,
            });
        }
        let quorum = quorum_size(self.config.fraction_for(&proposal.action), alive);

        let (vote_tx, mut vote_rx) = mpsc::channel(alive * 2);
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&proposal_id) || self.executed.lock().contains(&proposal_id) {
                warn!(proposal_id = %proposal_id, "Proposal id collision, aborting");
                return Err(CoordinationError::ProposalIdCollision(proposal_id));
            }
            pending.insert(proposal_id, vote_tx);
        }
        self.metrics.consensus.proposals.increment();
        info!(
            proposal_id = %proposal_id,
            action = %proposal.action,
            alive,
            quorum,
            "Proposing action"
        );

        let round = self.run_round(&proposal, eligible, quorum, &mut vote_rx).await;
        self.pending.lock().remove(&proposal_id);
        let (outcome, tally) = round?;

        let result = ProposalResult {
            proposal_id,
            outcome,
            grants: tally.grants(),
            denies: tally.denies(),
            quorum,
            alive,
        };
        self.record_resolution(&proposal, &result, started.elapsed());

        if outcome.is_committed() {
            let approved = ActionApproved {
                proposal_id,
                action: proposal.action.clone(),
                params: proposal.params.clone(),
                fallback: outcome == ProposalOutcome::FallbackApproved,
                term,
            };
            let envelope = Envelope::broadcast(self.self_id.clone(), CoordMessage::ActionApproved(approved));
            if let Err(e) = self.bus.publish(envelope, Qos::AtLeastOnce).await {
                warn!(proposal_id = %proposal_id, error = %e, "Failed to broadcast approval");
            }
            self.apply_once(proposal_id, &proposal.action, &proposal.params).await?;
        }

        Ok(result)
    }

    async fn run_round(
        &self,
        proposal: &Proposal,
        eligible: HashSet<AgentId>,
        quorum: usize,
        votes: &mut mpsc::Receiver<ProposalVote>,
    ) -> Result<(ProposalOutcome, VoteTally), CoordinationError> {
        let deadline = Instant::now() + proposal.timeout;
        let request = ProposalRequest {
            proposal_id: proposal.proposal_id,
            action: proposal.action.clone(),
            params: proposal.params.clone(),
            timeout_seconds: proposal.timeout.as_secs_f64(),
        };
        let envelope = Envelope::broadcast(self.self_id.clone(), CoordMessage::ProposalRequest(request.clone()));
        self.bus.publish(envelope, Qos::AtLeastOnce).await?;

        let mut tally = VoteTally::new(proposal.proposal_id, eligible, quorum);
        let own = self.evaluate(&request).await;
        tally.record(&self.self_id, own.granted);

        let outcome = loop {
            match tally.status() {
                TallyStatus::Approved => break ProposalOutcome::Approved,
                TallyStatus::Rejected => break ProposalOutcome::Denied,
                TallyStatus::Pending => {}
            }
            match tokio::time::timeout_at(deadline, votes.recv()).await {
                Ok(Some(vote)) => self.record_vote(&mut tally, &vote),
                Ok(None) | Err(_) => {
                    break if self.timeout_fallback && own.granted {
                        ProposalOutcome::FallbackApproved
                    } else {
                        ProposalOutcome::TimedOut
                    };
                }
            }
        };
        Ok((outcome, tally))
    }

    fn record_vote(&self, tally: &mut VoteTally, vote: &ProposalVote) {
        match tally.record(&vote.voter_id, vote.granted) {
            VoteRecord::Accepted => trace!(
                proposal_id = %vote.proposal_id,
                voter = %vote.voter_id,
                granted = vote.granted,
                reason = vote.reason.as_deref().unwrap_or(""),
                "Vote recorded"
            ),
            VoteRecord::Duplicate => trace!(proposal_id = %vote.proposal_id, voter = %vote.voter_id, "Duplicate vote"),
            VoteRecord::Equivocation => {
                self.metrics.consensus.equivocations.increment();
                warn!(
                    proposal_id = %vote.proposal_id,
                    voter = %vote.voter_id,
                    "Conflicting second vote ignored"
                );
            }
            VoteRecord::Ineligible => debug!(
                proposal_id = %vote.proposal_id,
                voter = %vote.voter_id,
                "Vote from agent not alive at proposal time ignored"
            ),
        }
    }

    fn record_resolution(&self, proposal: &Proposal, result: &ProposalResult, elapsed: Duration) {
        let m = &self.metrics.consensus;
        m.decision_latency.record(elapsed);
        match result.outcome {
            ProposalOutcome::Approved => {
                m.approved.increment();
                info!(
                    proposal_id = %result.proposal_id,
                    action = %proposal.action,
                    grants = result.grants,
                    quorum = result.quorum,
                    "Proposal approved"
                );
            }
            ProposalOutcome::FallbackApproved => {
                m.fallback_approved.increment();
                warn!(
                    proposal_id = %result.proposal_id,
                    action = %proposal.action,
                    grants = result.grants,
                    quorum = result.quorum,
                    "Quorum not reached before timeout, leader applying own intent"
                );
            }
            ProposalOutcome::Denied => {
                m.denied.increment();
                info!(
                    proposal_id = %result.proposal_id,
                    action = %proposal.action,
                    grants = result.grants,
                    denies = result.denies,
                    quorum = result.quorum,
                    "Proposal denied"
                );
            }
            ProposalOutcome::TimedOut => {
                m.timed_out.increment();
                warn!(
                    proposal_id = %result.proposal_id,
                    action = %proposal.action,
                    grants = result.grants,
                    quorum = result.quorum,
                    "Proposal timed out"
                );
            }
        }
        self.events.publish(
            &self.self_id,
            CoordinationEvent::ProposalResolved {
                proposal_id: result.proposal_id,
                action: proposal.action.clone(),
                outcome: result.outcome.as_str().to_string(),
                grants: result.grants,
                denies: result.denies,
                quorum: result.quorum,
                resolved_at: Utc::now(),
            },
        );
    }

    async fn evaluate(&self, request: &ProposalRequest) -> VoteDecision {
        match tokio::time::timeout(self.config.vote_deadline(), self.evaluator.evaluate(request)).await {
            Ok(decision) => decision,
            Err(_) => {
                warn!(proposal_id = %request.proposal_id, "Vote evaluation overran its deadline, denying");
                VoteDecision::deny("vote evaluation exceeded deadline")
            }
        }
    }

    /// Evaluate a peer's proposal and reply to the proposer.
    pub async fn handle_proposal_request(&self, from: &AgentId, request: &ProposalRequest) {
        if from == &self.self_id {
            return;
        }
        let decision = self.evaluate(request).await;
        debug!(
            proposal_id = %request.proposal_id,
            proposer = %from,
            granted = decision.granted,
            "Voting on proposal"
        );
        let vote = ProposalVote {
            proposal_id: request.proposal_id,
            voter_id: self.self_id.clone(),
            granted: decision.granted,
            reason: decision.reason,
        };
        let envelope = Envelope::direct(self.self_id.clone(), from.clone(), CoordMessage::ProposalVote(vote));
        if let Err(e) = self.bus.publish(envelope, Qos::AtLeastOnce).await {
            warn!(proposal_id = %request.proposal_id, error = %e, "Failed to send vote");
        }
    }

    /// Route an inbound vote to the round awaiting it.
    pub fn handle_vote(&self, vote: ProposalVote) {
        let slot = self.pending.lock().get(&vote.proposal_id).cloned();
        match slot {
            Some(sender) => {
                if sender.try_send(vote).is_err() {
                    debug!("Vote channel closed or full, vote dropped");
                }
            }
            None => {
                self.metrics.consensus.late_votes.increment();
                debug!(
                    proposal_id = %vote.proposal_id,
                    voter = %vote.voter_id,
                    "Late vote for resolved proposal ignored"
                );
            }
        }
    }

    pub fn current_term(&self) -> Term {
        self.leadership.current_term()
    }

    /// Whether a commit from `from` made in `term` may be applied here: only
    /// the known leader of the current term may commit.
    pub fn accepts_commit_from(&self, from: &AgentId, term: Term) -> bool {
        let leader = self.leadership.leader_id();
        let current = self.leadership.current_term();
        if leader.as_ref() == Some(from) && term == current {
            return true;
        }
        self.metrics.consensus.unauthorized_commits.increment();
        warn!(
            from = %from,
            term = %term,
            leader = leader.as_ref().map(|l| l.as_str()).unwrap_or("none"),
            current_term = %current,
            "Dropping commit not issued by the current leader"
        );
        false
    }

    pub async fn handle_action_approved(&self, from: &AgentId, approved: &ActionApproved) {
        if !self.accepts_commit_from(from, approved.term) {
            return;
        }
        if approved.fallback {
            debug!(proposal_id = %approved.proposal_id, "Committing fallback approval");
        }
        if let Err(e) = self
            .apply_once(approved.proposal_id, &approved.action, &approved.params)
            .await
        {
            error!(proposal_id = %approved.proposal_id, error = %e, "Failed to apply approved action");
        }
    }

    /// Execute a committed action at most once per proposal id.
    ///
    /// Returns `Ok(false)` if the id was already executed, and an error if
    /// that earlier execution failed. Failures are never retried.
    pub async fn apply_once(
        &self,
        proposal_id: ProposalId,
        action: &str,
        params: &serde_json::Value,
    ) -> Result<bool, CoordinationError> {
        if !self.executed.lock().insert(proposal_id) {
            self.metrics.consensus.duplicate_commits.increment();
            if self.failed.lock().contains(&proposal_id) {
                return Err(CoordinationError::Execution(format!(
                    "earlier application of proposal {} failed",
                    proposal_id
                )));
            }
            debug!(proposal_id = %proposal_id, action, "Already executed, skipping");
            return Ok(false);
        }

        let applied = if action == ROLE_REASSIGNMENT_ACTION {
            self.apply_role_changes(proposal_id, params).await
        } else {
            self.executor
                .apply(action, params)
                .await
                .map_err(|e| CoordinationError::Execution(e.to_string()))
        };
        if let Err(e) = applied {
            self.failed.lock().insert(proposal_id);
            return Err(e);
        }

        self.metrics.consensus.commits.increment();
        self.events.publish(
            &self.self_id,
            CoordinationEvent::ActionCommitted {
                agent_id: self.self_id.clone(),
                proposal_id,
                action: action.to_string(),
                committed_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn apply_role_changes(
        &self,
        proposal_id: ProposalId,
        params: &serde_json::Value,
    ) -> Result<(), CoordinationError> {
        let reassignment = RoleReassignmentParams::from_value(params)
            .map_err(|e| CoordinationError::Execution(format!("malformed role_reassignment params: {}", e)))?;
        for change in &reassignment.changes {
            self.registry.set_agent_role(&change.agent_id, change.to).await;
            info!(
                agent = %self.self_id,
                target = %change.agent_id,
                to = change.to.as_str(),
                proposal_id = %proposal_id,
                "Role reassigned"
            );
            self.events.publish(
                &self.self_id,
                CoordinationEvent::RoleReassigned {
                    agent_id: change.agent_id.clone(),
                    from: change.from,
                    to: change.to,
                    proposal_id,
                    reassigned_at: Utc::now(),
                },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ConsensusService for ConsensusEngine {
    async fn propose(
        &self,
        action: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<ProposalResult, CoordinationError> {
        self.submit(Proposal::new(action, params, timeout)).await
    }
}
