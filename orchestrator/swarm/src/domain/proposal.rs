// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Proposal and role-change value types shared by the consensus engine and
//! the role reassigner.

use chrono::{DateTime, Utc};
use constellation_core::domain::agent::{AgentId, SatelliteRole};
use constellation_core::domain::messages::ProposalId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Action name carried by role reassignment proposals.
pub const ROLE_REASSIGNMENT_ACTION: &str = "role_reassignment";

/// A leader-created proposal. Immutable once broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub proposal_id: ProposalId,
    pub action: String,
    pub params: serde_json::Value,
    pub timeout: Duration,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(action: impl Into<String>, params: serde_json::Value, timeout: Duration) -> Self {
        Self {
            proposal_id: ProposalId::new(),
            action: action.into(),
            params,
            timeout,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, proposal_id: ProposalId) -> Self {
        self.proposal_id = proposal_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalOutcome {
    /// Quorum of grants reached before the deadline.
    Approved,
    /// Deadline passed without quorum; the leader applied its own intent.
    FallbackApproved,
    /// Quorum became impossible.
    Denied,
    /// Deadline passed without quorum and the fallback was not taken.
    TimedOut,
}

impl ProposalOutcome {
    /// Whether the action was committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, ProposalOutcome::Approved | ProposalOutcome::FallbackApproved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalOutcome::Approved => "approved",
            ProposalOutcome::FallbackApproved => "fallback_approved",
            ProposalOutcome::Denied => "denied",
            ProposalOutcome::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalResult {
    pub proposal_id: ProposalId,
    pub outcome: ProposalOutcome,
    pub grants: usize,
    pub denies: usize,
    pub quorum: usize,
    /// Alive peers (self included) when the proposal was created.
    pub alive: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleChange {
    pub agent_id: AgentId,
    pub from: Option<SatelliteRole>,
    pub to: SatelliteRole,
}

/// `params` payload of a `role_reassignment` proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleReassignmentParams {
    pub changes: Vec<RoleChange>,
    pub reason: String,
}

impl RoleReassignmentParams {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentId> {
        self.changes.iter().map(|c| &c.agent_id)
    }
}
