// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::agent::{AgentId, SatelliteRole};
use crate::domain::decision::ActionScope;
use crate::domain::messages::{ProposalId, Term};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coordination events published on the in-process event bus for observers
/// (CLI simulator, dashboards, tests). They are informational; no component
/// depends on them for correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinationEvent {
    LeaderElected {
        agent_id: AgentId,
        term: Term,
        elected_at: DateTime<Utc>,
    },
    LeaderSteppedDown {
        agent_id: AgentId,
        term: Term,
        stepped_down_at: DateTime<Utc>,
    },
    ProposalResolved {
        proposal_id: ProposalId,
        action: String,
        /// `approved`, `fallback_approved`, `denied` or `timed_out`
        outcome: String,
        grants: usize,
        denies: usize,
        quorum: usize,
        resolved_at: DateTime<Utc>,
    },
    ActionCommitted {
        agent_id: AgentId,
        proposal_id: ProposalId,
        action: String,
        committed_at: DateTime<Utc>,
    },
    RoleReassigned {
        agent_id: AgentId,
        from: Option<SatelliteRole>,
        to: SatelliteRole,
        proposal_id: ProposalId,
        reassigned_at: DateTime<Utc>,
    },
    ActionBlocked {
        action: String,
        total_risk: f64,
        reason: String,
        blocked_at: DateTime<Utc>,
    },
    DecisionExecuted {
        decision_id: Uuid,
        action: String,
        requested_scope: ActionScope,
        effective_scope: ActionScope,
        success: bool,
        reason: String,
        executed_at: DateTime<Utc>,
    },
}

impl CoordinationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinationEvent::LeaderElected { .. } => "leader_elected",
            CoordinationEvent::LeaderSteppedDown { .. } => "leader_stepped_down",
            CoordinationEvent::ProposalResolved { .. } => "proposal_resolved",
            CoordinationEvent::ActionCommitted { .. } => "action_committed",
            CoordinationEvent::RoleReassigned { .. } => "role_reassigned",
            CoordinationEvent::ActionBlocked { .. } => "action_blocked",
            CoordinationEvent::DecisionExecuted { .. } => "decision_executed",
        }
    }
}
