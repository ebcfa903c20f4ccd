// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordination error taxonomy.
//!
//! Every variant is recoverable at the orchestrator boundary, where it is
//! folded into an [`ExecutionOutcome`](crate::application::orchestrator::ExecutionOutcome)
//! with `success = false`.

use constellation_core::domain::agent::AgentId;
use constellation_core::domain::messages::ProposalId;
use constellation_core::domain::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinationError {
    #[error("Not the leader (known leader: {})", leader.as_ref().map(|l| l.as_str()).unwrap_or("none"))]
    NotLeader { leader: Option<AgentId> },

    #[error("Proposal {proposal_id} timed out with {grants}/{quorum} grants")]
    QuorumTimeout {
        proposal_id: ProposalId,
        grants: usize,
        quorum: usize,
    },

    #[error("Quorum unavailable: {alive} alive peers, {required} required")]
    QuorumUnavailable { alive: usize, required: usize },

    #[error("Action '{action}' blocked by safety simulation (risk {total_risk:.4}): {reason}")]
    UnsafeAction {
        action: String,
        total_risk: f64,
        reason: String,
    },

    #[error("Required collaborator unavailable: {0}")]
    DependencyUnavailable(&'static str),

    #[error("Proposal id {0} collides with an in-flight proposal")]
    ProposalIdCollision(ProposalId),

    #[error("Proposal {proposal_id} denied ({grants} grants, {denies} denies, quorum {quorum})")]
    ProposalDenied {
        proposal_id: ProposalId,
        grants: usize,
        denies: usize,
        quorum: usize,
    },

    #[error("Propagation compliance {achieved:.2} below required {required:.2}")]
    ComplianceShortfall { achieved: f64, required: f64 },

    #[error("Policy rejected: {0}")]
    PolicyRejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Execution failed: {0}")]
    Execution(String),
}

impl From<TransportError> for CoordinationError {
    fn from(e: TransportError) -> Self {
        CoordinationError::Transport(e.to_string())
    }
}

impl CoordinationError {
    /// Stable snake_case label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinationError::NotLeader { .. } => "not_leader",
            CoordinationError::QuorumTimeout { .. } => "quorum_timeout",
            CoordinationError::QuorumUnavailable { .. } => "quorum_unavailable",
            CoordinationError::UnsafeAction { .. } => "unsafe_action",
            CoordinationError::DependencyUnavailable(_) => "dependency_unavailable",
            CoordinationError::ProposalIdCollision(_) => "proposal_id_collision",
            CoordinationError::ProposalDenied { .. } => "proposal_denied",
            CoordinationError::ComplianceShortfall { .. } => "compliance_shortfall",
            CoordinationError::PolicyRejected(_) => "policy_rejected",
            CoordinationError::Transport(_) => "transport",
            CoordinationError::Execution(_) => "execution",
        }
    }
}
