// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Vote evaluators: how a peer decides to grant or deny a proposal.

use async_trait::async_trait;
use constellation_core::domain::agent::AgentId;
use constellation_core::domain::messages::ProposalRequest;
use constellation_core::domain::registry::PeerRegistry;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct VoteDecision {
    pub granted: bool,
    pub reason: Option<String>,
}

impl VoteDecision {
    pub fn grant() -> Self {
        Self {
            granted: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait VoteEvaluator: Send + Sync {
    async fn evaluate(&self, request: &ProposalRequest) -> VoteDecision;
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGrantEvaluator;

#[async_trait]
impl VoteEvaluator for AlwaysGrantEvaluator {
    async fn evaluate(&self, _request: &ProposalRequest) -> VoteDecision {
        VoteDecision::grant()
    }
}

/// Denies every action except `safe_mode` while the local risk score is at
/// or above `critical_risk`.
pub struct HealthGatedEvaluator {
    self_id: AgentId,
    registry: Arc<dyn PeerRegistry>,
    critical_risk: f64,
}

impl HealthGatedEvaluator {
    pub fn new(self_id: AgentId, registry: Arc<dyn PeerRegistry>, critical_risk: f64) -> Self {
        Self {
            self_id,
            registry,
            critical_risk,
        }
    }
}

#[async_trait]
impl VoteEvaluator for HealthGatedEvaluator {
    async fn evaluate(&self, request: &ProposalRequest) -> VoteDecision {
        if request.action == "safe_mode" {
            return VoteDecision::grant();
        }
        let risk = self
            .registry
            .health_summary(&self.self_id)
            .await
            .map(|h| h.risk_score)
            .unwrap_or(0.0);
        if risk >= self.critical_risk {
            VoteDecision::deny(format!(
                "local risk {:.2} at or above critical {:.2}",
                risk, self.critical_risk
            ))
        } else {
            VoteDecision::grant()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use constellation_core::domain::agent::SatelliteRole;
    use constellation_core::domain::messages::ProposalId;
    use constellation_core::infrastructure::registry::InMemoryPeerRegistry;

    fn request(action: &str) -> ProposalRequest {
        ProposalRequest {
            proposal_id: ProposalId::new(),
            action: action.to_string(),
            params: serde_json::json!({}),
            timeout_seconds: 1.0,
        }
    }

    #[tokio::test]
    async fn test_health_gate() {
        let registry = InMemoryPeerRegistry::new();
        let me = AgentId::from("SAT-001");
        registry.register(me.clone(), SatelliteRole::Backup);
        let evaluator = HealthGatedEvaluator::new(me.clone(), Arc::new(registry.clone()), 0.8);

        assert!(evaluator.evaluate(&request("load_shed")).await.granted);

        registry.set_risk(&me, 0.85);
        let denied = evaluator.evaluate(&request("load_shed")).await;
        assert!(!denied.granted);
        assert!(denied.reason.unwrap().contains("critical"));
        assert!(evaluator.evaluate(&request("safe_mode")).await.granted);
    }
}
