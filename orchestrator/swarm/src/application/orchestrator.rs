// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Response Orchestrator
//!
//! Top-level entry point for decisions. Routes each [`Decision`] through the
//! smallest set of components its scope needs.
//!
//! | Scope | Path | Compliance |
//! |-------|------|------------|
//! | `LOCAL` | executor | n/a |
//! | `SWARM` | leadership → consensus → propagation | `swarm_compliance` (0.90) |
//! | `CONSTELLATION` | safety → leadership → consensus → propagation | `constellation_compliance` (0.95) |
//!
//! A missing collaborator makes coordinated scopes fail closed; `LOCAL` is
//! unaffected. Every failure is returned in the [`ExecutionOutcome`], never
//! raised.

use crate::application::consensus::ConsensusService;
use crate::application::election::LeadershipView;
use crate::application::executor::ActionExecutor;
use crate::application::propagation::Propagator;
use crate::domain::arbiter::{PolicyArbiter, PolicySource};
use crate::domain::error::CoordinationError;
use crate::domain::proposal::ProposalOutcome;
use crate::domain::safety::{NeighborSnapshot, SafetySimulator, SafetyVerdict};
use chrono::Utc;
use constellation_core::domain::agent::AgentId;
use constellation_core::domain::decision::{ActionScope, Decision};
use constellation_core::domain::events::CoordinationEvent;
use constellation_core::domain::messages::ProposalId;
use constellation_core::domain::node_config::{FeatureFlags, OrchestratorConfig};
use constellation_core::domain::policy::{Policy, PolicyScope, SafetyContext};
use constellation_core::domain::registry::PeerRegistry;
use constellation_core::infrastructure::event_bus::EventBus;
use constellation_core::infrastructure::metrics::CoordinationMetrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub decision_id: Uuid,
    pub action: String,
    pub requested_scope: ActionScope,
    pub effective_scope: ActionScope,
    pub success: bool,
    pub reason: String,
    pub proposal_id: Option<ProposalId>,
    pub compliance: Option<f64>,
    pub failure: Option<CoordinationError>,
    pub safety: Option<SafetyVerdict>,
}

impl ExecutionOutcome {
    fn pending(decision: &Decision, requested: ActionScope, effective: ActionScope) -> Self {
        Self {
            decision_id: decision.decision_id,
            action: decision.action.clone(),
            requested_scope: requested,
            effective_scope: effective,
            success: false,
            reason: String::new(),
            proposal_id: None,
            compliance: None,
            failure: None,
            safety: None,
        }
    }
}

pub struct ResponseOrchestrator {
    self_id: AgentId,
    config: OrchestratorConfig,
    features: FeatureFlags,
    default_timeout: Duration,
    executor: Arc<dyn ActionExecutor>,
    leadership: Option<Arc<dyn LeadershipView>>,
    consensus: Option<Arc<dyn ConsensusService>>,
    registry: Option<Arc<dyn PeerRegistry>>,
    propagator: Option<Arc<dyn Propagator>>,
    safety: Option<Arc<SafetySimulator>>,
    arbiter: Option<Arc<PolicyArbiter>>,
    metrics: Arc<CoordinationMetrics>,
    events: Option<EventBus>,
}

impl ResponseOrchestrator {
    pub fn new(
        self_id: AgentId,
        config: OrchestratorConfig,
        features: FeatureFlags,
        executor: Arc<dyn ActionExecutor>,
        metrics: Arc<CoordinationMetrics>,
    ) -> Self {
        Self {
            self_id,
            config,
            features,
            default_timeout: Duration::from_secs(5),
            executor,
            leadership: None,
            consensus: None,
            registry: None,
            propagator: None,
            safety: None,
            arbiter: None,
            metrics,
            events: None,
        }
    }

    pub fn with_leadership(mut self, leadership: Arc<dyn LeadershipView>) -> Self {
        self.leadership = Some(leadership);
        self
    }

    pub fn with_consensus(mut self, consensus: Arc<dyn ConsensusService>) -> Self {
        self.consensus = Some(consensus);
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn PeerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_propagator(mut self, propagator: Arc<dyn Propagator>) -> Self {
        self.propagator = Some(propagator);
        self
    }

    pub fn with_safety(mut self, safety: Arc<SafetySimulator>) -> Self {
        self.safety = Some(safety);
        self
    }

    pub fn with_arbiter(mut self, arbiter: Arc<PolicyArbiter>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Proposal timeout used by [`ResponseOrchestrator::submit`].
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Execute `decision` at its own scope with the default timeout.
    pub async fn submit(&self, decision: &Decision) -> ExecutionOutcome {
        self.execute(decision, decision.scope, self.default_timeout).await
    }

    pub async fn execute(&self, decision: &Decision, scope: ActionScope, timeout: Duration) -> ExecutionOutcome {
        let effective = if scope != ActionScope::Local && (self.features.force_local || !self.features.swarm_enabled) {
            self.metrics.orchestration.forced_local.increment();
            info!(
                decision_id = %decision.decision_id,
                requested = %scope,
                force_local = self.features.force_local,
                swarm_enabled = self.features.swarm_enabled,
                "Routing decision down the local path"
            );
            ActionScope::Local
        } else {
            scope
        };

        let mut outcome = ExecutionOutcome::pending(decision, scope, effective);
        let result = match effective {
            ActionScope::Local => {
                self.metrics.orchestration.local.increment();
                self.run_local(decision).await
            }
            ActionScope::Swarm => {
                self.metrics.orchestration.swarm.increment();
                self.run_coordinated(decision, effective, timeout, &mut outcome).await
            }
            ActionScope::Constellation => {
                self.metrics.orchestration.constellation.increment();
                self.run_coordinated(decision, effective, timeout, &mut outcome).await
            }
        };

        match result {
            Ok(()) => {
                self.metrics.orchestration.succeeded.increment();
                outcome.success = true;
                outcome.reason = match outcome.compliance {
                    Some(c) => format!("executed at {} scope, compliance {:.2}", effective, c),
                    None => format!("executed at {} scope", effective),
                };
                info!(
                    decision_id = %decision.decision_id,
                    action = %decision.action,
                    scope = %effective,
                    "Decision executed"
                );
            }
            Err(e) => {
                self.metrics.orchestration.failed.increment();
                warn!(
                    decision_id = %decision.decision_id,
                    action = %decision.action,
                    scope = %effective,
                    kind = e.kind(),
                    error = %e,
                    "Decision not executed"
                );
                outcome.reason = e.to_string();
                outcome.failure = Some(e);
            }
        }

        if let Some(events) = &self.events {
            events.publish(
                &self.self_id,
                CoordinationEvent::DecisionExecuted {
                    decision_id: outcome.decision_id,
                    action: outcome.action.clone(),
                    requested_scope: outcome.requested_scope,
                    effective_scope: outcome.effective_scope,
                    success: outcome.success,
                    reason: outcome.reason.clone(),
                    executed_at: Utc::now(),
                },
            );
        }
        outcome
    }

    async fn run_local(&self, decision: &Decision) -> Result<(), CoordinationError> {
        self.executor
            .apply(&decision.action, &decision.params)
            .await
            .map_err(|e| CoordinationError::Execution(e.to_string()))
    }

    async fn run_coordinated(
        &self,
        decision: &Decision,
        scope: ActionScope,
        timeout: Duration,
        outcome: &mut ExecutionOutcome,
    ) -> Result<(), CoordinationError> {
        let leadership = self
            .leadership
            .as_ref()
            .ok_or(CoordinationError::DependencyUnavailable("leader election"))?;
        let consensus = self
            .consensus
            .as_ref()
            .ok_or(CoordinationError::DependencyUnavailable("consensus engine"))?;
        let registry = self
            .registry
            .as_ref()
            .ok_or(CoordinationError::DependencyUnavailable("peer registry"))?;
        let propagator = self
            .propagator
            .as_ref()
            .ok_or(CoordinationError::DependencyUnavailable("propagator"))?;

        let required = if scope == ActionScope::Constellation {
            let safety = self
                .safety
                .as_ref()
                .ok_or(CoordinationError::DependencyUnavailable("safety simulator"))?;
            let neighbors = NeighborSnapshot::capture(registry.as_ref(), &self.self_id).await;
            let verdict = safety.simulate(&decision.action, &decision.params, &neighbors);
            outcome.safety = Some(verdict.clone());
            if !verdict.is_safe {
                let reason = verdict
                    .blocked_reason
                    .unwrap_or_else(|| "risk above threshold".to_string());
                if let Some(events) = &self.events {
                    events.publish(
                        &self.self_id,
                        CoordinationEvent::ActionBlocked {
                            action: decision.action.clone(),
                            total_risk: verdict.total_risk,
                            reason: reason.clone(),
                            blocked_at: Utc::now(),
                        },
                    );
                }
                return Err(CoordinationError::UnsafeAction {
                    action: decision.action.clone(),
                    total_risk: verdict.total_risk,
                    reason,
                });
            }
            self.config.constellation_compliance
        } else {
            self.config.swarm_compliance
        };

        // Unsafe actions are blocked on any agent, leader or not.
        if !leadership.is_leader() {
            return Err(CoordinationError::NotLeader {
                leader: leadership.leader_id(),
            });
        }

        let result = consensus
            .propose(&decision.action, decision.params.clone(), timeout)
            .await?;
        outcome.proposal_id = Some(result.proposal_id);
        match result.outcome {
            ProposalOutcome::Approved | ProposalOutcome::FallbackApproved => {}
            ProposalOutcome::Denied => {
                return Err(CoordinationError::ProposalDenied {
                    proposal_id: result.proposal_id,
                    grants: result.grants,
                    denies: result.denies,
                    quorum: result.quorum,
                })
            }
            ProposalOutcome::TimedOut => {
                return Err(CoordinationError::QuorumTimeout {
                    proposal_id: result.proposal_id,
                    grants: result.grants,
                    quorum: result.quorum,
                })
            }
        }

        let report = propagator
            .propagate(
                result.proposal_id,
                &decision.action,
                &decision.params,
                self.config.propagation_timeout(),
            )
            .await?;
        outcome.compliance = Some(report.compliance);
        self.metrics.orchestration.last_compliance.set(report.compliance);
        if report.compliance < required {
            return Err(CoordinationError::ComplianceShortfall {
                achieved: report.compliance,
                required,
            });
        }
        Ok(())
    }

    /// Arbitrate between a local and a consensus-approved global policy,
    /// then execute the winner.
    pub async fn resolve_and_execute(
        &self,
        local: &Policy,
        global: &Policy,
        context: &SafetyContext,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, CoordinationError> {
        let arbiter = self
            .arbiter
            .as_ref()
            .ok_or(CoordinationError::DependencyUnavailable("policy arbiter"))?;
        let resolution = arbiter.resolve(local, global);
        arbiter.check_safety_compliance(&resolution.winner, context)?;

        let winner = resolution.winner;
        let scope = match winner.scope {
            PolicyScope::Local => ActionScope::Local,
            PolicyScope::Swarm => ActionScope::Swarm,
        };
        let source = match resolution.source {
            PolicySource::Local => "local",
            PolicySource::Global => "global",
        };
        let decision = Decision::new(winner.action.clone(), scope, winner.parameters.clone())
            .with_confidence(winner.score)
            .with_reasoning(format!("{} policy won arbitration ({:?})", source, resolution.reason));
        Ok(self.execute(&decision, scope, timeout).await)
    }
}
