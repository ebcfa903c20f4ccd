// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Policy Arbiter
//!
//! Resolves a locally generated policy against a consensus-approved global
//! one using weighted priority scoring.
//!
//! | Rule | Winner |
//! |------|--------|
//! | SAFETY vs non-SAFETY | SAFETY, regardless of score |
//! | Different weighted scores | Higher `score × weight[priority]` |
//! | Equal weighted scores | More recent timestamp |
//! | Equal score and timestamp | LOCAL-scoped policy, else the local argument |

use crate::domain::error::CoordinationError;
use constellation_core::domain::agent::AgentId;
use constellation_core::domain::policy::{
    Policy, PolicyPriority, PolicyScope, PolicyWeights, SafetyContext, WeightsError,
};
use constellation_core::infrastructure::metrics::CoordinationMetrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Local,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationReason {
    SafetyPriority,
    HigherScore,
    MoreRecent,
    LocalTieBreak,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationOutcome {
    pub winner: Policy,
    pub source: PolicySource,
    pub reason: ArbitrationReason,
    pub local_score: f64,
    pub global_score: f64,
}

/// Winning action of a multi-agent vote.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiAgentResolution {
    pub action: String,
    pub aggregate_score: f64,
    pub supporters: Vec<AgentId>,
    /// Highest-scoring policy of the winning group.
    pub representative: Policy,
}

pub struct PolicyArbiter {
    weights: RwLock<PolicyWeights>,
    metrics: Arc<CoordinationMetrics>,
}

impl PolicyArbiter {
    pub fn new(weights: PolicyWeights, metrics: Arc<CoordinationMetrics>) -> Result<Self, WeightsError> {
        weights.validate()?;
        Ok(Self {
            weights: RwLock::new(weights),
            metrics,
        })
    }

    pub fn weights(&self) -> PolicyWeights {
        *self.weights.read()
    }

    /// Replace the weights at runtime; invalid weights leave the current set.
    pub fn update_weights(&self, weights: PolicyWeights) -> Result<(), WeightsError> {
        if let Err(e) = weights.validate() {
            warn!(error = %e, "Rejected policy weight update");
            return Err(e);
        }
        *self.weights.write() = weights;
        self.metrics.arbitration.weight_updates.increment();
        info!(
            safety = weights.safety,
            performance = weights.performance,
            availability = weights.availability,
            "Policy weights updated"
        );
        Ok(())
    }

    pub fn weighted_score(&self, policy: &Policy) -> f64 {
        policy.score * self.weights.read().weight(policy.priority)
    }

    pub fn resolve(&self, local: &Policy, global: &Policy) -> ArbitrationOutcome {
        let local_score = self.weighted_score(local);
        let global_score = self.weighted_score(global);
        let local_safety = local.priority == PolicyPriority::Safety;
        let global_safety = global.priority == PolicyPriority::Safety;

        let (source, reason) = if local_safety != global_safety {
            let source = if local_safety { PolicySource::Local } else { PolicySource::Global };
            (source, ArbitrationReason::SafetyPriority)
        } else if (local_score - global_score).abs() > SCORE_EPSILON {
            let source = if local_score > global_score { PolicySource::Local } else { PolicySource::Global };
            (source, ArbitrationReason::HigherScore)
        } else if local.timestamp != global.timestamp {
            let source = if local.timestamp > global.timestamp { PolicySource::Local } else { PolicySource::Global };
            (source, ArbitrationReason::MoreRecent)
        } else if global.scope == PolicyScope::Local && local.scope != PolicyScope::Local {
            (PolicySource::Global, ArbitrationReason::LocalTieBreak)
        } else {
            (PolicySource::Local, ArbitrationReason::LocalTieBreak)
        };

        let m = &self.metrics.arbitration;
        m.resolutions.increment();
        if reason == ArbitrationReason::SafetyPriority {
            m.safety_overrides.increment();
        }
        match source {
            PolicySource::Local => m.local_wins.increment(),
            PolicySource::Global => m.global_wins.increment(),
        }

        let winner = match source {
            PolicySource::Local => local.clone(),
            PolicySource::Global => global.clone(),
        };
        debug!(
            action = %winner.action,
            source = ?source,
            reason = ?reason,
            local_score,
            global_score,
            "Policy conflict resolved"
        );

        ArbitrationOutcome {
            winner,
            source,
            reason,
            local_score,
            global_score,
        }
    }

    /// Aggregate weighted scores per action and pick the strongest action.
    pub fn resolve_multi_agent(&self, policies: &[Policy]) -> Option<MultiAgentResolution> {
        let mut groups: BTreeMap<&str, Vec<&Policy>> = BTreeMap::new();
        for policy in policies {
            groups.entry(policy.action.as_str()).or_default().push(policy);
        }

        let mut best: Option<(&str, f64, bool, &Vec<&Policy>)> = None;
        // BTreeMap iterates actions in ascending order, so an exact tie keeps
        // the lexicographically smaller action unless SAFETY breaks it.
        for (action, members) in &groups {
            let aggregate: f64 = members.iter().map(|p| self.weighted_score(p)).sum();
            let has_safety = members.iter().any(|p| p.priority == PolicyPriority::Safety);
            let replace = match &best {
                None => true,
                Some((_, best_score, best_safety, _)) => {
                    if (aggregate - best_score).abs() > SCORE_EPSILON {
                        aggregate > *best_score
                    } else {
                        has_safety && !best_safety
                    }
                }
            };
            if replace {
                best = Some((*action, aggregate, has_safety, members));
            }
        }

        self.conflict_score(policies);

        let (action, aggregate_score, _, members) = best?;
        let representative = members
            .iter()
            .copied()
            .max_by(|a, b| self.weighted_score(a).total_cmp(&self.weighted_score(b)))?
            .clone();
        let mut supporters: Vec<AgentId> = members.iter().map(|p| p.agent_id.clone()).collect();
        supporters.sort();
        supporters.dedup();

        Some(MultiAgentResolution {
            action: action.to_string(),
            aggregate_score,
            supporters,
            representative,
        })
    }

    /// Share of policies disagreeing with the plurality action; 0 when empty.
    pub fn conflict_score(&self, policies: &[Policy]) -> f64 {
        if policies.is_empty() {
            return 0.0;
        }
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for policy in policies {
            *counts.entry(policy.action.as_str()).or_default() += 1;
        }
        let plurality = counts.values().copied().max().unwrap_or(0);
        let score = (policies.len() - plurality) as f64 / policies.len() as f64;
        self.metrics.arbitration.conflict_score.set(score);
        score
    }

    /// Reject a non-SAFETY policy while any hard constraint is active.
    pub fn check_safety_compliance(&self, policy: &Policy, context: &SafetyContext) -> Result<(), CoordinationError> {
        if policy.priority == PolicyPriority::Safety {
            return Ok(());
        }
        let constraints = context.active_hard_constraints();
        if constraints.is_empty() {
            return Ok(());
        }
        self.metrics.arbitration.compliance_rejections.increment();
        warn!(
            action = %policy.action,
            priority = ?policy.priority,
            constraints = ?constraints,
            "Policy rejected by active hard constraints"
        );
        Err(CoordinationError::PolicyRejected(format!(
            "{:?} policy '{}' violates active constraints: {}",
            policy.priority,
            policy.action,
            constraints.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn arbiter() -> PolicyArbiter {
        PolicyArbiter::new(PolicyWeights::default(), Arc::new(CoordinationMetrics::new())).unwrap()
    }

    fn policy(action: &str, priority: PolicyPriority, scope: PolicyScope, score: f64, agent: &str) -> Policy {
        Policy::new(action, priority, scope, score, AgentId::from(agent)).unwrap()
    }

    #[test]
    fn test_safety_beats_higher_scoring_performance() {
        let a = arbiter();
        let local = policy("safe_mode", PolicyPriority::Safety, PolicyScope::Local, 0.95, "SAT-1");
        let global = policy("load_shed", PolicyPriority::Performance, PolicyScope::Swarm, 0.99, "SAT-2");
        let outcome = a.resolve(&local, &global);
        assert_eq!(outcome.source, PolicySource::Local);
        assert_eq!(outcome.reason, ArbitrationReason::SafetyPriority);
        assert_eq!(outcome.winner.action, "safe_mode");
    }

    #[test]
    fn test_safety_wins_even_with_tiny_score() {
        let a = arbiter();
        let local = policy("load_shed", PolicyPriority::Availability, PolicyScope::Local, 1.0, "SAT-1");
        let global = policy("safe_mode", PolicyPriority::Safety, PolicyScope::Swarm, 0.01, "SAT-2");
        assert_eq!(a.resolve(&local, &global).source, PolicySource::Global);
    }

    #[test]
    fn test_higher_weighted_score_wins() {
        let a = arbiter();
        // 0.9 × 0.1 = 0.09 vs 0.5 × 0.2 = 0.10
        let local = policy("a", PolicyPriority::Availability, PolicyScope::Local, 0.9, "SAT-1");
        let global = policy("b", PolicyPriority::Performance, PolicyScope::Swarm, 0.5, "SAT-2");
        let outcome = a.resolve(&local, &global);
        assert_eq!(outcome.source, PolicySource::Global);
        assert_eq!(outcome.reason, ArbitrationReason::HigherScore);
    }

    #[test]
    fn test_tie_breaks_on_recency_then_local_scope() {
        let a = arbiter();
        let t = Utc::now();
        let local = policy("a", PolicyPriority::Performance, PolicyScope::Swarm, 0.5, "SAT-1").with_timestamp(t);
        let newer = policy("b", PolicyPriority::Performance, PolicyScope::Swarm, 0.5, "SAT-2")
            .with_timestamp(t + Duration::seconds(1));
        let outcome = a.resolve(&local, &newer);
        assert_eq!(outcome.source, PolicySource::Global);
        assert_eq!(outcome.reason, ArbitrationReason::MoreRecent);

        let global_local_scope =
            policy("c", PolicyPriority::Performance, PolicyScope::Local, 0.5, "SAT-2").with_timestamp(t);
        let outcome = a.resolve(&local, &global_local_scope);
        assert_eq!(outcome.source, PolicySource::Global);
        assert_eq!(outcome.reason, ArbitrationReason::LocalTieBreak);

        let same = policy("d", PolicyPriority::Performance, PolicyScope::Swarm, 0.5, "SAT-2").with_timestamp(t);
        assert_eq!(a.resolve(&local, &same).source, PolicySource::Local);
    }

    #[test]
    fn test_weight_updates_are_validated() {
        let a = arbiter();
        let bad = PolicyWeights {
            safety: 0.6,
            performance: 0.6,
            availability: 0.1,
        };
        assert!(a.update_weights(bad).is_err());
        assert_eq!(a.weights(), PolicyWeights::default());

        let good = PolicyWeights {
            safety: 0.5,
            performance: 0.3,
            availability: 0.2,
        };
        a.update_weights(good).unwrap();
        assert_eq!(a.weights(), good);
    }

    #[test]
    fn test_multi_agent_aggregation() {
        let a = arbiter();
        let policies = vec![
            policy("load_shed", PolicyPriority::Performance, PolicyScope::Swarm, 0.6, "SAT-1"),
            policy("load_shed", PolicyPriority::Performance, PolicyScope::Swarm, 0.6, "SAT-2"),
            policy("attitude_adjust", PolicyPriority::Availability, PolicyScope::Swarm, 0.9, "SAT-3"),
        ];
        let resolution = a.resolve_multi_agent(&policies).unwrap();
        assert_eq!(resolution.action, "load_shed");
        assert_eq!(resolution.supporters.len(), 2);
        assert!((resolution.aggregate_score - 0.24).abs() < 1e-9);
    }

    #[test]
    fn test_multi_agent_tie_prefers_safety_then_name() {
        let a = arbiter();
        // 0.2 × 0.7 = 0.14 vs 0.7 × 0.2 = 0.14
        let policies = vec![
            policy("alpha", PolicyPriority::Performance, PolicyScope::Swarm, 0.7, "SAT-1"),
            policy("zulu", PolicyPriority::Safety, PolicyScope::Swarm, 0.2, "SAT-2"),
        ];
        assert_eq!(a.resolve_multi_agent(&policies).unwrap().action, "zulu");

        let policies = vec![
            policy("bravo", PolicyPriority::Performance, PolicyScope::Swarm, 0.5, "SAT-1"),
            policy("alpha", PolicyPriority::Performance, PolicyScope::Swarm, 0.5, "SAT-2"),
        ];
        assert_eq!(a.resolve_multi_agent(&policies).unwrap().action, "alpha");
        assert!(a.resolve_multi_agent(&[]).is_none());
    }

    #[test]
    fn test_conflict_score() {
        let a = arbiter();
        assert_eq!(a.conflict_score(&[]), 0.0);
        let policies = vec![
            policy("x", PolicyPriority::Performance, PolicyScope::Swarm, 0.5, "SAT-1"),
            policy("x", PolicyPriority::Performance, PolicyScope::Swarm, 0.5, "SAT-2"),
            policy("x", PolicyPriority::Performance, PolicyScope::Swarm, 0.5, "SAT-3"),
            policy("y", PolicyPriority::Performance, PolicyScope::Swarm, 0.5, "SAT-4"),
        ];
        assert_eq!(a.conflict_score(&policies), 0.25);
    }

    #[test]
    fn test_hard_constraints_reject_non_safety() {
        let a = arbiter();
        let ctx = SafetyContext::default().with_battery(0.05);
        let perf = policy("load_shed", PolicyPriority::Performance, PolicyScope::Local, 0.9, "SAT-1");
        let safety = policy("safe_mode", PolicyPriority::Safety, PolicyScope::Local, 0.9, "SAT-1");
        assert!(matches!(
            a.check_safety_compliance(&perf, &ctx),
            Err(CoordinationError::PolicyRejected(_))
        ));
        assert!(a.check_safety_compliance(&safety, &ctx).is_ok());
        assert!(a
            .check_safety_compliance(&perf, &SafetyContext::default().with_battery(0.8))
            .is_ok());
    }
}
