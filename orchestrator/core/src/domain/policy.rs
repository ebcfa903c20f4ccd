// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Policies
//!
//! Value objects compared by the policy arbiter: a locally generated
//! [`Policy`] against a consensus-approved global one.

use crate::domain::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy score must be within [0, 1], got {0}")]
    ScoreOutOfRange(f64),

    #[error("Malformed policy record: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyPriority {
    Safety,
    Performance,
    Availability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyScope {
    Local,
    Swarm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub priority: PolicyPriority,
    pub scope: PolicyScope,
    /// Producer score in `[0, 1]`.
    pub score: f64,
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
}

impl Policy {
    pub fn new(
        action: impl Into<String>,
        priority: PolicyPriority,
        scope: PolicyScope,
        score: f64,
        agent_id: AgentId,
    ) -> Result<Self, PolicyError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(PolicyError::ScoreOutOfRange(score));
        }
        Ok(Self {
            action: action.into(),
            parameters: serde_json::Value::Object(Default::default()),
            priority,
            scope,
            score,
            agent_id,
            timestamp: Utc::now(),
        })
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Flatten into a JSON object, the shape policies travel in.
    pub fn to_dict(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Rebuild a policy from [`Policy::to_dict`] output.
    pub fn from_dict(map: serde_json::Map<String, serde_json::Value>) -> Result<Self, PolicyError> {
        let policy: Policy = serde_json::from_value(serde_json::Value::Object(map))?;
        if !(0.0..=1.0).contains(&policy.score) {
            return Err(PolicyError::ScoreOutOfRange(policy.score));
        }
        Ok(policy)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum WeightsError {
    #[error("Policy weights must sum to 1.0, got {0:.4}")]
    InvalidSum(f64),

    #[error("Policy weight for {0:?} must be between 0.0 and 1.0, got {1}")]
    OutOfRange(PolicyPriority, f64),
}

/// Per-priority multipliers used to compute a policy's weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyWeights {
    #[serde(default = "default_safety_weight")]
    pub safety: f64,
    #[serde(default = "default_performance_weight")]
    pub performance: f64,
    #[serde(default = "default_availability_weight")]
    pub availability: f64,
}

impl Default for PolicyWeights {
    fn default() -> Self {
        Self {
            safety: default_safety_weight(),
            performance: default_performance_weight(),
            availability: default_availability_weight(),
        }
    }
}

impl PolicyWeights {
    pub fn weight(&self, priority: PolicyPriority) -> f64 {
        match priority {
            PolicyPriority::Safety => self.safety,
            PolicyPriority::Performance => self.performance,
            PolicyPriority::Availability => self.availability,
        }
    }

    pub fn validate(&self) -> Result<(), WeightsError> {
        for (priority, value) in [
            (PolicyPriority::Safety, self.safety),
            (PolicyPriority::Performance, self.performance),
            (PolicyPriority::Availability, self.availability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(WeightsError::OutOfRange(priority, value));
            }
        }
        let sum = self.safety + self.performance + self.availability;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(WeightsError::InvalidSum(sum));
        }
        Ok(())
    }
}

fn default_safety_weight() -> f64 {
    0.7
}

fn default_performance_weight() -> f64 {
    0.2
}

fn default_availability_weight() -> f64 {
    0.1
}

/// Hard platform constraints evaluated independently of policy scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyContext {
    /// Battery state of charge in `[0, 1]`, when known.
    pub battery_level: Option<f64>,
    pub battery_critical_threshold: f64,
    /// Other named hard constraints currently in force (e.g. `thermal_limit`).
    #[serde(default)]
    pub active_constraints: BTreeSet<String>,
}

impl Default for SafetyContext {
    fn default() -> Self {
        Self {
            battery_level: None,
            battery_critical_threshold: 0.2,
            active_constraints: BTreeSet::new(),
        }
    }
}

impl SafetyContext {
    pub fn with_battery(mut self, level: f64) -> Self {
        self.battery_level = Some(level);
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.active_constraints.insert(constraint.into());
        self
    }

    pub fn active_hard_constraints(&self) -> Vec<String> {
        let mut constraints: Vec<String> = self.active_constraints.iter().cloned().collect();
        if let Some(level) = self.battery_level {
            if level < self.battery_critical_threshold {
                constraints.push("battery_critical".to_string());
            }
        }
        constraints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_policy() -> Policy {
        Policy::new(
            "load_shed",
            PolicyPriority::Performance,
            PolicyScope::Swarm,
            0.75,
            AgentId::from("SAT-007"),
        )
        .unwrap()
        .with_parameters(serde_json::json!({ "shed_percent": 12 }))
    }

    #[test]
    fn test_policy_dict_roundtrip() {
        let policy = sample_policy();
        let restored = Policy::from_dict(policy.to_dict()).unwrap();
        assert_eq!(restored, policy);
    }

    #[test]
    fn test_from_dict_rejects_out_of_range_score() {
        let mut map = sample_policy().to_dict();
        map.insert("score".to_string(), serde_json::json!(1.4));
        assert!(matches!(Policy::from_dict(map), Err(PolicyError::ScoreOutOfRange(_))));
    }

    #[test]
    fn test_from_dict_rejects_missing_fields() {
        let mut map = sample_policy().to_dict();
        map.remove("priority");
        assert!(matches!(Policy::from_dict(map), Err(PolicyError::Malformed(_))));
    }

    #[test]
    fn test_default_weights_are_valid() {
        assert!(PolicyWeights::default().validate().is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let weights = PolicyWeights {
            safety: 0.5,
            performance: 0.2,
            availability: 0.1,
        };
        assert!(matches!(weights.validate(), Err(WeightsError::InvalidSum(_))));
    }

    #[test]
    fn test_battery_below_critical_is_a_hard_constraint() {
        let ctx = SafetyContext::default().with_battery(0.1);
        assert_eq!(ctx.active_hard_constraints(), vec!["battery_critical".to_string()]);
        let ctx = SafetyContext::default().with_battery(0.6);
        assert!(ctx.active_hard_constraints().is_empty());
    }
}
