// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Decisions & Action Scopes
//!
//! A [`Decision`] is produced by the anomaly/decision layer and consumed by the
//! response orchestrator. Its [`ActionScope`] states how much coordination the
//! action needs before it may run.
//!
//! | Scope | Coordination |
//! |-------|--------------|
//! | `LOCAL` | none, executes immediately |
//! | `SWARM` | leader proposal, 2/3 quorum, 90% propagation compliance |
//! | `CONSTELLATION` | safety simulation, then as `SWARM` with 95% compliance |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionScope {
    Local,
    Swarm,
    Constellation,
}

impl ActionScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionScope::Local => "LOCAL",
            ActionScope::Swarm => "SWARM",
            ActionScope::Constellation => "CONSTELLATION",
        }
    }

    /// Parse a scope, degrading malformed input to `LOCAL`.
    ///
    /// A malformed scope must never crash the caller; it is logged and the
    /// decision takes the uncoordinated path.
    pub fn parse_or_local(value: &str) -> ActionScope {
        match value.parse() {
            Ok(scope) => scope,
            Err(e) => {
                tracing::warn!(scope = value, "{}; defaulting to LOCAL", e);
                ActionScope::Local
            }
        }
    }
}

impl<'de> Deserialize<'de> for ActionScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(ActionScope::parse_or_local(&value))
    }
}

impl fmt::Display for ActionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid action scope '{0}'")]
pub struct InvalidScopeError(pub String);

impl FromStr for ActionScope {
    type Err = InvalidScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(ActionScope::Local),
            "SWARM" => Ok(ActionScope::Swarm),
            "CONSTELLATION" => Ok(ActionScope::Constellation),
            _ => Err(InvalidScopeError(s.to_string())),
        }
    }
}

/// An action chosen by the decision layer, awaiting orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: Uuid,
    /// Action type, e.g. `attitude_adjust`, `load_shed`, `safe_mode`.
    pub action: String,
    pub scope: ActionScope,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Producer confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(action: impl Into<String>, scope: ActionScope, params: serde_json::Value) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            action: action.into(),
            scope,
            params,
            confidence: 1.0,
            reasoning: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}
