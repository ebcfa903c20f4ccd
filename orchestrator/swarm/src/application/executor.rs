// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Local action execution port.

use async_trait::async_trait;
use constellation_core::domain::agent::AgentId;
use parking_lot::Mutex;
use tracing::info;

/// Applies an action on the local platform (ADCS, power, thermal control).
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn apply(&self, action: &str, params: &serde_json::Value) -> anyhow::Result<()>;
}

/// Logs every action and reports success.
#[derive(Debug, Clone)]
pub struct LoggingExecutor {
    agent: AgentId,
}

impl LoggingExecutor {
    pub fn new(agent: AgentId) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl ActionExecutor for LoggingExecutor {
    async fn apply(&self, action: &str, params: &serde_json::Value) -> anyhow::Result<()> {
        info!(agent = %self.agent, action, params = %params, "Applying action");
        Ok(())
    }
}

/// Records applied actions in order; optionally fails named actions.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    applied: Mutex<Vec<(String, serde_json::Value)>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `apply` of `action` fail.
    pub fn fail_on(&self, action: impl Into<String>) {
        self.failing.lock().push(action.into());
    }

    pub fn applied(&self) -> Vec<(String, serde_json::Value)> {
        self.applied.lock().clone()
    }

    pub fn count(&self, action: &str) -> usize {
        self.applied.lock().iter().filter(|(a, _)| a == action).count()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn apply(&self, action: &str, params: &serde_json::Value) -> anyhow::Result<()> {
        if self.failing.lock().iter().any(|a| a == action) {
            anyhow::bail!("actuator rejected '{}'", action);
        }
        self.applied.lock().push((action.to_string(), params.clone()));
        Ok(())
    }
}
