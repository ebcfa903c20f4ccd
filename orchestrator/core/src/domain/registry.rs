// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Peer registry port.
//!
//! Discovery and health broadcast belong to the registry implementation; the
//! coordination engine only reads liveness and health from it and writes
//! roles that consensus has approved.

use crate::domain::agent::{AgentId, HealthSummary, SatelliteRole};
use async_trait::async_trait;

#[async_trait]
pub trait PeerRegistry: Send + Sync {
    /// Agents currently reachable, including the local agent.
    async fn alive_peers(&self) -> Vec<AgentId>;

    async fn health_summary(&self, agent: &AgentId) -> Option<HealthSummary>;

    async fn agent_role(&self, agent: &AgentId) -> Option<SatelliteRole>;

    /// Record a role change. Called only after consensus approval.
    async fn set_agent_role(&self, agent: &AgentId, role: SatelliteRole);

    /// ISL link quality between two agents in `[0, 1]`; `None` when no direct
    /// link exists.
    async fn link_quality(&self, from: &AgentId, to: &AgentId) -> Option<f64>;
}
