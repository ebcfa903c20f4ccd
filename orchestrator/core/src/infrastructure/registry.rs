// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory [`PeerRegistry`].
//!
//! Liveness, health and link quality live in a shared "world" that every
//! view observes. Roles are per view: each agent's registry records the roles
//! it has committed, so propagation can be checked agent by agent. Create
//! views with [`InMemoryPeerRegistry::view`] after registering the
//! constellation; a view starts from the roles registered so far.

use crate::domain::agent::{AgentId, HealthSummary, SatelliteRole};
use crate::domain::registry::PeerRegistry;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct PeerRecord {
    alive: bool,
    health: HealthSummary,
}

#[derive(Debug, Default)]
struct World {
    peers: BTreeMap<AgentId, PeerRecord>,
    links: HashMap<(AgentId, AgentId), f64>,
    /// Quality reported for pairs without an explicit link entry.
    default_link_quality: Option<f64>,
}

#[derive(Clone)]
pub struct InMemoryPeerRegistry {
    world: Arc<RwLock<World>>,
    roles: Arc<RwLock<BTreeMap<AgentId, SatelliteRole>>>,
}

impl Default for InMemoryPeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPeerRegistry {
    /// Empty registry with a full mesh of perfect links.
    pub fn new() -> Self {
        Self {
            world: Arc::new(RwLock::new(World {
                default_link_quality: Some(1.0),
                ..World::default()
            })),
            roles: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Another agent's view: same world, independent copy of the role table.
    pub fn view(&self) -> Self {
        Self {
            world: Arc::clone(&self.world),
            roles: Arc::new(RwLock::new(self.roles.read().clone())),
        }
    }

    pub fn register(&self, agent: AgentId, role: SatelliteRole) {
        self.world.write().peers.insert(
            agent.clone(),
            PeerRecord {
                alive: true,
                health: HealthSummary::nominal(),
            },
        );
        self.roles.write().insert(agent, role);
    }

    pub fn set_alive(&self, agent: &AgentId, alive: bool) {
        if let Some(peer) = self.world.write().peers.get_mut(agent) {
            peer.alive = alive;
        }
    }

    pub fn set_health(&self, agent: &AgentId, health: HealthSummary) {
        if let Some(peer) = self.world.write().peers.get_mut(agent) {
            peer.health = health;
        }
    }

    pub fn set_risk(&self, agent: &AgentId, risk_score: f64) {
        if let Some(peer) = self.world.write().peers.get_mut(agent) {
            peer.health.risk_score = risk_score;
        }
    }

    /// Set a symmetric link quality between two agents.
    pub fn set_link_quality(&self, a: &AgentId, b: &AgentId, quality: f64) {
        let mut world = self.world.write();
        world.links.insert((a.clone(), b.clone()), quality);
        world.links.insert((b.clone(), a.clone()), quality);
    }

    /// Quality for unlisted pairs; `None` means no link unless listed.
    pub fn set_default_link_quality(&self, quality: Option<f64>) {
        self.world.write().default_link_quality = quality;
    }

    /// Roles as committed in this view.
    pub fn roles(&self) -> BTreeMap<AgentId, SatelliteRole> {
        self.roles.read().clone()
    }
}

#[async_trait]
impl PeerRegistry for InMemoryPeerRegistry {
    async fn alive_peers(&self) -> Vec<AgentId> {
        self.world
            .read()
            .peers
            .iter()
            .filter(|(_, peer)| peer.alive)
            .map(|(id, _)| id.clone())
            .collect()
    }

    async fn health_summary(&self, agent: &AgentId) -> Option<HealthSummary> {
        self.world.read().peers.get(agent).map(|peer| peer.health)
    }

    async fn agent_role(&self, agent: &AgentId) -> Option<SatelliteRole> {
        self.roles.read().get(agent).copied()
    }

    async fn set_agent_role(&self, agent: &AgentId, role: SatelliteRole) {
        self.roles.write().insert(agent.clone(), role);
    }

    async fn link_quality(&self, from: &AgentId, to: &AgentId) -> Option<f64> {
        if from == to {
            return None;
        }
        let world = self.world.read();
        if !world.peers.contains_key(from) || !world.peers.contains_key(to) {
            return None;
        }
        world
            .links
            .get(&(from.clone(), to.clone()))
            .copied()
            .or(world.default_link_quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_alive_peers_are_sorted_and_filtered() {
        let registry = InMemoryPeerRegistry::new();
        registry.register(AgentId::from("SAT-003"), SatelliteRole::Standby);
        registry.register(AgentId::from("SAT-001"), SatelliteRole::Primary);
        registry.register(AgentId::from("SAT-002"), SatelliteRole::Backup);
        registry.set_alive(&AgentId::from("SAT-002"), false);

        let alive = registry.alive_peers().await;
        assert_eq!(alive, vec![AgentId::from("SAT-001"), AgentId::from("SAT-003")]);
    }

    #[tokio::test]
    async fn test_views_share_health_but_not_roles() {
        let world = InMemoryPeerRegistry::new();
        let a = AgentId::from("SAT-A");
        world.register(a.clone(), SatelliteRole::Backup);

        let view = world.view();
        world.set_risk(&a, 0.6);
        assert_eq!(view.health_summary(&a).await.unwrap().risk_score, 0.6);

        view.set_agent_role(&a, SatelliteRole::Primary).await;
        assert_eq!(view.agent_role(&a).await, Some(SatelliteRole::Primary));
        assert_eq!(world.agent_role(&a).await, Some(SatelliteRole::Backup));
    }

    #[tokio::test]
    async fn test_link_quality_defaults_and_overrides() {
        let registry = InMemoryPeerRegistry::new();
        let a = AgentId::from("SAT-A");
        let b = AgentId::from("SAT-B");
        let c = AgentId::from("SAT-C");
        for id in [&a, &b, &c] {
            registry.register(id.clone(), SatelliteRole::Standby);
        }

        registry.set_link_quality(&a, &b, 0.4);
        assert_eq!(registry.link_quality(&b, &a).await, Some(0.4));
        assert_eq!(registry.link_quality(&a, &c).await, Some(1.0));
        assert_eq!(registry.link_quality(&a, &a).await, None);

        registry.set_default_link_quality(None);
        assert_eq!(registry.link_quality(&a, &c).await, None);
    }
}
