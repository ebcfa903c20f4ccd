// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Shared fixture: a constellation of coordination nodes over one in-memory
// network. Each node gets its own registry view so role propagation can be
// checked per agent.

#![allow(dead_code)]

use constellation_core::domain::agent::{AgentId, SatelliteRole};
use constellation_core::domain::node_config::CoordinationConfig;
use constellation_core::infrastructure::event_bus::EventBus;
use constellation_core::infrastructure::message_bus::InMemoryNetwork;
use constellation_core::infrastructure::registry::InMemoryPeerRegistry;
use constellation_swarm::application::election::LeadershipView;
use constellation_swarm::application::executor::RecordingExecutor;
use constellation_swarm::application::node::CoordinationNode;
use std::sync::Arc;
use std::time::Duration;

pub struct Cluster {
    pub network: InMemoryNetwork,
    pub world: InMemoryPeerRegistry,
    pub ids: Vec<AgentId>,
    pub views: Vec<InMemoryPeerRegistry>,
    pub executors: Vec<Arc<RecordingExecutor>>,
    pub nodes: Vec<CoordinationNode>,
    pub events: EventBus,
}

pub fn agent(n: usize) -> AgentId {
    AgentId::new(format!("SAT-{:03}", n + 1))
}

/// SAT-001 is PRIMARY, SAT-002 BACKUP, everyone else STANDBY.
pub fn initial_role(index: usize) -> SatelliteRole {
    match index {
        0 => SatelliteRole::Primary,
        1 => SatelliteRole::Backup,
        _ => SatelliteRole::Standby,
    }
}

impl Cluster {
    pub async fn start(size: usize) -> Self {
        Self::start_with(size, |_| {}).await
    }

    pub async fn start_with(size: usize, tune: impl Fn(&mut CoordinationConfig)) -> Self {
        let network = InMemoryNetwork::new();
        let world = InMemoryPeerRegistry::new();
        let ids: Vec<AgentId> = (0..size).map(agent).collect();
        for (i, id) in ids.iter().enumerate() {
            world.register(id.clone(), initial_role(i));
        }

        let events = EventBus::with_default_capacity();
        let mut views = Vec::with_capacity(size);
        let mut executors = Vec::with_capacity(size);
        let mut nodes = Vec::with_capacity(size);
        for id in &ids {
            let mut config = CoordinationConfig::default();
            config.spec.node.id = id.to_string();
            // Reassignment cycles are driven by hand in tests.
            config.spec.reassignment.interval_secs = 3_600;
            tune(&mut config);

            let view = world.view();
            let executor = Arc::new(RecordingExecutor::new());
            let node = CoordinationNode::start(
                &config,
                Arc::new(network.attach(id.clone())),
                Arc::new(view.clone()),
                executor.clone(),
                events.clone(),
            )
            .await
            .expect("node should start");
            views.push(view);
            executors.push(executor);
            nodes.push(node);
        }

        Self {
            network,
            world,
            ids,
            views,
            executors,
            nodes,
            events,
        }
    }

    /// Index of the single leader among `among`, once exactly one exists and
    /// the rest of `among` follow it in its term.
    pub async fn wait_for_leader(&self, among: &[usize], within: Duration) -> Option<usize> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let leaders: Vec<usize> = among
                .iter()
                .copied()
                .filter(|i| self.nodes[*i].is_leader())
                .collect();
            if leaders.len() == 1 && self.followed_by_all(leaders[0], among) {
                return Some(leaders[0]);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn followed_by_all(&self, leader: usize, among: &[usize]) -> bool {
        let id = &self.ids[leader];
        let term = self.nodes[leader].election().current_term();
        among.iter().all(|i| {
            let election = self.nodes[*i].election();
            election.leader_id().as_ref() == Some(id) && election.current_term() == term
        })
    }

    pub async fn leader(&self) -> usize {
        let all: Vec<usize> = (0..self.nodes.len()).collect();
        self.wait_for_leader(&all, Duration::from_secs(10))
            .await
            .expect("a leader should be elected")
    }

    /// Mark `index` dead in the shared registry and cut its links.
    pub fn kill(&self, index: usize) {
        self.world.set_alive(&self.ids[index], false);
        self.network.isolate(&self.ids[index]);
    }

    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
    }
}

/// Poll `check` until it holds or `within` passes.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
