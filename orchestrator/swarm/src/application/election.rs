// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Leader Election Service
//!
//! Drives the [`ElectionStateMachine`] from the bus and a periodic tick, and
//! performs the side effects it requests (publishing, metrics, events).
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Owns one agent's election state; exposes it to the rest of
//!   the engine through [`LeadershipView`]

use crate::domain::election::{ElectionOutput, ElectionState, ElectionStateMachine, HeartbeatDisposition};
use chrono::Utc;
use constellation_core::domain::agent::AgentId;
use constellation_core::domain::events::CoordinationEvent;
use constellation_core::domain::messages::{CoordMessage, Envelope, Term};
use constellation_core::domain::node_config::ElectionConfig;
use constellation_core::domain::registry::PeerRegistry;
use constellation_core::domain::transport::{MessageBus, Qos};
use constellation_core::infrastructure::event_bus::EventBus;
use constellation_core::infrastructure::metrics::CoordinationMetrics;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const MIN_TICK: Duration = Duration::from_millis(10);

/// Read-only view of leadership used by consensus, reassignment and the
/// orchestrator.
pub trait LeadershipView: Send + Sync {
    fn is_leader(&self) -> bool;
    fn current_term(&self) -> Term;
    fn leader_id(&self) -> Option<AgentId>;
}

/// Fixed leadership, for single-node deployments and tests.
#[derive(Debug, Clone)]
pub struct StaticLeadership {
    leader: Option<AgentId>,
    self_id: AgentId,
    term: Term,
}

impl StaticLeadership {
    /// `self_id` is permanently the leader.
    pub fn leader(self_id: AgentId) -> Self {
        Self {
            leader: Some(self_id.clone()),
            self_id,
            term: Term(1),
        }
    }

    /// `self_id` follows `leader` (or nobody).
    pub fn follower(self_id: AgentId, leader: Option<AgentId>) -> Self {
        Self {
            leader,
            self_id,
            term: Term(1),
        }
    }
}

impl LeadershipView for StaticLeadership {
    fn is_leader(&self) -> bool {
        self.leader.as_ref() == Some(&self.self_id)
    }

    fn current_term(&self) -> Term {
        self.term
    }

    fn leader_id(&self) -> Option<AgentId> {
        self.leader.clone()
    }
}

pub struct LeaderElection {
    self_id: AgentId,
    machine: Mutex<ElectionStateMachine>,
    bus: Arc<dyn MessageBus>,
    registry: Arc<dyn PeerRegistry>,
    config: ElectionConfig,
    metrics: Arc<CoordinationMetrics>,
    events: EventBus,
}

impl LeaderElection {
    pub fn new(
        self_id: AgentId,
        config: ElectionConfig,
        bus: Arc<dyn MessageBus>,
        registry: Arc<dyn PeerRegistry>,
        metrics: Arc<CoordinationMetrics>,
        events: EventBus,
    ) -> Self {
        let initial_timeout = random_timeout(&config);
        let machine = ElectionStateMachine::new(
            self_id.clone(),
            Instant::now(),
            initial_timeout,
            config.lease(),
            config.heartbeat_interval(),
        );
        Self {
            self_id,
            machine: Mutex::new(machine),
            bus,
            registry,
            config,
            metrics,
            events,
        }
    }

    pub fn self_id(&self) -> &AgentId {
        &self.self_id
    }

    pub fn state(&self) -> ElectionState {
        self.machine.lock().state()
    }

    /// Advance timers: start or retry an election, or send a heartbeat.
    pub async fn tick(&self) {
        let alive = self.registry.alive_peers().await;
        let outputs = {
            let mut machine = self.machine.lock();
            machine.on_tick(Instant::now(), &alive, random_timeout(&self.config))
        };
        self.dispatch(outputs).await;
    }

    /// Handle an inbound election message. Other messages are ignored.
    pub async fn handle(&self, envelope: &Envelope) {
        let outputs = match &envelope.message {
            CoordMessage::RequestVote(request) => {
                trace!(candidate = %request.candidate_id, term = %request.term, "RequestVote received");
                let mut machine = self.machine.lock();
                if request.term < machine.term() {
                    self.metrics.election.stale_messages.increment();
                    debug!(candidate = %request.candidate_id, term = %request.term, "Ignoring stale vote request");
                    return;
                }
                machine.on_request_vote(request, Instant::now(), random_timeout(&self.config))
            }
            CoordMessage::ElectionVote(vote) => {
                let alive = self.registry.alive_peers().await;
                let mut machine = self.machine.lock();
                machine.on_vote(vote, Instant::now(), &alive)
            }
            CoordMessage::Heartbeat(heartbeat) => {
                let (disposition, outputs) = {
                    let mut machine = self.machine.lock();
                    machine.on_heartbeat(heartbeat, Instant::now(), random_timeout(&self.config))
                };
                match disposition {
                    HeartbeatDisposition::Accepted => {
                        self.metrics.election.heartbeats_received.increment();
                        trace!(leader = %heartbeat.leader_id, term = %heartbeat.term, "Heartbeat accepted");
                    }
                    HeartbeatDisposition::Stale => {
                        self.metrics.election.stale_messages.increment();
                        debug!(leader = %heartbeat.leader_id, term = %heartbeat.term, "Ignoring stale heartbeat");
                    }
                    HeartbeatDisposition::Ignored => {}
                }
                outputs
            }
            _ => return,
        };
        self.dispatch(outputs).await;
    }

    async fn dispatch(&self, outputs: Vec<ElectionOutput>) {
        for output in outputs {
            match output {
                ElectionOutput::Broadcast(message) => {
                    let qos = match &message {
                        CoordMessage::Heartbeat(_) => {
                            self.metrics.election.heartbeats_sent.increment();
                            Qos::AtMostOnce
                        }
                        CoordMessage::RequestVote(request) => {
                            self.metrics.election.elections_started.increment();
                            info!(agent = %self.self_id, term = %request.term, "Starting election");
                            Qos::AtLeastOnce
                        }
                        _ => Qos::AtLeastOnce,
                    };
                    let envelope = Envelope::broadcast(self.self_id.clone(), message);
                    if let Err(e) = self.bus.publish(envelope, qos).await {
                        warn!(agent = %self.self_id, error = %e, "Failed to broadcast election message");
                    }
                }
                ElectionOutput::Reply { to, message } => {
                    let envelope = Envelope::direct(self.self_id.clone(), to.clone(), message);
                    if let Err(e) = self.bus.publish(envelope, Qos::AtLeastOnce).await {
                        warn!(agent = %self.self_id, to = %to, error = %e, "Failed to send election reply");
                    }
                }
                ElectionOutput::VoteGranted { candidate, term } => {
                    self.metrics.election.votes_granted.increment();
                    debug!(agent = %self.self_id, candidate = %candidate, term = %term, "Vote granted");
                }
                ElectionOutput::BecameLeader { term, convergence } => {
                    self.metrics.election.elections_won.increment();
                    self.metrics.election.convergence_latency.record(convergence);
                    info!(
                        agent = %self.self_id,
                        term = %term,
                        convergence_ms = convergence.as_millis() as u64,
                        "Became leader"
                    );
                    self.events.publish(
                        &self.self_id,
                        CoordinationEvent::LeaderElected {
                            agent_id: self.self_id.clone(),
                            term,
                            elected_at: Utc::now(),
                        },
                    );
                }
                ElectionOutput::SteppedDown(term) => {
                    self.metrics.election.step_downs.increment();
                    info!(agent = %self.self_id, term = %term, "Stepped down as leader");
                    self.events.publish(
                        &self.self_id,
                        CoordinationEvent::LeaderSteppedDown {
                            agent_id: self.self_id.clone(),
                            term,
                            stepped_down_at: Utc::now(),
                        },
                    );
                }
            }
        }
        self.metrics.election.current_term.set(self.current_term().0 as f64);
    }

    /// Spawn the timer loop.
    pub fn start(self: Arc<Self>, shutdown_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown_token).await;
        })
    }

    async fn run(&self, shutdown_token: CancellationToken) {
        let period = (Duration::from_millis(self.config.election_timeout_min_ms) / 5).max(MIN_TICK);
        info!(agent = %self.self_id, tick_ms = period.as_millis() as u64, "Starting leader election loop");

        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => self.tick().await,
                _ = shutdown_token.cancelled() => {
                    info!(agent = %self.self_id, "Shutdown signal received, stopping leader election");
                    break;
                }
            }
        }
    }
}

impl LeadershipView for LeaderElection {
    fn is_leader(&self) -> bool {
        self.machine.lock().is_leader()
    }

    fn current_term(&self) -> Term {
        self.machine.lock().term()
    }

    fn leader_id(&self) -> Option<AgentId> {
        self.machine.lock().leader_id().cloned()
    }
}

fn random_timeout(config: &ElectionConfig) -> Duration {
    let lo = config.election_timeout_min_ms.min(config.election_timeout_max_ms);
    let hi = config.election_timeout_min_ms.max(config.election_timeout_max_ms);
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use constellation_core::domain::agent::SatelliteRole;
    use constellation_core::domain::messages::{Heartbeat, RequestVote, COORDINATION_TOPICS};
    use constellation_core::infrastructure::message_bus::InMemoryNetwork;
    use constellation_core::infrastructure::registry::InMemoryPeerRegistry;

    fn election(network: &InMemoryNetwork, registry: &InMemoryPeerRegistry, id: &str) -> LeaderElection {
        let agent = AgentId::from(id);
        registry.register(agent.clone(), SatelliteRole::Standby);
        LeaderElection::new(
            agent.clone(),
            ElectionConfig::default(),
            Arc::new(network.attach(agent)),
            Arc::new(registry.view()),
            Arc::new(CoordinationMetrics::new()),
            EventBus::with_default_capacity(),
        )
    }

    #[test]
    fn test_static_leadership() {
        let me = AgentId::from("SAT-001");
        assert!(StaticLeadership::leader(me.clone()).is_leader());
        let follower = StaticLeadership::follower(me, Some(AgentId::from("SAT-009")));
        assert!(!follower.is_leader());
        assert_eq!(follower.leader_id(), Some(AgentId::from("SAT-009")));
    }

    #[test]
    fn test_random_timeout_within_bounds() {
        let config = ElectionConfig::default();
        for _ in 0..100 {
            let t = random_timeout(&config);
            assert!(t >= Duration::from_millis(150) && t <= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_agent_elects_itself() {
        let network = InMemoryNetwork::new();
        let registry = InMemoryPeerRegistry::new();
        let node = election(&network, &registry, "SAT-001");
        let mut events = node.events.subscribe();

        tokio::time::advance(Duration::from_millis(400)).await;
        node.tick().await;

        assert!(node.is_leader());
        assert_eq!(node.current_term(), Term(1));
        let published = events.try_recv().unwrap();
        assert_eq!(published.event.kind(), "leader_elected");
        let snapshot = node.metrics.snapshot();
        assert_eq!(snapshot.election.elections_won, 1);
        assert_eq!(snapshot.election.convergence_latency.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_higher_term_heartbeat_demotes_leader() {
        let network = InMemoryNetwork::new();
        let registry = InMemoryPeerRegistry::new();
        let node = election(&network, &registry, "SAT-001");
        tokio::time::advance(Duration::from_millis(400)).await;
        node.tick().await;
        assert!(node.is_leader());

        let heartbeat = Envelope::broadcast(
            AgentId::from("SAT-002"),
            CoordMessage::Heartbeat(Heartbeat {
                term: Term(5),
                leader_id: AgentId::from("SAT-002"),
                timestamp: Utc::now(),
            }),
        );
        node.handle(&heartbeat).await;

        assert!(!node.is_leader());
        assert_eq!(node.current_term(), Term(5));
        assert_eq!(node.leader_id(), Some(AgentId::from("SAT-002")));
        assert_eq!(node.metrics.snapshot().election.step_downs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_reply_is_sent_to_candidate() {
        let network = InMemoryNetwork::new();
        let registry = InMemoryPeerRegistry::new();
        let node = election(&network, &registry, "SAT-001");
        let candidate = network.attach(AgentId::from("SAT-002"));
        let mut inbox = candidate.subscribe(COORDINATION_TOPICS).await.unwrap();

        let request = Envelope::broadcast(
            AgentId::from("SAT-002"),
            CoordMessage::RequestVote(RequestVote {
                term: Term(1),
                candidate_id: AgentId::from("SAT-002"),
                candidate_uptime: 10,
            }),
        );
        node.handle(&request).await;

        let reply = inbox.recv().await.unwrap();
        assert_eq!(reply.to, Some(AgentId::from("SAT-002")));
        assert!(matches!(reply.message, CoordMessage::ElectionVote(ref v) if v.voter_id.as_str() == "SAT-001"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_heartbeat_is_counted() {
        let network = InMemoryNetwork::new();
        let registry = InMemoryPeerRegistry::new();
        let node = election(&network, &registry, "SAT-001");
        let fresh = Envelope::broadcast(
            AgentId::from("SAT-002"),
            CoordMessage::Heartbeat(Heartbeat {
                term: Term(3),
                leader_id: AgentId::from("SAT-002"),
                timestamp: Utc::now(),
            }),
        );
        node.handle(&fresh).await;
        let stale = Envelope::broadcast(
            AgentId::from("SAT-003"),
            CoordMessage::Heartbeat(Heartbeat {
                term: Term(2),
                leader_id: AgentId::from("SAT-003"),
                timestamp: Utc::now(),
            }),
        );
        node.handle(&stale).await;

        assert_eq!(node.leader_id(), Some(AgentId::from("SAT-002")));
        assert_eq!(node.metrics.snapshot().election.stale_messages, 1);
    }
}
