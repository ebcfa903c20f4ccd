// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # In-Memory Message Bus
//!
//! A process-local stand-in for the inter-satellite link. One
//! [`InMemoryNetwork`] connects many agents; each agent attaches an
//! [`InMemoryMessageBus`] handle. The network can partition links, isolate
//! agents and drop best-effort traffic so the coordination engine can be
//! exercised under failure.
//!
//! Delivery semantics:
//! - `AtLeastOnce` envelopes are always delivered across healthy links.
//! - `AtMostOnce` envelopes are subject to the configured loss probability.
//! - Subscriber channels are bounded; a full channel drops the envelope.

use crate::domain::agent::AgentId;
use crate::domain::messages::Envelope;
use crate::domain::transport::{MessageBus, Qos, TransportError};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct Subscription {
    topics: HashSet<String>,
    sender: mpsc::Sender<Envelope>,
}

#[derive(Default)]
struct Topology {
    /// Unordered pairs whose link is cut.
    severed: HashSet<(AgentId, AgentId)>,
    isolated: HashSet<AgentId>,
}

impl Topology {
    fn key(a: &AgentId, b: &AgentId) -> (AgentId, AgentId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    fn connected(&self, a: &AgentId, b: &AgentId) -> bool {
        !self.isolated.contains(a)
            && !self.isolated.contains(b)
            && !self.severed.contains(&Self::key(a, b))
    }
}

struct NetworkInner {
    subscriptions: RwLock<HashMap<AgentId, Vec<Subscription>>>,
    topology: RwLock<Topology>,
    loss_probability: RwLock<f64>,
    channel_capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Shared in-memory fabric connecting every attached agent.
#[derive(Clone)]
pub struct InMemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for InMemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a network whose per-subscription channels hold `capacity` envelopes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                subscriptions: RwLock::new(HashMap::new()),
                topology: RwLock::new(Topology::default()),
                loss_probability: RwLock::new(0.0),
                channel_capacity: capacity.max(1),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Attach `agent` and return its bus handle.
    pub fn attach(&self, agent: AgentId) -> InMemoryMessageBus {
        self.inner.subscriptions.write().entry(agent.clone()).or_default();
        InMemoryMessageBus {
            agent,
            network: self.clone(),
        }
    }

    /// Remove every subscription of `agent`; its receivers close.
    pub fn detach(&self, agent: &AgentId) {
        self.inner.subscriptions.write().remove(agent);
    }

    /// Cut the link between two agents in both directions.
    pub fn partition(&self, a: &AgentId, b: &AgentId) {
        self.inner.topology.write().severed.insert(Topology::key(a, b));
    }

    pub fn heal(&self, a: &AgentId, b: &AgentId) {
        self.inner.topology.write().severed.remove(&Topology::key(a, b));
    }

    /// Cut every link of `agent`.
    pub fn isolate(&self, agent: &AgentId) {
        self.inner.topology.write().isolated.insert(agent.clone());
    }

    pub fn rejoin(&self, agent: &AgentId) {
        self.inner.topology.write().isolated.remove(agent);
    }

    pub fn heal_all(&self) {
        let mut topology = self.inner.topology.write();
        topology.severed.clear();
        topology.isolated.clear();
    }

    /// Probability in `[0, 1]` that a best-effort envelope is lost per recipient.
    pub fn set_loss_probability(&self, probability: f64) {
        *self.inner.loss_probability.write() = probability.clamp(0.0, 1.0);
    }

    pub fn delivered_count(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn subscribe(&self, agent: &AgentId, topics: &[&str]) -> Result<mpsc::Receiver<Envelope>, TransportError> {
        let mut subscriptions = self.inner.subscriptions.write();
        let entry = subscriptions
            .get_mut(agent)
            .ok_or_else(|| TransportError::Detached(agent.clone()))?;
        let (sender, receiver) = mpsc::channel(self.inner.channel_capacity);
        entry.push(Subscription {
            topics: topics.iter().map(|t| t.to_string()).collect(),
            sender,
        });
        debug!(agent = %agent, topics = ?topics, "Subscribed to coordination topics");
        Ok(receiver)
    }

    fn deliver(&self, envelope: Envelope, qos: Qos) -> Result<(), TransportError> {
        let loss = *self.inner.loss_probability.read();
        let topology = self.inner.topology.read();
        let mut subscriptions = self.inner.subscriptions.write();

        if !subscriptions.contains_key(&envelope.from) {
            return Err(TransportError::Detached(envelope.from.clone()));
        }

        let mut rng = rand::rng();
        for (agent, subs) in subscriptions.iter_mut() {
            if !envelope.is_for(agent) {
                continue;
            }
            if !topology.connected(&envelope.from, agent) {
                trace!(from = %envelope.from, to = %agent, topic = %envelope.topic, "Link down, envelope lost");
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if qos == Qos::AtMostOnce && loss > 0.0 && rng.random::<f64>() < loss {
                trace!(from = %envelope.from, to = %agent, topic = %envelope.topic, "Best-effort envelope lost");
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            subs.retain(|sub| !sub.sender.is_closed());
            for sub in subs.iter().filter(|s| s.topics.contains(&envelope.topic)) {
                match sub.sender.try_send(envelope.clone()) {
                    Ok(()) => {
                        self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(to = %agent, topic = %envelope.topic, "Subscriber channel full, dropping envelope");
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }
        Ok(())
    }
}

/// One agent's handle on an [`InMemoryNetwork`].
#[derive(Clone)]
pub struct InMemoryMessageBus {
    agent: AgentId,
    network: InMemoryNetwork,
}

impl InMemoryMessageBus {
    pub fn agent_id(&self) -> &AgentId {
        &self.agent
    }

    pub fn network(&self) -> &InMemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, mut envelope: Envelope, qos: Qos) -> Result<(), TransportError> {
        envelope.from = self.agent.clone();
        trace!(from = %self.agent, topic = %envelope.topic, "Publishing envelope");
        self.network.deliver(envelope, qos)
    }

    async fn subscribe(&self, topics: &[&str]) -> Result<mpsc::Receiver<Envelope>, TransportError> {
        self.network.subscribe(&self.agent, topics)
    }
}
