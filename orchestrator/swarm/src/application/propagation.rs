// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Post-commit propagation and compliance measurement.
//!
//! After a proposal commits, the leader broadcasts `action_propagate` and
//! counts `action_ack`s until every alive peer has answered or the deadline
//! passes. Peers apply through the consensus dedup set, so an action already
//! committed via `action_approved` is acknowledged without running twice.
//! Per-agent acknowledgement rates feed the role reassigner.

use crate::application::consensus::ConsensusEngine;
use crate::domain::error::CoordinationError;
use async_trait::async_trait;
use constellation_core::domain::agent::AgentId;
use constellation_core::domain::messages::{ActionAck, ActionPropagate, CoordMessage, Envelope, ProposalId};
use constellation_core::domain::registry::PeerRegistry;
use constellation_core::domain::transport::{MessageBus, Qos};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub proposal_id: ProposalId,
    /// Alive agents expected to apply, self included.
    pub expected: usize,
    pub acknowledged: usize,
    pub compliance: f64,
    pub missing: Vec<AgentId>,
}

#[async_trait]
pub trait Propagator: Send + Sync {
    async fn propagate(
        &self,
        proposal_id: ProposalId,
        action: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> Result<PropagationReport, CoordinationError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct AckCounts {
    expected: u32,
    acknowledged: u32,
}

/// Per-agent propagation acknowledgement rates observed by this leader.
#[derive(Debug, Default)]
pub struct ComplianceTracker {
    counts: Mutex<HashMap<AgentId, AckCounts>>,
}

impl ComplianceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, agent: &AgentId, acknowledged: bool) {
        let mut counts = self.counts.lock();
        let entry = counts.entry(agent.clone()).or_default();
        entry.expected += 1;
        if acknowledged {
            entry.acknowledged += 1;
        }
    }

    /// `(rate, observed propagations)` for `agent`.
    pub fn compliance(&self, agent: &AgentId) -> Option<(f64, u32)> {
        self.counts.lock().get(agent).map(|c| {
            let rate = if c.expected == 0 {
                1.0
            } else {
                f64::from(c.acknowledged) / f64::from(c.expected)
            };
            (rate, c.expected)
        })
    }

    pub fn reset(&self, agent: &AgentId) {
        self.counts.lock().remove(agent);
    }
}

pub struct BusPropagator {
    self_id: AgentId,
    bus: Arc<dyn MessageBus>,
    registry: Arc<dyn PeerRegistry>,
    consensus: Arc<ConsensusEngine>,
    tracker: Arc<ComplianceTracker>,
    pending: Mutex<HashMap<ProposalId, mpsc::Sender<ActionAck>>>,
}

impl BusPropagator {
    pub fn new(
        self_id: AgentId,
        bus: Arc<dyn MessageBus>,
        registry: Arc<dyn PeerRegistry>,
        consensus: Arc<ConsensusEngine>,
    ) -> Self {
        Self {
            self_id,
            bus,
            registry,
            consensus,
            tracker: Arc::new(ComplianceTracker::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> Arc<ComplianceTracker> {
        Arc::clone(&self.tracker)
    }

    /// Propagations still collecting acknowledgements.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Apply a propagated action and acknowledge it to the sender. Only the
    /// current leader's propagations are applied or acknowledged.
    pub async fn handle_propagate(&self, from: &AgentId, propagate: &ActionPropagate) {
        if from == &self.self_id || !self.consensus.accepts_commit_from(from, propagate.term) {
            return;
        }
        let applied = match self
            .consensus
            .apply_once(propagate.proposal_id, &propagate.action, &propagate.params)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(proposal_id = %propagate.proposal_id, error = %e, "Failed to apply propagated action");
                false
            }
        };
        let ack = ActionAck {
            proposal_id: propagate.proposal_id,
            agent_id: self.self_id.clone(),
            applied,
        };
        let envelope = Envelope::direct(self.self_id.clone(), from.clone(), CoordMessage::ActionAck(ack));
        if let Err(e) = self.bus.publish(envelope, Qos::AtLeastOnce).await {
            warn!(proposal_id = %propagate.proposal_id, error = %e, "Failed to acknowledge propagation");
        }
    }

    pub fn handle_ack(&self, ack: ActionAck) {
        let slot = self.pending.lock().get(&ack.proposal_id).cloned();
        match slot {
            Some(sender) => {
                let _ = sender.try_send(ack);
            }
            None => debug!(proposal_id = %ack.proposal_id, agent = %ack.agent_id, "Late acknowledgement ignored"),
        }
    }
}

#[async_trait]
impl Propagator for BusPropagator {
    async fn propagate(
        &self,
        proposal_id: ProposalId,
        action: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> Result<PropagationReport, CoordinationError> {
        let deadline = Instant::now() + timeout;
        let targets: HashSet<AgentId> = self
            .registry
            .alive_peers()
            .await
            .into_iter()
            .filter(|a| a != &self.self_id)
            .collect();

        let (ack_tx, mut ack_rx) = mpsc::channel(targets.len().max(1) * 2);
        let slot = AckSlot::claim(&self.pending, proposal_id, ack_tx)?;

        let message = CoordMessage::ActionPropagate(ActionPropagate {
            proposal_id,
            action: action.to_string(),
            params: params.clone(),
            term: self.consensus.current_term(),
        });
        self.bus
            .publish(Envelope::broadcast(self.self_id.clone(), message), Qos::AtLeastOnce)
            .await?;

        let self_applied = self.consensus.apply_once(proposal_id, action, params).await.is_ok();

        let mut acknowledged: HashSet<AgentId> = HashSet::new();
        while acknowledged.len() < targets.len() {
            match tokio::time::timeout_at(deadline, ack_rx.recv()).await {
                Ok(Some(ack)) => {
                    if ack.applied && targets.contains(&ack.agent_id) {
                        acknowledged.insert(ack.agent_id);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        drop(slot);

        let mut missing: Vec<AgentId> = Vec::new();
        for target in &targets {
            let acked = acknowledged.contains(target);
            self.tracker.record(target, acked);
            if !acked {
                missing.push(target.clone());
            }
        }
        missing.sort();

        let expected = targets.len() + 1;
        let count = acknowledged.len() + usize::from(self_applied);
        let compliance = count as f64 / expected as f64;
        if missing.is_empty() {
            info!(proposal_id = %proposal_id, action, expected, "Propagation fully acknowledged");
        } else {
            warn!(
                proposal_id = %proposal_id,
                action,
                expected,
                acknowledged = count,
                missing = ?missing,
                "Propagation incomplete"
            );
        }

        Ok(PropagationReport {
            proposal_id,
            expected,
            acknowledged: count,
            compliance,
            missing,
        })
    }
}

/// Ack routing entry for one in-flight propagation, released on drop so a
/// cancelled or failed propagation never leaves it behind.
struct AckSlot<'a> {
    pending: &'a Mutex<HashMap<ProposalId, mpsc::Sender<ActionAck>>>,
    proposal_id: ProposalId,
}

impl<'a> AckSlot<'a> {
    fn claim(
        pending: &'a Mutex<HashMap<ProposalId, mpsc::Sender<ActionAck>>>,
        proposal_id: ProposalId,
        sender: mpsc::Sender<ActionAck>,
    ) -> Result<Self, CoordinationError> {
        match pending.lock().entry(proposal_id) {
            Entry::Occupied(_) => {
                warn!(proposal_id = %proposal_id, "Propagation already in flight for proposal");
                Err(CoordinationError::ProposalIdCollision(proposal_id))
            }
            Entry::Vacant(slot) => {
                slot.insert(sender);
                Ok(Self { pending, proposal_id })
            }
        }
    }
}

impl Drop for AckSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.proposal_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::election::{LeadershipView, StaticLeadership};
    use crate::application::executor::RecordingExecutor;
    use constellation_core::domain::agent::SatelliteRole;
    use constellation_core::domain::messages::{Term, COORDINATION_TOPICS};
    use constellation_core::domain::node_config::ConsensusConfig;
    use constellation_core::infrastructure::message_bus::InMemoryNetwork;
    use constellation_core::infrastructure::metrics::CoordinationMetrics;
    use constellation_core::infrastructure::registry::InMemoryPeerRegistry;
    use serde_json::json;

    struct Fixture {
        network: InMemoryNetwork,
        executor: Arc<RecordingExecutor>,
        metrics: Arc<CoordinationMetrics>,
        propagator: BusPropagator,
    }

    /// `SAT-000` plus three silent peers. `leader` decides whether `SAT-000`
    /// leads or follows `SAT-001`.
    fn fixture(leader: bool) -> Fixture {
        let network = InMemoryNetwork::new();
        let registry = InMemoryPeerRegistry::new();
        for i in 0..4 {
            registry.register(AgentId::new(format!("SAT-{i:03}")), SatelliteRole::Standby);
        }
        let me = AgentId::from("SAT-000");
        let leadership: Arc<dyn LeadershipView> = if leader {
            Arc::new(StaticLeadership::leader(me.clone()))
        } else {
            Arc::new(StaticLeadership::follower(me.clone(), Some(AgentId::from("SAT-001"))))
        };
        let bus: Arc<dyn MessageBus> = Arc::new(network.attach(me.clone()));
        let registry: Arc<dyn PeerRegistry> = Arc::new(registry);
        let executor = Arc::new(RecordingExecutor::new());
        let metrics = Arc::new(CoordinationMetrics::new());
        let consensus = Arc::new(ConsensusEngine::new(
            me.clone(),
            ConsensusConfig::default(),
            leadership,
            bus.clone(),
            registry.clone(),
            executor.clone(),
            metrics.clone(),
        ));
        Fixture {
            network,
            executor,
            metrics,
            propagator: BusPropagator::new(me, bus, registry, consensus),
        }
    }

    fn propagate_message(term: Term) -> ActionPropagate {
        ActionPropagate {
            proposal_id: ProposalId::new(),
            action: "load_shed".to_string(),
            params: json!({ "shed_percent": 20 }),
            term,
        }
    }

    #[test]
    fn test_compliance_tracker_rates() {
        let tracker = ComplianceTracker::new();
        let agent = AgentId::from("SAT-003");
        assert_eq!(tracker.compliance(&agent), None);
        for acked in [true, true, false, true] {
            tracker.record(&agent, acked);
        }
        assert_eq!(tracker.compliance(&agent), Some((0.75, 4)));
        tracker.reset(&agent);
        assert_eq!(tracker.compliance(&agent), None);
    }

    #[tokio::test]
    async fn test_propagation_from_leader_is_applied_and_acknowledged() {
        let f = fixture(false);
        let leader = f.network.attach(AgentId::from("SAT-001"));
        let mut inbox = leader.subscribe(COORDINATION_TOPICS).await.unwrap();

        let propagate = propagate_message(Term(1));
        f.propagator.handle_propagate(&AgentId::from("SAT-001"), &propagate).await;

        assert_eq!(f.executor.count("load_shed"), 1);
        let envelope = inbox.try_recv().unwrap();
        assert!(matches!(
            envelope.message,
            CoordMessage::ActionAck(ack) if ack.applied && ack.proposal_id == propagate.proposal_id
        ));
    }

    #[tokio::test]
    async fn test_propagation_from_non_leader_is_neither_applied_nor_acknowledged() {
        let f = fixture(false);
        let rogue = f.network.attach(AgentId::from("SAT-002"));
        let mut inbox = rogue.subscribe(COORDINATION_TOPICS).await.unwrap();

        f.propagator
            .handle_propagate(&AgentId::from("SAT-002"), &propagate_message(Term(1)))
            .await;
        // The known leader, but from an earlier term.
        f.propagator
            .handle_propagate(&AgentId::from("SAT-001"), &propagate_message(Term(0)))
            .await;

        assert_eq!(f.executor.count("load_shed"), 0);
        assert!(inbox.try_recv().is_err());
        assert_eq!(f.metrics.snapshot().consensus.unauthorized_commits, 2);
    }

    #[tokio::test]
    async fn test_concurrent_propagation_of_same_proposal_collides() {
        let f = fixture(true);
        let id = ProposalId::new();
        let (tx, _rx) = mpsc::channel(1);
        f.propagator.pending.lock().insert(id, tx);

        let err = f
            .propagator
            .propagate(id, "load_shed", &json!({}), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, CoordinationError::ProposalIdCollision(id));
        assert_eq!(f.propagator.in_flight(), 1);
        assert_eq!(f.executor.count("load_shed"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_propagation_releases_ack_slot() {
        let f = fixture(true);
        let id = ProposalId::new();
        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            f.propagator.propagate(id, "load_shed", &json!({}), Duration::from_secs(5)),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(f.propagator.in_flight(), 0);

        // The id is free again once the earlier attempt is gone.
        let report = f
            .propagator
            .propagate(id, "load_shed", &json!({}), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(report.expected, 4);
        assert_eq!(report.missing.len(), 3);
        assert_eq!(f.propagator.in_flight(), 0);
    }
}
