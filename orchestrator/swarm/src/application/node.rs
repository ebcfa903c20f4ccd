// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordination Node
//!
//! Wires one agent's engine instance from a [`CoordinationConfig`] and runs
//! its background tasks until [`CoordinationNode::shutdown`].
//!
//! | Task | Work |
//! |------|------|
//! | router | dispatches inbound envelopes to election, consensus and propagation |
//! | election | timer loop of [`LeaderElection`] |
//! | reassigner | periodic [`RoleReassigner`] cycle |
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Composition root for a single agent

use crate::application::consensus::ConsensusEngine;
use crate::application::election::{LeaderElection, LeadershipView};
use crate::application::evaluator::{HealthGatedEvaluator, VoteEvaluator};
use crate::application::executor::ActionExecutor;
use crate::application::orchestrator::ResponseOrchestrator;
use crate::application::propagation::BusPropagator;
use crate::application::reassigner::RoleReassigner;
use crate::domain::arbiter::PolicyArbiter;
use crate::domain::safety::SafetySimulator;
use anyhow::Context;
use constellation_core::domain::agent::AgentId;
use constellation_core::domain::messages::{CoordMessage, Envelope, COORDINATION_TOPICS};
use constellation_core::domain::node_config::CoordinationConfig;
use constellation_core::domain::registry::PeerRegistry;
use constellation_core::domain::transport::MessageBus;
use constellation_core::infrastructure::event_bus::EventBus;
use constellation_core::infrastructure::metrics::CoordinationMetrics;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct CoordinationNode {
    self_id: AgentId,
    election: Arc<LeaderElection>,
    consensus: Arc<ConsensusEngine>,
    propagator: Arc<BusPropagator>,
    reassigner: Arc<RoleReassigner>,
    orchestrator: Arc<ResponseOrchestrator>,
    arbiter: Arc<PolicyArbiter>,
    metrics: Arc<CoordinationMetrics>,
    events: EventBus,
    shutdown_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CoordinationNode {
    /// Build every component for `config.spec.node.id` and start the
    /// background tasks.
    pub async fn start(
        config: &CoordinationConfig,
        bus: Arc<dyn MessageBus>,
        registry: Arc<dyn PeerRegistry>,
        executor: Arc<dyn ActionExecutor>,
        events: EventBus,
    ) -> anyhow::Result<Self> {
        let spec = &config.spec;
        let self_id = AgentId::new(spec.node.id.clone());
        let metrics = Arc::new(CoordinationMetrics::new());

        let inbox = bus
            .subscribe(COORDINATION_TOPICS)
            .await
            .with_context(|| format!("Failed to subscribe {} to coordination topics", self_id))?;

        let election = Arc::new(LeaderElection::new(
            self_id.clone(),
            spec.election.clone(),
            bus.clone(),
            registry.clone(),
            metrics.clone(),
            events.clone(),
        ));
        let leadership: Arc<dyn LeadershipView> = election.clone();

        let evaluator: Arc<dyn VoteEvaluator> = Arc::new(HealthGatedEvaluator::new(
            self_id.clone(),
            registry.clone(),
            spec.consensus.critical_risk_threshold,
        ));
        let consensus = Arc::new(
            ConsensusEngine::new(
                self_id.clone(),
                spec.consensus.clone(),
                leadership.clone(),
                bus.clone(),
                registry.clone(),
                executor.clone(),
                metrics.clone(),
            )
            .with_evaluator(evaluator)
            .with_timeout_fallback(spec.features.timeout_fallback)
            .with_event_bus(events.clone()),
        );

        let propagator = Arc::new(BusPropagator::new(
            self_id.clone(),
            bus.clone(),
            registry.clone(),
            consensus.clone(),
        ));

        let reassigner = Arc::new(
            RoleReassigner::new(
                self_id.clone(),
                spec.reassignment.clone(),
                leadership.clone(),
                registry.clone(),
                consensus.clone(),
                metrics.clone(),
            )
            .with_compliance_tracker(propagator.tracker()),
        );

        let arbiter = Arc::new(
            PolicyArbiter::new(spec.arbiter.weights, metrics.clone()).context("Invalid arbiter weights")?,
        );
        let safety = Arc::new(SafetySimulator::new(
            spec.safety.clone(),
            spec.features.swarm_enabled,
            metrics.clone(),
        ));

        let orchestrator = Arc::new(
            ResponseOrchestrator::new(
                self_id.clone(),
                spec.orchestrator.clone(),
                spec.features.clone(),
                executor,
                metrics.clone(),
            )
            .with_leadership(leadership)
            .with_consensus(consensus.clone())
            .with_registry(registry)
            .with_propagator(propagator.clone())
            .with_safety(safety)
            .with_arbiter(arbiter.clone())
            .with_event_bus(events.clone())
            .with_default_timeout(spec.consensus.default_timeout()),
        );

        let shutdown_token = CancellationToken::new();
        let node = Self {
            self_id: self_id.clone(),
            election: election.clone(),
            consensus: consensus.clone(),
            propagator: propagator.clone(),
            reassigner: reassigner.clone(),
            orchestrator,
            arbiter,
            metrics,
            events,
            shutdown_token: shutdown_token.clone(),
            tasks: Mutex::new(Vec::new()),
        };

        let router = Router {
            self_id: self_id.clone(),
            election: election.clone(),
            consensus,
            propagator,
        };
        let mut tasks = vec![tokio::spawn(router.run(inbox, shutdown_token.clone()))];
        tasks.push(election.start(shutdown_token.clone()));
        tasks.push(reassigner.start(shutdown_token));
        *node.tasks.lock() = tasks;

        info!(agent = %self_id, "Coordination node started");
        Ok(node)
    }

    pub fn id(&self) -> &AgentId {
        &self.self_id
    }

    pub fn is_leader(&self) -> bool {
        self.election.is_leader()
    }

    pub fn election(&self) -> &Arc<LeaderElection> {
        &self.election
    }

    pub fn consensus(&self) -> &Arc<ConsensusEngine> {
        &self.consensus
    }

    pub fn propagator(&self) -> &Arc<BusPropagator> {
        &self.propagator
    }

    pub fn reassigner(&self) -> &Arc<RoleReassigner> {
        &self.reassigner
    }

    pub fn orchestrator(&self) -> &Arc<ResponseOrchestrator> {
        &self.orchestrator
    }

    pub fn arbiter(&self) -> &Arc<PolicyArbiter> {
        &self.arbiter
    }

    pub fn metrics(&self) -> &Arc<CoordinationMetrics> {
        &self.metrics
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Cancel every background task and wait for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(agent = %self.self_id, error = %e, "Background task ended abnormally"),
                Err(_) => warn!(agent = %self.self_id, "Background task did not stop within grace period"),
            }
        }
        info!(agent = %self.self_id, "Coordination node stopped");
    }
}

struct Router {
    self_id: AgentId,
    election: Arc<LeaderElection>,
    consensus: Arc<ConsensusEngine>,
    propagator: Arc<BusPropagator>,
}

impl Router {
    async fn run(self, mut inbox: mpsc::Receiver<Envelope>, shutdown_token: CancellationToken) {
        loop {
            tokio::select! {
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.route(envelope).await,
                    None => {
                        warn!(agent = %self.self_id, "Coordination inbox closed");
                        break;
                    }
                },
                _ = shutdown_token.cancelled() => break,
            }
        }
        debug!(agent = %self.self_id, "Message router stopped");
    }

    async fn route(&self, envelope: Envelope) {
        if !envelope.is_for(&self.self_id) {
            return;
        }
        match envelope.message {
            CoordMessage::RequestVote(_) | CoordMessage::ElectionVote(_) | CoordMessage::Heartbeat(_) => {
                self.election.handle(&envelope).await;
            }
            CoordMessage::ProposalVote(vote) => self.consensus.handle_vote(vote),
            CoordMessage::ActionAck(ack) => self.propagator.handle_ack(ack),
            CoordMessage::ProposalRequest(request) => {
                let consensus = self.consensus.clone();
                let from = envelope.from;
                tokio::spawn(async move {
                    consensus.handle_proposal_request(&from, &request).await;
                });
            }
            CoordMessage::ActionApproved(approved) => {
                let consensus = self.consensus.clone();
                let from = envelope.from;
                tokio::spawn(async move {
                    consensus.handle_action_approved(&from, &approved).await;
                });
            }
            CoordMessage::ActionPropagate(propagate) => {
                let propagator = self.propagator.clone();
                let from = envelope.from;
                tokio::spawn(async move {
                    propagator.handle_propagate(&from, &propagate).await;
                });
            }
        }
    }
}
