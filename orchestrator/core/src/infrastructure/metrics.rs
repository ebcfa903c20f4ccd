// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Metrics
//!
//! Per-component counters, gauges and latency windows. Every update is kept
//! in an in-process atomic (readable through [`CoordinationMetrics::snapshot`])
//! and mirrored to the `metrics` facade so an installed exporter
//! (Prometheus in the CLI) sees the same values.
//!
//! | Component | Facade prefix |
//! |-----------|---------------|
//! | Leader election | `constellation_election_` |
//! | Consensus | `constellation_consensus_` |
//! | Policy arbitration | `constellation_arbiter_` |
//! | Safety simulation | `constellation_safety_` |
//! | Role reassignment | `constellation_reassignment_` |
//! | Response orchestration | `constellation_orchestrator_` |
//!
//! Values survive until [`CoordinationMetrics::reset`] is called.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

const LATENCY_WINDOW: usize = 512;

/// Monotonic counter mirrored to the metrics facade.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
        metrics::counter!(self.name).increment(n);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Last-value gauge stored as `f64` bits.
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    bits: AtomicU64,
}

impl Gauge {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            bits: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        metrics::gauge!(self.name).set(value);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn reset(&self) {
        self.bits.store(0f64.to_bits(), Ordering::Relaxed);
    }
}

/// Bounded window of recent latency samples in milliseconds.
#[derive(Debug)]
pub struct LatencyWindow {
    name: &'static str,
    samples: Mutex<VecDeque<f64>>,
    total: AtomicU64,
}

impl LatencyWindow {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            samples: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            total: AtomicU64::new(0),
        }
    }

    pub fn record_ms(&self, millis: f64) {
        {
            let mut samples = self.samples.lock();
            if samples.len() == LATENCY_WINDOW {
                samples.pop_front();
            }
            samples.push_back(millis);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        metrics::histogram!(self.name).record(millis);
    }

    pub fn record(&self, elapsed: std::time::Duration) {
        self.record_ms(elapsed.as_secs_f64() * 1000.0);
    }

    /// Nearest-rank percentile over the retained window; 0 when empty.
    pub fn percentile(&self, pct: f64) -> f64 {
        let mut sorted: Vec<f64> = self.samples.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }

    pub fn last(&self) -> Option<f64> {
        self.samples.lock().back().copied()
    }

    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.count(),
            last_ms: self.last(),
            p95_ms: self.percentile(95.0),
        }
    }

    fn reset(&self) {
        self.samples.lock().clear();
        self.total.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub last_ms: Option<f64>,
    pub p95_ms: f64,
}

#[derive(Debug)]
pub struct ElectionMetrics {
    pub elections_started: Counter,
    pub elections_won: Counter,
    pub step_downs: Counter,
    pub votes_granted: Counter,
    pub heartbeats_sent: Counter,
    pub heartbeats_received: Counter,
    pub stale_messages: Counter,
    pub current_term: Gauge,
    /// From the start of a candidacy to the win.
    pub convergence_latency: LatencyWindow,
}

impl ElectionMetrics {
    fn new() -> Self {
        Self {
            elections_started: Counter::new("constellation_election_started_total"),
            elections_won: Counter::new("constellation_election_won_total"),
            step_downs: Counter::new("constellation_election_step_downs_total"),
            votes_granted: Counter::new("constellation_election_votes_granted_total"),
            heartbeats_sent: Counter::new("constellation_election_heartbeats_sent_total"),
            heartbeats_received: Counter::new("constellation_election_heartbeats_received_total"),
            stale_messages: Counter::new("constellation_election_stale_messages_total"),
            current_term: Gauge::new("constellation_election_current_term"),
            convergence_latency: LatencyWindow::new("constellation_election_convergence_latency_ms"),
        }
    }
}

#[derive(Debug)]
pub struct ConsensusMetrics {
    pub proposals: Counter,
    pub approved: Counter,
    pub fallback_approved: Counter,
    pub denied: Counter,
    pub timed_out: Counter,
    pub not_leader: Counter,
    pub quorum_unavailable: Counter,
    pub late_votes: Counter,
    pub equivocations: Counter,
    pub duplicate_commits: Counter,
    pub commits: Counter,
    /// Commit messages dropped because the sender was not the known leader
    /// or the term did not match.
    pub unauthorized_commits: Counter,
    pub decision_latency: LatencyWindow,
}

impl ConsensusMetrics {
    fn new() -> Self {
        Self {
            proposals: Counter::new("constellation_consensus_proposals_total"),
            approved: Counter::new("constellation_consensus_approved_total"),
            fallback_approved: Counter::new("constellation_consensus_fallback_approved_total"),
            denied: Counter::new("constellation_consensus_denied_total"),
            timed_out: Counter::new("constellation_consensus_timed_out_total"),
            not_leader: Counter::new("constellation_consensus_not_leader_total"),
            quorum_unavailable: Counter::new("constellation_consensus_quorum_unavailable_total"),
            late_votes: Counter::new("constellation_consensus_late_votes_total"),
            equivocations: Counter::new("constellation_consensus_equivocations_total"),
            duplicate_commits: Counter::new("constellation_consensus_duplicate_commits_total"),
            commits: Counter::new("constellation_consensus_commits_total"),
            unauthorized_commits: Counter::new("constellation_consensus_unauthorized_commits_total"),
            decision_latency: LatencyWindow::new("constellation_consensus_decision_latency_ms"),
        }
    }
}

#[derive(Debug)]
pub struct ArbitrationMetrics {
    pub resolutions: Counter,
    pub safety_overrides: Counter,
    pub local_wins: Counter,
    pub global_wins: Counter,
    pub compliance_rejections: Counter,
    pub weight_updates: Counter,
    pub conflict_score: Gauge,
}

impl ArbitrationMetrics {
    fn new() -> Self {
        Self {
            resolutions: Counter::new("constellation_arbiter_resolutions_total"),
            safety_overrides: Counter::new("constellation_arbiter_safety_overrides_total"),
            local_wins: Counter::new("constellation_arbiter_local_wins_total"),
            global_wins: Counter::new("constellation_arbiter_global_wins_total"),
            compliance_rejections: Counter::new("constellation_arbiter_compliance_rejections_total"),
            weight_updates: Counter::new("constellation_arbiter_weight_updates_total"),
            conflict_score: Gauge::new("constellation_arbiter_conflict_score"),
        }
    }
}

#[derive(Debug)]
pub struct SafetyMetrics {
    pub simulations: Counter,
    pub blocked: Counter,
    pub last_total_risk: Gauge,
    pub latency: LatencyWindow,
}

impl SafetyMetrics {
    fn new() -> Self {
        Self {
            simulations: Counter::new("constellation_safety_simulations_total"),
            blocked: Counter::new("constellation_safety_blocked_total"),
            last_total_risk: Gauge::new("constellation_safety_last_total_risk"),
            latency: LatencyWindow::new("constellation_safety_latency_ms"),
        }
    }
}

#[derive(Debug)]
pub struct ReassignmentMetrics {
    pub cycles: Counter,
    pub proposals: Counter,
    pub approved: Counter,
    pub failed: Counter,
    pub debounced: Counter,
    pub failover_latency: LatencyWindow,
}

impl ReassignmentMetrics {
    fn new() -> Self {
        Self {
            cycles: Counter::new("constellation_reassignment_cycles_total"),
            proposals: Counter::new("constellation_reassignment_proposals_total"),
            approved: Counter::new("constellation_reassignment_approved_total"),
            failed: Counter::new("constellation_reassignment_failed_total"),
            debounced: Counter::new("constellation_reassignment_debounced_total"),
            failover_latency: LatencyWindow::new("constellation_reassignment_failover_latency_ms"),
        }
    }
}

#[derive(Debug)]
pub struct OrchestrationMetrics {
    pub local: Counter,
    pub swarm: Counter,
    pub constellation: Counter,
    pub succeeded: Counter,
    pub failed: Counter,
    pub forced_local: Counter,
    pub last_compliance: Gauge,
}

impl OrchestrationMetrics {
    fn new() -> Self {
        Self {
            local: Counter::new("constellation_orchestrator_local_total"),
            swarm: Counter::new("constellation_orchestrator_swarm_total"),
            constellation: Counter::new("constellation_orchestrator_constellation_total"),
            succeeded: Counter::new("constellation_orchestrator_succeeded_total"),
            failed: Counter::new("constellation_orchestrator_failed_total"),
            forced_local: Counter::new("constellation_orchestrator_forced_local_total"),
            last_compliance: Gauge::new("constellation_orchestrator_last_compliance"),
        }
    }
}

/// Metrics for one coordination engine instance.
#[derive(Debug)]
pub struct CoordinationMetrics {
    pub election: ElectionMetrics,
    pub consensus: ConsensusMetrics,
    pub arbitration: ArbitrationMetrics,
    pub safety: SafetyMetrics,
    pub reassignment: ReassignmentMetrics,
    pub orchestration: OrchestrationMetrics,
}

impl Default for CoordinationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinationMetrics {
    pub fn new() -> Self {
        Self {
            election: ElectionMetrics::new(),
            consensus: ConsensusMetrics::new(),
            arbitration: ArbitrationMetrics::new(),
            safety: SafetyMetrics::new(),
            reassignment: ReassignmentMetrics::new(),
            orchestration: OrchestrationMetrics::new(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let e = &self.election;
        let c = &self.consensus;
        let a = &self.arbitration;
        let s = &self.safety;
        let r = &self.reassignment;
        let o = &self.orchestration;
        MetricsSnapshot {
            election: ElectionSnapshot {
                elections_started: e.elections_started.get(),
                elections_won: e.elections_won.get(),
                step_downs: e.step_downs.get(),
                votes_granted: e.votes_granted.get(),
                heartbeats_sent: e.heartbeats_sent.get(),
                heartbeats_received: e.heartbeats_received.get(),
                stale_messages: e.stale_messages.get(),
                current_term: e.current_term.get() as u64,
                convergence_latency: e.convergence_latency.summary(),
            },
            consensus: ConsensusSnapshot {
                proposals: c.proposals.get(),
                approved: c.approved.get(),
                fallback_approved: c.fallback_approved.get(),
                denied: c.denied.get(),
                timed_out: c.timed_out.get(),
                not_leader: c.not_leader.get(),
                quorum_unavailable: c.quorum_unavailable.get(),
                late_votes: c.late_votes.get(),
                equivocations: c.equivocations.get(),
                duplicate_commits: c.duplicate_commits.get(),
                commits: c.commits.get(),
                unauthorized_commits: c.unauthorized_commits.get(),
                decision_latency: c.decision_latency.summary(),
            },
            arbitration: ArbitrationSnapshot {
                resolutions: a.resolutions.get(),
                safety_overrides: a.safety_overrides.get(),
                local_wins: a.local_wins.get(),
                global_wins: a.global_wins.get(),
                compliance_rejections: a.compliance_rejections.get(),
                weight_updates: a.weight_updates.get(),
                conflict_score: a.conflict_score.get(),
            },
            safety: SafetySnapshot {
                simulations: s.simulations.get(),
                blocked: s.blocked.get(),
                last_total_risk: s.last_total_risk.get(),
                latency: s.latency.summary(),
            },
            reassignment: ReassignmentSnapshot {
                cycles: r.cycles.get(),
                proposals: r.proposals.get(),
                approved: r.approved.get(),
                failed: r.failed.get(),
                debounced: r.debounced.get(),
                failover_latency: r.failover_latency.summary(),
            },
            orchestration: OrchestrationSnapshot {
                local: o.local.get(),
                swarm: o.swarm.get(),
                constellation: o.constellation.get(),
                succeeded: o.succeeded.get(),
                failed: o.failed.get(),
                forced_local: o.forced_local.get(),
                last_compliance: o.last_compliance.get(),
            },
        }
    }

    /// Zero every in-process value. The facade exporter keeps its own totals.
    pub fn reset(&self) {
        let e = &self.election;
        for counter in [
            &e.elections_started,
            &e.elections_won,
            &e.step_downs,
            &e.votes_granted,
            &e.heartbeats_sent,
            &e.heartbeats_received,
            &e.stale_messages,
        ] {
            counter.reset();
        }
        e.current_term.reset();
        e.convergence_latency.reset();

        let c = &self.consensus;
        for counter in [
            &c.proposals,
            &c.approved,
            &c.fallback_approved,
            &c.denied,
            &c.timed_out,
            &c.not_leader,
            &c.quorum_unavailable,
            &c.late_votes,
            &c.equivocations,
            &c.duplicate_commits,
            &c.commits,
            &c.unauthorized_commits,
        ] {
            counter.reset();
        }
        c.decision_latency.reset();

        let a = &self.arbitration;
        for counter in [
            &a.resolutions,
            &a.safety_overrides,
            &a.local_wins,
            &a.global_wins,
            &a.compliance_rejections,
            &a.weight_updates,
        ] {
            counter.reset();
        }
        a.conflict_score.reset();

        let s = &self.safety;
        s.simulations.reset();
        s.blocked.reset();
        s.last_total_risk.reset();
        s.latency.reset();

        let r = &self.reassignment;
        for counter in [&r.cycles, &r.proposals, &r.approved, &r.failed, &r.debounced] {
            counter.reset();
        }
        r.failover_latency.reset();

        let o = &self.orchestration;
        for counter in [
            &o.local,
            &o.swarm,
            &o.constellation,
            &o.succeeded,
            &o.failed,
            &o.forced_local,
        ] {
            counter.reset();
        }
        o.last_compliance.reset();
    }
}

/// Serializable view of [`CoordinationMetrics`] for external exporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub election: ElectionSnapshot,
    pub consensus: ConsensusSnapshot,
    pub arbitration: ArbitrationSnapshot,
    pub safety: SafetySnapshot,
    pub reassignment: ReassignmentSnapshot,
    pub orchestration: OrchestrationSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionSnapshot {
    pub elections_started: u64,
    pub elections_won: u64,
    pub step_downs: u64,
    pub votes_granted: u64,
    pub heartbeats_sent: u64,
    pub heartbeats_received: u64,
    pub stale_messages: u64,
    pub current_term: u64,
    pub convergence_latency: LatencySummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    pub proposals: u64,
    pub approved: u64,
    pub fallback_approved: u64,
    pub denied: u64,
    pub timed_out: u64,
    pub not_leader: u64,
    pub quorum_unavailable: u64,
    pub late_votes: u64,
    pub equivocations: u64,
    pub duplicate_commits: u64,
    pub commits: u64,
    pub unauthorized_commits: u64,
    pub decision_latency: LatencySummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationSnapshot {
    pub resolutions: u64,
    pub safety_overrides: u64,
    pub local_wins: u64,
    pub global_wins: u64,
    pub compliance_rejections: u64,
    pub weight_updates: u64,
    pub conflict_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySnapshot {
    pub simulations: u64,
    pub blocked: u64,
    pub last_total_risk: f64,
    pub latency: LatencySummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReassignmentSnapshot {
    pub cycles: u64,
    pub proposals: u64,
    pub approved: u64,
    pub failed: u64,
    pub debounced: u64,
    pub failover_latency: LatencySummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationSnapshot {
    pub local: u64,
    pub swarm: u64,
    pub constellation: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub forced_local: u64,
    pub last_compliance: f64,
}
