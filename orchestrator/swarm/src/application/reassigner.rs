// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Role Reassigner - leader-only background task that turns peer health
//! history into role change proposals.
//!
//! | Trigger | Condition | Change |
//! |---------|-----------|--------|
//! | Failover | PRIMARY, `degraded_threshold` consecutive unhealthy samples | swap with a healthy BACKUP, else STANDBY |
//! | Compliance | ack rate below `compliance_threshold` over `min_propagations` | demote to STANDBY |
//! | Safe mode | BACKUP/STANDBY, `safe_mode_threshold` (at least `degraded_threshold`) consecutive unhealthy samples | SAFE_MODE |
//! | Recovery | risk under `recovery_risk_threshold` for `recovery_window_secs` | promote one step if the slot is free or its holder is degraded |
//!
//! Every change goes through consensus as a `role_reassignment` proposal.
//! An agent named in a proposal is not named again within the hysteresis
//! window, whatever the outcome.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Owns every peer's [`HealthHistory`]

use crate::application::consensus::ConsensusService;
use crate::application::election::LeadershipView;
use crate::application::propagation::ComplianceTracker;
use crate::domain::error::CoordinationError;
use crate::domain::health::{FailureMode, HealthHistory, HealthThresholds};
use crate::domain::proposal::{ProposalResult, RoleChange, RoleReassignmentParams, ROLE_REASSIGNMENT_ACTION};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use constellation_core::domain::agent::{AgentId, SatelliteRole};
use constellation_core::domain::node_config::ReassignmentConfig;
use constellation_core::domain::registry::PeerRegistry;
use constellation_core::infrastructure::metrics::CoordinationMetrics;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReassignmentTrigger {
    PrimaryFailover,
    ComplianceDemotion,
    SafeMode,
    Recovery,
}

impl ReassignmentTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReassignmentTrigger::PrimaryFailover => "primary_failover",
            ReassignmentTrigger::ComplianceDemotion => "compliance_demotion",
            ReassignmentTrigger::SafeMode => "safe_mode",
            ReassignmentTrigger::Recovery => "recovery",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReassignmentAttempt {
    pub trigger: ReassignmentTrigger,
    pub changes: Vec<RoleChange>,
    pub result: Result<ProposalResult, CoordinationError>,
}

impl ReassignmentAttempt {
    pub fn committed(&self) -> bool {
        matches!(&self.result, Ok(r) if r.outcome.is_committed())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// `false` when the cycle was skipped because this agent is not leader.
    pub ran: bool,
    pub evaluated: usize,
    pub classifications: BTreeMap<AgentId, FailureMode>,
    pub attempts: Vec<ReassignmentAttempt>,
}

#[derive(Debug, Default)]
struct ReassignerState {
    histories: HashMap<AgentId, HealthHistory>,
    last_proposed: HashMap<AgentId, DateTime<Utc>>,
}

struct Plan {
    trigger: ReassignmentTrigger,
    changes: Vec<RoleChange>,
    reason: String,
}

pub struct RoleReassigner {
    self_id: AgentId,
    config: ReassignmentConfig,
    leadership: Arc<dyn LeadershipView>,
    registry: Arc<dyn PeerRegistry>,
    consensus: Arc<dyn ConsensusService>,
    compliance: Option<Arc<ComplianceTracker>>,
    metrics: Arc<CoordinationMetrics>,
    state: Mutex<ReassignerState>,
}

impl RoleReassigner {
    pub fn new(
        self_id: AgentId,
        config: ReassignmentConfig,
        leadership: Arc<dyn LeadershipView>,
        registry: Arc<dyn PeerRegistry>,
        consensus: Arc<dyn ConsensusService>,
        metrics: Arc<CoordinationMetrics>,
    ) -> Self {
        Self {
            self_id,
            config,
            leadership,
            registry,
            consensus,
            compliance: None,
            metrics,
            state: Mutex::new(ReassignerState::default()),
        }
    }

    pub fn with_compliance_tracker(mut self, tracker: Arc<ComplianceTracker>) -> Self {
        self.compliance = Some(tracker);
        self
    }

    fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            unhealthy_risk: self.config.unhealthy_risk_threshold,
            recovery_risk: self.config.recovery_risk_threshold,
            degraded_consecutive: self.config.degraded_threshold,
        }
    }

    /// Start the reassignment background task. The first cycle runs one
    /// interval after start.
    pub fn start(self: Arc<Self>, shutdown_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown_token).await;
        })
    }

    async fn run(&self, shutdown_token: CancellationToken) {
        let period = self.config.interval();
        info!(
            agent = %self.self_id,
            interval_secs = self.config.interval_secs,
            hysteresis_secs = self.config.hysteresis_window_secs,
            "Starting role reassigner background task"
        );

        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let report = self.evaluate_cycle(Utc::now()).await;
                    if report.ran {
                        debug!(
                            evaluated = report.evaluated,
                            proposals = report.attempts.len(),
                            "Role reassignment cycle completed"
                        );
                    }
                }
                _ = shutdown_token.cancelled() => {
                    info!(agent = %self.self_id, "Shutdown signal received, stopping role reassigner");
                    break;
                }
            }
        }

        info!(agent = %self.self_id, "Role reassigner background task stopped");
    }

    /// Run one evaluation cycle as of `now`. No-op unless leader.
    pub async fn evaluate_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let cycle_started = std::time::Instant::now();
        if !self.leadership.is_leader() {
            return CycleReport::default();
        }
        self.metrics.reassignment.cycles.increment();

        let mut state = self.state.lock().await;
        let thresholds = self.thresholds();

        let alive = self.registry.alive_peers().await;
        prune(&mut state, &alive, now, self.hysteresis());
        let mut roles: BTreeMap<AgentId, SatelliteRole> = BTreeMap::new();
        let mut report = CycleReport {
            ran: true,
            ..CycleReport::default()
        };
        for agent in &alive {
            if let Some(role) = self.registry.agent_role(agent).await {
                roles.insert(agent.clone(), role);
            }
            if let Some(health) = self.registry.health_summary(agent).await {
                let history = state
                    .histories
                    .entry(agent.clone())
                    .or_insert_with(|| HealthHistory::new(thresholds));
                history.record(health.risk_score, now);
                report.classifications.insert(agent.clone(), history.classify());
                report.evaluated += 1;
            }
        }

        let plans = self.plan(&state, &roles, now);
        for plan in plans {
            for change in &plan.changes {
                state.last_proposed.insert(change.agent_id.clone(), now);
            }
            let attempt = self.submit(plan, &state, now, cycle_started).await;
            report.attempts.push(attempt);
        }
        report
    }

    fn plan(
        &self,
        state: &ReassignerState,
        roles: &BTreeMap<AgentId, SatelliteRole>,
        now: DateTime<Utc>,
    ) -> Vec<Plan> {
        let mut planned_roles = roles.clone();
        let mut claimed: HashSet<AgentId> = HashSet::new();
        let mut plans = Vec::new();
        let hysteresis = self.hysteresis();

        let debounced = |agent: &AgentId| {
            state
                .last_proposed
                .get(agent)
                .is_some_and(|at| now - *at < hysteresis)
        };
        let consecutive = |agent: &AgentId| {
            state
                .histories
                .get(agent)
                .map(|h| h.consecutive_below_threshold())
                .unwrap_or(0)
        };
        let latest_risk = |agent: &AgentId| state.histories.get(agent).and_then(|h| h.latest());
        let healthy = |agent: &AgentId| {
            latest_risk(agent).is_some_and(|r| r < self.config.unhealthy_risk_threshold)
        };
        let available = |agent: &AgentId, claimed: &HashSet<AgentId>| {
            if claimed.contains(agent) {
                return false;
            }
            if debounced(agent) {
                self.metrics.reassignment.debounced.increment();
                debug!(agent = %agent, "Reassignment debounced");
                return false;
            }
            true
        };

        // Failover.
        let primaries: Vec<AgentId> = roles
            .iter()
            .filter(|(_, r)| **r == SatelliteRole::Primary)
            .map(|(a, _)| a.clone())
            .collect();
        for primary in primaries {
            if consecutive(&primary) < self.config.degraded_threshold || !available(&primary, &claimed) {
                continue;
            }
            let candidate = [SatelliteRole::Backup, SatelliteRole::Standby].iter().find_map(|wanted| {
                let mut pool: Vec<&AgentId> = planned_roles
                    .iter()
                    .filter(|(a, r)| *r == wanted && healthy(*a) && !claimed.contains(*a) && !debounced(*a))
                    .map(|(a, _)| a)
                    .collect();
                pool.sort_by(|a, b| {
                    let ra = latest_risk(*a).unwrap_or(f64::MAX);
                    let rb = latest_risk(*b).unwrap_or(f64::MAX);
                    ra.total_cmp(&rb).then_with(|| a.cmp(b))
                });
                pool.first().map(|a| ((**a).clone(), *wanted))
            });
            match candidate {
                Some((replacement, replacement_role)) => {
                    warn!(
                        primary = %primary,
                        replacement = %replacement,
                        consecutive = consecutive(&primary),
                        "Primary degraded, proposing failover"
                    );
                    plans.push(Plan {
                        trigger: ReassignmentTrigger::PrimaryFailover,
                        changes: vec![
                            RoleChange {
                                agent_id: primary.clone(),
                                from: Some(SatelliteRole::Primary),
                                to: replacement_role,
                            },
                            RoleChange {
                                agent_id: replacement.clone(),
                                from: Some(replacement_role),
                                to: SatelliteRole::Primary,
                            },
                        ],
                        reason: format!(
                            "{} consecutive unhealthy samples on primary {}",
                            consecutive(&primary),
                            primary
                        ),
                    });
                    planned_roles.insert(primary.clone(), replacement_role);
                    planned_roles.insert(replacement.clone(), SatelliteRole::Primary);
                    claimed.insert(primary);
                    claimed.insert(replacement);
                }
                None => warn!(primary = %primary, "Primary degraded but no healthy replacement available"),
            }
        }

        // Compliance demotion.
        if let Some(tracker) = &self.compliance {
            let candidates: Vec<(AgentId, SatelliteRole)> = planned_roles
                .iter()
                .filter(|(a, r)| {
                    matches!(r, SatelliteRole::Primary | SatelliteRole::Backup) && *a != &self.self_id
                })
                .map(|(a, r)| (a.clone(), *r))
                .collect();
            for (agent, role) in candidates {
                let Some((rate, observed)) = tracker.compliance(&agent) else {
                    continue;
                };
                if observed < self.config.min_propagations
                    || rate >= self.config.compliance_threshold
                    || !available(&agent, &claimed)
                {
                    continue;
                }
                warn!(agent = %agent, rate, observed, "Propagation compliance low, proposing demotion");
                plans.push(Plan {
                    trigger: ReassignmentTrigger::ComplianceDemotion,
                    changes: vec![RoleChange {
                        agent_id: agent.clone(),
                        from: Some(role),
                        to: SatelliteRole::Standby,
                    }],
                    reason: format!("propagation compliance {:.2} over {} propagations", rate, observed),
                });
                planned_roles.insert(agent.clone(), SatelliteRole::Standby);
                claimed.insert(agent);
            }
        }

        // Safe mode.
        let safe_mode_threshold = self.config.effective_safe_mode_threshold();
        let failing: Vec<(AgentId, SatelliteRole)> = planned_roles
            .iter()
            .filter(|(a, r)| {
                matches!(r, SatelliteRole::Backup | SatelliteRole::Standby)
                    && consecutive(*a) >= safe_mode_threshold
            })
            .map(|(a, r)| (a.clone(), *r))
            .collect();
        for (agent, role) in failing {
            if !available(&agent, &claimed) {
                continue;
            }
            warn!(agent = %agent, consecutive = consecutive(&agent), "Proposing safe mode");
            plans.push(Plan {
                trigger: ReassignmentTrigger::SafeMode,
                changes: vec![RoleChange {
                    agent_id: agent.clone(),
                    from: Some(role),
                    to: SatelliteRole::SafeMode,
                }],
                reason: format!("{} consecutive unhealthy samples", consecutive(&agent)),
            });
            planned_roles.insert(agent.clone(), SatelliteRole::SafeMode);
            claimed.insert(agent);
        }

        // Recovery.
        let window = ChronoDuration::seconds(self.config.recovery_window_secs as i64);
        let recovered: Vec<(AgentId, SatelliteRole)> = planned_roles
            .iter()
            .filter(|(a, _)| {
                state
                    .histories
                    .get(*a)
                    .and_then(|h| h.recovered_for(now))
                    .is_some_and(|d| d >= window)
            })
            .map(|(a, r)| (a.clone(), *r))
            .collect();
        for (agent, role) in recovered {
            let Some(target) = role.promotion_target() else {
                continue;
            };
            if claimed.contains(&agent) {
                continue;
            }
            let holders: Vec<AgentId> = planned_roles
                .iter()
                .filter(|(_, r)| **r == target)
                .map(|(a, _)| a.clone())
                .collect();
            let vacant = match self.capacity(target) {
                Some(capacity) => holders.len() < capacity,
                None => true,
            };
            let displaced = if vacant {
                None
            } else {
                match holders
                    .iter()
                    .find(|h| {
                        consecutive(*h) >= self.config.degraded_threshold
                            && !claimed.contains(*h)
                            && !debounced(*h)
                    })
                {
                    Some(h) => Some(h.clone()),
                    None => continue,
                }
            };
            if !available(&agent, &claimed) {
                continue;
            }

            let mut changes = vec![RoleChange {
                agent_id: agent.clone(),
                from: Some(role),
                to: target,
            }];
            if let Some(holder) = &displaced {
                changes.push(RoleChange {
                    agent_id: holder.clone(),
                    from: Some(target),
                    to: role,
                });
                planned_roles.insert(holder.clone(), role);
                claimed.insert(holder.clone());
            }
            info!(agent = %agent, from = role.as_str(), to = target.as_str(), "Proposing promotion after recovery");
            plans.push(Plan {
                trigger: ReassignmentTrigger::Recovery,
                changes,
                reason: format!("risk below {:.2} for the recovery window", self.config.recovery_risk_threshold),
            });
            planned_roles.insert(agent.clone(), target);
            claimed.insert(agent);
        }

        plans
    }

    fn hysteresis(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.config.hysteresis_window_secs as i64)
    }

    fn capacity(&self, role: SatelliteRole) -> Option<usize> {
        match role {
            SatelliteRole::Primary => Some(1),
            SatelliteRole::Backup => Some(self.config.backup_capacity),
            SatelliteRole::Standby | SatelliteRole::SafeMode => None,
        }
    }

    async fn submit(
        &self,
        plan: Plan,
        state: &ReassignerState,
        now: DateTime<Utc>,
        cycle_started: std::time::Instant,
    ) -> ReassignmentAttempt {
        let m = &self.metrics.reassignment;
        m.proposals.increment();
        let params = RoleReassignmentParams {
            changes: plan.changes.clone(),
            reason: plan.reason,
        };
        let result = self
            .consensus
            .propose(ROLE_REASSIGNMENT_ACTION, params.to_value(), self.config.proposal_timeout())
            .await;

        match &result {
            Ok(r) if r.outcome.is_committed() => {
                m.approved.increment();
                info!(
                    trigger = plan.trigger.as_str(),
                    proposal_id = %r.proposal_id,
                    changes = plan.changes.len(),
                    "Role reassignment committed"
                );
                if plan.trigger == ReassignmentTrigger::PrimaryFailover {
                    let failed_since = plan
                        .changes
                        .first()
                        .and_then(|c| state.histories.get(&c.agent_id))
                        .and_then(|h| h.first_unhealthy_at());
                    if let Some(since) = failed_since {
                        let elapsed = ChronoDuration::from_std(cycle_started.elapsed())
                            .unwrap_or_else(|_| ChronoDuration::zero());
                        let latency = (now + elapsed) - since;
                        m.failover_latency.record_ms(latency.num_milliseconds().max(0) as f64);
                    }
                }
                if plan.trigger == ReassignmentTrigger::ComplianceDemotion {
                    if let Some(tracker) = &self.compliance {
                        for change in &plan.changes {
                            tracker.reset(&change.agent_id);
                        }
                    }
                }
            }
            Ok(r) => {
                m.failed.increment();
                warn!(
                    trigger = plan.trigger.as_str(),
                    proposal_id = %r.proposal_id,
                    outcome = r.outcome.as_str(),
                    "Role reassignment not approved, roles unchanged"
                );
            }
            Err(e) => {
                m.failed.increment();
                warn!(trigger = plan.trigger.as_str(), error = %e, "Role reassignment proposal failed");
            }
        }

        ReassignmentAttempt {
            trigger: plan.trigger,
            changes: plan.changes,
            result,
        }
    }
}

/// Forget histories of agents no longer alive and debounce marks whose
/// window has passed.
fn prune(state: &mut ReassignerState, alive: &[AgentId], now: DateTime<Utc>, hysteresis: ChronoDuration) {
    let alive: HashSet<&AgentId> = alive.iter().collect();
    state.histories.retain(|agent, _| alive.contains(agent));
    state.last_proposed.retain(|_, at| now - *at < hysteresis);
}
