// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Safety Simulator
//!
//! Estimates the cascade risk of a constellation-wide action before it is
//! proposed. The model is pure: neighbour data is captured up front into a
//! [`NeighborSnapshot`] and [`SafetySimulator::simulate`] performs no I/O.
//!
//! | Action | Base risk |
//! |--------|-----------|
//! | `attitude_adjust` | `(abs(angle_degrees) / 10) × 0.30` |
//! | `load_shed` | `0` up to 15 %, then `(shed_percent − 15) / 100` |
//! | `thermal_maneuver` | `0` up to 5 °C, then `delta_temp_c / 5 − 1` |
//! | `safe_mode` | `0` |
//! | `role_reassignment` | `0.05` |
//! | anything else | configured unknown-action risk |
//!
//! Cascade risk adds `base × propagation_factor` for each of the nearest
//! neighbours. An action is blocked when `base + cascade` exceeds the
//! threshold.

use constellation_core::domain::agent::AgentId;
use constellation_core::domain::node_config::SafetyConfig;
use constellation_core::domain::registry::PeerRegistry;
use constellation_core::infrastructure::metrics::CoordinationMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Alive 1-hop neighbours ranked by link quality (best first).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborSnapshot {
    neighbors: Vec<(AgentId, f64)>,
}

impl NeighborSnapshot {
    pub fn new(mut links: Vec<(AgentId, f64)>) -> Self {
        links.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self { neighbors: links }
    }

    /// Query the registry for every alive peer with a direct link to `self_id`.
    pub async fn capture(registry: &dyn PeerRegistry, self_id: &AgentId) -> Self {
        let mut links = Vec::new();
        for peer in registry.alive_peers().await {
            if &peer == self_id {
                continue;
            }
            if let Some(quality) = registry.link_quality(self_id, &peer).await {
                links.push((peer, quality));
            }
        }
        Self::new(links)
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn nearest(&self, k: usize) -> impl Iterator<Item = &AgentId> {
        self.neighbors.iter().take(k).map(|(id, _)| id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    pub base_risk: f64,
    pub cascade_risk: f64,
    pub total_risk: f64,
    pub affected_peers: Vec<AgentId>,
    pub blocked_reason: Option<String>,
}

impl SafetyVerdict {
    fn pass_through() -> Self {
        Self {
            is_safe: true,
            base_risk: 0.0,
            cascade_risk: 0.0,
            total_risk: 0.0,
            affected_peers: vec![],
            blocked_reason: None,
        }
    }
}

pub struct SafetySimulator {
    config: SafetyConfig,
    enabled: bool,
    metrics: Arc<CoordinationMetrics>,
}

impl SafetySimulator {
    /// `enabled` follows swarm mode; a disabled simulator passes everything.
    pub fn new(config: SafetyConfig, enabled: bool, metrics: Arc<CoordinationMetrics>) -> Self {
        Self {
            config,
            enabled,
            metrics,
        }
    }

    /// Base risk of `action`; `Err` names a missing or non-numeric parameter.
    pub fn base_risk(&self, action: &str, params: &serde_json::Value) -> Result<f64, String> {
        match action {
            "attitude_adjust" => {
                let angle = numeric(params, "angle_degrees")?;
                Ok((angle.abs() / 10.0) * 0.30)
            }
            "load_shed" => {
                let shed = numeric(params, "shed_percent")?;
                Ok(if shed <= 15.0 { 0.0 } else { (shed - 15.0) / 100.0 })
            }
            "thermal_maneuver" => {
                let delta = numeric(params, "delta_temp_c")?;
                Ok(if delta <= 5.0 { 0.0 } else { delta / 5.0 - 1.0 })
            }
            "safe_mode" => Ok(0.0),
            "role_reassignment" => Ok(0.05),
            _ => Ok(self.config.unknown_action_risk),
        }
    }

    pub fn simulate(&self, action: &str, params: &serde_json::Value, neighbors: &NeighborSnapshot) -> SafetyVerdict {
        if !self.enabled {
            return SafetyVerdict::pass_through();
        }
        let started = Instant::now();

        let (base_risk, param_error) = match self.base_risk(action, params) {
            Ok(risk) => (risk, None),
            Err(reason) => (1.0, Some(reason)),
        };
        let affected_peers: Vec<AgentId> = neighbors.nearest(self.config.max_neighbors).cloned().collect();
        let cascade_risk = base_risk * self.config.propagation_factor * affected_peers.len() as f64;
        let total_risk = base_risk + cascade_risk;
        let is_safe = param_error.is_none() && total_risk <= self.config.risk_threshold;

        let blocked_reason = if is_safe {
            None
        } else {
            Some(param_error.unwrap_or_else(|| {
                format!(
                    "total risk {:.4} exceeds threshold {:.4} ({} neighbours affected)",
                    total_risk,
                    self.config.risk_threshold,
                    affected_peers.len()
                )
            }))
        };

        let m = &self.metrics.safety;
        m.simulations.increment();
        m.last_total_risk.set(total_risk);
        m.latency.record(started.elapsed());
        if let Some(reason) = &blocked_reason {
            m.blocked.increment();
            warn!(action, total_risk, reason = %reason, "Safety simulation blocked action");
        } else {
            debug!(action, base_risk, cascade_risk, total_risk, "Safety simulation passed");
        }

        SafetyVerdict {
            is_safe,
            base_risk,
            cascade_risk,
            total_risk,
            affected_peers,
            blocked_reason,
        }
    }
}

fn numeric(params: &serde_json::Value, key: &str) -> Result<f64, String> {
    params
        .get(key)
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| format!("missing or non-numeric parameter '{}'", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use constellation_core::domain::agent::SatelliteRole;
    use constellation_core::infrastructure::registry::InMemoryPeerRegistry;
    use serde_json::json;

    fn simulator() -> SafetySimulator {
        SafetySimulator::new(SafetyConfig::default(), true, Arc::new(CoordinationMetrics::new()))
    }

    fn peers(n: usize) -> NeighborSnapshot {
        NeighborSnapshot::new((0..n).map(|i| (AgentId::new(format!("SAT-{i:03}")), 0.9)).collect())
    }

    #[test]
    fn test_attitude_adjust_with_five_peers_is_blocked() {
        let verdict = simulator().simulate("attitude_adjust", &json!({ "angle_degrees": 5.0 }), &peers(5));
        assert!((verdict.base_risk - 0.15).abs() < 1e-9);
        assert!((verdict.total_risk - 0.2625).abs() < 1e-9);
        assert!(!verdict.is_safe);
        assert_eq!(verdict.affected_peers.len(), 5);
    }

    #[test]
    fn test_small_load_shed_is_safe() {
        let verdict = simulator().simulate("load_shed", &json!({ "shed_percent": 10 }), &peers(5));
        assert_eq!(verdict.total_risk, 0.0);
        assert!(verdict.is_safe);
        assert!(verdict.blocked_reason.is_none());
    }

    #[test]
    fn test_safe_mode_has_zero_risk() {
        let verdict = simulator().simulate("safe_mode", &json!({}), &peers(12));
        assert_eq!(verdict.total_risk, 0.0);
        assert!(verdict.is_safe);
        assert_eq!(verdict.affected_peers.len(), 8);
    }

    #[test]
    fn test_thermal_maneuver_curve() {
        let sim = simulator();
        assert_eq!(sim.base_risk("thermal_maneuver", &json!({ "delta_temp_c": 5 })), Ok(0.0));
        assert_eq!(sim.base_risk("thermal_maneuver", &json!({ "delta_temp_c": 10 })), Ok(1.0));
    }

    #[test]
    fn test_role_reassignment_passes_with_few_neighbours() {
        let verdict = simulator().simulate("role_reassignment", &json!({}), &peers(4));
        assert!((verdict.total_risk - 0.08).abs() < 1e-9);
        assert!(verdict.is_safe);
    }

    #[test]
    fn test_unknown_action_is_blocked_by_default() {
        let verdict = simulator().simulate("deorbit", &json!({}), &peers(0));
        assert_eq!(verdict.base_risk, 0.5);
        assert!(!verdict.is_safe);
    }

    #[test]
    fn test_missing_parameter_blocks() {
        let verdict = simulator().simulate("attitude_adjust", &json!({ "angle_degrees": "five" }), &peers(0));
        assert!(!verdict.is_safe);
        assert!(verdict.blocked_reason.unwrap().contains("angle_degrees"));
    }

    #[test]
    fn test_disabled_simulator_fails_open() {
        let sim = SafetySimulator::new(SafetyConfig::default(), false, Arc::new(CoordinationMetrics::new()));
        let verdict = sim.simulate("deorbit", &json!({}), &peers(5));
        assert!(verdict.is_safe);
    }

    #[test]
    fn test_metrics_count_blocks() {
        let metrics = Arc::new(CoordinationMetrics::new());
        let sim = SafetySimulator::new(SafetyConfig::default(), true, metrics.clone());
        sim.simulate("attitude_adjust", &json!({ "angle_degrees": 5.0 }), &peers(5));
        sim.simulate("safe_mode", &json!({}), &peers(5));
        let snap = metrics.snapshot();
        assert_eq!(snap.safety.simulations, 2);
        assert_eq!(snap.safety.blocked, 1);
        assert_eq!(snap.safety.latency.count, 2);
    }

    #[tokio::test]
    async fn test_snapshot_ranks_by_link_quality() {
        let registry = InMemoryPeerRegistry::new();
        let me = AgentId::from("SAT-000");
        for i in 0..4 {
            registry.register(AgentId::new(format!("SAT-{i:03}")), SatelliteRole::Standby);
        }
        registry.set_link_quality(&me, &AgentId::from("SAT-002"), 0.3);
        registry.set_link_quality(&me, &AgentId::from("SAT-003"), 0.99);
        registry.set_link_quality(&me, &AgentId::from("SAT-001"), 0.5);
        registry.set_alive(&AgentId::from("SAT-001"), false);

        let snapshot = NeighborSnapshot::capture(&registry, &me).await;
        let order: Vec<&str> = snapshot.nearest(8).map(|id| id.as_str()).collect();
        assert_eq!(order, vec!["SAT-003", "SAT-002"]);
    }
}
