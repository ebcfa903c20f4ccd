// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Coordination Configuration Types
//
// Defines the configuration schema for a constellation coordination node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Node identity
// - Feature switches (swarm mode, LOCAL kill-switch, consensus timeout fallback)
// - Election, consensus, arbitration, safety and reassignment tuning
// - Logging and metrics settings

use crate::domain::policy::PolicyWeights;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "constellation/v1";
pub const KIND: &str = "CoordinationConfig";

/// Top-level Kubernetes-style coordination configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// API version (must be "constellation/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CoordinationConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: CoordinationSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Content under `spec:`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationSpec {
    #[serde(default)]
    pub node: NodeIdentity,

    #[serde(default)]
    pub features: FeatureFlags,

    #[serde(default)]
    pub election: ElectionConfig,

    #[serde(default)]
    pub consensus: ConsensusConfig,

    #[serde(default)]
    pub arbiter: ArbiterConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub reassignment: ReassignmentConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Satellite serial, used as the agent identifier on the bus.
    pub id: String,

    /// Orbital plane or ground segment label (informational)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plane: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        let id = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "SAT-000".to_string());
        Self {
            id,
            plane: None,
            tags: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// When false every decision takes the LOCAL path and the safety gate
    /// fails open.
    #[serde(default = "default_true")]
    pub swarm_enabled: bool,

    /// Kill-switch routing every decision down the LOCAL path.
    #[serde(default)]
    pub force_local: bool,

    /// Leader applies its own intent when a proposal times out without quorum.
    #[serde(default = "default_true")]
    pub timeout_fallback: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            swarm_enabled: true,
            force_local: false,
            timeout_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Follower lease validity after the last accepted heartbeat
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,

    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            lease_ms: default_lease_ms(),
            election_timeout_min_ms: default_election_timeout_min_ms(),
            election_timeout_max_ms: default_election_timeout_max_ms(),
        }
    }
}

impl ElectionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Fraction of alive peers whose grants approve a proposal
    #[serde(default = "default_quorum_fraction")]
    pub quorum_fraction: f64,

    /// Per-action fraction overrides (e.g. `attitude_trim: 0.5`)
    #[serde(default)]
    pub action_quorum: HashMap<String, f64>,

    /// Below this many alive peers proposals fail with QuorumUnavailable
    #[serde(default = "default_min_alive_peers")]
    pub min_alive_peers: usize,

    #[serde(default = "default_proposal_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Deadline for a local vote evaluator; an overrun counts as a deny
    #[serde(default = "default_vote_deadline_ms")]
    pub vote_deadline_ms: u64,

    /// Capacity of the executed proposal-id set
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Local risk at or above which the health-gated evaluator denies
    #[serde(default = "default_critical_risk")]
    pub critical_risk_threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            quorum_fraction: default_quorum_fraction(),
            action_quorum: HashMap::new(),
            min_alive_peers: default_min_alive_peers(),
            default_timeout_ms: default_proposal_timeout_ms(),
            vote_deadline_ms: default_vote_deadline_ms(),
            dedup_capacity: default_dedup_capacity(),
            critical_risk_threshold: default_critical_risk(),
        }
    }
}

impl ConsensusConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn vote_deadline(&self) -> Duration {
        Duration::from_millis(self.vote_deadline_ms)
    }

    /// Quorum fraction for `action`, honoring per-action overrides.
    pub fn fraction_for(&self, action: &str) -> f64 {
        self.action_quorum
            .get(action)
            .copied()
            .unwrap_or(self.quorum_fraction)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArbiterConfig {
    #[serde(default)]
    pub weights: PolicyWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Total risk above which an action is blocked
    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: f64,

    /// Fraction of base risk added per affected neighbour
    #[serde(default = "default_propagation_factor")]
    pub propagation_factor: f64,

    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,

    #[serde(default = "default_unknown_action_risk")]
    pub unknown_action_risk: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            risk_threshold: default_risk_threshold(),
            propagation_factor: default_propagation_factor(),
            max_neighbors: default_max_neighbors(),
            unknown_action_risk: default_unknown_action_risk(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassignmentConfig {
    #[serde(default = "default_reassignment_interval_secs")]
    pub interval_secs: u64,

    /// A sample at or above this risk counts as unhealthy
    #[serde(default = "default_unhealthy_risk")]
    pub unhealthy_risk_threshold: f64,

    /// Risk must stay below this for `recovery_window_secs` to promote
    #[serde(default = "default_recovery_risk")]
    pub recovery_risk_threshold: f64,

    #[serde(default = "default_recovery_window_secs")]
    pub recovery_window_secs: u64,

    /// An agent is not proposed again within this window
    #[serde(default = "default_hysteresis_window_secs")]
    pub hysteresis_window_secs: u64,

    /// Consecutive unhealthy samples before a PRIMARY is failed over
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: u32,

    /// Consecutive unhealthy samples before a BACKUP/STANDBY enters SAFE_MODE.
    /// Never acted on below `degraded_threshold`.
    #[serde(default = "default_safe_mode_threshold")]
    pub safe_mode_threshold: u32,

    #[serde(default = "default_compliance_threshold")]
    pub compliance_threshold: f64,

    /// Observed propagations required before compliance can trigger a demotion
    #[serde(default = "default_min_propagations")]
    pub min_propagations: u32,

    #[serde(default = "default_backup_capacity")]
    pub backup_capacity: usize,

    #[serde(default = "default_proposal_timeout_ms")]
    pub proposal_timeout_ms: u64,
}

impl Default for ReassignmentConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reassignment_interval_secs(),
            unhealthy_risk_threshold: default_unhealthy_risk(),
            recovery_risk_threshold: default_recovery_risk(),
            recovery_window_secs: default_recovery_window_secs(),
            hysteresis_window_secs: default_hysteresis_window_secs(),
            degraded_threshold: default_degraded_threshold(),
            safe_mode_threshold: default_safe_mode_threshold(),
            compliance_threshold: default_compliance_threshold(),
            min_propagations: default_min_propagations(),
            backup_capacity: default_backup_capacity(),
            proposal_timeout_ms: default_proposal_timeout_ms(),
        }
    }
}

impl ReassignmentConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_millis(self.proposal_timeout_ms)
    }

    /// Consecutive unhealthy samples that send a BACKUP/STANDBY to SAFE_MODE,
    /// raised to `degraded_threshold` so no health trigger fires earlier.
    pub fn effective_safe_mode_threshold(&self) -> u32 {
        self.safe_mode_threshold.max(self.degraded_threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_swarm_compliance")]
    pub swarm_compliance: f64,

    #[serde(default = "default_constellation_compliance")]
    pub constellation_compliance: f64,

    /// How long propagation waits for acknowledgements
    #[serde(default = "default_propagation_timeout_ms")]
    pub propagation_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            swarm_compliance: default_swarm_compliance(),
            constellation_compliance: default_constellation_compliance(),
            propagation_timeout_ms: default_propagation_timeout_ms(),
        }
    }
}

impl OrchestratorConfig {
    pub fn propagation_timeout(&self) -> Duration {
        Duration::from_millis(self.propagation_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_heartbeat_interval_ms() -> u64 {
    1_000
}

fn default_lease_ms() -> u64 {
    10_000
}

fn default_election_timeout_min_ms() -> u64 {
    150
}

fn default_election_timeout_max_ms() -> u64 {
    300
}

fn default_quorum_fraction() -> f64 {
    2.0 / 3.0
}

fn default_min_alive_peers() -> usize {
    1
}

fn default_proposal_timeout_ms() -> u64 {
    5_000
}

fn default_vote_deadline_ms() -> u64 {
    200
}

fn default_dedup_capacity() -> usize {
    4_096
}

fn default_critical_risk() -> f64 {
    0.8
}

fn default_risk_threshold() -> f64 {
    0.10
}

fn default_propagation_factor() -> f64 {
    0.15
}

fn default_max_neighbors() -> usize {
    8
}

fn default_unknown_action_risk() -> f64 {
    0.5
}

fn default_reassignment_interval_secs() -> u64 {
    30
}

fn default_unhealthy_risk() -> f64 {
    0.3
}

fn default_recovery_risk() -> f64 {
    0.2
}

fn default_recovery_window_secs() -> u64 {
    90
}

fn default_hysteresis_window_secs() -> u64 {
    300
}

fn default_degraded_threshold() -> u32 {
    3
}

fn default_safe_mode_threshold() -> u32 {
    3
}

fn default_compliance_threshold() -> f64 {
    0.90
}

fn default_min_propagations() -> u32 {
    5
}

fn default_backup_capacity() -> usize {
    1
}

fn default_swarm_compliance() -> f64 {
    0.90
}

fn default_constellation_compliance() -> f64 {
    0.95
}

fn default_propagation_timeout_ms() -> u64 {
    2_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "constellation-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: CoordinationSpec::default(),
        }
    }
}

impl CoordinationConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CONSTELLATION_CONFIG_PATH environment variable
    /// 2. ./constellation-config.yaml (working directory)
    /// 3. ~/.constellation/config.yaml (user home)
    /// 4. /etc/constellation/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CONSTELLATION_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./constellation-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".constellation").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/constellation/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CONSTELLATION_NODE_ID") {
            if !val.trim().is_empty() {
                tracing::info!("Environment override: CONSTELLATION_NODE_ID={}", val);
                self.spec.node.id = val.trim().to_string();
            }
        }

        let features = &mut self.spec.features;
        for (name, slot) in [
            ("CONSTELLATION_SWARM_ENABLED", &mut features.swarm_enabled),
            ("CONSTELLATION_FORCE_LOCAL", &mut features.force_local),
            ("CONSTELLATION_TIMEOUT_FALLBACK", &mut features.timeout_fallback),
        ] {
            if let Ok(val) = std::env::var(name) {
                match parse_flag(&val) {
                    Some(flag) => {
                        tracing::info!("Environment override: {}={}", name, flag);
                        *slot = flag;
                    }
                    None => {
                        tracing::warn!(
                            "Invalid value for {}: '{}'. Expected true/false. Ignoring.",
                            name,
                            val
                        );
                    }
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.node.id.trim().is_empty() {
            anyhow::bail!("spec.node.id cannot be empty");
        }

        let election = &self.spec.election;
        if election.election_timeout_min_ms == 0
            || election.election_timeout_min_ms > election.election_timeout_max_ms
        {
            anyhow::bail!(
                "spec.election timeout range is invalid: [{}, {}] ms",
                election.election_timeout_min_ms,
                election.election_timeout_max_ms
            );
        }
        if election.heartbeat_interval_ms == 0 || election.heartbeat_interval_ms >= election.lease_ms {
            anyhow::bail!(
                "spec.election.heartbeat_interval_ms ({}) must be positive and below lease_ms ({})",
                election.heartbeat_interval_ms,
                election.lease_ms
            );
        }

        let consensus = &self.spec.consensus;
        check_fraction("spec.consensus.quorum_fraction", consensus.quorum_fraction)?;
        for (action, fraction) in &consensus.action_quorum {
            check_fraction(&format!("spec.consensus.action_quorum.{}", action), *fraction)?;
        }
        if consensus.min_alive_peers == 0 {
            anyhow::bail!("spec.consensus.min_alive_peers must be at least 1");
        }
        if consensus.dedup_capacity == 0 {
            anyhow::bail!("spec.consensus.dedup_capacity must be at least 1");
        }

        self.spec
            .arbiter
            .weights
            .validate()
            .map_err(|e| anyhow::anyhow!("spec.arbiter.weights: {}", e))?;

        let safety = &self.spec.safety;
        check_unit("spec.safety.risk_threshold", safety.risk_threshold)?;
        check_unit("spec.safety.propagation_factor", safety.propagation_factor)?;
        check_unit("spec.safety.unknown_action_risk", safety.unknown_action_risk)?;

        let reassignment = &self.spec.reassignment;
        check_unit(
            "spec.reassignment.unhealthy_risk_threshold",
            reassignment.unhealthy_risk_threshold,
        )?;
        check_unit(
            "spec.reassignment.recovery_risk_threshold",
            reassignment.recovery_risk_threshold,
        )?;
        if reassignment.recovery_risk_threshold > reassignment.unhealthy_risk_threshold {
            anyhow::bail!(
                "spec.reassignment.recovery_risk_threshold ({}) must not exceed unhealthy_risk_threshold ({})",
                reassignment.recovery_risk_threshold,
                reassignment.unhealthy_risk_threshold
            );
        }
        if reassignment.degraded_threshold == 0 || reassignment.safe_mode_threshold == 0 {
            anyhow::bail!("spec.reassignment consecutive thresholds must be at least 1");
        }
        if reassignment.safe_mode_threshold < reassignment.degraded_threshold {
            anyhow::bail!(
                "spec.reassignment.safe_mode_threshold ({}) must not be below degraded_threshold ({})",
                reassignment.safe_mode_threshold,
                reassignment.degraded_threshold
            );
        }
        if reassignment.interval_secs == 0 {
            anyhow::bail!("spec.reassignment.interval_secs must be positive");
        }
        check_fraction(
            "spec.reassignment.compliance_threshold",
            reassignment.compliance_threshold,
        )?;

        let orchestrator = &self.spec.orchestrator;
        check_fraction(
            "spec.orchestrator.swarm_compliance",
            orchestrator.swarm_compliance,
        )?;
        check_fraction(
            "spec.orchestrator.constellation_compliance",
            orchestrator.constellation_compliance,
        )?;

        match self.spec.observability.logging.format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!(
                "spec.observability.logging.format must be 'text' or 'json', got '{}'",
                other
            ),
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn check_fraction(field: &str, value: f64) -> anyhow::Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        anyhow::bail!("{} must be within (0, 1], got {}", field, value);
    }
    Ok(())
}

fn check_unit(field: &str, value: f64) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{} must be within [0, 1], got {}", field, value);
    }
    Ok(())
}
