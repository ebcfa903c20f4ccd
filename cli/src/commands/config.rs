// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use constellation_core::domain::node_config::CoordinationConfig;

const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the resolved manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./constellation-config.yaml)
        #[arg(short, long, default_value = "./constellation-config.yaml")]
        output: PathBuf,

        /// Include every section with its defaults and comments
        #[arg(long)]
        examples: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate {
            output,
            examples,
            force,
        } => generate(&output, examples, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = CoordinationConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. CONSTELLATION_CONFIG_PATH: {}",
            std::env::var("CONSTELLATION_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./constellation-config.yaml");
        println!("  4. ~/.constellation/config.yaml");
        println!("  5. /etc/constellation/config.yaml");
        println!();
    }

    if as_yaml {
        let rendered = serde_yaml::to_string(&config).context("Failed to render configuration")?;
        print!("{}", rendered);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node Identity:".bold());
    println!("  ID: {}", spec.node.id);
    if let Some(plane) = &spec.node.plane {
        println!("  Plane: {}", plane);
    }
    if !spec.node.tags.is_empty() {
        println!("  Tags: {}", spec.node.tags.join(", "));
    }
    println!();

    println!("{}", "Features:".bold());
    println!("  Swarm mode: {}", on_off(spec.features.swarm_enabled));
    println!("  Force local: {}", on_off(spec.features.force_local));
    println!("  Timeout fallback: {}", on_off(spec.features.timeout_fallback));
    println!();

    println!("{}", "Leader Election:".bold());
    println!(
        "  Heartbeat: {} ms, lease {} ms",
        spec.election.heartbeat_interval_ms, spec.election.lease_ms
    );
    println!(
        "  Election timeout: {}-{} ms",
        spec.election.election_timeout_min_ms, spec.election.election_timeout_max_ms
    );
    println!();

    println!("{}", "Consensus:".bold());
    println!("  Quorum fraction: {:.4}", spec.consensus.quorum_fraction);
    let mut overrides: Vec<_> = spec.consensus.action_quorum.iter().collect();
    overrides.sort_by(|a, b| a.0.cmp(b.0));
    for (action, fraction) in overrides {
        println!("    {} → {:.4}", action, fraction);
    }
    println!("  Minimum alive peers: {}", spec.consensus.min_alive_peers);
    println!(
        "  Proposal timeout: {} ms, vote deadline {} ms",
        spec.consensus.default_timeout_ms, spec.consensus.vote_deadline_ms
    );
    println!("  Critical risk: {:.2}", spec.consensus.critical_risk_threshold);
    println!();

    println!("{}", "Policy Arbiter:".bold());
    let weights = spec.arbiter.weights;
    println!(
        "  Weights: safety {:.2}, performance {:.2}, availability {:.2}",
        weights.safety, weights.performance, weights.availability
    );
    println!();

    println!("{}", "Safety Simulator:".bold());
    println!(
        "  Risk threshold: {:.2}, propagation factor {:.2}, max neighbours {}",
        spec.safety.risk_threshold, spec.safety.propagation_factor, spec.safety.max_neighbors
    );
    println!();

    println!("{}", "Role Reassignment:".bold());
    let r = &spec.reassignment;
    println!("  Interval: {} s, hysteresis {} s", r.interval_secs, r.hysteresis_window_secs);
    println!(
        "  Unhealthy risk ≥ {:.2}, recovery < {:.2} for {} s",
        r.unhealthy_risk_threshold, r.recovery_risk_threshold, r.recovery_window_secs
    );
    println!(
        "  Failover after {} samples, safe mode after {}",
        r.degraded_threshold, r.safe_mode_threshold
    );
    println!(
        "  Compliance demotion below {:.2} over {} propagations",
        r.compliance_threshold, r.min_propagations
    );
    println!();

    println!("{}", "Orchestrator:".bold());
    println!(
        "  Compliance: swarm {:.2}, constellation {:.2}",
        spec.orchestrator.swarm_compliance, spec.orchestrator.constellation_compliance
    );
    println!();

    println!("{}", "Observability:".bold());
    println!(
        "  Logging: {} ({})",
        spec.observability.logging.level, spec.observability.logging.format
    );
    if spec.observability.metrics.enabled {
        println!("  Metrics: enabled on port {}", spec.observability.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = CoordinationConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, with_examples: bool, force: bool) -> Result<()> {
    write_template(output, with_examples, force)?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

fn write_template(output: &Path, with_examples: bool, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            output.display()
        );
    }
    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };
    std::fs::write(output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;
    Ok(())
}

fn on_off(flag: bool) -> colored::ColoredString {
    if flag {
        "on".green()
    } else {
        "off".yellow()
    }
}
