// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process constellation simulator
//!
//! Starts one coordination node per agent over a shared in-memory bus and
//! registry, drives periodic swarm decisions through whichever node leads,
//! and prints leader and role transitions as they happen. `--fail-primary`
//! degrades the initial PRIMARY part-way through so failover can be watched.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use constellation_core::domain::agent::{AgentId, SatelliteRole};
use constellation_core::domain::decision::{ActionScope, Decision};
use constellation_core::domain::events::CoordinationEvent;
use constellation_core::domain::node_config::CoordinationConfig;
use constellation_core::infrastructure::event_bus::{EventBus, EventBusError, EventReceiver};
use constellation_core::infrastructure::message_bus::InMemoryNetwork;
use constellation_core::infrastructure::registry::InMemoryPeerRegistry;
use constellation_swarm::application::executor::LoggingExecutor;
use constellation_swarm::application::node::CoordinationNode;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Risk reported by a primary under `--fail-primary`.
const FAILED_PRIMARY_RISK: f64 = 0.6;

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of agents in the constellation
    #[arg(long, default_value_t = 5)]
    pub agents: usize,

    /// Wall-clock duration of the run
    #[arg(long, default_value_t = 30)]
    pub seconds: u64,

    /// Degrade the initial PRIMARY so the reassigner fails it over
    #[arg(long)]
    pub fail_primary: bool,

    /// Seconds into the run at which the primary degrades
    #[arg(long, default_value_t = 5)]
    pub fail_after: u64,

    /// Seconds between role reassignment cycles
    #[arg(long, default_value_t = 2)]
    pub cycle_seconds: u64,

    /// Seconds between swarm decisions submitted through the leader (0 disables)
    #[arg(long, default_value_t = 5)]
    pub decision_every: u64,

    /// Expose Prometheus metrics on this port for the duration of the run
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Initial role by position: first agent PRIMARY, second BACKUP, rest STANDBY.
pub fn initial_role(index: usize) -> SatelliteRole {
    match index {
        0 => SatelliteRole::Primary,
        1 => SatelliteRole::Backup,
        _ => SatelliteRole::Standby,
    }
}

pub fn agent_id(index: usize) -> AgentId {
    AgentId::new(format!("SAT-{:03}", index + 1))
}

/// Per-node configuration derived from the shared base.
pub fn node_config(base: &CoordinationConfig, id: &AgentId, cycle_seconds: u64) -> CoordinationConfig {
    let mut config = base.clone();
    config.spec.node.id = id.to_string();
    config.metadata.name = id.to_string();
    config.spec.reassignment.interval_secs = cycle_seconds.max(1);
    config
}

pub async fn run(args: SimulateArgs, config_override: Option<PathBuf>) -> Result<()> {
    if args.agents == 0 {
        anyhow::bail!("--agents must be at least 1");
    }
    let base = CoordinationConfig::load_or_default(config_override).context("Failed to load configuration")?;
    base.validate().context("Configuration validation failed")?;

    let metrics_port = args.metrics_port.or_else(|| {
        let metrics = &base.spec.observability.metrics;
        metrics.enabled.then_some(metrics.port)
    });
    if let Some(port) = metrics_port {
        install_prometheus(port)?;
    }

    let network = InMemoryNetwork::new();
    let world = InMemoryPeerRegistry::new();
    let ids: Vec<AgentId> = (0..args.agents).map(agent_id).collect();
    for (i, id) in ids.iter().enumerate() {
        world.register(id.clone(), initial_role(i));
    }

    let events = EventBus::with_default_capacity();
    let started = Instant::now();
    let printer_token = CancellationToken::new();
    let printer = tokio::spawn(print_events(
        events.subscribe(),
        started,
        args.json,
        printer_token.clone(),
    ));

    println!(
        "{}",
        format!(
            "Starting constellation of {} agents for {} s{}",
            args.agents,
            args.seconds,
            if args.fail_primary { " (primary will fail)" } else { "" }
        )
        .bold()
    );

    let mut nodes = Vec::with_capacity(ids.len());
    let mut views = Vec::with_capacity(ids.len());
    for id in &ids {
        let config = node_config(&base, id, args.cycle_seconds);
        let view = world.view();
        views.push(view.clone());
        let node = CoordinationNode::start(
            &config,
            Arc::new(network.attach(id.clone())),
            Arc::new(view),
            Arc::new(LoggingExecutor::new(id.clone())),
            events.clone(),
        )
        .await
        .with_context(|| format!("Failed to start node {}", id))?;
        nodes.push(node);
    }

    let deadline = started + Duration::from_secs(args.seconds);
    let fail_at = started + Duration::from_secs(args.fail_after);
    let mut primary_failed = false;
    let mut next_decision = started + Duration::from_secs(args.decision_every);
    let mut tick = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping simulation");
                break;
            }
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        if args.fail_primary && !primary_failed && now >= fail_at {
            world.set_risk(&ids[0], FAILED_PRIMARY_RISK);
            primary_failed = true;
            println!(
                "{} {} risk raised to {:.2}",
                stamp(started).dimmed(),
                ids[0].to_string().red().bold(),
                FAILED_PRIMARY_RISK
            );
        }
        if args.decision_every > 0 && now >= next_decision {
            next_decision = now + Duration::from_secs(args.decision_every);
            if let Some(leader) = nodes.iter().find(|n| n.is_leader()) {
                let decision = Decision::new("load_shed", ActionScope::Swarm, json!({ "shed_percent": 10 }))
                    .with_reasoning("simulated periodic load balancing");
                let outcome = leader.orchestrator().submit(&decision).await;
                if !outcome.success {
                    warn!(leader = %leader.id(), reason = %outcome.reason, "Simulated decision failed");
                }
            }
        }
    }

    let leader = nodes.iter().position(|n| n.is_leader());
    println!();
    println!("{}", "Final state:".bold());
    match leader {
        Some(i) => println!("  Leader: {}", ids[i].to_string().green()),
        None => println!("  Leader: {}", "(none)".yellow()),
    }
    // Roles as committed by the leader, or by the first agent without one.
    let roles = views[leader.unwrap_or(0)].roles();
    for id in &ids {
        let role = roles
            .get(id)
            .map(|r| r.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("  {:<8} {}", id.to_string(), role);
    }
    let leader = leader.map(|i| &nodes[i]);
    if let Some(node) = leader {
        let snapshot = node.metrics().snapshot();
        println!(
            "  Proposals: {} approved, {} fallback, {} denied, {} timed out",
            snapshot.consensus.approved,
            snapshot.consensus.fallback_approved,
            snapshot.consensus.denied,
            snapshot.consensus.timed_out
        );
        println!(
            "  Reassignments: {} committed of {} proposed",
            snapshot.reassignment.approved, snapshot.reassignment.proposals
        );
    }

    for node in &nodes {
        node.shutdown().await;
    }
    printer_token.cancel();
    if let Err(e) = printer.await {
        warn!(error = %e, "Event printer ended abnormally");
    }
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Simulation finished");
    Ok(())
}

fn install_prometheus(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to install Prometheus exporter on {}", addr))?;
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

fn stamp(started: Instant) -> String {
    format!("[+{:>6.1}s]", started.elapsed().as_secs_f64())
}

async fn print_events(mut events: EventReceiver, started: Instant, as_json: bool, token: CancellationToken) {
    loop {
        let published = tokio::select! {
            received = events.recv() => received,
            _ = token.cancelled() => break,
        };
        match published {
            Ok(published) => {
                if as_json {
                    let line = json!({
                        "elapsed_s": started.elapsed().as_secs_f64(),
                        "source": published.source,
                        "event": published.event,
                    });
                    println!("{}", line);
                } else if let Some(text) = describe(&published.event) {
                    println!("{} {:<8} {}", stamp(started).dimmed(), published.source.to_string(), text);
                }
            }
            Err(EventBusError::Lagged(skipped)) => {
                warn!(skipped, "Event printer lagged behind");
            }
            Err(_) => break,
        }
    }
}

/// One-line rendering of the events worth showing on a terminal.
pub fn describe(event: &CoordinationEvent) -> Option<String> {
    let text = match event {
        CoordinationEvent::LeaderElected { agent_id, term, .. } => {
            format!("{} elected leader for term {}", agent_id.to_string().green().bold(), term)
        }
        CoordinationEvent::LeaderSteppedDown { agent_id, term, .. } => {
            format!("{} stepped down in term {}", agent_id.to_string().yellow(), term)
        }
        CoordinationEvent::ProposalResolved {
            action,
            outcome,
            grants,
            quorum,
            ..
        } => {
            let outcome = match outcome.as_str() {
                "approved" => outcome.green(),
                "fallback_approved" => outcome.yellow(),
                _ => outcome.red(),
            };
            format!("proposal {} {} ({}/{} grants)", action, outcome, grants, quorum)
        }
        CoordinationEvent::RoleReassigned { agent_id, from, to, .. } => {
            let from = from.map(|r| r.as_str()).unwrap_or("none");
            format!("{} {} → {}", agent_id.to_string().cyan().bold(), from, to.as_str().bold())
        }
        CoordinationEvent::ActionBlocked { action, total_risk, .. } => {
            format!("{} blocked (risk {:.3})", action.red(), total_risk)
        }
        CoordinationEvent::DecisionExecuted {
            action,
            effective_scope,
            success,
            reason,
            ..
        } => {
            let status = if *success { "executed".green() } else { "failed".red() };
            format!("decision {} {} at {} scope: {}", action, status, effective_scope, reason)
        }
        // Every agent commits every action; too chatty for the terminal.
        CoordinationEvent::ActionCommitted { .. } => return None,
    };
    Some(text)
}
