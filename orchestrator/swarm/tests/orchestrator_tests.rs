// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use common::{eventually, Cluster};
use constellation_core::domain::decision::{ActionScope, Decision};
use constellation_core::domain::events::CoordinationEvent;
use constellation_swarm::domain::error::CoordinationError;
use serde_json::json;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_swarm_decision_reaches_full_compliance() {
    let cluster = Cluster::start(5).await;
    let leader = cluster.leader().await;

    let decision = Decision::new("load_shed", ActionScope::Swarm, json!({"shed_percent": 10}));
    let outcome = cluster.nodes[leader].orchestrator().submit(&decision).await;

    assert!(outcome.success, "swarm decision failed: {}", outcome.reason);
    assert_eq!(outcome.effective_scope, ActionScope::Swarm);
    assert_eq!(outcome.compliance, Some(1.0));
    assert!(outcome.proposal_id.is_some());
    assert!(outcome.safety.is_none());
    for executor in &cluster.executors {
        assert_eq!(executor.count("load_shed"), 1);
    }

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_safe_constellation_decision_executes() {
    let cluster = Cluster::start(5).await;
    let leader = cluster.leader().await;

    let decision = Decision::new("thermal_maneuver", ActionScope::Constellation, json!({"delta_temp_c": 4}));
    let outcome = cluster.nodes[leader].orchestrator().submit(&decision).await;

    assert!(outcome.success, "constellation decision failed: {}", outcome.reason);
    let verdict = outcome.safety.expect("constellation scope runs the safety simulation");
    assert!(verdict.is_safe);
    assert_eq!(verdict.total_risk, 0.0);
    assert_eq!(verdict.affected_peers.len(), 4);
    assert!(outcome.compliance.is_some_and(|c| c >= 0.95));

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unsafe_constellation_decision_is_blocked() {
    let cluster = Cluster::start(5).await;
    let leader = cluster.leader().await;
    let mut events = cluster.events.subscribe();

    let decision = Decision::new("attitude_adjust", ActionScope::Constellation, json!({"angle_degrees": 20}));
    let outcome = cluster.nodes[leader].orchestrator().submit(&decision).await;

    assert!(!outcome.success);
    assert!(outcome.proposal_id.is_none(), "blocked actions never reach consensus");
    match &outcome.failure {
        Some(CoordinationError::UnsafeAction { action, total_risk, .. }) => {
            assert_eq!(action, "attitude_adjust");
            assert!(*total_risk > 0.10);
        }
        other => panic!("expected UnsafeAction, got {other:?}"),
    }
    assert!(cluster.executors.iter().all(|e| e.applied().is_empty()));

    let mut blocked = false;
    while let Ok(published) = events.try_recv() {
        if let CoordinationEvent::ActionBlocked { action, .. } = published.event {
            blocked |= action == "attitude_adjust";
        }
    }
    assert!(blocked, "an ActionBlocked event should be published");

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_follower_decision_is_not_coordinated() {
    let cluster = Cluster::start(3).await;
    let leader = cluster.leader().await;
    let follower = (leader + 1) % cluster.nodes.len();

    let decision = Decision::new("load_shed", ActionScope::Swarm, json!({"shed_percent": 5}));
    let outcome = cluster.nodes[follower].orchestrator().submit(&decision).await;

    assert!(!outcome.success);
    assert!(matches!(outcome.failure, Some(CoordinationError::NotLeader { .. })));
    assert!(cluster.executors.iter().all(|e| e.applied().is_empty()));

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_force_local_keeps_action_on_one_agent() {
    let cluster = Cluster::start_with(3, |c| c.spec.features.force_local = true).await;
    let leader = cluster.leader().await;

    let decision = Decision::new("load_shed", ActionScope::Constellation, json!({"shed_percent": 50}));
    let outcome = cluster.nodes[leader].orchestrator().submit(&decision).await;

    assert!(outcome.success);
    assert_eq!(outcome.requested_scope, ActionScope::Constellation);
    assert_eq!(outcome.effective_scope, ActionScope::Local);
    assert!(outcome.safety.is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    for (i, executor) in cluster.executors.iter().enumerate() {
        let expected = usize::from(i == leader);
        assert_eq!(executor.count("load_shed"), expected);
    }

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_peer_lowers_compliance() {
    let cluster = Cluster::start_with(5, |c| c.spec.orchestrator.propagation_timeout_ms = 300).await;
    let leader = cluster.leader().await;
    let faulty = (leader + 1) % cluster.nodes.len();
    cluster.executors[faulty].fail_on("load_shed");

    let decision = Decision::new("load_shed", ActionScope::Swarm, json!({"shed_percent": 10}));
    let outcome = cluster.nodes[leader].orchestrator().submit(&decision).await;

    assert_eq!(outcome.compliance, Some(0.8));
    assert!(matches!(outcome.failure, Some(CoordinationError::ComplianceShortfall { .. })));

    let tracker = cluster.nodes[leader].propagator().tracker();
    let faulty_id = &cluster.ids[faulty];
    assert!(eventually(Duration::from_secs(1), || tracker.compliance(faulty_id) == Some((0.0, 1))).await);

    cluster.shutdown().await;
}
