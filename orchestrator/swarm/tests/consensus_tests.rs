// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use common::{eventually, Cluster};
use constellation_core::domain::agent::SatelliteRole;
use constellation_core::domain::messages::{ActionApproved, ActionPropagate, CoordMessage, Envelope, ProposalId};
use constellation_core::domain::transport::{MessageBus, Qos};
use constellation_swarm::application::election::LeadershipView;
use constellation_swarm::domain::error::CoordinationError;
use constellation_swarm::domain::proposal::{
    Proposal, ProposalOutcome, RoleChange, RoleReassignmentParams, ROLE_REASSIGNMENT_ACTION,
};
use serde_json::json;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_proposal_approved_and_applied_everywhere() {
    let cluster = Cluster::start(5).await;
    let leader = cluster.leader().await;

    let result = cluster.nodes[leader]
        .consensus()
        .submit(Proposal::new("load_shed", json!({"shed_percent": 10}), Duration::from_secs(2)))
        .await
        .expect("leader proposal should resolve");

    assert_eq!(result.outcome, ProposalOutcome::Approved);
    assert_eq!(result.alive, 5);
    assert_eq!(result.quorum, 4);
    assert!(result.grants >= result.quorum);

    let applied = eventually(Duration::from_secs(2), || {
        cluster.executors.iter().all(|e| e.count("load_shed") == 1)
    })
    .await;
    assert!(applied, "every agent should apply the approved action exactly once");
    for node in &cluster.nodes {
        assert!(node.consensus().has_executed(&result.proposal_id));
    }

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_approval_is_applied_once() {
    let cluster = Cluster::start(5).await;
    let leader = cluster.leader().await;
    let follower = (leader + 1) % cluster.nodes.len();

    let params = json!({"delta_temp_c": 3});
    let result = cluster.nodes[leader]
        .consensus()
        .submit(Proposal::new("thermal_maneuver", params.clone(), Duration::from_secs(2)))
        .await
        .expect("leader proposal should resolve");
    assert!(result.outcome.is_committed());

    let follower_exec = &cluster.executors[follower];
    assert!(eventually(Duration::from_secs(2), || follower_exec.count("thermal_maneuver") == 1).await);

    let replay = ActionApproved {
        proposal_id: result.proposal_id,
        action: "thermal_maneuver".to_string(),
        params,
        fallback: false,
        term: cluster.nodes[leader].election().current_term(),
    };
    let leader_id = cluster.ids[leader].clone();
    for _ in 0..3 {
        cluster.nodes[follower]
            .consensus()
            .handle_action_approved(&leader_id, &replay)
            .await;
    }

    assert_eq!(follower_exec.count("thermal_maneuver"), 1);
    assert!(cluster.nodes[follower].metrics().snapshot().consensus.duplicate_commits >= 3);

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_follower_cannot_propose() {
    let cluster = Cluster::start(3).await;
    let leader = cluster.leader().await;
    let follower = (leader + 1) % cluster.nodes.len();
    let leader_id = cluster.ids[leader].clone();

    // Wait for the follower to learn who leads.
    let node = &cluster.nodes[follower];
    assert!(
        eventually(Duration::from_secs(3), || {
            node.election().leader_id().as_ref() == Some(&leader_id)
        })
        .await
    );

    let err = node
        .consensus()
        .submit(Proposal::new("safe_mode", json!({}), Duration::from_secs(1)))
        .await
        .expect_err("followers must not propose");
    match err {
        CoordinationError::NotLeader { leader } => assert_eq!(leader, Some(leader_id)),
        other => panic!("unexpected error: {other}"),
    }
    assert!(cluster.executors.iter().all(|e| e.applied().is_empty()));

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_critical_peers_deny_proposal() {
    let cluster = Cluster::start(5).await;
    let leader = cluster.leader().await;

    let critical: Vec<usize> = (0..cluster.nodes.len()).filter(|i| *i != leader).take(3).collect();
    for i in &critical {
        cluster.world.set_risk(&cluster.ids[*i], 0.9);
    }

    let result = cluster.nodes[leader]
        .consensus()
        .submit(Proposal::new("load_shed", json!({"shed_percent": 30}), Duration::from_secs(2)))
        .await
        .expect("proposal should resolve");

    assert_eq!(result.outcome, ProposalOutcome::Denied);
    assert!(result.denies >= 2);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cluster.executors.iter().all(|e| e.count("load_shed") == 0));

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commits_from_non_leader_are_ignored() {
    let cluster = Cluster::start(5).await;
    let leader = cluster.leader().await;
    let size = cluster.nodes.len();
    let rogue = (leader + 1) % size;
    let target = (1..size)
        .find(|i| *i != leader && *i != rogue)
        .expect("a standby outside leader and rogue");
    let rogue_id = cluster.ids[rogue].clone();
    let target_id = cluster.ids[target].clone();
    let term = cluster.nodes[leader].election().current_term();

    let forged_roles = RoleReassignmentParams {
        changes: vec![RoleChange {
            agent_id: target_id.clone(),
            from: None,
            to: SatelliteRole::Primary,
        }],
        reason: "self-appointed".to_string(),
    };
    let approved = CoordMessage::ActionApproved(ActionApproved {
        proposal_id: ProposalId::new(),
        action: ROLE_REASSIGNMENT_ACTION.to_string(),
        params: forged_roles.to_value(),
        fallback: false,
        term,
    });
    let propagate = CoordMessage::ActionPropagate(ActionPropagate {
        proposal_id: ProposalId::new(),
        action: "load_shed".to_string(),
        params: json!({"shed_percent": 90}),
        term,
    });

    let rogue_bus = cluster.network.attach(rogue_id.clone());
    for message in [approved, propagate] {
        rogue_bus
            .publish(Envelope::broadcast(rogue_id.clone(), message), Qos::AtLeastOnce)
            .await
            .expect("broadcast should be accepted by the network");
    }

    let others: Vec<usize> = (0..size).filter(|i| *i != rogue).collect();
    let dropped = eventually(Duration::from_secs(2), || {
        others
            .iter()
            .all(|i| cluster.nodes[*i].metrics().snapshot().consensus.unauthorized_commits >= 2)
    })
    .await;
    assert!(dropped, "every other agent should drop both forged commits");

    for view in &cluster.views {
        assert_ne!(view.roles().get(&target_id), Some(&SatelliteRole::Primary));
    }
    assert!(cluster.executors.iter().all(|e| e.count("load_shed") == 0));

    cluster.shutdown().await;
}
