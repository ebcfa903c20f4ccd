// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Application Layer
//!
//! Services that drive the domain layer over the message bus and registry.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`election`] | `LeaderElection`, `LeadershipView` |
//! | [`consensus`] | `ConsensusEngine`, `ConsensusService` |
//! | [`evaluator`] | `VoteEvaluator`, `HealthGatedEvaluator` |
//! | [`executor`] | `ActionExecutor` |
//! | [`propagation`] | `BusPropagator`, `ComplianceTracker` |
//! | [`reassigner`] | `RoleReassigner` |
//! | [`orchestrator`] | `ResponseOrchestrator`, `ExecutionOutcome` |
//! | [`node`] | `CoordinationNode` |

pub mod consensus;
pub mod election;
pub mod evaluator;
pub mod executor;
pub mod node;
pub mod orchestrator;
pub mod propagation;
pub mod reassigner;

pub use consensus::{ConsensusEngine, ConsensusService};
pub use election::{LeaderElection, LeadershipView, StaticLeadership};
pub use evaluator::{AlwaysGrantEvaluator, HealthGatedEvaluator, VoteDecision, VoteEvaluator};
pub use executor::{ActionExecutor, LoggingExecutor, RecordingExecutor};
pub use node::CoordinationNode;
pub use orchestrator::{ExecutionOutcome, ResponseOrchestrator};
pub use propagation::{BusPropagator, ComplianceTracker, PropagationReport, Propagator};
pub use reassigner::{CycleReport, ReassignmentAttempt, ReassignmentTrigger, RoleReassigner};
