// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Pure coordination logic. Nothing here touches the bus or spawns tasks;
//! time is injected by the caller.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`election`] | `ElectionStateMachine`, `ElectionOutput` |
//! | [`quorum`] | `quorum_size`, `majority`, `max_faulty` |
//! | [`tally`] | `VoteTally` |
//! | [`proposal`] | `Proposal`, `ProposalOutcome`, `RoleReassignmentParams` |
//! | [`dedup`] | `ExecutedSet` |
//! | [`arbiter`] | `PolicyArbiter` |
//! | [`safety`] | `SafetySimulator`, `NeighborSnapshot` |
//! | [`health`] | `HealthHistory`, `FailureMode` |
//! | [`error`] | `CoordinationError` |

pub mod arbiter;
pub mod dedup;
pub mod election;
pub mod error;
pub mod health;
pub mod proposal;
pub mod quorum;
pub mod safety;
pub mod tally;

pub use arbiter::{ArbitrationOutcome, ArbitrationReason, MultiAgentResolution, PolicyArbiter, PolicySource};
pub use error::CoordinationError;
pub use health::{FailureMode, HealthHistory};
pub use proposal::{Proposal, ProposalOutcome, ProposalResult, RoleChange, RoleReassignmentParams};
pub use safety::{NeighborSnapshot, SafetySimulator, SafetyVerdict};
