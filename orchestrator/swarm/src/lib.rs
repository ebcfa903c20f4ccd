// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `constellation-swarm`: Swarm Coordination Engine
//!
//! Lets a constellation of satellite agents agree on and safely execute
//! shared actions despite partial failures and message loss.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | election state machine, quorum and tallies, arbiter, safety model, health history |
//! | [`application`] | Application | election/consensus/propagation services, reassigner, orchestrator, node wiring |
//!
//! ## Control Flow
//!
//! ```text
//! Decision ─► ResponseOrchestrator ─► LOCAL ─────────────────────────────► executor
//!                                  ├► SWARM ─────────► ConsensusEngine ─► propagation
//!                                  └► CONSTELLATION ─► SafetySimulator ─► ConsensusEngine ─► propagation
//!
//! RoleReassigner (leader only, periodic) ─► ConsensusEngine (role_reassignment)
//! ```
//!
//! Transport and peer discovery are behind the `MessageBus` and
//! `PeerRegistry` traits from `constellation-core`.

pub mod application;
pub mod domain;

pub use domain::*;
