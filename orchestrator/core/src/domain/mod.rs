// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value objects, wire messages and collaborator ports shared by every
//! coordination component.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and traits with no I/O of their own

pub mod agent;
pub mod decision;
pub mod events;
pub mod messages;
pub mod node_config;
pub mod policy;
pub mod registry;
pub mod transport;
