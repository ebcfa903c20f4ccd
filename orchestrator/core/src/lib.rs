// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Shared domain model and in-memory infrastructure for the constellation
//! coordination engine.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain types, ports and reference adapters

pub mod domain;
pub mod infrastructure;

pub use domain::*;
