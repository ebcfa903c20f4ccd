// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Identity & Roles
//!
//! Identity and role value objects shared by every coordination component.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`AgentId`] | Stable satellite serial, totally ordered for election tie-breaks |
//! | [`SatelliteRole`] | Operational role stored by the peer registry |
//! | [`HealthSummary`] | Per-peer health report published by the registry |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a constellation member (the satellite serial).
///
/// Ordering is lexicographic on the serial and is used as the deterministic
/// tie-break between simultaneous election candidates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(serial: impl Into<String>) -> Self {
        Self(serial.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Operational role of a satellite within the constellation.
///
/// Exactly one `Primary` should exist per quorum-healthy constellation. Roles
/// only change through an approved consensus proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SatelliteRole {
    Primary,
    Backup,
    Standby,
    SafeMode,
}

impl SatelliteRole {
    /// Next role up the recovery ladder (`SAFE_MODE → STANDBY → BACKUP → PRIMARY`).
    pub fn promotion_target(self) -> Option<SatelliteRole> {
        match self {
            SatelliteRole::SafeMode => Some(SatelliteRole::Standby),
            SatelliteRole::Standby => Some(SatelliteRole::Backup),
            SatelliteRole::Backup => Some(SatelliteRole::Primary),
            SatelliteRole::Primary => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SatelliteRole::Primary => "PRIMARY",
            SatelliteRole::Backup => "BACKUP",
            SatelliteRole::Standby => "STANDBY",
            SatelliteRole::SafeMode => "SAFE_MODE",
        }
    }
}

impl fmt::Display for SatelliteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health report for a single peer as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Current anomaly risk in `[0, 1]`; higher is worse.
    pub risk_score: f64,
    /// How often the same anomaly pattern has recurred recently, `[0, 1]`.
    pub recurrence_score: f64,
}

impl HealthSummary {
    pub fn new(risk_score: f64, recurrence_score: f64) -> Self {
        Self {
            risk_score,
            recurrence_score,
        }
    }

    pub fn nominal() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl Default for HealthSummary {
    fn default() -> Self {
        Self::nominal()
    }
}
