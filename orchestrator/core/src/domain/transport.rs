// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Message bus port.

use crate::domain::agent::AgentId;
use crate::domain::messages::Envelope;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Delivery class requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    /// Fire and forget (heartbeats).
    AtMostOnce,
    /// Retried until acknowledged by the transport (votes, commits).
    AtLeastOnce,
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Message bus is closed")]
    Closed,

    #[error("Agent {0} is not attached to the bus")]
    Detached(AgentId),

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, envelope: Envelope, qos: Qos) -> Result<(), TransportError>;

    /// Receive envelopes published on any of `topics` and addressed to this
    /// agent. The receiver is bounded; a slow consumer loses messages rather
    /// than stalling the bus.
    async fn subscribe(&self, topics: &[&str]) -> Result<mpsc::Receiver<Envelope>, TransportError>;
}
