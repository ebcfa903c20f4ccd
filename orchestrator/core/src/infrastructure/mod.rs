// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod message_bus;
pub mod metrics;
pub mod registry;

pub use event_bus::{EventBus, EventBusError, EventReceiver};
pub use message_bus::{InMemoryMessageBus, InMemoryNetwork};
pub use metrics::CoordinationMetrics;
pub use registry::InMemoryPeerRegistry;
