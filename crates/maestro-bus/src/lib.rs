//! In-process communication bus for Maestro agents.
//!
//! Provides direct and broadcast messaging with per-agent mailboxes and
//! callbacks, a TTL-bounded shared data table, and a handoff inbox for
//! passing work between agents outside the task queue.
//!
//! # Main types
//!
//! - [`CommunicationBus`]: Routes messages, stores shared data, tracks handoffs.
//! - [`AgentMessage`]: A message between agents (`recipient == None` broadcasts).
//! - [`DataShare`]: Shared data that expires after `ttl_seconds`.
//! - [`TaskHandoff`]: A task offered to a specific agent until accepted.

/// Bus implementation and background sweeper.
pub mod bus;
/// Task handoffs between agents.
pub mod handoff;
/// Message types.
pub mod message;
/// Shared data with TTL expiry.
pub mod shared;

pub use bus::{BusStats, CommunicationBus, MessageCallback};
pub use handoff::TaskHandoff;
pub use message::{AgentMessage, MessageType};
pub use shared::{DataShare, DataShareStore};
