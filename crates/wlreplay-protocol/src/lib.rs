//! wlreplay notification protocol
//!
//! Defines the job lifecycle events that replayed jobs send back to the
//! orchestrator, their structural identity, and the factory that turns raw
//! wire messages into typed events.
//!
//! Wire format: one JSON object per TCP connection, end of message is end of
//! stream (no length prefix).

pub mod error;
pub mod event;
pub mod schema;

pub use error::EventError;
pub use event::{Event, EventFactory, EventIdentity, EventKind, Metadata, Subject};

/// Default TCP port the orchestrator listens on for notifications.
pub const DEFAULT_NOTIFY_PORT: u16 = 7363;

/// Upper bound on a single notification payload.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;
