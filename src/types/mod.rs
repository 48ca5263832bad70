//! Shared types for Usher

mod error;

pub use error::{Result, UsherError};

/// Connection lifecycle state
///
/// Exactly one value is active at a time. The session only advances the
/// state forward on success and resets it to `Disconnected` on any close,
/// never skipping a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// No live transport
    Disconnected,
    /// The transport is open but the handshake has not completed
    TransportOpen,
    /// The server acknowledged the `ready` call
    Ready,
    /// Credentials accepted; calls flow without queueing
    Authenticated,
}

/// User identity returned by the server on successful authentication
///
/// Kept as the raw JSON object from the authenticate reply's `user` field.
pub type UserIdentity = serde_json::Value;
