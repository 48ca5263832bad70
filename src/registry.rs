//! Pending callback registry
//!
//! Correlates outbound calls with their eventual replies. Caller-facing
//! callbacks get `cb_N` tokens from a monotonic counter that is never
//! reused within a session; the two handshake calls use reserved tokens so
//! they can ride the same reply path without consuming caller tokens.
//!
//! Callback lifetime is bound to the connection generation: on teardown or
//! reconnect every pending entry is failed with `ConnectionReset` instead
//! of being left to wait forever.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::types::{Result, UsherError};
use crate::wire;

/// Reserved correlation token for the `ready` handshake call
pub const READY_TOKEN: &str = "cb_ready";

/// Reserved correlation token for the `user.authenticate` handshake call
pub const AUTH_TOKEN: &str = "cb_auth";

/// Outcome of a correlated call, delivered exactly once
pub type CallReply = Result<Vec<Value>>;

/// Handshake step a reserved token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Ready,
    Authenticate,
}

/// Where a reply is delivered once it arrives
pub enum ReplySink {
    /// Caller-facing reply channel
    Caller(oneshot::Sender<CallReply>),
    /// Internal handshake continuation, handled by the session
    Handshake(HandshakePhase),
}

/// Per-session registry of pending callbacks
#[derive(Default)]
pub struct CallbackRegistry {
    pending: HashMap<String, ReplySink>,
    next_token: u64,
}

impl CallbackRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a caller sink and return its assigned `cb_N` token
    pub fn store(&mut self, sink: ReplySink) -> String {
        let token = format!("cb_{}", self.next_token);
        self.next_token += 1;
        self.pending.insert(token.clone(), sink);
        token
    }

    /// Store a sink under a reserved handshake token
    ///
    /// A stale entry from an earlier attempt under the same token is
    /// replaced; its reply can no longer be told apart from the new one.
    pub fn store_reserved(&mut self, token: &str, sink: ReplySink) {
        self.pending.insert(token.to_string(), sink);
    }

    /// Complete a token with a decoded reply argument list
    ///
    /// Caller sinks are resolved here; handshake sinks are handed back so
    /// the session can advance its state machine. An unknown token is
    /// logged and ignored - it must never disturb other pending entries.
    pub fn complete(&mut self, token: &str, arguments: Vec<Value>) -> Option<(HandshakePhase, CallReply)> {
        let Some(sink) = self.pending.remove(token) else {
            warn!("Registry: {}", UsherError::CallbackNotFound(token.to_string()));
            return None;
        };

        let reply = wire::split_reply(arguments);
        match sink {
            ReplySink::Caller(tx) => {
                // Receiver may already be gone; nothing to deliver to then
                let _ = tx.send(reply);
                None
            }
            ReplySink::Handshake(phase) => Some((phase, reply)),
        }
    }

    /// Fail every pending callback with the given error and clear the map
    pub fn fail_all(&mut self, error: UsherError) {
        for (_, sink) in self.pending.drain() {
            if let ReplySink::Caller(tx) = sink {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    /// Number of callbacks still awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
