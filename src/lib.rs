//! Usher - persistent RPC client for the Trees Movie Night socket service
//!
//! One bidirectional WebSocket session per client: a two-phase handshake
//! (server ready acknowledgment, then credential authentication) followed
//! by correlated request/response calls and broadcast channel events over
//! the same connection.
//!
//! ## Flow
//!
//! - Transport options are fetched once from `<url>/<pathname>/spec`
//! - The session dials the socket and waits for the server's `ready` event
//! - A `ready` call is acknowledged (with bounded, fixed-delay retry),
//!   then `user.authenticate` is sent with the configured credentials
//! - Calls issued before authentication are deferred, never dropped, and
//!   flush in insertion order the moment authentication succeeds
//! - Inbound payloads route either to the callback that produced them or
//!   to the subscribers of a named channel
//!
//! Events on channels other than the reserved `"ready"` channel are only
//! delivered while the session is authenticated.

mod client;
mod session;

pub mod channels;
pub mod config;
pub mod queue;
pub mod registry;
pub mod transport;
pub mod types;
pub mod wire;

pub use channels::READY_CHANNEL;
pub use client::{Client, PendingReply, Subscription};
pub use config::ClientConfig;
pub use types::{ConnectionState, Result, UserIdentity, UsherError};
