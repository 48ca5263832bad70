//! Transport seam
//!
//! The session drives connection lifecycle through these traits; the wire
//! mechanics (framing, TLS, upgrade headers) stay behind them. Production
//! uses the tungstenite implementation in `ws`; tests use channel-backed
//! fakes. A transport is single-use: the session opens a fresh one per
//! connection generation and drops the old one, so late data from a dead
//! transport can never reach the new session state.

mod spec;
mod ws;

pub use spec::{fetch_transport_spec, TransportSpec};
pub use ws::WsConnector;

use async_trait::async_trait;

use crate::types::Result;

/// Event surfaced by a live transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A text payload arrived
    Data(String),
    /// The transport closed (peer close, read error, or end of stream)
    Closed,
}

/// A live bidirectional connection
#[async_trait]
pub trait Transport: Send {
    /// Write one text payload to the peer
    async fn send(&mut self, payload: String) -> Result<()>;

    /// Wait for the next inbound event
    ///
    /// Keeps returning `Closed` once the connection is gone.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Gracefully end the connection
    async fn close(&mut self) {}
}

/// Opens transports for the session
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh transport
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}
