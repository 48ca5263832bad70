//! WebSocket transport
//!
//! tungstenite-backed implementation of the transport seam. The connector
//! derives its ws:// URL from the client config and the fetched transport
//! spec; each connect opens a fresh stream split into sink and source
//! halves. Binary frames are accepted when they hold valid UTF-8, pings
//! are answered inline, and close frames or read errors surface as a
//! single `Closed` event.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Connector, Transport, TransportEvent, TransportSpec};
use crate::config::ClientConfig;
use crate::types::{Result, UsherError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket transports for a fixed URL
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Create a connector dialing the given ws:// or wss:// URL
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Derive the connector from the client config and the fetched spec
    ///
    /// The spec's `pathname` wins over the configured one when present.
    pub fn from_spec(config: &ClientConfig, spec: &TransportSpec) -> Self {
        let pathname = spec.pathname.as_deref().unwrap_or(&config.pathname);
        Self::new(websocket_url(&config.url, pathname))
    }

    /// URL this connector dials
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        info!("Transport: connecting to {}", self.url);
        let (stream, _) = connect_async(self.url.as_str()).await?;
        let (sink, source) = stream.split();
        Ok(Box::new(WsTransport { sink, source }))
    }
}

/// A live tungstenite connection
struct WsTransport {
    sink: SplitSink<WsStream, Message>,
    source: SplitStream<WsStream>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, payload: String) -> Result<()> {
        self.sink
            .send(Message::Text(payload))
            .await
            .map_err(UsherError::from)
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        while let Some(result) = self.source.next().await {
            match result {
                Ok(Message::Text(text)) => return Some(TransportEvent::Data(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(TransportEvent::Data(text)),
                    Err(_) => debug!("Transport: dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Ping(data)) => {
                    let _ = self.sink.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(frame)) => {
                    debug!("Transport: peer closed: {:?}", frame);
                    return Some(TransportEvent::Closed);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Transport: read error: {}", e);
                    return Some(TransportEvent::Closed);
                }
            }
        }
        Some(TransportEvent::Closed)
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

/// Build the ws:// URL for a base HTTP URL and mount path
///
/// Swaps the scheme and joins the path with exactly one separating slash.
fn websocket_url(base: &str, pathname: &str) -> String {
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };

    let mut url = base;
    if !url.ends_with('/') {
        url.push('/');
    }
    url.push_str(pathname.strip_prefix('/').unwrap_or(pathname));
    url
}
