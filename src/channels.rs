//! Channel event subscriptions
//!
//! Named broadcast topics for server-pushed events, independent of
//! call/response correlation. The registry is owned by the session task
//! and destroyed with it; each subscriber holds the receiving end of an
//! unbounded channel plus an id it can unsubscribe with. Senders whose
//! receiver has been dropped are pruned on the next dispatch.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Reserved channel the server announces readiness on
///
/// Events on this channel bypass the authentication gate and trigger the
/// handshake.
pub const READY_CHANNEL: &str = "ready";

struct ChannelSub {
    id: u64,
    tx: mpsc::UnboundedSender<Value>,
}

/// Per-session subscriber registry keyed by channel name
#[derive(Default)]
pub struct ChannelRegistry {
    subscribers: HashMap<String, Vec<ChannelSub>>,
    next_id: u64,
}

impl ChannelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; returns its id and the event receiver
    pub fn subscribe(&mut self, channel: &str) -> (u64, mpsc::UnboundedReceiver<Value>) {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .entry(channel.to_string())
            .or_default()
            .push(ChannelSub { id, tx });

        (id, rx)
    }

    /// Remove one subscriber from a channel
    pub fn unsubscribe(&mut self, channel: &str, id: u64) {
        if let Some(subs) = self.subscribers.get_mut(channel) {
            subs.retain(|sub| sub.id != id);
            if subs.is_empty() {
                self.subscribers.remove(channel);
            }
        }
    }

    /// Deliver a payload to every subscriber of a channel
    ///
    /// Subscribers whose receiver has been dropped are pruned here.
    pub fn dispatch(&mut self, channel: &str, data: &Value) {
        let Some(subs) = self.subscribers.get_mut(channel) else {
            debug!("Channels: no subscribers for {}", channel);
            return;
        };

        subs.retain(|sub| sub.tx.send(data.clone()).is_ok());
        if subs.is_empty() {
            self.subscribers.remove(channel);
        }
    }

    /// Number of live subscribers on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers.get(channel).map_or(0, Vec::len)
    }
}
