//! Client handle
//!
//! Cheap-clone facade over the session task. Every operation is a message
//! send into the session's command channel; state observation goes through
//! watch channels. Dropping the last handle (and the last subscription)
//! shuts the session down.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::error;

use crate::config::ClientConfig;
use crate::registry::CallReply;
use crate::session::{AuthOutcome, Command, Session};
use crate::transport::{fetch_transport_spec, Connector, WsConnector};
use crate::types::{ConnectionState, Result, UserIdentity, UsherError};

/// Handle to a running client session
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    auth_rx: watch::Receiver<Option<AuthOutcome>>,
}

impl Client {
    /// Fetch transport options and start a session against the service
    ///
    /// A transfer error on the spec fetch is logged and returned; no
    /// connection is opened in that case.
    pub async fn connect(config: ClientConfig) -> Result<Client> {
        let spec = match fetch_transport_spec(&config).await {
            Ok(spec) => spec,
            Err(e) => {
                error!("Client: could not fetch socket information: {}", e);
                return Err(e);
            }
        };
        let connector = WsConnector::from_spec(&config, &spec);
        Ok(Self::connect_with(config, Box::new(connector)))
    }

    /// Start a session over a custom connector, skipping the spec fetch
    pub fn connect_with(config: ClientConfig, connector: Box<dyn Connector>) -> Client {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (auth_tx, auth_rx) = watch::channel(None);

        let session = Session::new(config, connector, command_rx, state_tx, auth_tx);
        tokio::spawn(session.run());

        Client {
            commands,
            state_rx,
            auth_rx,
        }
    }

    /// Fire-and-forget call
    ///
    /// While unauthenticated the call is deferred, not dropped; it goes
    /// out in order once authentication succeeds.
    pub fn call(&self, method: impl Into<String>, args: Vec<Value>) {
        let _ = self.commands.send(Command::Call {
            method: method.into(),
            args,
            reply: None,
        });
    }

    /// Correlated call: the returned handle resolves exactly once
    ///
    /// There is no built-in timeout - a call deferred by authentication
    /// waits indefinitely. Wrap in `tokio::time::timeout` if needed.
    pub fn call_with_reply(&self, method: impl Into<String>, args: Vec<Value>) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Call {
            method: method.into(),
            args,
            reply: Some(tx),
        });
        PendingReply { rx }
    }

    /// Subscribe to a named broadcast channel
    ///
    /// Events on channels other than `"ready"` are only delivered while
    /// the session is authenticated.
    pub async fn subscribe(&self, channel: impl Into<String>) -> Subscription {
        let channel = channel.into();
        let (tx, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Subscribe {
            channel: channel.clone(),
            reply: tx,
        });

        match rx.await {
            Ok((id, events)) => Subscription {
                channel,
                id,
                events,
                commands: self.commands.clone(),
            },
            Err(_) => {
                // Session is gone; hand back a subscription that yields
                // nothing rather than failing the caller.
                let (_tx, events) = mpsc::unbounded_channel();
                Subscription {
                    channel,
                    id: 0,
                    events,
                    commands: self.commands.clone(),
                }
            }
        }
    }

    /// Tear down the connection; no-op unless authenticated
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Discard the current transport (if any) and dial a fresh one
    ///
    /// Outstanding callbacks on the old transport fail with
    /// `ConnectionReset`; they are never carried across generations.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch lifecycle state transitions
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait for the authentication outcome of the current connection
    /// attempt
    ///
    /// Resolves `Ok` with the server-assigned user identity, or
    /// `Err(Authentication)` if the server rejected the credentials.
    pub async fn wait_authenticated(&self) -> Result<UserIdentity> {
        let mut rx = self.auth_rx.clone();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(UsherError::ConnectionReset);
            }
        }
    }
}

/// A correlated reply that resolves exactly once
pub struct PendingReply {
    rx: oneshot::Receiver<CallReply>,
}

impl PendingReply {
    /// Wait for the reply
    ///
    /// Resolves with the call's result arguments, the remote error, or
    /// `ConnectionReset` if the connection is torn down first.
    pub async fn await_reply(self) -> Result<Vec<Value>> {
        match self.rx.await {
            Ok(reply) => reply,
            Err(_) => Err(UsherError::ConnectionReset),
        }
    }
}

/// Live subscription to a broadcast channel
pub struct Subscription {
    channel: String,
    id: u64,
    events: mpsc::UnboundedReceiver<Value>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    /// Channel name this subscription listens on
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next event payload; `None` once the session is gone
    pub async fn next(&mut self) -> Option<Value> {
        self.events.recv().await
    }

    /// Remove this subscriber from the channel
    pub fn unsubscribe(self) {
        let Subscription {
            channel,
            id,
            commands,
            ..
        } = self;
        let _ = commands.send(Command::Unsubscribe { channel, id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockConnector, MockWire};
    use serde_json::json;
    use std::time::Duration;

    fn test_config() -> ClientConfig {
        ClientConfig::new()
            .with_url("http://localhost:9999")
            .with_credentials("marla", "hunter2")
    }

    async fn start() -> (Client, MockWire) {
        let (connector, wire) = MockConnector::new();
        let client = Client::connect_with(test_config(), Box::new(connector));
        (client, wire)
    }

    async fn wait_for_state(client: &Client, state: ConnectionState) {
        let mut rx = client.state_watch();
        rx.wait_for(|s| *s == state).await.expect("session alive");
    }

    /// Drive the full handshake: server ready event, ready ack, auth ack
    async fn authenticate(wire: &mut MockWire) {
        wire.send_json(json!({"channel": "ready", "data": null}));

        let envelope = wire.recv_envelope().await;
        assert_eq!(envelope["method"], "ready");
        assert!(envelope.get("arguments").is_none());
        let token = envelope["callback"].as_str().unwrap().to_string();
        wire.send_json(json!({"callback": token, "arguments": [null]}));

        let envelope = wire.recv_envelope().await;
        assert_eq!(envelope["method"], "user.authenticate");
        assert_eq!(envelope["arguments"][0]["username"], "marla");
        assert_eq!(envelope["arguments"][0]["password"], "hunter2");
        let token = envelope["callback"].as_str().unwrap().to_string();
        wire.send_json(json!({
            "callback": token,
            "arguments": [null, {"user": {"id": 1}}],
        }));
    }

    #[tokio::test]
    async fn test_pre_auth_calls_flush_in_order_after_auth() {
        let (client, mut wire) = start().await;

        // Issued before authentication: deferred, not dropped
        let reply = client.call_with_reply("echo", vec![json!("hi")]);
        client.call("vote.cast", vec![json!({"movie": "Alien"})]);
        client.call("ping", Vec::new());

        authenticate(&mut wire).await;
        assert_eq!(client.wait_authenticated().await.unwrap(), json!({"id": 1}));

        // Flushed in insertion order, arguments preserved exactly
        let envelope = wire.recv_envelope().await;
        assert_eq!(
            envelope,
            json!({"method": "echo", "arguments": ["hi"], "callback": "cb_0"})
        );
        let envelope = wire.recv_envelope().await;
        assert_eq!(
            envelope,
            json!({"method": "vote.cast", "arguments": [{"movie": "Alien"}]})
        );
        let envelope = wire.recv_envelope().await;
        assert_eq!(envelope, json!({"method": "ping"}));

        // Reply resolves the deferred callback
        wire.send_json(json!({"callback": "cb_0", "arguments": [null, "hi"]}));
        assert_eq!(reply.await_reply().await.unwrap(), vec![json!("hi")]);
    }

    #[tokio::test]
    async fn test_post_auth_calls_pass_straight_through() {
        let (client, mut wire) = start().await;
        authenticate(&mut wire).await;
        wait_for_state(&client, ConnectionState::Authenticated).await;

        let reply = client.call_with_reply("chat.send", vec![json!("hello")]);
        let envelope = wire.recv_envelope().await;
        assert_eq!(
            envelope,
            json!({"method": "chat.send", "arguments": ["hello"], "callback": "cb_0"})
        );

        wire.send_json(json!({"callback": "cb_0", "arguments": [null, "ok", 2]}));
        assert_eq!(reply.await_reply().await.unwrap(), vec![json!("ok"), json!(2)]);
    }

    #[tokio::test]
    async fn test_remote_error_reply_resolves_as_error() {
        let (client, mut wire) = start().await;
        authenticate(&mut wire).await;
        wait_for_state(&client, ConnectionState::Authenticated).await;

        let reply = client.call_with_reply("vote.cast", vec![json!("nope")]);
        let envelope = wire.recv_envelope().await;
        let token = envelope["callback"].as_str().unwrap().to_string();
        wire.send_json(json!({"callback": token, "arguments": ["not allowed"]}));

        match reply.await_reply().await {
            Err(UsherError::RemoteCall(message)) => assert_eq!(message, "not allowed"),
            other => panic!("expected RemoteCall, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_callback_token_is_inert() {
        let (client, mut wire) = start().await;
        authenticate(&mut wire).await;
        wait_for_state(&client, ConnectionState::Authenticated).await;

        let reply = client.call_with_reply("echo", vec![json!(1)]);
        let envelope = wire.recv_envelope().await;
        let token = envelope["callback"].as_str().unwrap().to_string();

        // A reply for a token that was never issued must not throw and
        // must not affect the pending callback.
        wire.send_json(json!({"callback": "cb_999", "arguments": [null, "stray"]}));
        wire.send_json(json!({"callback": token, "arguments": [null, "real"]}));

        assert_eq!(reply.await_reply().await.unwrap(), vec![json!("real")]);
    }

    #[tokio::test]
    async fn test_channel_events_gated_until_authenticated() {
        let (client, mut wire) = start().await;
        let mut chat = client.subscribe("chat").await;

        // Before authentication: dropped at the access-control boundary
        wire.send_json(json!({"channel": "chat", "data": "early"}));

        authenticate(&mut wire).await;
        wait_for_state(&client, ConnectionState::Authenticated).await;

        // Same event after authentication: delivered with the exact payload
        wire.send_json(json!({"channel": "chat", "data": "late"}));
        assert_eq!(chat.next().await.unwrap(), json!("late"));
    }

    #[tokio::test]
    async fn test_ready_channel_bypasses_auth_gate() {
        let (client, mut wire) = start().await;
        let mut ready = client.subscribe("ready").await;

        wire.send_json(json!({"channel": "ready", "data": {"version": 3}}));
        assert_eq!(ready.next().await.unwrap(), json!({"version": 3}));

        // The same event also started the handshake
        let envelope = wire.recv_envelope().await;
        assert_eq!(envelope["method"], "ready");
    }

    #[tokio::test]
    async fn test_double_encoded_payload_equivalent_to_single() {
        let (client, mut wire) = start().await;
        authenticate(&mut wire).await;
        wait_for_state(&client, ConnectionState::Authenticated).await;

        let mut chat = client.subscribe("chat").await;

        // One event single-encoded, the identical one double-encoded
        let event = json!({"channel": "chat", "data": {"n": 1}});
        wire.send_raw(&event.to_string());
        wire.send_raw(&serde_json::to_string(&event.to_string()).unwrap());

        assert_eq!(chat.next().await.unwrap(), json!({"n": 1}));
        assert_eq!(chat.next().await.unwrap(), json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_dropped() {
        let (client, mut wire) = start().await;
        authenticate(&mut wire).await;
        wait_for_state(&client, ConnectionState::Authenticated).await;

        wire.send_raw("not json at all");
        wire.send_raw("42");

        // Session is still healthy afterwards
        let reply = client.call_with_reply("echo", Vec::new());
        let envelope = wire.recv_envelope().await;
        let token = envelope["callback"].as_str().unwrap().to_string();
        wire.send_json(json!({"callback": token, "arguments": [null, "alive"]}));
        assert_eq!(reply.await_reply().await.unwrap(), vec![json!("alive")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_retry_bounded_then_abandoned() {
        let (client, mut wire) = start().await;
        wire.send_json(json!({"channel": "ready", "data": null}));

        // Initial attempt plus five retries, every one rejected
        for _ in 0..6 {
            let envelope = wire.recv_envelope().await;
            assert_eq!(envelope["method"], "ready");
            let token = envelope["callback"].as_str().unwrap().to_string();
            wire.send_json(json!({"callback": token, "arguments": ["busy"]}));
        }

        // Exhausted: no further automatic attempt is scheduled
        let silent = tokio::time::timeout(Duration::from_secs(30), wire.from_client.recv()).await;
        assert!(silent.is_err(), "no seventh ready attempt expected");
        assert_eq!(client.state(), ConnectionState::TransportOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_retry_succeeds_midway() {
        let (client, mut wire) = start().await;
        wire.send_json(json!({"channel": "ready", "data": null}));

        // Two failures, then the third attempt is accepted
        for _ in 0..2 {
            let envelope = wire.recv_envelope().await;
            let token = envelope["callback"].as_str().unwrap().to_string();
            wire.send_json(json!({"callback": token, "arguments": ["busy"]}));
        }
        let envelope = wire.recv_envelope().await;
        assert_eq!(envelope["method"], "ready");
        let token = envelope["callback"].as_str().unwrap().to_string();
        wire.send_json(json!({"callback": token, "arguments": [null]}));

        // Handshake proceeds to authentication
        let envelope = wire.recv_envelope().await;
        assert_eq!(envelope["method"], "user.authenticate");
        wait_for_state(&client, ConnectionState::Ready).await;
    }

    #[tokio::test]
    async fn test_auth_failure_is_reported_not_fatal() {
        let (client, mut wire) = start().await;
        wire.send_json(json!({"channel": "ready", "data": null}));

        let envelope = wire.recv_envelope().await;
        let token = envelope["callback"].as_str().unwrap().to_string();
        wire.send_json(json!({"callback": token, "arguments": [null]}));

        let envelope = wire.recv_envelope().await;
        assert_eq!(envelope["method"], "user.authenticate");
        let token = envelope["callback"].as_str().unwrap().to_string();
        wire.send_json(json!({"callback": token, "arguments": ["bad credentials"]}));

        match client.wait_authenticated().await {
            Err(UsherError::Authentication(reason)) => assert_eq!(reason, "bad credentials"),
            other => panic!("expected Authentication, got {:?}", other),
        }
        // The session survives; no retry was issued
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_reconnect_fails_outstanding_callbacks() {
        let (connector, mut wires) = MockConnector::with_generations(2);
        let mut first = wires.remove(0);
        let mut second = wires.remove(0);
        let client = Client::connect_with(test_config(), Box::new(connector));

        authenticate(&mut first).await;
        wait_for_state(&client, ConnectionState::Authenticated).await;

        let reply = client.call_with_reply("slow.call", Vec::new());
        first.recv_envelope().await;

        // Reconnect discards the old generation
        client.reconnect();
        match reply.await_reply().await {
            Err(UsherError::ConnectionReset) => {}
            other => panic!("expected ConnectionReset, got {:?}", other),
        }

        // The new generation handshakes from scratch
        wait_for_state(&client, ConnectionState::TransportOpen).await;
        authenticate(&mut second).await;
        wait_for_state(&client, ConnectionState::Authenticated).await;
    }

    #[tokio::test]
    async fn test_disconnect_noop_unless_authenticated() {
        let (client, mut wire) = start().await;
        wait_for_state(&client, ConnectionState::TransportOpen).await;

        // Ignored before authentication: the handshake still succeeds on
        // the same transport afterwards. The subscribe round-trip pins the
        // disconnect ahead of the handshake in the command order.
        client.disconnect();
        let _sync = client.subscribe("sync").await;
        authenticate(&mut wire).await;
        wait_for_state(&client, ConnectionState::Authenticated).await;

        // Honored once authenticated
        client.disconnect();
        wait_for_state(&client, ConnectionState::Disconnected).await;
    }

    #[tokio::test]
    async fn test_transport_close_resets_session() {
        let (client, mut wire) = start().await;
        authenticate(&mut wire).await;
        wait_for_state(&client, ConnectionState::Authenticated).await;

        let reply = client.call_with_reply("echo", Vec::new());
        wire.recv_envelope().await;

        wire.close();
        wait_for_state(&client, ConnectionState::Disconnected).await;
        match reply.await_reply().await {
            Err(UsherError::ConnectionReset) => {}
            other => panic!("expected ConnectionReset, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_events() {
        let (client, mut wire) = start().await;
        authenticate(&mut wire).await;
        wait_for_state(&client, ConnectionState::Authenticated).await;

        let chat = client.subscribe("chat").await;
        let mut votes = client.subscribe("votes").await;
        chat.unsubscribe();

        // Round-trip through the session so the unsubscribe has landed
        let mut still = client.subscribe("chat").await;

        wire.send_json(json!({"channel": "chat", "data": "a"}));
        wire.send_json(json!({"channel": "votes", "data": "b"}));

        assert_eq!(votes.next().await.unwrap(), json!("b"));
        assert_eq!(still.next().await.unwrap(), json!("a"));
    }
}
