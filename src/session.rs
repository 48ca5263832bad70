//! Connection session
//!
//! The single task that owns all connection state: the lifecycle state
//! machine, the handshake controller, the call dispatcher, and inbound
//! routing. Commands arrive on an mpsc channel from the `Client` handle;
//! everything else happens on transport events and the handshake retry
//! timer. One task, no locks - transitions are strictly ordered by the
//! select loop.
//!
//! Handshake sequence, driven by the server's `ready` channel event:
//! `TransportOpen -> ready call -> Ready -> user.authenticate ->
//! Authenticated`, then the deferred call queue flushes exactly once.
//! A failed `ready` call is retried up to `max_retries` times with a
//! fixed delay, then abandoned until a new connection attempt. A failed
//! authentication is reported through the completion channel and is not
//! retried.

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channels::{ChannelRegistry, READY_CHANNEL};
use crate::config::ClientConfig;
use crate::queue::{CallQueue, QueuedCall};
use crate::registry::{
    CallbackRegistry, CallReply, HandshakePhase, ReplySink, AUTH_TOKEN, READY_TOKEN,
};
use crate::transport::{Connector, Transport, TransportEvent};
use crate::types::{ConnectionState, Result, UserIdentity, UsherError};
use crate::wire::{Envelope, InboundMessage};

/// Commands accepted by the session task
pub(crate) enum Command {
    /// Issue a call, deferred while unauthenticated
    Call {
        method: String,
        args: Vec<Value>,
        reply: Option<oneshot::Sender<CallReply>>,
    },
    /// Register a channel subscriber
    Subscribe {
        channel: String,
        reply: oneshot::Sender<(u64, mpsc::UnboundedReceiver<Value>)>,
    },
    /// Remove a channel subscriber
    Unsubscribe { channel: String, id: u64 },
    /// Discard the current transport and dial a fresh one
    Connect,
    /// Tear down the connection; no-op unless authenticated
    Disconnect,
}

/// Authentication outcome published on the completion channel
pub(crate) type AuthOutcome = Result<UserIdentity>;

/// Handshake progress within the current transport generation
enum Handshake {
    Idle,
    AwaitingReady,
    AwaitingAuth,
}

/// The session task state
pub(crate) struct Session {
    config: ClientConfig,
    connector: Box<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    auth_tx: watch::Sender<Option<AuthOutcome>>,

    transport: Option<Box<dyn Transport>>,
    registry: CallbackRegistry,
    queue: CallQueue,
    channels: ChannelRegistry,

    handshake: Handshake,
    retry_count: u32,
    retry_at: Option<Instant>,
}

impl Session {
    pub(crate) fn new(
        config: ClientConfig,
        connector: Box<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        auth_tx: watch::Sender<Option<AuthOutcome>>,
    ) -> Self {
        Self {
            config,
            connector,
            commands,
            state_tx,
            auth_tx,
            transport: None,
            registry: CallbackRegistry::new(),
            queue: CallQueue::new(),
            channels: ChannelRegistry::new(),
            handshake: Handshake::Idle,
            retry_count: 0,
            retry_at: None,
        }
    }

    /// Run the session until every client handle is gone
    pub(crate) async fn run(mut self) {
        self.connect().await;

        loop {
            tokio::select! {
                maybe_cmd = self.commands.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        // All handles dropped
                        None => break,
                    }
                }
                event = Self::next_transport_event(&mut self.transport) => {
                    self.handle_transport_event(event).await;
                }
                _ = Self::wait_until(self.retry_at) => {
                    self.retry_at = None;
                    self.send_ready_call().await;
                }
            }
        }

        self.teardown().await;
    }

    /// Next event from the live transport; parked while disconnected
    async fn next_transport_event(transport: &mut Option<Box<dyn Transport>>) -> TransportEvent {
        match transport.as_mut() {
            Some(transport) => transport
                .next_event()
                .await
                .unwrap_or(TransportEvent::Closed),
            None => std::future::pending().await,
        }
    }

    /// Sleep until the retry deadline; parked while no retry is pending
    async fn wait_until(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Replace any existing transport with a freshly dialed one
    ///
    /// The old generation is dead the moment it is taken: its event stream
    /// is dropped, so late data can never reach the new session state, and
    /// its outstanding callbacks fail with `ConnectionReset`.
    async fn connect(&mut self) {
        if let Some(mut old) = self.transport.take() {
            old.close().await;
            self.registry.fail_all(UsherError::ConnectionReset);
        }
        self.mark_offline();

        info!("Session: connecting to {}", self.config.url);
        match self.connector.connect().await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.set_state(ConnectionState::TransportOpen);
            }
            Err(e) => {
                warn!("Session: connect failed: {}", e);
            }
        }
    }

    /// End the transport and reset session flags
    async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.registry.fail_all(UsherError::ConnectionReset);
        self.mark_offline();
    }

    /// Converge to the offline state
    ///
    /// Explicit close and transport-initiated close both land here. The
    /// cached user identity (the last published auth outcome) is cleared.
    fn mark_offline(&mut self) {
        self.handshake = Handshake::Idle;
        self.retry_at = None;
        let _ = self.auth_tx.send(None);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Final teardown once every handle is gone
    async fn teardown(&mut self) {
        debug!("Session: all handles dropped, shutting down");
        self.close().await;
        for call in self.queue.drain() {
            if let Some(ReplySink::Caller(tx)) = call.sink {
                let _ = tx.send(Err(UsherError::ConnectionReset));
            }
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        if self.state() != state {
            debug!("Session: state -> {:?}", state);
            let _ = self.state_tx.send(state);
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Call { method, args, reply } => {
                self.call(method, args, reply.map(ReplySink::Caller)).await;
            }
            Command::Subscribe { channel, reply } => {
                let (id, rx) = self.channels.subscribe(&channel);
                let _ = reply.send((id, rx));
            }
            Command::Unsubscribe { channel, id } => {
                self.channels.unsubscribe(&channel, id);
            }
            Command::Connect => self.connect().await,
            Command::Disconnect => {
                if self.state() == ConnectionState::Authenticated {
                    self.close().await;
                } else {
                    debug!("Session: disconnect ignored, not authenticated");
                }
            }
        }
    }

    // =========================================================================
    // Call dispatch
    // =========================================================================

    /// Public call surface: defer until authenticated, else dispatch now
    async fn call(&mut self, method: String, args: Vec<Value>, sink: Option<ReplySink>) {
        if self.state() == ConnectionState::Authenticated {
            self.dispatch(method, args, sink).await;
        } else {
            debug!("Session: deferring call to {} until authenticated", method);
            self.queue.push(QueuedCall { method, args, sink });
        }
    }

    /// Encode one call envelope and write it to the transport
    async fn dispatch(&mut self, method: String, args: Vec<Value>, sink: Option<ReplySink>) {
        let callback = match sink {
            Some(ReplySink::Handshake(phase)) => {
                let token = match phase {
                    HandshakePhase::Ready => READY_TOKEN,
                    HandshakePhase::Authenticate => AUTH_TOKEN,
                };
                self.registry.store_reserved(token, ReplySink::Handshake(phase));
                Some(token.to_string())
            }
            Some(sink @ ReplySink::Caller(_)) => Some(self.registry.store(sink)),
            None => None,
        };

        let envelope = Envelope::new(method, args, callback);
        let payload = match envelope.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Session: failed to encode {}: {}", envelope.method, e);
                return;
            }
        };

        let Some(transport) = self.transport.as_mut() else {
            debug!("Session: no live transport, dropping {}", envelope.method);
            return;
        };
        if let Err(e) = transport.send(payload).await {
            warn!("Session: write failed: {}", e);
        }
    }

    /// Replay deferred calls in insertion order
    ///
    /// Runs exactly once per successful authentication.
    async fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        info!("Session: flushing {} deferred call(s)", self.queue.len());
        for call in self.queue.drain() {
            self.dispatch(call.method, call.args, call.sink).await;
        }
    }

    // =========================================================================
    // Inbound routing
    // =========================================================================

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Data(raw) => self.route(InboundMessage::decode(&raw)).await,
            TransportEvent::Closed => {
                info!(
                    "Session: transport closed, failing {} pending callback(s)",
                    self.registry.pending_count()
                );
                self.transport = None;
                self.registry.fail_all(UsherError::ConnectionReset);
                self.mark_offline();
            }
        }
    }

    async fn route(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::CallbackReply { token, arguments } => {
                if let Some((phase, reply)) = self.registry.complete(&token, arguments) {
                    self.advance_handshake(phase, reply).await;
                }
            }
            InboundMessage::ChannelEvent { channel, data } => {
                // Only the reserved ready channel is delivered before
                // authentication; everything else is access-gated.
                if channel == READY_CHANNEL || self.state() == ConnectionState::Authenticated {
                    self.channels.dispatch(&channel, &data);
                } else {
                    debug!("Session: dropping pre-auth event on channel {}", channel);
                    return;
                }
                if channel == READY_CHANNEL {
                    self.begin_handshake().await;
                }
            }
            InboundMessage::Malformed => debug!("Session: dropping malformed payload"),
        }
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    /// React to the server's ready announcement
    async fn begin_handshake(&mut self) {
        if self.state() != ConnectionState::TransportOpen
            || !matches!(self.handshake, Handshake::Idle)
        {
            return;
        }
        info!("Session: server is ready");
        self.send_ready_call().await;
    }

    /// Issue the `ready` call; its reply drives the next handshake step
    async fn send_ready_call(&mut self) {
        if self.transport.is_none() {
            // Closed while a retry was pending
            return;
        }
        self.handshake = Handshake::AwaitingReady;
        self.dispatch(
            "ready".to_string(),
            Vec::new(),
            Some(ReplySink::Handshake(HandshakePhase::Ready)),
        )
        .await;
    }

    /// Issue `user.authenticate` with the configured credentials
    async fn send_authenticate(&mut self) {
        info!("Session: authenticating as {}", self.config.username);
        self.handshake = Handshake::AwaitingAuth;
        let credentials = json!({
            "username": self.config.username,
            "password": self.config.password,
        });
        self.dispatch(
            "user.authenticate".to_string(),
            vec![credentials],
            Some(ReplySink::Handshake(HandshakePhase::Authenticate)),
        )
        .await;
    }

    async fn advance_handshake(&mut self, phase: HandshakePhase, reply: CallReply) {
        match phase {
            HandshakePhase::Ready => match reply {
                Ok(_) => {
                    info!("Session: ready acknowledged");
                    self.retry_count = 0;
                    self.set_state(ConnectionState::Ready);
                    self.send_authenticate().await;
                }
                Err(e) => self.schedule_ready_retry(e),
            },
            HandshakePhase::Authenticate => match reply {
                Ok(results) => {
                    // Reply shape: (null, { user: {...} })
                    let user = results
                        .into_iter()
                        .next()
                        .and_then(|data| data.get("user").cloned())
                        .unwrap_or(Value::Null);
                    info!("Session: authenticated");
                    self.handshake = Handshake::Idle;
                    self.set_state(ConnectionState::Authenticated);
                    let _ = self.auth_tx.send(Some(Ok(user)));
                    self.flush_queue().await;
                }
                Err(e) => {
                    let reason = match e {
                        UsherError::RemoteCall(message) => message,
                        other => other.to_string(),
                    };
                    let error = UsherError::Authentication(reason);
                    warn!("Session: {}", error);
                    self.handshake = Handshake::Idle;
                    let _ = self.auth_tx.send(Some(Err(error)));
                }
            },
        }
    }

    /// Bounded retry with a fixed delay; abandoned silently on exhaustion
    fn schedule_ready_retry(&mut self, error: UsherError) {
        self.handshake = Handshake::Idle;
        if self.retry_count < self.config.max_retries {
            self.retry_count += 1;
            warn!(
                "Session: ready call failed ({}), retry {}/{} in {}ms",
                error, self.retry_count, self.config.max_retries, self.config.retry_timeout_ms
            );
            self.retry_at = Some(Instant::now() + self.config.retry_timeout());
        } else {
            // No surfaced error; a fresh connection attempt starts over
            warn!(
                "Session: ready handshake abandoned after {} retries",
                self.retry_count
            );
            self.retry_count = 0;
        }
    }
}
