#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt as _, StreamExt as _};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, sleep_until};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::bus::{MessageBus, MessageSubscription, StatusBus, StatusSubscription};
use super::codec::{JsonCodec, MessageEnvelope};
use super::config::Config;
use super::error::WsError;
use super::reconnect::ReconnectPolicy;
use super::traits::FrameCodec;
use crate::error::{Error, Kind};
use crate::Result;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport is open
    Disconnected,
    /// A transport is being opened
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Requests from [`ConnectionManager`] handles to the driver task.
#[derive(Debug)]
enum Command {
    Connect(String),
    Send(String),
    Close,
}

/// What a session task reports back to the driver.
#[derive(Debug)]
enum SessionEvent {
    Opened,
    Frame(MessageEnvelope),
    Closed(WsError),
}

/// A [`SessionEvent`] tagged with the epoch of the session that produced it.
#[derive(Debug)]
struct Event {
    epoch: u64,
    kind: SessionEvent,
}

/// The driver's handle on the live transport.
///
/// Dropping it closes the outbound channel, which tells the session task to send a
/// close frame and exit.
#[derive(Debug)]
struct Session {
    epoch: u64,
    outbound: mpsc::UnboundedSender<String>,
}

/// Manages a single WebSocket connection: opening, closing, reconnecting, and
/// fanning inbound frames out to subscribers.
///
/// All operations return immediately. Their effects are observed through
/// [`messages`](Self::messages), [`status`](Self::status) and
/// [`state_receiver`](Self::state_receiver). Transport failures never surface as
/// errors from `connect` or `close`; they show up as status changes and log lines.
///
/// Handles are cheap to clone and share one connection. When the last handle is
/// dropped, the background driver closes the transport and exits.
///
/// # Example
///
/// ```rust, no_run
/// use socket_relay::ws::{ConnectionManager, MessageEnvelope};
/// use socket_relay::ws::config::Config;
/// use serde_json::json;
///
/// # async fn example() -> socket_relay::Result<()> {
/// let manager = ConnectionManager::new(Config::default())?;
/// let mut messages = manager.messages();
/// let mut status = manager.status();
///
/// manager.connect("wss://echo.example/raw");
///
/// while let Some(connected) = status.recv().await {
///     if connected {
///         break;
///     }
/// }
///
/// manager.send(&MessageEnvelope::new("greeting", json!({ "text": "hello" })))?;
///
/// if let Some(Ok(envelope)) = messages.recv().await {
///     println!("{}: {}", envelope.msg_type(), envelope.payload());
/// }
///
/// manager.close();
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager<C: FrameCodec = JsonCodec> {
    /// Commands for the driver task
    commands: mpsc::UnboundedSender<Command>,
    /// Current connection state, written only by the driver
    state_rx: watch::Receiver<ConnectionState>,
    /// URL the driver is connected or reconnecting to
    target_rx: watch::Receiver<Option<String>>,
    /// Broadcast of decoded inbound messages
    messages: MessageBus,
    /// Broadcast of the boolean connected status
    status: Arc<StatusBus>,
    /// Codec used to encode outbound envelopes
    codec: Arc<C>,
}

impl<C: FrameCodec> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            state_rx: self.state_rx.clone(),
            target_rx: self.target_rx.clone(),
            messages: self.messages.clone(),
            status: Arc::clone(&self.status),
            codec: Arc::clone(&self.codec),
        }
    }
}

impl<C: FrameCodec> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.state_rx.borrow())
            .field("target", &*self.target_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager<JsonCodec> {
    /// Create a manager using the default [`JsonCodec`].
    ///
    /// Must be called from within a tokio runtime; the driver task is spawned on it.
    /// No connection is opened until [`connect`](Self::connect) is called.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_codec(config, JsonCodec::default())
    }
}

impl<C: FrameCodec> ConnectionManager<C> {
    /// Create a manager with a custom frame codec.
    ///
    /// Fails when called outside a tokio runtime or when `config` is out of range.
    pub fn with_codec(config: Config, codec: C) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| Error::with_source(Kind::Internal, e))?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (target_tx, target_rx) = watch::channel(None);
        let messages = MessageBus::new(config.message_capacity);
        let status = Arc::new(StatusBus::new(false));
        let codec = Arc::new(codec);

        let driver = Driver {
            policy: ReconnectPolicy::new(config.reconnect),
            codec: Arc::clone(&codec),
            messages: messages.clone(),
            status: Arc::clone(&status),
            state_tx,
            target_tx,
            events_tx,
            session: None,
            epoch: 0,
            reconnect_at: None,
        };

        runtime.spawn(driver.run(commands_rx, events_rx));

        Ok(Self {
            commands: commands_tx,
            state_rx,
            target_rx,
            messages,
            status,
            codec,
        })
    }

    /// Open a connection to `url`, replacing any existing one.
    ///
    /// The previous transport (if any) is closed without waiting for it to drain, and a
    /// pending reconnect to the previous target is cancelled. A URL that cannot be
    /// turned into a `ws`/`wss` transport leaves the manager disconnected and is not
    /// retried.
    pub fn connect<U: Into<String>>(&self, url: U) {
        let url = url.into();

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, "Requesting WebSocket connection");

        self.dispatch(Command::Connect(url));
    }

    /// Send an envelope over the live connection.
    ///
    /// Fails with [`WsError::NotConnected`] unless the manager is connected. Nothing is
    /// queued: a send that fails here never reaches the transport.
    pub fn send(&self, envelope: &MessageEnvelope) -> Result<()> {
        if !self.state().is_connected() {
            #[cfg(feature = "tracing")]
            tracing::warn!(msg_type = envelope.msg_type(), "Cannot send message, socket is not connected");
            return Err(WsError::NotConnected.into());
        }

        let text = self.codec.encode(envelope)?;

        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Sending WebSocket message");

        self.commands
            .send(Command::Send(text))
            .map_err(|_e| WsError::Shutdown)?;
        Ok(())
    }

    /// Close the connection and forget the target URL, so no reconnect follows.
    ///
    /// Safe to call when already disconnected.
    pub fn close(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Closing WebSocket connection");

        self.dispatch(Command::Close);
    }

    fn dispatch(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            #[cfg(feature = "tracing")]
            tracing::error!(command = ?e.0, "Connection driver has shut down");
            #[cfg(not(feature = "tracing"))]
            let _: mpsc::error::SendError<Command> = e;
        }
    }

    /// Subscribe to decoded inbound messages.
    ///
    /// Each call returns a new independent subscription that only sees messages
    /// received after it was created.
    #[must_use]
    pub fn messages(&self) -> MessageSubscription {
        self.messages.subscribe()
    }

    /// Subscribe to the connected status. The current value is delivered first.
    #[must_use]
    pub fn status(&self) -> StatusSubscription {
        self.status.subscribe()
    }

    /// Whether the last published status was "connected".
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status.current()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    ///
    /// Unlike [`status`](Self::status) this reports the `Connecting` phase and when
    /// the connection was established, but intermediate states may be coalesced.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// The URL being connected or reconnected to, `None` after `close()`.
    #[must_use]
    pub fn target(&self) -> Option<String> {
        self.target_rx.borrow().clone()
    }
}

/// Owns all mutable connection state. Runs as a single task, so every transition is
/// serialized.
struct Driver<C: FrameCodec> {
    policy: ReconnectPolicy,
    codec: Arc<C>,
    messages: MessageBus,
    status: Arc<StatusBus>,
    state_tx: watch::Sender<ConnectionState>,
    target_tx: watch::Sender<Option<String>>,
    events_tx: mpsc::UnboundedSender<Event>,
    session: Option<Session>,
    /// Incremented for every opened session; events from older epochs are ignored
    epoch: u64,
    reconnect_at: Option<time::Instant>,
}

impl<C: FrameCodec> Driver<C> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every manager handle is gone
                    None => break,
                },

                Some(event) = events.recv() => self.handle_event(event),

                () = wait_until(reconnect_at) => self.reconnect(),
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection manager dropped, shutting down driver");

        if self.session.take().is_some() {
            self.transition(ConnectionState::Disconnected);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(url) => self.connect(url),
            Command::Send(text) => self.send(text),
            Command::Close => self.close(),
        }
    }

    fn connect(&mut self, url: String) {
        // Last caller wins: the old transport and any pending retry are discarded.
        self.session = None;
        self.reconnect_at = None;
        self.policy.reset();

        if let Err(e) = validate_url(&url) {
            let error = WsError::TransportConstruction(e.to_string());
            #[cfg(feature = "tracing")]
            tracing::error!(%url, %error, "Error creating WebSocket");
            #[cfg(not(feature = "tracing"))]
            let _ = &error;

            self.target_tx.send_replace(None);
            self.transition(ConnectionState::Disconnected);
            return;
        }

        self.target_tx.send_replace(Some(url.clone()));
        self.open(url);
    }

    fn send(&self, text: String) {
        match &self.session {
            Some(session) if self.state_tx.borrow().is_connected() => {
                if session.outbound.send(text).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Session ended before message could be sent");
                }
            }
            _ => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, "Dropping message, socket is not connected");
                #[cfg(not(feature = "tracing"))]
                let _: String = text;
            }
        }
    }

    fn close(&mut self) {
        self.target_tx.send_replace(None);
        self.reconnect_at = None;
        self.policy.reset();

        if self.session.take().is_some() {
            self.transition(ConnectionState::Disconnected);
        }
    }

    fn handle_event(&mut self, event: Event) {
        let is_current = self
            .session
            .as_ref()
            .is_some_and(|session| session.epoch == event.epoch);

        if !is_current {
            #[cfg(feature = "tracing")]
            tracing::trace!(epoch = event.epoch, kind = ?event.kind, "Ignoring event from superseded session");
            return;
        }

        match event.kind {
            SessionEvent::Opened => {
                #[cfg(feature = "tracing")]
                tracing::debug!(target_url = ?*self.target_tx.borrow(), "WebSocket connection opened");

                self.policy.reset();
                self.transition(ConnectionState::Connected {
                    since: Instant::now(),
                });
            }
            SessionEvent::Frame(envelope) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(?envelope, "Received WebSocket message");

                self.messages.publish(envelope);
            }
            SessionEvent::Closed(reason) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %reason, "WebSocket connection lost");
                #[cfg(not(feature = "tracing"))]
                let _: WsError = reason;

                self.session = None;
                self.transition(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.target_tx.borrow().is_none() {
            return;
        }

        match self.policy.next_delay() {
            Some(delay) => {
                let Some(deadline) = time::Instant::now().checked_add(delay) else {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(?delay, "Reconnect delay is out of range, giving up");
                    self.target_tx.send_replace(None);
                    return;
                };

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    attempt = self.policy.attempt(),
                    ?delay,
                    "Attempting to reconnect after delay"
                );
                self.reconnect_at = Some(deadline);
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    attempts = self.policy.attempt(),
                    "Reconnect attempts exhausted, giving up"
                );
                self.target_tx.send_replace(None);
            }
        }
    }

    fn reconnect(&mut self) {
        self.reconnect_at = None;

        let target = self.target_tx.borrow().clone();
        if let Some(url) = target {
            self.open(url);
        }
    }

    fn open(&mut self, url: String) {
        self.epoch = self.epoch.wrapping_add(1);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_session(
            self.epoch,
            url,
            outbound_rx,
            self.events_tx.clone(),
            Arc::clone(&self.codec),
        ));

        self.session = Some(Session {
            epoch: self.epoch,
            outbound: outbound_tx,
        });
        self.transition(ConnectionState::Connecting);
    }

    /// Record a new state and publish the matching status.
    fn transition(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);

        #[cfg(feature = "tracing")]
        tracing::debug!(?previous, ?next, "Connection state changed");

        match next {
            ConnectionState::Connected { .. } => self.status.publish(true),
            ConnectionState::Disconnected => self.status.publish(false),
            ConnectionState::Connecting if previous.is_connected() => self.status.publish(false),
            ConnectionState::Connecting => {}
        }
    }
}

/// Resolve at `deadline`, or never when there is none.
async fn wait_until(deadline: Option<time::Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Only `ws` and `wss` URLs can be turned into a transport.
fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url)?;

    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        scheme => Err(Error::validation(format!(
            "unsupported scheme `{scheme}`, expected `ws` or `wss`"
        ))),
    }
}

/// Own one transport from handshake to close, reporting back to the driver.
///
/// Returns without reporting when the driver drops the outbound sender, which is how
/// `close()` and a superseding `connect()` tear the session down.
async fn run_session<C: FrameCodec>(
    epoch: u64,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<Event>,
    codec: Arc<C>,
) {
    let report = |kind: SessionEvent| {
        _ = events.send(Event { epoch, kind });
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(%url, epoch, "Creating WebSocket connection");

    let ws_stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                report(SessionEvent::Closed(WsError::Connection(e)));
                return;
            }
        },
        // Torn down before the handshake finished
        None = outbound.recv() => return,
    };

    report(SessionEvent::Opened);

    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    report(SessionEvent::Frame(codec.decode(text.as_str())));
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => report(SessionEvent::Frame(codec.decode(text))),
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(len = bytes.len(), error = %e, "Discarding non UTF-8 binary frame");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(?frame, "Server closed WebSocket connection");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &frame;
                    break WsError::UnexpectedDisconnect;
                }
                Some(Ok(_)) => {
                    // Ping/pong is answered by tungstenite itself.
                }
                Some(Err(e)) => break WsError::Connection(e),
                None => break WsError::UnexpectedDisconnect,
            },

            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        break WsError::Connection(e);
                    }
                }
                None => {
                    // Caller-initiated teardown: say goodbye, don't wait for the peer.
                    _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
        }
    };

    report(SessionEvent::Closed(reason));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[test]
    fn only_connected_state_is_connected() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(
            ConnectionState::Connected {
                since: Instant::now()
            }
            .is_connected()
        );
    }

    #[test]
    fn validate_url_accepts_ws_schemes() {
        validate_url("ws://127.0.0.1:9000/socket").unwrap();
        validate_url("wss://echo.example/raw").unwrap();
    }

    #[test]
    fn validate_url_rejects_other_input() {
        for url in ["http://example.com", "not a url", "", "ftp://example.com"] {
            let error = validate_url(url).unwrap_err();
            assert_eq!(error.kind(), Kind::Validation, "url {url:?}");
        }
    }

    #[test]
    fn new_outside_runtime_fails() {
        let error = ConnectionManager::new(Config::default()).unwrap_err();
        assert_eq!(error.kind(), Kind::Internal);
    }

    #[tokio::test]
    async fn oversized_message_capacity_is_rejected() {
        let mut config = Config::default();
        config.message_capacity = usize::MAX;

        let error = ConnectionManager::new(config).unwrap_err();
        assert_eq!(error.kind(), Kind::Validation);
    }

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let manager = ConnectionManager::new(Config::default()).unwrap();
        let envelope = MessageEnvelope::new("ping", serde_json::Value::Null);

        let error = manager.send(&envelope).unwrap_err();
        assert!(
            matches!(error.downcast_ref::<WsError>(), Some(WsError::NotConnected)),
            "unexpected error {error:?}"
        );
    }

    #[tokio::test]
    async fn invalid_url_stays_disconnected_without_target() {
        let manager = ConnectionManager::new(Config::default()).unwrap();
        let mut status = manager.status();
        assert_eq!(status.recv().await, Some(false));

        manager.connect("http://not-a-websocket.example");

        let next = timeout(Duration::from_secs(1), status.recv()).await.unwrap();
        assert_eq!(next, Some(false));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.target(), None);
    }

    #[tokio::test]
    async fn close_when_disconnected_is_noop() {
        let manager = ConnectionManager::new(Config::default()).unwrap();

        manager.close();
        manager.close();

        let mut state_rx = manager.state_receiver();
        let changed = timeout(Duration::from_millis(100), state_rx.changed()).await;
        assert!(changed.is_err(), "close on idle manager must not change state");
        assert!(!manager.is_connected(), "status should remain false");
    }
}
