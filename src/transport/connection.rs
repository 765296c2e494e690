//! A single self-healing WebSocket connection.
//!
//! Each [`Connection`] owns one spawned event-loop task, the only consumer
//! of its transport. The subscription table lives outside the task so that
//! callers can register handlers at any time; it is the source of truth
//! replayed after every reconnect.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ─► Connecting ─► Connected
//!      ▲              │             │ error / close
//!      │              ▼             ▼
//!      └──────── (failure) ◄── Disconnected ─► ReconnectScheduled ─► Connecting ...
//!                                   │
//!                                   └─► GaveUp   (attempt cap reached, terminal)
//! ```
//!
//! `Closed` is reached only through [`Connection::shutdown`]. A connection
//! in `GaveUp` keeps its table but never receives data again; restarting
//! the owning process is the only recovery.
//!
//! # Event Loop
//!
//! While connected the task multiplexes:
//!
//! - inbound frames, decoded and routed to handlers by channel identifier
//! - queued `SUBSCRIPTION` requests from [`Connection::subscribe`]
//! - the keep-alive `PING` timer

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::protocol::{ControlFrame, ControlReply, FrameKind, PushDecoder, PushPayload};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on a single connect handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Types
// ============================================================================

/// Subscription handler invoked with each decoded body of its channel.
pub type Handler = Arc<dyn Fn(PushPayload) + Send + Sync>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;

// ============================================================================
// ConnectionId
// ============================================================================

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport; initial state and the state right after a drop.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Transport open, heartbeat running.
    Connected,
    /// Waiting out the backoff delay.
    ReconnectScheduled,
    /// Attempt cap reached. Terminal.
    GaveUp,
    /// Shut down explicitly. Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns `true` for states the event loop never leaves.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::GaveUp | Self::Closed)
    }
}

// ============================================================================
// ConnectionStats
// ============================================================================

/// Snapshot of a connection's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Transport opens attempted, including the first.
    pub connect_attempts: u64,
    /// Frames read from the transport.
    pub frames_received: u64,
    /// Frames sniffed as JSON control replies and dropped.
    pub non_data_frames: u64,
    /// Control replies carrying a non-zero code.
    pub rejected_replies: u64,
    /// Binary frames the decoder rejected.
    pub decode_failures: u64,
    /// Decoded messages without a registered handler.
    pub unrouted_messages: u64,
    /// Messages handed to a handler.
    pub messages_delivered: u64,
    /// Handler invocations that panicked.
    pub handler_panics: u64,
    /// Keep-alive frames written.
    pub pings_sent: u64,
    /// `SUBSCRIPTION` frames written, replays included.
    pub subscription_requests_sent: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connect_attempts: AtomicU64,
    frames_received: AtomicU64,
    non_data_frames: AtomicU64,
    rejected_replies: AtomicU64,
    decode_failures: AtomicU64,
    unrouted_messages: AtomicU64,
    messages_delivered: AtomicU64,
    handler_panics: AtomicU64,
    pings_sent: AtomicU64,
    subscription_requests_sent: AtomicU64,
}

impl Counters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            non_data_frames: self.non_data_frames.load(Ordering::Relaxed),
            rejected_replies: self.rejected_replies.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            unrouted_messages: self.unrouted_messages.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            subscription_requests_sent: self.subscription_requests_sent.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// State guarded by one lock.
///
/// `subscribe` checks `state` and inserts under the same guard the loop
/// holds while marking the session live and snapshotting the table, so a
/// channel is either replayed or sent by `subscribe`, never both.
struct Inner {
    state: ConnectionState,
    subscriptions: FxHashMap<String, Handler>,
    reconnect_attempts: u32,
    /// Incremented on every successful open.
    epoch: u64,
}

struct Shared {
    id: ConnectionId,
    inner: Mutex<Inner>,
    counters: Counters,
}

impl Shared {
    fn new() -> Self {
        Self {
            id: ConnectionId::next(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                subscriptions: FxHashMap::default(),
                reconnect_attempts: 0,
                epoch: 0,
            }),
            counters: Counters::default(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.inner.lock().state, state);
        trace!(connection_id = %self.id, ?previous, ?state, "State transition");
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a `SUBSCRIPTION` frame if still in session `epoch`.
    Subscribe { channel: String, epoch: u64 },
    /// Close the transport and stop.
    Shutdown,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Transport error or close; reconnect applies.
    Dropped,
    /// Shutdown requested or every handle dropped.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// One multiplexed push-data connection and its subscription table.
///
/// Cheap to clone; clones share the table and the event loop. The loop
/// stops once [`shutdown`](Self::shutdown) is called or every clone is
/// dropped.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl Connection {
    /// Creates a connection and starts connecting in the background.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(config: Arc<StreamConfig>, decoder: Arc<dyn PushDecoder>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());

        debug!(connection_id = %shared.id, endpoint = %config.endpoint(), "Spawning connection");

        tokio::spawn(Self::run_event_loop(
            Arc::clone(&shared),
            command_rx,
            config,
            decoder,
        ));

        Self { shared, command_tx }
    }

    /// Registers `handler` for `channel`, replacing any previous handler.
    ///
    /// Sends the `SUBSCRIPTION` request right away when connected;
    /// otherwise the next successful open replays it. Never blocks.
    pub fn subscribe<F>(&self, channel: impl Into<String>, handler: F)
    where
        F: Fn(PushPayload) + Send + Sync + 'static,
    {
        self.subscribe_handler(channel.into(), Arc::new(handler));
    }

    pub(crate) fn subscribe_handler(&self, channel: String, handler: Handler) {
        let live_epoch = {
            let mut inner = self.shared.inner.lock();
            let replaced = inner
                .subscriptions
                .insert(channel.clone(), handler)
                .is_some();

            debug!(
                connection_id = %self.shared.id,
                channel = %channel,
                replaced,
                size = inner.subscriptions.len(),
                "Subscription registered"
            );

            (inner.state == ConnectionState::Connected).then_some(inner.epoch)
        };

        if let Some(epoch) = live_epoch {
            let _ = self
                .command_tx
                .send(ConnectionCommand::Subscribe { channel, epoch });
        }
    }

    /// Returns the connection identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Returns `true` while the transport is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the reconnect attempts since the last successful open.
    #[inline]
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.inner.lock().reconnect_attempts
    }

    /// Returns the number of registered channels.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.inner.lock().subscriptions.len()
    }

    /// Returns `true` if a handler is registered for `channel`.
    #[inline]
    #[must_use]
    pub fn contains(&self, channel: &str) -> bool {
        self.shared.inner.lock().subscriptions.contains_key(channel)
    }

    /// Returns the registered channel identifiers, unordered.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.shared
            .inner
            .lock()
            .subscriptions
            .keys()
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn handler(&self, channel: &str) -> Option<Handler> {
        self.shared.inner.lock().subscriptions.get(channel).cloned()
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.shared.counters.snapshot()
    }

    /// Closes the transport and stops reconnecting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the event loop already ended.
    pub fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(ConnectionCommand::Shutdown)
            .map_err(|_| Error::ConnectionClosed)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &inner.state)
            .field("subscriptions", &inner.subscriptions.len())
            .field("reconnect_attempts", &inner.reconnect_attempts)
            .finish()
    }
}

// ============================================================================
// Connection - Event Loop
// ============================================================================

impl Connection {
    /// Connect, serve, back off, repeat.
    async fn run_event_loop(
        shared: Arc<Shared>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        config: Arc<StreamConfig>,
        decoder: Arc<dyn PushDecoder>,
    ) {
        let policy = *config.reconnect_policy();

        loop {
            shared.set_state(ConnectionState::Connecting);
            Counters::bump(&shared.counters.connect_attempts);

            let Some(connected) =
                until_shutdown(Self::open(&config), &mut command_rx).await
            else {
                break;
            };

            let end = match connected {
                Ok(ws_stream) => {
                    Self::run_session(
                        &shared,
                        ws_stream,
                        &mut command_rx,
                        &config,
                        decoder.as_ref(),
                    )
                    .await
                }
                Err(e) => {
                    warn!(connection_id = %shared.id, error = %e, "WebSocket connect failed");
                    SessionEnd::Dropped
                }
            };

            if end == SessionEnd::Shutdown {
                break;
            }

            let attempts = {
                let mut inner = shared.inner.lock();
                inner.state = ConnectionState::Disconnected;
                inner.reconnect_attempts
            };

            if policy.exhausted(attempts) {
                let size = {
                    let mut inner = shared.inner.lock();
                    inner.state = ConnectionState::GaveUp;
                    inner.subscriptions.len()
                };
                error!(
                    connection_id = %shared.id,
                    attempts,
                    subscriptions = size,
                    "Max reconnect attempts reached, connection gave up"
                );
                return;
            }

            let delay = policy.delay(attempts);
            shared.set_state(ConnectionState::ReconnectScheduled);
            info!(
                connection_id = %shared.id,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt = attempts + 1,
                "Attempting to reconnect"
            );

            if until_shutdown(sleep(delay), &mut command_rx).await.is_none() {
                break;
            }

            shared.inner.lock().reconnect_attempts += 1;
        }

        shared.set_state(ConnectionState::Closed);
        debug!(connection_id = %shared.id, "Event loop terminated");
    }

    async fn open(config: &StreamConfig) -> Result<WsStream> {
        let endpoint = config.endpoint().as_str();

        let (ws_stream, _response) = timeout(CONNECT_TIMEOUT, connect_async(endpoint))
            .await
            .map_err(|_| {
                Error::connection(format!(
                    "handshake timed out after {}ms",
                    CONNECT_TIMEOUT.as_millis()
                ))
            })??;

        Ok(ws_stream)
    }

    /// Serves one open transport until it drops or shutdown is requested.
    async fn run_session(
        shared: &Shared,
        ws_stream: WsStream,
        command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
        config: &StreamConfig,
        decoder: &dyn PushDecoder,
    ) -> SessionEnd {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (epoch, channels) = {
            let mut inner = shared.inner.lock();
            inner.state = ConnectionState::Connected;
            inner.reconnect_attempts = 0;
            inner.epoch += 1;
            let channels: Vec<String> = inner.subscriptions.keys().cloned().collect();
            (inner.epoch, channels)
        };

        info!(connection_id = %shared.id, epoch, replay = channels.len(), "WebSocket connected");

        for channel in &channels {
            Self::send_subscription(shared, &mut ws_write, channel).await;
            debug!(connection_id = %shared.id, channel = %channel, "Resubscribed");
        }

        // Dropped with the session, so no PING outlives the transport.
        let period = config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Binary(bytes))) => {
                            Self::handle_frame(shared, decoder, &bytes);
                        }

                        Some(Ok(Message::Text(text))) => {
                            Self::handle_frame(shared, decoder, text.as_str().as_bytes());
                        }

                        Some(Ok(Message::Close(frame))) => {
                            warn!(connection_id = %shared.id, ?frame, "Connection closed by venue");
                            return SessionEnd::Dropped;
                        }

                        Some(Err(e)) => {
                            warn!(connection_id = %shared.id, error = %e, "WebSocket error");
                            return SessionEnd::Dropped;
                        }

                        None => {
                            warn!(connection_id = %shared.id, "WebSocket stream ended");
                            return SessionEnd::Dropped;
                        }

                        // Ping, Pong, raw frames
                        Some(Ok(_)) => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Subscribe { channel, epoch: issued }) => {
                            if issued == epoch {
                                Self::send_subscription(shared, &mut ws_write, &channel).await;
                            } else {
                                trace!(connection_id = %shared.id, channel = %channel, "Stale subscribe covered by replay");
                            }
                        }

                        Some(ConnectionCommand::Shutdown) | None => {
                            debug!(connection_id = %shared.id, "Shutdown requested");
                            let _ = ws_write.close().await;
                            return SessionEnd::Shutdown;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    Self::send_ping(shared, &mut ws_write).await;
                }
            }
        }
    }

    async fn send_subscription(shared: &Shared, ws_write: &mut WsWrite, channel: &str) {
        let json = match ControlFrame::subscription(channel).to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(connection_id = %shared.id, error = %e, "Failed to encode subscription");
                return;
            }
        };

        match ws_write.send(Message::Text(json.into())).await {
            Ok(()) => {
                Counters::bump(&shared.counters.subscription_requests_sent);
                trace!(connection_id = %shared.id, channel = %channel, "Subscription sent");
            }
            Err(e) => {
                warn!(connection_id = %shared.id, channel = %channel, error = %e, "Failed to send subscription");
            }
        }
    }

    /// A failed PING is logged only; the read side decides liveness.
    async fn send_ping(shared: &Shared, ws_write: &mut WsWrite) {
        let json = match ControlFrame::Ping.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(connection_id = %shared.id, error = %e, "Failed to encode PING");
                return;
            }
        };

        match ws_write.send(Message::Text(json.into())).await {
            Ok(()) => {
                Counters::bump(&shared.counters.pings_sent);
                trace!(connection_id = %shared.id, "PING sent");
            }
            Err(e) => {
                warn!(connection_id = %shared.id, error = %e, "Error sending PING");
            }
        }
    }

    /// Classifies, decodes and routes one inbound frame.
    fn handle_frame(shared: &Shared, decoder: &dyn PushDecoder, bytes: &[u8]) {
        Counters::bump(&shared.counters.frames_received);

        if FrameKind::classify(bytes) == FrameKind::Control {
            Counters::bump(&shared.counters.non_data_frames);
            match serde_json::from_slice::<ControlReply>(bytes).map(ControlReply::into_result) {
                Ok(Ok(reply)) => {
                    trace!(connection_id = %shared.id, msg = %reply.msg, "Control reply");
                }
                Ok(Err(e)) => {
                    Counters::bump(&shared.counters.rejected_replies);
                    warn!(connection_id = %shared.id, error = %e, "Control request rejected");
                }
                Err(_) => {
                    trace!(connection_id = %shared.id, len = bytes.len(), "Non-data frame dropped");
                }
            }
            return;
        }

        let message = match decoder.decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                Counters::bump(&shared.counters.decode_failures);
                warn!(connection_id = %shared.id, error = %e, len = bytes.len(), "Failed to decode push frame");
                return;
            }
        };

        let handler = shared
            .inner
            .lock()
            .subscriptions
            .get(&message.channel)
            .cloned();

        let Some(handler) = handler else {
            Counters::bump(&shared.counters.unrouted_messages);
            trace!(connection_id = %shared.id, channel = %message.channel, "No handler for channel");
            return;
        };

        let channel = message.channel;
        let payload = message.payload;

        if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
            Counters::bump(&shared.counters.handler_panics);
            error!(connection_id = %shared.id, channel = %channel, "Subscription handler panicked");
            return;
        }

        Counters::bump(&shared.counters.messages_delivered);
    }
}

/// Drives `future` while draining commands.
///
/// Returns `None` on shutdown. Queued subscribes are discarded: outside a
/// session the next replay covers them.
async fn until_shutdown<F: Future>(
    future: F,
    command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
) -> Option<F::Output> {
    tokio::pin!(future);

    loop {
        tokio::select! {
            output = &mut future => return Some(output),

            command = command_rx.recv() => {
                match command {
                    Some(ConnectionCommand::Subscribe { .. }) => {}
                    Some(ConnectionCommand::Shutdown) | None => return None,
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use serde_json::Value;

    use crate::channel::ChannelKind;
    use crate::protocol::{Kline, PushMessage};
    use crate::transport::ReconnectPolicy;

    /// Frames are `channel\njson-body`.
    fn line_decoder(bytes: &[u8]) -> Result<PushMessage> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::decode(e.to_string()))?;
        let (channel, body) = text
            .split_once('\n')
            .ok_or_else(|| Error::decode("missing separator"))?;
        let kind = ChannelKind::from_identifier(channel)
            .ok_or_else(|| Error::decode(format!("unknown channel {channel}")))?;
        let body: Value = serde_json::from_str(body)?;
        Ok(PushMessage::new(channel, PushPayload::from_json(kind, body)?))
    }

    const KLINE: &str = "spot@public.kline.v3.api.pb@BTCUSDT@Min1";

    fn kline_frame(channel: &str) -> Vec<u8> {
        format!("{channel}\n{{\"closingPrice\":\"1.5\"}}").into_bytes()
    }

    fn insert(shared: &Shared, channel: &str, handler: Handler) {
        shared
            .inner
            .lock()
            .subscriptions
            .insert(channel.to_string(), handler);
    }

    fn unreachable_config() -> Arc<StreamConfig> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        Arc::new(
            StreamConfig::builder()
                .endpoint(format!("ws://127.0.0.1:{port}"))
                .reconnect_policy(ReconnectPolicy {
                    base_interval: Duration::from_secs(60),
                    max_interval: Duration::from_secs(60),
                    ..Default::default()
                })
                .build()
                .expect("config"),
        )
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::GaveUp.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::ReconnectScheduled.is_terminal());
    }

    #[test]
    fn test_routes_to_registered_handler() {
        let shared = Shared::new();
        let seen = Arc::new(Mutex::new(Vec::<Kline>::new()));

        let sink = Arc::clone(&seen);
        insert(
            &shared,
            KLINE,
            Arc::new(move |payload: PushPayload| {
                if let PushPayload::Kline(kline) = payload {
                    sink.lock().push(kline);
                }
            }),
        );

        Connection::handle_frame(&shared, &line_decoder, &kline_frame(KLINE));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].closing_price, "1.5");
        assert_eq!(shared.counters.snapshot().messages_delivered, 1);
    }

    #[test]
    fn test_unregistered_channel_is_ignored() {
        let shared = Shared::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        insert(
            &shared,
            KLINE,
            Arc::new(move |_: PushPayload| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let other = "spot@public.kline.v3.api.pb@ETHUSDT@Min1";
        Connection::handle_frame(&shared, &line_decoder, &kline_frame(other));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(shared.counters.snapshot().unrouted_messages, 1);
    }

    #[test]
    fn test_control_frames_are_dropped() {
        let shared = Shared::new();
        Connection::handle_frame(&shared, &line_decoder, br#"{"id":0,"code":0,"msg":"PONG"}"#);
        Connection::handle_frame(&shared, &line_decoder, b"[]");

        let stats = shared.counters.snapshot();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.non_data_frames, 2);
        assert_eq!(stats.decode_failures, 0);
    }

    #[test]
    fn test_rejected_reply_is_counted() {
        let shared = Shared::new();
        Connection::handle_frame(
            &shared,
            &line_decoder,
            br#"{"id":0,"code":1,"msg":"Not Subscribed successfully! [spot@bad]"}"#,
        );
        Connection::handle_frame(&shared, &line_decoder, br#"{"id":0,"code":0,"msg":"PONG"}"#);

        let stats = shared.counters.snapshot();
        assert_eq!(stats.non_data_frames, 2);
        assert_eq!(stats.rejected_replies, 1);
        assert_eq!(stats.decode_failures, 0);
    }

    #[test]
    fn test_decode_failure_is_counted() {
        let shared = Shared::new();
        Connection::handle_frame(&shared, &line_decoder, b"garbage-without-separator");

        let stats = shared.counters.snapshot();
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.messages_delivered, 0);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let shared = Shared::new();
        let calls = Arc::new(AtomicUsize::new(0));

        insert(
            &shared,
            KLINE,
            Arc::new(|payload: PushPayload| {
                if payload.kind() == ChannelKind::Kline {
                    panic!("handler bug");
                }
            }),
        );

        let other = "spot@public.kline.v3.api.pb@ETHUSDT@Min1";
        let counter = Arc::clone(&calls);
        insert(
            &shared,
            other,
            Arc::new(move |_: PushPayload| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        Connection::handle_frame(&shared, &line_decoder, &kline_frame(KLINE));
        Connection::handle_frame(&shared, &line_decoder, &kline_frame(other));

        let stats = shared.counters.snapshot();
        assert_eq!(stats.handler_panics, 1);
        assert_eq!(stats.messages_delivered, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shared.inner.lock().subscriptions.len(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_while_disconnected_is_deferred() {
        let connection = Connection::spawn(unreachable_config(), Arc::new(line_decoder));

        connection.subscribe(KLINE, |_| {});
        connection.subscribe(KLINE, |_| {});
        connection.subscribe("spot@private.account.v3.api.pb", |_| {});

        assert_eq!(connection.size(), 2);
        assert!(connection.contains(KLINE));
        assert!(!connection.is_connected());
        assert_eq!(connection.stats().subscription_requests_sent, 0);

        connection.shutdown().expect("loop alive");
    }

    #[tokio::test]
    async fn test_shutdown_reaches_closed() {
        let connection = Connection::spawn(unreachable_config(), Arc::new(line_decoder));
        connection.shutdown().expect("loop alive");

        for _ in 0..100 {
            if connection.state() == ConnectionState::Closed {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection.state().is_terminal());
    }
}
