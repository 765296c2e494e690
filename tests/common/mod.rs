//! In-process venue for integration tests.
//!
//! Binds `127.0.0.1:0`, upgrades every TCP connection to a WebSocket,
//! records the text frames clients send and pushes binary frames on demand.
//! Push frames use a test encoding: `channel\n{json body}`.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mexc_spot_stream::{
    ChannelKind, Error, PushMessage, PushPayload, ReconnectPolicy, Result, StreamConfig,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Logging
// ============================================================================

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Decoder
// ============================================================================

pub fn line_decoder(bytes: &[u8]) -> Result<PushMessage> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::decode(e.to_string()))?;
    let (channel, body) = text
        .split_once('\n')
        .ok_or_else(|| Error::decode("missing separator"))?;
    let kind = ChannelKind::from_identifier(channel)
        .ok_or_else(|| Error::decode(format!("unknown channel {channel}")))?;
    let body: Value = serde_json::from_str(body)?;
    Ok(PushMessage::new(channel, PushPayload::from_json(kind, body)?))
}

pub fn push_frame(channel: &str, body: &Value) -> Vec<u8> {
    format!("{channel}\n{body}").into_bytes()
}

// ============================================================================
// Config
// ============================================================================

pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: 5,
        base_interval: Duration::from_millis(10),
        decay_factor: 500,
        max_interval: Duration::from_millis(50),
    }
}

pub fn config_for(endpoint: &str, heartbeat: Duration) -> StreamConfig {
    config_with(endpoint, heartbeat, fast_policy())
}

pub fn config_with(endpoint: &str, heartbeat: Duration, policy: ReconnectPolicy) -> StreamConfig {
    StreamConfig::builder()
        .secret("test-secret")
        .endpoint(endpoint)
        .heartbeat_interval(heartbeat)
        .reconnect_policy(policy)
        .build()
        .expect("test config")
}

/// An endpoint nothing listens on.
pub fn unreachable_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    format!("ws://127.0.0.1:{port}")
}

// ============================================================================
// MockVenue
// ============================================================================

#[derive(Debug, Clone)]
enum VenueCommand {
    Push(Vec<u8>),
    DropAll,
}

pub struct MockVenue {
    port: u16,
    frames_rx: mpsc::UnboundedReceiver<String>,
    command_tx: broadcast::Sender<VenueCommand>,
    accepted: Arc<AtomicUsize>,
}

impl MockVenue {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind venue");
        let port = listener.local_addr().expect("venue addr").port();

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (command_tx, _) = broadcast::channel(64);
        let accepted = Arc::new(AtomicUsize::new(0));

        let commands = command_tx.clone();
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((stream, _addr)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(ws, frames_tx.clone(), commands.subscribe()));
            }
        });

        Self {
            port,
            frames_rx,
            command_tx,
            accepted,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Pushes a binary frame to every open session.
    pub fn push(&self, frame: Vec<u8>) {
        let _ = self.command_tx.send(VenueCommand::Push(frame));
    }

    /// Drops every open session without a close handshake.
    pub fn drop_all(&self) {
        let _ = self.command_tx.send(VenueCommand::DropAll);
    }

    /// Collects text frames whose `method` is `method` until `count`
    /// arrived or `wait` elapsed. Other frames are discarded.
    pub async fn collect(&mut self, method: &str, count: usize, wait: Duration) -> Vec<Value> {
        let deadline = Instant::now() + wait;
        let mut found = Vec::new();

        while found.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.frames_rx.recv()).await {
                Ok(Some(text)) => {
                    let frame: Value = serde_json::from_str(&text).expect("client sent JSON");
                    if frame["method"] == method {
                        found.push(frame);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        found
    }

    /// Like [`collect`](Self::collect), recording when each frame arrived.
    pub async fn collect_timed(
        &mut self,
        method: &str,
        count: usize,
        wait: Duration,
    ) -> Vec<Instant> {
        let deadline = Instant::now() + wait;
        let mut arrivals = Vec::new();

        while arrivals.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.frames_rx.recv()).await {
                Ok(Some(text)) => {
                    let frame: Value = serde_json::from_str(&text).expect("client sent JSON");
                    if frame["method"] == method {
                        arrivals.push(Instant::now());
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        arrivals
    }

    /// Counts frames with `method` received during `window`.
    pub async fn count_during(&mut self, method: &str, window: Duration) -> usize {
        self.collect(method, usize::MAX, window).await.len()
    }

    /// Drops frames received so far.
    pub fn clear(&mut self) {
        while self.frames_rx.try_recv().is_ok() {}
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    frames_tx: mpsc::UnboundedSender<String>,
    mut commands: broadcast::Receiver<VenueCommand>,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = frames_tx.send(text.as_str().to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },

            command = commands.recv() => match command {
                Ok(VenueCommand::Push(frame)) => {
                    if write.send(Message::Binary(frame.into())).await.is_err() {
                        return;
                    }
                }
                Ok(VenueCommand::DropAll) | Err(_) => return,
            },
        }
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Polls `condition` every 5ms until it holds or `wait` elapses.
pub async fn wait_until(wait: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}
