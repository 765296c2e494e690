//! MEXC spot push-data client.
//!
//! Subscribes to the venue's WebSocket push channels across a pool of
//! connections and keeps every subscription alive through disconnects.
//!
//! # Architecture
//!
//! - A [`ConnectionPool`] routes each subscription to the connection
//!   already holding that channel, else to the newest connection with
//!   room (25 channels), else to a freshly opened one.
//! - Each [`Connection`] owns one WebSocket, a channel → handler table, a
//!   15 s `PING` heartbeat and reconnect backoff. After every reconnect it
//!   replays its whole table.
//! - Inbound binary frames are decoded by a caller-supplied
//!   [`PushDecoder`] and handed to the handler registered for the frame's
//!   channel, on the connection's own task, in arrival order.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use mexc_spot_stream::{ConnectionPool, KlineInterval, PushMessage, Result, StreamConfig};
//!
//! fn decode(bytes: &[u8]) -> Result<PushMessage> {
//!     // protobuf envelope decoding lives outside this crate
//!     # unimplemented!()
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pool = ConnectionPool::new(StreamConfig::new("api-secret")?, decode);
//!
//!     pool.subscribe_kline("BTCUSDT", KlineInterval::Min1, |kline| {
//!         println!("{} close {}", kline.interval, kline.closing_price);
//!     })?;
//!
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     pool.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`channel`] | Channel kinds and identifier formatting |
//! | [`config`] | [`StreamConfig`] and its builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`protocol`] | Control frames, push envelope, decoder trait |
//! | [`transport`] | [`Connection`] and [`ConnectionPool`] |
//!
//! # Recovery
//!
//! A connection that fails [`ReconnectPolicy::max_attempts`] reconnects in
//! a row enters [`ConnectionState::GaveUp`] and stays there. Its
//! subscriptions receive nothing further; restarting the process is the
//! only way back.

// ============================================================================
// Modules
// ============================================================================

/// Channel kinds and wire identifiers.
pub mod channel;

/// Stream configuration.
pub mod config;

/// Error types and result aliases.
pub mod error;

/// Wire message types.
pub mod protocol;

/// WebSocket connections and the pool.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Channel types
pub use channel::{AggregationDelay, Channel, ChannelKind, DepthLevel, KlineInterval};

// Configuration
pub use config::{DEFAULT_ENDPOINT, StreamConfig, StreamConfigBuilder};

// Error types
pub use error::{Error, Result};

// Protocol types
pub use protocol::{
    AggreDeals, AggreDepth, BookTicker, BookTickerBatch, ControlFrame, DealItem, DepthItem,
    FrameKind, Kline, LimitDepth, PrivateAccount, PrivateDeal, PrivateOrder, PushDecoder,
    PushMessage, PushPayload,
};

// Transport types
pub use transport::{
    Connection, ConnectionId, ConnectionPool, ConnectionState, ConnectionStats, Handler,
    ReconnectPolicy, SOFT_SUBSCRIPTION_CAP, VENUE_SUBSCRIPTION_LIMIT,
};
