//! Connection pool with per-connection subscription capacity.
//!
//! The venue rejects more than 30 subscriptions on one connection. The pool
//! keeps each connection at or below 25 and opens another connection when
//! the newest one is full.
//!
//! # Routing
//!
//! ```text
//! subscribe(channel)
//!   ├─ some connection already holds channel ─► that connection (handler replaced)
//!   ├─ newest connection has < 25 channels   ─► newest connection
//!   └─ otherwise                             ─► new connection, becomes newest
//! ```
//!
//! Connections are never evicted; an idle connection stays open until
//! [`ConnectionPool::shutdown`].

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::channel::{AggregationDelay, Channel, ChannelKind, DepthLevel, KlineInterval};
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    AggreDeals, AggreDepth, BookTicker, BookTickerBatch, Kline, LimitDepth, PrivateAccount,
    PrivateDeal, PrivateOrder, PushDecoder, PushPayload,
};

use super::connection::{Connection, ConnectionId, Handler};

// ============================================================================
// Constants
// ============================================================================

/// Subscriptions the venue accepts per connection.
pub const VENUE_SUBSCRIPTION_LIMIT: usize = 30;

/// Subscriptions the pool places on one connection before opening another.
pub const SOFT_SUBSCRIPTION_CAP: usize = 25;

// ============================================================================
// ConnectionPool
// ============================================================================

/// Routes subscriptions across a growing set of connections.
///
/// # Example
///
/// ```ignore
/// let pool = ConnectionPool::new(StreamConfig::new("secret")?, my_decoder);
///
/// pool.subscribe_kline("BTCUSDT", KlineInterval::Min1, |kline| {
///     println!("close = {}", kline.closing_price);
/// })?;
/// ```
pub struct ConnectionPool {
    /// Shared by every connection.
    config: Arc<StreamConfig>,

    /// Push frame decoder shared by every connection.
    decoder: Arc<dyn PushDecoder>,

    /// Newest first.
    connections: RwLock<VecDeque<Connection>>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

// ============================================================================
// ConnectionPool - Constructor
// ============================================================================

impl ConnectionPool {
    /// Creates an empty pool. Connections open lazily on first subscribe.
    pub fn new(config: StreamConfig, decoder: impl PushDecoder) -> Self {
        Self::with_decoder(config, Arc::new(decoder))
    }

    /// Creates an empty pool around an already shared decoder.
    pub fn with_decoder(config: StreamConfig, decoder: Arc<dyn PushDecoder>) -> Self {
        debug!(endpoint = %config.endpoint(), "ConnectionPool created");

        Self {
            config: Arc::new(config),
            decoder,
            connections: RwLock::new(VecDeque::new()),
            shutdown: AtomicBool::new(false),
        }
    }
}

// ============================================================================
// ConnectionPool - Routing
// ============================================================================

impl ConnectionPool {
    /// Subscribes `handler` to a raw channel identifier.
    ///
    /// Must be called within a tokio runtime, since it may spawn a
    /// connection. Returns the connection the channel now lives on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] after [`shutdown`](Self::shutdown).
    pub fn subscribe<F>(&self, channel: impl Into<String>, handler: F) -> Result<ConnectionId>
    where
        F: Fn(PushPayload) + Send + Sync + 'static,
    {
        self.route(channel.into(), Arc::new(handler))
    }

    /// Subscribes `handler` to a typed channel.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the channel parameters are invalid
    /// - [`Error::ConnectionClosed`] after [`shutdown`](Self::shutdown)
    pub fn subscribe_channel<F>(&self, channel: &Channel, handler: F) -> Result<ConnectionId>
    where
        F: Fn(PushPayload) + Send + Sync + 'static,
    {
        let identifier = channel.identifier()?;
        self.route(identifier, Arc::new(handler))
    }

    /// Picks the connection for `channel` and registers the handler on it.
    ///
    /// Selection and registration happen under the pool's write lock, so
    /// concurrent callers cannot split one channel across connections or
    /// overfill the newest one.
    fn route(&self, channel: String, handler: Handler) -> Result<ConnectionId> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        let mut connections = self.connections.write();

        let holder = connections.iter().find(|c| c.contains(&channel)).cloned();
        let target = match holder {
            Some(connection) => connection,
            None => match connections.front() {
                Some(newest) if newest.size() < SOFT_SUBSCRIPTION_CAP => newest.clone(),
                _ => {
                    let connection =
                        Connection::spawn(Arc::clone(&self.config), Arc::clone(&self.decoder));
                    info!(
                        connection_id = %connection.id(),
                        pool_size = connections.len() + 1,
                        "Opened pool connection"
                    );
                    connections.push_front(connection.clone());
                    connection
                }
            },
        };

        target.subscribe_handler(channel, handler);
        Ok(target.id())
    }
}

// ============================================================================
// ConnectionPool - Typed Subscriptions
// ============================================================================

impl ConnectionPool {
    /// Own order updates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] after shutdown.
    pub fn subscribe_account_orders<F>(&self, callback: F) -> Result<ConnectionId>
    where
        F: Fn(PrivateOrder) + Send + Sync + 'static,
    {
        self.subscribe_channel(&Channel::AccountOrders, move |payload| match payload {
            PushPayload::AccountOrders(order) => callback(order),
            other => mismatched(ChannelKind::AccountOrders, &other),
        })
    }

    /// Own fills.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] after shutdown.
    pub fn subscribe_account_deals<F>(&self, callback: F) -> Result<ConnectionId>
    where
        F: Fn(PrivateDeal) + Send + Sync + 'static,
    {
        self.subscribe_channel(&Channel::AccountDeals, move |payload| match payload {
            PushPayload::AccountDeals(deal) => callback(deal),
            other => mismatched(ChannelKind::AccountDeals, &other),
        })
    }

    /// Balance changes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] after shutdown.
    pub fn subscribe_account<F>(&self, callback: F) -> Result<ConnectionId>
    where
        F: Fn(PrivateAccount) + Send + Sync + 'static,
    {
        self.subscribe_channel(&Channel::Account, move |payload| match payload {
            PushPayload::Account(account) => callback(account),
            other => mismatched(ChannelKind::Account, &other),
        })
    }

    /// Partial order book at `level`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `symbol` is invalid
    /// - [`Error::ConnectionClosed`] after shutdown
    pub fn subscribe_limit_depth<F>(
        &self,
        symbol: impl Into<String>,
        level: DepthLevel,
        callback: F,
    ) -> Result<ConnectionId>
    where
        F: Fn(LimitDepth) + Send + Sync + 'static,
    {
        let channel = Channel::LimitDepth {
            symbol: symbol.into(),
            level,
        };
        self.subscribe_channel(&channel, move |payload| match payload {
            PushPayload::LimitDepth(depth) => callback(depth),
            other => mismatched(ChannelKind::LimitDepth, &other),
        })
    }

    /// Incremental order book aggregated over `delay`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `symbol` is invalid
    /// - [`Error::ConnectionClosed`] after shutdown
    pub fn subscribe_aggre_depth<F>(
        &self,
        symbol: impl Into<String>,
        delay: AggregationDelay,
        callback: F,
    ) -> Result<ConnectionId>
    where
        F: Fn(AggreDepth) + Send + Sync + 'static,
    {
        let channel = Channel::AggreDepth {
            symbol: symbol.into(),
            delay,
        };
        self.subscribe_channel(&channel, move |payload| match payload {
            PushPayload::AggreDepth(depth) => callback(depth),
            other => mismatched(ChannelKind::AggreDepth, &other),
        })
    }

    /// Best bid/offer aggregated over `delay`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `symbol` is invalid
    /// - [`Error::ConnectionClosed`] after shutdown
    pub fn subscribe_book_ticker<F>(
        &self,
        symbol: impl Into<String>,
        delay: AggregationDelay,
        callback: F,
    ) -> Result<ConnectionId>
    where
        F: Fn(BookTicker) + Send + Sync + 'static,
    {
        let channel = Channel::BookTicker {
            symbol: symbol.into(),
            delay,
        };
        self.subscribe_channel(&channel, move |payload| match payload {
            PushPayload::BookTicker(ticker) => callback(ticker),
            other => mismatched(ChannelKind::BookTicker, &other),
        })
    }

    /// Batched best bid/offer.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `symbol` is invalid
    /// - [`Error::ConnectionClosed`] after shutdown
    pub fn subscribe_book_ticker_batch<F>(
        &self,
        symbol: impl Into<String>,
        callback: F,
    ) -> Result<ConnectionId>
    where
        F: Fn(BookTickerBatch) + Send + Sync + 'static,
    {
        let channel = Channel::BookTickerBatch {
            symbol: symbol.into(),
        };
        self.subscribe_channel(&channel, move |payload| match payload {
            PushPayload::BookTickerBatch(batch) => callback(batch),
            other => mismatched(ChannelKind::BookTickerBatch, &other),
        })
    }

    /// Public trades aggregated over `delay`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `symbol` is invalid
    /// - [`Error::ConnectionClosed`] after shutdown
    pub fn subscribe_aggre_deals<F>(
        &self,
        symbol: impl Into<String>,
        delay: AggregationDelay,
        callback: F,
    ) -> Result<ConnectionId>
    where
        F: Fn(AggreDeals) + Send + Sync + 'static,
    {
        let channel = Channel::AggreDeals {
            symbol: symbol.into(),
            delay,
        };
        self.subscribe_channel(&channel, move |payload| match payload {
            PushPayload::AggreDeals(deals) => callback(deals),
            other => mismatched(ChannelKind::AggreDeals, &other),
        })
    }

    /// Candlesticks at `interval`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `symbol` is invalid
    /// - [`Error::ConnectionClosed`] after shutdown
    pub fn subscribe_kline<F>(
        &self,
        symbol: impl Into<String>,
        interval: KlineInterval,
        callback: F,
    ) -> Result<ConnectionId>
    where
        F: Fn(Kline) + Send + Sync + 'static,
    {
        let channel = Channel::Kline {
            symbol: symbol.into(),
            interval,
        };
        self.subscribe_channel(&channel, kline_handler(callback))
    }

    /// Candlesticks at an interval given in its wire form, e.g. `"Min1"`.
    ///
    /// Reaches intervals the venue added after [`KlineInterval`] was last
    /// extended. Shares the channel with [`subscribe_kline`](Self::subscribe_kline)
    /// when the interval is a listed one.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `symbol` or `interval` is invalid
    /// - [`Error::ConnectionClosed`] after shutdown
    pub fn subscribe_kline_wire<F>(
        &self,
        symbol: &str,
        interval: &str,
        callback: F,
    ) -> Result<ConnectionId>
    where
        F: Fn(Kline) + Send + Sync + 'static,
    {
        let identifier = Channel::kline_identifier(symbol, interval)?;
        self.route(identifier, Arc::new(kline_handler(callback)))
    }
}

fn kline_handler<F>(callback: F) -> impl Fn(PushPayload) + Send + Sync + 'static
where
    F: Fn(Kline) + Send + Sync + 'static,
{
    move |payload| match payload {
        PushPayload::Kline(kline) => callback(kline),
        other => mismatched(ChannelKind::Kline, &other),
    }
}

fn mismatched(expected: ChannelKind, payload: &PushPayload) {
    debug!(
        expected = %expected,
        received = %payload.kind(),
        "Dropped push body of unexpected kind"
    );
}

// ============================================================================
// ConnectionPool - Inspection
// ============================================================================

impl ConnectionPool {
    /// Returns the pool configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Returns the number of connections opened so far.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns the number of subscriptions across all connections.
    #[must_use]
    pub fn total_subscriptions(&self) -> usize {
        self.connections.read().iter().map(Connection::size).sum()
    }

    /// Returns the connection holding `channel`, if any.
    #[must_use]
    pub fn find_connection(&self, channel: &str) -> Option<Connection> {
        self.connections
            .read()
            .iter()
            .find(|c| c.contains(channel))
            .cloned()
    }

    /// Returns all connections, newest first.
    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.read().iter().cloned().collect()
    }
}

// ============================================================================
// ConnectionPool - Lifecycle
// ============================================================================

impl ConnectionPool {
    /// Shuts down every connection. Later subscribes fail.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("ConnectionPool shutting down");

        let connections: Vec<_> = self.connections.write().drain(..).collect();
        for connection in connections {
            // Already terminal if it gave up.
            let _ = connection.shutdown();
            debug!(connection_id = %connection.id(), "Connection closed during shutdown");
        }

        info!("ConnectionPool shutdown complete");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::protocol::PushMessage;
    use crate::transport::ReconnectPolicy;

    fn reject_all(_bytes: &[u8]) -> Result<PushMessage> {
        Err(Error::decode("test decoder"))
    }

    /// A pool whose connections never reach the venue and back off for a minute.
    fn offline_pool() -> ConnectionPool {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let config = StreamConfig::builder()
            .endpoint(format!("ws://127.0.0.1:{port}"))
            .reconnect_policy(ReconnectPolicy {
                base_interval: Duration::from_secs(60),
                max_interval: Duration::from_secs(60),
                ..Default::default()
            })
            .build()
            .expect("config");

        ConnectionPool::new(config, reject_all)
    }

    fn channel(n: usize) -> String {
        format!("spot@public.bookTicker.batch.v3.api.pb@SYM{n}USDT")
    }

    #[tokio::test]
    async fn test_pool_starts_empty() {
        let pool = offline_pool();
        assert_eq!(pool.connection_count(), 0);
        assert_eq!(pool.total_subscriptions(), 0);
        assert!(pool.find_connection(&channel(0)).is_none());
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_capacity_opens_new_connections() {
        let pool = offline_pool();

        for n in 0..60 {
            pool.subscribe(channel(n), |_| {}).expect("subscribe");
        }

        let sizes: Vec<usize> = pool.connections().iter().map(Connection::size).collect();
        assert_eq!(sizes, vec![10, 25, 25]);
        assert_eq!(pool.total_subscriptions(), 60);
        assert!(sizes.iter().all(|&size| size <= SOFT_SUBSCRIPTION_CAP));

        pool.shutdown();
    }

    #[tokio::test]
    async fn test_resubscribe_reuses_holder() {
        let pool = offline_pool();

        let first = pool.subscribe(channel(0), |_| {}).expect("subscribe");
        for n in 1..SOFT_SUBSCRIPTION_CAP {
            pool.subscribe(channel(n), |_| {}).expect("subscribe");
        }
        assert_eq!(pool.connection_count(), 1);

        // Full, but the channel is already held: no new connection.
        let again = pool.subscribe(channel(0), |_| {}).expect("subscribe");
        assert_eq!(again, first);
        assert_eq!(pool.connection_count(), 1);

        // A new channel overflows.
        let overflow = pool.subscribe(channel(99), |_| {}).expect("subscribe");
        assert_ne!(overflow, first);
        assert_eq!(pool.connection_count(), 2);

        // Old channel still resolves to the oldest connection.
        let back = pool.subscribe(channel(3), |_| {}).expect("subscribe");
        assert_eq!(back, first);
        assert_eq!(pool.total_subscriptions(), SOFT_SUBSCRIPTION_CAP + 1);

        pool.shutdown();
    }

    #[tokio::test]
    async fn test_single_holder_keeps_latest_handler() {
        let pool = offline_pool();
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first_calls);
        pool.subscribe(channel(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("subscribe");

        let counter = Arc::clone(&second_calls);
        pool.subscribe(channel(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("subscribe");

        let holders: Vec<_> = pool
            .connections()
            .into_iter()
            .filter(|c| c.contains(&channel(1)))
            .collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].size(), 1);

        let handler = holders[0].handler(&channel(1)).expect("handler");
        handler(PushPayload::BookTickerBatch(BookTickerBatch::default()));

        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);

        pool.shutdown();
    }

    #[tokio::test]
    async fn test_typed_subscription_filters_kind() {
        let pool = offline_pool();
        let closes = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let sink = Arc::clone(&closes);
        pool.subscribe_kline("BTCUSDT", KlineInterval::Min1, move |kline| {
            sink.lock().push(kline.closing_price);
        })
        .expect("subscribe");

        let id = "spot@public.kline.v3.api.pb@BTCUSDT@Min1";
        let handler = pool
            .find_connection(id)
            .and_then(|c| c.handler(id))
            .expect("handler");

        handler(PushPayload::Kline(Kline {
            closing_price: "42.0".into(),
            ..Default::default()
        }));
        handler(PushPayload::BookTicker(BookTicker::default()));

        assert_eq!(*closes.lock(), vec!["42.0".to_string()]);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_kline_by_wire_interval() {
        let pool = offline_pool();
        let closes = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let sink = Arc::clone(&closes);
        let unlisted = pool
            .subscribe_kline_wire("BTCUSDT", "Min2", move |kline| {
                sink.lock().push(kline.closing_price);
            })
            .expect("subscribe");

        let id = "spot@public.kline.v3.api.pb@BTCUSDT@Min2";
        let handler = pool
            .find_connection(id)
            .and_then(|c| c.handler(id))
            .expect("handler");
        handler(PushPayload::Kline(Kline {
            closing_price: "7.0".into(),
            ..Default::default()
        }));
        handler(PushPayload::AggreDeals(AggreDeals::default()));
        assert_eq!(*closes.lock(), vec!["7.0".to_string()]);

        // A listed interval lands on the typed channel's single holder.
        let typed = pool
            .subscribe_kline("BTCUSDT", KlineInterval::Min1, |_| {})
            .expect("subscribe");
        let wire = pool
            .subscribe_kline_wire("BTCUSDT", "Min1", |_| {})
            .expect("subscribe");
        assert_eq!(typed, wire);
        assert_eq!(typed, unlisted);
        assert_eq!(pool.total_subscriptions(), 2);

        assert!(matches!(
            pool.subscribe_kline_wire("BTCUSDT", "Min 1", |_| {}),
            Err(Error::InvalidArgument { .. })
        ));

        pool.shutdown();
    }

    #[tokio::test]
    async fn test_typed_subscription_rejects_bad_symbol() {
        let pool = offline_pool();
        let err = pool
            .subscribe_book_ticker("BTC@USDT", AggregationDelay::Ms10, |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert_eq!(pool.connection_count(), 0);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_fails() {
        let pool = offline_pool();
        pool.subscribe_account(|_| {}).expect("subscribe");
        pool.shutdown();

        assert_eq!(pool.connection_count(), 0);
        assert!(matches!(
            pool.subscribe_account_deals(|_| {}),
            Err(Error::ConnectionClosed)
        ));
    }
}
