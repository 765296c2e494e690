//! Decoded push messages.
//!
//! The venue pushes a binary envelope carrying the channel identifier,
//! optional symbol metadata and exactly one typed body. Field names follow
//! the venue's JSON mapping of those bodies (camelCase); decimal values
//! stay strings, timestamps are milliseconds.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value};

use crate::channel::ChannelKind;
use crate::error::Result;

// ============================================================================
// PushMessage
// ============================================================================

/// A decoded push-data envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    /// Full channel identifier, the routing key.
    pub channel: String,
    /// Trading pair, absent on account channels.
    pub symbol: Option<String>,
    /// Venue send time in milliseconds.
    pub send_time: Option<i64>,
    /// Typed body.
    pub payload: PushPayload,
}

impl PushMessage {
    /// Creates an envelope without metadata.
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: PushPayload) -> Self {
        Self {
            channel: channel.into(),
            symbol: None,
            send_time: None,
            payload,
        }
    }
}

// ============================================================================
// PushPayload
// ============================================================================

/// One body per channel kind.
#[derive(Debug, Clone, PartialEq)]
pub enum PushPayload {
    /// Own order update.
    AccountOrders(PrivateOrder),
    /// Own fill.
    AccountDeals(PrivateDeal),
    /// Balance change.
    Account(PrivateAccount),
    /// Partial order book.
    LimitDepth(LimitDepth),
    /// Aggregated incremental order book.
    AggreDepth(AggreDepth),
    /// Aggregated best bid/offer.
    BookTicker(BookTicker),
    /// Batched best bid/offer.
    BookTickerBatch(BookTickerBatch),
    /// Aggregated public trades.
    AggreDeals(AggreDeals),
    /// Candlestick.
    Kline(Kline),
}

impl PushPayload {
    /// Returns the channel kind this body belongs to.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        match self {
            Self::AccountOrders(_) => ChannelKind::AccountOrders,
            Self::AccountDeals(_) => ChannelKind::AccountDeals,
            Self::Account(_) => ChannelKind::Account,
            Self::LimitDepth(_) => ChannelKind::LimitDepth,
            Self::AggreDepth(_) => ChannelKind::AggreDepth,
            Self::BookTicker(_) => ChannelKind::BookTicker,
            Self::BookTickerBatch(_) => ChannelKind::BookTickerBatch,
            Self::AggreDeals(_) => ChannelKind::AggreDeals,
            Self::Kline(_) => ChannelKind::Kline,
        }
    }

    /// Builds a typed body from the venue's JSON rendering of it.
    ///
    /// Intended for decoders that turn the binary envelope into JSON
    /// first. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if `body` does not match the shape
    /// of `kind`.
    pub fn from_json(kind: ChannelKind, body: Value) -> Result<Self> {
        let payload = match kind {
            ChannelKind::AccountOrders => Self::AccountOrders(from_value(body)?),
            ChannelKind::AccountDeals => Self::AccountDeals(from_value(body)?),
            ChannelKind::Account => Self::Account(from_value(body)?),
            ChannelKind::LimitDepth => Self::LimitDepth(from_value(body)?),
            ChannelKind::AggreDepth => Self::AggreDepth(from_value(body)?),
            ChannelKind::BookTicker => Self::BookTicker(from_value(body)?),
            ChannelKind::BookTickerBatch => Self::BookTickerBatch(from_value(body)?),
            ChannelKind::AggreDeals => Self::AggreDeals(from_value(body)?),
            ChannelKind::Kline => Self::Kline(from_value(body)?),
        };

        Ok(payload)
    }
}

// ============================================================================
// Public Bodies
// ============================================================================

/// A single price level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DepthItem {
    pub price: String,
    pub quantity: String,
}

/// Partial order book snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitDepth {
    pub asks: Vec<DepthItem>,
    pub bids: Vec<DepthItem>,
    pub event_type: String,
    pub version: String,
}

/// Aggregated order book delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggreDepth {
    pub asks: Vec<DepthItem>,
    pub bids: Vec<DepthItem>,
    pub event_type: String,
    pub from_version: String,
    pub to_version: String,
}

/// Best bid and offer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookTicker {
    pub bid_price: String,
    pub bid_quantity: String,
    pub ask_price: String,
    pub ask_quantity: String,
}

/// Several best bid/offer updates in one push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookTickerBatch {
    pub items: Vec<BookTicker>,
}

/// A single public trade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DealItem {
    pub price: String,
    pub quantity: String,
    /// 1 buy, 2 sell.
    pub trade_type: i32,
    pub time: i64,
}

/// Aggregated public trades.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggreDeals {
    pub deals: Vec<DealItem>,
    pub event_type: String,
}

/// Candlestick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Kline {
    pub interval: String,
    pub window_start: i64,
    pub opening_price: String,
    pub closing_price: String,
    pub highest_price: String,
    pub lowest_price: String,
    pub volume: String,
    pub amount: String,
    pub window_end: i64,
}

// ============================================================================
// Private Bodies
// ============================================================================

/// Balance change of one asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivateAccount {
    pub vcoin_name: String,
    pub coin_id: String,
    pub balance_amount: String,
    pub balance_amount_change: String,
    pub frozen_amount: String,
    pub frozen_amount_change: String,
    #[serde(rename = "type")]
    pub change_type: String,
    pub time: i64,
}

/// Own fill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivateDeal {
    pub price: String,
    pub quantity: String,
    pub amount: String,
    pub trade_type: i32,
    pub is_maker: bool,
    pub is_self_trade: bool,
    pub trade_id: String,
    pub client_order_id: String,
    pub order_id: String,
    pub fee_amount: String,
    pub fee_currency: String,
    pub time: i64,
}

/// Own order update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivateOrder {
    pub id: String,
    pub client_id: String,
    pub price: String,
    pub quantity: String,
    pub amount: String,
    pub avg_price: String,
    pub order_type: i32,
    pub trade_type: i32,
    pub is_maker: bool,
    pub remain_amount: String,
    pub remain_quantity: String,
    pub last_deal_quantity: String,
    pub cumulative_quantity: String,
    pub cumulative_amount: String,
    pub status: i32,
    pub create_time: i64,
}

// ============================================================================
// Tests
// ============================================================================
