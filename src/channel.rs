//! Subscription channels and their wire identifiers.
//!
//! A channel identifier is both the topic sent in a `SUBSCRIPTION` request
//! and the routing key used to find the handler of an inbound push
//! message. Formatting is deterministic and injective over
//! `(kind, parameters)`: symbols may not contain `@` or whitespace, every
//! other parameter comes from a closed set.
//!
//! | Kind | Identifier |
//! |------|------------|
//! | account orders | `spot@private.orders.v3.api.pb` |
//! | account deals | `spot@private.deals.v3.api.pb` |
//! | account | `spot@private.account.v3.api.pb` |
//! | limit depth | `spot@public.limit.depth.v3.api.pb@{symbol}@{level}` |
//! | aggregated depth | `spot@public.aggre.depth.v3.api.pb@{delay}@{symbol}` |
//! | book ticker | `spot@public.aggre.bookTicker.v3.api.pb@{delay}@{symbol}` |
//! | book ticker batch | `spot@public.bookTicker.batch.v3.api.pb@{symbol}` |
//! | aggregated deals | `spot@public.aggre.deals.v3.api.pb@{delay}@{symbol}` |
//! | kline | `spot@public.kline.v3.api.pb@{symbol}@{interval}` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// ============================================================================
// ChannelKind
// ============================================================================

/// The nine push channel families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Own order updates.
    AccountOrders,
    /// Own fills.
    AccountDeals,
    /// Balance changes.
    Account,
    /// Partial order book at a fixed level.
    LimitDepth,
    /// Incremental order book, aggregated at a delay.
    AggreDepth,
    /// Best bid/offer, aggregated at a delay.
    BookTicker,
    /// Batched best bid/offer.
    BookTickerBatch,
    /// Public trades, aggregated at a delay.
    AggreDeals,
    /// Candlesticks.
    Kline,
}

impl ChannelKind {
    /// All kinds, in declaration order.
    pub const ALL: [ChannelKind; 9] = [
        Self::AccountOrders,
        Self::AccountDeals,
        Self::Account,
        Self::LimitDepth,
        Self::AggreDepth,
        Self::BookTicker,
        Self::BookTickerBatch,
        Self::AggreDeals,
        Self::Kline,
    ];

    /// Returns the base topic, the identifier prefix before parameters.
    #[must_use]
    pub const fn topic(self) -> &'static str {
        match self {
            Self::AccountOrders => "spot@private.orders.v3.api.pb",
            Self::AccountDeals => "spot@private.deals.v3.api.pb",
            Self::Account => "spot@private.account.v3.api.pb",
            Self::LimitDepth => "spot@public.limit.depth.v3.api.pb",
            Self::AggreDepth => "spot@public.aggre.depth.v3.api.pb",
            Self::BookTicker => "spot@public.aggre.bookTicker.v3.api.pb",
            Self::BookTickerBatch => "spot@public.bookTicker.batch.v3.api.pb",
            Self::AggreDeals => "spot@public.aggre.deals.v3.api.pb",
            Self::Kline => "spot@public.kline.v3.api.pb",
        }
    }


    /// Resolves the kind of a full channel identifier.
    ///
    /// The base topic is `spot@` followed by the second `@`-separated
    /// segment, so `spot@public.kline.v3.api.pb@BTCUSDT@Min1` resolves to
    /// [`ChannelKind::Kline`].
    #[must_use]
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        let mut segments = identifier.split('@');
        if segments.next()? != "spot" {
            return None;
        }
        let topic = segments.next()?;

        Self::ALL
            .into_iter()
            .find(|kind| kind.topic().strip_prefix("spot@") == Some(topic))
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Partial depth level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthLevel {
    /// Five levels per side.
    Five,
    /// Ten levels per side.
    Ten,
    /// Twenty levels per side.
    Twenty,
}

impl DepthLevel {
    /// Returns the numeric level.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Ten => 10,
            Self::Twenty => 20,
        }
    }
}

impl TryFrom<u8> for DepthLevel {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            5 => Ok(Self::Five),
            10 => Ok(Self::Ten),
            20 => Ok(Self::Twenty),
            other => Err(Error::invalid_argument(format!(
                "depth level must be 5, 10 or 20, got {other}"
            ))),
        }
    }
}

impl fmt::Display for DepthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Aggregation window of the `aggre` channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationDelay {
    /// 10 milliseconds.
    Ms10,
    /// 100 milliseconds.
    Ms100,
}

impl AggregationDelay {
    /// Returns the wire form.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ms10 => "10ms",
            Self::Ms100 => "100ms",
        }
    }
}

impl FromStr for AggregationDelay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "10ms" => Ok(Self::Ms10),
            "100ms" => Ok(Self::Ms100),
            other => Err(Error::invalid_argument(format!(
                "aggregation delay must be 10ms or 100ms, got {other}"
            ))),
        }
    }
}

impl fmt::Display for AggregationDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candlestick interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KlineInterval {
    /// One minute.
    Min1,
    /// Five minutes.
    Min5,
    /// Fifteen minutes.
    Min15,
    /// Thirty minutes.
    Min30,
    /// One hour.
    Min60,
    /// Four hours.
    Hour4,
    /// Eight hours.
    Hour8,
    /// One day.
    Day1,
    /// One week.
    Week1,
    /// One month.
    Month1,
}

impl KlineInterval {
    /// All intervals, shortest first.
    pub const ALL: [KlineInterval; 10] = [
        Self::Min1,
        Self::Min5,
        Self::Min15,
        Self::Min30,
        Self::Min60,
        Self::Hour4,
        Self::Hour8,
        Self::Day1,
        Self::Week1,
        Self::Month1,
    ];

    /// Returns the wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "Min1",
            Self::Min5 => "Min5",
            Self::Min15 => "Min15",
            Self::Min30 => "Min30",
            Self::Min60 => "Min60",
            Self::Hour4 => "Hour4",
            Self::Hour8 => "Hour8",
            Self::Day1 => "Day1",
            Self::Week1 => "Week1",
            Self::Month1 => "Month1",
        }
    }
}

impl FromStr for KlineInterval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| Error::invalid_argument(format!("unknown kline interval: {s}")))
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Channel
// ============================================================================

/// A subscription channel with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Own order updates.
    AccountOrders,
    /// Own fills.
    AccountDeals,
    /// Balance changes.
    Account,
    /// Partial order book.
    LimitDepth {
        /// Trading pair, e.g. `BTCUSDT`.
        symbol: String,
        /// Levels per side.
        level: DepthLevel,
    },
    /// Aggregated incremental order book.
    AggreDepth {
        /// Trading pair.
        symbol: String,
        /// Aggregation window.
        delay: AggregationDelay,
    },
    /// Aggregated best bid/offer.
    BookTicker {
        /// Trading pair.
        symbol: String,
        /// Aggregation window.
        delay: AggregationDelay,
    },
    /// Batched best bid/offer.
    BookTickerBatch {
        /// Trading pair.
        symbol: String,
    },
    /// Aggregated public trades.
    AggreDeals {
        /// Trading pair.
        symbol: String,
        /// Aggregation window.
        delay: AggregationDelay,
    },
    /// Candlesticks.
    Kline {
        /// Trading pair.
        symbol: String,
        /// Candle width.
        interval: KlineInterval,
    },
}

impl Channel {
    /// Returns the channel family.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        match self {
            Self::AccountOrders => ChannelKind::AccountOrders,
            Self::AccountDeals => ChannelKind::AccountDeals,
            Self::Account => ChannelKind::Account,
            Self::LimitDepth { .. } => ChannelKind::LimitDepth,
            Self::AggreDepth { .. } => ChannelKind::AggreDepth,
            Self::BookTicker { .. } => ChannelKind::BookTicker,
            Self::BookTickerBatch { .. } => ChannelKind::BookTickerBatch,
            Self::AggreDeals { .. } => ChannelKind::AggreDeals,
            Self::Kline { .. } => ChannelKind::Kline,
        }
    }

    /// Formats the wire identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the symbol is empty or contains
    /// `@` or whitespace.
    pub fn identifier(&self) -> Result<String> {
        let topic = self.kind().topic();

        let identifier = match self {
            Self::AccountOrders | Self::AccountDeals | Self::Account => topic.to_string(),
            Self::LimitDepth { symbol, level } => {
                format!("{topic}@{}@{level}", checked_symbol(symbol)?)
            }
            Self::AggreDepth { symbol, delay }
            | Self::BookTicker { symbol, delay }
            | Self::AggreDeals { symbol, delay } => {
                format!("{topic}@{delay}@{}", checked_symbol(symbol)?)
            }
            Self::BookTickerBatch { symbol } => {
                format!("{topic}@{}", checked_symbol(symbol)?)
            }
            Self::Kline { symbol, interval } => {
                format!("{topic}@{}@{interval}", checked_symbol(symbol)?)
            }
        };

        Ok(identifier)
    }

    /// Formats a kline identifier from an interval in its wire form.
    ///
    /// Accepts intervals [`KlineInterval`] does not list yet. A listed
    /// interval yields the same identifier as [`Channel::Kline`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `symbol` or `interval` is empty
    /// or contains `@` or whitespace.
    pub fn kline_identifier(symbol: &str, interval: &str) -> Result<String> {
        Ok(format!(
            "{}@{}@{}",
            ChannelKind::Kline.topic(),
            checked_symbol(symbol)?,
            checked_segment("interval", interval)?
        ))
    }
}

fn checked_symbol(symbol: &str) -> Result<&str> {
    checked_segment("symbol", symbol)
}

fn checked_segment<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        return Err(Error::invalid_argument(format!("{name} must not be empty")));
    }

    if value.contains('@') || value.chars().any(char::is_whitespace) {
        return Err(Error::invalid_argument(format!(
            "{name} must not contain '@' or whitespace: {value:?}"
        )));
    }

    Ok(value)
}

// ============================================================================
// Tests
// ============================================================================
