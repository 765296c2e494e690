//! Stream configuration and its builder.
//!
//! Configuration is fixed when the pool is created and shared, read-only,
//! by every connection the pool spawns.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use mexc_spot_stream::StreamConfig;
//!
//! # fn example() -> mexc_spot_stream::Result<()> {
//! let config = StreamConfig::builder()
//!     .secret("api-secret")
//!     .heartbeat_interval(Duration::from_secs(15))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::transport::ReconnectPolicy;

// ============================================================================
// Constants
// ============================================================================

/// Default push-data endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://wbs-api.mexc.com/ws";

/// Keep-alive `PING` cadence while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

// ============================================================================
// StreamConfig
// ============================================================================

/// Immutable configuration shared by the pool and its connections.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Account credential.
    secret: String,
    /// WebSocket endpoint.
    endpoint: Url,
    /// Interval between keep-alive frames.
    heartbeat_interval: Duration,
    /// Reconnect cap and backoff.
    reconnect: ReconnectPolicy,
}

impl StreamConfig {
    /// Creates a configuration with default endpoint and timings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the default endpoint fails validation.
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        Self::builder().secret(secret).build()
    }

    /// Returns a new builder.
    #[inline]
    #[must_use]
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::new()
    }

    /// Returns the account credential.
    #[inline]
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Returns the WebSocket endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Returns the keep-alive interval.
    #[inline]
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Returns the reconnect policy.
    #[inline]
    #[must_use]
    pub const fn reconnect_policy(&self) -> &ReconnectPolicy {
        &self.reconnect
    }
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("secret", &"***")
            .field("endpoint", &self.endpoint.as_str())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

// ============================================================================
// StreamConfigBuilder
// ============================================================================

/// Builder for [`StreamConfig`].
#[derive(Debug, Default, Clone)]
pub struct StreamConfigBuilder {
    secret: Option<String>,
    endpoint: Option<String>,
    heartbeat_interval: Option<Duration>,
    reconnect: Option<ReconnectPolicy>,
}

impl StreamConfigBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the account credential.
    #[inline]
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Overrides the WebSocket endpoint (default [`DEFAULT_ENDPOINT`]).
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Overrides the keep-alive interval (default 15s).
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Overrides the reconnect policy.
    #[inline]
    #[must_use]
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the endpoint is not a URL
    /// - [`Error::Config`] if the endpoint scheme is not `ws`/`wss`, the
    ///   heartbeat interval is zero or the reconnect policy is inconsistent
    pub fn build(self) -> Result<StreamConfig> {
        let endpoint = self.validate_endpoint()?;

        let heartbeat_interval = self
            .heartbeat_interval
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        if heartbeat_interval.is_zero() {
            return Err(Error::config("heartbeat interval must be non-zero"));
        }

        let reconnect = self.reconnect.unwrap_or_default();
        reconnect.validate()?;

        Ok(StreamConfig {
            secret: self.secret.unwrap_or_default(),
            endpoint,
            heartbeat_interval,
            reconnect,
        })
    }

    fn validate_endpoint(&self) -> Result<Url> {
        let raw = self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let url = Url::parse(raw)?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::config(format!(
                "endpoint scheme must be ws or wss, got {other}: {raw}"
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
