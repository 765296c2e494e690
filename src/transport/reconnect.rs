//! Reconnect attempt cap and backoff delay.
//!
//! The delay grows as `base * decay^attempts`, clamped to `max`. With the
//! venue defaults (`base` 1000 ms, `decay` 500, `max` 5000 ms) the first
//! retry waits one second and every later retry waits the clamp. This is
//! much steeper than the usual doubling shape and is kept as is.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Reconnect attempts allowed before a connection gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first reconnect attempt.
pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_millis(1000);

/// Growth factor applied per attempt.
pub const DEFAULT_DECAY_FACTOR: u64 = 500;

/// Upper bound on any single reconnect delay.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(5000);

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Reconnect policy of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts allowed before entering the terminal `GaveUp` state.
    pub max_attempts: u32,
    /// Delay for attempt zero.
    pub base_interval: Duration,
    /// Multiplier raised to the attempt count.
    pub decay_factor: u64,
    /// Clamp applied to every computed delay.
    pub max_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_interval: DEFAULT_BASE_INTERVAL,
            decay_factor: DEFAULT_DECAY_FACTOR,
            max_interval: DEFAULT_MAX_INTERVAL,
        }
    }
}

impl ReconnectPolicy {
    /// Returns the delay to wait before reconnect attempt number `attempts`.
    ///
    /// Non-decreasing in `attempts` and never above `max_interval`.
    #[must_use]
    pub fn delay(&self, attempts: u32) -> Duration {
        let base_ms = u64::try_from(self.base_interval.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_interval.as_millis()).unwrap_or(u64::MAX);

        let factor = self.decay_factor.saturating_pow(attempts);
        let delay_ms = base_ms.saturating_mul(factor).min(max_ms);

        Duration::from_millis(delay_ms)
    }

    /// Returns `true` once `attempts` reached the cap.
    #[inline]
    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the decay factor is zero or the base
    /// interval exceeds the clamp.
    pub fn validate(&self) -> Result<()> {
        if self.decay_factor == 0 {
            return Err(Error::config("reconnect decay factor must be at least 1"));
        }

        if self.base_interval > self.max_interval {
            return Err(Error::config(format!(
                "reconnect base interval ({}ms) exceeds max interval ({}ms)",
                self.base_interval.as_millis(),
                self.max_interval.as_millis()
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
