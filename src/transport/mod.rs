//! WebSocket transport layer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              ConnectionPool              │
//! │  ┌────────────────────────────────────┐  │         ┌─────────┐
//! │  │ Connection 3 (newest, 10 channels) │◄─┼────────►│         │
//! │  │ Connection 2 (25 channels)         │◄─┼────────►│  Venue  │
//! │  │ Connection 1 (25 channels)         │◄─┼────────►│         │
//! │  └────────────────────────────────────┘  │         └─────────┘
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | One transport, its subscription table and event loop |
//! | `pool` | Routing and capacity policy across connections |
//! | `reconnect` | Attempt cap and backoff delay |

// ============================================================================
// Submodules
// ============================================================================

/// Single connection and event loop.
pub mod connection;

/// Connection pool.
pub mod pool;

/// Reconnect policy.
pub mod reconnect;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionId, ConnectionState, ConnectionStats, Handler};
pub use pool::{ConnectionPool, SOFT_SUBSCRIPTION_CAP, VENUE_SUBSCRIPTION_LIMIT};
pub use reconnect::ReconnectPolicy;
