//! Wire message types.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Encoding |
//! |---------|-----------|----------|
//! | [`ControlFrame`] | Local → Venue | JSON text (`PING`, `SUBSCRIPTION`) |
//! | [`ControlReply`] | Venue → Local | JSON (acks, `PONG`) |
//! | [`PushMessage`] | Venue → Local | Binary envelope, decoded by a [`PushDecoder`] |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Frame classification and the decoder trait |
//! | `control` | Control frames and replies |
//! | `push` | Push envelope and typed bodies |

// ============================================================================
// Submodules
// ============================================================================

/// Frame classification and decoder seam.
pub mod codec;

/// Control frames.
pub mod control;

/// Push envelope and bodies.
pub mod push;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{FrameKind, PushDecoder};
pub use control::{ControlFrame, ControlReply};
pub use push::{
    AggreDeals, AggreDepth, BookTicker, BookTickerBatch, DealItem, DepthItem, Kline, LimitDepth,
    PrivateAccount, PrivateDeal, PrivateOrder, PushMessage, PushPayload,
};
