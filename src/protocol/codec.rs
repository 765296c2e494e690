//! Inbound frame classification and the push decoder seam.
//!
//! Binary envelope decoding belongs to an external codec supplied through
//! [`PushDecoder`]. Before a frame reaches the decoder, the connection
//! sniffs it: a payload whose first byte is `{` or `[` is treated as a
//! textual control reply and never decoded.
//!
//! The sniff is a heuristic. A binary envelope that happens to start with
//! `0x7B` or `0x5B` is classified as control and dropped; such frames are
//! counted in `non_data_frames` together with genuine replies.

// ============================================================================
// Imports
// ============================================================================

use crate::error::Result;

use super::push::PushMessage;

// ============================================================================
// FrameKind
// ============================================================================

/// Classification of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// JSON-looking control reply.
    Control,
    /// Binary push data.
    Data,
}

impl FrameKind {
    /// Classifies a raw frame by its first byte.
    #[inline]
    #[must_use]
    pub fn classify(bytes: &[u8]) -> Self {
        match bytes.first() {
            Some(b'{' | b'[') => Self::Control,
            _ => Self::Data,
        }
    }
}

// ============================================================================
// PushDecoder
// ============================================================================

/// Decodes binary push frames into [`PushMessage`]s.
///
/// Called on the connection's event-loop task for every frame classified
/// as [`FrameKind::Data`]. Errors are logged and the frame is dropped.
pub trait PushDecoder: Send + Sync + 'static {
    /// Decodes one binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Decode`] (or [`crate::Error::Json`]) if the
    /// bytes are not a valid envelope.
    fn decode(&self, bytes: &[u8]) -> Result<PushMessage>;
}

impl<F> PushDecoder for F
where
    F: Fn(&[u8]) -> Result<PushMessage> + Send + Sync + 'static,
{
    fn decode(&self, bytes: &[u8]) -> Result<PushMessage> {
        self(bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
