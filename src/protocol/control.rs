//! Outbound control frames and inbound control replies.
//!
//! # Format
//!
//! ```json
//! {"method":"PING"}
//! {"method":"SUBSCRIPTION","params":["spot@public.kline.v3.api.pb@BTCUSDT@Min1"]}
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::to_string;

use crate::error::{Error, Result};

// ============================================================================
// ControlFrame
// ============================================================================

/// A text frame sent from the client to the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method")]
pub enum ControlFrame {
    /// Keep-alive.
    #[serde(rename = "PING")]
    Ping,

    /// Subscription request for one or more channel identifiers.
    #[serde(rename = "SUBSCRIPTION")]
    Subscription {
        /// Channel identifiers.
        params: Vec<String>,
    },
}

impl ControlFrame {
    /// Creates a subscription request for a single channel.
    #[inline]
    #[must_use]
    pub fn subscription(channel: impl Into<String>) -> Self {
        Self::Subscription {
            params: vec![channel.into()],
        }
    }

    /// Serializes the frame to its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(to_string(self)?)
    }
}

// ============================================================================
// ControlReply
// ============================================================================

/// A JSON reply from the venue (subscription ack, `PONG`).
///
/// Replies carry no push data; the connection only logs them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ControlReply {
    /// Request id echoed by the venue.
    pub id: i64,
    /// Zero on success.
    pub code: i64,
    /// Channel name, `PONG`, or an error description.
    pub msg: String,
}

impl ControlReply {
    /// Returns `true` if the venue reported success.
    #[inline]
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Converts a rejection into an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] carrying the venue's code and message if
    /// `code` is non-zero.
    pub fn into_result(self) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(Error::protocol(format!(
                "venue rejected request (code {}): {}",
                self.code, self.msg
            )))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_json() {
        assert_eq!(ControlFrame::Ping.to_json().unwrap(), r#"{"method":"PING"}"#);
    }

    #[test]
    fn test_subscription_json() {
        let frame = ControlFrame::subscription("spot@private.deals.v3.api.pb");
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"method":"SUBSCRIPTION","params":["spot@private.deals.v3.api.pb"]}"#
        );
    }

    #[test]
    fn test_reply_parse() {
        let reply: ControlReply =
            serde_json::from_str(r#"{"id":0,"code":0,"msg":"PONG"}"#).unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.msg, "PONG");

        let failed: ControlReply =
            serde_json::from_str(r#"{"code":1,"msg":"Not Subscribed successfully!"}"#).unwrap();
        assert!(!failed.is_ok());
        assert_eq!(failed.id, 0);
    }

    #[test]
    fn test_rejected_reply_is_protocol_error() {
        let reply = ControlReply {
            id: 0,
            code: 1,
            msg: "Not Subscribed successfully!".into(),
        };

        let err = reply.into_result().unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(err.to_string().contains("Not Subscribed successfully!"));

        let ack = ControlReply {
            msg: "PONG".into(),
            ..Default::default()
        };
        assert_eq!(ack.into_result().unwrap().msg, "PONG");
    }
}
