//! Protocol-level errors.

use thiserror::Error;

/// Failure to interpret something received from (or destined for) the wire.
///
/// `serde_json` errors are flattened to strings so the error stays `Clone`
/// and comparable; callers only ever log or display them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unknown channel kind: {0}")]
    UnknownChannel(String),

    #[error("Malformed {message_type} payload: {reason}")]
    MalformedPayload {
        message_type: String,
        reason: String,
    },

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Failed to encode {message_type}: {reason}")]
    Encode {
        message_type: String,
        reason: String,
    },
}

impl ProtocolError {
    pub(crate) fn malformed(message_type: &str, err: serde_json::Error) -> Self {
        Self::MalformedPayload {
            message_type: message_type.to_string(),
            reason: err.to_string(),
        }
    }
}
