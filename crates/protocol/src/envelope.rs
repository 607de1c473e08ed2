//! JSON envelope used on the wire by the WebSocket adapter.
//!
//! Every frame is `{"type": "<messageType>", "payload": {...}}`. Two system
//! types are reserved: `joined` (server -> client, carries `JoinedData`) and
//! `leave` (client -> server).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Server confirmation that the session has been joined.
pub const JOINED: &str = "joined";

/// Client request to leave the session.
pub const LEAVE: &str = "leave";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode {
            message_type: self.message_type.clone(),
            reason: e.to_string(),
        })
    }

    pub fn is_system(&self) -> bool {
        self.message_type == JOINED || self.message_type == LEAVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_without_payload_defaults_to_null() {
        let env = Envelope::decode(r#"{"type":"leaveAcknowledged"}"#).unwrap();
        assert_eq!(env.message_type, "leaveAcknowledged");
        assert_eq!(env.payload, Value::Null);
        assert!(!env.is_system());
    }

    #[test]
    fn test_encode_uses_type_field() {
        let text = Envelope::new(LEAVE, json!({})).encode().unwrap();
        assert_eq!(text, r#"{"type":"leave","payload":{}}"#);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Envelope::decode("not json"),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }
}
