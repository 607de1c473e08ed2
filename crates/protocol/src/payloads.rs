//! Typed views over the payloads the coordination layer must understand.
//!
//! Game-domain payloads stay opaque `serde_json::Value`s; only the fields the
//! session lifecycle and interaction correlation depend on are typed here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload field that carries a correlated interaction id, in both directions.
pub const INTERACTION_ID_FIELD: &str = "interactionId";

/// Payload field that carries an extension block.
pub const EXTENSION_FIELD: &str = "extension";

/// `activityCreated` / `activityJoinRequest` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityCreatedData {
    /// Server-assigned id of the activity session to join.
    pub activity_id: String,
    /// Free-form activity type ("battle", "trade", ...).
    #[serde(default)]
    pub activity_type: Option<String>,
}

/// `activityEnded` payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEndedData {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub outcome: Option<Value>,
}

/// Body of the `joined` envelope the server sends once a session is joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedData {
    pub session_id: String,
}

/// Open, versioned extension block that narrows an inbound message to a more
/// specific listener (`<messageType>:<kind>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    pub kind: String,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Everything else in the block, untouched.
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

fn default_version() -> u32 {
    1
}

impl Extension {
    /// Event name listeners use to receive only this extension.
    pub fn routed_name(&self, message_type: &str) -> String {
        format!("{message_type}:{}", self.kind)
    }
}

pub(crate) fn extension_of(payload: &Value) -> Option<Extension> {
    let block = payload.get(EXTENSION_FIELD)?;
    serde_json::from_value(block.clone()).ok()
}

pub(crate) fn interaction_id_of(payload: &Value) -> Option<String> {
    payload
        .get(INTERACTION_ID_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extension_defaults_version_and_keeps_body() {
        let ext = extension_of(&json!({
            "extension": { "kind": "unifiedInterface", "screen": "shop" }
        }))
        .unwrap();
        assert_eq!(ext.kind, "unifiedInterface");
        assert_eq!(ext.version, 1);
        assert_eq!(ext.body.get("screen"), Some(&json!("shop")));
        assert_eq!(ext.routed_name("npcResult"), "npcResult:unifiedInterface");
    }

    #[test]
    fn test_malformed_extension_is_ignored() {
        assert!(extension_of(&json!({ "extension": "shop" })).is_none());
        assert!(extension_of(&json!({})).is_none());
    }

    #[test]
    fn test_activity_created_decodes_camel_case() {
        let data: ActivityCreatedData =
            serde_json::from_value(json!({ "activityId": "b-42", "activityType": "battle" }))
                .unwrap();
        assert_eq!(data.activity_id, "b-42");
        assert_eq!(data.activity_type.as_deref(), Some("battle"));
    }
}
