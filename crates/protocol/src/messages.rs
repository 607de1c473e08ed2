//! Message catalogs for the world and activity channels
//!
//! Inbound traffic is identified by a `type` string on the wire. Known types
//! map onto closed enums per channel; anything else is kept as
//! `InboundKind::Unknown` so it can still be dispatched generically.
//!
//! ## Versioning Policy
//!
//! - New variants can be added at the end (forward compatible)
//! - Renaming a wire name is a breaking change
//! - Unrecognized wire names never fail parsing

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::ChannelKind;
use crate::error::ProtocolError;
use crate::interaction::InteractionKind;
use crate::payloads::{self, Extension};

/// Declares a closed catalog of wire message types with `ALL`, `as_str` and
/// `parse` helpers.
macro_rules! message_kinds {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            pub fn parse(message_type: &str) -> Option<Self> {
                match message_type {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

message_kinds! {
    /// Messages the world session sends to the client.
    WorldMessageKind {
        ActivityCreated => "activityCreated",
        ActivityJoinRequest => "activityJoinRequest",
        LeaveAcknowledged => "leaveAcknowledged",
        StatusUpdate => "statusUpdate",
        ObjectResult => "objectResult",
        SearchResult => "searchResult",
        NpcResult => "npcResult",
    }
}

message_kinds! {
    /// Messages an activity session sends to the client.
    ActivityMessageKind {
        PhaseChanged => "phaseChanged",
        TurnChanged => "turnChanged",
        ActionResult => "actionResult",
        ActivityEnded => "activityEnded",
        ActivityError => "activityError",
    }
}

/// Inbound message types that must be bound on a channel before it counts
/// as ready for interaction traffic.
pub fn binding_set(kind: ChannelKind) -> Vec<&'static str> {
    match kind {
        ChannelKind::World => WorldMessageKind::ALL.iter().map(|k| k.as_str()).collect(),
        ChannelKind::Activity => ActivityMessageKind::ALL
            .iter()
            .map(|k| k.as_str())
            .collect(),
    }
}

/// Classified inbound message type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InboundKind {
    World(WorldMessageKind),
    Activity(ActivityMessageKind),
    /// Not in the catalog of the channel it arrived on.
    Unknown(String),
}

impl InboundKind {
    pub fn classify(channel: ChannelKind, message_type: &str) -> Self {
        let known = match channel {
            ChannelKind::World => WorldMessageKind::parse(message_type).map(InboundKind::World),
            ChannelKind::Activity => {
                ActivityMessageKind::parse(message_type).map(InboundKind::Activity)
            }
        };
        known.unwrap_or_else(|| InboundKind::Unknown(message_type.to_string()))
    }
}

/// A message delivered by a transport, classified but otherwise untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub channel: ChannelKind,
    pub kind: InboundKind,
    pub message_type: String,
    pub payload: Value,
}

impl InboundMessage {
    pub fn new(channel: ChannelKind, message_type: impl Into<String>, payload: Value) -> Self {
        let message_type = message_type.into();
        Self {
            channel,
            kind: InboundKind::classify(channel, &message_type),
            message_type,
            payload,
        }
    }

    /// Extension block carried by the payload, if well-formed.
    pub fn extension(&self) -> Option<Extension> {
        payloads::extension_of(&self.payload)
    }

    /// Interaction kind this message answers, plus the explicit interaction
    /// id when the server echoed one.
    ///
    /// Types outside the channel's catalog only count as replies to custom
    /// interactions (`<name>Result`); a named result type arriving on the
    /// wrong channel is never trusted.
    pub fn interaction_reply(&self) -> Option<(InteractionKind, Option<String>)> {
        let extension = self.extension();
        let kind = InteractionKind::from_reply(
            &self.message_type,
            extension.as_ref().map(|e| e.kind.as_str()),
        )?;
        if matches!(self.kind, InboundKind::Unknown(_))
            && !matches!(kind, InteractionKind::Custom(_))
        {
            return None;
        }
        Some((kind, payloads::interaction_id_of(&self.payload)))
    }

    /// Typed view of the payload.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| ProtocolError::malformed(&self.message_type, e))
    }
}

// =============================================================================
// Client Messages (client -> server)
// =============================================================================

/// Typed outbound catalog.
///
/// Each variant knows the channel it belongs on and, for request/reply
/// exchanges, the interaction it opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Interact with a world object (sign, chest, door).
    InteractObject { object_id: String },
    /// Search the tile at the given coordinates.
    SearchTile { x: i32, y: i32 },
    /// Start talking to an NPC.
    TalkToNpc { npc_id: String },
    /// Open the NPC's unified interface (shop, healer, storage).
    OpenNpcInterface { npc_id: String, interface: String },
    /// Move the player avatar.
    Move { x: i32, y: i32 },
    /// Ask the server to create an activity with another participant.
    RequestActivity { target_id: String },
    /// Throw a capture ball during an activity.
    AttemptCapture { ball: String },
    /// Use a move during an activity turn.
    UseMove { move_id: String },
    /// Use an item during an activity turn.
    UseItem { item_id: String },
    /// Run from the activity.
    Flee,
}

impl ClientMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::InteractObject { .. } => "interactObject",
            ClientMessage::SearchTile { .. } => "searchTile",
            ClientMessage::TalkToNpc { .. } => "talkToNpc",
            ClientMessage::OpenNpcInterface { .. } => "openNpcInterface",
            ClientMessage::Move { .. } => "move",
            ClientMessage::RequestActivity { .. } => "requestActivity",
            ClientMessage::AttemptCapture { .. } => "attemptCapture",
            ClientMessage::UseMove { .. } => "useMove",
            ClientMessage::UseItem { .. } => "useItem",
            ClientMessage::Flee => "flee",
        }
    }

    pub fn channel(&self) -> ChannelKind {
        match self {
            ClientMessage::AttemptCapture { .. }
            | ClientMessage::UseMove { .. }
            | ClientMessage::UseItem { .. }
            | ClientMessage::Flee => ChannelKind::Activity,
            _ => ChannelKind::World,
        }
    }

    /// Interaction kind and disambiguating key, for messages whose reply
    /// should be correlated.
    pub fn interaction(&self) -> Option<(InteractionKind, String)> {
        match self {
            ClientMessage::InteractObject { object_id } => {
                Some((InteractionKind::Object, object_id.clone()))
            }
            ClientMessage::SearchTile { x, y } => Some((InteractionKind::Search, format!("{x},{y}"))),
            ClientMessage::TalkToNpc { npc_id } => Some((InteractionKind::Npc, npc_id.clone())),
            ClientMessage::OpenNpcInterface { npc_id, .. } => {
                Some((InteractionKind::UnifiedInterface, npc_id.clone()))
            }
            ClientMessage::AttemptCapture { ball } => Some((InteractionKind::Action, ball.clone())),
            ClientMessage::UseMove { move_id } => Some((InteractionKind::Action, move_id.clone())),
            ClientMessage::UseItem { item_id } => Some((InteractionKind::Action, item_id.clone())),
            ClientMessage::Move { .. }
            | ClientMessage::RequestActivity { .. }
            | ClientMessage::Flee => None,
        }
    }

    /// Split into wire type and payload object.
    pub fn into_parts(self) -> Result<(&'static str, Value), ProtocolError> {
        let message_type = self.message_type();
        let mut value = serde_json::to_value(&self).map_err(|e| ProtocolError::Encode {
            message_type: message_type.to_string(),
            reason: e.to_string(),
        })?;
        let payload = value
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Default::default()));
        Ok((message_type, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_known_and_unknown() {
        assert_eq!(
            InboundKind::classify(ChannelKind::World, "activityCreated"),
            InboundKind::World(WorldMessageKind::ActivityCreated)
        );
        assert_eq!(
            InboundKind::classify(ChannelKind::Activity, "turnChanged"),
            InboundKind::Activity(ActivityMessageKind::TurnChanged)
        );
        // world-only message arriving on the activity channel is not trusted
        assert_eq!(
            InboundKind::classify(ChannelKind::Activity, "activityCreated"),
            InboundKind::Unknown("activityCreated".into())
        );
    }

    #[test]
    fn test_binding_sets_cover_catalogs() {
        let world = binding_set(ChannelKind::World);
        assert_eq!(world.len(), WorldMessageKind::ALL.len());
        assert!(world.contains(&"activityCreated"));
        let activity = binding_set(ChannelKind::Activity);
        assert!(activity.contains(&"activityEnded"));
        assert!(!activity.contains(&"activityCreated"));
    }

    #[test]
    fn test_interaction_reply_with_explicit_id() {
        let msg = InboundMessage::new(
            ChannelKind::World,
            "searchResult",
            json!({ "interactionId": "search:1,2:99", "found": true }),
        );
        assert_eq!(
            msg.interaction_reply(),
            Some((InteractionKind::Search, Some("search:1,2:99".to_string())))
        );
    }

    #[test]
    fn test_interaction_reply_unified_interface_extension() {
        let msg = InboundMessage::new(
            ChannelKind::World,
            "npcResult",
            json!({ "extension": { "kind": "unifiedInterface", "version": 1 } }),
        );
        assert_eq!(
            msg.interaction_reply(),
            Some((InteractionKind::UnifiedInterface, None))
        );
    }

    #[test]
    fn test_unknown_result_type_is_a_custom_reply() {
        let msg = InboundMessage::new(
            ChannelKind::World,
            "craftResult",
            json!({ "interactionId": "craft:sword:7" }),
        );
        assert_eq!(msg.kind, InboundKind::Unknown("craftResult".into()));
        assert_eq!(
            msg.interaction_reply(),
            Some((
                InteractionKind::Custom("craft".into()),
                Some("craft:sword:7".to_string())
            ))
        );
    }

    #[test]
    fn test_named_result_on_wrong_channel_is_not_a_reply() {
        let msg = InboundMessage::new(ChannelKind::Activity, "searchResult", json!({}));
        assert_eq!(msg.interaction_reply(), None);

        let msg = InboundMessage::new(ChannelKind::World, "weatherChanged", json!({}));
        assert_eq!(msg.interaction_reply(), None);
    }

    #[test]
    fn test_client_message_parts() {
        let (ty, payload) = ClientMessage::AttemptCapture {
            ball: "poke_ball".into(),
        }
        .into_parts()
        .unwrap();
        assert_eq!(ty, "attemptCapture");
        assert_eq!(payload, json!({ "ball": "poke_ball" }));

        let (ty, payload) = ClientMessage::Flee.into_parts().unwrap();
        assert_eq!(ty, "flee");
        assert_eq!(payload, json!({}));
    }

    #[test]
    fn test_client_message_routing() {
        assert_eq!(
            ClientMessage::SearchTile { x: 10, y: 20 }.channel(),
            ChannelKind::World
        );
        assert_eq!(
            ClientMessage::SearchTile { x: 10, y: 20 }.interaction(),
            Some((InteractionKind::Search, "10,20".to_string()))
        );
        assert_eq!(ClientMessage::Flee.channel(), ChannelKind::Activity);
        assert_eq!(ClientMessage::Flee.interaction(), None);
    }
}
