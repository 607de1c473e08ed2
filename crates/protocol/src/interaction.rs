//! Interaction kinds used to correlate requests with their replies.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelKind;

/// Extension marker carried by NPC replies that belong to the unified
/// interface flow rather than plain dialogue.
pub const UNIFIED_INTERFACE_EXTENSION: &str = "unifiedInterface";

/// The kind of a tracked request/reply exchange.
///
/// Open set: anything not covered by a named variant travels as `Custom`,
/// whose reply type is `<name>Result`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InteractionKind {
    Object,
    Search,
    Npc,
    UnifiedInterface,
    /// Activity-scoped action (capture attempt, move, item use).
    Action,
    Custom(String),
}

impl InteractionKind {
    /// Stable name, used as the prefix of generated interaction ids.
    pub fn name(&self) -> &str {
        match self {
            InteractionKind::Object => "object",
            InteractionKind::Search => "search",
            InteractionKind::Npc => "npc",
            InteractionKind::UnifiedInterface => UNIFIED_INTERFACE_EXTENSION,
            InteractionKind::Action => "action",
            InteractionKind::Custom(name) => name,
        }
    }

    /// Inbound message type that answers this kind of interaction.
    ///
    /// Unified-interface replies arrive as `npcResult` tagged with the
    /// `unifiedInterface` extension.
    pub fn result_message_type(&self) -> String {
        match self {
            InteractionKind::Object => "objectResult".to_string(),
            InteractionKind::Search => "searchResult".to_string(),
            InteractionKind::Npc | InteractionKind::UnifiedInterface => "npcResult".to_string(),
            InteractionKind::Action => "actionResult".to_string(),
            InteractionKind::Custom(name) => format!("{name}Result"),
        }
    }

    /// Extension name that narrows the reply, if any.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            InteractionKind::UnifiedInterface => Some(UNIFIED_INTERFACE_EXTENSION),
            _ => None,
        }
    }

    /// Channel the request is sent on and the reply is expected from.
    pub fn channel(&self) -> ChannelKind {
        match self {
            InteractionKind::Action => ChannelKind::Activity,
            _ => ChannelKind::World,
        }
    }

    /// Resolve the interaction kind answered by an inbound reply.
    pub fn from_reply(message_type: &str, extension: Option<&str>) -> Option<Self> {
        let kind = match message_type {
            "objectResult" => InteractionKind::Object,
            "searchResult" => InteractionKind::Search,
            "npcResult" if extension == Some(UNIFIED_INTERFACE_EXTENSION) => {
                InteractionKind::UnifiedInterface
            }
            "npcResult" => InteractionKind::Npc,
            "actionResult" => InteractionKind::Action,
            other => {
                let name = other.strip_suffix("Result")?;
                if name.is_empty() {
                    return None;
                }
                InteractionKind::Custom(name.to_string())
            }
        };
        Some(kind)
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_message_types() {
        assert_eq!(InteractionKind::Search.result_message_type(), "searchResult");
        assert_eq!(
            InteractionKind::UnifiedInterface.result_message_type(),
            "npcResult"
        );
        assert_eq!(
            InteractionKind::Custom("craft".into()).result_message_type(),
            "craftResult"
        );
    }

    #[test]
    fn test_from_reply_distinguishes_unified_interface() {
        assert_eq!(
            InteractionKind::from_reply("npcResult", None),
            Some(InteractionKind::Npc)
        );
        assert_eq!(
            InteractionKind::from_reply("npcResult", Some(UNIFIED_INTERFACE_EXTENSION)),
            Some(InteractionKind::UnifiedInterface)
        );
    }

    #[test]
    fn test_from_reply_ignores_non_results() {
        assert_eq!(InteractionKind::from_reply("phaseChanged", None), None);
        assert_eq!(InteractionKind::from_reply("Result", None), None);
        assert_eq!(
            InteractionKind::from_reply("craftResult", None),
            Some(InteractionKind::Custom("craft".into()))
        );
    }
}
