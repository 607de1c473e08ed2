//! Channel kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Which of the two cooperating server sessions a channel talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelKind {
    /// The long-lived session the client joins first.
    World,
    /// The short-lived session spawned for a bounded sub-interaction (e.g. a battle).
    Activity,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::World, ChannelKind::Activity];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::World => "world",
            ChannelKind::Activity => "activity",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "world" => Ok(ChannelKind::World),
            "activity" => Ok(ChannelKind::Activity),
            other => Err(ProtocolError::UnknownChannel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_parses_wire_names() {
        assert_eq!("world".parse::<ChannelKind>().unwrap(), ChannelKind::World);
        assert_eq!(
            "activity".parse::<ChannelKind>().unwrap(),
            ChannelKind::Activity
        );
        assert!("battle".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_channel_kind_serializes_camel_case() {
        let json = serde_json::to_string(&ChannelKind::Activity).unwrap();
        assert_eq!(json, "\"activity\"");
    }
}
