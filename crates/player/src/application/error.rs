//! Coordinator error types.
//!
//! Nothing here is ever raised across the public boundary as a panic: every
//! variant travels as a return value or inside a bus event.

use serde::Serialize;
use tandem_protocol::{ChannelKind, ProtocolError};
use thiserror::Error;

use crate::ports::outbound::TransportError;

/// The five error families the UI distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    /// Transport or handler registry unavailable at setup.
    Initialization,
    /// Channel bindings unconfirmed; queue or retry.
    NotReady,
    /// Queue or pending table full; back off.
    Capacity,
    /// Interaction expired without a reply.
    Timeout,
    /// Underlying connection failed or closed.
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("{channel} channel failed to initialize: {reason}")]
    Initialization { channel: ChannelKind, reason: String },

    #[error("{0} channel is not ready")]
    NotReady(ChannelKind),

    #[error("Too many pending {0} messages")]
    QueueFull(ChannelKind),

    #[error("Too many pending interactions (limit {limit})")]
    TooManyPending { limit: usize },

    #[error("No world channel")]
    NoWorldChannel,

    #[error("Activity {requested} conflicts with live activity {current}")]
    ActivityConflict { requested: String, current: String },

    #[error("Interaction {0} timed out")]
    Timeout(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl CoordinatorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoordinatorError::Initialization { .. } | CoordinatorError::NoWorldChannel => {
                ErrorCategory::Initialization
            }
            CoordinatorError::NotReady(_) | CoordinatorError::ActivityConflict { .. } => {
                ErrorCategory::NotReady
            }
            CoordinatorError::QueueFull(_) | CoordinatorError::TooManyPending { .. } => {
                ErrorCategory::Capacity
            }
            CoordinatorError::Timeout(_) => ErrorCategory::Timeout,
            CoordinatorError::Transport(_) | CoordinatorError::Protocol(_) => {
                ErrorCategory::Transport
            }
        }
    }

    /// Short text suitable for a toast.
    pub fn user_message(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Initialization => "Could not connect to the game server.",
            ErrorCategory::NotReady => "Still connecting, please try again in a moment.",
            ErrorCategory::Capacity => "Too many actions in progress, slow down a little.",
            ErrorCategory::Timeout => "The server did not answer in time. Please retry.",
            ErrorCategory::Transport => "Connection to the game server was lost.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            CoordinatorError::QueueFull(ChannelKind::Activity).category(),
            ErrorCategory::Capacity
        );
        assert_eq!(
            CoordinatorError::from(TransportError::NotConnected).category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            CoordinatorError::NotReady(ChannelKind::World).category(),
            ErrorCategory::NotReady
        );
    }

    #[test]
    fn test_display_is_human_readable() {
        let err = CoordinatorError::TooManyPending { limit: 16 };
        assert_eq!(err.to_string(), "Too many pending interactions (limit 16)");
        assert!(!err.user_message().is_empty());
    }
}
