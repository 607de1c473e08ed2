//! Transport Port - Outbound port for one server session connection
//!
//! This port abstracts a single logical connection to a server-assigned
//! session (world or activity). The coordination layer only needs:
//! connect-by-id (via [`Connector`]), `send`, `subscribe`, and an
//! on-disconnect notification.
//!
//! Transports never call back into the coordinator directly. Subscribed
//! message types and disconnects are pushed into an [`InboundSink`], which
//! feeds the coordinator's inbox; the coordinator drains it on its own turn.

use async_trait::async_trait;
use serde_json::Value;
use tandem_protocol::ChannelKind;
use thiserror::Error;

use crate::infrastructure::messaging::InboundSink;

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Subscribing to {message_type} failed: {reason}")]
    SubscribeFailed {
        message_type: String,
        reason: String,
    },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Connection closed: {0}")]
    Closed(String),
}

/// One live connection to a server session.
///
/// Implementations must make `subscribe` replace any previous binding for the
/// same message type: re-binding the full set must never produce duplicate
/// dispatch.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Server-assigned session id, present once joined.
    fn session_id(&self) -> Option<String>;

    /// Whether the server has confirmed the join.
    fn is_joined(&self) -> bool;

    /// Bind `message_type` to `sink`, replacing any earlier binding.
    fn subscribe(&self, message_type: &str, sink: InboundSink) -> Result<(), TransportError>;

    /// Whether `message_type` is currently bound.
    fn has_subscription(&self, message_type: &str) -> bool;

    /// Register the sink notified when the connection closes unexpectedly.
    fn on_disconnect(&self, sink: InboundSink);

    /// Send one message. Never blocks.
    fn send(&self, message_type: &str, payload: Value) -> Result<(), TransportError>;

    /// Leave the session. Calling it again after it completed is a no-op.
    async fn leave(&self) -> Result<(), TransportError>;
}

/// Opens transports by server-assigned session id.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn join(
        &self,
        kind: ChannelKind,
        session_id: &str,
    ) -> Result<Box<dyn Transport>, TransportError>;
}
