//! Channel lifecycle bookkeeping.
//!
//! A [`Channel`] is the coordinator's record of one transport session: its
//! kind, server identifier, status, and the exclusively owned transport
//! handle. Readiness is tracked separately from status because a connection
//! can be open while its handler bindings are not yet confirmed.

use serde::Serialize;
use tandem_protocol::ChannelKind;

use crate::application::handler_registry::RetryBudget;
use crate::infrastructure::messaging::InboundSink;
use crate::ports::outbound::Transport;

/// Connection status of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelStatus {
    /// Connect requested; transport join or handler registration in flight
    Connecting,
    /// Joined and handler bindings confirmed
    Connected,
    /// Leave requested, waiting for the transport to finish
    Leaving,
    /// Registration attempts exhausted; terminal until re-initialized
    Failed,
}

/// One logical connection to a server session.
pub struct Channel {
    kind: ChannelKind,
    epoch: u64,
    status: ChannelStatus,
    /// Session id the connect was requested for (activity channels).
    requested_id: Option<String>,
    identifier: Option<String>,
    transport: Option<Box<dyn Transport>>,
    sink: InboundSink,
    ready: bool,
    retry: RetryBudget,
}

impl Channel {
    /// Create a channel in `Connecting` state, optionally without a transport
    /// yet (activity connects in flight).
    pub fn connecting(
        kind: ChannelKind,
        epoch: u64,
        sink: InboundSink,
        retry: RetryBudget,
        requested_id: Option<String>,
    ) -> Self {
        Self {
            kind,
            epoch,
            status: ChannelStatus::Connecting,
            requested_id,
            identifier: None,
            transport: None,
            sink,
            ready: false,
            retry,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ChannelStatus) {
        if self.status != status {
            tracing::debug!(
                channel = %self.kind,
                epoch = self.epoch,
                from = ?self.status,
                to = ?status,
                "Channel status changed"
            );
        }
        self.status = status;
        if status != ChannelStatus::Connected {
            self.ready = false;
        }
    }

    pub fn requested_id(&self) -> Option<&str> {
        self.requested_id.as_deref()
    }

    /// Server-assigned identifier, present only once joined.
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn sink(&self) -> &InboundSink {
        &self.sink
    }

    pub fn transport(&self) -> Option<&dyn Transport> {
        self.transport.as_deref()
    }

    /// Install the transport and register the disconnect sink on it.
    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        transport.on_disconnect(self.sink.clone());
        self.transport = Some(transport);
    }

    /// Take the transport out, e.g. to leave it on a spawned task.
    pub fn take_transport(&mut self) -> Option<Box<dyn Transport>> {
        self.ready = false;
        self.transport.take()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Record confirmed bindings: status becomes `Connected` and the server
    /// identifier is captured.
    pub fn mark_ready(&mut self) {
        self.identifier = self.transport.as_ref().and_then(|t| t.session_id());
        self.set_status(ChannelStatus::Connected);
        self.ready = true;
    }

    /// Forget a previously confirmed readiness (bindings went missing).
    pub fn mark_unready(&mut self) {
        self.ready = false;
        self.set_status(ChannelStatus::Connecting);
    }

    pub fn retry_mut(&mut self) -> &mut RetryBudget {
        &mut self.retry
    }

    pub fn retry(&self) -> &RetryBudget {
        &self.retry
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("kind", &self.kind)
            .field("epoch", &self.epoch)
            .field("status", &self.status)
            .field("identifier", &self.identifier)
            .field("has_transport", &self.transport.is_some())
            .field("ready", &self.ready)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::messaging::inbox;
    use crate::infrastructure::testing::FakeTransport;
    use std::time::Duration;

    fn channel() -> Channel {
        let (tx, _rx) = inbox::inbox();
        Channel::connecting(
            ChannelKind::World,
            1,
            InboundSink::new(ChannelKind::World, 1, tx),
            RetryBudget::new(3, Duration::from_millis(10)),
            None,
        )
    }

    #[test]
    fn test_new_channel_is_connecting_without_identifier() {
        let channel = channel();
        assert_eq!(channel.status(), ChannelStatus::Connecting);
        assert!(channel.identifier().is_none());
        assert!(channel.transport().is_none());
        assert!(!channel.is_ready());
    }

    #[test]
    fn test_mark_ready_captures_identifier() {
        let mut channel = channel();
        let transport = FakeTransport::joined("world-1");
        channel.attach(Box::new(transport.clone()));
        assert!(transport.has_disconnect_sink());

        channel.mark_ready();
        assert_eq!(channel.status(), ChannelStatus::Connected);
        assert_eq!(channel.identifier(), Some("world-1"));
        assert!(channel.is_ready());
    }

    #[test]
    fn test_leaving_clears_readiness() {
        let mut channel = channel();
        channel.attach(Box::new(FakeTransport::joined("world-1")));
        channel.mark_ready();

        channel.set_status(ChannelStatus::Leaving);
        assert!(!channel.is_ready());
        assert!(channel.take_transport().is_some());
        assert!(channel.transport().is_none());
    }
}
