//! Coordinator inbox.
//!
//! Everything that happens outside the coordinator's own turn - transport
//! deliveries, disconnects, and completions of spawned connect/leave tasks -
//! arrives here as an [`InboxEvent`] on an unbounded channel. The coordinator
//! is the only receiver, so inbound processing stays single-threaded and in
//! delivery order.

use serde_json::Value;
use tandem_protocol::ChannelKind;
use tokio::sync::mpsc;

use crate::ports::outbound::{Transport, TransportError};

pub(crate) type InboxSender = mpsc::UnboundedSender<InboxEvent>;
pub(crate) type InboxReceiver = mpsc::UnboundedReceiver<InboxEvent>;

pub(crate) fn inbox() -> (InboxSender, InboxReceiver) {
    mpsc::unbounded_channel()
}

/// Events posted to the coordinator.
///
/// Every variant carries the epoch of the channel it concerns; events for a
/// superseded epoch are discarded on receipt.
pub(crate) enum InboxEvent {
    Message {
        channel: ChannelKind,
        epoch: u64,
        message_type: String,
        payload: Value,
    },
    Disconnected {
        channel: ChannelKind,
        epoch: u64,
        reason: Option<String>,
    },
    ActivityJoined {
        epoch: u64,
        result: Result<Box<dyn Transport>, TransportError>,
    },
    ActivityLeft {
        epoch: u64,
        result: Result<(), TransportError>,
    },
    WorldLeft {
        epoch: u64,
        result: Result<(), TransportError>,
    },
}

/// Handle a transport pushes inbound traffic into.
///
/// Cheap to clone; one is created per channel epoch. Delivery after the
/// coordinator is gone is silently dropped.
#[derive(Clone, Debug)]
pub struct InboundSink {
    channel: ChannelKind,
    epoch: u64,
    tx: InboxSender,
}

impl InboundSink {
    pub(crate) fn new(channel: ChannelKind, epoch: u64, tx: InboxSender) -> Self {
        Self { channel, epoch, tx }
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Deliver one inbound message. Returns false if the coordinator is gone.
    pub fn deliver(&self, message_type: &str, payload: Value) -> bool {
        self.tx
            .send(InboxEvent::Message {
                channel: self.channel,
                epoch: self.epoch,
                message_type: message_type.to_string(),
                payload,
            })
            .is_ok()
    }

    /// Report that the connection closed without being asked to.
    pub fn disconnected(&self, reason: Option<String>) -> bool {
        self.tx
            .send(InboxEvent::Disconnected {
                channel: self.channel,
                epoch: self.epoch,
                reason,
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sink_tags_messages_with_channel_and_epoch() {
        let (tx, mut rx) = inbox();
        let sink = InboundSink::new(ChannelKind::Activity, 7, tx);

        assert!(sink.deliver("turnChanged", json!({ "turn": 2 })));
        match rx.try_recv().unwrap() {
            InboxEvent::Message {
                channel,
                epoch,
                message_type,
                payload,
            } => {
                assert_eq!(channel, ChannelKind::Activity);
                assert_eq!(epoch, 7);
                assert_eq!(message_type, "turnChanged");
                assert_eq!(payload, json!({ "turn": 2 }));
            }
            _ => panic!("expected a message event"),
        }
    }

    #[test]
    fn test_sink_reports_closed_inbox() {
        let (tx, rx) = inbox();
        let sink = InboundSink::new(ChannelKind::World, 1, tx);
        drop(rx);
        assert!(!sink.deliver("statusUpdate", Value::Null));
        assert!(!sink.disconnected(None));
    }
}
