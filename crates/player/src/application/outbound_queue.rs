//! Outbound Queue.
//!
//! Sends addressed to a channel that is not ready wait here, one FIFO per
//! channel kind. Entries past their TTL at flush time are dropped, never
//! retried. At capacity the newest send is refused and older intents stay.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use tandem_protocol::{ChannelKind, InteractionKind};
use tokio::time::Instant;

use crate::application::error::CoordinatorError;

/// Interaction to start tracking once a queued message actually goes out.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedInteraction {
    pub kind: InteractionKind,
    pub key: String,
    pub correlation: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub channel: ChannelKind,
    pub message_type: String,
    pub payload: Value,
    pub enqueued_at: Instant,
    pub interaction: Option<QueuedInteraction>,
}

/// Result of draining one kind's queue.
#[derive(Debug, Default)]
pub struct FlushBatch {
    /// Messages to send, oldest first.
    pub fresh: Vec<QueuedMessage>,
    /// Number of entries discarded for age.
    pub dropped: usize,
}

#[derive(Debug)]
pub struct OutboundQueue {
    ttl: Duration,
    capacity: usize,
    world: VecDeque<QueuedMessage>,
    activity: VecDeque<QueuedMessage>,
}

impl OutboundQueue {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            world: VecDeque::new(),
            activity: VecDeque::new(),
        }
    }

    fn lane(&mut self, kind: ChannelKind) -> &mut VecDeque<QueuedMessage> {
        match kind {
            ChannelKind::World => &mut self.world,
            ChannelKind::Activity => &mut self.activity,
        }
    }

    /// Append a message; returns its 1-based position in the queue.
    pub fn enqueue(&mut self, message: QueuedMessage) -> Result<usize, CoordinatorError> {
        let capacity = self.capacity;
        let kind = message.channel;
        let lane = self.lane(kind);
        if lane.len() >= capacity {
            tracing::warn!(
                channel = %kind,
                message_type = %message.message_type,
                capacity,
                "Outbound queue full, rejecting newest send"
            );
            return Err(CoordinatorError::QueueFull(kind));
        }
        lane.push_back(message);
        let position = lane.len();
        tracing::debug!(channel = %kind, position, "Queued outbound message");
        Ok(position)
    }

    /// Drain `kind` for sending. Entries older than the TTL at `now` are
    /// counted and discarded.
    pub fn take_for_flush(&mut self, kind: ChannelKind, now: Instant) -> FlushBatch {
        let ttl = self.ttl;
        let mut batch = FlushBatch::default();
        for message in self.lane(kind).drain(..) {
            if now.saturating_duration_since(message.enqueued_at) > ttl {
                batch.dropped += 1;
            } else {
                batch.fresh.push(message);
            }
        }
        if batch.dropped > 0 {
            tracing::debug!(
                channel = %kind,
                dropped = batch.dropped,
                "Dropped stale queued messages"
            );
        }
        batch
    }

    /// Put unsent messages back at the front, keeping their order.
    pub fn requeue_front(&mut self, kind: ChannelKind, messages: Vec<QueuedMessage>) {
        let lane = self.lane(kind);
        for message in messages.into_iter().rev() {
            lane.push_front(message);
        }
    }

    /// Discard everything queued for `kind`.
    pub fn purge(&mut self, kind: ChannelKind) -> usize {
        let lane = self.lane(kind);
        let purged = lane.len();
        lane.clear();
        if purged > 0 {
            tracing::debug!(channel = %kind, purged, "Purged outbound queue");
        }
        purged
    }

    pub fn len(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::World => self.world.len(),
            ChannelKind::Activity => self.activity.len(),
        }
    }

    pub fn is_empty(&self, kind: ChannelKind) -> bool {
        self.len(kind) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(kind: ChannelKind, ty: &str, at: Instant) -> QueuedMessage {
        QueuedMessage {
            channel: kind,
            message_type: ty.to_string(),
            payload: json!({}),
            enqueued_at: at,
            interaction: None,
        }
    }

    fn types(batch: &FlushBatch) -> Vec<&str> {
        batch.fresh.iter().map(|m| m.message_type.as_str()).collect()
    }

    #[test]
    fn test_fifo_per_kind() {
        let now = Instant::now();
        let mut queue = OutboundQueue::new(Duration::from_secs(30), 8);
        queue.enqueue(message(ChannelKind::Activity, "a", now)).unwrap();
        queue.enqueue(message(ChannelKind::World, "w", now)).unwrap();
        queue.enqueue(message(ChannelKind::Activity, "b", now)).unwrap();

        let batch = queue.take_for_flush(ChannelKind::Activity, now);
        assert_eq!(types(&batch), vec!["a", "b"]);
        assert_eq!(queue.len(ChannelKind::World), 1);
        assert!(queue.is_empty(ChannelKind::Activity));
    }

    #[test]
    fn test_stale_entries_dropped_at_flush() {
        let start = Instant::now();
        let mut queue = OutboundQueue::new(Duration::from_secs(30), 8);
        queue.enqueue(message(ChannelKind::World, "old", start)).unwrap();
        queue
            .enqueue(message(ChannelKind::World, "new", start + Duration::from_secs(20)))
            .unwrap();

        let batch = queue.take_for_flush(ChannelKind::World, start + Duration::from_secs(31));
        assert_eq!(types(&batch), vec!["new"]);
        assert_eq!(batch.dropped, 1);
    }

    #[test]
    fn test_capacity_rejects_newest() {
        let now = Instant::now();
        let mut queue = OutboundQueue::new(Duration::from_secs(30), 2);
        assert_eq!(queue.enqueue(message(ChannelKind::World, "1", now)), Ok(1));
        assert_eq!(queue.enqueue(message(ChannelKind::World, "2", now)), Ok(2));
        assert_eq!(
            queue.enqueue(message(ChannelKind::World, "3", now)),
            Err(CoordinatorError::QueueFull(ChannelKind::World))
        );

        let batch = queue.take_for_flush(ChannelKind::World, now);
        assert_eq!(types(&batch), vec!["1", "2"]);
    }

    #[test]
    fn test_requeue_front_keeps_order() {
        let now = Instant::now();
        let mut queue = OutboundQueue::new(Duration::from_secs(30), 8);
        queue.enqueue(message(ChannelKind::World, "c", now)).unwrap();
        queue.requeue_front(
            ChannelKind::World,
            vec![message(ChannelKind::World, "a", now), message(ChannelKind::World, "b", now)],
        );

        let batch = queue.take_for_flush(ChannelKind::World, now);
        assert_eq!(types(&batch), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_purge_counts() {
        let now = Instant::now();
        let mut queue = OutboundQueue::new(Duration::from_secs(30), 8);
        queue.enqueue(message(ChannelKind::Activity, "x", now)).unwrap();
        queue.enqueue(message(ChannelKind::Activity, "y", now)).unwrap();
        assert_eq!(queue.purge(ChannelKind::Activity), 2);
        assert_eq!(queue.purge(ChannelKind::Activity), 0);
    }
}
