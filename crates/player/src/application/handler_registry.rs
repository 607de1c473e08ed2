//! Handler Registry.
//!
//! A channel is ready only when every message type of its binding set is
//! subscribed on its transport. An open socket alone does not count.

use std::time::Duration;

use tandem_protocol::messages::binding_set;

use crate::infrastructure::messaging::Channel;

/// Bounded fixed-delay retry policy for handler registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
}

impl RetryBudget {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            delay,
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Count one attempt and return the delay before the next one, or `None`
    /// once the budget is spent.
    pub fn next_delay_and_advance(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        if self.is_exhausted() {
            None
        } else {
            Some(self.delay)
        }
    }
}

/// Confirms handler bindings on channel transports.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    errors: u32,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the binding set on `channel`'s transport, re-binding the whole set
    /// if any type is missing.
    ///
    /// Never fails loudly: a missing or unjoined transport and subscribe
    /// errors all come back as `false`.
    pub fn ensure_ready(&mut self, channel: &Channel) -> bool {
        let Some(transport) = channel.transport() else {
            tracing::debug!(channel = %channel.kind(), "No transport yet, not ready");
            return false;
        };
        if !transport.is_joined() {
            tracing::debug!(channel = %channel.kind(), "Transport not joined yet, not ready");
            return false;
        }

        let bindings = binding_set(channel.kind());
        if bindings.iter().all(|t| transport.has_subscription(t)) {
            return true;
        }

        tracing::debug!(
            channel = %channel.kind(),
            count = bindings.len(),
            "Binding handler set"
        );
        for message_type in &bindings {
            if let Err(e) = transport.subscribe(message_type, channel.sink().clone()) {
                self.errors += 1;
                tracing::error!(
                    channel = %channel.kind(),
                    message_type,
                    error = %e,
                    "Handler registration failed"
                );
                return false;
            }
        }

        let confirmed = bindings.iter().all(|t| transport.has_subscription(t));
        if !confirmed {
            tracing::warn!(channel = %channel.kind(), "Handler bindings did not take effect");
        }
        confirmed
    }

    /// Subscribe failures seen since construction.
    pub fn registration_errors(&self) -> u32 {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::messaging::inbox;
    use crate::infrastructure::messaging::InboundSink;
    use crate::infrastructure::testing::FakeTransport;
    use tandem_protocol::ChannelKind;

    fn channel_with(transport: Option<FakeTransport>) -> Channel {
        let (tx, _rx) = inbox::inbox();
        let mut channel = Channel::connecting(
            ChannelKind::World,
            1,
            InboundSink::new(ChannelKind::World, 1, tx),
            RetryBudget::new(3, Duration::from_millis(10)),
            None,
        );
        if let Some(t) = transport {
            channel.attach(Box::new(t));
        }
        channel
    }

    #[test]
    fn test_retry_budget_counts_attempts() {
        let mut budget = RetryBudget::new(3, Duration::from_millis(500));
        assert_eq!(budget.next_delay_and_advance(), Some(Duration::from_millis(500)));
        assert_eq!(budget.next_delay_and_advance(), Some(Duration::from_millis(500)));
        assert_eq!(budget.next_delay_and_advance(), None);
        assert!(budget.is_exhausted());
        assert_eq!(budget.attempts(), 3);

        budget.reset();
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn test_missing_transport_is_not_ready() {
        let mut registry = HandlerRegistry::new();
        assert!(!registry.ensure_ready(&channel_with(None)));
        assert_eq!(registry.registration_errors(), 0);
    }

    #[test]
    fn test_unjoined_transport_is_not_ready() {
        let transport = FakeTransport::unjoined("world-1");
        let mut registry = HandlerRegistry::new();
        assert!(!registry.ensure_ready(&channel_with(Some(transport.clone()))));
        assert_eq!(transport.subscribe_calls(), 0);
    }

    #[test]
    fn test_binds_full_set_once() {
        let transport = FakeTransport::joined("world-1");
        let channel = channel_with(Some(transport.clone()));
        let mut registry = HandlerRegistry::new();
        let set_len = binding_set(ChannelKind::World).len();

        assert!(registry.ensure_ready(&channel));
        assert_eq!(transport.binding_count(), set_len);
        assert_eq!(transport.subscribe_calls(), set_len);

        // Already bound: nothing re-subscribed.
        assert!(registry.ensure_ready(&channel));
        assert_eq!(transport.subscribe_calls(), set_len);
    }

    #[test]
    fn test_lost_bindings_are_replaced_not_duplicated() {
        let transport = FakeTransport::joined("world-1");
        let channel = channel_with(Some(transport.clone()));
        let mut registry = HandlerRegistry::new();
        assert!(registry.ensure_ready(&channel));

        transport.drop_bindings();
        assert!(registry.ensure_ready(&channel));
        assert_eq!(transport.binding_count(), binding_set(ChannelKind::World).len());
    }

    #[test]
    fn test_subscribe_failure_is_counted() {
        let transport = FakeTransport::joined("world-1");
        transport.set_fail_subscribe(true);
        let channel = channel_with(Some(transport));
        let mut registry = HandlerRegistry::new();

        assert!(!registry.ensure_ready(&channel));
        assert!(!registry.ensure_ready(&channel));
        assert_eq!(registry.registration_errors(), 2);
    }
}
