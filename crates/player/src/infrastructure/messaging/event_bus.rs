//! Event Bus for delivering coordination events to UI/game code.
//!
//! The EventBus provides a push-based, named-event subscription model. Inbound
//! protocol messages are re-emitted under their wire type; synthetic outcomes
//! (timeouts, connection failures, queue drops) use the names in
//! [`crate::application::events`].

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use serde_json::Value;
use tandem_protocol::ChannelKind;

use crate::application::pending_interactions::InteractionId;

/// Callback registered on the bus.
///
/// Returning `Err` (or panicking) is logged and does not stop the remaining
/// listeners for the same event.
pub type Listener = Box<dyn FnMut(&BusEvent) -> anyhow::Result<()> + Send + 'static>;

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Coordination metadata added next to the raw payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    /// Channel the event came from, if any.
    pub channel: Option<ChannelKind>,
    /// Pending interaction this event resolved or expired.
    pub interaction_id: Option<InteractionId>,
    /// True for events produced by the coordinator rather than the server.
    pub synthetic: bool,
}

/// Event delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusEvent {
    pub name: String,
    pub payload: Value,
    pub meta: EventMeta,
}

impl BusEvent {
    /// Event relayed from a server message.
    pub fn inbound(name: impl Into<String>, channel: ChannelKind, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            meta: EventMeta {
                channel: Some(channel),
                ..EventMeta::default()
            },
        }
    }

    /// Event produced by the coordinator itself.
    pub fn synthetic(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            meta: EventMeta {
                synthetic: true,
                ..EventMeta::default()
            },
        }
    }

    pub fn with_channel(mut self, channel: ChannelKind) -> Self {
        self.meta.channel = Some(channel);
        self
    }

    pub fn with_interaction(mut self, id: InteractionId) -> Self {
        self.meta.interaction_id = Some(id);
        self
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Named-event bus.
///
/// Listeners for one name run in subscription order. The bus owns its
/// listeners; they stay registered until `off` or until the bus is dropped.
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event name.
    pub fn on(
        &mut self,
        name: impl Into<String>,
        listener: impl FnMut(&BusEvent) -> anyhow::Result<()> + Send + 'static,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners
            .entry(name.into())
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    /// Unsubscribe. Returns false if the listener was not registered.
    pub fn off(&mut self, name: &str, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.remove(name);
        }
        removed
    }

    pub fn has_listeners(&self, name: &str) -> bool {
        self.listeners.get(name).is_some_and(|l| !l.is_empty())
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.get(name).map_or(0, Vec::len)
    }

    /// Dispatch an event to every listener of `event.name`.
    pub fn emit(&mut self, event: BusEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(list) = self.listeners.get_mut(&event.name) else {
            tracing::trace!(event = %event.name, "No listeners for event");
            return report;
        };

        for (id, listener) in list.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::error!(event = %event.name, listener = id.0, error = %e, "Listener failed");
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::error!(event = %event.name, listener = id.0, "Listener panicked");
                }
            }
        }
        report
    }

    /// Dispatch to `specific` if anyone listens there, otherwise to the
    /// event's own (generic) name.
    pub fn emit_routed(&mut self, specific: Option<String>, mut event: BusEvent) -> DispatchReport {
        if let Some(specific) = specific {
            if self.has_listeners(&specific) {
                event.name = specific;
            }
        }
        self.emit(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> impl FnMut(&BusEvent) -> anyhow::Result<()> {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        move |event| {
            log.lock().unwrap().push(format!("{tag}:{}", event.name));
            Ok(())
        }
    }

    #[test]
    fn test_dispatch_follows_subscription_order() {
        let mut bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on("turnChanged", recorder(&log, "a"));
        bus.on("turnChanged", recorder(&log, "b"));
        bus.on("phaseChanged", recorder(&log, "c"));

        let report = bus.emit(BusEvent::inbound("turnChanged", ChannelKind::Activity, json!({})));

        assert_eq!(report.delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:turnChanged", "b:turnChanged"]);
    }

    #[test]
    fn test_failing_listener_does_not_stop_others() {
        let mut bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on("statusUpdate", |_| anyhow::bail!("widget exploded"));
        bus.on("statusUpdate", |_| panic!("widget panicked"));
        bus.on("statusUpdate", recorder(&log, "after"));

        let report = bus.emit(BusEvent::synthetic("statusUpdate", Value::Null));

        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
        assert_eq!(*log.lock().unwrap(), vec!["after:statusUpdate"]);
    }

    #[test]
    fn test_off_removes_only_that_listener() {
        let mut bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = bus.on("searchResult", recorder(&log, "first"));
        bus.on("searchResult", recorder(&log, "second"));

        assert!(bus.off("searchResult", first));
        assert!(!bus.off("searchResult", first));
        bus.emit(BusEvent::synthetic("searchResult", Value::Null));

        assert_eq!(*log.lock().unwrap(), vec!["second:searchResult"]);
        assert_eq!(bus.listener_count("searchResult"), 1);
    }

    #[test]
    fn test_routed_emit_prefers_specific_listener() {
        let mut bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on("npcResult", recorder(&log, "generic"));

        let event = BusEvent::inbound("npcResult", ChannelKind::World, json!({}));
        bus.emit_routed(Some("npcResult:unifiedInterface".into()), event.clone());

        bus.on("npcResult:unifiedInterface", recorder(&log, "specific"));
        bus.emit_routed(Some("npcResult:unifiedInterface".into()), event);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["generic:npcResult", "specific:npcResult:unifiedInterface"]
        );
    }
}
