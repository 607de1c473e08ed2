//! In-memory transport and connector for exercising the coordinator without
//! a server.
//!
//! A `FakeTransport` is cheaply cloneable: hand one clone to the coordinator
//! and keep the other to drive the "server" side (join confirmation, inbound
//! deliveries, unexpected closes) and to inspect what was sent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tandem_protocol::ChannelKind;

use crate::infrastructure::messaging::InboundSink;
use crate::ports::outbound::{Connector, Transport, TransportError};

#[derive(Default)]
struct FakeState {
    session_id: Option<String>,
    joined: bool,
    bindings: HashMap<String, InboundSink>,
    disconnect: Option<InboundSink>,
    sent: Vec<(String, Value)>,
    subscribe_calls: usize,
    leave_calls: usize,
    fail_subscribe: bool,
    fail_send: bool,
    fail_leave: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    /// A transport whose join the server has already confirmed.
    pub fn joined(session_id: &str) -> Self {
        let transport = Self::unjoined(session_id);
        transport.set_joined(true);
        transport
    }

    /// A transport that exists but whose join is still in flight.
    pub fn unjoined(session_id: &str) -> Self {
        let transport = Self::default();
        lock(&transport.state).session_id = Some(session_id.to_string());
        transport
    }

    pub fn set_joined(&self, joined: bool) {
        lock(&self.state).joined = joined;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        lock(&self.state).fail_subscribe = fail;
    }

    pub fn set_fail_send(&self, fail: bool) {
        lock(&self.state).fail_send = fail;
    }

    pub fn set_fail_leave(&self, fail: bool) {
        lock(&self.state).fail_leave = fail;
    }

    /// Simulate the server pushing a message. Returns false when nothing is
    /// bound for `message_type` (the transport drops it).
    pub fn deliver(&self, message_type: &str, payload: Value) -> bool {
        let sink = lock(&self.state).bindings.get(message_type).cloned();
        match sink {
            Some(sink) => sink.deliver(message_type, payload),
            None => false,
        }
    }

    /// Simulate an unexpected close.
    pub fn close(&self, reason: &str) {
        let sink = {
            let mut state = lock(&self.state);
            state.joined = false;
            state.disconnect.clone()
        };
        if let Some(sink) = sink {
            sink.disconnected(Some(reason.to_string()));
        }
    }

    /// Forget every binding, as a transport that re-created its session would.
    pub fn drop_bindings(&self) {
        lock(&self.state).bindings.clear();
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        lock(&self.state).sent.clone()
    }

    pub fn sent_types(&self) -> Vec<String> {
        lock(&self.state).sent.iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn subscribe_calls(&self) -> usize {
        lock(&self.state).subscribe_calls
    }

    pub fn binding_count(&self) -> usize {
        lock(&self.state).bindings.len()
    }

    pub fn leave_calls(&self) -> usize {
        lock(&self.state).leave_calls
    }

    pub fn has_disconnect_sink(&self) -> bool {
        lock(&self.state).disconnect.is_some()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn session_id(&self) -> Option<String> {
        let state = lock(&self.state);
        if state.joined {
            state.session_id.clone()
        } else {
            None
        }
    }

    fn is_joined(&self) -> bool {
        lock(&self.state).joined
    }

    fn subscribe(&self, message_type: &str, sink: InboundSink) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.subscribe_calls += 1;
        if state.fail_subscribe {
            return Err(TransportError::SubscribeFailed {
                message_type: message_type.to_string(),
                reason: "fake subscribe failure".to_string(),
            });
        }
        state.bindings.insert(message_type.to_string(), sink);
        Ok(())
    }

    fn has_subscription(&self, message_type: &str) -> bool {
        lock(&self.state).bindings.contains_key(message_type)
    }

    fn on_disconnect(&self, sink: InboundSink) {
        lock(&self.state).disconnect = Some(sink);
    }

    fn send(&self, message_type: &str, payload: Value) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.fail_send {
            return Err(TransportError::SendFailed("fake send failure".to_string()));
        }
        if !state.joined {
            return Err(TransportError::NotConnected);
        }
        state.sent.push((message_type.to_string(), payload));
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        let fail = {
            let mut state = lock(&self.state);
            state.leave_calls += 1;
            state.fail_leave
        };
        // Leaving is never instantaneous.
        tokio::task::yield_now().await;
        let mut state = lock(&self.state);
        state.joined = false;
        state.bindings.clear();
        if fail {
            Err(TransportError::Closed("fake leave failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct ConnectorState {
    prepared: HashMap<String, FakeTransport>,
    failures: HashMap<String, String>,
    opened: HashMap<String, FakeTransport>,
    joins: Vec<(ChannelKind, String)>,
}

/// Connector handing out `FakeTransport`s.
///
/// Unprepared ids get a freshly joined transport, retrievable afterwards via
/// [`FakeConnector::transport`].
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `transport` for the next join of `session_id`.
    pub fn prepare(&self, session_id: &str, transport: FakeTransport) {
        lock(&self.state)
            .prepared
            .insert(session_id.to_string(), transport);
    }

    /// Make joins of `session_id` fail.
    pub fn fail(&self, session_id: &str, reason: &str) {
        lock(&self.state)
            .failures
            .insert(session_id.to_string(), reason.to_string());
    }

    pub fn joins(&self) -> Vec<(ChannelKind, String)> {
        lock(&self.state).joins.clone()
    }

    /// Transport most recently opened for `session_id`.
    pub fn transport(&self, session_id: &str) -> Option<FakeTransport> {
        lock(&self.state).opened.get(session_id).cloned()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn join(
        &self,
        kind: ChannelKind,
        session_id: &str,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let outcome = {
            let mut state = lock(&self.state);
            state.joins.push((kind, session_id.to_string()));
            if let Some(reason) = state.failures.get(session_id) {
                Err(TransportError::ConnectFailed(reason.clone()))
            } else {
                let transport = state
                    .prepared
                    .remove(session_id)
                    .unwrap_or_else(|| FakeTransport::joined(session_id));
                state
                    .opened
                    .insert(session_id.to_string(), transport.clone());
                Ok(transport)
            }
        };
        tokio::task::yield_now().await;
        outcome.map(|t| Box::new(t) as Box<dyn Transport>)
    }
}
