//! WebSocket transport using tokio-tungstenite.
//!
//! One `WsTransport` is one joined server session. A read task decodes JSON
//! envelopes and pushes them into the bound [`InboundSink`]s; a write task
//! drains an unbounded queue so `send` never blocks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tandem_protocol::{ChannelKind, Envelope, JoinedData, JOINED, LEAVE};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;
use uuid::Uuid;

use crate::infrastructure::messaging::InboundSink;
use crate::ports::outbound::{Transport, TransportError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the transport handle and its read task.
struct Shared {
    connection_id: Uuid,
    kind: ChannelKind,
    session_id: Mutex<Option<String>>,
    joined: AtomicBool,
    /// Set once `leave` was called, so the following close is not reported.
    leaving: AtomicBool,
    handlers: Mutex<HashMap<String, InboundSink>>,
    /// Disconnect sink; also receives message types nobody bound.
    fallback: Mutex<Option<InboundSink>>,
}

impl Shared {
    fn new(kind: ChannelKind) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            kind,
            session_id: Mutex::new(None),
            joined: AtomicBool::new(false),
            leaving: AtomicBool::new(false),
            handlers: Mutex::new(HashMap::new()),
            fallback: Mutex::new(None),
        }
    }

    /// Route one text frame.
    fn dispatch(&self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(connection = %self.connection_id, error = %e, "Dropping undecodable frame");
                return;
            }
        };

        if envelope.message_type == JOINED {
            match serde_json::from_value::<JoinedData>(envelope.payload) {
                Ok(data) => {
                    tracing::info!(
                        connection = %self.connection_id,
                        channel = %self.kind,
                        session_id = %data.session_id,
                        "Session joined"
                    );
                    *lock(&self.session_id) = Some(data.session_id);
                    self.joined.store(true, Ordering::SeqCst);
                }
                Err(e) => {
                    tracing::warn!(connection = %self.connection_id, error = %e, "Malformed joined frame");
                }
            }
            return;
        }

        let sink = lock(&self.handlers)
            .get(&envelope.message_type)
            .cloned()
            .or_else(|| lock(&self.fallback).clone());
        match sink {
            Some(sink) => {
                sink.deliver(&envelope.message_type, envelope.payload);
            }
            None => {
                tracing::trace!(
                    connection = %self.connection_id,
                    message_type = %envelope.message_type,
                    "No handler bound, dropping"
                );
            }
        }
    }

    /// Called once the socket is gone.
    fn closed(&self, reason: Option<String>) {
        self.joined.store(false, Ordering::SeqCst);
        if self.leaving.load(Ordering::SeqCst) {
            tracing::debug!(connection = %self.connection_id, "Connection closed after leave");
            return;
        }
        tracing::warn!(connection = %self.connection_id, reason = ?reason, "Connection closed unexpectedly");
        if let Some(sink) = lock(&self.fallback).clone() {
            sink.disconnected(reason);
        }
    }
}

/// Transport for one server session over a WebSocket.
pub struct WsTransport {
    shared: Arc<Shared>,
    tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Open the socket. The session counts as joined once the server sends
    /// its `joined` frame.
    pub async fn connect(kind: ChannelKind, url: &Url) -> Result<Self, TransportError> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (write, read) = stream.split();

        let shared = Arc::new(Shared::new(kind));
        tracing::info!(connection = %shared.connection_id, channel = %kind, url = %url, "Connected");

        let (tx, rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::spawn(read_loop(Arc::clone(&shared), read));
        let writer = tokio::spawn(write_loop(shared.connection_id, write, rx));

        Ok(Self {
            shared,
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn connection_id(&self) -> Uuid {
        self.shared.connection_id
    }
}

async fn read_loop<S>(shared: Arc<Shared>, mut read: S)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut reason = None;
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.dispatch(&text),
            Ok(Message::Close(frame)) => {
                reason = frame.map(|f| f.reason.to_string());
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(connection = %shared.connection_id, error = %e, "WebSocket error");
                reason = Some(e.to_string());
                break;
            }
        }
    }
    shared.closed(reason);
}

async fn write_loop<W>(connection_id: Uuid, mut write: W, mut rx: mpsc::UnboundedReceiver<Envelope>)
where
    W: futures_util::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(envelope) = rx.recv().await {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(connection = %connection_id, error = %e, "Failed to encode message");
                continue;
            }
        };
        if let Err(e) = write.send(Message::Text(text)).await {
            tracing::error!(connection = %connection_id, error = %e, "Failed to send message");
            return;
        }
    }
    if let Err(e) = write.send(Message::Close(None)).await {
        tracing::debug!(connection = %connection_id, error = %e, "Close frame not sent");
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn session_id(&self) -> Option<String> {
        if self.is_joined() {
            lock(&self.shared.session_id).clone()
        } else {
            None
        }
    }

    fn is_joined(&self) -> bool {
        self.shared.joined.load(Ordering::SeqCst)
    }

    fn subscribe(&self, message_type: &str, sink: InboundSink) -> Result<(), TransportError> {
        if lock(&self.tx).is_none() {
            return Err(TransportError::SubscribeFailed {
                message_type: message_type.to_string(),
                reason: "connection closed".to_string(),
            });
        }
        lock(&self.shared.handlers).insert(message_type.to_string(), sink);
        Ok(())
    }

    fn has_subscription(&self, message_type: &str) -> bool {
        lock(&self.shared.handlers).contains_key(message_type)
    }

    fn on_disconnect(&self, sink: InboundSink) {
        *lock(&self.shared.fallback) = Some(sink);
    }

    fn send(&self, message_type: &str, payload: Value) -> Result<(), TransportError> {
        if !self.is_joined() {
            return Err(TransportError::NotConnected);
        }
        let tx = lock(&self.tx).clone();
        match tx {
            Some(tx) => tx
                .send(Envelope::new(message_type, payload))
                .map_err(|_| TransportError::Closed("writer stopped".to_string())),
            None => Err(TransportError::NotConnected),
        }
    }

    async fn leave(&self) -> Result<(), TransportError> {
        if self.shared.leaving.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(connection = %self.shared.connection_id, "Leaving session");

        let tx = lock(&self.tx).take();
        let queued = match tx {
            Some(tx) => tx
                .send(Envelope::new(LEAVE, Value::Object(Default::default())))
                .map_err(|_| TransportError::Closed("writer stopped".to_string())),
            None => Ok(()),
        };
        lock(&self.shared.handlers).clear();
        self.shared.joined.store(false, Ordering::SeqCst);

        // Dropping the sender lets the writer flush, send Close and exit.
        let writer = lock(&self.writer).take();
        if let Some(writer) = writer {
            writer
                .await
                .map_err(|e| TransportError::Closed(e.to_string()))?;
        }
        queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::messaging::inbox::{self, InboxEvent};
    use serde_json::json;

    fn shared_with_sink() -> (Shared, InboundSink, inbox::InboxReceiver) {
        let (tx, rx) = inbox::inbox();
        let sink = InboundSink::new(ChannelKind::World, 1, tx);
        (Shared::new(ChannelKind::World), sink, rx)
    }

    #[test]
    fn test_joined_frame_marks_session() {
        let (shared, _, _rx) = shared_with_sink();
        shared.dispatch(r#"{"type":"joined","payload":{"sessionId":"world-7"}}"#);

        assert!(shared.joined.load(Ordering::SeqCst));
        assert_eq!(lock(&shared.session_id).as_deref(), Some("world-7"));
    }

    #[test]
    fn test_bound_type_goes_to_its_sink() {
        let (shared, sink, mut rx) = shared_with_sink();
        lock(&shared.handlers).insert("statusUpdate".into(), sink);

        shared.dispatch(r#"{"type":"statusUpdate","payload":{"online":3}}"#);

        match rx.try_recv().unwrap() {
            InboxEvent::Message {
                message_type,
                payload,
                ..
            } => {
                assert_eq!(message_type, "statusUpdate");
                assert_eq!(payload, json!({ "online": 3 }));
            }
            _ => panic!("expected a message"),
        }
    }

    #[test]
    fn test_unbound_type_uses_fallback_and_garbage_is_dropped() {
        let (shared, sink, mut rx) = shared_with_sink();
        shared.dispatch(r#"{"type":"weatherChanged","payload":{}}"#);
        assert!(rx.try_recv().is_err());

        *lock(&shared.fallback) = Some(sink);
        shared.dispatch("{not json");
        shared.dispatch(r#"{"type":"weatherChanged","payload":{}}"#);
        assert!(matches!(
            rx.try_recv().unwrap(),
            InboxEvent::Message { message_type, .. } if message_type == "weatherChanged"
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_reported_unless_leaving() {
        let (shared, sink, mut rx) = shared_with_sink();
        *lock(&shared.fallback) = Some(sink);

        shared.leaving.store(true, Ordering::SeqCst);
        shared.closed(None);
        assert!(rx.try_recv().is_err());

        shared.leaving.store(false, Ordering::SeqCst);
        shared.closed(Some("going away".into()));
        assert!(matches!(
            rx.try_recv().unwrap(),
            InboxEvent::Disconnected { reason: Some(r), .. } if r == "going away"
        ));
    }
}
