//! Coordinator messaging infrastructure.
//!
//! - `EventBus`: named-event dispatch to UI/game listeners
//! - `InboundSink`: handle transports push inbound traffic into
//! - `Channel`: per-session connection bookkeeping

pub mod connection;
pub mod event_bus;
pub(crate) mod inbox;

pub use connection::{Channel, ChannelStatus};
pub use event_bus::{BusEvent, DispatchReport, EventBus, EventMeta, Listener, ListenerId};
pub use inbox::InboundSink;
