//! Tandem Player - client-side coordination of a world channel and an
//! optional activity channel.
//!
//! The [`Coordinator`] owns both channels and everything that keeps traffic
//! on them honest: handler registration, the outbound queue, pending
//! interaction tracking, the session lifecycle and the event bus listeners
//! subscribe to. Transports are reached only through the ports in
//! [`ports::outbound`]; the WebSocket adapter lives in
//! [`infrastructure::websocket`].

pub mod application;
pub mod infrastructure;
pub mod ports;

pub use application::config::CoordinatorConfig;
pub use application::coordinator::{
    ChannelSnapshot, Coordinator, CoordinatorStatus, Readiness, SendOutcome,
};
pub use application::error::{CoordinatorError, ErrorCategory};
pub use application::lifecycle::{LeaveOutcome, LeaveReason, LifecycleState};
pub use application::pending_interactions::InteractionId;
pub use infrastructure::messaging::{BusEvent, EventBus, ListenerId};
pub use ports::outbound::{Connector, Transport, TransportError};
