//! Coordination layer: readiness, queuing, correlation and the session
//! lifecycle, fronted by [`coordinator::Coordinator`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod handler_registry;
pub mod lifecycle;
pub mod outbound_queue;
pub mod pending_interactions;
pub mod timers;
