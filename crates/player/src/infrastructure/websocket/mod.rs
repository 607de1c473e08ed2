//! WebSocket adapter for the transport port
//!
//! - `client`: tokio-tungstenite transport for one joined session
//! - `connector`: opens transports by session id under a base URL

mod client;
mod connector;

pub use client::WsTransport;
pub use connector::WsConnector;
