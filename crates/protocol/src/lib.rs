//! Tandem Protocol - wire vocabulary for the world and activity channels
//!
//! This crate contains the types both sides of a Tandem session agree on:
//! - Channel kinds (`world`, `activity`)
//! - The closed catalogs of inbound message kinds per channel, with an
//!   `Unknown` fallback for forward compatibility
//! - The typed outbound catalog (`ClientMessage`)
//! - Interaction kinds used for request/reply correlation
//! - The JSON envelope spoken by the WebSocket adapter
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - Only serde, serde_json, and thiserror
//! 2. **No coordination logic** - Pure data types and serialization
//! 3. **Raw payloads pass through** - typed views borrow from the raw JSON,
//!    they never replace it

pub mod channel;
pub mod envelope;
pub mod error;
pub mod interaction;
pub mod messages;
pub mod payloads;

pub use channel::ChannelKind;
pub use envelope::{Envelope, JOINED, LEAVE};
pub use error::ProtocolError;
pub use interaction::InteractionKind;
pub use messages::{
    ActivityMessageKind, ClientMessage, InboundKind, InboundMessage, WorldMessageKind,
};
pub use payloads::{ActivityCreatedData, ActivityEndedData, Extension, JoinedData};
