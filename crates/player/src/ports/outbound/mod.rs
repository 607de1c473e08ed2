//! Outbound ports - Interfaces for external services
//!
//! These ports define the contracts that infrastructure adapters must implement,
//! allowing the coordinator to talk to server sessions without depending on a
//! concrete transport.

pub mod clock_port;
pub mod transport_port;

pub use clock_port::ClockPort;
pub use transport_port::{Connector, Transport, TransportError};

#[cfg(test)]
pub use clock_port::MockClockPort;
