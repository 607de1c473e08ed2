//! Test utilities for the transport port
//!
//! Available under `cfg(test)` and with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! tandem-player = { workspace = true, features = ["testing"] }
//! ```

mod fake_transport;

pub use fake_transport::{FakeConnector, FakeTransport};
