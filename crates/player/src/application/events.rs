//! Names of events the coordinator emits on its own.
//!
//! Server messages are re-emitted under their wire type; interaction timeouts
//! and cancellations reuse the result type of their kind (`searchResult`).

/// Activity channel is joined and its queue has flushed.
pub const ACTIVITY_CONNECTED: &str = "activityConnected";
/// Activity connect or registration failed; back on the world channel.
pub const ACTIVITY_CONNECTION_FAILED: &str = "activityConnectionFailed";
/// A second activity was announced while one is live.
pub const ACTIVITY_CONFLICT: &str = "activityConflict";
/// Activity transport closed without being asked to.
pub const ACTIVITY_DISCONNECTED: &str = "activityDisconnected";
/// Activity leave completed.
pub const ACTIVITY_LEFT: &str = "activityLeft";
pub const WORLD_READY: &str = "worldReady";
pub const WORLD_DISCONNECTED: &str = "worldDisconnected";
pub const INITIALIZATION_FAILED: &str = "initializationFailed";
pub const SEND_QUEUED: &str = "sendQueued";
pub const SEND_REJECTED: &str = "sendRejected";
/// The transport refused a send on a ready channel.
pub const SEND_FAILED: &str = "sendFailed";
