//! Testability port for wall-clock time.
//!
//! Deadlines inside the coordinator run on the monotonic tokio clock; this
//! port only supplies the wall-clock timestamps stamped onto interaction ids
//! and `created_at` fields.

use chrono::{DateTime, Utc};

#[cfg_attr(test, mockall::automock)]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
