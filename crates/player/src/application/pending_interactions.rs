//! Pending Interaction Tracker.
//!
//! Correlates an outbound request with its eventual reply. Each entry arms its
//! own expiry on the shared [`Timers`]; whichever of reply, cancel, timeout or
//! purge comes first removes it, and every later attempt is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tandem_protocol::{ChannelKind, InteractionKind};
use tokio::time::Instant;

use crate::application::error::CoordinatorError;
use crate::application::timers::{TimerEvent, TimerHandle, Timers};
use crate::ports::outbound::ClockPort;

/// Correlation id: `<kind>:<key>:<unix millis>`, suffixed with `#n` if that
/// exact id is still live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct InteractionId(String);

impl InteractionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InteractionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InteractionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for InteractionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One outstanding request.
#[derive(Debug, Clone)]
pub struct PendingInteraction {
    pub id: InteractionId,
    pub kind: InteractionKind,
    pub channel: ChannelKind,
    pub correlation: Value,
    pub created_at: DateTime<Utc>,
    timeout: TimerHandle,
    seq: u64,
}

/// Table of live interactions, bounded by `capacity`.
pub struct PendingInteractions {
    capacity: usize,
    timeout: Duration,
    next_seq: u64,
    entries: HashMap<InteractionId, PendingInteraction>,
}

impl PendingInteractions {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            capacity,
            timeout,
            next_seq: 0,
            entries: HashMap::new(),
        }
    }

    /// Record a new interaction and arm its expiry.
    ///
    /// Fails immediately at capacity; nothing is evicted.
    #[allow(clippy::too_many_arguments)]
    pub fn track(
        &mut self,
        kind: InteractionKind,
        key: &str,
        channel: ChannelKind,
        correlation: Value,
        clock: &dyn ClockPort,
        timers: &mut Timers,
        now: Instant,
    ) -> Result<InteractionId, CoordinatorError> {
        if self.entries.len() >= self.capacity {
            tracing::warn!(
                kind = %kind,
                limit = self.capacity,
                "Rejecting interaction: pending table full"
            );
            return Err(CoordinatorError::TooManyPending {
                limit: self.capacity,
            });
        }

        let created_at = clock.now();
        let id = self.unique_id(&kind, key, created_at);
        let timeout = timers.arm_after(
            now,
            self.timeout,
            TimerEvent::InteractionExpired(id.clone()),
        );
        self.next_seq += 1;

        tracing::debug!(interaction_id = %id, channel = %channel, "Tracking interaction");
        self.entries.insert(
            id.clone(),
            PendingInteraction {
                id: id.clone(),
                kind,
                channel,
                correlation,
                created_at,
                timeout,
                seq: self.next_seq,
            },
        );
        Ok(id)
    }

    fn unique_id(&self, kind: &InteractionKind, key: &str, at: DateTime<Utc>) -> InteractionId {
        let base = format!("{}:{}:{}", kind.name(), key, at.timestamp_millis());
        if !self.entries.contains_key(base.as_str()) {
            return InteractionId(base);
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}#{n}");
            if !self.entries.contains_key(candidate.as_str()) {
                return InteractionId(candidate);
            }
            n += 1;
        }
    }

    /// Remove an entry because its reply arrived (or it was cancelled).
    ///
    /// Returns `None` if it is no longer live: duplicate and late replies are
    /// no-ops.
    pub fn resolve(&mut self, id: &InteractionId, timers: &mut Timers) -> Option<PendingInteraction> {
        let entry = self.entries.remove(id)?;
        timers.cancel(entry.timeout);
        tracing::debug!(interaction_id = %id, "Interaction resolved");
        Some(entry)
    }

    /// Remove an entry whose timer has already fired.
    pub fn expire(&mut self, id: &InteractionId) -> Option<PendingInteraction> {
        let entry = self.entries.remove(id)?;
        tracing::debug!(interaction_id = %id, kind = %entry.kind, "Interaction timed out");
        Some(entry)
    }

    /// Oldest live interaction of `kind`, used for replies that carry no id.
    pub fn oldest_of_kind(&self, kind: &InteractionKind) -> Option<InteractionId> {
        self.entries
            .values()
            .filter(|e| &e.kind == kind)
            .min_by_key(|e| e.seq)
            .map(|e| e.id.clone())
    }

    /// Remove every interaction addressed to `channel`, oldest first.
    pub fn purge_channel(
        &mut self,
        channel: ChannelKind,
        timers: &mut Timers,
    ) -> Vec<PendingInteraction> {
        let ids: Vec<InteractionId> = self
            .entries
            .values()
            .filter(|e| e.channel == channel)
            .map(|e| e.id.clone())
            .collect();
        let mut purged: Vec<PendingInteraction> = ids
            .iter()
            .filter_map(|id| self.resolve(id, timers))
            .collect();
        purged.sort_by_key(|e| e.seq);
        purged
    }

    pub fn contains(&self, id: &InteractionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &InteractionId) -> Option<&PendingInteraction> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}

impl std::borrow::Borrow<str> for InteractionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::outbound::MockClockPort;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_clock(millis: i64) -> MockClockPort {
        let mut clock = MockClockPort::new();
        clock
            .expect_now()
            .returning(move || Utc.timestamp_millis_opt(millis).unwrap());
        clock
    }

    fn table(capacity: usize) -> PendingInteractions {
        PendingInteractions::new(capacity, Duration::from_secs(5))
    }

    #[test]
    fn test_track_generates_kind_key_timestamp_id() {
        let clock = fixed_clock(1_700_000_000_000);
        let mut timers = Timers::new();
        let mut pending = table(4);

        let id = pending
            .track(
                InteractionKind::Search,
                "10,20",
                ChannelKind::World,
                json!({ "x": 10, "y": 20 }),
                &clock,
                &mut timers,
                Instant::now(),
            )
            .unwrap();

        assert_eq!(id.as_str(), "search:10,20:1700000000000");
        assert!(pending.contains(&id));
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_same_millisecond_ids_stay_unique() {
        let clock = fixed_clock(42);
        let mut timers = Timers::new();
        let mut pending = table(4);
        let now = Instant::now();

        let a = pending
            .track(InteractionKind::Npc, "oak", ChannelKind::World, Value::Null, &clock, &mut timers, now)
            .unwrap();
        let b = pending
            .track(InteractionKind::Npc, "oak", ChannelKind::World, Value::Null, &clock, &mut timers, now)
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(b.as_str(), "npc:oak:42#2");
    }

    #[test]
    fn test_resolve_happens_once_and_cancels_timer() {
        let clock = fixed_clock(1);
        let mut timers = Timers::new();
        let mut pending = table(4);
        let id = pending
            .track(InteractionKind::Object, "sign", ChannelKind::World, Value::Null, &clock, &mut timers, Instant::now())
            .unwrap();

        assert!(pending.resolve(&id, &mut timers).is_some());
        assert!(pending.resolve(&id, &mut timers).is_none());
        assert!(pending.expire(&id).is_none());
        assert!(timers.is_empty());
    }

    #[test]
    fn test_capacity_rejects_without_evicting() {
        let clock = fixed_clock(1);
        let mut timers = Timers::new();
        let mut pending = table(1);
        let now = Instant::now();
        let first = pending
            .track(InteractionKind::Search, "1,1", ChannelKind::World, Value::Null, &clock, &mut timers, now)
            .unwrap();

        let err = pending
            .track(InteractionKind::Search, "2,2", ChannelKind::World, Value::Null, &clock, &mut timers, now)
            .unwrap_err();

        assert_eq!(err, CoordinatorError::TooManyPending { limit: 1 });
        assert!(pending.contains(&first));
        assert!(pending.is_full());
    }

    #[test]
    fn test_oldest_of_kind_and_purge() {
        let mut clock = MockClockPort::new();
        let mut t = 0;
        clock.expect_now().returning(move || {
            t += 1;
            Utc.timestamp_millis_opt(t).unwrap()
        });
        let mut timers = Timers::new();
        let mut pending = table(8);
        let now = Instant::now();

        let capture = pending
            .track(InteractionKind::Action, "poke_ball", ChannelKind::Activity, Value::Null, &clock, &mut timers, now)
            .unwrap();
        let search = pending
            .track(InteractionKind::Search, "3,4", ChannelKind::World, Value::Null, &clock, &mut timers, now)
            .unwrap();
        let second = pending
            .track(InteractionKind::Action, "great_ball", ChannelKind::Activity, Value::Null, &clock, &mut timers, now)
            .unwrap();

        assert_eq!(pending.oldest_of_kind(&InteractionKind::Action), Some(capture.clone()));

        let purged = pending.purge_channel(ChannelKind::Activity, &mut timers);
        let purged_ids: Vec<_> = purged.into_iter().map(|e| e.id).collect();
        assert_eq!(purged_ids, vec![capture, second]);
        assert!(pending.contains(&search));
        assert_eq!(timers.len(), 1);
    }
}
