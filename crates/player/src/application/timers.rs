//! Single timer primitive for the coordinator.
//!
//! Interaction expiry, registration retries and the leave cooldown all live in
//! one deadline-ordered set. The coordinator asks for the next deadline, sleeps
//! until it (or until inbox traffic arrives), then pops whatever is due.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tandem_protocol::ChannelKind;
use tokio::time::Instant;

use crate::application::pending_interactions::InteractionId;

/// Handle used to cancel an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// What to do when a timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    InteractionExpired(InteractionId),
    RegistrationRetry { channel: ChannelKind, epoch: u64 },
    LeaveCooldown,
}

#[derive(Debug, Default)]
pub struct Timers {
    next: u64,
    queue: BTreeMap<(Instant, TimerHandle), TimerEvent>,
    deadlines: HashMap<TimerHandle, Instant>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, deadline: Instant, event: TimerEvent) -> TimerHandle {
        self.next += 1;
        let handle = TimerHandle(self.next);
        self.queue.insert((deadline, handle), event);
        self.deadlines.insert(handle, deadline);
        handle
    }

    pub fn arm_after(&mut self, now: Instant, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.arm(now + delay, event)
    }

    /// Cancel a timer. Cancelling one that already fired is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.deadlines.remove(&handle) {
            Some(deadline) => self.queue.remove(&(deadline, handle)).is_some(),
            None => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return every event due at `now`, earliest first; ties fire
    /// in arming order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<TimerEvent> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, handle), event) = entry.remove_entry();
            self.deadlines.remove(&handle);
            due.push(event);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_due_orders_by_deadline_then_arming() {
        let mut timers = Timers::new();
        let now = Instant::now();
        timers.arm_after(now, Duration::from_millis(20), TimerEvent::LeaveCooldown);
        timers.arm_after(
            now,
            Duration::from_millis(10),
            TimerEvent::InteractionExpired(InteractionId::from("a")),
        );
        timers.arm_after(
            now,
            Duration::from_millis(10),
            TimerEvent::InteractionExpired(InteractionId::from("b")),
        );

        assert!(timers.pop_due(now).is_empty());
        assert_eq!(
            timers.pop_due(now + Duration::from_millis(15)),
            vec![
                TimerEvent::InteractionExpired(InteractionId::from("a")),
                TimerEvent::InteractionExpired(InteractionId::from("b")),
            ]
        );
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(20)));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut timers = Timers::new();
        let now = Instant::now();
        let handle = timers.arm_after(now, Duration::from_millis(5), TimerEvent::LeaveCooldown);

        assert!(timers.cancel(handle));
        assert!(!timers.cancel(handle));
        assert!(timers.is_empty());
        assert!(timers.pop_due(now + Duration::from_secs(1)).is_empty());
    }
}
