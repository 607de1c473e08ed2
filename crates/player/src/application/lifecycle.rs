//! Session Lifecycle State Machine.
//!
//! Tracks which of the two channels are live and guards the activity leave
//! against re-entrancy. Only the transitions listed in
//! [`LifecycleState::can_transition_to`] are accepted.

use std::fmt;

use serde::Serialize;

/// Coordinator-wide session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    Idle,
    WorldConnected,
    ActivityPending,
    ActivityConnected,
    ActivityLeaving,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, WorldConnected)
                | (WorldConnected, ActivityPending)
                | (ActivityPending, ActivityConnected)
                | (ActivityPending, WorldConnected)
                | (ActivityPending, ActivityLeaving)
                | (ActivityConnected, ActivityLeaving)
                | (ActivityLeaving, WorldConnected)
                | (_, Idle)
        )
    }

    /// An activity channel exists (pending, live or leaving).
    pub fn has_activity(self) -> bool {
        matches!(
            self,
            LifecycleState::ActivityPending
                | LifecycleState::ActivityConnected
                | LifecycleState::ActivityLeaving
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::WorldConnected => "worldConnected",
            LifecycleState::ActivityPending => "activityPending",
            LifecycleState::ActivityConnected => "activityConnected",
            LifecycleState::ActivityLeaving => "activityLeaving",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the activity is being left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LeaveReason {
    /// The player asked to leave.
    User,
    /// The activity session announced its end.
    Ended,
    /// The activity connection went away on its own.
    Interrupted,
    /// The world channel is going away.
    WorldDisconnected,
}

impl LeaveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::User => "user",
            LeaveReason::Ended => "ended",
            LeaveReason::Interrupted => "interrupted",
            LeaveReason::WorldDisconnected => "worldDisconnected",
        }
    }
}

/// Result of a `leave_activity` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// A transport leave was started.
    Started,
    /// A leave is already in flight or cooling down; nothing done.
    AlreadyLeaving,
    /// The activity connect had not completed; the pending channel was
    /// dropped without a transport leave.
    Abandoned,
    /// No activity channel exists.
    NoActivity,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid lifecycle transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
    leave_in_flight: bool,
    leave_reason: Option<LeaveReason>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
            leave_in_flight: false,
            leave_reason: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn transition(&mut self, next: LifecycleState) -> Result<(), InvalidTransition> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "Rejected lifecycle transition");
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::info!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
        Ok(())
    }

    /// Claim the leave guard. Returns false if a leave is already in flight
    /// or its cooldown has not elapsed.
    pub fn begin_leave(&mut self, reason: LeaveReason) -> bool {
        if self.leave_in_flight {
            return false;
        }
        self.leave_in_flight = true;
        self.leave_reason = Some(reason);
        true
    }

    /// Reason recorded by the leave in progress.
    pub fn take_leave_reason(&mut self) -> Option<LeaveReason> {
        self.leave_reason.take()
    }

    pub fn clear_leave_guard(&mut self) {
        self.leave_in_flight = false;
        self.leave_reason = None;
    }

    pub fn leave_in_flight(&self) -> bool {
        self.leave_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut lifecycle = Lifecycle::new();
        for next in [
            LifecycleState::WorldConnected,
            LifecycleState::ActivityPending,
            LifecycleState::ActivityConnected,
            LifecycleState::ActivityLeaving,
            LifecycleState::WorldConnected,
            LifecycleState::Idle,
        ] {
            lifecycle.transition(next).unwrap();
        }
        assert_eq!(lifecycle.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_activity_requires_world() {
        let mut lifecycle = Lifecycle::new();
        let err = lifecycle
            .transition(LifecycleState::ActivityPending)
            .unwrap_err();
        assert_eq!(err.from, LifecycleState::Idle);
        assert_eq!(lifecycle.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_connected_activity_cannot_skip_leaving() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(LifecycleState::WorldConnected).unwrap();
        lifecycle.transition(LifecycleState::ActivityPending).unwrap();
        lifecycle.transition(LifecycleState::ActivityConnected).unwrap();
        assert!(lifecycle.transition(LifecycleState::WorldConnected).is_err());
    }

    #[test]
    fn test_leave_guard_is_exclusive() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.begin_leave(LeaveReason::User));
        assert!(!lifecycle.begin_leave(LeaveReason::Ended));
        assert_eq!(lifecycle.take_leave_reason(), Some(LeaveReason::User));
        lifecycle.clear_leave_guard();
        assert!(lifecycle.begin_leave(LeaveReason::Ended));
    }
}
