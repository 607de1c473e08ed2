//! Read-only status snapshot.

use serde::Serialize;
use tandem_protocol::ChannelKind;

use super::Coordinator;
use crate::application::lifecycle::LifecycleState;
use crate::infrastructure::messaging::{Channel, ChannelStatus};

/// Snapshot of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnapshot {
    pub kind: ChannelKind,
    pub status: ChannelStatus,
    pub identifier: Option<String>,
    pub ready: bool,
    pub epoch: u64,
}

impl ChannelSnapshot {
    fn of(channel: &Channel) -> Self {
        Self {
            kind: channel.kind(),
            status: channel.status(),
            identifier: channel.identifier().map(str::to_string),
            ready: channel.is_ready(),
            epoch: channel.epoch(),
        }
    }
}

/// Snapshot of the whole coordinator, serializable for debug overlays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub lifecycle: LifecycleState,
    pub world: Option<ChannelSnapshot>,
    pub activity: Option<ChannelSnapshot>,
    pub pending_interactions: usize,
    pub queued_world: usize,
    pub queued_activity: usize,
    pub registration_errors: u32,
    pub leave_in_flight: bool,
}

impl CoordinatorStatus {
    /// Whether a send on `kind` would go straight to the transport.
    pub fn can_send(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::World => self.world.as_ref().is_some_and(|c| c.ready),
            ChannelKind::Activity => {
                self.lifecycle == LifecycleState::ActivityConnected
                    && self.activity.as_ref().is_some_and(|c| c.ready)
            }
        }
    }

    pub fn queued(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::World => self.queued_world,
            ChannelKind::Activity => self.queued_activity,
        }
    }
}

impl Coordinator {
    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            lifecycle: self.lifecycle.state(),
            world: self.world.as_ref().map(ChannelSnapshot::of),
            activity: self.activity.as_ref().map(ChannelSnapshot::of),
            pending_interactions: self.pending.len(),
            queued_world: self.queue.len(ChannelKind::World),
            queued_activity: self.queue.len(ChannelKind::Activity),
            registration_errors: self.registry.registration_errors(),
            leave_in_flight: self.lifecycle.leave_in_flight(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_serializes_camel_case() {
        let status = CoordinatorStatus {
            lifecycle: LifecycleState::WorldConnected,
            world: Some(ChannelSnapshot {
                kind: ChannelKind::World,
                status: ChannelStatus::Connected,
                identifier: Some("world-1".into()),
                ready: true,
                epoch: 1,
            }),
            activity: None,
            pending_interactions: 0,
            queued_world: 0,
            queued_activity: 2,
            registration_errors: 0,
            leave_in_flight: false,
        };

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["lifecycle"], json!("worldConnected"));
        assert_eq!(value["world"]["status"], json!("connected"));
        assert_eq!(value["queuedActivity"], json!(2));
        assert!(status.can_send(ChannelKind::World));
        assert!(!status.can_send(ChannelKind::Activity));
    }
}
