//! Inbox and timer handling: inbound dispatch, reply correlation and the
//! reactions of the lifecycle to server messages and transport events.

use serde_json::json;
use tandem_protocol::{
    ActivityCreatedData, ActivityEndedData, ActivityMessageKind, ChannelKind, InboundKind,
    InboundMessage, WorldMessageKind,
};
use tokio::time::Instant;

use super::{Coordinator, TIMED_OUT};
use crate::application::error::CoordinatorError;
use crate::application::events;
use crate::application::lifecycle::{LeaveOutcome, LeaveReason, LifecycleState};
use crate::application::pending_interactions::InteractionId;
use crate::application::timers::TimerEvent;
use crate::infrastructure::messaging::inbox::InboxEvent;
use crate::infrastructure::messaging::{BusEvent, ChannelStatus};
use crate::ports::outbound::{Transport, TransportError};

impl Coordinator {
    pub(super) fn handle_inbox(&mut self, event: InboxEvent, now: Instant) {
        match event {
            InboxEvent::Message {
                channel,
                epoch,
                message_type,
                payload,
            } => {
                if !self.is_current(channel, epoch) {
                    tracing::debug!(
                        channel = %channel,
                        epoch,
                        message_type = %message_type,
                        "Discarding message from a closed channel"
                    );
                    return;
                }
                self.handle_message(InboundMessage::new(channel, message_type, payload));
            }
            InboxEvent::Disconnected {
                channel,
                epoch,
                reason,
            } => {
                if !self.is_current(channel, epoch) {
                    tracing::debug!(channel = %channel, epoch, "Ignoring close of a replaced channel");
                    return;
                }
                self.handle_disconnect(channel, reason);
            }
            InboxEvent::ActivityJoined { epoch, result } => {
                self.handle_activity_joined(epoch, result, now)
            }
            InboxEvent::ActivityLeft { epoch, result } => self.handle_activity_left(epoch, result),
            InboxEvent::WorldLeft { epoch, result } => match result {
                Ok(()) => tracing::debug!(epoch, "World transport left"),
                Err(e) => tracing::warn!(epoch, error = %e, "World transport leave failed"),
            },
        }
    }

    pub(super) fn handle_timer(&mut self, event: TimerEvent, now: Instant) {
        match event {
            TimerEvent::InteractionExpired(id) => {
                if let Some(entry) = self.pending.expire(&id) {
                    let error = CoordinatorError::Timeout(entry.id.to_string());
                    self.emit_interaction_outcome(entry, TIMED_OUT, Some(error));
                }
            }
            TimerEvent::RegistrationRetry { channel, epoch } => {
                if self.is_current(channel, epoch) {
                    self.attempt_registration(channel, now);
                }
            }
            TimerEvent::LeaveCooldown => {
                self.cooldown = None;
                self.lifecycle.clear_leave_guard();
                tracing::debug!("Leave guard cleared");
            }
        }
    }

    fn handle_message(&mut self, message: InboundMessage) {
        if let InboundKind::Unknown(message_type) = &message.kind {
            tracing::debug!(
                channel = %message.channel,
                message_type = %message_type,
                "Unrecognized message type, dispatching generically"
            );
        }

        let interaction = match self.correlate(&message) {
            Ok(interaction) => interaction,
            Err(id) => {
                tracing::debug!(
                    interaction_id = %id,
                    message_type = %message.message_type,
                    "Reply for an interaction that is no longer pending, dropping"
                );
                return;
            }
        };

        let kind = message.kind.clone();
        let routed = message
            .extension()
            .map(|ext| ext.routed_name(&message.message_type));
        let created = match kind {
            InboundKind::World(WorldMessageKind::ActivityCreated) => {
                Some(message.decode::<ActivityCreatedData>())
            }
            _ => None,
        };
        let ended = match kind {
            InboundKind::Activity(ActivityMessageKind::ActivityEnded) => {
                Some(message.decode::<ActivityEndedData>())
            }
            _ => None,
        };

        let mut event = BusEvent::inbound(message.message_type, message.channel, message.payload);
        if let Some(id) = interaction {
            event = event.with_interaction(id);
        }
        self.bus.emit_routed(routed, event);

        match kind {
            InboundKind::World(WorldMessageKind::ActivityCreated) => match created {
                Some(Ok(data)) => {
                    // Conflicts are reported on the bus by `start_activity`.
                    let _ = self.start_activity(&data.activity_id);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Ignoring malformed activityCreated");
                }
                None => {}
            },
            InboundKind::World(WorldMessageKind::LeaveAcknowledged) => {
                tracing::debug!("Server acknowledged activity leave");
            }
            InboundKind::Activity(ActivityMessageKind::ActivityEnded) => {
                let ended = match ended {
                    Some(Ok(data)) => data,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Malformed activityEnded, leaving anyway");
                        ActivityEndedData::default()
                    }
                    None => ActivityEndedData::default(),
                };
                tracing::info!(reason = ?ended.reason, "Activity ended by server");
                self.activity_end = Some(ended);
                if self.leave_activity(LeaveReason::Ended) == LeaveOutcome::NoActivity {
                    self.activity_end = None;
                }
            }
            _ => {}
        }
    }

    /// Match a reply against the pending table.
    ///
    /// `Ok(Some(id))` resolved an entry, `Ok(None)` is not a reply (or answers
    /// nothing live and carries no id), `Err(id)` names an explicit id that is
    /// no longer pending.
    fn correlate(
        &mut self,
        message: &InboundMessage,
    ) -> Result<Option<InteractionId>, InteractionId> {
        let Some((kind, explicit)) = message.interaction_reply() else {
            return Ok(None);
        };
        match explicit {
            Some(raw) => {
                let id = InteractionId::from(raw);
                match self.pending.resolve(&id, &mut self.timers) {
                    Some(_) => Ok(Some(id)),
                    None => Err(id),
                }
            }
            None => {
                let Some(id) = self.pending.oldest_of_kind(&kind) else {
                    return Ok(None);
                };
                self.pending.resolve(&id, &mut self.timers);
                Ok(Some(id))
            }
        }
    }

    fn handle_disconnect(&mut self, kind: ChannelKind, reason: Option<String>) {
        match kind {
            ChannelKind::World => {
                tracing::warn!(reason = ?reason, "World channel disconnected");
                self.teardown_world(reason, false);
            }
            ChannelKind::Activity => {
                let leaving = self
                    .activity
                    .as_ref()
                    .is_some_and(|c| c.status() == ChannelStatus::Leaving);
                if leaving {
                    tracing::debug!("Activity transport closed while leaving");
                    return;
                }
                tracing::warn!(reason = ?reason, "Activity channel interrupted");
                let channel = self.activity.take();
                // The transport is already gone; no leave call.
                let activity_id = channel
                    .as_ref()
                    .and_then(|c| c.identifier().or(c.requested_id()).map(str::to_string));
                drop(channel);
                self.activity_end = None;
                self.purge(ChannelKind::Activity);
                self.return_to_world();
                self.emit_synthetic(
                    events::ACTIVITY_DISCONNECTED,
                    Some(ChannelKind::Activity),
                    json!({
                        "activityId": activity_id,
                        "reason": reason,
                        "leaveReason": LeaveReason::Interrupted.as_str(),
                    }),
                );
            }
        }
    }

    /// Create the activity channel and start connecting it.
    pub(super) fn start_activity(&mut self, activity_id: &str) -> Result<(), CoordinatorError> {
        match self.lifecycle.state() {
            LifecycleState::Idle => return Err(CoordinatorError::NoWorldChannel),
            LifecycleState::WorldConnected => {}
            _ => {
                let current = self
                    .activity
                    .as_ref()
                    .and_then(|c| c.identifier().or(c.requested_id()))
                    .unwrap_or("unknown")
                    .to_string();
                tracing::warn!(
                    requested = activity_id,
                    current = %current,
                    state = %self.lifecycle.state(),
                    "Activity conflict, keeping the live activity"
                );
                self.emit_synthetic(
                    events::ACTIVITY_CONFLICT,
                    Some(ChannelKind::Activity),
                    json!({ "requested": activity_id, "current": current }),
                );
                return Err(CoordinatorError::ActivityConflict {
                    requested: activity_id.to_string(),
                    current,
                });
            }
        }

        // A finished leave may still be cooling down; a new activity starts
        // with a fresh guard.
        if let Some(handle) = self.cooldown.take() {
            self.timers.cancel(handle);
            self.lifecycle.clear_leave_guard();
        }

        self.activity_end = None;

        let channel = self.new_channel(ChannelKind::Activity, Some(activity_id.to_string()));
        let epoch = channel.epoch();
        self.activity = Some(channel);
        let _ = self.lifecycle.transition(LifecycleState::ActivityPending);
        tracing::info!(activity_id, epoch, "Connecting activity channel");

        let connector = self.connector.clone();
        let id = activity_id.to_string();
        self.spawn(async move {
            let result = connector.join(ChannelKind::Activity, &id).await;
            InboxEvent::ActivityJoined { epoch, result }
        });
        Ok(())
    }

    fn handle_activity_joined(
        &mut self,
        epoch: u64,
        result: Result<Box<dyn Transport>, TransportError>,
        now: Instant,
    ) {
        let current = self.activity.as_ref().is_some_and(|c| {
            c.epoch() == epoch && c.status() == ChannelStatus::Connecting && c.transport().is_none()
        });

        match result {
            Ok(transport) if current => {
                if let Some(channel) = self.activity.as_mut() {
                    channel.attach(transport);
                }
                self.attempt_registration(ChannelKind::Activity, now);
            }
            Ok(transport) => {
                tracing::debug!(epoch, "Leaving transport of an abandoned activity connect");
                self.spawn_leave(ChannelKind::Activity, epoch, transport);
            }
            Err(e) if current => self.fail_activity_connect(e.to_string()),
            Err(e) => {
                tracing::debug!(epoch, error = %e, "Abandoned activity connect failed");
            }
        }
    }

    fn handle_activity_left(&mut self, epoch: u64, result: Result<(), TransportError>) {
        let current = self
            .activity
            .as_ref()
            .is_some_and(|c| c.epoch() == epoch && c.status() == ChannelStatus::Leaving);
        if !current {
            if let Err(e) = result {
                tracing::debug!(epoch, error = %e, "Leave of a discarded activity transport failed");
            }
            return;
        }

        let error = match result {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(epoch, error = %e, "Activity leave failed, tearing down anyway");
                Some(e.to_string())
            }
        };
        let channel = self.activity.take();
        tracing::info!(epoch, "Activity left");
        self.finish_activity_teardown(channel, error);
    }
}
