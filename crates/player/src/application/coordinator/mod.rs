//! Session coordinator.
//!
//! Owns both channels, the handler registry, the pending interaction table,
//! the outbound queues, the lifecycle state machine, the timer set and the
//! event bus. It is a plain value driven through `&mut self`: transports only
//! push into its inbox, and the owner drains that inbox with [`Coordinator::pump`]
//! (once per frame) or [`Coordinator::step`] (from an async loop).
//!
//! Connect and leave calls run on spawned Tokio tasks, so the coordinator must
//! be driven from inside a Tokio runtime.

mod inbound;
mod status;


use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tandem_protocol::payloads::INTERACTION_ID_FIELD;
use tandem_protocol::{ActivityEndedData, ChannelKind, ClientMessage, InteractionKind};
use tokio::time::Instant;

use crate::application::config::CoordinatorConfig;
use crate::application::error::CoordinatorError;
use crate::application::events;
use crate::application::handler_registry::{HandlerRegistry, RetryBudget};
use crate::application::lifecycle::{LeaveOutcome, LeaveReason, Lifecycle, LifecycleState};
use crate::application::outbound_queue::{OutboundQueue, QueuedInteraction, QueuedMessage};
use crate::application::pending_interactions::{
    InteractionId, PendingInteraction, PendingInteractions,
};
use crate::application::timers::{TimerEvent, TimerHandle, Timers};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::messaging::inbox::{self, InboxEvent, InboxReceiver, InboxSender};
use crate::infrastructure::messaging::{
    BusEvent, Channel, ChannelStatus, EventBus, InboundSink, ListenerId,
};
use crate::ports::outbound::{ClockPort, Connector, Transport, TransportError};

pub use status::{ChannelSnapshot, CoordinatorStatus};

/// Flag set on a synthetic interaction outcome that expired.
const TIMED_OUT: &str = "timedOut";
/// Flag set on a synthetic interaction outcome that was cancelled or purged.
const CANCELLED: &str = "cancelled";

/// Result of the synchronous part of initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Bindings confirmed on the first attempt.
    Ready,
    /// Registration retries are scheduled; sends queue until ready.
    Pending,
}

/// Immediate result of a send. Sends never block.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Handed to the transport, with the interaction tracked for it if any.
    Sent { interaction: Option<InteractionId> },
    /// Waiting for the channel to become ready (1-based queue position).
    Queued { position: usize },
    Rejected(CoordinatorError),
}

impl SendOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SendOutcome::Queued { .. })
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }

    pub fn error(&self) -> Option<&CoordinatorError> {
        match self {
            SendOutcome::Rejected(e) => Some(e),
            _ => None,
        }
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    clock: Arc<dyn ClockPort>,
    connector: Arc<dyn Connector>,
    inbox_tx: InboxSender,
    inbox_rx: InboxReceiver,
    next_epoch: u64,
    world: Option<Channel>,
    activity: Option<Channel>,
    registry: HandlerRegistry,
    pending: PendingInteractions,
    queue: OutboundQueue,
    lifecycle: Lifecycle,
    timers: Timers,
    cooldown: Option<TimerHandle>,
    /// Server-reported end of the activity being left, if any.
    activity_end: Option<ActivityEndedData>,
    bus: EventBus,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_clock(config, connector, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        config: CoordinatorConfig,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = inbox::inbox();
        Self {
            pending: PendingInteractions::new(
                config.max_pending_interactions,
                config.interaction_timeout,
            ),
            queue: OutboundQueue::new(config.queue_ttl, config.queue_capacity),
            config,
            clock,
            connector,
            inbox_tx,
            inbox_rx,
            next_epoch: 0,
            world: None,
            activity: None,
            registry: HandlerRegistry::new(),
            lifecycle: Lifecycle::new(),
            timers: Timers::new(),
            cooldown: None,
            activity_end: None,
            bus: EventBus::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Install the world transport and run the first registration attempt.
    ///
    /// Further attempts are driven by `pump`/`step`. Sends made while this
    /// returns `Pending` are queued, not lost.
    pub fn begin_initialize(
        &mut self,
        transport: Box<dyn Transport>,
    ) -> Result<Readiness, CoordinatorError> {
        if let Some(world) = &self.world {
            if world.status() != ChannelStatus::Failed {
                return Err(CoordinatorError::Initialization {
                    channel: ChannelKind::World,
                    reason: "world channel already initialized".to_string(),
                });
            }
        }

        tracing::info!("Initializing world channel");
        let mut channel = self.new_channel(ChannelKind::World, None);
        channel.attach(transport);
        self.world = Some(channel);

        self.attempt_registration(ChannelKind::World, Instant::now());
        match self.world.as_ref().map(Channel::status) {
            Some(ChannelStatus::Connected) => Ok(Readiness::Ready),
            Some(ChannelStatus::Failed) | None => Err(Self::registration_exhausted_error()),
            Some(_) => Ok(Readiness::Pending),
        }
    }

    /// Initialize the world channel and wait until it is ready or has failed.
    pub async fn initialize(&mut self, transport: Box<dyn Transport>) -> Result<(), CoordinatorError> {
        if self.begin_initialize(transport)? == Readiness::Ready {
            return Ok(());
        }
        loop {
            self.step().await;
            match self.world.as_ref().map(Channel::status) {
                Some(ChannelStatus::Connected) => return Ok(()),
                Some(ChannelStatus::Failed) => return Err(Self::registration_exhausted_error()),
                None => {
                    return Err(CoordinatorError::Initialization {
                        channel: ChannelKind::World,
                        reason: "world channel closed during initialization".to_string(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    fn registration_exhausted_error() -> CoordinatorError {
        CoordinatorError::Initialization {
            channel: ChannelKind::World,
            reason: "handler registration attempts exhausted".to_string(),
        }
    }

    // =========================================================================
    // Driving
    // =========================================================================

    /// Drain the inbox and fire due timers without waiting.
    ///
    /// Returns the number of inbox events handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.inbox_rx.try_recv() {
            self.handle_inbox(event, Instant::now());
            handled += 1;
        }
        self.tick(Instant::now());
        handled
    }

    /// Wait for the next inbox event or timer deadline and handle it.
    pub async fn step(&mut self) {
        enum Wake {
            Inbox(Option<InboxEvent>),
            Timer,
        }

        let deadline = self.timers.next_deadline();
        let wake = tokio::select! {
            event = self.inbox_rx.recv() => Wake::Inbox(event),
            _ = sleep_until_opt(deadline) => Wake::Timer,
        };
        if let Wake::Inbox(Some(event)) = wake {
            self.handle_inbox(event, Instant::now());
        }
        self.tick(Instant::now());
    }

    /// Fire every timer due at `now`.
    pub fn tick(&mut self, now: Instant) {
        for event in self.timers.pop_due(now) {
            self.handle_timer(event, now);
        }
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Send on the world channel. Fails outright when there is no usable world
    /// channel; queues while it is still registering.
    pub fn send_world(&mut self, message_type: &str, payload: Value) -> SendOutcome {
        self.send_to(ChannelKind::World, message_type, payload, None)
    }

    /// Send on the activity channel, queuing until one is connected.
    pub fn send_activity(&mut self, message_type: &str, payload: Value) -> SendOutcome {
        self.send_to(ChannelKind::Activity, message_type, payload, None)
    }

    /// Send a typed message on its channel, tracking its reply when it opens
    /// an interaction.
    pub fn send(&mut self, message: ClientMessage) -> SendOutcome {
        let channel = message.channel();
        let interaction = message.interaction();
        let (message_type, payload) = match message.into_parts() {
            Ok(parts) => parts,
            Err(e) => return SendOutcome::Rejected(e.into()),
        };
        let interaction = interaction.map(|(kind, key)| QueuedInteraction {
            kind,
            key,
            correlation: payload.clone(),
        });
        self.send_to(channel, message_type, payload, interaction)
    }

    /// Send a raw message whose reply should be correlated.
    ///
    /// The interaction is tracked when the message actually goes out, and its
    /// id is written into the payload as `interactionId`.
    pub fn send_tracked(
        &mut self,
        kind: InteractionKind,
        key: &str,
        message_type: &str,
        payload: Value,
        correlation: Value,
    ) -> SendOutcome {
        let channel = kind.channel();
        let interaction = QueuedInteraction {
            kind,
            key: key.to_string(),
            correlation,
        };
        self.send_to(channel, message_type, payload, Some(interaction))
    }

    fn send_to(
        &mut self,
        kind: ChannelKind,
        message_type: &str,
        payload: Value,
        interaction: Option<QueuedInteraction>,
    ) -> SendOutcome {
        let now = Instant::now();

        if let Err(e) = self.check_sendable(kind) {
            self.emit_send_error(events::SEND_REJECTED, kind, message_type, &e);
            return SendOutcome::Rejected(e);
        }

        if self.confirm_ready(kind, now) {
            return match self.transmit(kind, message_type, payload, interaction, now) {
                Ok(interaction) => SendOutcome::Sent { interaction },
                Err(e @ CoordinatorError::TooManyPending { .. }) => {
                    self.emit_send_error(events::SEND_REJECTED, kind, message_type, &e);
                    SendOutcome::Rejected(e)
                }
                Err(e) => {
                    self.emit_send_error(events::SEND_FAILED, kind, message_type, &e);
                    SendOutcome::Rejected(e)
                }
            };
        }

        let queued = QueuedMessage {
            channel: kind,
            message_type: message_type.to_string(),
            payload,
            enqueued_at: now,
            interaction,
        };
        match self.queue.enqueue(queued) {
            Ok(position) => {
                self.emit_synthetic(
                    events::SEND_QUEUED,
                    Some(kind),
                    json!({ "messageType": message_type, "position": position }),
                );
                SendOutcome::Queued { position }
            }
            Err(e) => {
                self.emit_send_error(events::SEND_REJECTED, kind, message_type, &e);
                SendOutcome::Rejected(e)
            }
        }
    }

    /// Reject sends that can never succeed from the current state.
    fn check_sendable(&self, kind: ChannelKind) -> Result<(), CoordinatorError> {
        match self.world.as_ref().map(Channel::status) {
            None => return Err(CoordinatorError::NoWorldChannel),
            Some(ChannelStatus::Failed) if kind == ChannelKind::World => {
                return Err(Self::registration_exhausted_error())
            }
            Some(ChannelStatus::Failed) => return Err(CoordinatorError::NoWorldChannel),
            Some(_) => {}
        }
        if kind == ChannelKind::Activity
            && self.lifecycle.state() == LifecycleState::ActivityLeaving
        {
            return Err(CoordinatorError::NotReady(ChannelKind::Activity));
        }
        Ok(())
    }

    /// True when `kind` is ready and its bindings are still in place.
    ///
    /// A previously ready channel whose bindings vanished and could not be
    /// restored drops back to registering.
    fn confirm_ready(&mut self, kind: ChannelKind, now: Instant) -> bool {
        let channel = match kind {
            ChannelKind::World => self.world.as_ref(),
            ChannelKind::Activity => self.activity.as_ref(),
        };
        let Some(channel) = channel.filter(|c| c.is_ready()) else {
            return false;
        };
        if self.registry.ensure_ready(channel) {
            return true;
        }

        tracing::warn!(channel = %kind, "Handler bindings lost, re-registering");
        if let Some(channel) = self.channel_mut(kind) {
            channel.mark_unready();
            channel.retry_mut().reset();
        }
        self.schedule_registration_retry(kind, now);
        false
    }

    /// Hand one message to the transport, tracking its interaction first.
    fn transmit(
        &mut self,
        kind: ChannelKind,
        message_type: &str,
        mut payload: Value,
        interaction: Option<QueuedInteraction>,
        now: Instant,
    ) -> Result<Option<InteractionId>, CoordinatorError> {
        let id = match interaction {
            Some(i) => {
                let id = self.pending.track(
                    i.kind,
                    &i.key,
                    kind,
                    i.correlation,
                    self.clock.as_ref(),
                    &mut self.timers,
                    now,
                )?;
                attach_interaction_id(&mut payload, &id);
                Some(id)
            }
            None => None,
        };

        let channel = match kind {
            ChannelKind::World => self.world.as_ref(),
            ChannelKind::Activity => self.activity.as_ref(),
        };
        let result = match channel.and_then(Channel::transport) {
            Some(transport) => transport.send(message_type, payload),
            None => Err(TransportError::NotConnected),
        };

        match result {
            Ok(()) => {
                tracing::debug!(channel = %kind, message_type, "Sent message");
                Ok(id)
            }
            Err(e) => {
                tracing::warn!(channel = %kind, message_type, error = %e, "Transport send failed");
                if let Some(id) = &id {
                    self.pending.resolve(id, &mut self.timers);
                }
                Err(e.into())
            }
        }
    }

    /// Send everything queued for `kind`. Returns how many went out.
    fn flush(&mut self, kind: ChannelKind, now: Instant) -> usize {
        let batch = self.queue.take_for_flush(kind, now);
        let mut sent = 0;
        let mut remaining = batch.fresh.into_iter();
        while let Some(message) = remaining.next() {
            let message_type = message.message_type;
            match self.transmit(kind, &message_type, message.payload, message.interaction, now) {
                Ok(_) => sent += 1,
                Err(e @ CoordinatorError::TooManyPending { .. }) => {
                    self.emit_send_error(events::SEND_REJECTED, kind, &message_type, &e);
                }
                Err(e) => {
                    self.emit_send_error(events::SEND_FAILED, kind, &message_type, &e);
                    let rest: Vec<QueuedMessage> = remaining.collect();
                    tracing::warn!(
                        channel = %kind,
                        requeued = rest.len(),
                        "Flush interrupted by transport error"
                    );
                    self.queue.requeue_front(kind, rest);
                    break;
                }
            }
        }
        if sent > 0 || batch.dropped > 0 {
            tracing::info!(channel = %kind, sent, dropped = batch.dropped, "Flushed outbound queue");
        }
        sent
    }

    // =========================================================================
    // Interactions
    // =========================================================================

    /// Track an interaction without sending anything.
    ///
    /// The key embedded in the id is derived from `correlation`.
    pub fn track(
        &mut self,
        kind: InteractionKind,
        correlation: Value,
    ) -> Result<InteractionId, CoordinatorError> {
        let key = correlation_key(&correlation);
        let channel = kind.channel();
        self.pending.track(
            kind,
            &key,
            channel,
            correlation,
            self.clock.as_ref(),
            &mut self.timers,
            Instant::now(),
        )
    }

    /// Remove a live interaction without dispatching anything.
    pub fn resolve(&mut self, id: &InteractionId) -> bool {
        self.pending.resolve(id, &mut self.timers).is_some()
    }

    /// Cancel a live interaction, dispatching a `cancelled` outcome once.
    pub fn cancel_interaction(&mut self, id: &InteractionId) -> bool {
        match self.pending.resolve(id, &mut self.timers) {
            Some(entry) => {
                self.emit_interaction_outcome(entry, CANCELLED, None);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: &InteractionId) -> bool {
        self.pending.contains(id)
    }

    pub fn pending_interaction(&self, id: &InteractionId) -> Option<&PendingInteraction> {
        self.pending.get(id)
    }

    // =========================================================================
    // Activity lifecycle
    // =========================================================================

    /// Connect to an activity session by id.
    pub fn join_activity(&mut self, activity_id: &str) -> Result<(), CoordinatorError> {
        self.start_activity(activity_id)
    }

    /// Leave the activity channel. Repeated calls while a leave is in flight
    /// (or cooling down) do nothing.
    pub fn leave_activity(&mut self, reason: LeaveReason) -> LeaveOutcome {
        if self.lifecycle.leave_in_flight() {
            tracing::debug!(reason = reason.as_str(), "Leave already in progress");
            return LeaveOutcome::AlreadyLeaving;
        }
        if self.activity.is_none() {
            return LeaveOutcome::NoActivity;
        }
        self.lifecycle.begin_leave(reason.clone());

        let taken = self.activity.as_mut().map(|c| {
            let transport = c.take_transport();
            if transport.is_some() {
                c.set_status(ChannelStatus::Leaving);
            }
            (c.epoch(), transport)
        });

        match taken {
            Some((epoch, Some(transport))) => {
                tracing::info!(reason = reason.as_str(), epoch, "Leaving activity");
                let _ = self.lifecycle.transition(LifecycleState::ActivityLeaving);
                self.spawn_leave(ChannelKind::Activity, epoch, transport);
                LeaveOutcome::Started
            }
            _ => {
                // Connect still in flight: its late result is stale and gets
                // left on arrival.
                tracing::info!(reason = reason.as_str(), "Abandoning pending activity connect");
                let channel = self.activity.take();
                self.finish_activity_teardown(channel, None);
                LeaveOutcome::Abandoned
            }
        }
    }

    /// Leave the world channel, tearing down any activity first. Returns false
    /// when there is no world channel.
    pub fn disconnect_world(&mut self) -> bool {
        if self.world.is_none() {
            return false;
        }
        self.teardown_world(None, true);
        true
    }

    // =========================================================================
    // Event bus
    // =========================================================================

    pub fn on(
        &mut self,
        name: impl Into<String>,
        listener: impl FnMut(&BusEvent) -> anyhow::Result<()> + Send + 'static,
    ) -> ListenerId {
        self.bus.on(name, listener)
    }

    pub fn off(&mut self, name: &str, id: ListenerId) -> bool {
        self.bus.off(name, id)
    }

    // =========================================================================
    // Internals shared with the inbound side
    // =========================================================================

    fn new_channel(&mut self, kind: ChannelKind, requested_id: Option<String>) -> Channel {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        Channel::connecting(
            kind,
            epoch,
            InboundSink::new(kind, epoch, self.inbox_tx.clone()),
            RetryBudget::new(
                self.config.registration_attempts,
                self.config.registration_delay,
            ),
            requested_id,
        )
    }

    fn channel(&self, kind: ChannelKind) -> Option<&Channel> {
        match kind {
            ChannelKind::World => self.world.as_ref(),
            ChannelKind::Activity => self.activity.as_ref(),
        }
    }

    fn channel_mut(&mut self, kind: ChannelKind) -> Option<&mut Channel> {
        match kind {
            ChannelKind::World => self.world.as_mut(),
            ChannelKind::Activity => self.activity.as_mut(),
        }
    }

    fn is_current(&self, kind: ChannelKind, epoch: u64) -> bool {
        self.channel(kind).is_some_and(|c| c.epoch() == epoch)
    }

    /// One registration attempt; on failure either arms the next attempt or
    /// fails the channel.
    fn attempt_registration(&mut self, kind: ChannelKind, now: Instant) {
        let channel = match kind {
            ChannelKind::World => self.world.as_ref(),
            ChannelKind::Activity => self.activity.as_ref(),
        };
        let Some(channel) = channel else {
            return;
        };
        if channel.status() != ChannelStatus::Connecting {
            return;
        }
        if self.registry.ensure_ready(channel) {
            self.on_channel_ready(kind, now);
        } else {
            self.schedule_registration_retry(kind, now);
        }
    }

    fn schedule_registration_retry(&mut self, kind: ChannelKind, now: Instant) {
        let Some(channel) = self.channel_mut(kind) else {
            return;
        };
        let epoch = channel.epoch();
        let next = channel.retry_mut().next_delay_and_advance();
        let attempts = channel.retry().attempts();
        match next {
            Some(delay) => {
                tracing::debug!(
                    channel = %kind,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Handler registration not confirmed, retrying"
                );
                self.timers
                    .arm_after(now, delay, TimerEvent::RegistrationRetry { channel: kind, epoch });
            }
            None => {
                tracing::error!(channel = %kind, attempts, "Handler registration attempts exhausted");
                match kind {
                    ChannelKind::World => self.fail_world_initialization(attempts),
                    ChannelKind::Activity => self.fail_activity_connect(
                        "handler registration attempts exhausted".to_string(),
                    ),
                }
            }
        }
    }

    fn on_channel_ready(&mut self, kind: ChannelKind, now: Instant) {
        let identifier = match self.channel_mut(kind) {
            Some(channel) => {
                channel.retry_mut().reset();
                channel.mark_ready();
                channel.identifier().map(str::to_string)
            }
            None => return,
        };
        tracing::info!(channel = %kind, identifier = ?identifier, "Channel ready");

        let next = match kind {
            ChannelKind::World => LifecycleState::WorldConnected,
            ChannelKind::Activity => LifecycleState::ActivityConnected,
        };
        let _ = self.lifecycle.transition(next);

        let flushed = self.flush(kind, now);
        let (name, payload) = match kind {
            ChannelKind::World => (
                events::WORLD_READY,
                json!({ "worldId": identifier, "flushed": flushed }),
            ),
            ChannelKind::Activity => (
                events::ACTIVITY_CONNECTED,
                json!({ "activityId": identifier, "flushed": flushed }),
            ),
        };
        self.emit_synthetic(name, Some(kind), payload);
    }

    /// Registration on the world channel ran out of attempts, either during
    /// initialization or while restoring lost bindings. The activity goes
    /// down with it.
    fn fail_world_initialization(&mut self, attempts: u32) {
        self.teardown_activity_with_world();
        let taken = self.world.as_mut().map(|c| {
            c.set_status(ChannelStatus::Failed);
            (c.epoch(), c.take_transport())
        });
        if let Some((epoch, Some(transport))) = taken {
            self.spawn_leave(ChannelKind::World, epoch, transport);
        }
        self.purge(ChannelKind::World);
        self.enter_idle();
        self.emit_synthetic(
            events::INITIALIZATION_FAILED,
            Some(ChannelKind::World),
            json!({
                "reason": "handler registration attempts exhausted",
                "attempts": attempts,
                "registrationErrors": self.registry.registration_errors(),
            }),
        );
    }

    /// The activity connect or its registration failed: drop the channel and
    /// return to the world.
    fn fail_activity_connect(&mut self, reason: String) {
        let Some(mut channel) = self.activity.take() else {
            return;
        };
        tracing::warn!(
            activity_id = ?channel.requested_id(),
            reason = %reason,
            "Activity connection failed"
        );
        if let Some(transport) = channel.take_transport() {
            self.spawn_leave(ChannelKind::Activity, channel.epoch(), transport);
        }
        self.purge(ChannelKind::Activity);
        self.return_to_world();
        self.emit_synthetic(
            events::ACTIVITY_CONNECTION_FAILED,
            Some(ChannelKind::Activity),
            json!({ "activityId": channel.requested_id(), "reason": reason }),
        );
    }

    /// Final step of every activity leave: purge, return to the world, emit
    /// `activityLeft` and arm the guard cooldown.
    fn finish_activity_teardown(&mut self, channel: Option<Channel>, error: Option<String>) {
        let activity_id = channel
            .as_ref()
            .and_then(|c| c.identifier().or(c.requested_id()).map(str::to_string));
        let reason = self.lifecycle.take_leave_reason();
        let ended = self.activity_end.take();

        self.purge(ChannelKind::Activity);
        self.return_to_world();

        let now = Instant::now();
        if let Some(handle) = self.cooldown.take() {
            self.timers.cancel(handle);
        }
        self.cooldown = Some(self.timers.arm_after(
            now,
            self.config.leave_cooldown,
            TimerEvent::LeaveCooldown,
        ));

        self.emit_synthetic(
            events::ACTIVITY_LEFT,
            Some(ChannelKind::Activity),
            json!({
                "activityId": activity_id,
                "reason": reason.as_ref().map(LeaveReason::as_str),
                "ended": ended,
                "error": error,
            }),
        );
    }

    /// Tear down both channels and return to `Idle`.
    fn teardown_world(&mut self, reason: Option<String>, requested: bool) {
        self.teardown_activity_with_world();

        let identifier = match self.world.take() {
            Some(mut world) => {
                if requested {
                    if let Some(transport) = world.take_transport() {
                        self.spawn_leave(ChannelKind::World, world.epoch(), transport);
                    }
                }
                world.identifier().map(str::to_string)
            }
            None => None,
        };
        self.purge(ChannelKind::World);
        self.enter_idle();

        tracing::info!(requested, reason = ?reason, "World channel closed");
        self.emit_synthetic(
            events::WORLD_DISCONNECTED,
            Some(ChannelKind::World),
            json!({ "worldId": identifier, "reason": reason, "requested": requested }),
        );
    }

    /// Activities never outlive their world: leave and purge it first.
    fn teardown_activity_with_world(&mut self) {
        if let Some(mut activity) = self.activity.take() {
            tracing::info!("Tearing down activity channel with the world channel");
            if let Some(transport) = activity.take_transport() {
                self.spawn_leave(ChannelKind::Activity, activity.epoch(), transport);
            }
        }
        self.activity_end = None;
        self.purge(ChannelKind::Activity);
    }

    fn enter_idle(&mut self) {
        if let Some(handle) = self.cooldown.take() {
            self.timers.cancel(handle);
        }
        self.lifecycle.clear_leave_guard();
        let _ = self.lifecycle.transition(LifecycleState::Idle);
    }

    /// Move back to `WorldConnected` from any activity state.
    fn return_to_world(&mut self) {
        if self.lifecycle.state() == LifecycleState::ActivityConnected {
            let _ = self.lifecycle.transition(LifecycleState::ActivityLeaving);
        }
        if self.lifecycle.state().has_activity() {
            let _ = self.lifecycle.transition(LifecycleState::WorldConnected);
        }
    }

    /// Discard everything queued and pending for `kind`.
    fn purge(&mut self, kind: ChannelKind) {
        let dropped = self.queue.purge(kind);
        let purged = self.pending.purge_channel(kind, &mut self.timers);
        if dropped > 0 || !purged.is_empty() {
            tracing::info!(
                channel = %kind,
                queued = dropped,
                interactions = purged.len(),
                "Purged channel state"
            );
        }
        for entry in purged {
            self.emit_interaction_outcome(entry, CANCELLED, None);
        }
    }

    fn spawn_leave(&self, kind: ChannelKind, epoch: u64, transport: Box<dyn Transport>) {
        self.spawn(async move {
            let result = transport.leave().await;
            match kind {
                ChannelKind::World => InboxEvent::WorldLeft { epoch, result },
                ChannelKind::Activity => InboxEvent::ActivityLeft { epoch, result },
            }
        });
    }

    /// Run `task` in the background and post its result to the inbox.
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = InboxEvent> + Send + 'static,
    {
        let tx = self.inbox_tx.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    // The coordinator may be gone by now.
                    let _ = tx.send(task.await);
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "No Tokio runtime, background task not started");
            }
        }
    }

    fn emit_synthetic(&mut self, name: &str, channel: Option<ChannelKind>, payload: Value) {
        let mut event = BusEvent::synthetic(name, payload);
        if let Some(channel) = channel {
            event = event.with_channel(channel);
        }
        self.bus.emit(event);
    }

    fn emit_send_error(
        &mut self,
        name: &str,
        kind: ChannelKind,
        message_type: &str,
        error: &CoordinatorError,
    ) {
        self.emit_synthetic(
            name,
            Some(kind),
            json!({
                "messageType": message_type,
                "error": error.to_string(),
                "category": error.category(),
                "message": error.user_message(),
            }),
        );
    }

    /// Dispatch the synthetic outcome of an interaction that ended without a
    /// reply, under its kind's result event name.
    fn emit_interaction_outcome(
        &mut self,
        entry: PendingInteraction,
        flag: &str,
        error: Option<CoordinatorError>,
    ) {
        let name = entry.kind.result_message_type();
        let routed = entry.kind.extension().map(|ext| format!("{name}:{ext}"));
        let mut payload = json!({
            "kind": entry.kind.name(),
            "interactionId": entry.id,
            "correlation": entry.correlation,
        });
        payload[flag] = Value::Bool(true);
        if let Some(error) = error {
            payload["error"] = Value::String(error.to_string());
            payload["category"] = json!(error.category());
            payload["message"] = Value::String(error.user_message().to_string());
        }

        let event = BusEvent::synthetic(name, payload)
            .with_channel(entry.channel)
            .with_interaction(entry.id);
        self.bus.emit_routed(routed, event);
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Write the interaction id into an object (or null) payload.
fn attach_interaction_id(payload: &mut Value, id: &InteractionId) {
    if payload.is_null() {
        *payload = Value::Object(Default::default());
    }
    if let Some(object) = payload.as_object_mut() {
        object.insert(
            INTERACTION_ID_FIELD.to_string(),
            Value::String(id.as_str().to_string()),
        );
    }
}

/// Disambiguating key for a correlation value: scalars joined with commas.
fn correlation_key(correlation: &Value) -> String {
    fn scalar(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    let key = match correlation {
        Value::Object(map) => map.values().filter_map(scalar).collect::<Vec<_>>().join(","),
        Value::Array(items) => items.iter().filter_map(scalar).collect::<Vec<_>>().join(","),
        other => scalar(other).unwrap_or_default(),
    };
    if key.is_empty() {
        "-".to_string()
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_key_from_coordinates() {
        assert_eq!(correlation_key(&json!({ "x": 10, "y": 20 })), "10,20");
        assert_eq!(correlation_key(&json!("sign-3")), "sign-3");
        assert_eq!(correlation_key(&Value::Null), "-");
    }

    #[test]
    fn test_attach_interaction_id() {
        let id = InteractionId::from("search:1,2:5");
        let mut payload = json!({ "x": 1 });
        attach_interaction_id(&mut payload, &id);
        assert_eq!(payload, json!({ "x": 1, "interactionId": "search:1,2:5" }));

        let mut empty = Value::Null;
        attach_interaction_id(&mut empty, &id);
        assert_eq!(empty, json!({ "interactionId": "search:1,2:5" }));
    }
}
