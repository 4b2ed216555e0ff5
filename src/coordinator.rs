//! Per-endpoint sync coordination
//!
//! A `SyncCoordinator` is the single owner of an endpoint's mutable state.
//! Every input (UI intent, inbound payload, sample, link activation) enters
//! through one of its `handle_*` methods, so no locking is needed as long as
//! one task drives it (see `runtime`).
//!
//! Recorder role: intents and remote start/stop drive the `WorkoutSession`;
//! samples become outbound heart-rate updates and alerts.
//!
//! Monitor role: intents become outbound start/stop requests; inbound updates
//! and stop notices drive the display.
//!
//! Messages arriving before the link finished activating are buffered and
//! replayed on activation, as are outbound messages the link refused. Both
//! buffers are bounded by `pending_message_limit`; the oldest entry is
//! dropped when full.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::alert::{AlertPolicy, ExcursionTracker};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::link::{Link, LinkMessage, MessageKind, Payload};
use crate::sampler::{HeartRateSampler, SampleSink};
use crate::session::{StartOutcome, StopOutcome, WorkoutSession, WorkoutState};
use crate::types::{AlertEvent, ButtonLabel, DailyAverage, DisplayState, Role, Sample, UiIntent};

struct RecorderState {
    session: WorkoutSession,
    excursions: ExcursionTracker,
    sample_sink: SampleSink,
    /// Latest `sent_at` of a remote start/stop already applied
    last_remote_intent_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MonitorState {
    workout_active: bool,
    /// A stop was issued or received since the last start. Heart-rate
    /// updates cannot flip the button back while it holds, unless they are
    /// newer than a stop notice from the Recorder.
    stopped: bool,
    /// Recorder-stamped time of the latest stop notice
    confirmed_stop_at: Option<DateTime<Utc>>,
    /// Time of the update currently displayed
    last_sample_at: Option<DateTime<Utc>>,
}

enum RoleState {
    Recorder(RecorderState),
    Monitor(MonitorState),
}

/// Drives one endpoint
pub struct SyncCoordinator {
    config: SyncConfig,
    role: RoleState,
    link: Arc<dyn Link>,
    link_ready: bool,
    display: DisplayState,
    alerts: Vec<AlertEvent>,
    outbound_pending: VecDeque<LinkMessage>,
    inbound_pending: VecDeque<LinkMessage>,
    recent_ids: VecDeque<Uuid>,
}

impl SyncCoordinator {
    /// Coordinator for the wrist device
    pub fn recorder(
        config: SyncConfig,
        link: Arc<dyn Link>,
        sampler: Box<dyn HeartRateSampler>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let session = WorkoutSession::new(sampler, AlertPolicy::new(config.alert_threshold_bpm));
        let role = RoleState::Recorder(RecorderState {
            session,
            excursions: ExcursionTracker::new(config.alert_mode),
            sample_sink: Arc::new(|_| {}),
            last_remote_intent_at: None,
        });
        Ok(Self::with_role(config, link, role))
    }

    /// Coordinator for the handheld device
    pub fn monitor(config: SyncConfig, link: Arc<dyn Link>) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self::with_role(
            config,
            link,
            RoleState::Monitor(MonitorState::default()),
        ))
    }

    fn with_role(config: SyncConfig, link: Arc<dyn Link>, role: RoleState) -> Self {
        let link_ready = link.is_activated();
        Self {
            config,
            role,
            link,
            link_ready,
            display: DisplayState::default(),
            alerts: Vec::new(),
            outbound_pending: VecDeque::new(),
            inbound_pending: VecDeque::new(),
            recent_ids: VecDeque::new(),
        }
    }

    pub fn role(&self) -> Role {
        match self.role {
            RoleState::Recorder(_) => Role::Recorder,
            RoleState::Monitor(_) => Role::Monitor,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn link(&self) -> Arc<dyn Link> {
        Arc::clone(&self.link)
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn is_link_ready(&self) -> bool {
        self.link_ready
    }

    /// Recorder's session state; `None` on the Monitor
    pub fn workout_state(&self) -> Option<&WorkoutState> {
        match &self.role {
            RoleState::Recorder(recorder) => Some(recorder.session.state()),
            RoleState::Monitor(_) => None,
        }
    }

    /// Whether this endpoint believes a workout is running
    pub fn is_workout_active(&self) -> bool {
        match &self.role {
            RoleState::Recorder(recorder) => recorder.session.is_recording(),
            RoleState::Monitor(monitor) => monitor.workout_active,
        }
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound_pending.len()
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound_pending.len()
    }

    /// Where the sampler should push samples once a recording starts.
    /// Only meaningful on the Recorder.
    pub fn route_samples_to(&mut self, sink: SampleSink) {
        if let RoleState::Recorder(recorder) = &mut self.role {
            recorder.sample_sink = sink;
        }
    }

    /// Alerts raised since the last call
    pub fn take_alerts(&mut self) -> Vec<AlertEvent> {
        std::mem::take(&mut self.alerts)
    }

    /// Replace the history shown on the display
    pub fn set_daily_averages(&mut self, averages: Vec<DailyAverage>) {
        self.display.daily_averages = averages;
    }

    /// The link finished activating: flush both buffers
    pub fn handle_link_activated(&mut self) {
        if !self.link_ready {
            log::info!("{} link activated", self.role().as_str());
        }
        self.link_ready = true;

        while let Some(message) = self.outbound_pending.pop_front() {
            if let Err(e) = self.link.send(&message) {
                log::warn!("Link still unavailable, keeping {} queued: {}", message.kind.key(), e);
                self.outbound_pending.push_front(message);
                break;
            }
        }

        while let Some(message) = self.inbound_pending.pop_front() {
            self.process_message(message);
        }
    }

    /// Local button tap
    pub fn handle_intent(&mut self, intent: UiIntent) -> Result<(), SyncError> {
        let start = match intent {
            UiIntent::Start => true,
            UiIntent::Stop => false,
            UiIntent::Toggle => !self.is_workout_active(),
        };

        match (self.role(), start) {
            (Role::Recorder, true) => self.start_recording(),
            (Role::Recorder, false) => {
                self.stop_recording();
                Ok(())
            }
            (Role::Monitor, true) => {
                self.request_start();
                Ok(())
            }
            (Role::Monitor, false) => {
                self.request_stop();
                Ok(())
            }
        }
    }

    /// Raw payload delivered by the link. Malformed payloads are dropped.
    pub fn handle_inbound(&mut self, payload: Payload) {
        match LinkMessage::from_payload(&payload) {
            Ok(message) => self.handle_message(message),
            Err(e) => log::warn!("Dropping inbound payload on {}: {}", self.role().as_str(), e),
        }
    }

    /// Decoded inbound message
    pub fn handle_message(&mut self, message: LinkMessage) {
        if !self.link_ready {
            log::debug!("Buffering {} until the link activates", message.kind.key());
            push_bounded(
                &mut self.inbound_pending,
                message,
                self.config.pending_message_limit,
                "inbound",
            );
            return;
        }
        self.process_message(message);
    }

    /// Sample routed from the sampler
    pub fn handle_sample(&mut self, sample: Sample) {
        let RoleState::Recorder(recorder) = &mut self.role else {
            log::debug!("Monitor ignores local samples");
            return;
        };
        let Some(effects) = recorder.session.on_sample(sample) else {
            return;
        };

        self.display.current_bpm = effects.update.payload.clone();
        if recorder.excursions.observe(effects.decision) {
            log::warn!("High heart rate detected: {} bpm", effects.sample.bpm);
            self.alerts.push(AlertEvent {
                decision: effects.decision,
                sample: effects.sample,
                threshold_bpm: recorder.session.policy().threshold_bpm(),
            });
        }
        self.send(effects.update);
    }

    fn process_message(&mut self, message: LinkMessage) {
        if self.is_duplicate(&message) {
            log::debug!("Dropping redelivered {}", message.kind.key());
            return;
        }

        match (self.role(), message.kind) {
            (Role::Recorder, MessageKind::StartWorkout) => {
                if self.remote_intent_superseded(&message) {
                    return;
                }
                if let Err(e) = self.start_recording() {
                    log::warn!("Remote start failed: {}", e);
                    // Let the Monitor drop its optimistic "Stop" affordance
                    self.send(LinkMessage::stopped_from_remote());
                }
            }
            (Role::Recorder, MessageKind::StopWorkout) => {
                if self.remote_intent_superseded(&message) {
                    return;
                }
                self.stop_recording();
            }
            (Role::Monitor, MessageKind::HeartRateUpdate) => {
                self.apply_heart_rate(message);
            }
            (Role::Monitor, MessageKind::StoppedFromRemote | MessageKind::StopWorkout) => {
                self.apply_remote_stop(message);
            }
            (role, kind) => {
                log::debug!("{} ignores {}", role.as_str(), kind.key());
            }
        }
    }

    fn is_duplicate(&mut self, message: &LinkMessage) -> bool {
        let Some(id) = message.id else {
            return false;
        };
        if self.recent_ids.contains(&id) {
            return true;
        }
        self.recent_ids.push_back(id);
        while self.recent_ids.len() > self.config.dedup_window {
            self.recent_ids.pop_front();
        }
        false
    }

    fn remote_intent_superseded(&mut self, message: &LinkMessage) -> bool {
        let RoleState::Recorder(recorder) = &mut self.role else {
            return false;
        };
        let Some(sent_at) = message.sent_at else {
            return false;
        };
        match recorder.last_remote_intent_at {
            Some(last) if sent_at < last => {
                log::debug!("Ignoring superseded remote {}", message.kind.key());
                true
            }
            _ => {
                recorder.last_remote_intent_at = Some(sent_at);
                false
            }
        }
    }

    fn start_recording(&mut self) -> Result<(), SyncError> {
        let RoleState::Recorder(recorder) = &mut self.role else {
            return Ok(());
        };
        match recorder.session.start(Arc::clone(&recorder.sample_sink))? {
            StartOutcome::Started => {
                log::info!("Workout started");
                self.display.current_bpm = crate::types::NO_READING.to_string();
                self.display.button_label = ButtonLabel::Stop;
            }
            StartOutcome::AlreadyRecording => {
                log::debug!("Start ignored, already recording");
            }
        }
        Ok(())
    }

    fn stop_recording(&mut self) {
        let RoleState::Recorder(recorder) = &mut self.role else {
            return;
        };
        match recorder.session.stop() {
            StopOutcome::Stopped(summary) => {
                log::info!("Workout stopped after {} samples", summary.samples);
                recorder.excursions.reset();
                self.display.reset();
                self.send(LinkMessage::stopped_from_remote());
            }
            StopOutcome::AlreadyIdle => {
                log::debug!("Stop ignored, already idle");
            }
        }
    }

    fn request_start(&mut self) {
        let RoleState::Monitor(monitor) = &mut self.role else {
            return;
        };
        if monitor.workout_active {
            log::debug!("Start ignored, workout already active");
            return;
        }
        monitor.workout_active = true;
        monitor.stopped = false;
        self.display.button_label = ButtonLabel::Stop;
        self.send(LinkMessage::start_workout());
    }

    fn request_stop(&mut self) {
        let RoleState::Monitor(monitor) = &mut self.role else {
            return;
        };
        if !monitor.workout_active {
            log::debug!("Stop ignored, no workout active");
            return;
        }
        monitor.workout_active = false;
        monitor.stopped = true;
        self.display.reset();
        self.send(LinkMessage::stop_workout());
    }

    fn apply_heart_rate(&mut self, message: LinkMessage) {
        let RoleState::Monitor(monitor) = &mut self.role else {
            return;
        };
        if let (Some(sent_at), Some(shown)) = (message.sent_at, monitor.last_sample_at) {
            if sent_at < shown {
                log::debug!("Ignoring heart rate older than the one displayed");
                return;
            }
        }
        // Sample times and stop notices are both stamped by the Recorder clock
        let after_confirmed_stop = match (message.sent_at, monitor.confirmed_stop_at) {
            (Some(sent_at), Some(stop)) => Some(sent_at > stop),
            _ => None,
        };
        if after_confirmed_stop == Some(false) {
            log::debug!("Ignoring heart rate sent before the last stop");
            return;
        }
        if monitor.stopped {
            if after_confirmed_stop != Some(true) {
                log::debug!("Ignoring heart rate while stopped");
                return;
            }
            log::info!("Workout started on the Recorder");
            monitor.stopped = false;
        }

        monitor.workout_active = true;
        monitor.last_sample_at = latest(monitor.last_sample_at, message.sent_at);
        self.display.current_bpm = message.payload;
        self.display.button_label = ButtonLabel::Stop;
    }

    fn apply_remote_stop(&mut self, message: LinkMessage) {
        let RoleState::Monitor(monitor) = &mut self.role else {
            return;
        };
        if message.kind == MessageKind::StoppedFromRemote {
            if let (Some(sent_at), Some(shown)) = (message.sent_at, monitor.last_sample_at) {
                if sent_at < shown {
                    log::debug!("Ignoring stop notice older than the heart rate displayed");
                    return;
                }
            }
            monitor.confirmed_stop_at = latest(monitor.confirmed_stop_at, message.sent_at);
        }
        monitor.workout_active = false;
        monitor.stopped = true;
        self.display.reset();
    }

    fn send(&mut self, message: LinkMessage) {
        if !self.link_ready {
            log::debug!("Queueing {} until the link activates", message.kind.key());
        } else {
            match self.link.send(&message) {
                Ok(()) => return,
                Err(e) => log::warn!("Queueing {}: {}", message.kind.key(), e),
            }
        }
        push_bounded(
            &mut self.outbound_pending,
            message,
            self.config.pending_message_limit,
            "outbound",
        );
    }
}

fn push_bounded(queue: &mut VecDeque<LinkMessage>, message: LinkMessage, limit: usize, label: &str) {
    queue.push_back(message);
    while queue.len() > limit {
        if let Some(dropped) = queue.pop_front() {
            log::warn!("{} buffer full, dropping {}", label, dropped.kind.key());
        }
    }
}

fn latest(current: Option<DateTime<Utc>>, candidate: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
