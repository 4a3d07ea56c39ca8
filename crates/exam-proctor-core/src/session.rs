//! The proctored exam session
//!
//! [`ExamSession`] owns every piece of per-attempt state: the media handle,
//! samplers, detectors, violation log, countdown, integrity guard, answers
//! and submission guard. Nothing is process-wide. Periodic work is driven
//! from outside through the `on_*_tick` methods (see
//! [`SessionRunner`](crate::runner::SessionRunner)).
//!
//! ```text
//! AwaitingPermission ──start──> Monitoring ──submit──> Submitting ──ok──> Submitted
//!                                    ^                     │
//!                                    └──────failure────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::clock::{Clock, ClockTick, DeadlineSource, SessionClock, SystemClock};
use crate::config::ProctorConfig;
use crate::detection::{AudioAnomalyDetector, CapabilityProbe, HeuristicOnly, ViolationDetector};
use crate::error::{ConfigError, ProctorError, Result};
use crate::events::{SessionEvent, SessionEvents, SubscriptionId};
use crate::integrity::{
    HeadlessPlatform, IntegrityFlags, IntegrityGuard, PlatformEvent, PlatformIntegrityAdapter,
    Warning, WarningKind,
};
use crate::media::{AudioSampler, FrameSampler, MediaDevices, MediaSession, PermissionBroker};
use crate::metrics::ProctorMetrics;
use crate::store::{AttemptScope, KeyValueStore, MemoryStore};
use crate::submission::{
    AnswerSheet, SubmissionApi, SubmissionCoordinator, SubmissionPayload, SubmissionResponse,
    SubmitTrigger,
};
use crate::violation::{ViolationCategory, ViolationLog, ViolationRecord};

/// Lifecycle of a proctored attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingPermission,
    Monitoring,
    Submitting,
    /// Terminal
    Submitted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::AwaitingPermission => "awaiting_permission",
            SessionState::Monitoring => "monitoring",
            SessionState::Submitting => "submitting",
            SessionState::Submitted => "submitted",
        };
        f.write_str(name)
    }
}

/// Identity and timing of the attempt being proctored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptInfo {
    pub scope: AttemptScope,
    pub time_limit_minutes: u32,
    /// Changes whenever the quiz content changes; invalidates a stored deadline
    pub content_version: String,
}

impl AttemptInfo {
    pub fn new(scope: AttemptScope, time_limit_minutes: u32, content_version: impl Into<String>) -> Self {
        Self {
            scope,
            time_limit_minutes,
            content_version: content_version.into(),
        }
    }
}

/// Result of a submit request
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The payload was accepted
    Submitted(SubmissionResponse),
    /// Another submission holds the guard or already succeeded
    Ignored,
}

/// Builder for [`ExamSession`]
pub struct ExamSessionBuilder {
    attempt: AttemptInfo,
    config: ProctorConfig,
    devices: Option<Arc<dyn MediaDevices>>,
    api: Option<Arc<dyn SubmissionApi>>,
    store: Option<Arc<dyn KeyValueStore>>,
    platform: Option<Arc<dyn PlatformIntegrityAdapter>>,
    clock: Option<Arc<dyn Clock>>,
    probe: Option<Box<dyn CapabilityProbe>>,
    metrics: Option<ProctorMetrics>,
}

impl ExamSessionBuilder {
    pub fn new(attempt: AttemptInfo) -> Self {
        Self {
            attempt,
            config: ProctorConfig::default(),
            devices: None,
            api: None,
            store: None,
            platform: None,
            clock: None,
            probe: None,
            metrics: None,
        }
    }

    pub fn config(mut self, config: ProctorConfig) -> Self {
        self.config = config;
        self
    }

    /// Camera and microphone provider (required)
    pub fn devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Submission endpoint (required)
    pub fn api(mut self, api: Arc<dyn SubmissionApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Durable store for the deadline; in-memory by default
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Page integration; headless by default
    pub fn platform(mut self, platform: Arc<dyn PlatformIntegrityAdapter>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Wall-clock source; system time by default
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Analyzer capability probe; heuristic-only by default
    pub fn probe(mut self, probe: Box<dyn CapabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn metrics(mut self, metrics: ProctorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<ExamSession> {
        self.config.validate()?;

        let devices = self.devices.ok_or(ConfigError::InvalidValue {
            field: "devices",
            reason: "a media device provider is required".to_string(),
        })?;
        let api = self.api.ok_or(ConfigError::InvalidValue {
            field: "api",
            reason: "a submission endpoint is required".to_string(),
        })?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
        let platform = self
            .platform
            .unwrap_or_else(|| Arc::new(HeadlessPlatform::new()) as Arc<dyn PlatformIntegrityAdapter>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let probe = self
            .probe
            .unwrap_or_else(|| Box::new(HeuristicOnly) as Box<dyn CapabilityProbe>);

        let config = self.config;
        let attempt = self.attempt;
        let detector = ViolationDetector::new(&config, probe.as_ref());
        let audio_detector = AudioAnomalyDetector::new(config.audio.clone(), config.debounce.audio);

        Ok(ExamSession {
            id: Uuid::new_v4(),
            state: SessionState::AwaitingPermission,
            broker: PermissionBroker::new(devices),
            media: None,
            frame_sampler: FrameSampler::new(config.sampling.video_interval()),
            audio_sampler: AudioSampler::new(config.sampling.audio_interval()),
            detector,
            audio_detector,
            log: ViolationLog::new(),
            clock: SessionClock::new(
                store,
                attempt.scope.clone(),
                clock,
                attempt.time_limit_minutes,
                attempt.content_version.clone(),
            ),
            integrity: IntegrityGuard::new(config.integrity.clone(), platform),
            coordinator: SubmissionCoordinator::new(api, attempt.scope.clone()),
            answers: AnswerSheet::new(),
            events: SessionEvents::new(),
            metrics: self.metrics,
            current_question: 0,
            device_lost: false,
            torn_down: false,
            attempt,
            config,
        })
    }
}

/// All state for one proctored attempt
pub struct ExamSession {
    id: Uuid,
    attempt: AttemptInfo,
    config: ProctorConfig,
    state: SessionState,
    broker: PermissionBroker,
    media: Option<MediaSession>,
    frame_sampler: FrameSampler,
    audio_sampler: AudioSampler,
    detector: ViolationDetector,
    audio_detector: AudioAnomalyDetector,
    log: ViolationLog,
    clock: SessionClock,
    integrity: IntegrityGuard,
    coordinator: SubmissionCoordinator,
    answers: AnswerSheet,
    events: SessionEvents,
    metrics: Option<ProctorMetrics>,
    current_question: usize,
    device_lost: bool,
    torn_down: bool,
}

impl ExamSession {
    pub fn builder(attempt: AttemptInfo) -> ExamSessionBuilder {
        ExamSessionBuilder::new(attempt)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn attempt(&self) -> &AttemptInfo {
        &self.attempt
    }

    pub fn config(&self) -> &ProctorConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn violations(&self) -> &ViolationLog {
        &self.log
    }

    pub fn flags(&self) -> IntegrityFlags {
        self.integrity.flags()
    }

    pub fn answers(&self) -> &AnswerSheet {
        &self.answers
    }

    pub fn current_question(&self) -> usize {
        self.current_question
    }

    pub fn remaining(&self) -> Option<chrono::Duration> {
        self.clock.remaining()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// True when the camera was granted and its tracks are still running
    pub fn is_media_live(&self) -> bool {
        self.media.as_ref().is_some_and(MediaSession::is_live)
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    /// The warning currently shown to the candidate
    pub fn active_warning(&mut self) -> Option<&Warning> {
        let now = self.clock.now();
        self.integrity.active_warning(now)
    }

    pub fn subscribe(&mut self) -> (SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>) {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::info!(session = %self.id, %from, %to, "Session state changed");
        self.events.publish(SessionEvent::StateChanged { from, to });
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ProctorError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Acquire the camera, start the countdown and enforce fullscreen
    ///
    /// A media error leaves the session awaiting permission; the caller
    /// should show [`MediaError::user_message`](crate::media::MediaError::user_message)
    /// and return to the assignment view.
    pub async fn start(&mut self) -> Result<DeadlineSource> {
        self.require("start", &[SessionState::AwaitingPermission])?;

        let media = self.broker.acquire().await?;
        self.media = Some(media);

        let source = self.clock.start()?;
        if matches!(source, DeadlineSource::Recomputed(_)) {
            if let Some(metrics) = &self.metrics {
                metrics.record_deadline_recomputed();
            }
        }

        self.integrity.start();
        self.set_state(SessionState::Monitoring);
        if let Some(metrics) = &self.metrics {
            metrics.session_started();
        }
        Ok(source)
    }

    /// Record an answer
    pub fn set_answer(
        &mut self,
        question_id: impl Into<String>,
        answer: impl Into<String>,
    ) -> Result<()> {
        self.require("set_answer", &[SessionState::Monitoring])?;
        self.answers.set(question_id, answer);
        Ok(())
    }

    /// Move to another question; the fullscreen exit this may cause is excused
    pub fn navigate(&mut self, question_index: usize) -> Result<()> {
        self.require("navigate", &[SessionState::Monitoring])?;
        self.current_question = question_index;
        let now = self.clock.now();
        self.integrity.on_navigation(now);
        Ok(())
    }

    /// Video sampling tick
    pub fn on_video_tick(&mut self) -> Option<ViolationRecord> {
        if self.state != SessionState::Monitoring || self.check_device() {
            return None;
        }
        let frame = self.frame_sampler.sample(self.media.as_mut())?;
        let now = self.clock.now();
        let record = self.detector.process(&frame, &mut self.log, now)?;
        self.on_violation(record);
        Some(record)
    }

    /// Audio sampling tick
    pub fn on_audio_tick(&mut self) -> Option<ViolationRecord> {
        if self.state != SessionState::Monitoring || self.check_device() {
            return None;
        }
        let spectrum = self.audio_sampler.sample(self.media.as_mut())?;
        let now = self.clock.now();
        let record = self.audio_detector.process(&spectrum, &mut self.log, now)?;
        self.on_violation(record);
        Some(record)
    }

    /// Countdown tick; submits automatically once the deadline passes
    ///
    /// Visibility and focus have no effect on expiry.
    pub async fn on_clock_tick(&mut self) -> Option<Result<SubmitOutcome>> {
        if self.state != SessionState::Monitoring {
            return None;
        }
        match self.clock.tick() {
            ClockTick::Running { remaining } => {
                self.events.publish(SessionEvent::time_remaining(remaining));
                None
            }
            ClockTick::Expired => Some(self.submit(SubmitTrigger::AutoTimeout).await),
            ClockTick::Elapsed => None,
        }
    }

    /// Feed a page-level event to the integrity guard
    pub fn handle_platform_event(&mut self, event: &PlatformEvent) -> Option<Warning> {
        if self.state != SessionState::Monitoring {
            return None;
        }
        let now = self.clock.now();
        let warning = self.integrity.handle(event, now)?;

        if warning.kind == WarningKind::TabSwitch {
            let record = self.log.record_violation(ViolationCategory::TabSwitching, now);
            self.on_violation(record);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_warning(warning.kind);
        }
        self.events.publish(SessionEvent::Warning(warning.clone()));
        Some(warning)
    }

    /// Whether the page should swallow the event's default action
    pub fn should_suppress(&self, event: &PlatformEvent) -> bool {
        self.state == SessionState::Monitoring && self.integrity.should_suppress(event)
    }

    /// A device track ended on its own (unplugged or permission revoked)
    pub fn device_ended(&mut self) {
        if self.media.is_some() {
            self.handle_device_lost();
        }
    }

    /// Submit the attempt at most once
    ///
    /// The guard is set before any I/O. Sampling stops and the media
    /// session is released before the request goes out. On failure the
    /// guard is released and the session returns to monitoring with its
    /// clock and log intact; a failed timeout submission is retried after
    /// `submission.auto_submit_retry_secs`.
    pub async fn submit(&mut self, trigger: SubmitTrigger) -> Result<SubmitOutcome> {
        self.require(
            "submit",
            &[
                SessionState::Monitoring,
                SessionState::Submitting,
                SessionState::Submitted,
            ],
        )?;
        let Some(ticket) = self.coordinator.begin(trigger) else {
            return Ok(SubmitOutcome::Ignored);
        };

        self.set_state(SessionState::Submitting);
        let payload = self.build_payload();
        self.stop_sampling();

        match self.coordinator.send(ticket, &payload).await {
            Ok(response) => {
                if let Err(e) = self.clock.clear() {
                    tracing::warn!(session = %self.id, error = %e, "Failed to clear persisted deadline");
                }
                self.integrity.release(self.clock.now());
                self.integrity.detach_preview();
                self.torn_down = true;
                self.set_state(SessionState::Submitted);

                if let Some(metrics) = &self.metrics {
                    metrics.record_submission(trigger, true);
                    metrics.session_ended();
                }
                self.events.publish(SessionEvent::Submitted(response.clone()));
                Ok(SubmitOutcome::Submitted(response))
            }
            Err(e) => {
                self.set_state(SessionState::Monitoring);
                if trigger == SubmitTrigger::AutoTimeout {
                    let retry_secs = i64::try_from(self.config.submission.auto_submit_retry_secs)
                        .unwrap_or(i64::MAX);
                    self.clock.rearm(chrono::Duration::seconds(retry_secs));
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_submission(trigger, false);
                }
                self.events.publish(SessionEvent::SubmissionFailed {
                    trigger,
                    reason: e.to_string(),
                });
                Err(ProctorError::NetworkSubmitFailure(e))
            }
        }
    }

    /// The body that `submit` would send right now
    pub fn build_payload(&self) -> SubmissionPayload {
        let proctoring_data = self.media.as_ref().map(|_| self.log.summary());
        SubmissionPayload::new(self.answers.clone(), self.integrity.flags(), proctoring_data)
    }

    /// Abandon the attempt without submitting; the persisted deadline is kept
    pub fn cancel(mut self) {
        tracing::info!(session = %self.id, state = %self.state, "Session cancelled");
        self.teardown();
    }

    fn on_violation(&mut self, record: ViolationRecord) {
        if let Some(metrics) = &self.metrics {
            metrics.record_violation(record.category);
        }
        self.events.publish(SessionEvent::ViolationRecorded(record));
    }

    /// Detect an ended track before sampling; true when monitoring just stopped
    fn check_device(&mut self) -> bool {
        let ended = self
            .media
            .as_ref()
            .is_some_and(|m| !m.is_released() && !m.is_live());
        if ended {
            self.handle_device_lost();
        }
        ended
    }

    fn handle_device_lost(&mut self) {
        if self.device_lost {
            return;
        }
        self.device_lost = true;
        self.stop_sampling();
        tracing::warn!(session = %self.id, "Media track ended; monitoring stopped");
        self.events.publish(SessionEvent::DeviceLost);
    }

    /// Stop both samplers, then release the media session
    fn stop_sampling(&mut self) {
        self.frame_sampler.stop();
        self.audio_sampler.stop();
        if let Some(media) = self.media.as_mut() {
            PermissionBroker::release(media);
        }
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.stop_sampling();
        self.integrity.release(self.clock.now());
        self.integrity.detach_preview();
        if self.state == SessionState::Monitoring {
            if let Some(metrics) = &self.metrics {
                metrics.session_ended();
            }
        }
        tracing::debug!(session = %self.id, "Session torn down");
    }
}

impl Drop for ExamSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
