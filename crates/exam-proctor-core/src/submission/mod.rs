//! One-shot attempt submission
//!
//! A [`SubmissionGuard`] is set before any I/O and stays set after a
//! successful submission, so at most one payload is ever accepted per
//! attempt even when a manual submit races the timeout. A failed request
//! releases the guard so the attempt can be submitted again.

pub mod client;

pub use client::{HttpSubmissionClient, HttpSubmissionClientBuilder};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::integrity::IntegrityFlags;
use crate::store::AttemptScope;
use crate::violation::ProctoringData;

/// Errors from the submission endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The request never got a response
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("Server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// The response body could not be decoded
    #[error("Invalid response: {0}")]
    Parse(String),

    /// The client could not be constructed
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl SubmitError {
    /// Errors that a repeated request cannot fix
    pub fn is_permanent(&self) -> bool {
        match self {
            SubmitError::Server { status, .. } => (400..500).contains(status) && *status != 429,
            SubmitError::Parse(_) | SubmitError::Config(_) => true,
            SubmitError::Network(_) => false,
        }
    }
}

/// What started a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    Manual,
    AutoTimeout,
}

impl SubmitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitTrigger::Manual => "manual",
            SubmitTrigger::AutoTimeout => "auto_timeout",
        }
    }
}

impl fmt::Display for SubmitTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers keyed by question id
///
/// Starts empty and only changes through answer input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSheet {
    answers: BTreeMap<String, String>,
}

impl AnswerSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, question_id: impl Into<String>, answer: impl Into<String>) {
        self.answers.insert(question_id.into(), answer.into());
    }

    pub fn get(&self, question_id: &str) -> Option<&str> {
        self.answers.get(question_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

/// Request body sent to the submission endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub answers: AnswerSheet,
    pub tab_switch_count: u32,
    pub esc_count: u32,
    pub was_fullscreen: bool,
    /// Absent when the camera was never granted
    pub proctoring_data: Option<ProctoringData>,
}

impl SubmissionPayload {
    pub fn new(
        answers: AnswerSheet,
        flags: IntegrityFlags,
        proctoring_data: Option<ProctoringData>,
    ) -> Self {
        Self {
            answers,
            tab_switch_count: flags.tab_switch_count,
            esc_count: flags.esc_count,
            was_fullscreen: flags.is_fullscreen,
            proctoring_data,
        }
    }
}

/// Grading result returned by the endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub score: f64,
    pub correct_count: u32,
    pub total_questions: u32,
    #[serde(default)]
    pub show_results: bool,
    #[serde(default)]
    pub is_late_submission: bool,
}

/// The external submission endpoint
#[async_trait]
pub trait SubmissionApi: Send + Sync {
    async fn submit(
        &self,
        scope: &AttemptScope,
        payload: &SubmissionPayload,
    ) -> Result<SubmissionResponse, SubmitError>;
}

/// Shared flag allowing one submission at a time and none after success
#[derive(Debug, Clone, Default)]
pub struct SubmissionGuard {
    set: Arc<AtomicBool>,
}

impl SubmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the guard; false if it was already set
    pub fn try_acquire(&self) -> bool {
        self.set
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.set.store(false, Ordering::SeqCst);
    }
}

/// Permission to send one submission
///
/// Dropping the ticket without committing releases the guard.
#[derive(Debug)]
pub struct SubmissionTicket {
    guard: SubmissionGuard,
    trigger: SubmitTrigger,
    committed: bool,
}

impl SubmissionTicket {
    pub fn trigger(&self) -> SubmitTrigger {
        self.trigger
    }

    /// Keep the guard set for good
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for SubmissionTicket {
    fn drop(&mut self) {
        if !self.committed {
            self.guard.reset();
            tracing::debug!(trigger = %self.trigger, "Submission guard released");
        }
    }
}

/// Sends the attempt to the submission endpoint at most once
#[derive(Clone)]
pub struct SubmissionCoordinator {
    api: Arc<dyn SubmissionApi>,
    scope: AttemptScope,
    guard: SubmissionGuard,
}

impl fmt::Debug for SubmissionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionCoordinator")
            .field("scope", &self.scope)
            .field("guard", &self.guard)
            .finish()
    }
}

impl SubmissionCoordinator {
    pub fn new(api: Arc<dyn SubmissionApi>, scope: AttemptScope) -> Self {
        Self {
            api,
            scope,
            guard: SubmissionGuard::new(),
        }
    }

    /// True while a submission is in flight or after one succeeded
    pub fn is_guarded(&self) -> bool {
        self.guard.is_set()
    }

    /// Claim the guard; `None` when a submission already started
    pub fn begin(&self, trigger: SubmitTrigger) -> Option<SubmissionTicket> {
        if !self.guard.try_acquire() {
            tracing::debug!(%trigger, attempt = %self.scope, "Submission already in progress or done");
            return None;
        }
        tracing::info!(%trigger, attempt = %self.scope, "Submission started");
        Some(SubmissionTicket {
            guard: self.guard.clone(),
            trigger,
            committed: false,
        })
    }

    /// Send the payload; success keeps the guard set, failure releases it
    pub async fn send(
        &self,
        ticket: SubmissionTicket,
        payload: &SubmissionPayload,
    ) -> Result<SubmissionResponse, SubmitError> {
        match self.api.submit(&self.scope, payload).await {
            Ok(response) => {
                tracing::info!(
                    trigger = %ticket.trigger(),
                    attempt = %self.scope,
                    score = response.score,
                    late = response.is_late_submission,
                    "Attempt submitted"
                );
                ticket.commit();
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    trigger = %ticket.trigger(),
                    attempt = %self.scope,
                    error = %e,
                    "Attempt submission failed"
                );
                drop(ticket);
                Err(e)
            }
        }
    }

    /// Claim the guard and send; `None` when another submission holds it
    pub async fn submit(
        &self,
        trigger: SubmitTrigger,
        payload: &SubmissionPayload,
    ) -> Option<Result<SubmissionResponse, SubmitError>> {
        let ticket = self.begin(trigger)?;
        Some(self.send(ticket, payload).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SlowApi {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SubmissionApi for SlowApi {
        async fn submit(
            &self,
            _scope: &AttemptScope,
            _payload: &SubmissionPayload,
        ) -> Result<SubmissionResponse, SubmitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                return Err(SubmitError::Network("connection reset".to_string()));
            }
            Ok(SubmissionResponse {
                score: 80.0,
                correct_count: 4,
                total_questions: 5,
                show_results: true,
                is_late_submission: false,
            })
        }
    }

    fn payload() -> SubmissionPayload {
        SubmissionPayload::new(AnswerSheet::new(), IntegrityFlags::default(), None)
    }

    fn coordinator(fail: bool) -> (SubmissionCoordinator, Arc<SlowApi>) {
        let api = Arc::new(SlowApi {
            calls: AtomicUsize::new(0),
            fail,
        });
        (
            SubmissionCoordinator::new(api.clone(), AttemptScope::new("quiz", "attempt")),
            api,
        )
    }

    #[tokio::test]
    async fn test_concurrent_triggers_send_once() {
        let (coordinator, api) = coordinator(false);
        let payload = payload();

        let (manual, auto) = tokio::join!(
            coordinator.submit(SubmitTrigger::Manual, &payload),
            coordinator.submit(SubmitTrigger::AutoTimeout, &payload)
        );

        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(manual.is_some() ^ auto.is_some());
        assert!(coordinator.is_guarded());
        assert!(coordinator.submit(SubmitTrigger::Manual, &payload).await.is_none());
    }

    #[tokio::test]
    async fn test_failure_releases_guard() {
        let (coordinator, api) = coordinator(true);
        let result = coordinator.submit(SubmitTrigger::Manual, &payload()).await;

        assert!(matches!(result, Some(Err(SubmitError::Network(_)))));
        assert!(!coordinator.is_guarded());
        assert!(coordinator.begin(SubmitTrigger::Manual).is_some());
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_ticket_releases_guard() {
        let (coordinator, _) = coordinator(false);
        let ticket = coordinator.begin(SubmitTrigger::AutoTimeout).unwrap();
        assert!(coordinator.begin(SubmitTrigger::Manual).is_none());
        drop(ticket);
        assert!(!coordinator.is_guarded());
    }

    #[test]
    fn test_payload_wire_format() {
        let mut answers = AnswerSheet::new();
        answers.set("q1", "B");
        let flags = IntegrityFlags {
            tab_switch_count: 2,
            esc_count: 1,
            is_fullscreen: true,
        };

        let json = serde_json::to_value(SubmissionPayload::new(answers, flags, None)).unwrap();
        assert_eq!(json["answers"]["q1"], "B");
        assert_eq!(json["tabSwitchCount"], 2);
        assert_eq!(json["escCount"], 1);
        assert_eq!(json["wasFullscreen"], true);
        assert!(json["proctoringData"].is_null());
    }

    #[test]
    fn test_response_defaults() {
        let response: SubmissionResponse =
            serde_json::from_str(r#"{"score": 3, "correctCount": 3, "totalQuestions": 4}"#)
                .unwrap();
        assert!(!response.show_results);
        assert!(!response.is_late_submission);
    }

    #[test]
    fn test_permanent_errors() {
        assert!(SubmitError::Server {
            status: 400,
            message: String::new()
        }
        .is_permanent());
        assert!(!SubmitError::Server {
            status: 429,
            message: String::new()
        }
        .is_permanent());
        assert!(!SubmitError::Server {
            status: 503,
            message: String::new()
        }
        .is_permanent());
        assert!(!SubmitError::Network("timeout".into()).is_permanent());
    }
}
