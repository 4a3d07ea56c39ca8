//! Timer-driven session loop
//!
//! A single task owns the [`ExamSession`] and multiplexes the video, audio
//! and clock intervals with commands from a [`SessionHandle`]. Ticks never
//! overlap, and a submission in flight holds the loop until it completes.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::error::{ProctorError, Result};
use crate::integrity::PlatformEvent;
use crate::session::{ExamSession, SessionState, SubmitOutcome};
use crate::submission::{SubmissionResponse, SubmitTrigger};

const COMMAND_BUFFER: usize = 64;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Submitted {
        trigger: SubmitTrigger,
        response: SubmissionResponse,
    },
    Cancelled,
}

impl RunOutcome {
    pub fn is_late_submission(&self) -> bool {
        matches!(self, RunOutcome::Submitted { response, .. } if response.is_late_submission)
    }

    pub fn show_results(&self) -> bool {
        matches!(self, RunOutcome::Submitted { response, .. } if response.show_results)
    }
}

enum SessionCommand {
    Answer { question_id: String, answer: String },
    Navigate(usize),
    Submit(oneshot::Sender<Result<SubmitOutcome>>),
    Platform(PlatformEvent),
    DeviceEnded,
    Cancel,
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCommand::Answer { question_id, .. } => write!(f, "Answer({})", question_id),
            SessionCommand::Navigate(index) => write!(f, "Navigate({})", index),
            SessionCommand::Submit(_) => write!(f, "Submit"),
            SessionCommand::Platform(event) => write!(f, "Platform({:?})", event),
            SessionCommand::DeviceEnded => write!(f, "DeviceEnded"),
            SessionCommand::Cancel => write!(f, "Cancel"),
        }
    }
}

/// Sends input to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ProctorError::SessionClosed)
    }

    pub async fn answer(
        &self,
        question_id: impl Into<String>,
        answer: impl Into<String>,
    ) -> Result<()> {
        self.send(SessionCommand::Answer {
            question_id: question_id.into(),
            answer: answer.into(),
        })
        .await
    }

    pub async fn navigate(&self, question_index: usize) -> Result<()> {
        self.send(SessionCommand::Navigate(question_index)).await
    }

    pub async fn platform_event(&self, event: PlatformEvent) -> Result<()> {
        self.send(SessionCommand::Platform(event)).await
    }

    pub async fn device_ended(&self) -> Result<()> {
        self.send(SessionCommand::DeviceEnded).await
    }

    pub async fn cancel(&self) -> Result<()> {
        self.send(SessionCommand::Cancel).await
    }

    /// Manually submit and wait for the result
    pub async fn submit(&self) -> Result<SubmitOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Submit(reply)).await?;
        rx.await.map_err(|_| ProctorError::SessionClosed)?
    }
}

/// Owns a session and drives its periodic tasks
pub struct SessionRunner {
    session: ExamSession,
    commands: mpsc::Receiver<SessionCommand>,
}

impl SessionRunner {
    pub fn new(session: ExamSession) -> (Self, SessionHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        (Self { session, commands }, SessionHandle { tx })
    }

    pub fn session(&self) -> &ExamSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ExamSession {
        &mut self.session
    }

    /// Start the session if needed and run until it is submitted or cancelled
    ///
    /// Media errors from the start are returned and end the run. Dropping
    /// every handle counts as a cancel.
    pub async fn run(mut self) -> Result<RunOutcome> {
        if self.session.state() == SessionState::AwaitingPermission {
            self.session.start().await?;
        }

        let outcome = self.drive().await;
        // Intervals are gone once `drive` returns; release the rest
        if outcome == RunOutcome::Cancelled {
            self.session.cancel();
        }
        tracing::info!(outcome = ?outcome, "Session run finished");
        Ok(outcome)
    }

    async fn drive(&mut self) -> RunOutcome {
        let sampling = self.session.config().sampling.clone();
        let mut video = periodic(sampling.video_interval());
        let mut audio = periodic(sampling.audio_interval());
        let mut clock = periodic(sampling.clock_interval());

        loop {
            tokio::select! {
                _ = video.tick() => {
                    self.session.on_video_tick();
                }
                _ = audio.tick() => {
                    self.session.on_audio_tick();
                }
                _ = clock.tick() => {
                    match self.session.on_clock_tick().await {
                        Some(Ok(SubmitOutcome::Submitted(response))) => {
                            return RunOutcome::Submitted {
                                trigger: SubmitTrigger::AutoTimeout,
                                response,
                            };
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Automatic submission failed; will retry");
                        }
                        Some(Ok(SubmitOutcome::Ignored)) | None => {}
                    }
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("All session handles dropped");
                        return RunOutcome::Cancelled;
                    };
                    if let Some(outcome) = self.apply(command).await {
                        return outcome;
                    }
                }
            }
        }
    }

    async fn apply(&mut self, command: SessionCommand) -> Option<RunOutcome> {
        tracing::trace!(command = ?command, "Session command");
        match command {
            SessionCommand::Answer {
                question_id,
                answer,
            } => {
                if let Err(e) = self.session.set_answer(question_id, answer) {
                    tracing::warn!(error = %e, "Answer rejected");
                }
            }
            SessionCommand::Navigate(index) => {
                if let Err(e) = self.session.navigate(index) {
                    tracing::warn!(error = %e, "Navigation rejected");
                }
            }
            SessionCommand::Platform(event) => {
                self.session.handle_platform_event(&event);
            }
            SessionCommand::DeviceEnded => self.session.device_ended(),
            SessionCommand::Cancel => return Some(RunOutcome::Cancelled),
            SessionCommand::Submit(reply) => {
                let result = self.session.submit(SubmitTrigger::Manual).await;
                let submitted = match &result {
                    Ok(SubmitOutcome::Submitted(response)) => Some(response.clone()),
                    _ => None,
                };
                // The caller may have stopped waiting
                let _ = reply.send(result);
                if let Some(response) = submitted {
                    return Some(RunOutcome::Submitted {
                        trigger: SubmitTrigger::Manual,
                        response,
                    });
                }
            }
        }
        None
    }
}

/// An interval whose first tick is one period from now
fn periodic(period: std::time::Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::media::{SyntheticDevices, SyntheticStream};
    use crate::session::AttemptInfo;
    use crate::store::AttemptScope;
    use crate::submission::{SubmissionApi, SubmissionPayload, SubmitError};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[derive(Debug)]
    struct LateApi;

    #[async_trait]
    impl SubmissionApi for LateApi {
        async fn submit(
            &self,
            _scope: &AttemptScope,
            _payload: &SubmissionPayload,
        ) -> std::result::Result<SubmissionResponse, SubmitError> {
            Ok(SubmissionResponse {
                score: 50.0,
                correct_count: 1,
                total_questions: 2,
                show_results: true,
                is_late_submission: true,
            })
        }
    }

    fn create_test_runner(stream: &SyntheticStream) -> (SessionRunner, SessionHandle) {
        let session = ExamSession::builder(AttemptInfo::new(AttemptScope::new("q", "a"), 5, "v1"))
            .devices(Arc::new(SyntheticDevices::granting(stream.clone())))
            .api(Arc::new(LateApi))
            .clock(Arc::new(MonotonicClock::new()))
            .build()
            .unwrap();
        SessionRunner::new(session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handles_cancel_the_run() {
        let stream = SyntheticStream::blank(32, 24);
        let (runner, handle) = create_test_runner(&stream);
        drop(handle);

        assert_eq!(runner.run().await.unwrap(), RunOutcome::Cancelled);
        assert_eq!(stream.stop_counter().load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_closed_session() {
        let stream = SyntheticStream::blank(32, 24);
        let (runner, handle) = create_test_runner(&stream);
        let run = tokio::spawn(runner.run());

        let outcome = handle.submit().await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Submitted(_)));

        let run_outcome = run.await.unwrap().unwrap();
        assert!(run_outcome.is_late_submission());
        assert!(run_outcome.show_results());

        assert!(matches!(
            handle.answer("q1", "A").await,
            Err(ProctorError::SessionClosed)
        ));
    }

    #[test]
    fn test_cancelled_outcome_flags() {
        assert!(!RunOutcome::Cancelled.is_late_submission());
        assert!(!RunOutcome::Cancelled.show_results());
    }
}
