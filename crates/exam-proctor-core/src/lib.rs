//! Exam Proctor Core
//!
//! Integrity subsystem for timed, single-attempt exams taken under camera
//! and microphone monitoring. It covers:
//!
//! - **Media**: camera/microphone acquisition with release-exactly-once handles
//! - **Detection**: heuristic and landmark frame analysis with per-category debouncing
//! - **Clock**: a persisted absolute deadline that survives reloads
//! - **Integrity**: fullscreen, focus and input-lockdown enforcement
//! - **Submission**: a one-shot guarded submission with HTTP transport
//!
//! Detection is advisory. Violations are logged for instructor review and
//! never block the candidate.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use exam_proctor_core::{
//!     AttemptInfo, AttemptScope, ExamSession, HttpSubmissionClient, SessionRunner,
//!     SyntheticDevices, SyntheticStream,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let api = HttpSubmissionClient::builder()
//!     .base_url("https://exam.example.edu/api")
//!     .token("caller-supplied-token")
//!     .build()?;
//!
//! let session = ExamSession::builder(AttemptInfo::new(
//!     AttemptScope::new("quiz-42", "attempt-1"),
//!     30,
//!     "rev-7",
//! ))
//! .devices(Arc::new(SyntheticDevices::granting(SyntheticStream::blank(640, 480))))
//! .api(Arc::new(api))
//! .build()?;
//!
//! let (runner, handle) = SessionRunner::new(session);
//! let run = tokio::spawn(runner.run());
//! handle.answer("q1", "B").await?;
//! handle.submit().await?;
//! let outcome = run.await??;
//! println!("late: {}", outcome.is_late_submission());
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod integrity;
pub mod media;
pub mod metrics;
pub mod runner;
pub mod session;
pub mod store;
pub mod submission;
pub mod violation;

pub use clock::{Clock, ClockTick, DeadlineSource, ManualClock, MonotonicClock, SessionClock, StaleDeadline, SystemClock};
pub use config::ProctorConfig;
pub use detection::{
    AnalyzerKind, AudioAnomalyDetector, CapabilityProbe, ColorHeuristicAnalyzer, FrameAnalyzer,
    FrameObservation, HeuristicOnly, ThresholdCounter, ViolationDetector,
};
pub use error::{ConfigError, FrameError, ProctorError, Result};
pub use events::{SessionEvent, SessionEvents, SubscriptionId};
pub use integrity::{
    HeadlessPlatform, IntegrityFlags, IntegrityGuard, KeyChord, PlatformEvent,
    PlatformIntegrityAdapter, Warning, WarningKind,
};
pub use media::{
    AudioSpectrum, Frame, MediaConstraints, MediaDevices, MediaError, MediaSession, MediaStream,
    PermissionBroker, SyntheticDevices, SyntheticStream,
};
pub use metrics::ProctorMetrics;
pub use runner::{RunOutcome, SessionHandle, SessionRunner};
pub use session::{AttemptInfo, ExamSession, ExamSessionBuilder, SessionState, SubmitOutcome};
pub use store::{AttemptScope, KeyValueStore, MemoryStore, SledStore, StoreError};
pub use submission::{
    AnswerSheet, HttpSubmissionClient, SubmissionApi, SubmissionCoordinator, SubmissionPayload,
    SubmissionResponse, SubmitError, SubmitTrigger,
};
pub use violation::{ProctoringData, ViolationCategory, ViolationLog, ViolationRecord};
