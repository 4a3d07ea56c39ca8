//! CLI command definitions and handlers
//!
//! Provides Clap-based commands for analyzing captured frames, inspecting
//! and clearing persisted deadlines, and running a simulated session.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use exam_proctor_core::clock::keys;
use exam_proctor_core::{
    AttemptInfo, AttemptScope, ColorHeuristicAnalyzer, ConfigError, ExamSession, Frame,
    FrameAnalyzer, FrameError, HttpSubmissionClient, KeyValueStore, MemoryStore, MonotonicClock,
    PlatformEvent, ProctorConfig, ProctorError, ProctorMetrics, RunOutcome, SessionHandle,
    SessionRunner, SledStore, SubmissionApi, SubmissionPayload, SubmissionResponse, SubmitError,
    SyntheticDevices, SyntheticStream,
};

/// Exit codes for CLI operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Command completed; a simulated session was submitted
    Success = 0,
    /// The submission request failed
    SubmissionFailed = 1,
    /// A simulated session ended without submitting
    Cancelled = 2,
    /// Invalid input or arguments
    InvalidInput = 3,
    /// File or store not found or inaccessible
    FileError = 4,
    /// Camera or microphone could not be acquired
    MediaUnavailable = 5,
    /// Internal error
    InternalError = 10,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Map a command failure onto an exit code
    pub fn from_error(error: &anyhow::Error) -> Self {
        if let Some(e) = error.downcast_ref::<ProctorError>() {
            return match e {
                ProctorError::Media(_) => ExitCode::MediaUnavailable,
                ProctorError::NetworkSubmitFailure(_) => ExitCode::SubmissionFailed,
                ProctorError::Store(_) => ExitCode::FileError,
                ProctorError::Frame(_) | ProctorError::Config(_) => ExitCode::InvalidInput,
                _ => ExitCode::InternalError,
            };
        }
        if error.downcast_ref::<std::io::Error>().is_some() {
            ExitCode::FileError
        } else if error.downcast_ref::<FrameError>().is_some()
            || error.downcast_ref::<ConfigError>().is_some()
        {
            ExitCode::InvalidInput
        } else if error.downcast_ref::<SubmitError>().is_some() {
            ExitCode::SubmissionFailed
        } else {
            ExitCode::InternalError
        }
    }
}

/// Exam Proctor CLI
///
/// Analyze camera frames, inspect persisted exam deadlines and simulate
/// proctored sessions.
#[derive(Parser, Debug)]
#[command(name = "exam-proctor")]
#[command(about = "Exam Proctor - Analyze frames, inspect deadlines and simulate sessions", long_about = None)]
#[command(version)]
pub struct ProctorCli {
    /// Output verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "EXAM_PROCTOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ProctorCommands,
}

/// Identifies one attempt
#[derive(Args, Debug, Clone)]
pub struct AttemptArgs {
    /// Assignment identifier
    #[arg(long)]
    pub assignment: String,

    /// Attempt identifier
    #[arg(long)]
    pub attempt: String,
}

impl AttemptArgs {
    pub fn scope(&self) -> AttemptScope {
        AttemptScope::new(&self.assignment, &self.attempt)
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum ProctorCommands {
    /// Run the color heuristic analyzer over one raw RGBA frame
    Analyze {
        /// Raw RGBA file, 4 bytes per pixel, row-major
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,
    },

    /// Show the persisted deadline record for an attempt
    Deadline {
        /// Path to the sled store directory
        #[arg(long)]
        store: PathBuf,

        #[command(flatten)]
        attempt: AttemptArgs,
    },

    /// Remove the persisted deadline record for an attempt
    Clear {
        /// Path to the sled store directory
        #[arg(long)]
        store: PathBuf,

        #[command(flatten)]
        attempt: AttemptArgs,
    },

    /// Run a proctored session against a synthetic camera
    ///
    /// Without --submit-url the submission body is printed instead of sent.
    Simulate {
        #[command(flatten)]
        attempt: AttemptArgs,

        /// Time limit in minutes
        #[arg(long, default_value_t = 1)]
        time_limit: u32,

        /// Content version marker of the assignment
        #[arg(long, default_value = "v1")]
        content_version: String,

        /// Path to a sled store; an in-memory store is used when absent
        #[arg(long)]
        store: Option<PathBuf>,

        /// Submission endpoint base URL
        #[arg(long)]
        submit_url: Option<String>,

        /// Bearer token for the submission endpoint
        #[arg(long, env = "EXAM_PROCTOR_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Answer to record, as QUESTION=ANSWER (repeatable)
        #[arg(long = "answer", value_parser = parse_answer)]
        answers: Vec<(String, String)>,

        /// Submit manually this many seconds after start
        #[arg(long)]
        submit_after: Option<u64>,

        /// Hide the exam window this many seconds after start
        #[arg(long)]
        hide_after: Option<u64>,

        /// Raw RGBA frame shown by the synthetic camera
        #[arg(long, requires_all = ["width", "height"])]
        frame: Option<PathBuf>,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        /// Print session events as JSON lines
        #[arg(long)]
        events: bool,

        /// Print Prometheus metrics when the run ends
        #[arg(long)]
        metrics: bool,
    },
}

/// Parse a `QUESTION=ANSWER` pair
pub fn parse_answer(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((question, answer)) if !question.is_empty() => {
            Ok((question.to_string(), answer.to_string()))
        }
        _ => Err(format!("Expected QUESTION=ANSWER, got '{}'", s)),
    }
}

/// Run the CLI with the given arguments and return the exit code
pub async fn run(cli: ProctorCli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        ProctorCommands::Analyze {
            input,
            width,
            height,
        } => execute_analyze(&config, &input, width, height),
        ProctorCommands::Deadline { store, attempt } => execute_deadline(&store, &attempt.scope()),
        ProctorCommands::Clear { store, attempt } => execute_clear(&store, &attempt.scope()),
        ProctorCommands::Simulate {
            attempt,
            time_limit,
            content_version,
            store,
            submit_url,
            token,
            answers,
            submit_after,
            hide_after,
            frame,
            width,
            height,
            events,
            metrics,
        } => {
            let frame = match (frame, width, height) {
                (Some(path), Some(width), Some(height)) => Some(read_frame(&path, width, height)?),
                _ => None,
            };
            let options = SimulateOptions {
                info: AttemptInfo::new(attempt.scope(), time_limit, content_version),
                store,
                submit_url,
                token,
                answers,
                submit_after,
                hide_after,
                frame,
                events,
                metrics,
            };
            execute_simulate(config, options).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ProctorConfig> {
    let config = match path {
        Some(path) => ProctorConfig::from_file(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?,
        None => ProctorConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn read_frame(path: &Path, width: u32, height: u32) -> Result<Frame> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read frame file '{}'", path.display()))?;
    let frame = Frame::from_rgba(width, height, bytes)
        .with_context(|| format!("'{}' is not a {}x{} RGBA frame", path.display(), width, height))?;
    Ok(frame)
}

/// Execute the analyze command
pub fn execute_analyze(
    config: &ProctorConfig,
    input: &Path,
    width: u32,
    height: u32,
) -> Result<ExitCode> {
    let frame = read_frame(input, width, height)?;
    let mut analyzer = ColorHeuristicAnalyzer::new(config.heuristic.clone());
    let observation = analyzer.analyze(&frame);
    println!("{}", serde_json::to_string_pretty(&observation)?);
    Ok(ExitCode::Success)
}

/// Read the persisted deadline record for a scope
pub fn deadline_record(
    store: &dyn KeyValueStore,
    scope: &AttemptScope,
    now: DateTime<Utc>,
) -> Result<serde_json::Value> {
    let mut record = serde_json::Map::new();
    record.insert("scope".to_string(), scope.to_string().into());
    for key in keys::ALL {
        let value = store
            .get(&scope.key(key))?
            .map(serde_json::Value::String)
            .unwrap_or(serde_json::Value::Null);
        record.insert(key.to_string(), value);
    }

    let deadline = store
        .get(&scope.key(keys::DEADLINE_EPOCH_MS))?
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis);
    let remaining = deadline
        .map(|deadline| (deadline - now).num_seconds().max(0))
        .map(serde_json::Value::from)
        .unwrap_or(serde_json::Value::Null);
    record.insert("remainingSeconds".to_string(), remaining);

    Ok(serde_json::Value::Object(record))
}

/// Execute the deadline command
pub fn execute_deadline(path: &Path, scope: &AttemptScope) -> Result<ExitCode> {
    let store = SledStore::open(path)
        .with_context(|| format!("Failed to open store '{}'", path.display()))?;
    let record = deadline_record(&store, scope, Utc::now())?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(ExitCode::Success)
}

/// Execute the clear command
pub fn execute_clear(path: &Path, scope: &AttemptScope) -> Result<ExitCode> {
    let store = SledStore::open(path)
        .with_context(|| format!("Failed to open store '{}'", path.display()))?;
    for key in keys::ALL {
        store.remove(&scope.key(key))?;
    }
    store.flush()?;
    println!("Cleared deadline for {}", scope);
    Ok(ExitCode::Success)
}

/// Inputs for a simulated session
#[derive(Debug)]
pub struct SimulateOptions {
    pub info: AttemptInfo,
    pub store: Option<PathBuf>,
    pub submit_url: Option<String>,
    pub token: Option<String>,
    pub answers: Vec<(String, String)>,
    pub submit_after: Option<u64>,
    pub hide_after: Option<u64>,
    pub frame: Option<Frame>,
    pub events: bool,
    pub metrics: bool,
}

/// Submission endpoint that prints the request body
#[derive(Debug, Default)]
pub struct DryRunApi;

#[async_trait]
impl SubmissionApi for DryRunApi {
    async fn submit(
        &self,
        scope: &AttemptScope,
        payload: &SubmissionPayload,
    ) -> std::result::Result<SubmissionResponse, SubmitError> {
        let body = serde_json::to_string_pretty(payload)
            .map_err(|e| SubmitError::Parse(e.to_string()))?;
        println!("POST submit {}\n{}", scope, body);
        Ok(SubmissionResponse {
            score: 0.0,
            correct_count: 0,
            total_questions: payload.answers.len() as u32,
            show_results: false,
            is_late_submission: false,
        })
    }
}

/// Execute the simulate command
pub async fn execute_simulate(config: ProctorConfig, options: SimulateOptions) -> Result<ExitCode> {
    let stream = match options.frame {
        Some(frame) => SyntheticStream::new(frame),
        None => SyntheticStream::blank(640, 480),
    };

    let api: Arc<dyn SubmissionApi> = match &options.submit_url {
        Some(url) => {
            let mut submission = config.submission.clone();
            submission.base_url = url.clone();
            let client = HttpSubmissionClient::with_config(submission)?;
            match &options.token {
                Some(token) => Arc::new(client.with_token(token)),
                None => Arc::new(client),
            }
        }
        None => Arc::new(DryRunApi),
    };

    let store: Arc<dyn KeyValueStore> = match &options.store {
        Some(path) => Arc::new(
            SledStore::open(path)
                .with_context(|| format!("Failed to open store '{}'", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let metrics = ProctorMetrics::new()?;
    let mut session = ExamSession::builder(options.info)
        .config(config)
        .devices(Arc::new(SyntheticDevices::granting(stream)))
        .api(api)
        .store(store)
        .clock(Arc::new(MonotonicClock::new()))
        .metrics(metrics.clone())
        .build()?;

    let printer = if options.events {
        let (_, mut events) = session.subscribe();
        Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode session event"),
                }
            }
        }))
    } else {
        None
    };

    let (runner, handle) = SessionRunner::new(session);
    let run = tokio::spawn(runner.run());

    let interrupt = handle.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted; cancelling session");
            let _ = interrupt.cancel().await;
        }
    });

    let script = tokio::spawn(drive_simulation(
        handle.clone(),
        options.answers,
        options.hide_after,
        options.submit_after,
    ));

    let outcome = run.await.context("Session task failed")??;
    script.abort();
    ctrl_c.abort();
    drop(handle);
    if let Some(printer) = printer {
        // Ends once the session and its subscribers are dropped
        let _ = printer.await;
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if options.metrics {
        print!("{}", metrics.encode_text()?);
    }

    Ok(match outcome {
        RunOutcome::Submitted { .. } => ExitCode::Success,
        RunOutcome::Cancelled => ExitCode::Cancelled,
    })
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Hide,
    Submit,
}

/// Feed scripted candidate input to a running session
async fn drive_simulation(
    handle: SessionHandle,
    answers: Vec<(String, String)>,
    hide_after: Option<u64>,
    submit_after: Option<u64>,
) -> Result<()> {
    let start = Instant::now();
    for (question, answer) in answers {
        handle.answer(question, answer).await?;
    }

    let mut steps: Vec<(u64, Step)> = hide_after
        .map(|secs| (secs, Step::Hide))
        .into_iter()
        .chain(submit_after.map(|secs| (secs, Step::Submit)))
        .collect();
    steps.sort_by_key(|(secs, _)| *secs);

    for (secs, step) in steps {
        tokio::time::sleep_until(start + Duration::from_secs(secs)).await;
        match step {
            Step::Hide => {
                handle.platform_event(PlatformEvent::VisibilityHidden).await?;
                handle.platform_event(PlatformEvent::WindowBlurred).await?;
            }
            Step::Submit => match handle.submit().await {
                Ok(outcome) => tracing::info!(outcome = ?outcome, "Manual submission finished"),
                Err(e) => tracing::warn!(error = %e, "Manual submission failed"),
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_proctor_core::MediaError;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(i32::from(ExitCode::Success), 0);
        assert_eq!(i32::from(ExitCode::SubmissionFailed), 1);
        assert_eq!(i32::from(ExitCode::Cancelled), 2);
        assert_eq!(i32::from(ExitCode::InternalError), 10);
    }

    #[test]
    fn test_exit_code_from_error() {
        let media = anyhow::Error::new(ProctorError::Media(MediaError::PermissionDenied));
        assert_eq!(ExitCode::from_error(&media), ExitCode::MediaUnavailable);

        let network = anyhow::Error::new(ProctorError::NetworkSubmitFailure(
            SubmitError::Network("reset".to_string()),
        ));
        assert_eq!(ExitCode::from_error(&network), ExitCode::SubmissionFailed);

        let io = anyhow::Error::new(std::io::Error::from(std::io::ErrorKind::NotFound))
            .context("Failed to read frame file");
        assert_eq!(ExitCode::from_error(&io), ExitCode::FileError);

        assert_eq!(
            ExitCode::from_error(&anyhow::anyhow!("boom")),
            ExitCode::InternalError
        );
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(
            parse_answer("q1=B").unwrap(),
            ("q1".to_string(), "B".to_string())
        );
        assert_eq!(
            parse_answer("q2=a=b").unwrap(),
            ("q2".to_string(), "a=b".to_string())
        );
        assert!(parse_answer("q3").is_err());
        assert!(parse_answer("=B").is_err());
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = ProctorCli::try_parse_from([
            "exam-proctor",
            "simulate",
            "--assignment",
            "quiz-1",
            "--attempt",
            "a1",
            "--answer",
            "q1=A",
            "--submit-after",
            "5",
        ])
        .unwrap();

        match cli.command {
            ProctorCommands::Simulate {
                attempt,
                time_limit,
                answers,
                submit_after,
                ..
            } => {
                assert_eq!(attempt.scope(), AttemptScope::new("quiz-1", "a1"));
                assert_eq!(time_limit, 1);
                assert_eq!(answers.len(), 1);
                assert_eq!(submit_after, Some(5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_frame_requires_dimensions() {
        let result = ProctorCli::try_parse_from([
            "exam-proctor",
            "simulate",
            "--assignment",
            "q",
            "--attempt",
            "a",
            "--frame",
            "frame.rgba",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_deadline_record_reports_remaining() {
        let store = MemoryStore::new();
        let scope = AttemptScope::new("quiz-1", "a1");
        let now = Utc::now();
        let deadline = now + chrono::Duration::seconds(90);
        store
            .set(
                &scope.key(keys::DEADLINE_EPOCH_MS),
                &deadline.timestamp_millis().to_string(),
            )
            .unwrap();
        store.set(&scope.key(keys::TIME_LIMIT_MINUTES), "30").unwrap();

        let record = deadline_record(&store, &scope, now).unwrap();
        assert_eq!(record["scope"], "quiz-1/a1");
        assert_eq!(record["timeLimitMinutes"], "30");
        assert!(record["contentVersionMarker"].is_null());
        let remaining = record["remainingSeconds"].as_i64().unwrap();
        assert!((89..=90).contains(&remaining));
    }

    #[test]
    fn test_deadline_record_without_deadline() {
        let record = deadline_record(&MemoryStore::new(), &AttemptScope::new("q", "a"), Utc::now())
            .unwrap();
        assert!(record["remainingSeconds"].is_null());
        assert!(record["deadlineEpochMs"].is_null());
    }

    #[tokio::test]
    async fn test_dry_run_api_echoes_answer_count() {
        let mut answers = exam_proctor_core::AnswerSheet::new();
        answers.set("q1", "A");
        answers.set("q2", "B");
        let payload = SubmissionPayload::new(answers, Default::default(), None);

        let response = DryRunApi
            .submit(&AttemptScope::new("q", "a"), &payload)
            .await
            .unwrap();
        assert_eq!(response.total_questions, 2);
        assert!(!response.show_results);
    }
}
