//! Exam Proctor CLI
//!
//! Command-line tools around the exam proctoring core.
//!
//! # Usage
//!
//! ```bash
//! # Classify a captured frame
//! exam-proctor analyze --input frame.rgba --width 640 --height 480
//!
//! # Inspect or clear the persisted deadline of an attempt
//! exam-proctor deadline --store ./proctor.db --assignment quiz-1 --attempt a1
//! exam-proctor clear --store ./proctor.db --assignment quiz-1 --attempt a1
//!
//! # Simulate a one-minute session that is hidden after 10 s
//! exam-proctor simulate --assignment quiz-1 --attempt a1 --hide-after 10 --events
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Submission failed
//! - 2: Session cancelled before submission
//! - 3: Invalid input or arguments
//! - 4: File or store not found or inaccessible
//! - 5: Camera or microphone unavailable
//! - 10: Internal error

mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use commands::{ExitCode, ProctorCli};

fn init_tracing(verbose: u8, json: bool) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = ProctorCli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let exit_code = match commands::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from_error(&e)
        }
    };
    std::process::exit(exit_code.into());
}
