//! `vizstream` command line: run a program against the debug backend, or
//! replay a captured stream offline.
//!
//! ## Exit Codes
//!
//! - 0: the session completed
//! - 1: the session failed (transport or backend error)
//! - 2: the session was cancelled (Ctrl-C)

mod render;

use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;
use vizstream_core::ConfigLoader;
use vizstream_core::DebugState;
use vizstream_core::FrameDecoder;
use vizstream_core::SessionController;
use vizstream_core::SessionPhase;
use vizstream_core::SessionSnapshot;
use vizstream_core::VizConfig;

pub use render::summary;

/// Exit codes for `vizstream` commands.
pub mod exit_codes {
    pub const COMPLETED: u8 = 0;
    pub const FAILED: u8 = 1;
    pub const CANCELLED: u8 = 2;
}

const DEFAULT_LOG_FILTER: &str = "warn";

/// Streams execution traces from the analysis backend and folds them into
/// visualization state.
#[derive(Debug, Parser)]
#[command(name = "vizstream", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a program to the backend and print the final state
    Run(RunArgs),

    /// Reduce a captured SSE transcript without a backend
    Replay(ReplayArgs),
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Source file to execute
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Text passed to the program's stdin
    #[arg(long, value_name = "TEXT", conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Read the program's stdin from a file
    #[arg(long, value_name = "PATH")]
    pub input_file: Option<PathBuf>,

    /// Override the configured backend URL
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,

    /// Print every snapshot as it arrives
    #[arg(long)]
    pub follow: bool,
}

#[derive(Debug, Parser)]
pub struct ReplayArgs {
    /// File holding the raw `text/event-stream` body
    #[arg(value_name = "TRANSCRIPT")]
    pub transcript: PathBuf,

    /// Output as JSON for automation
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub async fn run(self) -> Result<ExitCode> {
        let config = ConfigLoader::new()
            .load()
            .context("failed to load configuration")?;
        init_logging(config.log_filter.as_deref());

        match self.command {
            Command::Run(args) => run_session(args, config).await,
            Command::Replay(args) => run_replay(args, &config).await,
        }
    }
}

/// `RUST_LOG` wins over the configured filter. Logs go to stderr.
fn init_logging(configured: Option<&str>) {
    let fallback = configured.unwrap_or(DEFAULT_LOG_FILTER);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(fallback))
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_session(args: RunArgs, mut config: VizConfig) -> Result<ExitCode> {
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
        config.validate().context("invalid --base-url")?;
    }

    let source_code = read_text(&args.file).await?;
    let input = match (args.input, &args.input_file) {
        (Some(text), _) => text,
        (None, Some(path)) => read_text(path).await?,
        (None, None) => String::new(),
    };

    let mut controller =
        SessionController::from_config(&config).context("failed to create transport")?;
    let mut updates = controller.subscribe();
    let id = controller.start_debug_session(source_code, input);
    tracing::info!("streaming from {}", config.endpoint());

    let last = loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break controller.snapshot();
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.session_id != id {
                    continue;
                }
                if args.follow {
                    println!("{}", render::progress(&snapshot, args.json)?);
                }
                if snapshot.phase.is_terminal() {
                    break snapshot;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                controller.cancel_session();
            }
        }
    };

    print_final(&last, args.json)?;
    if let Some(error) = &last.error {
        eprintln!("error: {error}");
    }
    Ok(ExitCode::from(exit_code(last.phase)))
}

async fn run_replay(args: ReplayArgs, config: &VizConfig) -> Result<ExitCode> {
    let transcript = tokio::fs::read(&args.transcript)
        .await
        .with_context(|| format!("failed to read {}", args.transcript.display()))?;

    let snapshot = replay_transcript(&transcript, config);
    print_final(&snapshot, args.json)?;
    Ok(ExitCode::from(exit_codes::COMPLETED))
}

/// Folds a whole `text/event-stream` body into a completed snapshot. Frames
/// after `done` are not counted.
pub fn replay_transcript(transcript: &[u8], config: &VizConfig) -> SessionSnapshot {
    let options = config.reduce_options();
    let mut decoder = FrameDecoder::new();
    decoder.push(transcript);

    let mut decoded: Vec<_> = decoder.frames().collect();
    decoded.extend(decoder.finish());

    let mut state = DebugState::default();
    let mut events = 0;
    for event in &decoded {
        state.apply(event, options);
        events += 1;
        if state.is_complete() {
            break;
        }
    }

    SessionSnapshot {
        phase: SessionPhase::Completed,
        state,
        events,
        ..SessionSnapshot::default()
    }
}

fn exit_code(phase: SessionPhase) -> u8 {
    match phase {
        SessionPhase::Failed => exit_codes::FAILED,
        SessionPhase::Cancelled => exit_codes::CANCELLED,
        _ => exit_codes::COMPLETED,
    }
}

fn print_final(snapshot: &SessionSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    } else {
        print!("{}", render::summary(snapshot));
    }
    Ok(())
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    const TRANSCRIPT: &str = concat!(
        "data: {\"stage\": \"classification\", \"payload\": {\"type\": \"recursion\"}}\n\n",
        "data: {\"stage\": \"recursion\", \"payload\": {\"events\": [",
        "{\"event\": \"call\", \"func_name\": \"fib\", \"locals\": {\"n\": 2}},",
        "{\"event\": \"call\", \"func_name\": \"fib\", \"locals\": {\"n\": 1}},",
        "{\"event\": \"return\", \"return_value\": 1},",
        "{\"event\": \"return\", \"return_value\": 1}",
        "]}}\n\n",
        "data: {\"stage\": \"done\", \"payload\": null}\n\n",
        "data: {\"stage\": \"explanation\", \"payload\": \"late\"}"
    );

    #[test]
    fn replay_reduces_every_frame() {
        let snapshot = replay_transcript(TRANSCRIPT.as_bytes(), &VizConfig::default());

        assert_eq!(snapshot.phase, SessionPhase::Completed);
        assert_eq!(snapshot.events, 3);
        assert!(snapshot.state.is_complete());
        assert_eq!(snapshot.state.explanation, None);
        let tree = snapshot.state.recursion.unwrap().tree.unwrap();
        assert_eq!(tree.node_count(), 2);
        assert_eq!(tree.return_value, Some(serde_json::json!(1)));
    }

    #[test]
    fn replay_honours_unknown_stage_merging() {
        let transcript = concat!(
            "data: {\"stage\": \"heatmap\", \"payload\": {\"cells\": [1]}}\n\n",
            "data: {\"stage\": \"heatmap\", \"payload\": {\"cells\": [2]}}\n\n",
        );
        let config = VizConfig {
            merge_unknown_stages: true,
            ..VizConfig::default()
        };

        let snapshot = replay_transcript(transcript.as_bytes(), &config);
        assert_eq!(
            snapshot.state.extensions.get("heatmap"),
            Some(&serde_json::json!({"cells": [1, 2]}))
        );

        let ignored = replay_transcript(transcript.as_bytes(), &VizConfig::default());
        assert!(ignored.state.extensions.is_empty());
    }

    #[test]
    fn exit_code_follows_phase() {
        assert_eq!(exit_code(SessionPhase::Completed), exit_codes::COMPLETED);
        assert_eq!(exit_code(SessionPhase::Failed), exit_codes::FAILED);
        assert_eq!(exit_code(SessionPhase::Cancelled), exit_codes::CANCELLED);
    }

    #[test]
    fn input_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "vizstream",
            "run",
            "prog.py",
            "--input",
            "3",
            "--input-file",
            "in.txt",
        ]);
        assert!(parsed.is_err());
    }
}
