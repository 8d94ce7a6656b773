#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// feedforward-cli/src/main.rs
// ============================================================================
// Module: FeedForward CLI Entry Point
// Description: Command dispatcher for starting, watching, stopping, and
//              reading back the results of pipeline runs.
// Purpose: The reference consumer of `PipelineOrchestrator`'s control plane.
// Dependencies: clap, feedforward-cli, feedforward-config, feedforward-core,
//               feedforward-pipeline, serde_json, thiserror, tokio, tracing.
// ============================================================================

//! ## Overview
//! Every subcommand loads configuration, wires up the live HTTP/SQLite
//! collaborators through [`feedforward_cli::collaborators::build_orchestrator`],
//! and calls exactly one [`PipelineOrchestrator`] method. `start` returns as
//! soon as the run is accepted; the run itself executes in the background,
//! so `status`/`stories`/`preview` are how a caller watches it finish.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::DateTime;
use chrono::Utc;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use feedforward_cli::collaborators::build_orchestrator;
use feedforward_config::PipelineConfig;
use feedforward_core::RunId;
use feedforward_core::Timestamp;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "feedforward", arg_required_else_help = true)]
struct Cli {
    /// Path to the pipeline config file (defaults to `feedforward.toml` or
    /// the `FEEDFORWARD_CONFIG` environment variable).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: RunCommand,
}

/// Run lifecycle subcommands.
#[derive(Subcommand, Debug)]
enum RunCommand {
    /// Starts a new run over conversations opened in `[since, until)`.
    Start(StartArgs),
    /// Reads back the current status of a run.
    Status(RunIdArgs),
    /// Requests cooperative cancellation of a running run.
    Stop(RunIdArgs),
    /// Lists every story created or appended-to during a run.
    Stories(RunIdArgs),
    /// Shows the cached dry-run previews produced for a run.
    Preview(RunIdArgs),
}

/// Arguments for `start`.
#[derive(Args, Debug)]
struct StartArgs {
    /// Start of the conversation open-date range, RFC 3339 (inclusive).
    #[arg(long)]
    since: DateTime<Utc>,
    /// End of the conversation open-date range, RFC 3339 (exclusive).
    #[arg(long)]
    until: DateTime<Utc>,
    /// Run the pipeline without persisting stories; cache previews instead.
    #[arg(long)]
    dry_run: bool,
    /// Persist stories automatically rather than holding them for review.
    #[arg(long)]
    auto_create_stories: bool,
}

/// Arguments shared by every run-scoped read/control subcommand.
#[derive(Args, Debug)]
struct RunIdArgs {
    /// The run's ID, as printed by `start`.
    run_id: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper surfaced to the process exit path.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration failed to load or validate.
    #[error("config error: {0}")]
    Config(#[from] feedforward_config::ConfigError),
    /// A collaborator failed to initialize.
    #[error("collaborator error: {0}")]
    Collaborator(#[from] feedforward_cli::collaborators::CollaboratorError),
    /// The orchestrator's control plane returned an error.
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] feedforward_pipeline::OrchestratorError),
    /// A supplied run ID was not a valid UUID.
    #[error("invalid run id {0:?}: {1}")]
    InvalidRunId(String, uuid::Error),
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            ExitCode::FAILURE
        }
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())?;
    let orchestrator = build_orchestrator(&config)?;
    orchestrator.recover_abandoned_runs().await?;

    match cli.command {
        RunCommand::Start(args) => command_start(&orchestrator, args).await,
        RunCommand::Status(args) => command_status(&orchestrator, args).await,
        RunCommand::Stop(args) => command_stop(&orchestrator, args).await,
        RunCommand::Stories(args) => command_stories(&orchestrator, args).await,
        RunCommand::Preview(args) => command_preview(&orchestrator, args),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes the `start` command.
async fn command_start(orchestrator: &feedforward_cli::collaborators::CliOrchestrator, args: StartArgs) -> CliResult<()> {
    let since = Timestamp::from_millis(args.since.timestamp_millis());
    let until = Timestamp::from_millis(args.until.timestamp_millis());
    let run_id = orchestrator.start_run(since, until, args.dry_run, args.auto_create_stories).await?;
    println!("{run_id}");
    Ok(())
}

/// Executes the `status` command.
async fn command_status(orchestrator: &feedforward_cli::collaborators::CliOrchestrator, args: RunIdArgs) -> CliResult<()> {
    let run_id = parse_run_id(&args.run_id)?;
    let run = orchestrator.get_run_status(run_id).await?;
    let rendered = serde_json::to_string_pretty(&run).unwrap_or_else(|_| format!("{run:?}"));
    println!("{rendered}");
    Ok(())
}

/// Executes the `stop` command.
async fn command_stop(orchestrator: &feedforward_cli::collaborators::CliOrchestrator, args: RunIdArgs) -> CliResult<()> {
    let run_id = parse_run_id(&args.run_id)?;
    orchestrator.stop_run(run_id).await?;
    Ok(())
}

/// Executes the `stories` command.
async fn command_stories(orchestrator: &feedforward_cli::collaborators::CliOrchestrator, args: RunIdArgs) -> CliResult<()> {
    let run_id = parse_run_id(&args.run_id)?;
    let stories = orchestrator.list_run_stories(run_id).await?;
    let rendered = serde_json::to_string_pretty(&stories).unwrap_or_else(|_| format!("{stories:?}"));
    println!("{rendered}");
    Ok(())
}

/// Executes the `preview` command.
fn command_preview(orchestrator: &feedforward_cli::collaborators::CliOrchestrator, args: RunIdArgs) -> CliResult<()> {
    let run_id = parse_run_id(&args.run_id)?;
    let previews = orchestrator.get_dry_run_preview(run_id);
    for preview in previews {
        println!("{} score={} conversations={}", preview.signature.as_str(), preview.confidence_score, preview.conversation_ids.len());
    }
    Ok(())
}

/// Parses a CLI-supplied run ID string into a [`RunId`].
fn parse_run_id(raw: &str) -> CliResult<RunId> {
    Uuid::parse_str(raw).map(RunId::from_uuid).map_err(|err| CliError::InvalidRunId(raw.to_string(), err))
}
