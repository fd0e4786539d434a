//! Command-line interface for talkinghead.
//!
//! Provides commands for generating a talking-avatar video from text,
//! inspecting past runs, probing the stage backends, and cleaning old
//! artifacts. This is a local harness around the orchestrator; serving it
//! over HTTP/WebSocket is a gateway's job, not the CLI's.

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::core::{ArtifactStore, Orchestrator};
use crate::domain::{Run, RunOutcome, StageStatus};

/// talkinghead - Talking-avatar video pipeline orchestrator
#[derive(Parser, Debug)]
#[command(name = "talkinghead")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a talking-avatar video from text
    Generate {
        /// Text to render (reads from --input or stdin if not provided)
        text: Option<String>,

        /// Input file with the text
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Read text from stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Probe that all stage backends are invocable
    Doctor,

    /// Delete old artifacts, keeping the newest per stage
    Clean {
        /// How many artifacts to keep per stage (defaults to configuration)
        #[arg(short, long)]
        keep: Option<usize>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Generate { text, input, stdin } => generate(text, input, stdin).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Doctor => doctor().await,
            Commands::Clean { keep } => clean(keep).await,
            Commands::Config => show_config(),
        }
    }
}

/// Resolve the text to render from arguments, a file, or stdin
fn read_text(text: Option<String>, input: Option<PathBuf>, stdin: bool) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }

    if let Some(path) = input {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()));
    }

    if stdin {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        return Ok(buffer);
    }

    anyhow::bail!("No input provided. Pass the text, use --input <file>, or --stdin")
}

async fn generate(text: Option<String>, input: Option<PathBuf>, stdin: bool) -> Result<()> {
    let text = read_text(text, input, stdin)?;

    let orchestrator = Orchestrator::from_config()?;

    // Subscribe before starting so no early event is missed.
    let mut events = orchestrator.subscribe_all();

    let run_id = match orchestrator.start(text) {
        Ok(run_id) => run_id,
        Err(error) if error.is_caller_error() => {
            anyhow::bail!("Invalid request: {}", error.message)
        }
        Err(error) => anyhow::bail!("Failed to start run: {}", error),
    };

    println!("Run {}", run_id);

    while let Some(event) = events.next().await {
        if event.run_id != run_id {
            continue;
        }
        match event.status {
            StageStatus::Started => println!("  [{}] started", event.stage),
            StageStatus::Succeeded => {
                let took = event
                    .duration_ms
                    .map(|ms| format!(" ({} ms)", ms))
                    .unwrap_or_default();
                println!("  [{}] succeeded{}", event.stage, took);
            }
            StageStatus::Failed => {
                println!(
                    "  [{}] failed: {}",
                    event.stage,
                    event.detail.as_deref().unwrap_or("unknown error")
                );
            }
        }
        if event.is_terminal() {
            break;
        }
    }

    match orchestrator.await_result(run_id).await? {
        RunOutcome::Completed(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        RunOutcome::Failed(error) if error.is_caller_error() => {
            anyhow::bail!("Invalid request: {}", error.message)
        }
        RunOutcome::Failed(error) => anyhow::bail!("Generation failed: {}", error),
        RunOutcome::Cancelled => anyhow::bail!("Run was cancelled"),
    }
}

async fn show_status(run_id: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id).context("Invalid run ID (expected a UUID)")?;

    let orchestrator = Orchestrator::from_config()?;
    let run = orchestrator.status(run_id).await?;

    print_run(&run);
    Ok(())
}

async fn list_runs(limit: usize) -> Result<()> {
    let orchestrator = Orchestrator::from_config()?;
    let runs = orchestrator.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    for run in runs {
        let text: String = run.text.chars().take(40).collect();
        println!(
            "{}  {:?}  {}  {}",
            run.id,
            run.stage,
            run.submitted_at.format("%Y-%m-%d %H:%M:%S"),
            text
        );
    }

    Ok(())
}

async fn doctor() -> Result<()> {
    let orchestrator = Orchestrator::from_config()?;

    match orchestrator.health_check().await {
        Ok(()) => {
            println!("All stage backends are reachable");
            Ok(())
        }
        Err(error) => anyhow::bail!("{:#}", error),
    }
}

async fn clean(keep: Option<usize>) -> Result<()> {
    let cfg = crate::config::config()?;
    let keep = keep.unwrap_or(cfg.retention.keep_artifacts);

    let store = ArtifactStore::from_config()?;
    let removed = store.prune(keep).await?;

    println!("Removed {} artifact(s), kept the newest {} per stage", removed, keep);
    Ok(())
}

fn show_config() -> Result<()> {
    let config = crate::config::config()?;
    println!("{:#?}", config);
    Ok(())
}

fn print_run(run: &Run) {
    println!("Run:       {}", run.id);
    println!("State:     {:?}", run.stage);
    println!("Submitted: {}", run.submitted_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed_at) = run.completed_at {
        println!("Finished:  {}", completed_at.format("%Y-%m-%d %H:%M:%S"));
    }
    if !run.text.is_empty() {
        let text: String = run.text.chars().take(80).collect();
        println!("Text:      {}", text);
    }
    for (stage, artifact) in &run.artifacts {
        println!("  {}: {}", stage, artifact.path.display());
    }
    if let Some(error) = &run.error {
        println!("Error:     {}", error);
    }
}
