//! Append-only run journal with file-based persistence.
//!
//! Each run's lifecycle is recorded as newline-delimited JSON under
//! `<runs>/<run_id>/events.jsonl`. The journal is the observability record
//! for finished runs: the orchestrator writes it as events happen, and the
//! state of any past run can be rebuilt by replaying its records in order.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::RunRecord;

/// File-based journal for one run
pub struct RunJournal {
    run_dir: PathBuf,
    records_path: PathBuf,
}

impl RunJournal {
    /// Create the journal directory for a new run
    pub async fn create(base: &Path, run_id: Uuid) -> Result<Self> {
        let journal = Self::open(base, run_id);
        fs::create_dir_all(&journal.run_dir)
            .await
            .with_context(|| format!("failed to create run directory {}", journal.run_dir.display()))?;
        Ok(journal)
    }

    /// Reference an existing run's journal without touching the filesystem
    pub fn open(base: &Path, run_id: Uuid) -> Self {
        let run_dir = base.join(run_id.to_string());
        let records_path = run_dir.join("events.jsonl");
        Self {
            run_dir,
            records_path,
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    pub fn exists(&self) -> bool {
        self.records_path.exists()
    }

    /// Append a record to the log
    pub async fn append(&self, record: &RunRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.records_path)
            .await
            .with_context(|| {
                format!("failed to open journal {}", self.records_path.display())
            })?;

        let json = serde_json::to_string(record).context("failed to serialize record")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("failed to write record")?;
        file.flush().await.context("failed to flush record")?;

        Ok(())
    }

    /// Replay all records in order
    pub async fn replay(&self) -> Result<Vec<RunRecord>> {
        if !self.records_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.records_path)
            .await
            .with_context(|| format!("failed to open journal {}", self.records_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: RunRecord = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse record: {}", line))?;
            records.push(record);
        }

        Ok(records)
    }

    /// List all run ids journaled under a base directory
    pub async fn list_runs(base: &Path) -> Result<Vec<Uuid>> {
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(base)
            .await
            .with_context(|| format!("failed to read {}", base.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}
