//! Filesystem conventions for generated artifacts.
//!
//! One subdirectory per stage, one file per stage per run, named from the
//! run id and a UTC timestamp. Run ids partition the path space, so
//! concurrent runs never overwrite each other's files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::fs;
use uuid::Uuid;

use crate::domain::{ArtifactKind, Stage};

/// All three stage directories
const STAGES: [Stage; 3] = [Stage::Audio, Stage::Image, Stage::Animation];

/// Artifact path conventions rooted at one directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build a store rooted at the configured artifacts directory
    pub fn from_config() -> Result<Self> {
        Ok(Self::new(crate::config::artifacts_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one stage's artifacts, named after the media kind
    /// it produces (`audio/`, `image/`, `video/`)
    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(ArtifactKind::for_stage(stage).as_str())
    }

    /// Create the stage directories
    pub async fn prepare(&self) -> Result<()> {
        for stage in STAGES {
            let dir = self.stage_dir(stage);
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create artifact directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Unique output path for (run id, stage). Stable for the run's lifetime
    /// and never reused across runs, since run ids are never reused.
    pub fn artifact_path(&self, run_id: Uuid, stage: Stage) -> PathBuf {
        let kind = ArtifactKind::for_stage(stage);
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        self.stage_dir(stage)
            .join(format!("{}_{}.{}", run_id, stamp, kind.extension()))
    }

    /// Delete all but the newest `keep` files in each stage directory.
    /// Returns the number of files removed.
    pub async fn prune(&self, keep: usize) -> Result<usize> {
        let mut removed = 0;

        for stage in STAGES {
            let dir = self.stage_dir(stage);
            if !dir.exists() {
                continue;
            }

            let mut files = Vec::new();
            let mut entries = fs::read_dir(&dir)
                .await
                .with_context(|| format!("failed to read {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_file() {
                    files.push((entry.path(), metadata.modified()?));
                }
            }

            // Newest first; everything past `keep` goes.
            files.sort_by(|a, b| b.1.cmp(&a.1));
            for (path, _) in files.into_iter().skip(keep) {
                fs::remove_file(&path)
                    .await
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}
