//! Facial animation adapter.
//!
//! Spawns the animation renderer with the driving audio and source portrait.
//! The renderer writes its own timestamped output tree under a result
//! directory, so the adapter scans for the newest `.mp4` afterwards and
//! renames it to the store path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{ArtifactRef, GenerationError, Stage};

use super::{finish_artifact, probe_command, run_command, wrong_request, StageAdapter, StageRequest};

/// Animation stage adapter over a talking-head renderer CLI
pub struct FaceAnimator {
    binary: String,
    enhancer: Option<String>,
    still: bool,
    preprocess: String,
}

impl FaceAnimator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            enhancer: Some("gfpgan".to_string()),
            still: true,
            preprocess: "full".to_string(),
        }
    }

    pub fn with_enhancer(mut self, enhancer: Option<String>) -> Self {
        self.enhancer = enhancer;
        self
    }

    pub fn with_still(mut self, still: bool) -> Self {
        self.still = still;
        self
    }

    pub fn with_preprocess(mut self, preprocess: impl Into<String>) -> Self {
        self.preprocess = preprocess.into();
        self
    }

    /// The renderer's scratch tree, next to the final artifact
    fn render_dir(output: &Path) -> PathBuf {
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "render".to_string());
        output.with_file_name(format!("{}_render", stem))
    }

    /// Newest `.mp4` anywhere under the result tree
    fn newest_video(dir: &Path) -> Option<PathBuf> {
        let pattern = format!("{}/**/*.mp4", dir.display());
        let mut newest: Option<(PathBuf, std::time::SystemTime)> = None;

        for entry in glob::glob(&pattern).ok()?.flatten() {
            let Ok(metadata) = std::fs::metadata(&entry) else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            match &newest {
                Some((_, best)) if *best >= modified => {}
                _ => newest = Some((entry, modified)),
            }
        }

        newest.map(|(path, _)| path)
    }
}

#[async_trait]
impl StageAdapter for FaceAnimator {
    fn stage(&self) -> Stage {
        Stage::Animation
    }

    async fn generate(
        &self,
        request: &StageRequest,
        output: &Path,
        timeout: Duration,
    ) -> Result<ArtifactRef, GenerationError> {
        let (audio, image) = match request {
            StageRequest::Animation { audio, image } => (audio, image),
            other => return Err(wrong_request(Stage::Animation, other)),
        };

        // The animation stage must never run without both upstream artifacts.
        if !audio.is_usable() || !image.is_usable() {
            return Err(GenerationError::invalid_input(
                "animation requires both a usable audio and image artifact",
            ));
        }
        for upstream in [audio, image] {
            if tokio::fs::metadata(&upstream.path).await.is_err() {
                return Err(GenerationError::invalid_input(format!(
                    "upstream artifact missing on disk: {}",
                    upstream.path.display()
                )));
            }
        }

        let render_dir = Self::render_dir(output);
        tokio::fs::create_dir_all(&render_dir).await.map_err(|e| {
            GenerationError::model_failure(format!(
                "failed to create render directory {}: {}",
                render_dir.display(),
                e
            ))
        })?;

        debug!(
            audio = %audio.path.display(),
            image = %image.path.display(),
            render_dir = %render_dir.display(),
            "animating portrait"
        );

        let mut command = Command::new(&self.binary);
        command
            .arg("--driven-audio")
            .arg(&audio.path)
            .arg("--source-image")
            .arg(&image.path)
            .arg("--result-dir")
            .arg(&render_dir)
            .arg("--preprocess")
            .arg(&self.preprocess);
        if self.still {
            command.arg("--still");
        }
        if let Some(enhancer) = &self.enhancer {
            command.arg("--enhancer").arg(enhancer);
        }

        run_command(Stage::Animation, command, timeout).await?;

        let rendered = Self::newest_video(&render_dir).ok_or_else(|| {
            GenerationError::model_failure(format!(
                "renderer produced no video under {}",
                render_dir.display()
            ))
        })?;

        tokio::fs::rename(&rendered, output).await.map_err(|e| {
            GenerationError::model_failure(format!(
                "failed to move {} to {}: {}",
                rendered.display(),
                output.display(),
                e
            ))
        })?;

        if let Err(error) = tokio::fs::remove_dir_all(&render_dir).await {
            warn!(%error, dir = %render_dir.display(), "failed to clean render directory");
        }

        finish_artifact(Stage::Animation, output).await
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        probe_command(&self.binary).await
    }
}
