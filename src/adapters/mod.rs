//! Stage adapters wrapping the external generators.
//!
//! Each generator (speech synthesizer, portrait diffuser, face animator) is
//! presented as a single uniform operation. Adapters own the translation of
//! backend failure signals (spawn errors, non-zero exits, missing output
//! files, HTTP errors) into the three-kind [`GenerationError`] taxonomy, so
//! nothing backend-specific leaks past this boundary.

pub mod animator;
pub mod portrait;
pub mod speech;

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;

use crate::domain::{ArtifactKind, ArtifactRef, GenerationError, Stage};

// Re-export the concrete adapters
pub use animator::FaceAnimator;
pub use portrait::PortraitGenerator;
pub use speech::SpeechSynthesizer;

/// Structured input handed to a stage adapter
#[derive(Debug, Clone)]
pub enum StageRequest {
    /// Text to render as speech
    Speech { text: String },

    /// Style descriptor for the avatar portrait
    Portrait { style: StyleSpec },

    /// Upstream artifacts driving the facial animation
    Animation {
        audio: ArtifactRef,
        image: ArtifactRef,
    },
}

impl StageRequest {
    /// The stage this request is meant for
    pub fn stage(&self) -> Stage {
        match self {
            Self::Speech { .. } => Stage::Audio,
            Self::Portrait { .. } => Stage::Image,
            Self::Animation { .. } => Stage::Animation,
        }
    }
}

/// Style descriptor consumed by the portrait stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleSpec {
    /// Diffusion prompt describing the avatar
    pub prompt: String,

    /// Explicit seed; derived from the prompt when absent
    pub seed: Option<u64>,

    /// Inference steps
    pub steps: u32,

    /// Square output size in pixels
    pub size: u32,
}

impl Default for StyleSpec {
    fn default() -> Self {
        Self {
            prompt: "Front-facing portrait, smiling, clean background, photo-realistic"
                .to_string(),
            seed: None,
            steps: 30,
            size: 512,
        }
    }
}

impl StyleSpec {
    /// Effective seed: pinned, or derived from the prompt so identical
    /// styles reproduce the same face across runs.
    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            let digest = Sha256::digest(self.prompt.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            u64::from_be_bytes(bytes)
        })
    }

    /// Short hex fingerprint of the prompt, for logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.prompt.as_bytes());
        hex::encode(&digest[..8])
    }
}

/// Uniform contract over the external generators.
///
/// A successful call writes exactly one artifact file at `output` and
/// returns its reference; every failure is one of the three error kinds.
#[async_trait]
pub trait StageAdapter: Send + Sync {
    /// The stage this adapter serves
    fn stage(&self) -> Stage;

    /// Run the generator once
    async fn generate(
        &self,
        request: &StageRequest,
        output: &Path,
        timeout: Duration,
    ) -> Result<ArtifactRef, GenerationError>;

    /// Probe that the backend is invocable
    async fn health_check(&self) -> anyhow::Result<()>;
}

/// The three adapters a pipeline needs
#[derive(Clone)]
pub struct StageAdapters {
    pub speech: Arc<dyn StageAdapter>,
    pub portrait: Arc<dyn StageAdapter>,
    pub animation: Arc<dyn StageAdapter>,
}

impl StageAdapters {
    pub fn for_stage(&self, stage: Stage) -> &Arc<dyn StageAdapter> {
        match stage {
            Stage::Audio => &self.speech,
            Stage::Image => &self.portrait,
            Stage::Animation => &self.animation,
        }
    }
}

/// The request kind did not match the adapter
pub(crate) fn wrong_request(stage: Stage, request: &StageRequest) -> GenerationError {
    GenerationError::invalid_input(format!(
        "{} adapter received a {} request",
        stage,
        request.stage()
    ))
}

/// Spawn a backend command and wait for it under a deadline.
///
/// Children are spawned with kill-on-drop, so an abandoned stage (timeout,
/// sibling failure, cancellation) delivers a best-effort kill signal.
pub(crate) async fn run_command(
    stage: Stage,
    mut command: Command,
    timeout: Duration,
) -> Result<std::process::Output, GenerationError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        GenerationError::model_failure(format!("failed to spawn {} backend: {}", stage, e))
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            GenerationError::timeout(format!(
                "{} stage exceeded {}s",
                stage,
                timeout.as_secs()
            ))
        })?
        .map_err(|e| {
            GenerationError::model_failure(format!(
                "failed to wait for {} backend: {}",
                stage, e
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        return Err(GenerationError::model_failure(format!(
            "{} backend exited with code {}: {}",
            stage,
            exit_code,
            stderr.trim()
        )));
    }

    Ok(output)
}

/// Verify the backend actually produced a non-empty file and reference it
pub(crate) async fn finish_artifact(
    stage: Stage,
    path: &Path,
) -> Result<ArtifactRef, GenerationError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|_| {
        GenerationError::model_failure(format!(
            "{} backend produced no file at {}",
            stage,
            path.display()
        ))
    })?;

    if metadata.len() == 0 {
        return Err(GenerationError::model_failure(format!(
            "{} backend produced an empty file at {}",
            stage,
            path.display()
        )));
    }

    Ok(ArtifactRef::new(
        ArtifactKind::for_stage(stage),
        path.to_path_buf(),
        metadata.len(),
    ))
}

/// Health probe for command backends: spawn `<bin> --help` and expect it to run
pub(crate) async fn probe_command(binary: &str) -> anyhow::Result<()> {
    use anyhow::Context;

    let output = Command::new(binary)
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .with_context(|| format!("failed to run '{} --help'", binary))?;

    if !output.success() {
        anyhow::bail!("'{} --help' exited with {}", binary, output);
    }

    Ok(())
}
