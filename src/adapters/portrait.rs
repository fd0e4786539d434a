//! Avatar portrait adapter.
//!
//! Spawns a diffusion image command with the style descriptor's prompt and
//! a deterministic seed, then verifies the output file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::{ArtifactRef, GenerationError, Stage};

use super::{finish_artifact, probe_command, run_command, wrong_request, StageAdapter, StageRequest};

/// Portrait stage adapter over a diffusion CLI
pub struct PortraitGenerator {
    binary: String,
}

impl PortraitGenerator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl StageAdapter for PortraitGenerator {
    fn stage(&self) -> Stage {
        Stage::Image
    }

    async fn generate(
        &self,
        request: &StageRequest,
        output: &Path,
        timeout: Duration,
    ) -> Result<ArtifactRef, GenerationError> {
        let style = match request {
            StageRequest::Portrait { style } => style,
            other => return Err(wrong_request(Stage::Image, other)),
        };

        debug!(
            fingerprint = %style.fingerprint(),
            seed = style.seed(),
            size = style.size,
            "generating portrait"
        );

        let mut command = Command::new(&self.binary);
        command
            .arg("--prompt")
            .arg(&style.prompt)
            .arg("--seed")
            .arg(style.seed().to_string())
            .arg("--steps")
            .arg(style.steps.to_string())
            .arg("--width")
            .arg(style.size.to_string())
            .arg("--height")
            .arg(style.size.to_string())
            .arg("--output")
            .arg(output);

        run_command(Stage::Image, command, timeout).await?;
        finish_artifact(Stage::Image, output).await
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        probe_command(&self.binary).await
    }
}
