//! Speech synthesis adapter.
//!
//! Two backends behind the same contract: spawning a local TTS command
//! (`<bin> --text <text> --output <path>`), or POSTing the text to a
//! synthesis service and writing the returned audio bytes.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::{ArtifactRef, GenerationError, Stage};

use super::{finish_artifact, probe_command, run_command, wrong_request, StageAdapter, StageRequest};

/// Where synthesized speech comes from
#[derive(Debug, Clone)]
enum SpeechBackend {
    /// Local TTS command
    Command { binary: String },

    /// Remote synthesis service returning audio bytes
    Http {
        endpoint: String,
        client: reqwest::Client,
    },
}

/// Speech stage adapter
pub struct SpeechSynthesizer {
    backend: SpeechBackend,
}

impl SpeechSynthesizer {
    /// Synthesize by spawning a local TTS command
    pub fn command(binary: impl Into<String>) -> Self {
        Self {
            backend: SpeechBackend::Command {
                binary: binary.into(),
            },
        }
    }

    /// Synthesize by POSTing to a remote service
    pub fn http(endpoint: impl Into<String>) -> Self {
        Self {
            backend: SpeechBackend::Http {
                endpoint: endpoint.into(),
                client: reqwest::Client::new(),
            },
        }
    }

    async fn synthesize_command(
        &self,
        binary: &str,
        text: &str,
        output: &Path,
        timeout: Duration,
    ) -> Result<(), GenerationError> {
        let mut command = Command::new(binary);
        command
            .arg("--text")
            .arg(text)
            .arg("--output")
            .arg(output);

        run_command(Stage::Audio, command, timeout).await?;
        Ok(())
    }

    async fn synthesize_http(
        &self,
        endpoint: &str,
        client: &reqwest::Client,
        text: &str,
        output: &Path,
        timeout: Duration,
    ) -> Result<(), GenerationError> {
        let request = async {
            let response = client
                .post(endpoint)
                .json(&serde_json::json!({ "text": text }))
                .send()
                .await
                .map_err(|e| {
                    GenerationError::model_failure(format!(
                        "speech service unreachable at {}: {}",
                        endpoint, e
                    ))
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(GenerationError::model_failure(format!(
                    "speech service returned {} for {}",
                    status, endpoint
                )));
            }

            response.bytes().await.map_err(|e| {
                GenerationError::model_failure(format!("speech service stream failed: {}", e))
            })
        };

        let bytes = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| {
                GenerationError::timeout(format!(
                    "audio stage exceeded {}s",
                    timeout.as_secs()
                ))
            })??;

        tokio::fs::write(output, &bytes).await.map_err(|e| {
            GenerationError::model_failure(format!(
                "failed to write audio to {}: {}",
                output.display(),
                e
            ))
        })?;

        Ok(())
    }
}

#[async_trait]
impl StageAdapter for SpeechSynthesizer {
    fn stage(&self) -> Stage {
        Stage::Audio
    }

    async fn generate(
        &self,
        request: &StageRequest,
        output: &Path,
        timeout: Duration,
    ) -> Result<ArtifactRef, GenerationError> {
        let text = match request {
            StageRequest::Speech { text } => text,
            other => return Err(wrong_request(Stage::Audio, other)),
        };

        debug!(chars = text.len(), output = %output.display(), "synthesizing speech");

        match &self.backend {
            SpeechBackend::Command { binary } => {
                self.synthesize_command(binary, text, output, timeout).await?
            }
            SpeechBackend::Http { endpoint, client } => {
                self.synthesize_http(endpoint, client, text, output, timeout)
                    .await?
            }
        }

        finish_artifact(Stage::Audio, output).await
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        match &self.backend {
            SpeechBackend::Command { binary } => probe_command(binary).await,
            SpeechBackend::Http { endpoint, client } => {
                let response = client
                    .get(endpoint)
                    .send()
                    .await
                    .with_context(|| format!("speech service unreachable at {}", endpoint))?;
                // Any response at all means the service is up; some endpoints
                // only accept POST.
                let _ = response.status();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StyleSpec;
    use crate::domain::ErrorKind;

    #[tokio::test]
    async fn test_rejects_foreign_request() {
        let adapter = SpeechSynthesizer::command("tts");
        let request = StageRequest::Portrait {
            style: StyleSpec::default(),
        };

        let error = adapter
            .generate(&request, Path::new("/tmp/out.wav"), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_missing_binary_is_model_failure() {
        let adapter = SpeechSynthesizer::command("/nonexistent/tts");
        let request = StageRequest::Speech {
            text: "hello".to_string(),
        };

        let error = adapter
            .generate(&request, Path::new("/tmp/out.wav"), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::ModelFailure);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_model_failure() {
        let adapter = SpeechSynthesizer::http("http://127.0.0.1:1/synthesize");
        let request = StageRequest::Speech {
            text: "hello".to_string(),
        };

        let error = adapter
            .generate(&request, Path::new("/tmp/out.wav"), Duration::from_secs(2))
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::ModelFailure);
    }
}
