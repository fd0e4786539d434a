//! Progress events emitted at stage boundaries.
//!
//! Events are immutable, fire-and-forget messages: the orchestrator never
//! waits for delivery and a subscriber joining late sees only what comes
//! after it joined.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::ArtifactRef;
use super::error::GenerationError;

/// The three generation stages of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Speech synthesis from the input text
    Audio,

    /// Avatar portrait synthesis
    Image,

    /// Facial animation driven by audio + portrait
    Animation,
}

impl Stage {
    /// Stable lowercase name, also used as the artifact subdirectory
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Animation => "animation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status carried by a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage has started executing
    Started,

    /// The stage completed and recorded its artifact
    Succeeded,

    /// The stage failed; the run is over
    Failed,
}

/// A single progress event, pushed to zero or more subscribers.
///
/// The wire form for gateways is `{run_id, stage, status, detail?}`; the
/// remaining fields are additive and skipped when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Stage the event concerns
    pub stage: Stage,

    /// What happened at the stage boundary
    pub status: StageStatus,

    /// Human-readable summary (NO secrets)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Artifact recorded by a succeeded stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,

    /// Time taken in milliseconds (for finished stages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// The normalized error of a failed stage, verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GenerationError>,
}

impl ProgressEvent {
    fn new(run_id: Uuid, stage: Stage, status: StageStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            stage,
            status,
            detail: None,
            artifact: None,
            duration_ms: None,
            error: None,
        }
    }

    /// A stage has begun executing
    pub fn started(run_id: Uuid, stage: Stage) -> Self {
        Self::new(run_id, stage, StageStatus::Started)
    }

    /// A stage completed with the given artifact
    pub fn succeeded(run_id: Uuid, stage: Stage, artifact: ArtifactRef) -> Self {
        let mut event = Self::new(run_id, stage, StageStatus::Succeeded);
        event.detail = Some(format!("{} written to {}", stage, artifact.path.display()));
        event.artifact = Some(artifact);
        event
    }

    /// A stage failed with the given normalized error
    pub fn failed(run_id: Uuid, stage: Stage, error: GenerationError) -> Self {
        let mut event = Self::new(run_id, stage, StageStatus::Failed);
        event.detail = Some(error.to_string());
        event.error = Some(error);
        event
    }

    /// The run was cancelled by its owner before or during this stage
    pub fn cancelled(run_id: Uuid, stage: Stage) -> Self {
        let mut event = Self::new(run_id, stage, StageStatus::Failed);
        event.detail = Some("run cancelled by owner".to_string());
        event
    }

    /// Attach a duration to the event
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach a detail string to the event
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// A terminal event ends its run: any failure, or animation success.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, StageStatus::Failed)
            || (self.stage == Stage::Animation && self.status == StageStatus::Succeeded)
    }
}
