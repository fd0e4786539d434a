//! Run state and reconstruction from journal records.
//!
//! A Run is one invocation of the pipeline for one text input. Its state is
//! mutated only by the orchestrator while live, and can be rebuilt from the
//! run's journal once the orchestrator has forgotten it.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::ArtifactRef;
use super::error::GenerationError;
use super::progress::{ProgressEvent, Stage, StageStatus};

/// Linear run state machine.
///
/// The audio and image stages may execute concurrently; this field is a
/// monotone projection of their completion order. The image states are
/// entered only once the audio stage has completed, regardless of which
/// stage finished first on the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// Accepted, nothing started yet
    Pending,

    /// Speech synthesis in flight
    AudioRunning,

    /// Audio artifact recorded
    AudioDone,

    /// Portrait synthesis in flight (audio already done)
    ImageRunning,

    /// Both upstream artifacts recorded
    ImageDone,

    /// Facial animation in flight
    AnimationRunning,

    /// Terminal: video artifact recorded
    Completed,

    /// Terminal: a stage failed
    Failed,

    /// Terminal: the owner cancelled the run
    Cancelled,
}

impl RunStage {
    /// No further transitions or stage invocations happen past a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The caller-facing result of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub audio_path: PathBuf,
    pub video_path: PathBuf,
}

/// Terminal outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum RunOutcome {
    /// All three stages succeeded
    Completed(RunOutput),

    /// A stage failed; the error is surfaced verbatim
    Failed(GenerationError),

    /// The owner cancelled the run; any in-flight result was discarded
    Cancelled,
}

/// A pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Input text being rendered
    pub text: String,

    /// Current position in the state machine
    pub stage: RunStage,

    /// When the run was submitted
    pub submitted_at: DateTime<Utc>,

    /// When the run reached a terminal state (if it has)
    pub completed_at: Option<DateTime<Utc>>,

    /// Latest status per stage
    pub stage_statuses: HashMap<Stage, StageStatus>,

    /// Last status-change time per stage
    pub stage_timestamps: HashMap<Stage, DateTime<Utc>>,

    /// Artifacts recorded by succeeded stages
    pub artifacts: HashMap<Stage, ArtifactRef>,

    /// Terminal error, if the run failed
    pub error: Option<GenerationError>,
}

impl Run {
    /// Create a new pending run
    pub fn new(id: Uuid, text: String) -> Self {
        Self {
            id,
            text,
            stage: RunStage::Pending,
            submitted_at: Utc::now(),
            completed_at: None,
            stage_statuses: HashMap::new(),
            stage_timestamps: HashMap::new(),
            artifacts: HashMap::new(),
            error: None,
        }
    }

    /// Reconstruct run state by replaying journal records in order
    pub fn from_records(records: &[RunRecord]) -> Option<Self> {
        let first = records.first()?;

        let mut run = Self::new(first.run_id(), String::new());
        for record in records {
            run.apply_record(record);
        }

        Some(run)
    }

    /// Apply a single journal record
    pub fn apply_record(&mut self, record: &RunRecord) {
        match record {
            RunRecord::Submitted {
                run_id,
                text,
                timestamp,
            } => {
                self.id = *run_id;
                self.text = text.clone();
                self.submitted_at = *timestamp;
            }
            RunRecord::Progress(event) => self.apply_event(event),
            RunRecord::Finished {
                outcome, timestamp, ..
            } => {
                match outcome {
                    RunOutcome::Completed(_) => self.stage = RunStage::Completed,
                    RunOutcome::Failed(error) => {
                        self.stage = RunStage::Failed;
                        self.error = Some(error.clone());
                    }
                    RunOutcome::Cancelled => self.stage = RunStage::Cancelled,
                }
                self.completed_at = Some(*timestamp);
            }
        }
    }

    /// Apply a progress event, advancing the linear state projection
    pub fn apply_event(&mut self, event: &ProgressEvent) {
        if self.stage.is_terminal() {
            return;
        }

        self.stage_statuses.insert(event.stage, event.status);
        self.stage_timestamps.insert(event.stage, event.timestamp);

        match event.status {
            StageStatus::Started => match event.stage {
                Stage::Audio => {
                    if self.stage == RunStage::Pending {
                        self.stage = RunStage::AudioRunning;
                    }
                }
                // Image may physically start while audio is still running;
                // the projection enters ImageRunning only after AudioDone.
                Stage::Image => {
                    if self.stage == RunStage::AudioDone {
                        self.stage = RunStage::ImageRunning;
                    }
                }
                Stage::Animation => self.stage = RunStage::AnimationRunning,
            },
            StageStatus::Succeeded => {
                if let Some(artifact) = &event.artifact {
                    self.artifacts.insert(event.stage, artifact.clone());
                }
                match event.stage {
                    Stage::Audio => {
                        self.stage = if self.is_stage_succeeded(Stage::Image) {
                            RunStage::ImageDone
                        } else {
                            RunStage::AudioDone
                        };
                    }
                    Stage::Image => {
                        if matches!(self.stage, RunStage::AudioDone | RunStage::ImageRunning) {
                            self.stage = RunStage::ImageDone;
                        }
                    }
                    Stage::Animation => {
                        self.stage = RunStage::Completed;
                        self.completed_at = Some(event.timestamp);
                    }
                }
            }
            StageStatus::Failed => {
                self.stage = RunStage::Failed;
                self.error = event.error.clone();
                self.completed_at = Some(event.timestamp);
            }
        }
    }

    /// Force the run into the terminal state matching an outcome.
    ///
    /// Used by the orchestrator when it settles a run (e.g. cancellation),
    /// and idempotent when the terminal event already moved the state.
    pub fn finish(&mut self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Completed(_) => self.stage = RunStage::Completed,
            RunOutcome::Failed(error) => {
                self.stage = RunStage::Failed;
                if self.error.is_none() {
                    self.error = Some(error.clone());
                }
            }
            RunOutcome::Cancelled => self.stage = RunStage::Cancelled,
        }
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Check if the run has reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Check if a specific stage has succeeded
    pub fn is_stage_succeeded(&self, stage: Stage) -> bool {
        self.stage_statuses
            .get(&stage)
            .map(|s| *s == StageStatus::Succeeded)
            .unwrap_or(false)
    }

    /// The caller-facing result, available once the run completed
    pub fn output(&self) -> Option<RunOutput> {
        let audio = self.artifacts.get(&Stage::Audio)?;
        let video = self.artifacts.get(&Stage::Animation)?;
        Some(RunOutput {
            audio_path: audio.path.clone(),
            video_path: video.path.clone(),
        })
    }

    /// Terminal outcome, if the run is finished
    pub fn outcome(&self) -> Option<RunOutcome> {
        match self.stage {
            RunStage::Completed => self.output().map(RunOutcome::Completed),
            RunStage::Failed => Some(RunOutcome::Failed(self.error.clone().unwrap_or_else(
                || GenerationError::model_failure("run failed without a recorded error"),
            ))),
            RunStage::Cancelled => Some(RunOutcome::Cancelled),
            _ => None,
        }
    }
}

/// A single record in a run's append-only journal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum RunRecord {
    /// The run was accepted with this input
    Submitted {
        run_id: Uuid,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage-boundary progress event
    Progress(ProgressEvent),

    /// The run settled on a terminal outcome
    Finished {
        run_id: Uuid,
        outcome: RunOutcome,
        timestamp: DateTime<Utc>,
    },
}

impl RunRecord {
    /// The run this record belongs to
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Submitted { run_id, .. } => *run_id,
            Self::Progress(event) => event.run_id,
            Self::Finished { run_id, .. } => *run_id,
        }
    }
}
