//! talkinghead - Talking-avatar video pipeline orchestrator
//!
//! Turns a text string into a rendered talking-avatar video by chaining
//! three long-running generation stages (speech synthesis, avatar portrait
//! synthesis, facial animation) while broadcasting progress to any number
//! of observers.
//!
//! # Architecture
//!
//! The system is built around a per-run state machine:
//! - Each submission becomes a Run with its own id and linear stage state
//! - The audio and portrait stages execute concurrently; animation starts
//!   only once both artifacts are recorded
//! - Stage boundaries emit fire-and-forget progress events; a slow
//!   subscriber is dropped rather than stalling the pipeline
//! - Every run's lifecycle is journaled so finished runs stay inspectable
//!
//! # Modules
//!
//! - `adapters`: Uniform wrappers around the external generators
//! - `core`: Orchestration logic (Orchestrator, ProgressChannel,
//!   ArtifactStore, RunJournal)
//! - `domain`: Data structures (Run, ProgressEvent, ArtifactRef,
//!   GenerationError)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Generate a video
//! talkinghead generate "Hello world"
//!
//! # Check run status
//! talkinghead status <run-id>
//!
//! # Probe the stage backends
//! talkinghead doctor
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::adapters::{
    FaceAnimator, PortraitGenerator, SpeechSynthesizer, StageAdapter, StageAdapters, StageRequest,
    StyleSpec,
};
pub use crate::core::{ArtifactStore, Orchestrator, ProgressChannel, ProgressStream, RunJournal};
pub use crate::domain::{
    ArtifactKind, ArtifactRef, ErrorKind, GenerationError, ProgressEvent, Run, RunOutcome,
    RunOutput, RunRecord, RunStage, Stage, StageStatus,
};
