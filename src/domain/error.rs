//! The stage error taxonomy.
//!
//! Every failure signal from an external generator is normalized into one of
//! three kinds before it reaches the orchestrator, so failure handling never
//! depends on a specific backend's error surface.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller's input cannot be processed (not retried)
    InvalidInput,

    /// The generator produced no usable artifact
    ModelFailure,

    /// The stage exceeded its allotted duration
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidInput => "invalid_input",
            Self::ModelFailure => "model_failure",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// A normalized stage failure: kind plus a human-readable message.
///
/// Surfaced verbatim to both the result consumer and progress subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn model_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelFailure, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// True when the failure is the caller's to fix; everything else is a
    /// transient processing error from the gateway's point of view.
    pub fn is_caller_error(&self) -> bool {
        self.kind == ErrorKind::InvalidInput
    }
}
