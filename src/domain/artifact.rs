//! References to generated media files.
//!
//! The orchestrator never inspects artifact contents; it only passes
//! references between stages and to the caller.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::progress::Stage;

/// Kind of media an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Rendered speech audio
    Audio,

    /// Rendered avatar portrait
    Image,

    /// Rendered talking-head video
    Video,
}

impl ArtifactKind {
    /// The kind produced by a given pipeline stage
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Audio => Self::Audio,
            Stage::Image => Self::Image,
            Stage::Animation => Self::Video,
        }
    }

    /// Stable lowercase name, also used as the artifact subdirectory
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// File extension for this kind
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Audio => "wav",
            Self::Image => "png",
            Self::Video => "mp4",
        }
    }
}

/// A reference to a generated file on durable storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// What kind of media the file holds
    pub kind: ArtifactKind,

    /// Path to the file
    pub path: PathBuf,

    /// When the artifact was recorded
    pub created_at: DateTime<Utc>,

    /// Size in bytes at creation time
    pub size_bytes: u64,
}

impl ArtifactRef {
    pub fn new(kind: ArtifactKind, path: PathBuf, size_bytes: u64) -> Self {
        Self {
            kind,
            path,
            created_at: Utc::now(),
            size_bytes,
        }
    }

    /// A usable reference points at a non-empty path with non-empty content.
    /// The animation stage is gated on both upstream references being usable.
    pub fn is_usable(&self) -> bool {
        !self.path.as_os_str().is_empty() && self.size_bytes > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_for_stage() {
        assert_eq!(ArtifactKind::for_stage(Stage::Audio), ArtifactKind::Audio);
        assert_eq!(ArtifactKind::for_stage(Stage::Image), ArtifactKind::Image);
        assert_eq!(ArtifactKind::for_stage(Stage::Animation), ArtifactKind::Video);
        assert_eq!(ArtifactKind::Video.extension(), "mp4");
    }

    #[test]
    fn test_usable_requires_path_and_content() {
        let good = ArtifactRef::new(ArtifactKind::Audio, PathBuf::from("/tmp/a.wav"), 42);
        assert!(good.is_usable());

        let empty_path = ArtifactRef::new(ArtifactKind::Audio, PathBuf::new(), 42);
        assert!(!empty_path.is_usable());

        let empty_file = ArtifactRef::new(ArtifactKind::Audio, PathBuf::from("/tmp/a.wav"), 0);
        assert!(!empty_file.is_usable());
    }

    #[test]
    fn test_artifact_serialization() {
        let artifact = ArtifactRef::new(ArtifactKind::Video, PathBuf::from("/tmp/v.mp4"), 1024);

        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: ArtifactRef = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.kind, ArtifactKind::Video);
        assert_eq!(parsed.size_bytes, 1024);
    }
}
