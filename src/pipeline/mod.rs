//! Stage/runner execution model.
//!
//! A run is a fixed sequence of [`Stage`]s sharing one [`ExecutionContext`].
//! Each stage declares the context keys it needs and the keys it adds; the
//! [`Runner`] checks the former before calling it and stops at the first
//! fatal [`StageError`](crate::error::StageError).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod context;
pub mod observer;
pub mod runner;
pub mod stages;

pub use context::{ExecutionContext, NoteSet, PublishFailure, PublishSummary, SavedNote, TranscriptSet};
pub use observer::{LogObserver, RunObserver, SpinnerObserver};
pub use runner::{RunMode, RunReport, Runner, StageOutcome};

use crate::error::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Download,
    Transcribe,
    Summarize,
    Publish,
}

impl StageKind {
    /// Execution order
    pub const ALL: [StageKind; 4] = [
        StageKind::Download,
        StageKind::Transcribe,
        StageKind::Summarize,
        StageKind::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Download => "download",
            StageKind::Transcribe => "transcribe",
            StageKind::Summarize => "summarize",
            StageKind::Publish => "publish",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys of the execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKey {
    Media,
    Video,
    Transcripts,
    Frames,
    Notes,
    Published,
}

impl ContextKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKey::Media => "media",
            ContextKey::Video => "video",
            ContextKey::Transcripts => "transcripts",
            ContextKey::Frames => "frames",
            ContextKey::Notes => "notes",
            ContextKey::Published => "published",
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of pipeline work.
///
/// Stages hold only the shared configuration and registry; everything a run
/// produces lives in the context.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Keys that must be present before `run`
    fn requires(&self) -> &'static [ContextKey];

    /// Keys `run` adds on success
    fn produces(&self) -> &'static [ContextKey];

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_names() {
        let names: Vec<String> = StageKind::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["download", "transcribe", "summarize", "publish"]);
        assert!(StageKind::Download < StageKind::Publish);
    }

    #[test]
    fn test_context_key_display() {
        assert_eq!(ContextKey::Transcripts.to_string(), "transcripts");
    }
}
