use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::{ContextKey, StageKind};
use crate::error::StageError;
use crate::types::{FetchedMedia, MediaReference, Note, PartTranscript};

/// Transcripts in part order plus the parts that could not be transcribed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptSet {
    pub parts: Vec<PartTranscript>,
    pub skipped: Vec<u32>,
}

/// A note written to disk
#[derive(Debug, Clone, PartialEq)]
pub struct SavedNote {
    /// Part the note covers; `None` for a merged note
    pub index: Option<u32>,
    pub path: PathBuf,
    pub note: Note,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteSet {
    pub notes: Vec<SavedNote>,
    pub skipped: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFailure {
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub enabled: bool,
    pub published: Vec<String>,
    pub failures: Vec<PublishFailure>,
}

/// Typed key/value store for one run.
///
/// Keys are only ever added. Each key has exactly one writing stage, so the
/// setters are the only mutation path.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    media: Option<MediaReference>,
    video: Option<FetchedMedia>,
    transcripts: Option<TranscriptSet>,
    frames: Option<BTreeMap<u32, Vec<String>>>,
    notes: Option<NoteSet>,
    published: Option<PublishSummary>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..Self::default()
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn has(&self, key: ContextKey) -> bool {
        match key {
            ContextKey::Media => self.media.is_some(),
            ContextKey::Video => self.video.is_some(),
            ContextKey::Transcripts => self.transcripts.is_some(),
            ContextKey::Frames => self.frames.is_some(),
            ContextKey::Notes => self.notes.is_some(),
            ContextKey::Published => self.published.is_some(),
        }
    }

    /// Present keys, in declaration order
    pub fn keys(&self) -> Vec<ContextKey> {
        [
            ContextKey::Media,
            ContextKey::Video,
            ContextKey::Transcripts,
            ContextKey::Frames,
            ContextKey::Notes,
            ContextKey::Published,
        ]
        .into_iter()
        .filter(|key| self.has(*key))
        .collect()
    }

    pub fn media(&self) -> Option<&MediaReference> {
        self.media.as_ref()
    }

    pub fn video(&self) -> Option<&FetchedMedia> {
        self.video.as_ref()
    }

    pub fn transcripts(&self) -> Option<&TranscriptSet> {
        self.transcripts.as_ref()
    }

    pub fn frames(&self) -> Option<&BTreeMap<u32, Vec<String>>> {
        self.frames.as_ref()
    }

    /// Frame refs for one part, empty when none were extracted
    pub fn frames_for(&self, index: u32) -> &[String] {
        self.frames
            .as_ref()
            .and_then(|frames| frames.get(&index))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn notes(&self) -> Option<&NoteSet> {
        self.notes.as_ref()
    }

    pub fn published(&self) -> Option<&PublishSummary> {
        self.published.as_ref()
    }

    pub fn require_media(&self, stage: StageKind) -> Result<&MediaReference, StageError> {
        self.media().ok_or(StageError::MissingInput {
            stage,
            key: ContextKey::Media,
        })
    }

    pub fn require_video(&self, stage: StageKind) -> Result<&FetchedMedia, StageError> {
        self.video().ok_or(StageError::MissingInput {
            stage,
            key: ContextKey::Video,
        })
    }

    pub fn require_transcripts(&self, stage: StageKind) -> Result<&TranscriptSet, StageError> {
        self.transcripts().ok_or(StageError::MissingInput {
            stage,
            key: ContextKey::Transcripts,
        })
    }

    pub fn require_notes(&self, stage: StageKind) -> Result<&NoteSet, StageError> {
        self.notes().ok_or(StageError::MissingInput {
            stage,
            key: ContextKey::Notes,
        })
    }

    pub fn set_media(&mut self, media: MediaReference) {
        self.media = Some(media);
    }

    /// Replaces any previous value wholesale
    pub fn set_video(&mut self, video: FetchedMedia) {
        self.video = Some(video);
    }

    pub fn set_transcripts(&mut self, transcripts: TranscriptSet) {
        self.transcripts = Some(transcripts);
    }

    pub fn set_frames(&mut self, frames: BTreeMap<u32, Vec<String>>) {
        self.frames = Some(frames);
    }

    pub fn set_notes(&mut self, notes: NoteSet) {
        self.notes = Some(notes);
    }

    pub fn set_published(&mut self, published: PublishSummary) {
        self.published = Some(published);
    }
}
