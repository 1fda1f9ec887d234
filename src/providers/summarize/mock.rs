use async_trait::async_trait;

use super::Summarizer;
use crate::error::ProviderError;
use crate::types::{Note, NoteSection};

/// Offline summarizer producing a deterministic note
pub struct MockSummarizer;

impl MockSummarizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, text: &str, frame_refs: &[String]) -> Result<Note, ProviderError> {
        let words = text.split_whitespace().count();

        Ok(Note::new(
            "Mock Note",
            vec![
                NoteSection::new("Summary", format!("Mock summary of {} words.", words)),
                NoteSection::new("Transcript", text.trim()),
            ],
        )
        .with_frames(frame_refs.to_vec())
        .with_metadata("summarizer", "mock"))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
