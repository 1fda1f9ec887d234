use async_trait::async_trait;

use super::Summarizer;
use crate::config::Config;
use crate::error::ProviderError;
use crate::types::{Note, NoteSection};
use crate::utils::source_id_from_url;

/// Key frames embedded in a rule-based note
const MAX_FRAMES: usize = 5;

/// Extractive summarizer: no network, no model
pub struct RuleSummarizer {
    title: String,
    overview_chars: usize,
}

impl RuleSummarizer {
    pub fn new(title: impl Into<String>, overview_chars: usize) -> Self {
        Self {
            title: title.into(),
            overview_chars,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(source_id_from_url(&config.source.url), config.summarize.overview_chars)
    }

    fn overview(&self, text: &str) -> String {
        let text = text.trim();
        let mut overview: String = text.chars().take(self.overview_chars).collect();
        if text.chars().count() > self.overview_chars {
            overview.push_str("...");
        }
        overview
    }
}

#[async_trait]
impl Summarizer for RuleSummarizer {
    async fn summarize(&self, text: &str, frame_refs: &[String]) -> Result<Note, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::MalformedResponse("nothing to summarize".to_string()));
        }

        let mut sections = vec![
            NoteSection::new("Overview", self.overview(text)),
            NoteSection::new("Transcript", text.trim()),
        ];

        if !frame_refs.is_empty() {
            let images = frame_refs
                .iter()
                .take(MAX_FRAMES)
                .enumerate()
                .map(|(i, frame)| format!("![Frame {}]({})", i + 1, frame))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(NoteSection::new("Key Frames", images));
        }

        Ok(Note::new(self.title.clone(), sections)
            .with_frames(frame_refs.to_vec())
            .with_metadata("summarizer", "rule"))
    }

    fn name(&self) -> &'static str {
        "rule"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_overview_is_truncated() {
        let summarizer = RuleSummarizer::new("Talk", 10);
        let note = summarizer.summarize("abcdefghijklmnop", &[]).await.unwrap();
        assert_eq!(note.sections[0], NoteSection::new("Overview", "abcdefghij..."));
        assert_eq!(note.sections.len(), 2);
    }

    #[tokio::test]
    async fn test_short_text_is_not_ellipsized() {
        let note = RuleSummarizer::new("Talk", 300).summarize("short", &[]).await.unwrap();
        assert_eq!(note.sections[0].body, "short");
    }

    #[tokio::test]
    async fn test_at_most_five_frames_are_embedded() {
        let frames: Vec<String> = (1..=7).map(|i| format!("frames/f{}.jpg", i)).collect();
        let note = RuleSummarizer::new("Talk", 300).summarize("text", &frames).await.unwrap();
        let key_frames = &note.sections[2];
        assert_eq!(key_frames.heading, "Key Frames");
        assert_eq!(key_frames.body.lines().count(), 5);
        assert!(key_frames.body.starts_with("![Frame 1](frames/f1.jpg)"));
        assert_eq!(note.frame_refs.len(), 7);
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected() {
        assert!(RuleSummarizer::new("Talk", 300).summarize("  ", &[]).await.is_err());
    }
}
