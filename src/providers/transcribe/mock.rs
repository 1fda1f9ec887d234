use async_trait::async_trait;
use std::path::Path;

use super::{ensure_input, Transcriber};
use crate::error::ProviderError;
use crate::types::{Segment, Transcript};

/// Offline transcriber returning a fixed two-segment transcript
pub struct MockTranscriber;

impl MockTranscriber {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Transcript, ProviderError> {
        ensure_input(audio_path)?;

        let name = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let transcript = Transcript::new(vec![
            Segment {
                start_sec: 0.0,
                end_sec: 5.0,
                text: format!("This is a mock transcript of {}.", name),
                confidence: Some(1.0),
            },
            Segment {
                start_sec: 5.0,
                end_sec: 10.0,
                text: "It stands in for real speech recognition output.".to_string(),
                confidence: Some(1.0),
            },
        ]);

        Ok(transcript.with_language(language.unwrap_or("en")))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
