use async_trait::async_trait;
use std::path::Path;

use super::openai::{into_transcript, VerboseTranscription};
use super::{ensure_input, Transcriber};
use crate::config::Config;
use crate::error::ProviderError;
use crate::media::run_command;
use crate::types::Transcript;

const DEFAULT_MODEL: &str = "base";

/// Runs the local `whisper` command-line tool
pub struct WhisperCliTranscriber {
    whisper_path: String,
    model: String,
}

impl WhisperCliTranscriber {
    pub fn new(model: Option<&str>) -> Self {
        Self {
            whisper_path: "whisper".to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.transcribe.model.as_deref())
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Transcript, ProviderError> {
        ensure_input(audio_path)?;

        let output_dir = tempfile::tempdir()?;

        let mut args = vec![
            audio_path.to_string_lossy().into_owned(),
            "--model".to_string(),
            self.model.clone(),
            "--output_format".to_string(),
            "json".to_string(),
            "--output_dir".to_string(),
            output_dir.path().to_string_lossy().into_owned(),
            "--verbose".to_string(),
            "False".to_string(),
        ];
        if let Some(language) = language {
            args.push("--language".to_string());
            args.push(language.to_string());
        }

        run_command(&self.whisper_path, &args).await?;

        // Whisper names its output after the input file
        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let json_path = output_dir.path().join(format!("{}.json", stem));

        let content = fs_err::tokio::read_to_string(&json_path).await.map_err(|_| {
            ProviderError::MalformedResponse(format!("whisper produced no {}", json_path.display()))
        })?;
        let body: VerboseTranscription = serde_json::from_str(&content)?;

        Ok(into_transcript(body))
    }

    fn name(&self) -> &'static str {
        "whisper-cli"
    }
}
