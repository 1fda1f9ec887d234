use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;

use super::{confidence_from_logprob, ensure_input, Transcriber};
use crate::config::Config;
use crate::error::ProviderError;
use crate::providers::{error_for_status, resolve_credential};
use crate::types::{Segment, Transcript};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "whisper-1";

/// Whisper transcription over the OpenAI audio API (or any compatible server)
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

/// `verbose_json` body; the local whisper CLI writes the same shape
#[derive(Debug, Deserialize)]
pub(crate) struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    avg_logprob: Option<f64>,
}

impl OpenAiTranscriber {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, model: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let settings = &config.transcribe;
        let api_key = resolve_credential(settings.api_key.as_deref(), API_KEY_ENV)
            .ok_or_else(|| ProviderError::Auth(format!("{} is not set", API_KEY_ENV)))?;

        Ok(Self::new(api_key, settings.base_url.as_deref(), settings.model.as_deref()))
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/audio/transcriptions", self.base_url)
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Transcript, ProviderError> {
        ensure_input(audio_path)?;

        let bytes = fs_err::tokio::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let mut form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        tracing::debug!("Uploading {} to {}", audio_path.display(), self.endpoint());

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let response = error_for_status(response).await?;

        let body: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        Ok(into_transcript(body))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

pub(crate) fn into_transcript(body: VerboseTranscription) -> Transcript {
    let transcript = if body.segments.is_empty() {
        Transcript::from_text(body.text.trim())
    } else {
        Transcript::new(
            body.segments
                .into_iter()
                .map(|s| Segment {
                    start_sec: s.start,
                    end_sec: s.end,
                    text: s.text.trim().to_string(),
                    confidence: confidence_from_logprob(s.avg_logprob),
                })
                .collect(),
        )
    };

    match body.language {
        Some(language) => transcript.with_language(language),
        None => transcript,
    }
}
