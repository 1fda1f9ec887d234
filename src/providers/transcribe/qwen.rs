use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

use super::{ensure_input, Transcriber};
use crate::config::Config;
use crate::error::ProviderError;
use crate::providers::{error_for_status, resolve_credential};
use crate::types::Transcript;

pub const API_KEY_ENV: &str = "DASHSCOPE_API_KEY";
const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";
const DEFAULT_MODEL: &str = "qwen-audio-asr";

/// Speech recognition through DashScope's multimodal generation API.
///
/// The service returns flat text, so the transcript is a single untimed segment.
pub struct QwenTranscriber {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenerationResponse {
    #[serde(default)]
    output: Option<GenerationOutput>,
}

#[derive(Debug, Deserialize)]
struct GenerationOutput {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Content,
}

/// Plain string, or a list of `{ "text": ... }` parts
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

/// Instruction sent alongside the audio; asks for a verbatim transcript, not a summary
pub(crate) fn language_prompt(language: Option<&str>) -> &'static str {
    match language.unwrap_or("zh") {
        "zh" => "请将音频内容逐字转写为中文文本，不要总结。",
        "en" => "Please transcribe the audio content verbatim into English text.",
        "ja" => "音声内容を逐語的に日本語テキストに書き起こしてください。",
        "ko" => "오디오 내용을 한글 텍스트로 충실하게 받아쓰기 하세요.",
        _ => "Transcribe the audio.",
    }
}

impl QwenTranscriber {
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
        format!("{}/services/aigc/multimodal-generation/generation", self.base_url)
    }

    fn request_body(&self, audio: &str, language: Option<&str>) -> serde_json::Value {
        json!({
            "model": self.model,
            "input": {
                "messages": [{
                    "role": "user",
                    "content": [
                        { "audio": audio },
                        { "text": language_prompt(language) }
                    ]
                }]
            }
        })
    }
}

/// Inline the file as a data URI
fn audio_data_uri(audio_path: &Path, bytes: &[u8]) -> String {
    let format = audio_path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "wav".to_string());
    format!("data:audio/{};base64,{}", format, general_purpose::STANDARD.encode(bytes))
}

pub(crate) fn into_transcript(body: GenerationResponse) -> Result<Transcript, ProviderError> {
    let choice = body
        .output
        .and_then(|output| output.choices.into_iter().next())
        .ok_or_else(|| ProviderError::MalformedResponse("Qwen ASR returned no choices".to_string()))?;

    let text = match choice.message.content {
        Content::Text(text) => text,
        Content::Parts(parts) => parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join(""),
    };

    Ok(Transcript::from_text(text.trim()))
}

#[async_trait]
impl Transcriber for QwenTranscriber {
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Transcript, ProviderError> {
        ensure_input(audio_path)?;

        let bytes = fs_err::tokio::read(audio_path).await?;
        let body = self.request_body(&audio_data_uri(audio_path, &bytes), language);

        tracing::info!("Transcribing {} with {}", audio_path.display(), self.model);

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = error_for_status(response).await?;

        let body: GenerationResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let transcript = into_transcript(body)?;
        Ok(match language {
            Some(language) => transcript.with_language(language),
            None => transcript,
        })
    }

    fn name(&self) -> &'static str {
        "qwen"
    }
}
