use async_trait::async_trait;
use serde::Deserialize;

use super::{render_prompt, Summarizer, DEFAULT_PROMPT_TEMPLATE};
use crate::config::Config;
use crate::error::ProviderError;
use crate::providers::{error_for_status, resolve_credential};
use crate::types::Note;

/// Title used when the model's markdown has no `# ` line
const FALLBACK_TITLE: &str = "Summary";

/// Chat-completion vendors sharing the OpenAI wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    OpenAi,
    DeepSeek,
    Qwen,
    Doubao,
}

#[derive(Debug, Clone, Copy)]
pub struct VendorDefaults {
    /// Base URL; `/chat/completions` is appended
    pub base_url: &'static str,
    pub model: &'static str,
    pub env_var: &'static str,
}

impl Vendor {
    pub const ALL: [Vendor; 4] = [Vendor::OpenAi, Vendor::DeepSeek, Vendor::Qwen, Vendor::Doubao];

    pub fn name(&self) -> &'static str {
        match self {
            Vendor::OpenAi => "openai",
            Vendor::DeepSeek => "deepseek",
            Vendor::Qwen => "qwen",
            Vendor::Doubao => "doubao",
        }
    }

    pub fn defaults(&self) -> VendorDefaults {
        match self {
            Vendor::OpenAi => VendorDefaults {
                base_url: "https://api.openai.com/v1",
                model: "gpt-4o-mini",
                env_var: "OPENAI_API_KEY",
            },
            Vendor::DeepSeek => VendorDefaults {
                base_url: "https://api.deepseek.com/v1",
                model: "deepseek-chat",
                env_var: "DEEPSEEK_API_KEY",
            },
            Vendor::Qwen => VendorDefaults {
                base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
                model: "qwen-plus",
                env_var: "DASHSCOPE_API_KEY",
            },
            Vendor::Doubao => VendorDefaults {
                base_url: "https://ark.cn-beijing.volces.com/api/v3",
                model: "doubao-pro",
                env_var: "ARK_API_KEY",
            },
        }
    }
}

/// Summarizes through an OpenAI-compatible `/chat/completions` endpoint
pub struct ChatSummarizer {
    client: reqwest::Client,
    vendor: Vendor,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    prompt_template: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatSummarizer {
    pub fn from_config(vendor: Vendor, config: &Config) -> Result<Self, ProviderError> {
        let settings = &config.summarize;
        let defaults = vendor.defaults();

        let api_key = resolve_credential(settings.api_key.as_deref(), defaults.env_var).ok_or_else(|| {
            ProviderError::Auth(format!("{} is not set", defaults.env_var))
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            vendor,
            api_key,
            base_url: settings
                .base_url
                .as_deref()
                .unwrap_or(defaults.base_url)
                .trim_end_matches('/')
                .to_string(),
            model: settings.model.clone().unwrap_or_else(|| defaults.model.to_string()),
            temperature: settings.temperature,
            prompt_template: settings
                .prompt_template
                .clone()
                .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string()),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, text: &str, frame_refs: &[String]) -> Result<Note, ProviderError> {
        let prompt = render_prompt(&self.prompt_template, text, frame_refs);

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": self.temperature,
            "stream": false
        });

        tracing::debug!(vendor = self.vendor.name(), model = %self.model, "Requesting summary");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = error_for_status(response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let content = first_content(parsed)?;
        let note = Note::from_markdown(&content, FALLBACK_TITLE)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        Ok(note
            .with_frames(frame_refs.to_vec())
            .with_metadata("summarizer", self.vendor.name())
            .with_metadata("model", self.model.clone()))
    }

    fn name(&self) -> &'static str {
        self.vendor.name()
    }
}

fn first_content(response: ChatResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| ProviderError::MalformedResponse("response contained no message content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key() -> Config {
        let mut config = Config::for_url("https://example.com/v");
        config.summarize.api_key = Some("sk-test".to_string());
        config
    }

    #[test]
    fn test_vendor_defaults_apply() {
        let s = ChatSummarizer::from_config(Vendor::DeepSeek, &config_with_key()).unwrap();
        assert_eq!(s.endpoint(), "https://api.deepseek.com/v1/chat/completions");
        assert_eq!(s.model, "deepseek-chat");
        assert!(s.prompt_template.contains("{{transcript}}"));
    }

    #[test]
    fn test_config_overrides_vendor_defaults() {
        let mut config = config_with_key();
        config.summarize.base_url = Some("http://localhost:11434/v1/".to_string());
        config.summarize.model = Some("qwen2.5:3b".to_string());
        let s = ChatSummarizer::from_config(Vendor::Qwen, &config).unwrap();
        assert_eq!(s.endpoint(), "http://localhost:11434/v1/chat/completions");
        assert_eq!(s.model, "qwen2.5:3b");
    }

    #[test]
    fn test_vendor_names_are_unique() {
        let mut names: Vec<&str> = Vendor::ALL.iter().map(|v| v.name()).collect();
        names.dedup();
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_first_content() {
        let ok: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  # T\n\n## A\n\nb "}}]}"#).unwrap();
        assert_eq!(first_content(ok).unwrap(), "# T\n\n## A\n\nb");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(first_content(empty), Err(ProviderError::MalformedResponse(_))));

        let null: ChatResponse = serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(first_content(null).is_err());
    }
}
