use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub mod mock;
pub mod openai;
pub mod qwen;
pub mod whisper_cli;

use super::{Availability, ProviderTable, MOCK_PROVIDER};
use crate::error::ProviderError;
use crate::types::Transcript;

/// Turns one audio file into a timed transcript
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio_path`, optionally hinting the spoken language.
    ///
    /// A missing input file is [`ProviderError::MissingInput`].
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Transcript, ProviderError>;

    fn name(&self) -> &'static str;
}

pub fn register_defaults(table: &mut ProviderTable<dyn Transcriber>) {
    table.register(
        "openai",
        |config| {
            Availability::of_credential(config.transcribe.api_key.as_deref(), openai::API_KEY_ENV)
        },
        |config| {
            openai::OpenAiTranscriber::from_config(config).map(|t| Arc::new(t) as Arc<dyn Transcriber>)
        },
    );

    table.register(
        "qwen",
        |config| Availability::of_credential(config.transcribe.api_key.as_deref(), qwen::API_KEY_ENV),
        |config| qwen::QwenTranscriber::from_config(config).map(|t| Arc::new(t) as Arc<dyn Transcriber>),
    );

    for name in ["whisper-cli", "local_whisper"] {
        table.register(
            name,
            |_| Availability::of_command("whisper"),
            |config| {
                Ok(Arc::new(whisper_cli::WhisperCliTranscriber::from_config(config)) as Arc<dyn Transcriber>)
            },
        );
    }

    table.register(
        MOCK_PROVIDER,
        |_| Availability::Ready,
        |_| Ok(Arc::new(mock::MockTranscriber::new()) as Arc<dyn Transcriber>),
    );
}

/// Fail early with `MissingInput` instead of letting the backend report it
pub(crate) fn ensure_input(audio_path: &Path) -> Result<(), ProviderError> {
    if audio_path.is_file() {
        Ok(())
    } else {
        Err(ProviderError::MissingInput(audio_path.to_path_buf()))
    }
}

/// Whisper's `avg_logprob` as a 0..1 confidence
pub(crate) fn confidence_from_logprob(avg_logprob: Option<f64>) -> Option<f64> {
    avg_logprob.map(|lp| lp.exp().clamp(0.0, 1.0))
}
