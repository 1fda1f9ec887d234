use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigError;
use crate::pipeline::{ContextKey, StageKind};
use crate::providers::{Capability, RegistryError};

/// Failures raised inside provider implementations.
///
/// Stages never let these escape: each one is translated into a [`StageError`]
/// at the stage boundary.
#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("input file does not exist: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("authentication or quota error: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{program} failed: {stderr}")]
    Command { program: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether a second attempt (or a fallback provider) could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transient(_) | ProviderError::Timeout(_) => true,
            ProviderError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map_or(false, |status| status.is_server_error())
            }
            _ => false,
        }
    }
}

/// The taxonomy the runner understands. Every stage failure is exactly one of these.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no {capability} provider named '{name}' is registered")]
    UnsupportedProvider { capability: Capability, name: String },

    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: ProviderError,
    },

    #[error("media is incomplete after download, missing parts {missing:?}")]
    IncompleteMedia { missing: Vec<u32> },

    #[error("transcription failed for all parts {failed:?}: {reason}")]
    Transcription { failed: Vec<u32>, reason: String },

    #[error("summarization failed for all parts {failed:?}: {reason}")]
    Summarization { failed: Vec<u32>, reason: String },

    #[error("publishing '{title}' failed: {reason}")]
    Sync { title: String, reason: String },

    #[error("{stage} stage requires '{key}' in the execution context")]
    MissingInput { stage: StageKind, key: ContextKey },

    #[error("run cancelled before {0}")]
    Cancelled(StageKind),
}

impl StageError {
    /// Publish failures are best-effort; everything else ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StageError::Sync { .. })
    }
}

impl From<RegistryError> for StageError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unsupported { capability, name } => {
                StageError::UnsupportedProvider { capability, name }
            }
            RegistryError::Unavailable {
                capability,
                name,
                reason,
            } => StageError::Config(ConfigError::ProviderUnavailable {
                capability: capability.to_string(),
                name,
                reason,
            }),
            RegistryError::Build {
                capability,
                name,
                source,
            } => StageError::Config(ConfigError::ProviderUnavailable {
                capability: capability.to_string(),
                name,
                reason: source.to_string(),
            }),
        }
    }
}

/// A fatal stage failure, tagged with the stage it came from.
#[derive(thiserror::Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: StageKind,
    #[source]
    pub source: StageError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ProviderError::Transient("503".into()).is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!ProviderError::NotFound("BV1".into()).is_retryable());
        assert!(!ProviderError::UnsupportedSource("ftp://x".into()).is_retryable());
        assert!(!ProviderError::Auth("401".into()).is_retryable());
    }

    #[test]
    fn test_only_sync_is_non_fatal() {
        let sync = StageError::Sync {
            title: "note".into(),
            reason: "503".into(),
        };
        assert!(!sync.is_fatal());
        assert!(StageError::IncompleteMedia { missing: vec![2] }.is_fatal());
        assert!(StageError::Cancelled(StageKind::Summarize).is_fatal());
    }

    #[test]
    fn test_registry_errors_map_into_taxonomy() {
        let err: StageError = RegistryError::Unsupported {
            capability: Capability::Transcribe,
            name: "nope".into(),
        }
        .into();
        assert!(matches!(err, StageError::UnsupportedProvider { .. }));

        let err: StageError = RegistryError::Unavailable {
            capability: Capability::Summarize,
            name: "openai".into(),
            reason: "no api key".into(),
        }
        .into();
        assert!(matches!(err, StageError::Config(_)));
        assert!(err.to_string().contains("no api key"));
    }

    #[test]
    fn test_pipeline_error_names_stage() {
        let err = PipelineError {
            stage: StageKind::Download,
            source: StageError::IncompleteMedia { missing: vec![2, 5] },
        };
        let message = err.to_string();
        assert!(message.starts_with("download stage failed"));
        assert!(message.contains("[2, 5]"));
    }
}
