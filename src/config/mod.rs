use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration failures. All of them are fatal: the pipeline does not start.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("environment variable '{0}' is referenced in the configuration but not set")]
    MissingEnv(String),

    #[error("required configuration field '{0}' is missing")]
    Missing(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("{capability} provider '{name}' is unavailable: {reason}")]
    ProviderUnavailable {
        capability: String,
        name: String,
        reason: String,
    },
}

/// Validated, immutable configuration for one pipeline run.
///
/// Resolved once at startup and shared by `Arc` with every stage and provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// What to process
    pub source: SourceConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub transcribe: TranscribeConfig,

    #[serde(default)]
    pub summarize: SummarizeConfig,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Video URL (or directory path for the `local` download provider)
    #[serde(default)]
    pub url: String,

    /// Language hint passed to transcription providers
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_download_provider")]
    pub provider: String,

    /// Tried once when the primary provider fails
    #[serde(default)]
    pub fallback_provider: Option<String>,

    /// Directory downloaded media is written to
    #[serde(default = "default_download_dir")]
    pub dir: PathBuf,

    /// Format selector handed to yt-dlp
    #[serde(default = "default_quality")]
    pub quality: String,

    /// Optional cookies file for sites that need a login
    #[serde(default)]
    pub cookies: Option<PathBuf>,

    /// Number of parts the mock provider declares (0 = single-part)
    #[serde(default)]
    pub mock_parts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeConfig {
    #[serde(default = "default_transcribe_provider")]
    pub provider: String,

    /// Model name (`whisper-1` for the API, `base`/`small`/... for the local CLI)
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    /// Extract a 16 kHz mono WAV with ffmpeg before transcribing
    #[serde(default = "default_true")]
    pub extract_audio: bool,

    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,

    /// Extract one key frame every N seconds; disabled when unset
    #[serde(default)]
    pub frame_interval_secs: Option<u32>,

    #[serde(default = "default_frames_dir")]
    pub frames_dir: PathBuf,

    #[serde(default = "default_transcripts_dir")]
    pub transcripts_dir: PathBuf,

    /// Reuse `<stable_key>.transcript.json` files from earlier runs
    #[serde(default = "default_true")]
    pub reuse_cached: bool,

    /// Parts transcribed concurrently
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarizeMode {
    /// One note per part
    PerPart,
    /// One note for the whole source, from all transcripts merged
    Merged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeConfig {
    #[serde(default = "default_summarize_provider")]
    pub provider: String,

    #[serde(default = "default_summarize_mode")]
    pub mode: SummarizeMode,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Prompt with `{{transcript}}` and optional `{{frames}}` substitution points
    #[serde(default)]
    pub prompt_template: Option<String>,

    /// Characters of transcript the rule summarizer keeps in its overview
    #[serde(default = "default_overview_chars")]
    pub overview_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// When false the publish stage is a guaranteed no-op
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_publish_provider")]
    pub provider: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub database_id: Option<String>,

    /// Title property of the target database
    #[serde(default = "default_title_property")]
    pub title_property: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory markdown notes are written to
    #[serde(default = "default_notes_dir")]
    pub notes_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Resolve every capability to its mock provider
    #[serde(default)]
    pub mock: bool,

    /// Use the mock provider when a configured provider reports itself unavailable
    #[serde(default)]
    pub mock_fallback: bool,

    /// Upper bound for each individual provider call
    #[serde(default = "default_timeout_secs")]
    pub provider_timeout_secs: u64,
}

fn default_download_provider() -> String {
    "yt-dlp".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_quality() -> String {
    "bv*[height<=720]+ba/b[height<=720]/b".to_string()
}

fn default_transcribe_provider() -> String {
    "openai".to_string()
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("downloads/audio")
}

fn default_frames_dir() -> PathBuf {
    PathBuf::from("downloads/frames")
}

fn default_transcripts_dir() -> PathBuf {
    PathBuf::from("downloads/transcripts")
}

fn default_concurrency() -> usize {
    1
}

fn default_summarize_provider() -> String {
    "openai".to_string()
}

fn default_summarize_mode() -> SummarizeMode {
    SummarizeMode::PerPart
}

fn default_temperature() -> f32 {
    0.7
}

fn default_overview_chars() -> usize {
    300
}

fn default_publish_provider() -> String {
    "notion".to_string()
}

fn default_title_property() -> String {
    "Name".to_string()
}

fn default_notes_dir() -> PathBuf {
    PathBuf::from("notes")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    900
}

fn default_true() -> bool {
    true
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            provider: default_download_provider(),
            fallback_provider: None,
            dir: default_download_dir(),
            quality: default_quality(),
            cookies: None,
            mock_parts: 0,
        }
    }
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            provider: default_transcribe_provider(),
            model: None,
            api_key: None,
            base_url: None,
            extract_audio: true,
            audio_dir: default_audio_dir(),
            frame_interval_secs: None,
            frames_dir: default_frames_dir(),
            transcripts_dir: default_transcripts_dir(),
            reuse_cached: true,
            max_concurrency: default_concurrency(),
        }
    }
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            provider: default_summarize_provider(),
            mode: default_summarize_mode(),
            model: None,
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
            prompt_template: None,
            overview_chars: default_overview_chars(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_publish_provider(),
            token: None,
            database_id: None,
            title_property: default_title_property(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            notes_dir: default_notes_dir(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            mock: false,
            mock_fallback: false,
            provider_timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Configuration for `url` with every other field at its default
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            source: SourceConfig {
                url: url.into(),
                language: None,
            },
            download: DownloadConfig::default(),
            transcribe: TranscribeConfig::default(),
            summarize: SummarizeConfig::default(),
            publish: PublishConfig::default(),
            output: OutputConfig::default(),
            app: AppConfig::default(),
        }
    }

    /// Load from an explicit path, `./config.yaml`, or the user config directory
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }

        let content = fs_err::read_to_string(&config_path)?;
        let config = Self::from_yaml(&content)?;
        tracing::debug!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }

    /// Parse YAML, substitute `${VAR}` values from the environment, and validate
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut raw: serde_yaml::Value = serde_yaml::from_str(content)?;
        replace_env_vars(&mut raw)?;

        let config: Config = serde_yaml::from_value(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf, ConfigError> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().ok_or(ConfigError::Missing("config directory"))?;

        Ok(config_dir.join("video2note").join("config.yaml"))
    }

    /// Fail fast on missing required fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.url.trim().is_empty() {
            return Err(ConfigError::Missing("source.url"));
        }

        let is_local = self.download.provider == "local";
        if !is_local && !self.app.mock {
            crate::utils::validate_and_normalize_url(&self.source.url).map_err(|e| {
                ConfigError::Invalid {
                    field: "source.url",
                    reason: e.to_string(),
                }
            })?;
        }

        for (field, value) in [
            ("download.provider", &self.download.provider),
            ("transcribe.provider", &self.transcribe.provider),
            ("summarize.provider", &self.summarize.provider),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(field));
            }
        }

        if self.publish.enabled && self.publish.provider.trim().is_empty() {
            return Err(ConfigError::Missing("publish.provider"));
        }

        if self.publish.enabled && self.publish.provider == "notion" && !self.app.mock {
            if is_blank(&self.publish.token) {
                return Err(ConfigError::Missing("publish.token"));
            }
            if is_blank(&self.publish.database_id) {
                return Err(ConfigError::Missing("publish.database_id"));
            }
        }

        for (field, path) in [
            ("download.dir", &self.download.dir),
            ("output.notes_dir", &self.output.notes_dir),
            ("transcribe.transcripts_dir", &self.transcribe.transcripts_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Missing(field));
            }
        }

        if self.transcribe.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "transcribe.max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.app.provider_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "app.provider_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.app.provider_timeout_secs)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Replace every string of the form `${VAR}` with the value of the environment variable
fn replace_env_vars(value: &mut serde_yaml::Value) -> Result<(), ConfigError> {
    match value {
        serde_yaml::Value::String(s) => {
            if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                let resolved =
                    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name.to_string()))?;
                *s = resolved;
            }
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                replace_env_vars(item)?;
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                replace_env_vars(item)?;
            }
        }
        serde_yaml::Value::Tagged(tagged) => replace_env_vars(&mut tagged.value)?,
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml("source:\n  url: https://www.youtube.com/watch?v=abc\n").unwrap();
        assert_eq!(config.download.provider, "yt-dlp");
        assert_eq!(config.transcribe.max_concurrency, 1);
        assert_eq!(config.summarize.mode, SummarizeMode::PerPart);
        assert!(!config.publish.enabled);
        assert_eq!(config.output.notes_dir, PathBuf::from("notes"));
        assert_eq!(config.provider_timeout(), Duration::from_secs(900));
    }

    #[test]
    fn test_missing_source_url_is_rejected() {
        let err = Config::from_yaml("source:\n  url: ''\n").unwrap_err();
        assert!(matches!(err, ConfigError::Missing("source.url")));
    }

    #[test]
    fn test_non_http_url_is_rejected() {
        let err = Config::from_yaml("source:\n  url: ftp://example.com/v\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "source.url", .. }));
    }

    #[test]
    fn test_local_provider_accepts_paths() {
        let yaml = "source:\n  url: ./media\ndownload:\n  provider: local\n";
        assert!(Config::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_enabled_notion_requires_credentials() {
        let yaml = "source:\n  url: https://example.com/v\npublish:\n  enabled: true\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("publish.token")));
    }

    #[test]
    fn test_env_vars_are_substituted() {
        std::env::set_var("VIDEO2NOTE_TEST_KEY", "sk-test");
        let yaml = "source:\n  url: https://example.com/v\nsummarize:\n  api_key: ${VIDEO2NOTE_TEST_KEY}\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.summarize.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_unset_env_var_is_an_error() {
        let yaml = "source:\n  url: https://example.com/v\nsummarize:\n  api_key: ${VIDEO2NOTE_SURELY_UNSET_VAR}\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "VIDEO2NOTE_SURELY_UNSET_VAR"));
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let yaml = "source:\n  url: https://example.com/v\ntranscribe:\n  max_concurrency: 0\n";
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::Invalid { field: "transcribe.max_concurrency", .. })
        ));
    }
}
