//! Pluggable backends for the four pipeline capabilities.
//!
//! Every capability has a narrow trait ([`Downloader`], [`Transcriber`],
//! [`Summarizer`], [`Publisher`]) and a [`ProviderTable`] mapping provider
//! names to constructors. Selection is plain string lookup; new backends are
//! added by registering, never by branching on names at call sites.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::ProviderError;

pub mod download;
pub mod publish;
pub mod summarize;
pub mod transcribe;

pub use download::Downloader;
pub use publish::Publisher;
pub use summarize::Summarizer;
pub use transcribe::Transcriber;

/// Name every capability registers its offline stand-in under
pub const MOCK_PROVIDER: &str = "mock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Download,
    Transcribe,
    Summarize,
    Publish,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Download => "download",
            Capability::Transcribe => "transcribe",
            Capability::Summarize => "summarize",
            Capability::Publish => "publish",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a provider's prerequisite check, consulted before construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Ready,
    Unavailable(String),
}

impl Availability {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Availability::Unavailable(reason.into())
    }

    /// `Ready` when the binary is on PATH
    pub fn of_command(command: &str) -> Self {
        if crate::utils::command_on_path(command) {
            Availability::Ready
        } else {
            Availability::Unavailable(format!("'{}' was not found on PATH", command))
        }
    }

    /// `Ready` when a credential is configured directly or through an environment variable
    pub fn of_credential(value: Option<&str>, env_var: &str) -> Self {
        if resolve_credential(value, env_var).is_some() {
            Availability::Ready
        } else {
            Availability::Unavailable(format!("no API key configured and {} is not set", env_var))
        }
    }
}

/// Configured value first, then the environment
pub fn resolve_credential(value: Option<&str>, env_var: &str) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok().filter(|v| !v.trim().is_empty()))
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("no {capability} provider named '{name}' is registered")]
    Unsupported { capability: Capability, name: String },

    #[error("{capability} provider '{name}' is unavailable: {reason}")]
    Unavailable {
        capability: Capability,
        name: String,
        reason: String,
    },

    #[error("failed to construct {capability} provider '{name}': {source}")]
    Build {
        capability: Capability,
        name: String,
        #[source]
        source: ProviderError,
    },
}

type ProbeFn = Arc<dyn Fn(&Config) -> Availability + Send + Sync>;
type BuildFn<T> = Arc<dyn Fn(&Config) -> Result<Arc<T>, ProviderError> + Send + Sync>;

struct Registration<T: ?Sized> {
    probe: ProbeFn,
    build: BuildFn<T>,
}

/// Name → constructor table for one capability
pub struct ProviderTable<T: ?Sized> {
    capability: Capability,
    entries: BTreeMap<String, Registration<T>>,
}

impl<T: ?Sized> ProviderTable<T> {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            entries: BTreeMap::new(),
        }
    }

    /// Register (or replace) a provider under `name`
    pub fn register<P, B>(&mut self, name: &str, probe: P, build: B)
    where
        P: Fn(&Config) -> Availability + Send + Sync + 'static,
        B: Fn(&Config) -> Result<Arc<T>, ProviderError> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_ascii_lowercase(),
            Registration {
                probe: Arc::new(probe),
                build: Arc::new(build),
            },
        );
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Which registered provider `create` would build, without building it
    pub fn resolve(&self, name: &str, config: &Config) -> Result<String, RegistryError> {
        let requested = if config.app.mock {
            MOCK_PROVIDER.to_string()
        } else {
            name.to_ascii_lowercase()
        };

        let registration = self
            .entries
            .get(&requested)
            .ok_or_else(|| RegistryError::Unsupported {
                capability: self.capability,
                name: requested.clone(),
            })?;

        match (registration.probe)(config) {
            Availability::Ready => Ok(requested),
            Availability::Unavailable(reason)
                if config.app.mock_fallback
                    && requested != MOCK_PROVIDER
                    && self.entries.contains_key(MOCK_PROVIDER) =>
            {
                tracing::warn!(
                    capability = %self.capability,
                    provider = %requested,
                    %reason,
                    "Provider unavailable, falling back to mock"
                );
                Ok(MOCK_PROVIDER.to_string())
            }
            Availability::Unavailable(reason) => Err(RegistryError::Unavailable {
                capability: self.capability,
                name: requested,
                reason,
            }),
        }
    }

    /// Build the provider registered under `name`, consulting its availability probe first
    pub fn create(&self, name: &str, config: &Config) -> Result<Arc<T>, RegistryError> {
        let resolved = self.resolve(name, config)?;
        if config.app.mock {
            tracing::info!(capability = %self.capability, "Mock mode: using mock provider");
        }

        let registration = self
            .entries
            .get(&resolved)
            .ok_or_else(|| RegistryError::Unsupported {
                capability: self.capability,
                name: resolved.clone(),
            })?;

        (registration.build)(config).map_err(|source| RegistryError::Build {
            capability: self.capability,
            name: resolved,
            source,
        })
    }
}

/// A constructed provider of any capability
#[derive(Clone)]
pub enum ProviderInstance {
    Download(Arc<dyn Downloader>),
    Transcribe(Arc<dyn Transcriber>),
    Summarize(Arc<dyn Summarizer>),
    Publish(Arc<dyn Publisher>),
}

impl ProviderInstance {
    pub fn capability(&self) -> Capability {
        match self {
            ProviderInstance::Download(_) => Capability::Download,
            ProviderInstance::Transcribe(_) => Capability::Transcribe,
            ProviderInstance::Summarize(_) => Capability::Summarize,
            ProviderInstance::Publish(_) => Capability::Publish,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderInstance::Download(p) => p.name(),
            ProviderInstance::Transcribe(p) => p.name(),
            ProviderInstance::Summarize(p) => p.name(),
            ProviderInstance::Publish(p) => p.name(),
        }
    }
}

/// Registry for every capability's providers
pub struct ProviderRegistry {
    pub downloaders: ProviderTable<dyn Downloader>,
    pub transcribers: ProviderTable<dyn Transcriber>,
    pub summarizers: ProviderTable<dyn Summarizer>,
    pub publishers: ProviderTable<dyn Publisher>,
}

impl ProviderRegistry {
    /// Registry with no providers at all
    pub fn empty() -> Self {
        Self {
            downloaders: ProviderTable::new(Capability::Download),
            transcribers: ProviderTable::new(Capability::Transcribe),
            summarizers: ProviderTable::new(Capability::Summarize),
            publishers: ProviderTable::new(Capability::Publish),
        }
    }

    /// Create a new registry with the built-in providers
    pub fn new() -> Self {
        let mut registry = Self::empty();

        download::register_defaults(&mut registry.downloaders);
        transcribe::register_defaults(&mut registry.transcribers);
        summarize::register_defaults(&mut registry.summarizers);
        publish::register_defaults(&mut registry.publishers);

        registry
    }

    /// Build a provider for `capability` by name
    pub fn create(
        &self,
        capability: Capability,
        name: &str,
        config: &Config,
    ) -> Result<ProviderInstance, RegistryError> {
        Ok(match capability {
            Capability::Download => ProviderInstance::Download(self.downloaders.create(name, config)?),
            Capability::Transcribe => {
                ProviderInstance::Transcribe(self.transcribers.create(name, config)?)
            }
            Capability::Summarize => {
                ProviderInstance::Summarize(self.summarizers.create(name, config)?)
            }
            Capability::Publish => ProviderInstance::Publish(self.publishers.create(name, config)?),
        })
    }

    /// Check that `name` resolves for `capability` without constructing anything
    pub fn check(&self, capability: Capability, name: &str, config: &Config) -> Result<String, RegistryError> {
        match capability {
            Capability::Download => self.downloaders.resolve(name, config),
            Capability::Transcribe => self.transcribers.resolve(name, config),
            Capability::Summarize => self.summarizers.resolve(name, config),
            Capability::Publish => self.publishers.resolve(name, config),
        }
    }

    /// List registered provider names per capability
    pub fn list(&self) -> Vec<(Capability, Vec<&str>)> {
        vec![
            (Capability::Download, self.downloaders.names()),
            (Capability::Transcribe, self.transcribers.names()),
            (Capability::Summarize, self.summarizers.names()),
            (Capability::Publish, self.publishers.names()),
        ]
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Bound a provider call; elapsing is reported as a retryable [`ProviderError::Timeout`]
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

/// Translate a non-success HTTP response into the provider error kinds
pub(crate) async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(300).collect();
    let detail = format!("HTTP {}: {}", status, snippet);

    Err(match status.as_u16() {
        404 => ProviderError::NotFound(detail),
        401 | 403 | 429 => ProviderError::Auth(detail),
        408 => ProviderError::Transient(detail),
        s if s >= 500 => ProviderError::Transient(detail),
        // request rejected as malformed by the remote side
        _ => ProviderError::MalformedResponse(detail),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::for_url("https://www.youtube.com/watch?v=abc")
    }

    fn table() -> ProviderTable<dyn Transcriber> {
        let mut table: ProviderTable<dyn Transcriber> = ProviderTable::new(Capability::Transcribe);
        table.register(
            "ready",
            |_| Availability::Ready,
            |_| Ok(Arc::new(transcribe::mock::MockTranscriber::new()) as Arc<dyn Transcriber>),
        );
        table.register(
            "offline",
            |_| Availability::unavailable("no model"),
            |_| Ok(Arc::new(transcribe::mock::MockTranscriber::new()) as Arc<dyn Transcriber>),
        );
        table.register(
            MOCK_PROVIDER,
            |_| Availability::Ready,
            |_| Ok(Arc::new(transcribe::mock::MockTranscriber::new()) as Arc<dyn Transcriber>),
        );
        table
    }

    #[test]
    fn test_unknown_name_is_unsupported() {
        let err = table().create("whisperx", &config()).err().unwrap();
        assert!(matches!(err, RegistryError::Unsupported { capability: Capability::Transcribe, .. }));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(table().resolve("READY", &config()).unwrap(), "ready");
    }

    #[test]
    fn test_unavailable_without_fallback_fails() {
        let err = table().resolve("offline", &config()).unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable { ref reason, .. } if reason == "no model"));
    }

    #[test]
    fn test_unavailable_with_fallback_resolves_to_mock() {
        let mut config = config();
        config.app.mock_fallback = true;
        assert_eq!(table().resolve("offline", &config).unwrap(), MOCK_PROVIDER);
        assert_eq!(table().resolve("ready", &config).unwrap(), "ready");
    }

    #[test]
    fn test_mock_mode_overrides_selection() {
        let mut config = config();
        config.app.mock = true;
        assert_eq!(table().resolve("ready", &config).unwrap(), MOCK_PROVIDER);
    }

    #[test]
    fn test_default_registry_lists_builtins() {
        let registry = ProviderRegistry::new();
        assert!(registry.downloaders.contains("yt-dlp"));
        assert!(registry.transcribers.contains("whisper-cli"));
        assert!(registry.summarizers.contains("deepseek"));
        assert!(registry.publishers.contains("notion"));
        for (_, names) in registry.list() {
            assert!(names.contains(&MOCK_PROVIDER));
        }
    }

    #[test]
    fn test_generic_create_returns_matching_capability() {
        let mut config = config();
        config.app.mock = true;
        let registry = ProviderRegistry::new();
        for capability in [
            Capability::Download,
            Capability::Transcribe,
            Capability::Summarize,
            Capability::Publish,
        ] {
            let instance = registry.create(capability, "anything", &config).ok().unwrap();
            assert_eq!(instance.capability(), capability);
            assert_eq!(instance.name(), MOCK_PROVIDER);
        }
    }

    #[tokio::test]
    async fn test_with_timeout_reports_timeout() {
        let result: Result<(), ProviderError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }
}
