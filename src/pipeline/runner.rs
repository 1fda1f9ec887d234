use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use super::stages::build_stage;
use super::{ContextKey, ExecutionContext, LogObserver, NoteSet, PublishFailure, RunObserver, SavedNote, StageKind, TranscriptSet};
use crate::config::{Config, ConfigError};
use crate::error::{PipelineError, StageError};
use crate::output;
use crate::providers::{Capability, ProviderRegistry};
use crate::types::source_key_prefix;
use crate::utils::source_id_from_url;

/// Inclusive stage range a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunMode {
    pub from: StageKind,
    pub to: StageKind,
}

impl RunMode {
    pub fn new(from: StageKind, to: StageKind) -> Self {
        Self { from, to }
    }

    pub fn full() -> Self {
        Self::new(StageKind::Download, StageKind::Publish)
    }

    pub fn only(kind: StageKind) -> Self {
        Self::new(kind, kind)
    }

    /// From `kind` through Publish
    pub fn from(kind: StageKind) -> Self {
        Self::new(kind, StageKind::Publish)
    }

    pub fn stages(&self) -> Vec<StageKind> {
        StageKind::ALL
            .into_iter()
            .filter(|kind| *kind >= self.from && *kind <= self.to)
            .collect()
    }
}

impl Default for RunMode {
    fn default() -> Self {
        Self::full()
    }
}

#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub kind: StageKind,
    pub elapsed: Duration,
    /// Set when the stage hit a non-fatal error
    pub warning: Option<String>,
}

/// What a completed run produced
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub stages: Vec<StageOutcome>,
    pub notes: Vec<PathBuf>,
    pub skipped_transcripts: Vec<u32>,
    pub skipped_summaries: Vec<u32>,
    pub publish_enabled: bool,
    pub published: Vec<String>,
    pub publish_failures: Vec<PublishFailure>,
}

impl RunReport {
    fn collect(stages: Vec<StageOutcome>, ctx: &ExecutionContext) -> Self {
        let mut report = RunReport {
            stages,
            ..RunReport::default()
        };

        if let Some(transcripts) = ctx.transcripts() {
            report.skipped_transcripts = transcripts.skipped.clone();
        }
        if let Some(notes) = ctx.notes() {
            report.notes = notes.notes.iter().map(|n| n.path.clone()).collect();
            report.skipped_summaries = notes.skipped.clone();
        }
        if let Some(published) = ctx.published() {
            report.publish_enabled = published.enabled;
            report.published = published.published.clone();
            report.publish_failures = published.failures.clone();
        }

        report
    }
}

/// Sequences stages over one execution context.
///
/// The first fatal [`StageError`] ends the run; non-fatal ones are reported
/// and the sequence continues.
pub struct Runner {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    observer: Arc<dyn RunObserver>,
}

impl Runner {
    pub fn new(config: Arc<Config>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            config,
            registry,
            observer: Arc::new(LogObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Check every provider the run will need before doing any work
    pub fn preflight(&self, mode: RunMode) -> Result<(), PipelineError> {
        for kind in mode.stages() {
            let (capability, name) = match kind {
                StageKind::Download => (Capability::Download, &self.config.download.provider),
                StageKind::Transcribe => (Capability::Transcribe, &self.config.transcribe.provider),
                StageKind::Summarize => (Capability::Summarize, &self.config.summarize.provider),
                StageKind::Publish if self.config.publish.enabled => {
                    (Capability::Publish, &self.config.publish.provider)
                }
                StageKind::Publish => continue,
            };

            let resolved = self
                .registry
                .check(capability, name, &self.config)
                .map_err(|e| PipelineError {
                    stage: kind,
                    source: e.into(),
                })?;
            tracing::debug!("{} provider: {}", capability, resolved);

            if let (StageKind::Download, Some(fallback)) = (kind, &self.config.download.fallback_provider) {
                let resolved = self
                    .registry
                    .check(capability, fallback, &self.config)
                    .map_err(|e| PipelineError {
                        stage: kind,
                        source: e.into(),
                    })?;
                tracing::debug!("{} fallback provider: {}", capability, resolved);
            }
        }
        Ok(())
    }

    /// Run `mode` on a fresh context
    pub async fn run(&self, mode: RunMode) -> Result<RunReport, PipelineError> {
        let mut ctx = ExecutionContext::new();
        self.run_with(mode, &mut ctx).await
    }

    /// Run `mode` on a caller-supplied context, which may be pre-seeded
    pub async fn run_with(&self, mode: RunMode, ctx: &mut ExecutionContext) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", id = %run_id, from = %mode.from, to = %mode.to);
        self.execute(mode, ctx).instrument(span).await
    }

    async fn execute(&self, mode: RunMode, ctx: &mut ExecutionContext) -> Result<RunReport, PipelineError> {
        let stages = mode.stages();
        if stages.is_empty() {
            return Err(PipelineError {
                stage: mode.from,
                source: StageError::Config(ConfigError::Invalid {
                    field: "stages",
                    reason: format!("'{}' comes after '{}'", mode.from, mode.to),
                }),
            });
        }

        self.preflight(mode)?;
        self.seed(mode.from, ctx).await;

        let run_started = Instant::now();
        let mut outcomes = Vec::with_capacity(stages.len());

        for kind in stages {
            if ctx.is_cancelled() {
                return Err(self.fail(kind, StageError::Cancelled(kind)));
            }

            let stage = build_stage(kind, self.config.clone(), self.registry.clone());
            if let Some(key) = stage.requires().iter().find(|key| !ctx.has(**key)) {
                return Err(self.fail(kind, StageError::MissingInput { stage: kind, key: *key }));
            }

            self.observer.stage_started(kind);
            let started = Instant::now();
            let result = stage.run(ctx).await;
            let elapsed = started.elapsed();

            match result {
                Ok(()) => {
                    self.observer.stage_finished(kind, elapsed);
                    outcomes.push(StageOutcome {
                        kind,
                        elapsed,
                        warning: None,
                    });
                }
                Err(err) if !err.is_fatal() => {
                    self.observer.stage_failed(kind, &err);
                    outcomes.push(StageOutcome {
                        kind,
                        elapsed,
                        warning: Some(err.to_string()),
                    });
                }
                Err(err) => return Err(self.fail(kind, err)),
            }
        }

        self.observer.run_finished(run_started.elapsed());
        Ok(RunReport::collect(outcomes, ctx))
    }

    fn fail(&self, stage: StageKind, source: StageError) -> PipelineError {
        self.observer.stage_failed(stage, &source);
        PipelineError { stage, source }
    }

    /// Load persisted artifacts for runs that skip the producing stages
    async fn seed(&self, from: StageKind, ctx: &mut ExecutionContext) {
        match from {
            StageKind::Summarize if !ctx.has(ContextKey::Transcripts) => {
                let dir = &self.config.transcribe.transcripts_dir;
                let prefix = source_key_prefix(&source_id_from_url(&self.config.source.url));
                let loaded = output::load_all_transcripts(dir).await.map(|all| {
                    let total = all.len();
                    let own: Vec<_> = all.into_iter().filter(|t| t.stable_key.starts_with(&prefix)).collect();
                    if own.len() < total {
                        tracing::debug!("Ignoring {} cached transcript(s) of other sources", total - own.len());
                    }
                    own
                });
                match loaded {
                    Ok(parts) if !parts.is_empty() => {
                        tracing::info!("Seeded {} transcript(s) from {}", parts.len(), dir.display());
                        ctx.set_transcripts(TranscriptSet {
                            parts,
                            skipped: Vec::new(),
                        });
                    }
                    Ok(_) => tracing::warn!("No cached transcripts for {} in {}", prefix, dir.display()),
                    Err(e) => tracing::warn!("Could not load transcripts from {}: {}", dir.display(), e),
                }
            }
            StageKind::Publish if !ctx.has(ContextKey::Notes) => {
                let dir = &self.config.output.notes_dir;
                let source_url = self.config.source.url.as_str();
                let loaded = output::load_notes(dir).await.map(|all| {
                    all.into_iter()
                        .filter(|(_, note)| note.metadata.get("source_url").and_then(|v| v.as_str()) == Some(source_url))
                        .collect::<Vec<_>>()
                });
                match loaded {
                    Ok(notes) if !notes.is_empty() => {
                        tracing::info!("Seeded {} note(s) from {}", notes.len(), dir.display());
                        let notes = notes
                            .into_iter()
                            .map(|(path, note)| SavedNote {
                                index: note
                                    .metadata
                                    .get("part")
                                    .and_then(|v| v.as_u64())
                                    .map(|i| i as u32),
                                path,
                                note,
                            })
                            .collect();
                        ctx.set_notes(NoteSet {
                            notes,
                            skipped: Vec::new(),
                        });
                    }
                    Ok(_) => tracing::warn!("No notes for {} in {}", source_url, dir.display()),
                    Err(e) => tracing::warn!("Could not load notes from {}: {}", dir.display(), e),
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::providers::{Availability, Publisher, Transcriber, MOCK_PROVIDER};
    use crate::types::{Note, Transcript};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};
    use tokio_util::sync::CancellationToken;

    /// Fails every part whose file name contains one of the markers
    struct FailingTranscriber {
        markers: Vec<String>,
    }

    #[async_trait]
    impl Transcriber for FailingTranscriber {
        async fn transcribe(&self, audio: &Path, _: Option<&str>) -> Result<Transcript, ProviderError> {
            let name = audio.to_string_lossy();
            if self.markers.iter().any(|m| name.contains(m.as_str())) {
                return Err(ProviderError::Transient("model overloaded".into()));
            }
            Ok(Transcript::from_text(format!("words from {}", name)))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct RejectingPublisher;

    #[async_trait]
    impl Publisher for RejectingPublisher {
        async fn publish(&self, _: &Note) -> Result<bool, ProviderError> {
            Err(ProviderError::Auth("401 Unauthorized".into()))
        }

        fn name(&self) -> &'static str {
            "rejecting"
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        started: Mutex<Vec<StageKind>>,
    }

    impl RecordingObserver {
        fn started(&self) -> Vec<StageKind> {
            self.started.lock().unwrap().clone()
        }
    }

    impl RunObserver for RecordingObserver {
        fn stage_started(&self, kind: StageKind) {
            self.started.lock().unwrap().push(kind);
        }
    }

    fn config(dir: &TempDir, parts: u32) -> Config {
        let mut config = Config::for_url("https://example.com/list/course");
        config.download.provider = MOCK_PROVIDER.to_string();
        config.download.mock_parts = parts;
        config.download.dir = dir.path().join("downloads");
        config.transcribe.provider = MOCK_PROVIDER.to_string();
        config.transcribe.extract_audio = false;
        config.transcribe.transcripts_dir = dir.path().join("transcripts");
        config.summarize.provider = MOCK_PROVIDER.to_string();
        config.output.notes_dir = dir.path().join("notes");
        config
    }

    fn registry(failing: &[&str]) -> ProviderRegistry {
        let markers: Vec<String> = failing.iter().map(|s| s.to_string()).collect();
        let mut registry = ProviderRegistry::new();
        registry.transcribers.register(
            "failing",
            |_| Availability::Ready,
            move |_| {
                Ok(Arc::new(FailingTranscriber {
                    markers: markers.clone(),
                }) as Arc<dyn Transcriber>)
            },
        );
        registry.publishers.register(
            "rejecting",
            |_| Availability::Ready,
            |_| Ok(Arc::new(RejectingPublisher) as Arc<dyn Publisher>),
        );
        registry
    }

    fn runner(config: Config, registry: ProviderRegistry) -> Runner {
        Runner::new(Arc::new(config), Arc::new(registry))
    }

    #[test]
    fn test_run_mode_ranges() {
        assert_eq!(RunMode::full().stages(), StageKind::ALL.to_vec());
        assert_eq!(RunMode::only(StageKind::Summarize).stages(), vec![StageKind::Summarize]);
        assert_eq!(
            RunMode::from(StageKind::Summarize).stages(),
            vec![StageKind::Summarize, StageKind::Publish]
        );
        assert!(RunMode::new(StageKind::Publish, StageKind::Download).stages().is_empty());
    }

    #[tokio::test]
    async fn test_full_mock_run() {
        let dir = TempDir::new().unwrap();
        let report = assert_ok!(runner(config(&dir, 0), registry(&[])).run(RunMode::full()).await);

        assert_eq!(report.stages.len(), 4);
        assert_eq!(report.notes.len(), 1);
        assert!(report.notes[0].exists());
        assert!(!report.publish_enabled);
    }

    #[tokio::test]
    async fn test_one_failed_part_completes_run() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, 5);
        config.transcribe.provider = "failing".to_string();

        let report = assert_ok!(runner(config, registry(&["-p003"])).run(RunMode::full()).await);

        assert_eq!(report.skipped_transcripts, vec![3]);
        assert_eq!(report.notes.len(), 4);
    }

    #[tokio::test]
    async fn test_all_transcriptions_failing_stops_before_summarize() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, 2);
        config.transcribe.provider = "failing".to_string();
        let observer = Arc::new(RecordingObserver::default());

        let err = assert_err!(
            runner(config, registry(&["-p001", "-p002"]))
                .with_observer(observer.clone())
                .run(RunMode::full())
                .await
        );

        assert_eq!(err.stage, StageKind::Transcribe);
        assert!(matches!(err.source, StageError::Transcription { .. }));
        assert_eq!(observer.started(), vec![StageKind::Download, StageKind::Transcribe]);
        assert!(!dir.path().join("notes").exists());
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, 0);
        config.publish.enabled = true;
        config.publish.provider = "rejecting".to_string();

        let report = assert_ok!(runner(config, registry(&[])).run(RunMode::full()).await);

        assert!(report.publish_enabled);
        assert!(report.published.is_empty());
        assert_eq!(report.publish_failures.len(), 1);
        assert!(report.stages[3].warning.is_some());
        assert!(report.notes[0].exists());
    }

    #[tokio::test]
    async fn test_partial_runs_seed_from_disk() {
        let dir = TempDir::new().unwrap();

        let first = runner(config(&dir, 2), registry(&[]));
        assert_ok!(first.run(RunMode::new(StageKind::Download, StageKind::Transcribe)).await);

        let second = runner(config(&dir, 2), registry(&[]));
        let report = assert_ok!(second.run(RunMode::only(StageKind::Summarize)).await);
        assert_eq!(report.notes.len(), 2);

        let mut publish_config = config(&dir, 2);
        publish_config.publish.enabled = true;
        publish_config.publish.provider = MOCK_PROVIDER.to_string();
        let report = assert_ok!(runner(publish_config, registry(&[])).run(RunMode::only(StageKind::Publish)).await);
        assert_eq!(report.published.len(), 2);
    }

    #[tokio::test]
    async fn test_seeding_ignores_other_sources() {
        let dir = TempDir::new().unwrap();
        let for_source = |url: &str| {
            let mut config = config(&dir, 2);
            config.source.url = url.to_string();
            config
        };
        let alpha = "https://example.com/v/alpha";
        let beta = "https://example.com/v/beta";

        let through_transcribe = RunMode::new(StageKind::Download, StageKind::Transcribe);
        assert_ok!(runner(for_source(alpha), registry(&[])).run(through_transcribe).await);
        assert_ok!(runner(for_source(beta), registry(&[])).run(through_transcribe).await);
        assert_eq!(
            output::load_all_transcripts(&dir.path().join("transcripts")).await.unwrap().len(),
            4
        );

        let report = assert_ok!(
            runner(for_source(beta), registry(&[]))
                .run(RunMode::only(StageKind::Summarize))
                .await
        );
        assert_eq!(report.notes.len(), 2);

        let foreign = Note::new("Alpha Recap", Vec::new()).with_metadata("source_url", alpha);
        assert_ok!(output::save_note(&foreign, &dir.path().join("notes")).await);

        let mut publish_config = for_source(beta);
        publish_config.publish.enabled = true;
        publish_config.publish.provider = MOCK_PROVIDER.to_string();
        let report = assert_ok!(
            runner(publish_config, registry(&[]))
                .run(RunMode::only(StageKind::Publish))
                .await
        );
        assert_eq!(report.published.len(), 2);
        assert!(!report.published.iter().any(|title| title == "Alpha Recap"));
    }

    #[tokio::test]
    async fn test_transcribe_without_seed_is_missing_input() {
        let dir = TempDir::new().unwrap();
        let err = assert_err!(
            runner(config(&dir, 0), registry(&[]))
                .run(RunMode::only(StageKind::Transcribe))
                .await
        );
        assert!(matches!(
            err.source,
            StageError::MissingInput {
                key: ContextKey::Media,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_preflight_rejects_unknown_provider_before_work() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, 0);
        config.summarize.provider = "nonexistent".to_string();

        let err = assert_err!(runner(config, registry(&[])).run(RunMode::full()).await);
        assert_eq!(err.stage, StageKind::Summarize);
        assert!(matches!(err.source, StageError::UnsupportedProvider { .. }));
        assert!(!dir.path().join("downloads").exists());
    }

    #[tokio::test]
    async fn test_preflight_rejects_unknown_fallback_downloader() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, 0);
        config.download.fallback_provider = Some("yt-dlq".to_string());

        let err = assert_err!(runner(config, registry(&[])).run(RunMode::full()).await);
        assert_eq!(err.stage, StageKind::Download);
        assert!(matches!(err.source, StageError::UnsupportedProvider { .. }));
        assert!(!dir.path().join("downloads").exists());
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_at_first_stage() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let mut ctx = ExecutionContext::with_cancellation(token);

        let err = assert_err!(
            runner(config(&dir, 0), registry(&[]))
                .run_with(RunMode::full(), &mut ctx)
                .await
        );
        assert!(matches!(err.source, StageError::Cancelled(StageKind::Download)));
    }
}
