use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{ProviderError, StageError};
use crate::media;
use crate::output;
use crate::pipeline::{ContextKey, ExecutionContext, Stage, StageKind, TranscriptSet};
use crate::providers::{with_timeout, ProviderRegistry, Transcriber};
use crate::types::{PartInfo, PartTranscript};
use crate::utils::format_duration;

/// Transcribes every downloaded part, optionally extracting key frames
pub struct TranscribeStage {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
}

/// One part's input
struct PartJob {
    part: PartInfo,
    media_path: PathBuf,
}

struct PartResult {
    index: u32,
    transcript: Result<PartTranscript, ProviderError>,
    frames: Vec<String>,
}

impl TranscribeStage {
    pub fn new(config: Arc<Config>, registry: Arc<ProviderRegistry>) -> Self {
        Self { config, registry }
    }

    async fn process_part(&self, job: PartJob, transcriber: &dyn Transcriber) -> PartResult {
        let index = job.part.index;
        let frames = self.key_frames(&job).await;
        let transcript = self.transcribe_part(&job, transcriber).await;

        PartResult {
            index,
            transcript,
            frames,
        }
    }

    async fn transcribe_part(
        &self,
        job: &PartJob,
        transcriber: &dyn Transcriber,
    ) -> Result<PartTranscript, ProviderError> {
        let settings = &self.config.transcribe;
        let part = &job.part;

        if settings.reuse_cached {
            if let Some(cached) = output::load_cached_transcript(&settings.transcripts_dir, &part.stable_key).await {
                tracing::info!("Part {}: using cached transcript", part.index);
                return Ok(cached);
            }
        }

        let audio = self.prepare_audio(job).await?;

        tracing::info!("Part {}: transcribing with {}", part.index, transcriber.name());
        let transcript = with_timeout(
            self.config.provider_timeout(),
            transcriber.transcribe(&audio, self.config.source.language.as_deref()),
        )
        .await?;

        if transcript.is_empty() {
            return Err(ProviderError::MalformedResponse(format!(
                "empty transcript for {}",
                audio.display()
            )));
        }

        if transcript.has_timing() {
            tracing::info!(
                "Part {}: {} segment(s) covering {}",
                part.index,
                transcript.segments.len(),
                format_duration(transcript.duration_sec())
            );
        }

        let part_transcript = PartTranscript {
            index: part.index,
            title: part.title.clone(),
            stable_key: part.stable_key.clone(),
            transcript,
        };

        // The transcript is still usable when the cache cannot be written
        if let Err(e) = output::save_transcript(&settings.transcripts_dir, &part_transcript).await {
            tracing::warn!("Part {}: could not cache transcript: {}", part.index, e);
        }

        Ok(part_transcript)
    }

    /// Audio file handed to the transcriber
    async fn prepare_audio(&self, job: &PartJob) -> Result<PathBuf, ProviderError> {
        let settings = &self.config.transcribe;
        if !settings.extract_audio || media::is_audio_file(&job.media_path) {
            return Ok(job.media_path.clone());
        }

        // Only a finished extraction has the final name; `.wav.part` leftovers are redone
        let audio = settings.audio_dir.join(format!("{}.wav", job.part.stable_key));
        let reusable = fs_err::tokio::metadata(&audio)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        if reusable {
            tracing::debug!("Part {}: reusing {}", job.part.index, audio.display());
        } else {
            media::extract_audio(&job.media_path, &audio).await?;
        }

        Ok(audio)
    }

    /// Key frames for one part; extraction failures only lose the frames
    async fn key_frames(&self, job: &PartJob) -> Vec<String> {
        let Some(interval) = self.config.transcribe.frame_interval_secs else {
            return Vec::new();
        };

        let dir = self
            .config
            .transcribe
            .frames_dir
            .join(format!("part_{}", job.part.index));

        let existing = existing_frames(&dir).await;
        if !existing.is_empty() {
            return existing;
        }

        match media::extract_key_frames(&job.media_path, &dir, interval).await {
            Ok(frames) => frames.iter().map(|p| p.to_string_lossy().into_owned()).collect(),
            Err(e) => {
                tracing::warn!("Part {}: key frame extraction failed: {}", job.part.index, e);
                Vec::new()
            }
        }
    }
}

/// Frames from a completed extraction; staging leftovers live beside `dir`, not in it
async fn existing_frames(dir: &Path) -> Vec<String> {
    media::list_frames(dir)
        .await
        .unwrap_or_default()
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect()
}

#[async_trait]
impl Stage for TranscribeStage {
    fn kind(&self) -> StageKind {
        StageKind::Transcribe
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Media, ContextKey::Video]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::Transcripts, ContextKey::Frames]
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        let jobs: Vec<PartJob> = {
            let media = ctx.require_media(StageKind::Transcribe)?;
            let video = ctx.require_video(StageKind::Transcribe)?;

            let parts = media.effective_parts();
            if parts.len() != video.all_paths.len() {
                return Err(StageError::IncompleteMedia {
                    missing: parts
                        .iter()
                        .skip(video.all_paths.len())
                        .map(|p| p.index)
                        .collect(),
                });
            }

            parts
                .iter()
                .cloned()
                .zip(video.all_paths.iter().cloned())
                .map(|(part, media_path)| PartJob { part, media_path })
                .collect()
        };
        let total = jobs.len();
        let mut jobs = jobs.into_iter();

        let transcriber = self
            .registry
            .transcribers
            .create(&self.config.transcribe.provider, &self.config)?;
        let limit = self.config.transcribe.max_concurrency.max(1);
        let cancellation = ctx.cancellation().clone();

        tracing::info!(
            "Transcribing {} part(s), up to {} at a time",
            total,
            limit
        );

        // In-flight calls finish on cancellation; nothing new is dispatched
        let mut in_flight = FuturesUnordered::new();
        let mut results = Vec::with_capacity(total);
        let mut cancelled = false;
        loop {
            while in_flight.len() < limit && !cancelled {
                if cancellation.is_cancelled() {
                    cancelled = true;
                    break;
                }
                match jobs.next() {
                    Some(job) => in_flight.push(self.process_part(job, transcriber.as_ref())),
                    None => break,
                }
            }

            match in_flight.next().await {
                Some(result) => results.push(result),
                None => break,
            }
        }

        if cancelled {
            return Err(StageError::Cancelled(StageKind::Transcribe));
        }

        // Completion order is arbitrary; the context is always in part order
        results.sort_by_key(|r| r.index);

        let mut set = TranscriptSet::default();
        let mut frames = BTreeMap::new();
        let mut last_error = None;
        for result in results {
            match result.transcript {
                Ok(transcript) => set.parts.push(transcript),
                Err(e) => {
                    tracing::warn!("Part {}: transcription failed, skipping: {}", result.index, e);
                    set.skipped.push(result.index);
                    last_error = Some(e.to_string());
                }
            }
            if !result.frames.is_empty() {
                frames.insert(result.index, result.frames);
            }
        }

        if set.parts.is_empty() {
            return Err(StageError::Transcription {
                failed: set.skipped,
                reason: last_error.unwrap_or_else(|| "no parts to transcribe".to_string()),
            });
        }

        tracing::info!(
            "Transcribed {} part(s), skipped {:?}",
            set.parts.len(),
            set.skipped
        );

        ctx.set_transcripts(set);
        ctx.set_frames(frames);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Availability, MOCK_PROVIDER};
    use crate::types::{Segment, Transcript};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    /// Fails for configured part numbers; later parts finish first
    struct FlakyTranscriber {
        failing: Vec<u32>,
        calls: AtomicUsize,
    }

    fn part_number(path: &Path) -> u32 {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let start = name.find("-p").unwrap() + 2;
        name[start..start + 3].parse().unwrap()
    }

    #[async_trait]
    impl Transcriber for FlakyTranscriber {
        async fn transcribe(&self, audio: &Path, _: Option<&str>) -> Result<Transcript, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = part_number(audio);
            tokio::time::sleep(Duration::from_millis(5 * (10 - n as u64))).await;
            if self.failing.contains(&n) {
                return Err(ProviderError::Transient(format!("part {} failed", n)));
            }
            Ok(Transcript::new(vec![Segment {
                start_sec: 0.0,
                end_sec: 1.0,
                text: format!("part {}", n),
                confidence: None,
            }]))
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    async fn context(dir: &TempDir, parts: u32, failing: Vec<u32>, concurrency: usize) -> (TranscribeStage, ExecutionContext) {
        let mut config = Config::for_url("https://example.com/list/course");
        config.download.provider = MOCK_PROVIDER.to_string();
        config.download.mock_parts = parts;
        config.download.dir = dir.path().join("downloads");
        config.transcribe.provider = "flaky".to_string();
        config.transcribe.extract_audio = false;
        config.transcribe.transcripts_dir = dir.path().join("transcripts");
        config.transcribe.max_concurrency = concurrency;
        let config = Arc::new(config);

        let mut registry = ProviderRegistry::new();
        let failing = Arc::new(failing);
        registry.transcribers.register(
            "flaky",
            |_| Availability::Ready,
            move |_| {
                Ok(Arc::new(FlakyTranscriber {
                    failing: failing.as_ref().clone(),
                    calls: AtomicUsize::new(0),
                }) as Arc<dyn Transcriber>)
            },
        );
        let registry = Arc::new(registry);

        let mut ctx = ExecutionContext::new();
        crate::pipeline::stages::DownloadStage::new(config.clone(), registry.clone())
            .run(&mut ctx)
            .await
            .unwrap();

        (TranscribeStage::new(config, registry), ctx)
    }

    #[tokio::test]
    async fn test_interrupted_audio_extraction_is_not_reused() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::for_url("https://example.com/list/course");
        config.transcribe.extract_audio = true;
        config.transcribe.audio_dir = dir.path().join("audio");
        let stage = TranscribeStage::new(Arc::new(config), Arc::new(ProviderRegistry::new()));

        let media_path = dir.path().join("course-p001.mp4");
        fs_err::write(&media_path, b"not a video").unwrap();
        let job = PartJob {
            part: PartInfo::new("course", 1, "", "Intro"),
            media_path,
        };

        let audio = dir.path().join("audio").join(format!("{}.wav", job.part.stable_key));
        let leftover = media::staging_path(&audio);
        fs_err::create_dir_all(dir.path().join("audio")).unwrap();
        fs_err::write(&leftover, b"truncated pcm").unwrap();

        assert!(stage.prepare_audio(&job).await.is_err());
        assert!(!audio.exists());
        assert!(!leftover.exists());

        fs_err::write(&audio, b"finished pcm").unwrap();
        assert_eq!(stage.prepare_audio(&job).await.unwrap(), audio);
    }

    #[tokio::test]
    async fn test_only_completed_frame_directories_are_reused() {
        let dir = TempDir::new().unwrap();
        let frames = dir.path().join("part_1");
        let staging = media::staging_path(&frames);
        fs_err::create_dir_all(&staging).unwrap();
        fs_err::write(staging.join("frame_0001.jpg"), b"jpg").unwrap();

        assert!(existing_frames(&frames).await.is_empty());

        fs_err::rename(&staging, &frames).unwrap();
        let reused = existing_frames(&frames).await;
        assert_eq!(reused.len(), 1);
        assert!(reused[0].ends_with("frame_0001.jpg"));
    }

    #[tokio::test]
    async fn test_one_failed_part_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (stage, mut ctx) = context(&dir, 5, vec![3], 1).await;

        stage.run(&mut ctx).await.unwrap();

        let set = ctx.transcripts().unwrap();
        assert_eq!(set.parts.iter().map(|t| t.index).collect::<Vec<_>>(), vec![1, 2, 4, 5]);
        assert_eq!(set.skipped, vec![3]);
    }

    #[tokio::test]
    async fn test_all_failed_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (stage, mut ctx) = context(&dir, 2, vec![1, 2], 2).await;

        let err = stage.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, StageError::Transcription { ref failed, .. } if failed == &vec![1, 2]));
        assert!(!ctx.has(ContextKey::Transcripts));
    }

    #[tokio::test]
    async fn test_concurrent_results_are_in_part_order() {
        let dir = TempDir::new().unwrap();
        let (stage, mut ctx) = context(&dir, 6, vec![], 4).await;

        stage.run(&mut ctx).await.unwrap();

        let indices: Vec<u32> = ctx.transcripts().unwrap().parts.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_cached_transcripts_are_reused() {
        let dir = TempDir::new().unwrap();
        let (stage, mut ctx) = context(&dir, 2, vec![], 1).await;
        stage.run(&mut ctx).await.unwrap();

        // Every call fails now, so success can only come from the cache
        let (stage, mut ctx) = context(&dir, 2, vec![1, 2], 1).await;
        stage.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.transcripts().unwrap().parts.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let dir = TempDir::new().unwrap();
        let (stage, ctx) = context(&dir, 3, vec![], 1).await;

        let token = CancellationToken::new();
        let mut cancelled = ExecutionContext::with_cancellation(token.clone());
        cancelled.set_media(ctx.media().unwrap().clone());
        cancelled.set_video(ctx.video().unwrap().clone());
        token.cancel();

        let err = stage.run(&mut cancelled).await.unwrap_err();
        assert!(matches!(err, StageError::Cancelled(StageKind::Transcribe)));
    }

    #[tokio::test]
    async fn test_requires_video() {
        let dir = TempDir::new().unwrap();
        let (stage, ctx) = context(&dir, 1, vec![], 1).await;
        let mut partial = ExecutionContext::new();
        partial.set_media(ctx.media().unwrap().clone());

        let err = stage.run(&mut partial).await.unwrap_err();
        assert!(matches!(err, StageError::MissingInput { key: ContextKey::Video, .. }));
    }
}
