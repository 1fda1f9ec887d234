use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, SummarizeMode};
use crate::error::StageError;
use crate::output;
use crate::pipeline::{ContextKey, ExecutionContext, NoteSet, SavedNote, Stage, StageKind};
use crate::providers::{with_timeout, ProviderRegistry, Summarizer};
use crate::types::{Note, PartTranscript};

/// Turns transcripts into markdown notes, one per part or one merged note
pub struct SummarizeStage {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
}

/// Per-run facts every note carries
struct NoteContext {
    source_url: String,
    media_title: String,
    multi_part: bool,
}

impl SummarizeStage {
    pub fn new(config: Arc<Config>, registry: Arc<ProviderRegistry>) -> Self {
        Self { config, registry }
    }

    fn note_context(&self, ctx: &ExecutionContext, parts: &[PartTranscript]) -> NoteContext {
        match ctx.media() {
            Some(media) => NoteContext {
                source_url: media.source_url.clone(),
                media_title: media.title.clone(),
                multi_part: media.is_multi_part(),
            },
            None => NoteContext {
                source_url: self.config.source.url.clone(),
                media_title: parts.first().map(|p| p.title.clone()).unwrap_or_default(),
                multi_part: parts.len() > 1,
            },
        }
    }

    /// Final title, with the summarizer's own title kept as metadata
    fn finish_note(&self, mut note: Note, title: String, info: &NoteContext, summarizer: &str) -> Note {
        let generated = std::mem::replace(&mut note.title, title);
        if !generated.is_empty() && generated != note.title {
            note.metadata
                .insert("generated_title".to_string(), serde_json::json!(generated));
        }

        note.with_metadata("source_url", info.source_url.clone())
            .with_metadata("summarizer", summarizer)
            .with_metadata("created_at", chrono::Local::now().to_rfc3339())
    }

    async fn save(&self, note: Note, index: Option<u32>) -> Result<SavedNote, String> {
        let path = output::save_note(&note, &self.config.output.notes_dir)
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!("Wrote {}", path.display());
        Ok(SavedNote { index, path, note })
    }

    async fn summarize_parts(
        &self,
        ctx: &ExecutionContext,
        parts: &[PartTranscript],
        summarizer: &dyn Summarizer,
    ) -> Result<(NoteSet, Option<String>), StageError> {
        let info = self.note_context(ctx, parts);
        let timeout = self.config.provider_timeout();
        let mut set = NoteSet::default();
        let mut last_error = None;

        for part in parts {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled(StageKind::Summarize));
            }

            tracing::info!("Part {}: summarizing with {}", part.index, summarizer.name());
            let frames = ctx.frames_for(part.index);
            let text = part.transcript.full_text();

            let result = match with_timeout(timeout, summarizer.summarize(&text, frames)).await {
                Ok(note) => {
                    let title = if info.multi_part {
                        format!("P{:02} {}", part.index, part.title)
                    } else {
                        info.media_title.clone()
                    };
                    let note = self
                        .finish_note(note, title, &info, summarizer.name())
                        .with_metadata("part", part.index)
                        .with_metadata("part_title", part.title.clone());
                    self.save(note, Some(part.index)).await
                }
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(saved) => set.notes.push(saved),
                Err(reason) => {
                    tracing::warn!("Part {}: summarization failed, skipping: {}", part.index, reason);
                    set.skipped.push(part.index);
                    last_error = Some(reason);
                }
            }
        }

        Ok((set, last_error))
    }

    async fn summarize_merged(
        &self,
        ctx: &ExecutionContext,
        parts: &[PartTranscript],
        summarizer: &dyn Summarizer,
    ) -> Result<(NoteSet, Option<String>), StageError> {
        if ctx.is_cancelled() {
            return Err(StageError::Cancelled(StageKind::Summarize));
        }

        let info = self.note_context(ctx, parts);
        let text = merged_text(parts);
        let frames: Vec<String> = parts
            .iter()
            .flat_map(|p| ctx.frames_for(p.index).iter().cloned())
            .collect();

        tracing::info!("Summarizing {} part(s) as one note with {}", parts.len(), summarizer.name());
        let result = match with_timeout(self.config.provider_timeout(), summarizer.summarize(&text, &frames)).await {
            Ok(note) => {
                let note = self
                    .finish_note(note, info.media_title.clone(), &info, summarizer.name())
                    .with_metadata("parts", parts.len());
                self.save(note, None).await
            }
            Err(e) => Err(e.to_string()),
        };

        let mut set = NoteSet::default();
        match result {
            Ok(saved) => {
                set.notes.push(saved);
                Ok((set, None))
            }
            Err(reason) => {
                tracing::warn!("Merged summarization failed: {}", reason);
                set.skipped = parts.iter().map(|p| p.index).collect();
                Ok((set, Some(reason)))
            }
        }
    }
}

/// All transcripts as one text; multi-part input gets a header per part
fn merged_text(parts: &[PartTranscript]) -> String {
    if let [only] = parts {
        return only.transcript.full_text();
    }

    parts
        .iter()
        .map(|p| format!("## P{:02} {}\n\n{}", p.index, p.title, p.transcript.full_text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Stage for SummarizeStage {
    fn kind(&self) -> StageKind {
        StageKind::Summarize
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Transcripts]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::Notes]
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        let parts = ctx.require_transcripts(StageKind::Summarize)?.parts.clone();
        let summarizer = self
            .registry
            .summarizers
            .create(&self.config.summarize.provider, &self.config)?;

        let (set, last_error) = match self.config.summarize.mode {
            SummarizeMode::PerPart => self.summarize_parts(ctx, &parts, summarizer.as_ref()).await?,
            SummarizeMode::Merged => self.summarize_merged(ctx, &parts, summarizer.as_ref()).await?,
        };

        if set.notes.is_empty() {
            return Err(StageError::Summarization {
                failed: set.skipped,
                reason: last_error.unwrap_or_else(|| "no transcripts to summarize".to_string()),
            });
        }

        tracing::info!("Wrote {} note(s), skipped {:?}", set.notes.len(), set.skipped);
        ctx.set_notes(set);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::pipeline::TranscriptSet;
    use crate::providers::{Availability, MOCK_PROVIDER};
    use crate::types::{MediaReference, NoteSection, Transcript};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Refuses any text mentioning "poison"
    struct PickySummarizer;

    #[async_trait]
    impl Summarizer for PickySummarizer {
        async fn summarize(&self, text: &str, frame_refs: &[String]) -> Result<Note, ProviderError> {
            if text.contains("poison") {
                return Err(ProviderError::MalformedResponse("refused".into()));
            }
            Ok(Note::new("Generated", vec![NoteSection::new("Summary", text)]).with_frames(frame_refs.to_vec()))
        }

        fn name(&self) -> &'static str {
            "picky"
        }
    }

    fn transcript(index: u32, text: &str) -> PartTranscript {
        PartTranscript {
            index,
            title: format!("Lesson {}", index),
            stable_key: format!("course-p{:03}", index),
            transcript: Transcript::from_text(text),
        }
    }

    fn stage(dir: &TempDir, mode: SummarizeMode) -> SummarizeStage {
        let mut config = Config::for_url("https://example.com/list/course");
        config.summarize.provider = "picky".to_string();
        config.summarize.mode = mode;
        config.output.notes_dir = dir.path().join("notes");

        let mut registry = ProviderRegistry::new();
        registry.summarizers.register(
            "picky",
            |_| Availability::Ready,
            |_| Ok(Arc::new(PickySummarizer) as Arc<dyn Summarizer>),
        );
        SummarizeStage::new(Arc::new(config), Arc::new(registry))
    }

    fn context(texts: &[&str]) -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.set_media(MediaReference::with_parts(
            "https://example.com/list/course",
            "course",
            "Course",
            (1..=texts.len()).map(|i| (format!("id{}", i), format!("Lesson {}", i))),
        ));
        ctx.set_transcripts(TranscriptSet {
            parts: texts
                .iter()
                .enumerate()
                .map(|(i, t)| transcript(i as u32 + 1, t))
                .collect(),
            skipped: Vec::new(),
        });
        ctx
    }

    #[tokio::test]
    async fn test_per_part_notes_are_titled_and_saved() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&["first", "second"]);
        ctx.set_frames(BTreeMap::from([(2, vec!["f1.jpg".to_string()])]));

        stage(&dir, SummarizeMode::PerPart).run(&mut ctx).await.unwrap();

        let notes = &ctx.notes().unwrap().notes;
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].note.title, "P01 Lesson 1");
        assert_eq!(notes[1].index, Some(2));
        assert_eq!(notes[1].note.frame_refs, vec!["f1.jpg".to_string()]);
        assert_eq!(notes[0].note.metadata["generated_title"], serde_json::json!("Generated"));
        assert_eq!(notes[0].note.metadata["summarizer"], serde_json::json!("picky"));
        assert!(notes[0].path.exists());
    }

    #[tokio::test]
    async fn test_failed_part_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&["ok", "poison", "ok too"]);

        stage(&dir, SummarizeMode::PerPart).run(&mut ctx).await.unwrap();

        let set = ctx.notes().unwrap();
        assert_eq!(set.notes.iter().filter_map(|n| n.index).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(set.skipped, vec![2]);
    }

    #[tokio::test]
    async fn test_all_failed_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&["poison"]);

        let err = stage(&dir, SummarizeMode::PerPart).run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, StageError::Summarization { .. }));
        assert!(!ctx.has(ContextKey::Notes));
    }

    #[tokio::test]
    async fn test_merged_mode_writes_one_note() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&["alpha", "beta"]);

        stage(&dir, SummarizeMode::Merged).run(&mut ctx).await.unwrap();

        let notes = &ctx.notes().unwrap().notes;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].index, None);
        assert_eq!(notes[0].note.title, "Course");
        let body = &notes[0].note.sections[0].body;
        assert!(body.contains("## P01 Lesson 1"));
        assert!(body.contains("beta"));
    }

    #[tokio::test]
    async fn test_single_part_without_media_uses_part_title() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::new();
        ctx.set_transcripts(TranscriptSet {
            parts: vec![transcript(1, "hello")],
            skipped: Vec::new(),
        });

        stage(&dir, SummarizeMode::PerPart).run(&mut ctx).await.unwrap();
        assert_eq!(ctx.notes().unwrap().notes[0].note.title, "Lesson 1");
    }

    #[tokio::test]
    async fn test_mock_provider_resolves() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::for_url("https://example.com/v");
        config.summarize.provider = MOCK_PROVIDER.to_string();
        config.output.notes_dir = dir.path().to_path_buf();
        let stage = SummarizeStage::new(Arc::new(config), Arc::new(ProviderRegistry::new()));

        let mut ctx = context(&["text"]);
        stage.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.notes().unwrap().notes.len(), 1);
    }
}
