use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::error::StageError;
use crate::pipeline::{ContextKey, ExecutionContext, PublishFailure, PublishSummary, Stage, StageKind};
use crate::providers::{with_timeout, ProviderRegistry};

/// Pushes saved notes to the configured destination.
///
/// Best-effort: a note that fails to publish is recorded and the remaining
/// notes are still attempted. The local markdown files are never touched.
pub struct PublishStage {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
}

impl PublishStage {
    pub fn new(config: Arc<Config>, registry: Arc<ProviderRegistry>) -> Self {
        Self { config, registry }
    }
}

#[async_trait]
impl Stage for PublishStage {
    fn kind(&self) -> StageKind {
        StageKind::Publish
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[ContextKey::Notes]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::Published]
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        let notes = ctx.require_notes(StageKind::Publish)?.notes.clone();

        if !self.config.publish.enabled {
            tracing::info!("Publishing disabled, {} note(s) kept locally", notes.len());
            ctx.set_published(PublishSummary::default());
            return Ok(());
        }

        let publisher = self
            .registry
            .publishers
            .create(&self.config.publish.provider, &self.config)?;
        let timeout = self.config.provider_timeout();

        let mut summary = PublishSummary {
            enabled: true,
            ..PublishSummary::default()
        };

        for saved in &notes {
            if ctx.is_cancelled() {
                return Err(StageError::Cancelled(StageKind::Publish));
            }

            let title = saved.note.title.clone();
            let reason = match with_timeout(timeout, publisher.publish(&saved.note)).await {
                Ok(true) => {
                    tracing::info!("Published '{}' via {}", title, publisher.name());
                    summary.published.push(title);
                    continue;
                }
                Ok(false) => format!("declined by {}", publisher.name()),
                Err(e) => e.to_string(),
            };

            tracing::warn!("Could not publish '{}': {}", title, reason);
            summary.failures.push(PublishFailure { title, reason });
        }

        let first_failure = summary.failures.first().cloned();
        let failed = summary.failures.len();
        ctx.set_published(summary);

        match first_failure {
            None => Ok(()),
            Some(failure) => Err(StageError::Sync {
                title: failure.title,
                reason: format!("{} ({} of {} note(s) not published)", failure.reason, failed, notes.len()),
            }),
        }
    }
}
