use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::StageError;
use crate::pipeline::{ContextKey, ExecutionContext, Stage, StageKind};
use crate::providers::{with_timeout, Downloader, ProviderRegistry};
use crate::reconcile::{Reconciled, Reconciler};
use crate::types::{FetchedMedia, MediaReference};

/// Resolves the source and reconciles the download directory against it
pub struct DownloadStage {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
}

impl DownloadStage {
    pub fn new(config: Arc<Config>, registry: Arc<ProviderRegistry>) -> Self {
        Self { config, registry }
    }

    async fn download_with(
        &self,
        downloader: &dyn Downloader,
        seeded: Option<&MediaReference>,
    ) -> Result<(MediaReference, Reconciled), StageError> {
        let url = &self.config.source.url;
        let timeout = self.config.provider_timeout();

        let media = match seeded {
            Some(media) => media.clone(),
            None => {
                tracing::info!("Resolving {} with {}", url, downloader.name());
                with_timeout(timeout, downloader.resolve(url))
                    .await
                    .map_err(|source| StageError::Download {
                        url: url.clone(),
                        source,
                    })?
            }
        };

        if media.is_multi_part() {
            tracing::info!("'{}' has {} parts", media.title, media.parts.len());
        }

        let reconciled = Reconciler::new(&media, &self.config.download.dir)
            .reconcile(downloader, timeout)
            .await?;

        Ok((media, reconciled))
    }
}

#[async_trait]
impl Stage for DownloadStage {
    fn kind(&self) -> StageKind {
        StageKind::Download
    }

    fn requires(&self) -> &'static [ContextKey] {
        &[]
    }

    fn produces(&self) -> &'static [ContextKey] {
        &[ContextKey::Media, ContextKey::Video]
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StageError> {
        let settings = &self.config.download;
        let primary = self.registry.downloaders.create(&settings.provider, &self.config)?;

        let mut provider = primary.name();
        let outcome = match self.download_with(primary.as_ref(), ctx.media()).await {
            Ok(outcome) => outcome,
            Err(err @ (StageError::Download { .. } | StageError::IncompleteMedia { .. })) => {
                let Some(fallback_name) = settings.fallback_provider.as_deref() else {
                    return Err(err);
                };
                tracing::warn!("{}; retrying once with fallback provider '{}'", err, fallback_name);

                let fallback = self.registry.downloaders.create(fallback_name, &self.config)?;
                provider = fallback.name();
                self.download_with(fallback.as_ref(), None).await?
            }
            Err(err) => return Err(err),
        };
        let (media, reconciled) = outcome;

        let mut metadata = BTreeMap::new();
        metadata.insert("source_url".to_string(), json!(media.source_url));
        metadata.insert("source_id".to_string(), json!(media.source_id));
        metadata.insert("title".to_string(), json!(media.title));
        metadata.insert("parts".to_string(), json!(media.effective_parts().len()));
        metadata.insert("provider".to_string(), json!(provider));
        metadata.insert("fetch_requests".to_string(), json!(reconciled.fetch_requests));
        metadata.insert("missing_before".to_string(), json!(reconciled.missing_before));
        if let Some(range) = reconciled.requested_range {
            metadata.insert("requested_range".to_string(), json!(range.to_string()));
        }

        let video = FetchedMedia::new(reconciled.paths, metadata).ok_or_else(|| StageError::IncompleteMedia {
            missing: media.effective_parts().iter().map(|p| p.index).collect(),
        })?;

        tracing::info!(
            "{} file(s) ready in {} ({} fetch request(s))",
            video.all_paths.len(),
            self.config.download.dir.display(),
            reconciled.fetch_requests
        );

        ctx.set_media(media);
        ctx.set_video(video);
        Ok(())
    }
}
