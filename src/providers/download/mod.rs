use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub mod local;
pub mod mock;
pub mod ytdlp;

use super::{Availability, ProviderTable, MOCK_PROVIDER};
use crate::error::ProviderError;
use crate::types::{MediaReference, PartRange};

/// Turns a source URL into media files on disk.
///
/// Providers only resolve metadata and fetch what they are asked for. Which
/// parts need fetching is decided by the reconciliation engine, so a
/// provider never has to know what is already on disk.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Resolve the source's title and ordered part list
    async fn resolve(&self, url: &str) -> Result<MediaReference, ProviderError>;

    /// Fetch the parts in `range` (every part when `None`) into `dest`.
    ///
    /// Each written file name must contain the part's `stable_key`.
    async fn fetch(
        &self,
        media: &MediaReference,
        range: Option<PartRange>,
        dest: &Path,
    ) -> Result<(), ProviderError>;

    fn name(&self) -> &'static str;
}

pub fn register_defaults(table: &mut ProviderTable<dyn Downloader>) {
    // youtube and bilibili sources both go through yt-dlp
    for name in ["yt-dlp", "youtube", "bilibili"] {
        table.register(
            name,
            |_| Availability::of_command("yt-dlp"),
            |config| Ok(Arc::new(ytdlp::YtDlpDownloader::from_config(config)) as Arc<dyn Downloader>),
        );
    }

    table.register(
        "local",
        |_| Availability::Ready,
        |_| Ok(Arc::new(local::LocalDownloader::new()) as Arc<dyn Downloader>),
    );

    table.register(
        MOCK_PROVIDER,
        |_| Availability::Ready,
        |config| {
            Ok(Arc::new(mock::MockDownloader::new(config.download.mock_parts)) as Arc<dyn Downloader>)
        },
    );
}

/// Parts of `media` selected by `range`, in index order
pub(crate) fn parts_in_range(
    media: &MediaReference,
    range: Option<PartRange>,
) -> Vec<crate::types::PartInfo> {
    media
        .effective_parts()
        .iter()
        .filter(|part| range.map_or(true, |r| r.contains(part.index)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_in_range() {
        let media = MediaReference::with_parts("u", "s", "t", (1..=5).map(|i| (i.to_string(), format!("P{}", i))));
        let indices: Vec<u32> = parts_in_range(&media, Some(PartRange::new(2, 4)))
            .iter()
            .map(|p| p.index)
            .collect();
        assert_eq!(indices, vec![2, 3, 4]);
        assert_eq!(parts_in_range(&media, None).len(), 5);

        let single = MediaReference::single("u", "s", "t");
        assert_eq!(parts_in_range(&single, None).len(), 1);
    }
}
