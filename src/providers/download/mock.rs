use async_trait::async_trait;
use std::path::Path;

use super::{parts_in_range, Downloader};
use crate::error::ProviderError;
use crate::types::{MediaReference, PartRange};
use crate::utils::source_id_from_url;

/// Offline downloader that writes placeholder files
pub struct MockDownloader {
    parts: u32,
}

impl MockDownloader {
    /// `parts == 0` resolves to single-part media
    pub fn new(parts: u32) -> Self {
        Self { parts }
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn resolve(&self, url: &str) -> Result<MediaReference, ProviderError> {
        let source_id = source_id_from_url(url);

        if self.parts == 0 {
            return Ok(MediaReference::single(url, source_id, "Mock Video"));
        }

        Ok(MediaReference::with_parts(
            url,
            source_id,
            "Mock Series",
            (1..=self.parts).map(|i| (format!("mock{}", i), format!("Mock Part {}", i))),
        ))
    }

    async fn fetch(
        &self,
        media: &MediaReference,
        range: Option<PartRange>,
        dest: &Path,
    ) -> Result<(), ProviderError> {
        fs_err::tokio::create_dir_all(dest).await?;

        for part in parts_in_range(media, range) {
            let target = dest.join(format!("{}.mp4", part.stable_key));
            fs_err::tokio::write(&target, format!("mock media for part {}", part.index)).await?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_resolves_declared_parts() {
        let media = MockDownloader::new(3).resolve("https://example.com/v/abc").await.unwrap();
        assert_eq!(media.parts.len(), 3);
        assert_eq!(media.source_id, "abc");

        let single = MockDownloader::new(0).resolve("https://example.com/v/abc").await.unwrap();
        assert!(!single.is_multi_part());
    }
}
