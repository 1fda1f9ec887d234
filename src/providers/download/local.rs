use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{parts_in_range, Downloader};
use crate::error::ProviderError;
use crate::types::{MediaReference, PartRange};
use crate::utils::{is_media_file, source_id_from_url};

/// Treats a local file or directory as the source.
///
/// A directory's media files, sorted by name, become its parts.
pub struct LocalDownloader;

impl LocalDownloader {
    pub fn new() -> Self {
        Self
    }

    /// Media files of the source, in part order
    async fn source_files(&self, source: &Path) -> Result<Vec<PathBuf>, ProviderError> {
        if !source.exists() {
            return Err(ProviderError::NotFound(format!("{} does not exist", source.display())));
        }

        if source.is_file() {
            if !is_media_file(source) {
                return Err(ProviderError::UnsupportedSource(format!(
                    "{} is not a media file",
                    source.display()
                )));
            }
            return Ok(vec![source.to_path_buf()]);
        }

        let mut files = Vec::new();
        let mut entries = fs_err::tokio::read_dir(source).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && is_media_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(ProviderError::NotFound(format!(
                "no media files in {}",
                source.display()
            )));
        }

        Ok(files)
    }
}

impl Default for LocalDownloader {
    fn default() -> Self {
        Self::new()
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Local File")
        .to_string()
}

#[async_trait]
impl Downloader for LocalDownloader {
    async fn resolve(&self, url: &str) -> Result<MediaReference, ProviderError> {
        let source = Path::new(url);
        let files = self.source_files(source).await?;
        let source_id = source_id_from_url(url);

        if source.is_file() {
            return Ok(MediaReference::single(url, source_id, file_stem(source)));
        }

        let parts = files.iter().map(|f| {
            let stem = file_stem(f);
            (String::new(), stem)
        });
        Ok(MediaReference::with_parts(url, source_id.clone(), source_id, parts))
    }

    async fn fetch(
        &self,
        media: &MediaReference,
        range: Option<PartRange>,
        dest: &Path,
    ) -> Result<(), ProviderError> {
        let files = self.source_files(Path::new(&media.source_url)).await?;
        fs_err::tokio::create_dir_all(dest).await?;

        for part in parts_in_range(media, range) {
            let Some(source) = files.get(part.index as usize - 1) else {
                return Err(ProviderError::NotFound(format!(
                    "part {} is no longer present in {}",
                    part.index, media.source_url
                )));
            };

            let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
            let target = dest.join(format!("{}.{}", part.stable_key, ext));
            tracing::debug!("Copying {} -> {}", source.display(), target.display());
            fs_err::tokio::copy(source, &target).await?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
