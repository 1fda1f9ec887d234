use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::{parts_in_range, Downloader};
use crate::config::Config;
use crate::error::ProviderError;
use crate::media::run_command;
use crate::types::{MediaReference, PartRange};
use crate::utils::source_id_from_url;

/// Downloads through yt-dlp; handles YouTube playlists and Bilibili multi-part videos.
pub struct YtDlpDownloader {
    yt_dlp_path: String,
    quality: String,
    cookies: Option<PathBuf>,
}

impl YtDlpDownloader {
    pub fn new(quality: impl Into<String>, cookies: Option<PathBuf>) -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            quality: quality.into(),
            cookies,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.download.quality.clone(), config.download.cookies.clone())
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["--no-warnings".to_string()];
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<Vec<u8>, ProviderError> {
        match run_command(&self.yt_dlp_path, &args).await {
            Ok(output) => Ok(output.stdout),
            Err(ProviderError::Command { stderr, .. }) => Err(classify_error(&stderr)),
            Err(e) => Err(e),
        }
    }

    /// Move staged `<playlist_index>.<ext>` files to `<stable_key>.<ext>` in `dest`
    async fn promote_staged(
        &self,
        media: &MediaReference,
        range: Option<PartRange>,
        staging: &Path,
        dest: &Path,
    ) -> Result<usize, ProviderError> {
        let parts = parts_in_range(media, range);
        let mut moved = 0;

        let mut entries = fs_err::tokio::read_dir(staging).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(index) = staged_index(&path) else {
                continue;
            };
            // Single-part downloads are staged as 1.<ext>
            let part = if media.is_multi_part() {
                parts.iter().find(|p| p.index == index)
            } else {
                parts.first()
            };
            let Some(part) = part else {
                tracing::debug!("Ignoring staged file outside requested range: {}", path.display());
                continue;
            };

            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
            let target = dest.join(format!("{}.{}", part.stable_key, ext));
            fs_err::tokio::rename(&path, &target).await?;
            tracing::debug!("Part {} -> {}", part.index, target.display());
            moved += 1;
        }

        Ok(moved)
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn resolve(&self, url: &str) -> Result<MediaReference, ProviderError> {
        tracing::debug!("Resolving media info for: {}", url);

        let mut args = self.base_args();
        args.extend(["--flat-playlist".to_string(), "--dump-single-json".to_string(), url.to_string()]);

        let stdout = self.run(args).await?;
        let info: Value = serde_json::from_slice(&stdout)?;

        parse_media_info(url, &info)
    }

    async fn fetch(
        &self,
        media: &MediaReference,
        range: Option<PartRange>,
        dest: &Path,
    ) -> Result<(), ProviderError> {
        fs_err::tokio::create_dir_all(dest).await?;

        // Staged inside dest so the final rename never crosses filesystems
        let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(dest)?;
        let template = staging.path().join("%(playlist_index|1)s.%(ext)s");

        let mut args = self.base_args();
        args.extend([
            "--format".to_string(),
            self.quality.clone(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--output".to_string(),
            template.to_string_lossy().into_owned(),
        ]);

        if media.is_multi_part() {
            args.push("--yes-playlist".to_string());
            if let Some(range) = range {
                args.push("--playlist-items".to_string());
                args.push(format!("{}-{}", range.start, range.end));
            }
        } else {
            args.push("--no-playlist".to_string());
        }
        args.push(media.source_url.clone());

        match range {
            Some(range) => tracing::info!("Downloading parts {} of {}", range, media.source_url),
            None => tracing::info!("Downloading {}", media.source_url),
        }

        // Whatever completed is kept even when yt-dlp fails part-way
        let result = self.run(args).await;
        let moved = self.promote_staged(media, range, staging.path(), dest).await?;
        tracing::debug!("yt-dlp delivered {} file(s)", moved);

        result.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

fn staged_index(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    // .part and .ytdl leftovers carry an extra extension
    if stem.contains('.') {
        return None;
    }
    stem.parse().ok()
}

/// Build a [`MediaReference`] from yt-dlp's `--dump-single-json` output
pub fn parse_media_info(url: &str, info: &Value) -> Result<MediaReference, ProviderError> {
    let source_id = info["id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| source_id_from_url(url));
    let title = info["title"].as_str().unwrap_or(&source_id).to_string();

    let entries = match info["_type"].as_str() {
        Some("playlist") => info["entries"].as_array(),
        _ => None,
    };

    let media = match entries {
        Some(entries) if !entries.is_empty() => {
            let parts = entries.iter().enumerate().map(|(i, entry)| {
                let part_id = entry["id"].as_str().unwrap_or_default().to_string();
                let part_title = entry["title"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Part {}", i + 1));
                (part_id, part_title)
            });
            MediaReference::with_parts(url, source_id, title, parts)
        }
        Some(_) => {
            return Err(ProviderError::NotFound(format!("playlist {} has no entries", url)));
        }
        None => MediaReference::single(url, source_id, title),
    };

    media.validate().map_err(ProviderError::MalformedResponse)?;
    Ok(media)
}

/// Map yt-dlp's stderr onto the provider error kinds
pub fn classify_error(stderr: &str) -> ProviderError {
    let lower = stderr.to_lowercase();

    if lower.contains("unsupported url") {
        ProviderError::UnsupportedSource(stderr.to_string())
    } else if lower.contains("http error 404")
        || lower.contains("video unavailable")
        || lower.contains("not available")
        || lower.contains("does not exist")
        || lower.contains("private video")
    {
        ProviderError::NotFound(stderr.to_string())
    } else if lower.contains("http error 403")
        || lower.contains("http error 412")
        || lower.contains("sign in")
        || lower.contains("login")
    {
        ProviderError::Auth(stderr.to_string())
    } else {
        ProviderError::Transient(stderr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_playlist_entries_in_order() {
        let info = json!({
            "_type": "playlist",
            "id": "BV1xx411c7mD",
            "title": "Rust Course",
            "entries": [
                {"id": "BV1xx411c7mD_p1", "title": "Intro"},
                {"id": "BV1xx411c7mD_p2", "title": "Ownership"},
                {"id": "BV1xx411c7mD_p3"}
            ]
        });

        let media = parse_media_info("https://www.bilibili.com/video/BV1xx411c7mD", &info).unwrap();
        assert_eq!(media.title, "Rust Course");
        assert_eq!(media.parts.len(), 3);
        assert_eq!(media.parts[1].title, "Ownership");
        assert_eq!(media.parts[2].title, "Part 3");
        assert!(media.parts[0].stable_key.starts_with("bv1xx411c7md-p001"));
    }

    #[test]
    fn test_parse_single_video() {
        let info = json!({"id": "dQw4w9WgXcQ", "title": "Talk"});
        let media = parse_media_info("https://www.youtube.com/watch?v=dQw4w9WgXcQ", &info).unwrap();
        assert!(!media.is_multi_part());
        assert_eq!(media.source_id, "dQw4w9WgXcQ");
    }

    #[test]
    fn test_empty_playlist_is_not_found() {
        let info = json!({"_type": "playlist", "id": "PL1", "entries": []});
        let err = parse_media_info("https://www.youtube.com/playlist?list=PL1", &info).unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error("ERROR: Unsupported URL: https://example.com"),
            ProviderError::UnsupportedSource(_)
        ));
        assert!(matches!(
            classify_error("ERROR: [youtube] abc: Video unavailable"),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(classify_error("ERROR: HTTP Error 403: Forbidden"), ProviderError::Auth(_)));
        assert!(classify_error("ERROR: Connection reset by peer").is_retryable());
    }

    #[test]
    fn test_staged_index() {
        assert_eq!(staged_index(Path::new("/tmp/s/3.mp4")), Some(3));
        assert_eq!(staged_index(Path::new("/tmp/s/3.mp4.part")), None);
        assert_eq!(staged_index(Path::new("/tmp/s/3.f137.mp4")), None);
        assert_eq!(staged_index(Path::new("/tmp/s/title.mp4")), None);
    }

    #[tokio::test]
    async fn test_promote_staged_renames_to_stable_keys() {
        let dest = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        fs_err::write(staging.path().join("2.mp4"), b"p2").unwrap();
        fs_err::write(staging.path().join("3.webm"), b"p3").unwrap();
        fs_err::write(staging.path().join("2.mp4.part"), b"partial").unwrap();

        let media = MediaReference::with_parts("u", "src", "t", [("a", "A"), ("b", "B"), ("c", "C")]);
        let downloader = YtDlpDownloader::new("best", None);
        let moved = downloader
            .promote_staged(&media, Some(PartRange::new(2, 3)), staging.path(), dest.path())
            .await
            .unwrap();

        assert_eq!(moved, 2);
        assert!(dest.path().join(format!("{}.mp4", media.parts[1].stable_key)).exists());
        assert!(dest.path().join(format!("{}.webm", media.parts[2].stable_key)).exists());
    }
}
