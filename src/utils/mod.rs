use std::path::Path;
use url::Url;

/// Video container extensions produced by download providers
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "flv", "mkv", "webm", "mov", "avi"];

/// Audio extensions transcription providers accept without extraction
pub const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp3", "wav", "flac", "ogg", "aac"];

#[derive(thiserror::Error, Debug)]
pub enum UrlError {
    #[error("invalid URL format: {0}")]
    Invalid(#[from] url::ParseError),

    #[error("URL must use HTTP or HTTPS protocol, got '{0}'")]
    Scheme(String),
}

/// Validate a URL and return normalized version
pub fn validate_and_normalize_url(url: &str) -> Result<String, UrlError> {
    let parsed = Url::parse(url)?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlError::Scheme(parsed.scheme().to_string()));
    }

    Ok(parsed.to_string())
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Sanitize filename for safe filesystem usage
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            match c {
                // Keep alphanumeric characters, spaces, hyphens, underscores, and dots
                c if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' || c == '.' => c,
                // Replace everything else with underscore
                _ => '_',
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Whether a path has one of the given extensions (case-insensitive)
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

pub fn is_media_file(path: &Path) -> bool {
    has_extension(path, VIDEO_EXTENSIONS) || has_extension(path, AUDIO_EXTENSIONS)
}

/// Derive a platform identifier for a source URL.
///
/// YouTube `v=`/`list=` query values win; otherwise the last non-empty path
/// segment, falling back to the host.
pub fn source_id_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return Path::new(url)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.to_string());
    };

    for key in ["list", "v"] {
        if let Some((_, value)) = parsed.query_pairs().find(|(k, _)| k == key) {
            if !value.is_empty() {
                return value.into_owned();
            }
        }
    }

    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
        .or_else(|| extract_domain(url))
        .unwrap_or_else(|| "media".to_string())
}

/// Extract domain from URL for display purposes
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| {
            // Remove 'www.' prefix if present
            if let Some(stripped) = host.strip_prefix("www.") {
                stripped.to_string()
            } else {
                host.to_string()
            }
        })
}

/// Check if the current environment has required tools
pub async fn check_dependencies() -> Vec<String> {
    let mut missing = Vec::new();

    // Check for yt-dlp
    if !check_command_available("yt-dlp").await {
        missing.push("yt-dlp - required for the yt-dlp download provider".to_string());
    }

    // Check for ffmpeg (optional but recommended)
    if !check_command_available("ffmpeg").await {
        missing.push("ffmpeg - required for audio and key frame extraction".to_string());
    }

    missing
}

/// Check if a command is available in PATH
pub async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Synchronous PATH lookup, used by provider availability probes
pub fn command_on_path(command: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };

    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(command);
        candidate.is_file() || (cfg!(windows) && candidate.with_extension("exe").is_file())
    })
}
