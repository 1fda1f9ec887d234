//! Thin wrappers around the external media tools (ffmpeg, yt-dlp, whisper).

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

use crate::error::ProviderError;
use crate::utils::{has_extension, AUDIO_EXTENSIONS};

/// Run an external program to completion and return its output.
///
/// A missing binary and a non-zero exit status both become
/// [`ProviderError::Command`] carrying the tail of stderr.
pub async fn run_command<I, S>(program: &str, args: I) -> Result<Output, ProviderError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    tracing::debug!("Running {}", program);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProviderError::Command {
                program: program.to_string(),
                stderr: "not found on PATH".to_string(),
            },
            _ => ProviderError::Io(e),
        })?;

    if !output.status.success() {
        return Err(ProviderError::Command {
            program: program.to_string(),
            stderr: stderr_tail(&output.stderr),
        });
    }

    Ok(output)
}

/// Last few lines of stderr, enough to explain a failure without flooding logs
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}

pub fn is_audio_file(path: &Path) -> bool {
    has_extension(path, AUDIO_EXTENSIONS)
}

/// Sibling path an extraction writes to before it is moved into place
pub fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

/// Extract a 16 kHz mono PCM WAV track from a media file using ffmpeg.
///
/// `target` only appears once ffmpeg has finished; an interrupted run
/// leaves at most `<target>.part` behind.
pub async fn extract_audio(source: &Path, target: &Path) -> Result<(), ProviderError> {
    if !source.exists() {
        return Err(ProviderError::MissingInput(source.to_path_buf()));
    }
    if let Some(parent) = target.parent() {
        fs_err::tokio::create_dir_all(parent).await?;
    }

    let staging = staging_path(target);
    tracing::debug!("Extracting audio {} -> {}", source.display(), target.display());

    let args: [&OsStr; 15] = [
        OsStr::new("-loglevel"),
        OsStr::new("error"),
        OsStr::new("-i"),
        source.as_os_str(),
        OsStr::new("-vn"), // No video
        OsStr::new("-acodec"),
        OsStr::new("pcm_s16le"),
        OsStr::new("-ar"),
        OsStr::new("16000"),
        OsStr::new("-ac"),
        OsStr::new("1"),
        OsStr::new("-f"), // The .part suffix hides the container
        OsStr::new("wav"),
        OsStr::new("-y"), // Overwrite output file
        staging.as_os_str(),
    ];
    if let Err(e) = run_command("ffmpeg", args).await {
        let _ = fs_err::tokio::remove_file(&staging).await;
        return Err(e);
    }

    fs_err::tokio::rename(&staging, target).await?;
    Ok(())
}

/// Extract one JPEG frame every `interval_secs` seconds into `dir`.
///
/// Frames are written to a staging directory that replaces `dir` only after
/// ffmpeg succeeds. Returns the frame paths sorted by name (`frame_0001.jpg`, ...).
pub async fn extract_key_frames(
    source: &Path,
    dir: &Path,
    interval_secs: u32,
) -> Result<Vec<PathBuf>, ProviderError> {
    if !source.exists() {
        return Err(ProviderError::MissingInput(source.to_path_buf()));
    }

    let staging = staging_path(dir);
    remove_dir_if_present(&staging).await?;
    fs_err::tokio::create_dir_all(&staging).await?;

    let filter = format!("fps=1/{}", interval_secs.max(1));
    let pattern = staging.join("frame_%04d.jpg");

    let args: [&OsStr; 10] = [
        OsStr::new("-loglevel"),
        OsStr::new("error"),
        OsStr::new("-i"),
        source.as_os_str(),
        OsStr::new("-vf"),
        OsStr::new(&filter),
        OsStr::new("-q:v"),
        OsStr::new("2"),
        OsStr::new("-y"),
        pattern.as_os_str(),
    ];
    if let Err(e) = run_command("ffmpeg", args).await {
        let _ = remove_dir_if_present(&staging).await;
        return Err(e);
    }

    remove_dir_if_present(dir).await?;
    fs_err::tokio::rename(&staging, dir).await?;

    list_frames(dir).await
}

/// `frame_*.jpg` files in `dir`, sorted by name
pub async fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, ProviderError> {
    let mut frames = Vec::new();
    let mut entries = fs_err::tokio::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_frame = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with("frame_") && n.ends_with(".jpg"));
        if is_frame {
            frames.push(path);
        }
    }
    frames.sort();

    Ok(frames)
}

async fn remove_dir_if_present(dir: &Path) -> std::io::Result<()> {
    match fs_err::tokio::remove_dir_all(dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
