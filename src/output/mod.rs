//! On-disk artifacts: markdown notes, transcript cache, and the run report.

use console::style;
use std::path::{Path, PathBuf};

use crate::pipeline::RunReport;
use crate::types::{Note, PartTranscript};
use crate::utils::format_duration;

const TRANSCRIPT_SUFFIX: &str = ".transcript.json";

#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid transcript cache: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid note front matter: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Cache file for the part with `stable_key`
pub fn transcript_cache_path(dir: &Path, stable_key: &str) -> PathBuf {
    dir.join(format!("{}{}", stable_key, TRANSCRIPT_SUFFIX))
}

pub async fn save_transcript(dir: &Path, transcript: &PartTranscript) -> Result<PathBuf, OutputError> {
    fs_err::tokio::create_dir_all(dir).await?;
    let path = transcript_cache_path(dir, &transcript.stable_key);
    let json = serde_json::to_string_pretty(transcript)?;
    fs_err::tokio::write(&path, json).await?;
    Ok(path)
}

pub async fn load_transcript(path: &Path) -> Result<PartTranscript, OutputError> {
    let content = fs_err::tokio::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Cached transcript for a part, if one exists and parses
pub async fn load_cached_transcript(dir: &Path, stable_key: &str) -> Option<PartTranscript> {
    let path = transcript_cache_path(dir, stable_key);
    if !path.is_file() {
        return None;
    }

    match load_transcript(&path).await {
        Ok(transcript) if !transcript.transcript.is_empty() => Some(transcript),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Ignoring unreadable transcript cache {}: {}", path.display(), e);
            None
        }
    }
}

/// Every cached transcript in `dir`, ordered by part index
pub async fn load_all_transcripts(dir: &Path) -> Result<Vec<PartTranscript>, OutputError> {
    let mut transcripts = Vec::new();
    if !dir.is_dir() {
        return Ok(transcripts);
    }

    let mut entries = fs_err::tokio::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_cache = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(TRANSCRIPT_SUFFIX));
        if is_cache {
            transcripts.push(load_transcript(&path).await?);
        }
    }

    transcripts.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.stable_key.cmp(&b.stable_key)));
    Ok(transcripts)
}

/// Write `note` as markdown into `dir`; the file name comes from the title
pub async fn save_note(note: &Note, dir: &Path) -> Result<PathBuf, OutputError> {
    fs_err::tokio::create_dir_all(dir).await?;
    let path = dir.join(note.file_name());
    fs_err::tokio::write(&path, note.to_markdown()?).await?;
    tracing::debug!("Saved note {}", path.display());
    Ok(path)
}

/// Markdown notes in `dir`, sorted by file name
pub async fn load_notes(dir: &Path) -> Result<Vec<(PathBuf, Note)>, OutputError> {
    let mut paths = Vec::new();
    if dir.is_dir() {
        let mut entries = fs_err::tokio::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && path.extension().map_or(false, |e| e == "md") {
                paths.push(path);
            }
        }
    }
    paths.sort();

    let mut notes = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs_err::tokio::read_to_string(&path).await?;
        let fallback = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let note = Note::from_markdown(&content, &fallback)?;
        notes.push((path, note));
    }

    Ok(notes)
}

/// Print the run summary to stdout
pub fn print_report(report: &RunReport) {
    println!();
    println!("{}", style("Run summary").bold());

    for stage in &report.stages {
        let mark = match stage.warning {
            Some(_) => style("!").yellow(),
            None => style("✓").green(),
        };
        println!(
            "  {} {:<10} {}",
            mark,
            stage.kind.to_string(),
            style(format_duration(stage.elapsed.as_secs_f64())).dim()
        );
    }

    if !report.notes.is_empty() {
        println!("{}", style("Notes").bold());
        for path in &report.notes {
            println!("  {}", path.display());
        }
    }

    if !report.skipped_transcripts.is_empty() {
        println!(
            "  {} parts skipped in transcription: {:?}",
            style("!").yellow(),
            report.skipped_transcripts
        );
    }
    if !report.skipped_summaries.is_empty() {
        println!(
            "  {} parts skipped in summarization: {:?}",
            style("!").yellow(),
            report.skipped_summaries
        );
    }

    if report.publish_enabled {
        println!("  Published: {}", report.published.len());
        for failure in &report.publish_failures {
            println!("  {} {}: {}", style("✗").red(), failure.title, failure.reason);
        }
    }
}
