//! Multi-part download reconciliation.
//!
//! Given a [`MediaReference`] and a target directory, work out which parts
//! are already on disk, ask the provider for the smallest contiguous range
//! covering the rest, and return one file per part in part order. Running it
//! again over a complete directory issues no fetches.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ProviderError, StageError};
use crate::providers::{with_timeout, Downloader};
use crate::types::{MediaReference, PartInfo, PartRange};
use crate::utils::is_media_file;

/// Media files under `dir` at any depth, sorted by path.
///
/// A missing directory is empty. Hidden entries (yt-dlp staging directories,
/// editor swap files) are skipped.
pub fn scan_media_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if dir.is_dir() {
        walk(dir, &mut files)?;
    }
    Ok(files)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<PathBuf> = fs_err::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in entries {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with('.'));
        if hidden {
            continue;
        }

        if path.is_dir() {
            walk(&path, files)?;
        } else if is_media_file(&path) {
            files.push(path);
        }
    }

    Ok(())
}

/// Files on disk partitioned by the part they belong to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartMatch {
    pub present: BTreeMap<u32, PathBuf>,
    pub missing: Vec<u32>,
    pub unmatched: Vec<PathBuf>,
}

impl PartMatch {
    /// Matched files in ascending part index
    pub fn ordered_paths(&self) -> Vec<PathBuf> {
        self.present.values().cloned().collect()
    }
}

/// Assign each file to at most one part.
///
/// A file belongs to the first part, in index order, whose stable key occurs
/// in its lowercased basename. When several files match one part the first
/// in `files` order is kept.
pub fn match_parts(parts: &[PartInfo], files: &[PathBuf]) -> PartMatch {
    let mut matched = PartMatch::default();

    for file in files {
        let basename = file
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match parts.iter().find(|part| basename.contains(&part.stable_key)) {
            Some(part) => match matched.present.entry(part.index) {
                Entry::Vacant(slot) => {
                    slot.insert(file.clone());
                }
                Entry::Occupied(kept) => {
                    tracing::warn!(
                        part = part.index,
                        kept = %kept.get().display(),
                        ignored = %file.display(),
                        "Several files match one part; keeping the first"
                    );
                }
            },
            None => matched.unmatched.push(file.clone()),
        }
    }

    matched.missing = parts
        .iter()
        .map(|part| part.index)
        .filter(|index| !matched.present.contains_key(index))
        .collect();

    matched
}

/// What the engine will ask the provider for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    Complete,
    /// `range` is `None` for single-part media
    Fetch { range: Option<PartRange>, missing: Vec<u32> },
}

/// Outcome of a successful reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// One file per effective part, ascending part index
    pub paths: Vec<PathBuf>,

    /// Parts absent before fetching
    pub missing_before: Vec<u32>,

    /// First range requested from the provider
    pub requested_range: Option<PartRange>,

    pub fetch_requests: usize,
}

pub struct Reconciler<'a> {
    media: &'a MediaReference,
    dir: &'a Path,
}

impl<'a> Reconciler<'a> {
    pub fn new(media: &'a MediaReference, dir: &'a Path) -> Self {
        Self { media, dir }
    }

    pub fn scan(&self) -> Result<PartMatch, StageError> {
        let files = scan_media_files(self.dir).map_err(|e| self.download_error(e.into()))?;
        Ok(match_parts(&self.media.effective_parts(), &files))
    }

    pub fn plan(&self, matched: &PartMatch) -> FetchPlan {
        if matched.missing.is_empty() {
            return FetchPlan::Complete;
        }

        // Contiguous cover: gaps inside it are re-fetched
        let range = if self.media.is_multi_part() {
            PartRange::covering(&matched.missing)
        } else {
            None
        };

        FetchPlan::Fetch {
            range,
            missing: matched.missing.clone(),
        }
    }

    /// Bring the directory up to date and return every part's file in order
    pub async fn reconcile(&self, downloader: &dyn Downloader, timeout: Duration) -> Result<Reconciled, StageError> {
        let initial = self.scan()?;

        let (range, missing) = match self.plan(&initial) {
            FetchPlan::Complete => {
                tracing::info!(
                    "All {} part(s) already present in {}",
                    initial.present.len(),
                    self.dir.display()
                );
                return Ok(Reconciled {
                    paths: initial.ordered_paths(),
                    missing_before: Vec::new(),
                    requested_range: None,
                    fetch_requests: 0,
                });
            }
            FetchPlan::Fetch { range, missing } => (range, missing),
        };

        tracing::info!(
            present = initial.present.len(),
            missing = ?missing,
            "Fetching {} with {}",
            range.map_or_else(|| "media".to_string(), |r| format!("parts {}", r)),
            downloader.name()
        );

        let mut fetch_requests = 1;
        if let Err(err) = self.fetch(downloader, range, timeout).await {
            let after = self.scan()?;
            match self.plan(&after) {
                FetchPlan::Complete => {
                    tracing::warn!(error = %err, "Provider reported a failure but every part is present");
                }
                // Some parts landed before the failure: one retry over what is left
                FetchPlan::Fetch {
                    range: narrower,
                    missing: still_missing,
                } if err.is_retryable() && still_missing.len() < missing.len() => {
                    tracing::warn!(error = %err, missing = ?still_missing, "Download failed part-way, retrying the rest");
                    fetch_requests += 1;
                    self.fetch(downloader, narrower, timeout)
                        .await
                        .map_err(|source| self.download_error(source))?;
                }
                FetchPlan::Fetch { .. } => return Err(self.download_error(err)),
            }
        }

        let matched = self.scan()?;
        if !matched.missing.is_empty() {
            return Err(StageError::IncompleteMedia {
                missing: matched.missing,
            });
        }

        Ok(Reconciled {
            paths: matched.ordered_paths(),
            missing_before: missing,
            requested_range: range,
            fetch_requests,
        })
    }

    async fn fetch(
        &self,
        downloader: &dyn Downloader,
        range: Option<PartRange>,
        timeout: Duration,
    ) -> Result<(), ProviderError> {
        with_timeout(timeout, downloader.fetch(self.media, range, self.dir)).await
    }

    fn download_error(&self, source: ProviderError) -> StageError {
        StageError::Download {
            url: self.media.source_url.clone(),
            source,
        }
    }
}
