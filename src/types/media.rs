use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Maximum characters of the source id kept in a stable key
const KEY_SOURCE_CHARS: usize = 24;

/// Maximum characters of the part id kept in a stable key
const KEY_PART_ID_CHARS: usize = 16;

/// Maximum characters of the title kept in a stable key
const KEY_TITLE_CHARS: usize = 32;

/// One part of a (possibly multi-part) media source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    /// 1-based position in canonical playback order
    pub index: u32,

    /// Canonical part title
    pub title: String,

    /// Platform identifier of the part (page id, video id, ...)
    pub part_id: String,

    /// Token every downloaded file of this part carries in its name
    pub stable_key: String,
}

impl PartInfo {
    pub fn new(source_id: &str, index: u32, part_id: impl Into<String>, title: impl Into<String>) -> Self {
        let part_id = part_id.into();
        let title = title.into();
        let stable_key = stable_key(source_id, index, &part_id, &title);

        Self {
            index,
            title,
            part_id,
            stable_key,
        }
    }
}

/// Deterministic file-name token for a part: `<source>-p<index>[-<part id>][-<title>]`.
///
/// Only lowercase alphanumerics and `_` survive inside each component, so the
/// same source always yields the same key regardless of platform quirks in
/// the raw title.
pub fn stable_key(source_id: &str, index: u32, part_id: &str, title: &str) -> String {
    let mut key = format!("{}{:03}", source_key_prefix(source_id), index);

    for component in [
        key_component(part_id, KEY_PART_ID_CHARS),
        key_component(title, KEY_TITLE_CHARS),
    ] {
        if !component.is_empty() {
            key.push('-');
            key.push_str(&component);
        }
    }

    key
}

/// Leading part shared by every stable key of one source.
///
/// Components never contain `-`, so no other source's keys start with it.
pub fn source_key_prefix(source_id: &str) -> String {
    format!("{}-p", key_component(source_id, KEY_SOURCE_CHARS))
}

fn key_component(raw: &str, max_chars: usize) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_separator = false;

    for c in raw.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_separator = true;
        }
    }

    let truncated: String = slug.chars().take(max_chars).collect();
    truncated.trim_end_matches('_').to_string()
}

/// Identifies one downloadable unit: a source URL and its ordered parts.
///
/// An empty `parts` list means single-part media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub source_url: String,

    /// Platform identifier of the whole source (playlist id, BV id, ...)
    pub source_id: String,

    pub title: String,

    pub parts: Vec<PartInfo>,
}

impl MediaReference {
    /// Single-part media
    pub fn single(source_url: impl Into<String>, source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            source_id: source_id.into(),
            title: title.into(),
            parts: Vec::new(),
        }
    }

    /// Multi-part media; indices are assigned 1.. in the given order
    pub fn with_parts<I, P, T>(
        source_url: impl Into<String>,
        source_id: impl Into<String>,
        title: impl Into<String>,
        parts: I,
    ) -> Self
    where
        I: IntoIterator<Item = (P, T)>,
        P: Into<String>,
        T: Into<String>,
    {
        let source_id = source_id.into();
        let parts = parts
            .into_iter()
            .enumerate()
            .map(|(i, (part_id, title))| PartInfo::new(&source_id, i as u32 + 1, part_id, title))
            .collect();

        Self {
            source_url: source_url.into(),
            source_id,
            title: title.into(),
            parts,
        }
    }

    pub fn is_multi_part(&self) -> bool {
        !self.parts.is_empty()
    }

    /// The parts every stage iterates over. Single-part media yields one
    /// synthetic part so downstream code never special-cases it.
    pub fn effective_parts(&self) -> Cow<'_, [PartInfo]> {
        if self.parts.is_empty() {
            Cow::Owned(vec![PartInfo::new(&self.source_id, 1, "", &self.title)])
        } else {
            Cow::Borrowed(&self.parts)
        }
    }

    /// Check that indices are contiguous starting at 1
    pub fn validate(&self) -> Result<(), String> {
        for (position, part) in self.parts.iter().enumerate() {
            let expected = position as u32 + 1;
            if part.index != expected {
                return Err(format!(
                    "part indices must be contiguous from 1: expected {}, found {}",
                    expected, part.index
                ));
            }
        }
        Ok(())
    }
}

/// Inclusive, contiguous range of part indices requested from a download provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRange {
    pub start: u32,
    pub end: u32,
}

impl PartRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// Smallest range covering every given index
    pub fn covering(indices: &[u32]) -> Option<Self> {
        let min = indices.iter().copied().min()?;
        let max = indices.iter().copied().max()?;
        Some(Self::new(min, max))
    }

    pub fn contains(&self, index: u32) -> bool {
        (self.start..=self.end).contains(&index)
    }

    /// Number of parts in the range (never zero)
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }
}

impl fmt::Display for PartRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Result of one Download stage run. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedMedia {
    pub primary_path: PathBuf,

    /// One file per effective part, in part order
    pub all_paths: Vec<PathBuf>,

    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl FetchedMedia {
    /// Returns `None` when no paths are given
    pub fn new(all_paths: Vec<PathBuf>, metadata: BTreeMap<String, serde_json::Value>) -> Option<Self> {
        let primary_path = all_paths.first()?.clone();
        Some(Self {
            primary_path,
            all_paths,
            metadata,
        })
    }
}
