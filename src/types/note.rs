use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::sanitize_filename;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSection {
    pub heading: String,
    pub body: String,
}

impl NoteSection {
    pub fn new(heading: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            body: body.into(),
        }
    }
}

/// Structured note produced by a summarizer.
///
/// Rendered to disk as markdown with optional YAML front matter:
///
/// ```text
/// ---
/// metadata: {...}
/// frames: [...]
/// ---
///
/// # Title
///
/// ## Heading
///
/// body
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub title: String,
    pub sections: Vec<NoteSection>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub frame_refs: Vec<String>,
}

#[derive(Default, Serialize, Deserialize)]
struct FrontMatter {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    frames: Vec<String>,
}

const FRONT_MATTER_FENCE: &str = "---";

impl Note {
    pub fn new(title: impl Into<String>, sections: Vec<NoteSection>) -> Self {
        Self {
            title: title.into(),
            sections,
            metadata: BTreeMap::new(),
            frame_refs: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_frames(mut self, frames: Vec<String>) -> Self {
        self.frame_refs = frames;
        self
    }

    /// File name the note is persisted under, derived from the title
    pub fn file_name(&self) -> String {
        let stem = sanitize_filename(&self.title);
        if stem.is_empty() {
            "note.md".to_string()
        } else {
            format!("{}.md", stem)
        }
    }

    /// Body text without front matter, as sent to publishing targets
    pub fn body_markdown(&self) -> String {
        let mut md = format!("# {}\n\n", self.title);
        for section in &self.sections {
            if !section.heading.is_empty() {
                md.push_str(&format!("## {}\n\n", section.heading));
            }
            let body = section.body.trim();
            if !body.is_empty() {
                md.push_str(body);
                md.push_str("\n\n");
            }
        }
        md
    }

    pub fn to_markdown(&self) -> Result<String, serde_yaml::Error> {
        if self.metadata.is_empty() && self.frame_refs.is_empty() {
            return Ok(self.body_markdown());
        }

        let front = FrontMatter {
            metadata: self.metadata.clone(),
            frames: self.frame_refs.clone(),
        };
        let yaml = serde_yaml::to_string(&front)?;

        Ok(format!(
            "{fence}\n{yaml}{fence}\n\n{body}",
            fence = FRONT_MATTER_FENCE,
            yaml = yaml,
            body = self.body_markdown()
        ))
    }

    /// Parse a note written by [`Note::to_markdown`] or edited by hand.
    ///
    /// The first `# ` line is the title (`fallback_title` when absent), every
    /// `## ` line opens a section, and text before the first section becomes
    /// a section with an empty heading. Headings inside code fences are body text.
    pub fn from_markdown(text: &str, fallback_title: &str) -> Result<Self, serde_yaml::Error> {
        let text = text.trim_start_matches('\u{feff}');
        let (front, body) = split_front_matter(text)?;

        let mut title: Option<String> = None;
        let mut sections: Vec<NoteSection> = Vec::new();
        let mut preamble = String::new();
        let mut in_fence = false;

        for line in body.lines() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
            }

            if !in_fence {
                if let Some(heading) = line.strip_prefix("## ") {
                    sections.push(NoteSection::new(heading.trim(), String::new()));
                    continue;
                }
                if title.is_none() && sections.is_empty() && preamble.trim().is_empty() {
                    if let Some(t) = line.strip_prefix("# ") {
                        title = Some(t.trim().to_string());
                        continue;
                    }
                }
            }

            let target = match sections.last_mut() {
                Some(section) => &mut section.body,
                None => &mut preamble,
            };
            target.push_str(line);
            target.push('\n');
        }

        for section in &mut sections {
            section.body = section.body.trim().to_string();
        }
        let preamble = preamble.trim();
        if !preamble.is_empty() {
            sections.insert(0, NoteSection::new("", preamble));
        }

        Ok(Self {
            title: title.unwrap_or_else(|| fallback_title.to_string()),
            sections,
            metadata: front.metadata,
            frame_refs: front.frames,
        })
    }
}

fn split_front_matter(text: &str) -> Result<(FrontMatter, &str), serde_yaml::Error> {
    let Some(rest) = text.strip_prefix("---\n") else {
        return Ok((FrontMatter::default(), text));
    };

    match rest.find("\n---\n") {
        Some(end) => {
            let front: FrontMatter = serde_yaml::from_str(&rest[..end])?;
            Ok((front, &rest[end + 5..]))
        }
        None => Ok((FrontMatter::default(), text)),
    }
}
