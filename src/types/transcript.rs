use serde::{Deserialize, Serialize};

/// Individual transcript segment with timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start time in seconds
    pub start_sec: f64,

    /// End time in seconds
    pub end_sec: f64,

    /// Segment text
    pub text: String,

    /// Confidence score (0.0 to 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Ordered transcript of one audio file.
///
/// Providers that only return flat text produce a single segment with
/// `start_sec == end_sec == 0.0`; consumers must tolerate that.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<Segment>,

    /// Language detected or used by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Transcript {
    /// Build from timed segments, ordering them by start time
    pub fn new(mut segments: Vec<Segment>) -> Self {
        segments.sort_by(|a, b| a.start_sec.total_cmp(&b.start_sec));
        Self {
            segments,
            language: None,
        }
    }

    /// Single degenerate segment for providers without timestamps
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment {
                start_sec: 0.0,
                end_sec: 0.0,
                text: text.into(),
                confidence: None,
            }],
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.trim().is_empty())
    }

    /// True when at least one segment carries real timing
    pub fn has_timing(&self) -> bool {
        self.segments.iter().any(|s| s.end_sec > 0.0)
    }

    pub fn duration_sec(&self) -> f64 {
        self.segments.iter().map(|s| s.end_sec).fold(0.0, f64::max)
    }
}

/// A transcript tied to the part it was produced from; also the on-disk cache format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartTranscript {
    pub index: u32,
    pub title: String,
    pub stable_key: String,
    pub transcript: Transcript,
}
