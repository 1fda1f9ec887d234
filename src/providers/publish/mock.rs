use async_trait::async_trait;
use std::sync::Mutex;

use super::Publisher;
use crate::error::ProviderError;
use crate::types::Note;

/// Offline publisher that remembers what it was given
pub struct RecordingPublisher {
    titles: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            titles: Mutex::new(Vec::new()),
        }
    }

    /// Titles published so far, in call order
    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, note: &Note) -> Result<bool, ProviderError> {
        if let Ok(mut titles) = self.titles.lock() {
            titles.push(note.title.clone());
        }
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
