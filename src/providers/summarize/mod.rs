use async_trait::async_trait;
use std::sync::Arc;

pub mod chat;
pub mod mock;
pub mod rule;

use super::{Availability, ProviderTable, MOCK_PROVIDER};
use crate::error::ProviderError;
use crate::types::Note;

/// Prompt used when `summarize.prompt_template` is not set
pub const DEFAULT_PROMPT_TEMPLATE: &str = "You are writing study notes from a video transcript.\n\
Write markdown: a `# ` title line, then `## ` sections covering the key points, \
definitions, and any steps or examples, in the transcript's language.\n\
Key frames (reference them as markdown images where useful):\n{{frames}}\n\n\
Transcript:\n{{transcript}}";

/// Turns transcript text (plus optional key frames) into a structured note
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, frame_refs: &[String]) -> Result<Note, ProviderError>;

    fn name(&self) -> &'static str;
}

pub fn register_defaults(table: &mut ProviderTable<dyn Summarizer>) {
    for vendor in chat::Vendor::ALL {
        let defaults = vendor.defaults();
        table.register(
            vendor.name(),
            move |config| Availability::of_credential(config.summarize.api_key.as_deref(), defaults.env_var),
            move |config| {
                chat::ChatSummarizer::from_config(vendor, config).map(|s| Arc::new(s) as Arc<dyn Summarizer>)
            },
        );
    }

    for name in ["rule", "local"] {
        table.register(
            name,
            |_| Availability::Ready,
            |config| Ok(Arc::new(rule::RuleSummarizer::from_config(config)) as Arc<dyn Summarizer>),
        );
    }

    table.register(
        MOCK_PROVIDER,
        |_| Availability::Ready,
        |_| Ok(Arc::new(mock::MockSummarizer::new()) as Arc<dyn Summarizer>),
    );
}

/// Substitute `{{transcript}}` and `{{frames}}` (one ref per line)
pub fn render_prompt(template: &str, text: &str, frame_refs: &[String]) -> String {
    template
        .replace("{{frames}}", &frame_refs.join("\n"))
        .replace("{{transcript}}", text)
}
