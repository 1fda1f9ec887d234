use async_trait::async_trait;
use std::sync::Arc;

pub mod mock;
pub mod notion;

use super::{Availability, ProviderTable, MOCK_PROVIDER};
use crate::error::ProviderError;
use crate::types::Note;

/// Pushes a finished note to an external destination
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create or update the remote page titled `note.title`.
    ///
    /// `Ok(false)` means the destination declined the note without an error.
    async fn publish(&self, note: &Note) -> Result<bool, ProviderError>;

    fn name(&self) -> &'static str;
}

pub fn register_defaults(table: &mut ProviderTable<dyn Publisher>) {
    table.register(
        "notion",
        |config| {
            let publish = &config.publish;
            match (&publish.token, &publish.database_id) {
                (Some(token), Some(db)) if !token.trim().is_empty() && !db.trim().is_empty() => {
                    Availability::Ready
                }
                _ => Availability::unavailable("publish.token and publish.database_id are required"),
            }
        },
        |config| notion::NotionPublisher::from_config(config).map(|p| Arc::new(p) as Arc<dyn Publisher>),
    );

    table.register(
        "none",
        |_| Availability::Ready,
        |_| Ok(Arc::new(NoopPublisher) as Arc<dyn Publisher>),
    );

    table.register(
        MOCK_PROVIDER,
        |_| Availability::Ready,
        |_| Ok(Arc::new(mock::RecordingPublisher::new()) as Arc<dyn Publisher>),
    );
}

/// Accepts every note and sends it nowhere
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, note: &Note) -> Result<bool, ProviderError> {
        tracing::debug!("Publishing disabled, skipping '{}'", note.title);
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
