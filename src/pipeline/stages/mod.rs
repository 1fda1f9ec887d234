use std::sync::Arc;

pub mod download;
pub mod publish;
pub mod summarize;
pub mod transcribe;

pub use download::DownloadStage;
pub use publish::PublishStage;
pub use summarize::SummarizeStage;
pub use transcribe::TranscribeStage;

use super::{Stage, StageKind};
use crate::config::Config;
use crate::providers::ProviderRegistry;

/// The stage implementing `kind`
pub fn build_stage(kind: StageKind, config: Arc<Config>, registry: Arc<ProviderRegistry>) -> Box<dyn Stage> {
    match kind {
        StageKind::Download => Box::new(DownloadStage::new(config, registry)),
        StageKind::Transcribe => Box::new(TranscribeStage::new(config, registry)),
        StageKind::Summarize => Box::new(SummarizeStage::new(config, registry)),
        StageKind::Publish => Box::new(PublishStage::new(config, registry)),
    }
}
