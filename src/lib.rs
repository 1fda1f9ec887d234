//! video2note - turn remote videos into structured notes
//!
//! A run is a fixed sequence of stages (download, transcribe, summarize,
//! publish) sharing one execution context. Every external collaborator sits
//! behind a capability trait and is selected by name from the provider
//! registry, so a config file alone decides which yt-dlp, Whisper, chat model
//! or Notion adapter a run uses.

pub mod cli;
pub mod config;
pub mod error;
pub mod media;
pub mod output;
pub mod pipeline;
pub mod providers;
pub mod reconcile;
pub mod types;
pub mod utils;

pub use cli::{Cli, StageArg};
pub use config::{Config, ConfigError};
pub use error::{PipelineError, ProviderError, StageError};
pub use pipeline::{ExecutionContext, RunMode, RunReport, Runner, Stage, StageKind};
pub use providers::{Capability, ProviderRegistry};
pub use types::{FetchedMedia, MediaReference, Note, PartInfo, Transcript};
