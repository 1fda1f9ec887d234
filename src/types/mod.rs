//! Data model shared by every stage and provider.

pub mod media;
pub mod note;
pub mod transcript;

pub use media::{source_key_prefix, stable_key, FetchedMedia, MediaReference, PartInfo, PartRange};
pub use note::{Note, NoteSection};
pub use transcript::{PartTranscript, Segment, Transcript};
