//! Atomic output writing.
//!
//! Everything lands in a temporary sibling of the destination first and is renamed into place
//! only once it is complete, so a failed or cancelled job never leaves a file at the destination.

pub mod poster;
pub mod staging;

pub use poster::{PosterEncodeOptions, encode_poster, finalize_poster};
pub use staging::{ExportResult, StagedOutput, ensure_parent_dir, finalize_with};
