//! Chunked multipart upload of local files.

pub mod engine;

pub use engine::{UploadConfig, UploadDestination, Uploader};
pub use engine::{DEFAULT_PART_SIZE, MAX_PARTS, MAX_PART_SIZE, MIN_PART_SIZE};
