//! Application bits: archiving and digests.
//!
//! A bits application's directory is packed into a zip archive on disk so
//! the upload can stream it. The digest is what the planner compares to
//! decide whether an upload is needed.

mod archive;
mod hash;

pub use archive::{BitsArchive, DEFAULT_IGNORED};
pub use hash::BitsHasher;

/// Read and upload chunk size in bytes.
pub const CHUNK_SIZE: usize = 64 * 1024;
