//! Content hashing for bits change detection.
//!
//! The digest covers every archived file's relative path and contents, in
//! sorted order, so it is stable across machines and changes with any edit.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use crate::error::Result;

/// Incremental hasher over the files of a bits directory.
#[derive(Debug, Default)]
pub struct BitsHasher {
    hasher: Sha256,
    files: usize,
}

impl BitsHasher {
    /// Creates a new bits hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a file entry. Must be followed by its contents via [`Self::update`].
    pub fn begin_file(&mut self, relative_path: &str, len: u64) {
        self.hasher.update(relative_path.as_bytes());
        self.hasher.update([0u8]);
        self.hasher.update(len.to_be_bytes());
        self.files += 1;
    }

    /// Feeds a chunk of the current file's contents.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Returns the number of files hashed so far.
    #[must_use]
    pub const fn file_count(&self) -> usize {
        self.files
    }

    /// Finishes and returns the hex-encoded digest.
    #[must_use]
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }

    /// Hashes a single file's contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn hash_file(path: impl AsRef<Path>) -> Result<String> {
        let mut file = std::fs::File::open(path.as_ref())?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; super::CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Returns a short form of a digest for display.
    #[must_use]
    pub fn short_digest(digest: &str) -> &str {
        &digest[..12.min(digest.len())]
    }
}
