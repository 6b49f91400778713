//! Building the bits archive uploaded to the platform.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info, warn};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::error::{PushError, Result};

use super::CHUNK_SIZE;
use super::hash::BitsHasher;

/// Entries never included in an archive.
pub const DEFAULT_IGNORED: &[&str] = &[
    ".git",
    ".gitignore",
    ".hg",
    ".svn",
    "_darcs",
    ".DS_Store",
    ".cfignore",
    ".pushdeck",
    ".env",
];

/// A zip archive of application bits, on disk.
#[derive(Debug)]
pub struct BitsArchive {
    path: PathBuf,
    digest: String,
    size: u64,
    file_count: usize,
    // Removes the temporary archive on drop.
    _temp: Option<TempPath>,
}

impl BitsArchive {
    /// Builds an archive from a directory, or uses an existing zip file as is.
    ///
    /// Directory entries are visited in sorted order and the names in
    /// [`DEFAULT_IGNORED`] are skipped, along with a top-level `manifest.yml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or the archive cannot
    /// be written.
    pub fn build(source: impl AsRef<Path>) -> Result<Self> {
        let source = source.as_ref();
        info!("Building bits archive from: {}", source.display());

        let metadata = std::fs::metadata(source)?;
        if metadata.is_file() {
            let digest = BitsHasher::hash_file(source)?;
            debug!("Using archive file as is ({} bytes)", metadata.len());
            return Ok(Self {
                path: source.to_path_buf(),
                digest,
                size: metadata.len(),
                file_count: 1,
                _temp: None,
            });
        }

        let mut files = Vec::new();
        collect_files(source, source, &mut files)?;
        files.sort();

        let temp = tempfile::Builder::new()
            .prefix("pushdeck-bits-")
            .suffix(".zip")
            .tempfile()?;
        let (file, temp_path) = temp.into_parts();

        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut hasher = BitsHasher::new();
        let mut buf = vec![0u8; CHUNK_SIZE];

        for relative in &files {
            let full = source.join(relative);
            let mut input = File::open(&full)?;
            let len = input.metadata()?.len();

            hasher.begin_file(relative, len);
            writer.start_file(relative.as_str(), options).map_err(zip_error)?;

            loop {
                let n = input.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                writer.write_all(&buf[..n])?;
            }
        }

        let file = writer.finish().map_err(zip_error)?;
        let size = file.metadata()?.len();
        let file_count = hasher.file_count();
        let digest = hasher.finish();

        info!(
            "Built bits archive: {} files, {} bytes, digest {}",
            file_count,
            size,
            BitsHasher::short_digest(&digest)
        );

        Ok(Self {
            path: temp_path.to_path_buf(),
            digest,
            size,
            file_count,
            _temp: Some(temp_path),
        })
    }

    /// Returns the path of the archive file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the SHA-256 digest of the bits.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Returns the archive size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Returns the number of files in the archive.
    #[must_use]
    pub const fn file_count(&self) -> usize {
        self.file_count
    }
}

/// Collects archive-relative paths of the files under `dir`.
///
/// Symlinks to files are archived with the target's contents. Symlinked
/// directories, dangling links and names that are not UTF-8 are skipped with
/// a warning.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            warn!("Skipping {}: file name is not valid UTF-8", path.display());
            continue;
        };

        if DEFAULT_IGNORED.contains(&name.as_str()) {
            continue;
        }
        if dir == root && (name == "manifest.yml" || name == "manifest.yaml") {
            continue;
        }

        let mut file_type = entry.file_type()?;
        if file_type.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(target) if target.is_file() => file_type = target.file_type(),
                Ok(_) => {
                    warn!("Skipping symlink {}: target is not a file", path.display());
                    continue;
                }
                Err(e) => {
                    warn!("Skipping symlink {}: {}", path.display(), e);
                    continue;
                }
            }
        }

        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| PushError::internal(format!("Path outside bits root: {e}")))?;
            let relative: Vec<&str> = relative
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect();
            out.push(relative.join("/"));
        }
    }
    Ok(())
}

fn zip_error(err: zip::result::ZipError) -> PushError {
    PushError::Io(std::io::Error::other(err))
}
