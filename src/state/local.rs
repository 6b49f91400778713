//! Local file-based record storage.
//!
//! Records live under `.pushdeck/<space>/<app>.json`, next to a per-app
//! `<app>.lock` file. Space and application names are percent-encoded, so
//! distinct names never share a file.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{PushError, Result, StateError};

use super::lock::LockInfo;
use super::store::RecordStore;
use super::types::PushRecord;

/// Default record directory name.
pub const RECORD_DIR: &str = ".pushdeck";

/// Local file-based record store.
#[derive(Debug, Clone)]
pub struct LocalRecordStore {
    /// Base directory for record files.
    base_dir: PathBuf,
}

impl LocalRecordStore {
    /// Creates a store under `.pushdeck` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| PushError::internal(format!("Cannot determine current directory: {e}")))?
            .join(RECORD_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn space_dir(&self, space: &str) -> PathBuf {
        self.base_dir.join(encode_component(space))
    }

    fn record_path(&self, space: &str, app: &str) -> PathBuf {
        self.space_dir(space).join(format!("{}.json", encode_component(app)))
    }

    fn lock_path(&self, space: &str, app: &str) -> PathBuf {
        self.space_dir(space).join(format!("{}.lock", encode_component(app)))
    }

    async fn ensure_dir(&self, space: &str) -> Result<()> {
        let dir = self.space_dir(space);
        fs::create_dir_all(&dir).await.map_err(|e| {
            StateError::write(format!("Failed to create {}: {e}", dir.display()))
        })?;
        Ok(())
    }

    async fn read_lock_file(path: &Path) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::Corrupted {
                    message: format!("Failed to read lock file: {e}"),
                }
                .into());
            }
        };

        let lock_info = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse lock file {}: {e}", path.display()),
        })?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing if it already exists.
    async fn create_lock_file(path: &Path, lock_info: &LockInfo) -> Result<bool> {
        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }
                .into());
            }
        };

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })?;
        file.sync_all().await.map_err(|e| StateError::LockFailed {
            message: format!("Failed to sync lock file: {e}"),
        })?;

        Ok(true)
    }

    /// Replaces the content of an existing lock file.
    async fn rewrite_lock_file(path: &Path, lock_info: &LockInfo) -> Result<()> {
        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let temp_path = path.with_extension("lock.tmp");
        fs::write(&temp_path, content)
            .await
            .map_err(|e| StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StateError::LockFailed {
                message: format!("Failed to replace lock file: {e}"),
            })?;

        Ok(())
    }

    async fn remove_lock_file(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            }
            .into()),
        }
    }
}

#[async_trait]
impl RecordStore for LocalRecordStore {
    async fn load(&self, space: &str, app: &str) -> Result<Option<PushRecord>> {
        let path = self.record_path(space, app);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No push record at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(StateError::Corrupted {
                    message: format!("Failed to read {}: {e}", path.display()),
                }
                .into());
            }
        };

        debug!("Loaded push record from {}", path.display());

        let record = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse {}: {e}", path.display()),
        })?;

        Ok(Some(record))
    }

    async fn save(&self, record: &PushRecord) -> Result<()> {
        self.ensure_dir(&record.space).await?;

        let path = self.record_path(&record.space, &record.app);
        info!("Saving push record to {}", path.display());

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| StateError::serialization(format!("Failed to serialize record: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create temp file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write temp file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync temp file: {e}")))?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename temp file: {e}")))?;

        Ok(())
    }

    async fn acquire_lock(&self, space: &str, app: &str, holder: &str) -> Result<LockInfo> {
        self.ensure_dir(space).await?;
        let path = self.lock_path(space, app);

        // One retry covers replacing an expired lock
        for _ in 0..2 {
            let lock_info = LockInfo::new(app, holder);
            if Self::create_lock_file(&path, &lock_info).await? {
                info!("Acquired push lock for {} ({})", app, lock_info.lock_id);
                return Ok(lock_info);
            }

            match Self::read_lock_file(&path).await? {
                Some(existing) if !existing.is_expired() => {
                    return Err(StateError::LockedByOther {
                        app: app.to_string(),
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }
                    .into());
                }
                Some(existing) => {
                    warn!(
                        "Removing expired push lock for {} held by {}",
                        app, existing.holder
                    );
                    Self::remove_lock_file(&path).await?;
                }
                None => {}
            }
        }

        Err(StateError::LockFailed {
            message: format!("Lock for '{app}' changed hands while acquiring it"),
        }
        .into())
    }

    async fn refresh_lock(&self, space: &str, app: &str, lock_id: &str) -> Result<LockInfo> {
        let path = self.lock_path(space, app);

        match Self::read_lock_file(&path).await? {
            Some(mut existing) if existing.lock_id == lock_id => {
                existing.refresh();
                Self::rewrite_lock_file(&path, &existing).await?;
                debug!(
                    "Refreshed push lock for {} ({}s left)",
                    app,
                    existing.remaining_secs()
                );
                Ok(existing)
            }
            Some(existing) => Err(StateError::LockFailed {
                message: format!("Push lock for '{app}' was taken over by {}", existing.holder),
            }
            .into()),
            None => Err(StateError::LockFailed {
                message: format!("Push lock for '{app}' is gone"),
            }
            .into()),
        }
    }

    async fn release_lock(&self, space: &str, app: &str, lock_id: &str) -> Result<()> {
        let path = self.lock_path(space, app);

        match Self::read_lock_file(&path).await? {
            Some(existing) if existing.lock_id == lock_id => {
                Self::remove_lock_file(&path).await?;
                info!("Released push lock for {}", app);
            }
            Some(existing) => {
                warn!(
                    "Push lock for {} is now held by {}, leaving it in place",
                    app, existing.holder
                );
            }
            None => debug!("No push lock to release for {}", app),
        }

        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

/// Encodes a name as a single path component, distinct names staying distinct.
///
/// ASCII letters, digits, `-` and `_` are kept; every other byte becomes
/// `%XX`. The empty name becomes a bare `%`.
fn encode_component(name: &str) -> String {
    if name.is_empty() {
        return String::from("%");
    }

    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::PushHistoryEntry;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalRecordStore::with_base_dir(temp_dir.path());

        assert!(store.load("space", "foo").await.unwrap().is_none());

        let mut record = PushRecord::new("space", "foo");
        record.app_guid = Some(String::from("app-guid"));
        record.bits_digest = Some(String::from("digest"));
        record.add_history(PushHistoryEntry::new(vec![String::from("upload")], None));
        store.save(&record).await.unwrap();

        let loaded = store.load("space", "foo").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(temp_dir.path().join("space").join("foo.json").exists());
        assert!(!temp_dir.path().join("space").join("foo.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalRecordStore::with_base_dir(temp_dir.path());

        let lock = store.acquire_lock("space", "foo", "first").await.unwrap();

        let err = store
            .acquire_lock("space", "foo", "second")
            .await
            .unwrap_err();
        match err {
            PushError::State(StateError::LockedByOther { app, holder, .. }) => {
                assert_eq!(app, "foo");
                assert_eq!(holder, "first");
            }
            other => panic!("unexpected error: {other}"),
        }

        store
            .release_lock("space", "foo", &lock.lock_id)
            .await
            .unwrap();
        store.acquire_lock("space", "foo", "second").await.unwrap();
    }

    #[tokio::test]
    async fn test_different_apps_lock_independently() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalRecordStore::with_base_dir(temp_dir.path());

        store.acquire_lock("space", "foo", "first").await.unwrap();
        store.acquire_lock("space", "bar", "second").await.unwrap();
        store.acquire_lock("other", "foo", "third").await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lock_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalRecordStore::with_base_dir(temp_dir.path());

        let mut stale = LockInfo::new("foo", "crashed");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        std::fs::create_dir_all(temp_dir.path().join("space")).unwrap();
        std::fs::write(
            temp_dir.path().join("space").join("foo.lock"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let lock = store.acquire_lock("space", "foo", "fresh").await.unwrap();
        assert_eq!(lock.holder, "fresh");
    }

    #[tokio::test]
    async fn test_release_with_stale_id_keeps_lock() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalRecordStore::with_base_dir(temp_dir.path());

        store.acquire_lock("space", "foo", "first").await.unwrap();
        store.release_lock("space", "foo", "not-mine").await.unwrap();

        assert!(store.acquire_lock("space", "foo", "second").await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_keeps_lock_from_expiring() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalRecordStore::with_base_dir(temp_dir.path());
        let lock_path = temp_dir.path().join("space").join("foo.lock");

        let mut lock = store.acquire_lock("space", "foo", "first").await.unwrap();
        lock.expires_at = chrono::Utc::now() + chrono::Duration::seconds(1);
        std::fs::write(&lock_path, serde_json::to_string(&lock).unwrap()).unwrap();

        let refreshed = store
            .refresh_lock("space", "foo", &lock.lock_id)
            .await
            .unwrap();
        assert_eq!(refreshed.lock_id, lock.lock_id);
        assert!(refreshed.expires_at > lock.expires_at);

        let on_disk: LockInfo =
            serde_json::from_str(&std::fs::read_to_string(&lock_path).unwrap()).unwrap();
        assert_eq!(on_disk, refreshed);
        assert!(store.acquire_lock("space", "foo", "second").await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_fails_once_lock_is_lost() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalRecordStore::with_base_dir(temp_dir.path());

        let lock = store.acquire_lock("space", "foo", "first").await.unwrap();
        store
            .release_lock("space", "foo", &lock.lock_id)
            .await
            .unwrap();
        assert!(matches!(
            store.refresh_lock("space", "foo", &lock.lock_id).await,
            Err(PushError::State(StateError::LockFailed { .. }))
        ));

        store.acquire_lock("space", "foo", "second").await.unwrap();
        assert!(matches!(
            store.refresh_lock("space", "foo", &lock.lock_id).await,
            Err(PushError::State(StateError::LockFailed { .. }))
        ));
    }

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("my-app_1"), "my-app_1");
        assert_eq!(encode_component("my app"), "my%20app");
        assert_eq!(encode_component("a/b"), "a%2Fb");
        assert_eq!(encode_component(".."), "%2E%2E");
        assert_eq!(encode_component(""), "%");
        assert_eq!(encode_component("café"), "caf%C3%A9");
    }

    #[tokio::test]
    async fn test_similar_names_lock_independently() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalRecordStore::with_base_dir(temp_dir.path());

        store.acquire_lock("space", "my app", "first").await.unwrap();
        store.acquire_lock("space", "my_app", "second").await.unwrap();
        store.acquire_lock("space", "my.app", "third").await.unwrap();

        store.save(&PushRecord::new("space", "my app")).await.unwrap();
        assert!(store.load("space", "my_app").await.unwrap().is_none());
    }
}
