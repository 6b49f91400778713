//! Record store trait definition.
//!
//! This module defines the common interface for push record storage.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::PushRecord;
use crate::error::Result;

/// Trait for push record storage backends.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Loads the record of an application.
    ///
    /// Returns `None` if the application was never pushed from here.
    async fn load(&self, space: &str, app: &str) -> Result<Option<PushRecord>>;

    /// Saves the record of an application.
    async fn save(&self, record: &PushRecord) -> Result<()>;

    /// Acquires the push lock of an application.
    ///
    /// Fails with `LockedByOther` while another holder has an unexpired lock.
    async fn acquire_lock(&self, space: &str, app: &str, holder: &str) -> Result<LockInfo>;

    /// Extends the push lock of an application while `lock_id` still holds it.
    ///
    /// Fails with `LockFailed` once the lock is gone or held by someone else.
    async fn refresh_lock(&self, space: &str, app: &str, lock_id: &str) -> Result<LockInfo>;

    /// Releases the push lock of an application if `lock_id` still holds it.
    async fn release_lock(&self, space: &str, app: &str, lock_id: &str) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl RecordStore for Box<dyn RecordStore> {
    async fn load(&self, space: &str, app: &str) -> Result<Option<PushRecord>> {
        (**self).load(space, app).await
    }

    async fn save(&self, record: &PushRecord) -> Result<()> {
        (**self).save(record).await
    }

    async fn acquire_lock(&self, space: &str, app: &str, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(space, app, holder).await
    }

    async fn refresh_lock(&self, space: &str, app: &str, lock_id: &str) -> Result<LockInfo> {
        (**self).refresh_lock(space, app, lock_id).await
    }

    async fn release_lock(&self, space: &str, app: &str, lock_id: &str) -> Result<()> {
        (**self).release_lock(space, app, lock_id).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
