//! Local push records.
//!
//! This module remembers, per space and application, what the last push
//! uploaded, and serializes concurrent pushes of the same application.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LocalRecordStore, RECORD_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::RecordStore;
pub use types::{MAX_HISTORY, PushHistoryEntry, PushRecord, RECORD_VERSION};
