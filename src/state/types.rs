//! Push record types.
//!
//! A push record remembers what the last push of an application left
//! behind, most importantly the digest of the uploaded bits, which the
//! platform does not always report back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current version of the record format.
pub const RECORD_VERSION: &str = "1.0";

/// Maximum number of history entries kept per application.
pub const MAX_HISTORY: usize = 20;

/// What the last pushes of one application did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRecord {
    /// Record format version.
    pub version: String,
    /// Space GUID.
    pub space: String,
    /// Application name.
    pub app: String,
    /// Application GUID, once known.
    #[serde(default)]
    pub app_guid: Option<String>,
    /// Digest of the last successfully uploaded bits.
    #[serde(default)]
    pub bits_digest: Option<String>,
    /// When the application was last pushed.
    pub last_pushed: DateTime<Utc>,
    /// Recent pushes, oldest first.
    #[serde(default)]
    pub history: Vec<PushHistoryEntry>,
}

/// A single entry in the push history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushHistoryEntry {
    /// When the push happened.
    pub timestamp: DateTime<Utc>,
    /// Kinds of the planned changes.
    pub changes: Vec<String>,
    /// Digest of the bits at push time.
    #[serde(default)]
    pub bits_digest: Option<String>,
    /// Whether every planned change was applied.
    pub success: bool,
    /// Error message, if the push failed.
    #[serde(default)]
    pub error: Option<String>,
}

impl PushRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new(space: &str, app: &str) -> Self {
        Self {
            version: String::from(RECORD_VERSION),
            space: space.to_string(),
            app: app.to_string(),
            app_guid: None,
            bits_digest: None,
            last_pushed: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Appends a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: PushHistoryEntry) {
        self.last_pushed = entry.timestamp;
        self.history.push(entry);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }

    /// Returns the most recent history entry.
    #[must_use]
    pub fn last_entry(&self) -> Option<&PushHistoryEntry> {
        self.history.last()
    }
}

impl PushHistoryEntry {
    /// Creates an entry for a push of the given changes.
    #[must_use]
    pub fn new(changes: Vec<String>, bits_digest: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            changes,
            bits_digest,
            success: true,
            error: None,
        }
    }

    /// Marks the entry as failed.
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}
