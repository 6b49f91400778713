//! Error types for the pushdeck push engine.
//!
//! This module provides the error hierarchy for every stage of a push:
//! configuration and validation, local record storage, the platform API,
//! and plan execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the push engine.
#[derive(Debug, Error)]
pub enum PushError {
    /// Configuration, manifest, and validation errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Local record store errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Platform API errors.
    #[error("Platform API error: {0}")]
    Platform(#[from] PlatformError),

    /// Plan execution errors.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest file could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// The desired application is inconsistent.
    #[error("Validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A required setting is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate application definition in a manifest.
    #[error("Duplicate application name in manifest: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// A memory or disk quantity could not be parsed.
    #[error("Invalid quantity for {field}: {value}")]
    InvalidQuantity {
        /// Field holding the quantity.
        field: String,
        /// The invalid value.
        value: String,
    },

    /// A route string could not be parsed.
    #[error("Invalid route: {route}")]
    InvalidRoute {
        /// The invalid route.
        route: String,
    },

    /// The manifest does not define the requested application.
    #[error("Application '{name}' not found in manifest")]
    ApplicationNotInManifest {
        /// Requested application name.
        name: String,
    },
}

/// Local record store errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// A record file is corrupted.
    #[error("Push record is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Writing a record failed.
    #[error("Failed to write push record: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire push lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Another push of the same application holds the lock.
    #[error("Application '{app}' is being pushed by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Application name.
        app: String,
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("Push record serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Platform API errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Authentication or authorization failed.
    #[error("Platform authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// Network failure talking to the platform.
    #[error("Network error communicating with the platform: {message}")]
    Transport {
        /// Description of the network error.
        message: String,
    },

    /// Rate limited.
    #[error("Platform API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The platform refused a request.
    #[error("Platform rejected the request: {status} - {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error message from the platform.
        message: String,
    },

    /// A resource addressed by GUID does not exist.
    #[error("{resource} not found: {guid}")]
    NotFound {
        /// Kind of resource.
        resource: String,
        /// GUID that was looked up.
        guid: String,
    },

    /// Invalid response from the API.
    #[error("Invalid response from the platform API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Plan execution errors.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A change was refused or failed; the remaining plan was not applied.
    #[error("Change {index} ({change}) failed: {source}")]
    ChangeFailed {
        /// Position of the change in the plan.
        index: usize,
        /// Description of the change.
        change: String,
        /// Underlying platform error.
        #[source]
        source: PlatformError,
    },

    /// The bits upload failed after all attempts.
    #[error("Upload failed after {attempts} attempts: {source}")]
    UploadFailed {
        /// Number of attempts made.
        attempts: u32,
        /// Error of the last attempt.
        #[source]
        source: PlatformError,
    },

    /// Execution was cancelled before the plan completed.
    #[error("Push cancelled after {applied} applied changes")]
    Cancelled {
        /// Number of changes applied before cancellation.
        applied: usize,
    },

    /// A change referenced an application or route that was never resolved.
    #[error("Unresolved reference in plan: {message}")]
    Unresolved {
        /// What could not be resolved.
        message: String,
    },
}

/// Result type alias for push operations.
pub type Result<T> = std::result::Result<T, PushError>;

impl PushError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Platform(e) => e.is_retryable(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Platform(PlatformError::RateLimited { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            Self::Platform(PlatformError::Transport { .. }) => Some(5),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl PlatformError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true for transient failures worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport { .. })
    }
}
