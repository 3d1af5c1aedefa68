/*!
Error types for the harvest persistence core.
*/

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout harvest.
pub type Result<T> = std::result::Result<T, PersistError>;

/// Errors that can occur while resolving, encoding or writing an artifact.
#[derive(Error, Debug)]
pub enum PersistError {
    /// I/O errors outside of a backend write
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A template placeholder had no matching variable
    #[error("Missing template variable '{name}' in template '{template}'")]
    MissingTemplateVariable { name: String, template: String },

    /// The template string itself is malformed
    #[error("Invalid template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// A required configuration key is not set
    #[error("Missing configuration key: {0}")]
    MissingConfig(String),

    /// Local directory creation or file write failed
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Object-store transport errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// The configured save service has no registered backend (strict mode only)
    #[error("Not configured to save to {0}")]
    UnrecognizedStorageService(String),

    /// The object store answered with a non-success status (strict mode only)
    #[error("Object store returned status {status} for {bucket}/{key}")]
    ObjectStoreStatus {
        bucket: String,
        key: String,
        status: u16,
    },

    /// A user-supplied pipeline stage failed
    #[error("Stage error: {0}")]
    Stage(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl PersistError {
    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new stage error
    pub fn stage<S: Into<String>>(msg: S) -> Self {
        Self::Stage(msg.into())
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}
