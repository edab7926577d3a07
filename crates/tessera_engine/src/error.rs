//! Error types for engine operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error type returned by migration callbacks.
pub type MigrationError = Box<dyn std::error::Error + Send + Sync>;

/// Errors reported across the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The process may not open the file with the requested access.
    #[error("permission denied for {}: {message}", .path.display())]
    PermissionDenied {
        /// File that was being opened.
        path: PathBuf,
        /// Description of the refusal.
        message: String,
    },

    /// Another process attached to the file cannot share its lock file with us.
    #[error("incompatible lock file for {}: {message}", .path.display())]
    IncompatibleLockFile {
        /// File that was being opened.
        path: PathBuf,
        /// Description of the mismatch.
        message: String,
    },

    /// The destination file already exists.
    #[error("file already exists: {}", .path.display())]
    AlreadyExists {
        /// The existing file.
        path: PathBuf,
    },

    /// The file could not be accessed (missing, wrong key, corrupt).
    #[error("unable to access {}: {message}", .path.display())]
    AccessError {
        /// File that was being accessed.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The requested schema version is older than the stored one.
    #[error("schema version {requested} is less than stored version {stored}")]
    SchemaDowngrade {
        /// Version stored in the file.
        stored: u64,
        /// Version requested by the caller.
        requested: u64,
    },

    /// The stored schema differs from the requested one without a version bump.
    #[error("migration required: {message}")]
    MigrationRequired {
        /// Description of the schema difference.
        message: String,
    },

    /// A migration callback failed; nothing was applied.
    #[error("migration failed: {message}")]
    Migration {
        /// Error reported by the callback.
        message: String,
    },

    /// A write was attempted outside a write transaction.
    #[error("not in a write transaction")]
    NotInTransaction,

    /// A write was attempted on a read-only session.
    #[error("session is read-only")]
    ReadOnly,

    /// Any other engine failure.
    #[error("engine failure: {message}")]
    Failure {
        /// Description of the failure.
        message: String,
    },
}

impl EngineError {
    /// Creates an access error.
    pub fn access(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::AccessError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a generic engine failure.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    /// Creates a migration-required error.
    pub fn migration_required(message: impl Into<String>) -> Self {
        Self::MigrationRequired {
            message: message.into(),
        }
    }
}
