//! Error types for Tessera core.

use std::path::PathBuf;
use tessera_engine::EngineError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Broad classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The request itself is invalid or conflicts with open handles.
    Configuration,
    /// The engine could not open or write the file.
    File,
    /// Schema setup failed.
    Migration,
    /// A write transaction call failed.
    Transaction,
}

/// Stable numeric code of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// See [`CoreError::InvalidPath`].
    InvalidPath = 100,
    /// See [`CoreError::ConfigurationConflict`].
    ConfigurationConflict = 101,
    /// See [`CoreError::AlreadyOpenConflict`].
    AlreadyOpenConflict = 102,
    /// See [`CoreError::InvalidVersion`].
    InvalidVersion = 103,
    /// See [`CoreError::InvalidKeyLength`].
    InvalidKeyLength = 104,
    /// See [`CoreError::DebuggerAttached`].
    DebuggerAttached = 105,
    /// See [`CoreError::UnsupportedPlatform`].
    UnsupportedPlatform = 106,
    /// See [`CoreError::SchemaDowngrade`].
    SchemaDowngrade = 107,
    /// See [`CoreError::SchemaMismatch`].
    SchemaMismatch = 108,
    /// See [`CoreError::PermissionDenied`].
    PermissionDenied = 200,
    /// See [`CoreError::IncompatibleLockFile`].
    IncompatibleLockFile = 201,
    /// See [`CoreError::AlreadyExists`].
    AlreadyExists = 202,
    /// See [`CoreError::AccessError`].
    AccessError = 203,
    /// See [`CoreError::EngineFailure`].
    EngineFailure = 204,
    /// See [`CoreError::MigrationFailed`].
    MigrationFailed = 300,
    /// See [`CoreError::MigrationRequired`].
    MigrationRequired = 301,
    /// See [`CoreError::Transaction`].
    TransactionError = 400,
}

impl ErrorCode {
    /// Returns the numeric value of the code.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Errors that can occur in Tessera core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The path cannot be resolved.
    #[error("invalid path '{}': {message}", .path.display())]
    InvalidPath {
        /// Path as given by the caller.
        path: PathBuf,
        /// Why it was rejected.
        message: String,
    },

    /// A handle for the path is open with incompatible settings.
    #[error("configuration conflict for {}: {message}", .path.display())]
    ConfigurationConflict {
        /// Resolved path.
        path: PathBuf,
        /// Which setting differs.
        message: String,
    },

    /// A handle for the path is open at a different schema version.
    #[error(
        "{} is already open at schema version {open_version}, requested {requested}",
        .path.display()
    )]
    AlreadyOpenConflict {
        /// Resolved path.
        path: PathBuf,
        /// Schema version of the open handle.
        open_version: u64,
        /// Version that was requested.
        requested: u64,
    },

    /// The schema version is reserved.
    #[error("invalid schema version {version}")]
    InvalidVersion {
        /// Rejected version.
        version: u64,
    },

    /// Encryption key has the wrong length.
    #[error("invalid encryption key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// Encryption was requested while a debugger is attached.
    #[error("cannot open an encrypted file while a debugger is attached")]
    DebuggerAttached,

    /// Encryption at rest is not available on this target.
    #[error("encryption is not supported on this platform")]
    UnsupportedPlatform,

    /// The file has a newer schema version than requested.
    #[error("schema version {stored} on disk is newer than requested version {requested}")]
    SchemaDowngrade {
        /// Version stored in the file.
        stored: u64,
        /// Version that was requested.
        requested: u64,
    },

    /// An object type or property does not match the handle's schema.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// What did not match.
        message: String,
    },

    /// The engine refused access to the file.
    #[error("permission denied for {}: {message}", .path.display())]
    PermissionDenied {
        /// Resolved path.
        path: PathBuf,
        /// Engine message.
        message: String,
    },

    /// The file is attached elsewhere in a way that cannot be shared.
    #[error("incompatible lock file for {}: {message}", .path.display())]
    IncompatibleLockFile {
        /// Resolved path.
        path: PathBuf,
        /// Engine message.
        message: String,
    },

    /// The destination file already exists.
    #[error("file already exists: {}", .path.display())]
    AlreadyExists {
        /// Destination path.
        path: PathBuf,
    },

    /// The file could not be accessed.
    #[error("cannot access {}: {message}", .path.display())]
    AccessError {
        /// Resolved path.
        path: PathBuf,
        /// Engine message.
        message: String,
    },

    /// Any other engine failure.
    #[error("engine failure: {message}")]
    EngineFailure {
        /// Engine message.
        message: String,
    },

    /// The migration callback failed; nothing was applied.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Callback error.
        message: String,
    },

    /// The schema must change but no migration is possible.
    #[error("migration required: {message}")]
    MigrationRequired {
        /// What differs.
        message: String,
    },

    /// A begin, commit or cancel call failed.
    #[error("transaction error: {message}")]
    Transaction {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration conflict error.
    pub fn configuration_conflict(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigurationConflict {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid key length error.
    pub fn invalid_key_length(actual: usize, expected: usize) -> Self {
        Self::InvalidKeyLength { expected, actual }
    }

    /// Creates a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Creates an engine failure error.
    pub fn engine_failure(message: impl Into<String>) -> Self {
        Self::EngineFailure {
            message: message.into(),
        }
    }

    /// Creates a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidPath { .. }
            | Self::ConfigurationConflict { .. }
            | Self::AlreadyOpenConflict { .. }
            | Self::InvalidVersion { .. }
            | Self::InvalidKeyLength { .. }
            | Self::DebuggerAttached
            | Self::UnsupportedPlatform
            | Self::SchemaDowngrade { .. }
            | Self::SchemaMismatch { .. } => ErrorCategory::Configuration,
            Self::PermissionDenied { .. }
            | Self::IncompatibleLockFile { .. }
            | Self::AlreadyExists { .. }
            | Self::AccessError { .. }
            | Self::EngineFailure { .. } => ErrorCategory::File,
            Self::MigrationFailed { .. } | Self::MigrationRequired { .. } => {
                ErrorCategory::Migration
            }
            Self::Transaction { .. } => ErrorCategory::Transaction,
        }
    }

    /// Returns the stable code of this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidPath { .. } => ErrorCode::InvalidPath,
            Self::ConfigurationConflict { .. } => ErrorCode::ConfigurationConflict,
            Self::AlreadyOpenConflict { .. } => ErrorCode::AlreadyOpenConflict,
            Self::InvalidVersion { .. } => ErrorCode::InvalidVersion,
            Self::InvalidKeyLength { .. } => ErrorCode::InvalidKeyLength,
            Self::DebuggerAttached => ErrorCode::DebuggerAttached,
            Self::UnsupportedPlatform => ErrorCode::UnsupportedPlatform,
            Self::SchemaDowngrade { .. } => ErrorCode::SchemaDowngrade,
            Self::SchemaMismatch { .. } => ErrorCode::SchemaMismatch,
            Self::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            Self::IncompatibleLockFile { .. } => ErrorCode::IncompatibleLockFile,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::AccessError { .. } => ErrorCode::AccessError,
            Self::EngineFailure { .. } => ErrorCode::EngineFailure,
            Self::MigrationFailed { .. } => ErrorCode::MigrationFailed,
            Self::MigrationRequired { .. } => ErrorCode::MigrationRequired,
            Self::Transaction { .. } => ErrorCode::TransactionError,
        }
    }
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::PermissionDenied { path, message } => {
                Self::PermissionDenied { path, message }
            }
            EngineError::IncompatibleLockFile { path, message } => {
                Self::IncompatibleLockFile { path, message }
            }
            EngineError::AlreadyExists { path } => Self::AlreadyExists { path },
            EngineError::AccessError { path, message } => Self::AccessError { path, message },
            EngineError::SchemaDowngrade { stored, requested } => {
                Self::SchemaDowngrade { stored, requested }
            }
            EngineError::MigrationRequired { message } => Self::MigrationRequired { message },
            EngineError::Migration { message } => Self::MigrationFailed { message },
            EngineError::NotInTransaction => Self::transaction("not in a write transaction"),
            EngineError::ReadOnly => Self::transaction("handle is read-only"),
            EngineError::Failure { message } => Self::EngineFailure { message },
        }
    }
}
