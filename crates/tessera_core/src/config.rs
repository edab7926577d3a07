//! Handle configuration.

use crate::error::CoreResult;
use crate::types::PathKey;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tessera_engine::{MigrationContext, MigrationError, Schema};
use zeroize::Zeroizing;

/// Migration callback run when a file's schema version increases.
///
/// The callback receives the old and new state through the
/// [`MigrationContext`] and runs inside the engine's schema transaction.
pub type MigrationCallback =
    Arc<dyn Fn(&mut dyn MigrationContext) -> Result<(), MigrationError> + Send + Sync>;

/// Where a handle's file lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// A file on disk.
    Path(PathBuf),
    /// A named in-memory file, discarded with its last handle.
    InMemory(String),
}

impl Location {
    /// Resolves the location to its registry key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for an empty path or identifier.
    pub fn resolve(&self) -> CoreResult<PathKey> {
        match self {
            Self::Path(path) => PathKey::resolve(path),
            Self::InMemory(identifier) => PathKey::in_memory(identifier),
        }
    }
}

/// Configuration for opening a handle.
///
/// # Example
///
/// ```rust
/// use tessera_core::HandleConfig;
///
/// let config = HandleConfig::new("/data/app.tessera")
///     .read_only(true)
///     .schema_version(3);
/// assert!(config.read_only);
/// ```
#[derive(Clone)]
pub struct HandleConfig {
    /// File location.
    pub location: Location,

    /// Encryption key. Validated when the handle opens.
    pub encryption_key: Option<Zeroizing<Vec<u8>>>,

    /// Open without write access.
    pub read_only: bool,

    /// Use the schema stored in the file instead of a declared one.
    pub dynamic_schema: bool,

    /// Target schema version. Falls back to the runtime registry when unset.
    pub schema_version: Option<u64>,

    /// Migration callback. Falls back to the runtime registry when unset.
    pub migration_callback: Option<MigrationCallback>,

    /// Declared schema. Falls back to the runtime's registered schema.
    pub custom_schema: Option<Schema>,
}

impl HandleConfig {
    /// Creates a configuration for the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::at(Location::Path(path.into()))
    }

    /// Creates a configuration for the in-memory file named `identifier`.
    #[must_use]
    pub fn in_memory(identifier: impl Into<String>) -> Self {
        Self::at(Location::InMemory(identifier.into()))
    }

    /// Creates a configuration for a fresh, uniquely named in-memory file.
    #[must_use]
    pub fn anonymous_in_memory() -> Self {
        Self::in_memory(uuid::Uuid::new_v4().simple().to_string())
    }

    fn at(location: Location) -> Self {
        Self {
            location,
            encryption_key: None,
            read_only: false,
            dynamic_schema: false,
            schema_version: None,
            migration_callback: None,
            custom_schema: None,
        }
    }

    /// Sets the encryption key.
    #[must_use]
    pub fn encryption_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.encryption_key = Some(Zeroizing::new(key.as_ref().to_vec()));
        self
    }

    /// Sets whether the handle is read-only.
    #[must_use]
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether the handle uses the stored schema.
    #[must_use]
    pub fn dynamic_schema(mut self, value: bool) -> Self {
        self.dynamic_schema = value;
        self
    }

    /// Sets the target schema version.
    #[must_use]
    pub fn schema_version(mut self, version: u64) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Sets the migration callback.
    #[must_use]
    pub fn migration<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut dyn MigrationContext) -> Result<(), MigrationError> + Send + Sync + 'static,
    {
        self.migration_callback = Some(Arc::new(callback));
        self
    }

    /// Sets the declared schema.
    #[must_use]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.custom_schema = Some(schema);
        self
    }

    /// Whether the file is in-memory.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        matches!(self.location, Location::InMemory(_))
    }
}

impl fmt::Debug for HandleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleConfig")
            .field("location", &self.location)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("read_only", &self.read_only)
            .field("dynamic_schema", &self.dynamic_schema)
            .field("schema_version", &self.schema_version)
            .field("migration_callback", &self.migration_callback.is_some())
            .field("custom_schema", &self.custom_schema)
            .finish()
    }
}

/// Settings of an open handle: its configuration minus secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleSettings {
    /// Resolved file path.
    pub path: PathBuf,
    /// Opened without write access.
    pub read_only: bool,
    /// In-memory file.
    pub in_memory: bool,
    /// Uses the stored schema.
    pub dynamic_schema: bool,
    /// Opened with an encryption key.
    pub encrypted: bool,
    /// Schema version the handle was opened at.
    pub schema_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HandleConfig::new("/tmp/a.db");
        assert!(!config.read_only);
        assert!(!config.dynamic_schema);
        assert!(!config.is_in_memory());
        assert!(config.schema_version.is_none());
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = HandleConfig::in_memory("scratch")
            .read_only(true)
            .dynamic_schema(true)
            .schema_version(4)
            .migration(|_| Ok(()));

        assert!(config.is_in_memory());
        assert!(config.read_only);
        assert!(config.dynamic_schema);
        assert_eq!(config.schema_version, Some(4));
        assert!(config.migration_callback.is_some());
    }

    #[test]
    fn anonymous_identifiers_are_unique() {
        let a = HandleConfig::anonymous_in_memory();
        let b = HandleConfig::anonymous_in_memory();
        assert_ne!(a.location, b.location);
    }

    #[test]
    fn debug_hides_key() {
        let config = HandleConfig::new("/tmp/a.db").encryption_key([42u8; 64]);
        let shown = format!("{config:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("42, 42"));
    }

    #[test]
    fn location_resolution() {
        let key = Location::InMemory("x".into()).resolve().unwrap();
        assert!(key.as_path().ends_with("x"));
        assert!(Location::Path(PathBuf::new()).resolve().is_err());
    }

    #[test]
    fn in_memory_identifier_never_aliases_a_disk_path() {
        let memory = HandleConfig::in_memory("/etc/app.db").location.resolve();
        assert!(matches!(memory, Err(crate::error::CoreError::InvalidPath { .. })));

        let escaped = HandleConfig::in_memory("../../etc/app.db").location.resolve();
        assert!(matches!(escaped, Err(crate::error::CoreError::InvalidPath { .. })));
    }
}
