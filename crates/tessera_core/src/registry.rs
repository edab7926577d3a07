//! Per-path configuration defaults.
//!
//! Handles opened without an explicit key, schema version or migration
//! callback fall back to what was registered here for their path. Entries
//! live until [`ConfigRegistry::reset`].

use crate::config::MigrationCallback;
use crate::crypto::EncryptionKey;
use crate::types::PathKey;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct RegistryEntry {
    encryption_key: Option<EncryptionKey>,
    schema_version: Option<u64>,
    migration_callback: Option<MigrationCallback>,
}

impl RegistryEntry {
    fn is_empty(&self) -> bool {
        self.encryption_key.is_none()
            && self.schema_version.is_none()
            && self.migration_callback.is_none()
    }
}

/// Process-wide defaults keyed by path.
///
/// All operations are serialized by one mutex; each is a single map access.
#[derive(Default)]
pub struct ConfigRegistry {
    entries: Mutex<HashMap<PathKey, RegistryEntry>>,
}

impl ConfigRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or clears the default key for `path`.
    pub fn set_encryption_key(&self, path: &PathKey, key: Option<EncryptionKey>) {
        self.update(path, |entry| entry.encryption_key = key);
    }

    /// Default key for `path`.
    #[must_use]
    pub fn encryption_key(&self, path: &PathKey) -> Option<EncryptionKey> {
        self.entries
            .lock()
            .get(path)
            .and_then(|e| e.encryption_key.clone())
    }

    /// Sets the default schema version and migration callback for `path`.
    pub fn set_schema_version(
        &self,
        path: &PathKey,
        version: u64,
        callback: Option<MigrationCallback>,
    ) {
        self.update(path, |entry| {
            entry.schema_version = Some(version);
            entry.migration_callback = callback;
        });
    }

    /// Default schema version for `path`, 0 when none was registered.
    #[must_use]
    pub fn schema_version(&self, path: &PathKey) -> u64 {
        self.entries
            .lock()
            .get(path)
            .and_then(|e| e.schema_version)
            .unwrap_or(0)
    }

    /// Default migration callback for `path`.
    #[must_use]
    pub fn migration_callback(&self, path: &PathKey) -> Option<MigrationCallback> {
        self.entries
            .lock()
            .get(path)
            .and_then(|e| e.migration_callback.clone())
    }

    /// Number of paths with registered defaults.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes every entry.
    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    fn update(&self, path: &PathKey, apply: impl FnOnce(&mut RegistryEntry)) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(path.clone()).or_default();
        apply(entry);
        if entry.is_empty() {
            entries.remove(path);
        }
    }
}

impl std::fmt::Debug for ConfigRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRegistry")
            .field("paths", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use std::path::Path;
    use std::sync::Arc;

    fn path(name: &str) -> PathKey {
        PathKey::resolve(Path::new("/tessera-registry-test").join(name).as_path()).unwrap()
    }

    #[test]
    fn defaults_are_empty() {
        let registry = ConfigRegistry::new();
        let p = path("a.db");
        assert!(registry.encryption_key(&p).is_none());
        assert_eq!(registry.schema_version(&p), 0);
        assert!(registry.migration_callback(&p).is_none());
    }

    #[test]
    fn stores_per_path() {
        let registry = ConfigRegistry::new();
        let key = EncryptionKey::from_bytes(&[3u8; KEY_SIZE]).unwrap();
        registry.set_encryption_key(&path("a.db"), Some(key.clone()));
        let callback: MigrationCallback = Arc::new(|_| Ok(()));
        registry.set_schema_version(&path("b.db"), 7, Some(callback));

        assert_eq!(registry.encryption_key(&path("a.db")), Some(key));
        assert!(registry.encryption_key(&path("b.db")).is_none());
        assert_eq!(registry.schema_version(&path("b.db")), 7);
        assert!(registry.migration_callback(&path("b.db")).is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn clearing_a_key_drops_empty_entries() {
        let registry = ConfigRegistry::new();
        let key = EncryptionKey::from_bytes(&[3u8; KEY_SIZE]).unwrap();
        registry.set_encryption_key(&path("a.db"), Some(key));
        registry.set_encryption_key(&path("a.db"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let registry = ConfigRegistry::new();
        registry.set_schema_version(&path("a.db"), 2, None);
        registry.reset();
        assert_eq!(registry.schema_version(&path("a.db")), 0);
        assert!(registry.is_empty());
    }
}
