//! Process-wide coordination state.
//!
//! A [`Runtime`] owns everything handles share: the storage engine, the
//! per-path registry, the handle cache, the encryption guard and the lock
//! that serializes cold opens. Clones share the same state.

use crate::cache::{self, HandleCache};
use crate::config::{HandleConfig, MigrationCallback};
use crate::crypto::{EncryptionGuard, EncryptionKey};
use crate::error::{CoreError, CoreResult};
use crate::handle::Handle;
use crate::registry::ConfigRegistry;
use crate::types::{HandleId, PathKey};
use parking_lot::{ReentrantMutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_engine::{Schema, StorageEngine, UNVERSIONED};

pub(crate) struct RuntimeInner {
    pub(crate) engine: Arc<dyn StorageEngine>,
    pub(crate) registry: ConfigRegistry,
    pub(crate) cache: HandleCache,
    pub(crate) guard: EncryptionGuard,
    /// Held for the whole of a cold open. Reentrant so a migration callback
    /// may open other handles on the same thread.
    pub(crate) init_lock: ReentrantMutex<()>,
    pub(crate) schema: RwLock<Option<Schema>>,
    next_handle: AtomicU64,
}

impl RuntimeInner {
    pub(crate) fn next_handle_id(&self) -> HandleId {
        HandleId::new(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Entry point for opening handles.
///
/// # Example
///
/// ```rust
/// use tessera_core::{HandleConfig, Runtime};
/// use tessera_engine::MemoryEngine;
///
/// let runtime = Runtime::new(MemoryEngine::new());
/// let handle = runtime.open(HandleConfig::anonymous_in_memory()).unwrap();
/// assert!(!handle.is_in_transaction());
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Creates a runtime over `engine` with the guard configured from the
    /// environment.
    pub fn new<E: StorageEngine + 'static>(engine: E) -> Self {
        Self::with_guard(engine, EncryptionGuard::from_env())
    }

    /// Creates a runtime with an explicit encryption guard.
    pub fn with_guard<E: StorageEngine + 'static>(engine: E, guard: EncryptionGuard) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                engine: Arc::new(engine),
                registry: ConfigRegistry::new(),
                cache: HandleCache::default(),
                guard,
                init_lock: ReentrantMutex::new(()),
                schema: RwLock::new(None),
                next_handle: AtomicU64::new(0),
            }),
        }
    }

    /// Opens a handle, or returns the calling thread's cached handle for the
    /// same path.
    ///
    /// # Errors
    ///
    /// Configuration errors when the request conflicts with open handles or
    /// carries an invalid key, file errors from the engine, migration errors
    /// when the schema cannot be brought to the target version.
    pub fn open(&self, config: HandleConfig) -> CoreResult<Handle> {
        cache::acquire(&self.inner, config)
    }

    /// Encryption guard used for every key.
    #[must_use]
    pub fn guard(&self) -> EncryptionGuard {
        self.inner.guard
    }

    /// Registers the default encryption key for `path`, or clears it.
    ///
    /// # Errors
    ///
    /// `InvalidPath` or any key validation error.
    pub fn set_encryption_key(&self, path: impl AsRef<Path>, key: Option<&[u8]>) -> CoreResult<()> {
        let path = PathKey::resolve(path.as_ref())?;
        let key = self.inner.guard.validate(key)?;
        self.inner.registry.set_encryption_key(&path, key);
        Ok(())
    }

    /// Registered encryption key for `path`.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for an empty path.
    pub fn encryption_key(&self, path: impl AsRef<Path>) -> CoreResult<Option<EncryptionKey>> {
        let path = PathKey::resolve(path.as_ref())?;
        Ok(self.inner.registry.encryption_key(&path))
    }

    /// Registers the default schema version and migration callback for
    /// `path`.
    ///
    /// # Errors
    ///
    /// `InvalidVersion` for the unversioned sentinel, `AlreadyOpenConflict`
    /// when a live handle has the path open at another version.
    pub fn set_schema_version(
        &self,
        path: impl AsRef<Path>,
        version: u64,
        callback: Option<MigrationCallback>,
    ) -> CoreResult<()> {
        if version == UNVERSIONED {
            return Err(CoreError::InvalidVersion { version });
        }
        let path = PathKey::resolve(path.as_ref())?;
        if let Some(open_version) = self.inner.cache.live_schema_version(&path) {
            if open_version != version {
                return Err(CoreError::AlreadyOpenConflict {
                    path: path.as_path().to_path_buf(),
                    open_version,
                    requested: version,
                });
            }
        }
        self.inner.registry.set_schema_version(&path, version, callback);
        Ok(())
    }

    /// Registered schema version for `path`, 0 when none.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for an empty path.
    pub fn schema_version(&self, path: impl AsRef<Path>) -> CoreResult<u64> {
        let path = PathKey::resolve(path.as_ref())?;
        Ok(self.inner.registry.schema_version(&path))
    }

    /// Registered migration callback for `path`.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for an empty path.
    pub fn migration_callback(&self, path: impl AsRef<Path>) -> CoreResult<Option<MigrationCallback>> {
        let path = PathKey::resolve(path.as_ref())?;
        Ok(self.inner.registry.migration_callback(&path))
    }

    /// Sets the schema used by opens that carry no custom schema.
    pub fn register_schema(&self, schema: Schema) {
        *self.inner.schema.write() = Some(schema);
    }

    /// Clears registered defaults, the handle cache and the registered
    /// schema. Open handles stay usable but are no longer found by `open`.
    pub fn reset_all(&self) {
        self.inner.registry.reset();
        self.inner.cache.clear();
        *self.inner.schema.write() = None;
        tracing::debug!("runtime state reset");
    }

    /// Number of live cached handles.
    #[must_use]
    pub fn cached_handle_count(&self) -> usize {
        self.inner.cache.len()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("guard", &self.inner.guard)
            .field("registered_paths", &self.inner.registry.len())
            .field("cached_handles", &self.inner.cache.len())
            .finish_non_exhaustive()
    }
}
