//! Cache of live handles.
//!
//! Handles are cached per (path, thread). A second open of the same path on
//! the same thread returns the cached handle instead of a new engine session.
//! The cache holds only `Weak` references; a handle leaves it when its last
//! clone is dropped or it is invalidated.
//!
//! Cached handles are never upgraded while the cache lock is held. The last
//! strong reference dropping would re-enter the cache from the handle's
//! `Drop` impl.

use crate::config::HandleConfig;
use crate::error::{CoreError, CoreResult};
use crate::handle::{Handle, HandleInner};
use crate::migration::open_or_migrate;
use crate::runtime::RuntimeInner;
use crate::types::{HandleId, PathKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tessera_engine::Schema;

/// What the cache knows about a live handle without upgrading it.
#[derive(Clone)]
pub(crate) struct CachedHandle {
    pub(crate) id: HandleId,
    pub(crate) thread: ThreadId,
    pub(crate) read_only: bool,
    pub(crate) in_memory: bool,
    pub(crate) dynamic_schema: bool,
    pub(crate) schema_version: u64,
    pub(crate) schema: Arc<Schema>,
    handle: Weak<HandleInner>,
}

impl CachedHandle {
    pub(crate) fn new(inner: &Arc<HandleInner>) -> Self {
        let settings = inner.settings();
        Self {
            id: inner.id(),
            thread: inner.owner(),
            read_only: settings.read_only,
            in_memory: settings.in_memory,
            dynamic_schema: settings.dynamic_schema,
            schema_version: settings.schema_version,
            schema: inner.schema(),
            handle: Arc::downgrade(inner),
        }
    }

    fn is_live(&self) -> bool {
        self.handle.strong_count() > 0
    }
}

/// Live handles keyed by path.
#[derive(Default)]
pub(crate) struct HandleCache {
    slots: Mutex<HashMap<PathKey, Vec<CachedHandle>>>,
}

impl HandleCache {
    /// Live handles for `path`, pruning dead entries.
    pub(crate) fn live(&self, path: &PathKey) -> Vec<CachedHandle> {
        let mut slots = self.slots.lock();
        let Some(entries) = slots.get_mut(path) else {
            return Vec::new();
        };
        entries.retain(CachedHandle::is_live);
        let live = entries.clone();
        if entries.is_empty() {
            slots.remove(path);
        }
        live
    }

    pub(crate) fn insert(&self, path: &PathKey, entry: CachedHandle) {
        self.slots.lock().entry(path.clone()).or_default().push(entry);
    }

    pub(crate) fn remove(&self, path: &PathKey, id: HandleId) {
        let mut slots = self.slots.lock();
        if let Some(entries) = slots.get_mut(path) {
            entries.retain(|e| e.id != id && e.is_live());
            if entries.is_empty() {
                slots.remove(path);
            }
        }
    }

    /// Schema version of any live handle for `path`.
    pub(crate) fn live_schema_version(&self, path: &PathKey) -> Option<u64> {
        self.live(path).first().map(|e| e.schema_version)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .flatten()
            .filter(|e| e.is_live())
            .count()
    }

    pub(crate) fn clear(&self) {
        self.slots.lock().clear();
    }
}

fn check_same_thread(path: &PathKey, cached: &CachedHandle, config: &HandleConfig) -> CoreResult<()> {
    let mismatch = if cached.read_only != config.read_only {
        Some("read-only")
    } else if cached.in_memory != config.is_in_memory() {
        Some("in-memory")
    } else if cached.dynamic_schema != config.dynamic_schema {
        Some("dynamic schema")
    } else {
        None
    };
    match mismatch {
        Some(setting) => Err(CoreError::configuration_conflict(
            path.as_path(),
            format!("already opened on this thread with a different {setting} setting"),
        )),
        None => Ok(()),
    }
}

/// Rejects settings that cannot share the file with handles on other threads.
pub(crate) fn check_peers(path: &PathKey, peers: &[CachedHandle], config: &HandleConfig) -> CoreResult<()> {
    for peer in peers {
        if peer.read_only != config.read_only {
            return Err(CoreError::configuration_conflict(
                path.as_path(),
                "already opened with a different read-only setting",
            ));
        }
        if peer.in_memory != config.is_in_memory() {
            return Err(CoreError::configuration_conflict(
                path.as_path(),
                "already opened with a different in-memory setting",
            ));
        }
    }
    Ok(())
}

/// Returns a handle for `config`, reusing the calling thread's cached one.
pub(crate) fn acquire(runtime: &Arc<RuntimeInner>, config: HandleConfig) -> CoreResult<Handle> {
    let path = config.location.resolve()?;
    let thread = thread::current().id();

    let same_thread = runtime
        .cache
        .live(&path)
        .into_iter()
        .find(|e| e.thread == thread);
    if let Some(cached) = same_thread {
        check_same_thread(&path, &cached, &config)?;
        if let Some(requested) = config.schema_version {
            if requested != cached.schema_version {
                return Err(CoreError::AlreadyOpenConflict {
                    path: path.as_path().to_path_buf(),
                    open_version: cached.schema_version,
                    requested,
                });
            }
        }
        if let Some(inner) = cached.handle.upgrade() {
            tracing::debug!(path = %path, handle = %cached.id, "reusing cached handle");
            return Ok(Handle::from_inner(inner));
        }
    }

    let key = match config.encryption_key.as_deref() {
        Some(bytes) => runtime.guard.validate(Some(bytes.as_slice()))?,
        None => {
            let registered = runtime.registry.encryption_key(&path);
            runtime
                .guard
                .validate(registered.as_ref().map(|k| k.as_bytes().as_slice()))?
        }
    };

    let inner = {
        let _init = runtime.init_lock.lock();
        let opened = open_or_migrate(runtime, &path, &config, key.as_ref())?;
        let inner = HandleInner::new(runtime, path.clone(), &config, key.is_some(), opened);
        if !config.dynamic_schema {
            runtime.cache.insert(&path, CachedHandle::new(&inner));
        }
        inner
    };
    tracing::debug!(path = %path, handle = %inner.id(), "opened handle");
    Ok(Handle::from_inner(inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionGuard;
    use crate::runtime::Runtime;
    use tessera_engine::MemoryEngine;

    fn runtime() -> Runtime {
        Runtime::with_guard(MemoryEngine::new(), EncryptionGuard::new(false, || false))
    }

    #[test]
    fn dead_entries_are_pruned() {
        let runtime = runtime();
        let handle = runtime.open(HandleConfig::in_memory("cache-prune")).unwrap();
        assert_eq!(runtime.cached_handle_count(), 1);
        drop(handle);
        assert_eq!(runtime.cached_handle_count(), 0);
    }

    #[test]
    fn same_thread_reuses_handle() {
        let runtime = runtime();
        let a = runtime.open(HandleConfig::in_memory("cache-reuse")).unwrap();
        let b = runtime.open(HandleConfig::in_memory("cache-reuse")).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(runtime.cached_handle_count(), 1);
    }

    #[test]
    fn dynamic_handles_are_not_cached() {
        let runtime = runtime();
        let handle = runtime
            .open(HandleConfig::in_memory("cache-dynamic").dynamic_schema(true))
            .unwrap();
        assert_eq!(runtime.cached_handle_count(), 0);
        drop(handle);
    }

    #[test]
    fn same_thread_mismatch_is_a_conflict() {
        let runtime = runtime();
        let _a = runtime.open(HandleConfig::in_memory("cache-conflict")).unwrap();
        let err = runtime
            .open(HandleConfig::in_memory("cache-conflict").dynamic_schema(true))
            .unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationConflict { .. }));
    }
}
