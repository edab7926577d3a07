//! Live enumerators over an object type.
//!
//! An enumerator reads lazily from its handle's current view until the
//! handle begins a write transaction. At that point every live enumerator of
//! the handle is detached: it receives a frozen copy of the data as it was
//! before the transaction and is dropped from the handle's registry.

use crate::error::CoreResult;
use crate::handle::Handle;
use crate::object::{read_objects, Object};
use crate::types::EnumeratorId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tessera_engine::{EngineSession, Schema};

#[derive(Default)]
pub(crate) struct EnumeratorSlot {
    frozen: Mutex<Option<Vec<Object>>>,
}

struct LiveEnumerator {
    object_type: String,
    slot: Weak<EnumeratorSlot>,
}

/// Live enumerators of one handle.
#[derive(Default)]
pub(crate) struct EnumeratorRegistry {
    next_id: u64,
    live: BTreeMap<EnumeratorId, LiveEnumerator>,
}

impl EnumeratorRegistry {
    pub(crate) fn register(&mut self, object_type: &str) -> (EnumeratorId, Arc<EnumeratorSlot>) {
        self.next_id += 1;
        let id = EnumeratorId(self.next_id);
        let slot = Arc::new(EnumeratorSlot::default());
        self.live.insert(
            id,
            LiveEnumerator {
                object_type: object_type.to_string(),
                slot: Arc::downgrade(&slot),
            },
        );
        (id, slot)
    }

    pub(crate) fn unregister(&mut self, id: EnumeratorId) {
        self.live.remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }

    /// Freezes every live enumerator and empties the registry.
    pub(crate) fn detach_all(
        &mut self,
        session: &mut dyn EngineSession,
        schema: &Schema,
    ) -> CoreResult<usize> {
        let mut detached = 0;
        for (_, enumerator) in std::mem::take(&mut self.live) {
            let Some(slot) = enumerator.slot.upgrade() else {
                continue;
            };
            let objects = read_objects(session, schema, &enumerator.object_type)?;
            *slot.frozen.lock() = Some(objects);
            detached += 1;
        }
        if detached > 0 {
            tracing::debug!(detached, "enumerators detached before write transaction");
        }
        Ok(detached)
    }
}

/// Iterator over the objects of one type.
///
/// Created by [`Handle::enumerate`].
pub struct Enumerator {
    id: EnumeratorId,
    object_type: String,
    handle: Handle,
    slot: Arc<EnumeratorSlot>,
    position: usize,
    keys: Option<Vec<String>>,
    last_key: Option<String>,
}

impl Enumerator {
    pub(crate) fn new(
        id: EnumeratorId,
        object_type: &str,
        handle: Handle,
        slot: Arc<EnumeratorSlot>,
    ) -> Self {
        Self {
            id,
            object_type: object_type.to_string(),
            handle,
            slot,
            position: 0,
            keys: None,
            last_key: None,
        }
    }

    /// Enumerator ID within its handle.
    #[must_use]
    pub fn id(&self) -> EnumeratorId {
        self.id
    }

    /// Object type being enumerated.
    #[must_use]
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Whether the enumerator was frozen by a write transaction.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.slot.frozen.lock().is_some()
    }
}

impl Enumerator {
    /// Reads the next live object. Keys are listed once; each step reads a
    /// single row and skips keys deleted since the listing.
    fn next_live(&mut self) -> Option<Object> {
        if self.keys.is_none() {
            self.keys = Some(self.handle.object_keys(&self.object_type));
        }
        let keys = self.keys.as_ref()?;
        let mut index = after(keys, self.last_key.as_deref(), String::as_str);
        while let Some(key) = keys.get(index) {
            if let Ok(Some(object)) = self.handle.get(&self.object_type, key) {
                return Some(object);
            }
            index += 1;
        }
        None
    }
}

/// Index of the first item whose key sorts after `last`.
fn after<T>(items: &[T], last: Option<&str>, key: impl Fn(&T) -> &str) -> usize {
    match last {
        Some(last) => items.partition_point(|item| key(item) <= last),
        None => 0,
    }
}

impl Iterator for Enumerator {
    type Item = Object;

    fn next(&mut self) -> Option<Object> {
        let frozen = self.slot.frozen.lock().as_ref().map(|objects| {
            objects
                .get(after(objects, self.last_key.as_deref(), Object::key))
                .cloned()
        });
        let item = match frozen {
            Some(item) => item,
            None => self.next_live(),
        };
        if let Some(object) = &item {
            self.last_key = Some(object.key().to_string());
            self.position += 1;
        }
        item
    }
}

impl Drop for Enumerator {
    fn drop(&mut self) {
        self.handle.unregister_enumerator(self.id);
    }
}

impl std::fmt::Debug for Enumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enumerator")
            .field("id", &self.id)
            .field("object_type", &self.object_type)
            .field("position", &self.position)
            .field("detached", &self.is_detached())
            .finish()
    }
}
