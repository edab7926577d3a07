//! Open handles.
//!
//! A [`Handle`] binds one engine session to the thread that opened it.
//! Clones share the binding. The binding closes when the last clone is
//! dropped or when [`Handle::invalidate`] is called; both paths run the same
//! close routine, which rolls back an open write transaction.

use crate::config::{HandleConfig, HandleSettings};
use crate::crypto::{EncryptionGuard, EncryptionKey};
use crate::enumerator::{Enumerator, EnumeratorRegistry};
use crate::error::{CoreError, CoreResult};
use crate::migration::OpenedSession;
use crate::notification::{Listener, Notification, NotificationHub, NotificationToken};
use crate::object::{build_row, object_schema, read_objects, Object};
use crate::runtime::RuntimeInner;
use crate::transaction::{TransactionController, TransactionState};
use crate::types::{EnumeratorId, HandleId, PathKey, TokenId};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tessera_engine::{EngineSession, NotificationId, Schema, Value};

/// Per-handle state that exists until the handle closes.
struct LiveState {
    session: Box<dyn EngineSession>,
    transaction: TransactionController,
    hub: NotificationHub,
    enumerators: EnumeratorRegistry,
    notification_id: NotificationId,
    seen_version: u64,
    /// Newest version already announced to listeners. Read-only handles
    /// announce a version before their view reaches it.
    announced_version: u64,
}

impl LiveState {
    /// Lets a read-write session follow the latest version again after a read.
    fn finish_read(&mut self, read_only: bool) {
        if !read_only && !self.transaction.is_in_transaction() {
            self.session.end_read();
        }
    }

    /// Whether a peer committed a version this handle has not announced.
    fn has_unannounced_change(&self) -> bool {
        !self.transaction.is_in_transaction()
            && self.session.latest_version() > self.seen_version.max(self.announced_version)
    }

    /// Decides what a peer commit means for this handle.
    fn decide(&mut self, read_only: bool) -> Option<Notification> {
        if !self.has_unannounced_change() {
            return None;
        }
        let latest = self.session.latest_version();
        self.announced_version = latest;
        if read_only {
            return Some(Notification::RefreshRequired);
        }
        self.session.refresh();
        self.session.end_read();
        self.seen_version = latest;
        Some(Notification::DidChange)
    }
}

pub(crate) struct HandleInner {
    id: HandleId,
    owner: ThreadId,
    path: PathKey,
    settings: HandleSettings,
    schema: Arc<Schema>,
    guard: EncryptionGuard,
    runtime: Weak<RuntimeInner>,
    notifier: Mutex<Receiver<u64>>,
    state: Mutex<Option<LiveState>>,
}

impl HandleInner {
    pub(crate) fn new(
        runtime: &Arc<RuntimeInner>,
        path: PathKey,
        config: &HandleConfig,
        encrypted: bool,
        opened: OpenedSession,
    ) -> Arc<Self> {
        let OpenedSession {
            mut session,
            schema,
            schema_version,
        } = opened;

        let (sender, receiver) = mpsc::channel();
        let notification_id = session.add_notification(Arc::new(move |version| {
            let _ = sender.send(version);
        }));
        let seen_version = session.current_version();
        if !config.read_only {
            session.end_read();
        }

        let settings = HandleSettings {
            path: path.as_path().to_path_buf(),
            read_only: config.read_only,
            in_memory: config.is_in_memory(),
            dynamic_schema: config.dynamic_schema,
            encrypted,
            schema_version,
        };

        Arc::new(Self {
            id: runtime.next_handle_id(),
            owner: thread::current().id(),
            path,
            settings,
            schema,
            guard: runtime.guard,
            runtime: Arc::downgrade(runtime),
            notifier: Mutex::new(receiver),
            state: Mutex::new(Some(LiveState {
                session,
                transaction: TransactionController::new(),
                hub: NotificationHub::new(),
                enumerators: EnumeratorRegistry::default(),
                notification_id,
                seen_version,
                announced_version: seen_version,
            })),
        })
    }

    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    pub(crate) fn owner(&self) -> ThreadId {
        self.owner
    }

    pub(crate) fn path(&self) -> &PathKey {
        &self.path
    }

    pub(crate) fn settings(&self) -> &HandleSettings {
        &self.settings
    }

    pub(crate) fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub(crate) fn has_listener(&self, id: TokenId) -> bool {
        self.state.lock().as_ref().is_some_and(|l| l.hub.contains(id))
    }

    pub(crate) fn remove_listener(&self, id: TokenId) -> bool {
        self.state.lock().as_mut().is_some_and(|l| l.hub.remove(id))
    }

    fn verify_thread(&self) {
        let current = thread::current().id();
        if current != self.owner {
            panic!(
                "WrongThreadAccess: handle {} for {} was opened on {:?} and used from {:?}",
                self.id, self.path, self.owner, current
            );
        }
    }

    fn close(&self) {
        let live = self.state.lock().take();
        if let Some(live) = live {
            self.shutdown(live);
        }
        self.evict();
    }

    fn shutdown(&self, live: LiveState) {
        let LiveState {
            mut session,
            mut transaction,
            notification_id,
            ..
        } = live;
        if transaction.abandon(session.as_mut()) {
            tracing::warn!(
                path = %self.path,
                handle = %self.id,
                "handle closed inside a write transaction; uncommitted changes were rolled back"
            );
        }
        session.remove_notification(notification_id);
        tracing::debug!(path = %self.path, handle = %self.id, "closed handle");
    }

    fn evict(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.cache.remove(&self.path, self.id);
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if let Some(live) = self.state.get_mut().take() {
            self.shutdown(live);
        }
        self.evict();
    }
}

/// Cancels the open transaction if a transaction body unwinds.
struct RollbackGuard<'a> {
    handle: &'a Handle,
    armed: bool,
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(live) = self.handle.inner.state.lock().as_mut() {
            live.transaction.abandon(live.session.as_mut());
        }
    }
}

/// A thread-affine handle to one database file.
///
/// Obtained from [`Runtime::open`](crate::Runtime::open). Every operation
/// must run on the thread that opened the handle; calling from another
/// thread panics, as does any operation after [`Handle::invalidate`].
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    pub(crate) fn from_inner(inner: Arc<HandleInner>) -> Self {
        Self { inner }
    }

    fn live(&self) -> MappedMutexGuard<'_, LiveState> {
        self.inner.verify_thread();
        match MutexGuard::try_map(self.inner.state.lock(), |state| state.as_mut()) {
            Ok(live) => live,
            Err(_) => panic!(
                "handle {} for {} used after invalidate()",
                self.inner.id, self.inner.path
            ),
        }
    }

    fn read_only(&self) -> bool {
        self.inner.settings.read_only
    }

    fn read<T>(&self, f: impl FnOnce(&mut LiveState) -> CoreResult<T>) -> CoreResult<T> {
        let mut live = self.live();
        let result = f(&mut *live);
        live.finish_read(self.read_only());
        result
    }

    /// Handle ID.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.inner.verify_thread();
        self.inner.id
    }

    /// Settings the handle was opened with.
    #[must_use]
    pub fn settings(&self) -> &HandleSettings {
        self.inner.verify_thread();
        &self.inner.settings
    }

    /// Resolved file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.verify_thread();
        self.inner.path.as_path()
    }

    /// Schema aligned to the file's physical columns.
    #[must_use]
    pub fn schema(&self) -> Arc<Schema> {
        self.inner.verify_thread();
        self.inner.schema()
    }

    /// Schema version stored in the file as seen by this handle.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        let mut live = self.live();
        let version = live.session.schema_version();
        live.finish_read(self.read_only());
        version
    }

    /// Version of the data this handle currently reads.
    #[must_use]
    pub fn version(&self) -> u64 {
        let mut live = self.live();
        let version = live.session.current_version();
        live.finish_read(self.read_only());
        version
    }

    /// Whether the handle has been invalidated.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.inner.state.lock().is_none()
    }

    /// Current transaction state.
    #[must_use]
    pub fn transaction_state(&self) -> TransactionState {
        self.live().transaction.state()
    }

    /// Whether a write transaction is open.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.live().transaction.is_in_transaction()
    }

    /// Begins a write transaction.
    ///
    /// Live enumerators of this handle are detached first.
    ///
    /// # Errors
    ///
    /// `Transaction` if a transaction is already open (nothing else
    /// happens) or the engine refuses to begin.
    pub fn begin_write(&self) -> CoreResult<()> {
        let mut guard = self.live();
        let live = &mut *guard;
        live.transaction
            .begin(live.session.as_mut(), &mut live.enumerators, &self.inner.schema)
    }

    /// Commits the open write transaction and returns the new version.
    ///
    /// Listeners receive [`Notification::DidChange`]; other sessions on the
    /// file are signalled by the engine.
    ///
    /// # Errors
    ///
    /// `Transaction` if no transaction is open or the commit fails. The
    /// handle is idle afterwards either way.
    pub fn commit_write(&self) -> CoreResult<u64> {
        let version = {
            let mut guard = self.live();
            let live = &mut *guard;
            let version = live.transaction.commit(live.session.as_mut())?;
            live.seen_version = version;
            live.session.end_read();
            version
        };
        self.dispatch(Notification::DidChange);
        Ok(version)
    }

    /// Discards the open write transaction.
    ///
    /// # Errors
    ///
    /// `Transaction` if no transaction is open.
    pub fn cancel_write(&self) -> CoreResult<()> {
        let mut guard = self.live();
        let live = &mut *guard;
        live.transaction.cancel(live.session.as_mut())?;
        live.session.end_read();
        Ok(())
    }

    /// Runs `body` inside a write transaction.
    ///
    /// Commits when `body` succeeds and left the transaction open; rolls
    /// back when it fails or panics.
    ///
    /// # Errors
    ///
    /// The error of `begin_write`, of `body`, or of the commit.
    pub fn run_in_transaction<T, F>(&self, body: F) -> CoreResult<T>
    where
        F: FnOnce(&Handle) -> CoreResult<T>,
    {
        self.begin_write()?;
        let mut rollback = RollbackGuard {
            handle: self,
            armed: true,
        };
        let result = body(self);
        rollback.armed = false;

        match result {
            Ok(value) => {
                if self.is_in_transaction() {
                    self.commit_write()?;
                }
                Ok(value)
            }
            Err(err) => {
                if self.is_in_transaction() {
                    if let Err(cancel_err) = self.cancel_write() {
                        tracing::warn!(error = %cancel_err, "rollback after failed transaction body failed");
                    }
                }
                Err(err)
            }
        }
    }

    /// Inserts or updates an object.
    ///
    /// Properties not listed keep their stored value, or their initial value
    /// for a new object.
    ///
    /// # Errors
    ///
    /// `Transaction` outside a write transaction, `SchemaMismatch` for
    /// unknown types, unknown properties or mistyped values.
    pub fn put(&self, object_type: &str, key: &str, fields: &[(&str, Value)]) -> CoreResult<()> {
        let mut live = self.live();
        if !live.transaction.is_in_transaction() {
            return Err(CoreError::transaction("writes require a write transaction"));
        }
        let object = object_schema(&self.inner.schema, object_type)?;
        let existing = live.session.get_row(object_type, key)?;
        let row = build_row(object, existing, fields)?;
        live.session.set_row(object_type, key, row)?;
        Ok(())
    }

    /// Reads one object.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` for unknown types.
    pub fn get(&self, object_type: &str, key: &str) -> CoreResult<Option<Object>> {
        let object = object_schema(&self.inner.schema, object_type)?;
        self.read(|live| {
            Ok(live
                .session
                .get_row(object_type, key)?
                .map(|row| Object::from_row(key.to_string(), &row, object)))
        })
    }

    /// Deletes one object. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// `Transaction` outside a write transaction, `SchemaMismatch` for
    /// unknown types.
    pub fn delete(&self, object_type: &str, key: &str) -> CoreResult<bool> {
        let mut live = self.live();
        if !live.transaction.is_in_transaction() {
            return Err(CoreError::transaction("writes require a write transaction"));
        }
        object_schema(&self.inner.schema, object_type)?;
        Ok(live.session.remove_row(object_type, key)?)
    }

    /// All objects of a type, ordered by key.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` for unknown types.
    pub fn objects(&self, object_type: &str) -> CoreResult<Vec<Object>> {
        self.read(|live| read_objects(live.session.as_mut(), &self.inner.schema, object_type))
    }

    /// Creates a live enumerator over a type.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` for unknown types.
    pub fn enumerate(&self, object_type: &str) -> CoreResult<Enumerator> {
        object_schema(&self.inner.schema, object_type)?;
        let (id, slot) = self.live().enumerators.register(object_type);
        Ok(Enumerator::new(id, object_type, self.clone(), slot))
    }

    /// Number of enumerators still reading live data.
    #[must_use]
    pub fn live_enumerator_count(&self) -> usize {
        self.live().enumerators.len()
    }

    /// Primary keys of `object_type` in stored order.
    pub(crate) fn object_keys(&self, object_type: &str) -> Vec<String> {
        self.read(|live| {
            Ok(live
                .session
                .rows(object_type)?
                .into_iter()
                .map(|(key, _)| key)
                .collect())
        })
        .unwrap_or_default()
    }

    pub(crate) fn unregister_enumerator(&self, id: EnumeratorId) {
        if let Some(live) = self.inner.state.lock().as_mut() {
            live.enumerators.unregister(id);
        }
    }

    /// Registers a change listener.
    pub fn add_listener<F>(&self, listener: F) -> NotificationToken
    where
        F: Fn(Notification, &Handle) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = self.live().hub.add(listener);
        NotificationToken::new(id, Arc::downgrade(&self.inner))
    }

    /// Unregisters the listener behind `token`.
    ///
    /// Returns `Ok(false)` if the listener was already removed.
    ///
    /// # Errors
    ///
    /// Hands the token back untouched if it belongs to another handle; its
    /// listener stays registered there.
    pub fn remove_listener(&self, mut token: NotificationToken) -> Result<bool, NotificationToken> {
        self.inner.verify_thread();
        if !token.belongs_to(&self.inner) {
            return Err(token);
        }
        let removed = self.live().hub.remove(token.id());
        token.release();
        Ok(removed)
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.live().hub.len()
    }

    fn dispatch(&self, notification: Notification) {
        let listeners = self.live().hub.snapshot();
        let mut delivered = 0usize;
        for (id, listener) in listeners {
            if self.inner.has_listener(id) {
                listener(notification, self);
                delivered += 1;
            }
        }
        tracing::debug!(
            path = %self.inner.path,
            ?notification,
            delivered,
            "dispatched notification"
        );
    }

    fn drain_signals(&self) -> bool {
        let receiver = self.inner.notifier.lock();
        let mut signalled = false;
        while receiver.try_recv().is_ok() {
            signalled = true;
        }
        signalled
    }

    fn deliver_external(&self) -> bool {
        let notification = self.live().decide(self.read_only());
        match notification {
            Some(notification) => {
                self.dispatch(notification);
                true
            }
            None => false,
        }
    }

    /// Handles commits made by other sessions since the last call.
    ///
    /// A stale read-write handle advances to the latest version and
    /// notifies [`Notification::DidChange`]. A stale read-only handle keeps
    /// its view and notifies [`Notification::RefreshRequired`]. Returns true
    /// if listeners were notified.
    pub fn process_notifications(&self) -> bool {
        self.inner.verify_thread();
        if !self.drain_signals() {
            return false;
        }
        self.deliver_external()
    }

    /// Blocks until another session commits or `timeout` passes, then
    /// behaves like [`Handle::process_notifications`].
    pub fn wait_for_change(&self, timeout: Duration) -> bool {
        let stale = self.live().has_unannounced_change();
        if !stale && self.inner.notifier.lock().recv_timeout(timeout).is_err() {
            return false;
        }
        self.drain_signals();
        self.deliver_external()
    }

    /// Advances the view to the latest version.
    ///
    /// Returns true and notifies [`Notification::DidChange`] if it moved.
    /// Does nothing inside a write transaction.
    pub fn refresh(&self) -> bool {
        let moved = {
            let mut live = self.live();
            if live.transaction.is_in_transaction() {
                return false;
            }
            live.session.refresh();
            let current = live.session.current_version();
            live.finish_read(self.read_only());
            let moved = current != live.seen_version;
            live.seen_version = current;
            moved
        };
        if moved {
            self.dispatch(Notification::DidChange);
        }
        moved
    }

    /// Compacts the file.
    ///
    /// Returns false when other sessions are attached and nothing was done.
    ///
    /// # Errors
    ///
    /// `Transaction` inside a write transaction, or an engine error.
    pub fn compact(&self) -> CoreResult<bool> {
        let mut live = self.live();
        if live.transaction.is_in_transaction() {
            return Err(CoreError::transaction(
                "cannot compact inside a write transaction",
            ));
        }
        let compacted = live.session.compact()?;
        live.finish_read(self.read_only());
        Ok(compacted)
    }

    /// Writes a copy of the current data to `path`, optionally encrypted
    /// with `key`.
    ///
    /// # Errors
    ///
    /// Key validation errors, `AlreadyExists` if `path` exists,
    /// `Transaction` inside a write transaction.
    pub fn write_copy(&self, path: impl AsRef<Path>, key: Option<&[u8]>) -> CoreResult<()> {
        self.inner.verify_thread();
        let destination = PathKey::resolve(path.as_ref())?;
        let key = self.inner.guard.validate(key)?;

        let mut live = self.live();
        if live.transaction.is_in_transaction() {
            return Err(CoreError::transaction(
                "cannot write a copy inside a write transaction",
            ));
        }
        live.session
            .write_copy(destination.as_path(), key.as_ref().map(EncryptionKey::as_bytes))?;
        live.finish_read(self.read_only());
        tracing::info!(
            from = %self.inner.path,
            to = %destination,
            encrypted = key.is_some(),
            "wrote copy"
        );
        Ok(())
    }

    /// Closes the handle now.
    ///
    /// An open write transaction is rolled back. Every later operation on
    /// this handle or its clones panics.
    pub fn invalidate(&self) {
        self.inner.verify_thread();
        self.inner.close();
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("path", &self.inner.settings.path)
            .field("read_only", &self.inner.settings.read_only)
            .finish_non_exhaustive()
    }
}
