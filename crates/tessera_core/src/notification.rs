//! Change notifications.
//!
//! Each handle owns a [`NotificationHub`] holding its listeners by
//! [`TokenId`]. Callers keep a [`NotificationToken`] that refers back to the
//! handle weakly, so a token outliving its handle is harmless.
//!
//! Listeners are told about two kinds of change:
//!
//! - [`Notification::DidChange`] after a local commit, after a read-write
//!   handle auto-refreshed to a peer's commit, or after an explicit refresh
//! - [`Notification::RefreshRequired`] when a read-only handle's view is
//!   behind the file's latest version

use crate::handle::{Handle, HandleInner};
use crate::types::TokenId;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Kind of change delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    /// The handle's view now includes new data.
    DidChange,
    /// Newer data exists but the handle's view was not advanced.
    RefreshRequired,
}

/// Listener callback.
pub type Listener = Arc<dyn Fn(Notification, &Handle) + Send + Sync>;

/// Listeners of one handle.
#[derive(Default)]
pub struct NotificationHub {
    next_id: u64,
    listeners: BTreeMap<TokenId, Listener>,
}

impl NotificationHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn add(&mut self, listener: Listener) -> TokenId {
        self.next_id += 1;
        let id = TokenId(self.next_id);
        self.listeners.insert(id, listener);
        id
    }

    /// Removes a listener. Returns true if it was registered.
    pub fn remove(&mut self, id: TokenId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: TokenId) -> bool {
        self.listeners.contains_key(&id)
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Listeners in registration order, for dispatch outside the handle lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(TokenId, Listener)> {
        self.listeners
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect()
    }
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("listeners", &self.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registration of a listener on a handle.
///
/// Pass the token to [`Handle::remove_listener`] to unregister. Dropping a
/// token whose listener is still registered logs a warning and then
/// unregisters it.
#[must_use = "dropping the token unregisters its listener"]
pub struct NotificationToken {
    id: TokenId,
    handle: Weak<HandleInner>,
}

impl NotificationToken {
    pub(crate) fn new(id: TokenId, handle: Weak<HandleInner>) -> Self {
        Self { id, handle }
    }

    /// Token ID within its handle.
    #[must_use]
    pub fn id(&self) -> TokenId {
        self.id
    }

    /// Whether the listener is still registered on a live handle.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.handle
            .upgrade()
            .is_some_and(|inner| inner.has_listener(self.id))
    }

    pub(crate) fn belongs_to(&self, inner: &Arc<HandleInner>) -> bool {
        std::ptr::eq(self.handle.as_ptr(), Arc::as_ptr(inner))
    }

    /// Detaches the token so dropping it does nothing.
    pub(crate) fn release(&mut self) {
        self.handle = Weak::new();
    }
}

impl Drop for NotificationToken {
    fn drop(&mut self) {
        let Some(inner) = self.handle.upgrade() else {
            return;
        };
        if inner.remove_listener(self.id) {
            tracing::warn!(
                token = %self.id,
                path = %inner.path(),
                "notification token dropped while its listener was registered"
            );
        }
    }
}

impl std::fmt::Debug for NotificationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationToken")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
