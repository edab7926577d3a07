//! Engine boundary trait definitions.

use crate::error::{EngineResult, MigrationError};
use crate::keycheck::KEY_SIZE;
use crate::schema::Schema;
use crate::value::Value;
use std::path::Path;
use std::sync::Arc;

/// Schema version of a file whose schema has never been set.
pub const UNVERSIONED: u64 = u64::MAX;

/// Callback fired when another session commits to the same file.
///
/// The argument is the version produced by that commit.
pub type NotificationCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Migration function passed to [`EngineSession::update_schema`].
pub type MigrationFn<'a> =
    &'a mut dyn FnMut(&mut dyn MigrationContext) -> Result<(), MigrationError>;

/// A row as returned by the engine: primary key plus values in column order.
pub type Row = (String, Vec<Value>);

/// Identifier of a registered notification callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(pub u64);

/// Parameters for opening a session.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions<'a> {
    /// Canonical file path.
    pub path: &'a Path,
    /// Encryption key, if the file is encrypted.
    pub key: Option<&'a [u8; KEY_SIZE]>,
    /// Open without write access.
    pub read_only: bool,
    /// Keep the file in memory only; it is discarded with its last session.
    pub in_memory: bool,
}

/// A storage engine able to open sessions on files.
///
/// Engines are shared by every thread of the process and must be
/// `Send + Sync`.
pub trait StorageEngine: Send + Sync {
    /// Opens a session on the file described by `options`.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `IncompatibleLockFile` or `AccessError`
    /// when the file cannot be opened with the requested settings.
    fn open_session(&self, options: &OpenOptions<'_>) -> EngineResult<Box<dyn EngineSession>>;

    /// Returns true if a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;
}

/// An open session on one engine file.
///
/// A session owns a read snapshot and at most one write transaction.
/// Sessions are used from a single thread at a time but may be moved.
pub trait EngineSession: Send {
    /// Canonical path of the file.
    fn path(&self) -> &Path;

    /// Whether the session was opened read-only.
    fn is_read_only(&self) -> bool;

    /// Starts a write transaction on the latest version.
    ///
    /// Blocks while another session of the same file holds the write lock.
    ///
    /// # Errors
    ///
    /// Fails for read-only sessions or when a transaction is already open.
    fn begin_transaction(&mut self) -> EngineResult<()>;

    /// Commits the open write transaction and returns the new version.
    ///
    /// # Errors
    ///
    /// Fails when no transaction is open. A failed commit leaves the file
    /// exactly as it was before the transaction.
    fn commit(&mut self) -> EngineResult<u64>;

    /// Discards the open write transaction.
    ///
    /// # Errors
    ///
    /// Fails when no transaction is open.
    fn cancel(&mut self) -> EngineResult<()>;

    /// Whether a write transaction is open.
    fn is_in_transaction(&self) -> bool;

    /// Brings the stored schema to `schema` at `version`.
    ///
    /// `migration` runs only when the file already had a schema version lower
    /// than `version`. Returns the version now stored.
    ///
    /// # Errors
    ///
    /// `SchemaDowngrade` when `version` is lower than the stored version,
    /// `MigrationRequired` when the schema changed without a version bump or
    /// a read-only session would need changes, `Migration` when the callback
    /// fails. A failed update applies nothing.
    fn update_schema(
        &mut self,
        schema: &Schema,
        version: u64,
        migration: Option<MigrationFn<'_>>,
    ) -> EngineResult<u64>;

    /// Stored schema with properties in physical column order.
    fn schema(&mut self) -> Schema;

    /// Stored schema version, [`UNVERSIONED`] for a new file.
    fn schema_version(&mut self) -> u64;

    /// Registers a callback fired after commits made by other sessions.
    fn add_notification(&mut self, callback: NotificationCallback) -> NotificationId;

    /// Removes a callback registered with [`EngineSession::add_notification`].
    fn remove_notification(&mut self, id: NotificationId);

    /// Version of the snapshot this session reads from.
    fn current_version(&mut self) -> u64;

    /// Latest committed version of the file.
    fn latest_version(&self) -> u64;

    /// Moves the read snapshot to the latest version. Returns true if it moved.
    fn refresh(&mut self) -> bool;

    /// Releases the read snapshot; the next read starts from the latest version.
    fn end_read(&mut self);

    /// Reads one row.
    ///
    /// # Errors
    ///
    /// Fails if the table does not exist.
    fn get_row(&mut self, table: &str, key: &str) -> EngineResult<Option<Vec<Value>>>;

    /// Inserts or replaces one row. Requires a write transaction.
    ///
    /// # Errors
    ///
    /// Fails outside a write transaction, for unknown tables, or when the row
    /// width does not match the table.
    fn set_row(&mut self, table: &str, key: &str, row: Vec<Value>) -> EngineResult<()>;

    /// Removes one row. Requires a write transaction.
    ///
    /// # Errors
    ///
    /// Fails outside a write transaction or for unknown tables.
    fn remove_row(&mut self, table: &str, key: &str) -> EngineResult<bool>;

    /// All rows of a table ordered by primary key.
    ///
    /// # Errors
    ///
    /// Fails if the table does not exist.
    fn rows(&mut self, table: &str) -> EngineResult<Vec<Row>>;

    /// Writes a copy of the current snapshot to `path`, optionally encrypted
    /// with a different key.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if `path` exists.
    fn write_copy(&mut self, path: &Path, key: Option<&[u8; KEY_SIZE]>) -> EngineResult<()>;

    /// Compacts the file. Returns false when other sessions are attached.
    ///
    /// # Errors
    ///
    /// Fails inside a write transaction.
    fn compact(&mut self) -> EngineResult<bool>;
}

/// Access to old and new data while a migration runs.
///
/// The "old" side is the file as it was before the schema update; the "new"
/// side already has the target schema and receives the callback's writes.
pub trait MigrationContext {
    /// Schema version stored before the migration.
    fn old_version(&self) -> u64;

    /// Schema version being migrated to.
    fn new_version(&self) -> u64;

    /// Schema before the migration.
    fn old_schema(&self) -> &Schema;

    /// Schema after the migration.
    fn new_schema(&self) -> &Schema;

    /// Primary keys of the old object type, empty if it did not exist.
    fn old_keys(&self, object_type: &str) -> Vec<String>;

    /// Reads a property of an old object.
    fn old_value(&self, object_type: &str, key: &str, property: &str) -> Option<Value>;

    /// Reads a property of a new object.
    fn value(&self, object_type: &str, key: &str, property: &str) -> Option<Value>;

    /// Writes a property of a new object.
    ///
    /// # Errors
    ///
    /// Fails for unknown objects or properties, or mistyped values.
    fn set_value(
        &mut self,
        object_type: &str,
        key: &str,
        property: &str,
        value: Value,
    ) -> EngineResult<()>;

    /// Deletes a new object. Returns true if it existed.
    fn delete_object(&mut self, object_type: &str, key: &str) -> bool;

    /// Copies old values of `from` into the new property `to`.
    ///
    /// Returns the number of objects updated.
    ///
    /// # Errors
    ///
    /// Fails if `to` is not a property of the new schema.
    fn rename_property(&mut self, object_type: &str, from: &str, to: &str) -> EngineResult<usize> {
        let mut renamed = 0;
        for key in self.old_keys(object_type) {
            if let Some(value) = self.old_value(object_type, &key, from) {
                self.set_value(object_type, &key, to, value)?;
                renamed += 1;
            }
        }
        Ok(renamed)
    }
}
