//! In-memory reference engine.

use crate::engine::{
    EngineSession, MigrationContext, MigrationFn, NotificationCallback, NotificationId,
    OpenOptions, Row, StorageEngine, UNVERSIONED,
};
use crate::error::{EngineError, EngineResult};
use crate::keycheck::{KeyCheck, KEY_SIZE};
use crate::schema::{ObjectSchema, Property, Schema};
use crate::value::Value;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One object type's columns and rows.
#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<Property>,
    rows: BTreeMap<String, Vec<Value>>,
}

impl Table {
    fn create(object: &ObjectSchema) -> Self {
        let mut columns = object.properties.clone();
        renumber(&mut columns);
        Self {
            columns,
            rows: BTreeMap::new(),
        }
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn object_schema(&self, name: &str) -> ObjectSchema {
        ObjectSchema {
            name: name.to_string(),
            properties: self.columns.clone(),
        }
    }

    /// Rebuilds the table for `desired`.
    ///
    /// Surviving columns keep their relative physical order; new columns are
    /// appended and filled with their initial value.
    fn reshaped(&self, desired: &ObjectSchema) -> Self {
        let kept: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| desired.property(&c.name).is_some_and(|d| d.same_shape(c)))
            .map(|(i, _)| i)
            .collect();
        let mut columns: Vec<Property> = kept.iter().map(|&i| self.columns[i].clone()).collect();
        let added: Vec<Property> = desired
            .properties
            .iter()
            .filter(|p| !columns.iter().any(|c| c.name == p.name))
            .cloned()
            .collect();
        columns.extend(added.iter().cloned());
        renumber(&mut columns);

        let rows = self
            .rows
            .iter()
            .map(|(key, row)| {
                let values = kept
                    .iter()
                    .map(|&i| row[i].clone())
                    .chain(added.iter().map(Property::initial_value))
                    .collect();
                (key.clone(), values)
            })
            .collect();

        Self { columns, rows }
    }
}

fn renumber(columns: &mut [Property]) {
    for (i, column) in columns.iter_mut().enumerate() {
        column.column = Some(i);
    }
}

/// A committed (or staged) state of a file.
#[derive(Debug, Clone)]
struct Snapshot {
    version: u64,
    schema_version: u64,
    tables: BTreeMap<String, Table>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            version: 0,
            schema_version: UNVERSIONED,
            tables: BTreeMap::new(),
        }
    }

    fn schema(&self) -> Schema {
        Schema {
            objects: self
                .tables
                .iter()
                .map(|(name, table)| table.object_schema(name))
                .collect(),
        }
    }

    fn table(&self, name: &str) -> EngineResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| EngineError::failure(format!("no table named '{name}'")))
    }

    fn table_mut(&mut self, name: &str) -> EngineResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| EngineError::failure(format!("no table named '{name}'")))
    }
}

struct Notifier {
    session: u64,
    id: NotificationId,
    callback: NotificationCallback,
}

/// Shared state of one engine file.
struct FileState {
    in_memory: bool,
    key_check: Option<KeyCheck>,
    latest: RwLock<Arc<Snapshot>>,
    writer: Mutex<Option<u64>>,
    writer_released: Condvar,
    sessions: Mutex<HashSet<u64>>,
    notifiers: Mutex<Vec<Notifier>>,
}

impl FileState {
    fn new(in_memory: bool, key: Option<&[u8; KEY_SIZE]>, snapshot: Snapshot) -> Self {
        Self {
            in_memory,
            key_check: key.map(KeyCheck::derive),
            latest: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(None),
            writer_released: Condvar::new(),
            sessions: Mutex::new(HashSet::new()),
            notifiers: Mutex::new(Vec::new()),
        }
    }

    fn latest(&self) -> Arc<Snapshot> {
        Arc::clone(&self.latest.read())
    }

    fn check_key(&self, path: &Path, key: Option<&[u8; KEY_SIZE]>) -> EngineResult<()> {
        match (&self.key_check, key) {
            (None, None) => Ok(()),
            (Some(check), Some(key)) if check.matches(key) => Ok(()),
            (Some(_), Some(_)) => Err(EngineError::access(path, "invalid encryption key")),
            (Some(_), None) => Err(EngineError::access(
                path,
                "file is encrypted but no key was provided",
            )),
            (None, Some(_)) => Err(EngineError::access(path, "file is not encrypted")),
        }
    }

    /// Blocks until `session` holds the file's write lock.
    fn acquire_writer(&self, session: u64) {
        let mut writer = self.writer.lock();
        while writer.is_some() {
            self.writer_released.wait(&mut writer);
        }
        *writer = Some(session);
    }

    fn release_writer(&self, session: u64) {
        let mut writer = self.writer.lock();
        if *writer == Some(session) {
            *writer = None;
            self.writer_released.notify_all();
        }
    }

    /// Publishes `snapshot` as the next version. Caller holds the write lock.
    fn install(&self, mut snapshot: Snapshot) -> u64 {
        let mut latest = self.latest.write();
        let version = latest.version + 1;
        snapshot.version = version;
        *latest = Arc::new(snapshot);
        version
    }

    fn notify_peers(&self, from: u64, version: u64) {
        let callbacks: Vec<NotificationCallback> = self
            .notifiers
            .lock()
            .iter()
            .filter(|n| n.session != from)
            .map(|n| Arc::clone(&n.callback))
            .collect();
        for callback in callbacks {
            callback(version);
        }
    }
}

struct Shared {
    files: Mutex<HashMap<PathBuf, Arc<FileState>>>,
    denied: Mutex<HashSet<PathBuf>>,
    next_session: AtomicU64,
    sessions_opened: AtomicU64,
}

/// A storage engine keeping every file in process memory.
///
/// Files outlive their sessions unless they were opened in-memory, in which
/// case the last session to close discards them. Every session of a file
/// shares its committed versions, its write lock and its notifiers, so
/// several sessions on one path behave like several processes attached to
/// the same file.
///
/// # Example
///
/// ```rust
/// use tessera_engine::{MemoryEngine, OpenOptions, StorageEngine};
/// use std::path::Path;
///
/// let engine = MemoryEngine::new();
/// let options = OpenOptions {
///     path: Path::new("/tmp/example.tessera"),
///     key: None,
///     read_only: false,
///     in_memory: false,
/// };
/// let mut session = engine.open_session(&options).unwrap();
/// session.begin_transaction().unwrap();
/// assert_eq!(session.commit().unwrap(), 1);
/// ```
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    /// Creates an engine with no files.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                files: Mutex::new(HashMap::new()),
                denied: Mutex::new(HashSet::new()),
                next_session: AtomicU64::new(1),
                sessions_opened: AtomicU64::new(0),
            }),
        }
    }

    /// Makes every later open of `path` fail with `PermissionDenied`.
    pub fn deny_access(&self, path: impl Into<PathBuf>) {
        self.shared.denied.lock().insert(path.into());
    }

    /// Total number of sessions opened so far.
    #[must_use]
    pub fn sessions_opened(&self) -> u64 {
        self.shared.sessions_opened.load(Ordering::SeqCst)
    }

    /// Number of sessions currently attached to `path`.
    #[must_use]
    pub fn attached_sessions(&self, path: &Path) -> usize {
        self.file(path).map_or(0, |f| f.sessions.lock().len())
    }

    /// Schema version stored at `path`, if the file exists.
    #[must_use]
    pub fn stored_schema_version(&self, path: &Path) -> Option<u64> {
        self.file(path).map(|f| f.latest().schema_version)
    }

    /// Latest committed version at `path`, if the file exists.
    #[must_use]
    pub fn latest_version(&self, path: &Path) -> Option<u64> {
        self.file(path).map(|f| f.latest().version)
    }

    fn file(&self, path: &Path) -> Option<Arc<FileState>> {
        self.shared.files.lock().get(path).cloned()
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("files", &self.shared.files.lock().len())
            .field("sessions_opened", &self.sessions_opened())
            .finish_non_exhaustive()
    }
}

impl StorageEngine for MemoryEngine {
    fn open_session(&self, options: &OpenOptions<'_>) -> EngineResult<Box<dyn EngineSession>> {
        let path = options.path;
        if self.shared.denied.lock().contains(path) {
            return Err(EngineError::PermissionDenied {
                path: path.to_path_buf(),
                message: "access to the file was denied".to_string(),
            });
        }

        let mut files = self.shared.files.lock();
        let file = match files.get(path) {
            Some(file) => {
                if file.in_memory != options.in_memory {
                    return Err(EngineError::IncompatibleLockFile {
                        path: path.to_path_buf(),
                        message: "file is attached with a different durability setting"
                            .to_string(),
                    });
                }
                file.check_key(path, options.key)?;
                Arc::clone(file)
            }
            None => {
                if options.read_only {
                    return Err(EngineError::access(path, "file not found"));
                }
                let file = Arc::new(FileState::new(
                    options.in_memory,
                    options.key,
                    Snapshot::empty(),
                ));
                files.insert(path.to_path_buf(), Arc::clone(&file));
                file
            }
        };

        let id = self.shared.next_session.fetch_add(1, Ordering::SeqCst);
        file.sessions.lock().insert(id);
        drop(files);
        self.shared.sessions_opened.fetch_add(1, Ordering::SeqCst);

        let view = file.latest();
        Ok(Box::new(MemorySession {
            id,
            path: path.to_path_buf(),
            read_only: options.read_only,
            file,
            shared: Arc::clone(&self.shared),
            view,
            pinned: true,
            staging: None,
            next_notification: 1,
        }))
    }

    fn exists(&self, path: &Path) -> bool {
        self.shared.files.lock().contains_key(path) || path.exists()
    }
}

/// A session of [`MemoryEngine`].
pub struct MemorySession {
    id: u64,
    path: PathBuf,
    read_only: bool,
    file: Arc<FileState>,
    shared: Arc<Shared>,
    view: Arc<Snapshot>,
    pinned: bool,
    staging: Option<Snapshot>,
    next_notification: u64,
}

impl MemorySession {
    fn read_view(&mut self) -> &Snapshot {
        if !self.pinned {
            self.view = self.file.latest();
            self.pinned = true;
        }
        self.staging.as_ref().unwrap_or(&*self.view)
    }

    fn staging_mut(&mut self) -> EngineResult<&mut Snapshot> {
        if self.read_only {
            return Err(EngineError::ReadOnly);
        }
        self.staging.as_mut().ok_or(EngineError::NotInTransaction)
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .field("in_transaction", &self.staging.is_some())
            .finish_non_exhaustive()
    }
}

/// Checks a schema update against `stored`. Returns true when it writes.
fn plan_schema_update(
    stored: &Snapshot,
    schema: &Schema,
    version: u64,
    read_only: bool,
) -> EngineResult<bool> {
    let current = stored.schema_version;
    if current != UNVERSIONED && version < current {
        return Err(EngineError::SchemaDowngrade {
            stored: current,
            requested: version,
        });
    }

    let difference = schema.first_difference(&stored.schema());
    if current == version {
        return match difference {
            None => Ok(false),
            Some(diff) => Err(EngineError::migration_required(format!(
                "{diff} without a schema version change"
            ))),
        };
    }
    if read_only {
        return Err(EngineError::migration_required(difference.unwrap_or_else(
            || format!("read-only file cannot move to schema version {version}"),
        )));
    }
    Ok(true)
}

fn stage_schema(
    old: &Snapshot,
    schema: &Schema,
    version: u64,
    migration: Option<MigrationFn<'_>>,
) -> EngineResult<Snapshot> {
    let mut next = old.clone();
    for object in &schema.objects {
        let table = match old.tables.get(&object.name) {
            Some(existing) => existing.reshaped(object),
            None => Table::create(object),
        };
        next.tables.insert(object.name.clone(), table);
    }
    next.schema_version = version;

    if old.schema_version != UNVERSIONED {
        if let Some(migrate) = migration {
            let mut context = StagedMigration {
                old_schema: old.schema(),
                new_schema: next.schema(),
                old,
                new: &mut next,
            };
            migrate(&mut context).map_err(|e| EngineError::Migration {
                message: e.to_string(),
            })?;
        }
    }
    Ok(next)
}

impl EngineSession for MemorySession {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn begin_transaction(&mut self) -> EngineResult<()> {
        if self.read_only {
            return Err(EngineError::ReadOnly);
        }
        if self.staging.is_some() {
            return Err(EngineError::failure("a write transaction is already open"));
        }
        self.file.acquire_writer(self.id);
        self.view = self.file.latest();
        self.pinned = true;
        self.staging = Some((*self.view).clone());
        Ok(())
    }

    fn commit(&mut self) -> EngineResult<u64> {
        let staged = self.staging.take().ok_or(EngineError::NotInTransaction)?;
        let version = self.file.install(staged);
        self.view = self.file.latest();
        self.file.release_writer(self.id);
        self.file.notify_peers(self.id, version);
        Ok(version)
    }

    fn cancel(&mut self) -> EngineResult<()> {
        self.staging.take().ok_or(EngineError::NotInTransaction)?;
        self.file.release_writer(self.id);
        Ok(())
    }

    fn is_in_transaction(&self) -> bool {
        self.staging.is_some()
    }

    fn update_schema(
        &mut self,
        schema: &Schema,
        version: u64,
        migration: Option<MigrationFn<'_>>,
    ) -> EngineResult<u64> {
        if self.staging.is_some() {
            return Err(EngineError::failure(
                "schema cannot change inside a write transaction",
            ));
        }
        if self.read_only {
            self.view = self.file.latest();
            self.pinned = true;
            plan_schema_update(&self.view, schema, version, true)?;
            return Ok(self.view.schema_version);
        }

        let current = self.file.latest();
        if !plan_schema_update(&current, schema, version, false)? {
            self.view = current;
            self.pinned = true;
            return Ok(version);
        }

        self.file.acquire_writer(self.id);
        let old = self.file.latest();
        let staged = plan_schema_update(&old, schema, version, false).and_then(|writes| {
            if writes {
                stage_schema(&old, schema, version, migration).map(Some)
            } else {
                Ok(None)
            }
        });

        match staged {
            Ok(Some(next)) => {
                let committed = self.file.install(next);
                self.view = self.file.latest();
                self.pinned = true;
                self.file.release_writer(self.id);
                self.file.notify_peers(self.id, committed);
                Ok(version)
            }
            Ok(None) => {
                self.file.release_writer(self.id);
                self.view = old;
                self.pinned = true;
                Ok(version)
            }
            Err(e) => {
                self.file.release_writer(self.id);
                self.view = old;
                self.pinned = true;
                Err(e)
            }
        }
    }

    fn schema(&mut self) -> Schema {
        self.read_view().schema()
    }

    fn schema_version(&mut self) -> u64 {
        self.read_view().schema_version
    }

    fn add_notification(&mut self, callback: NotificationCallback) -> NotificationId {
        let id = NotificationId(self.next_notification);
        self.next_notification += 1;
        self.file.notifiers.lock().push(Notifier {
            session: self.id,
            id,
            callback,
        });
        id
    }

    fn remove_notification(&mut self, id: NotificationId) {
        let session = self.id;
        self.file
            .notifiers
            .lock()
            .retain(|n| !(n.session == session && n.id == id));
    }

    fn current_version(&mut self) -> u64 {
        self.read_view().version
    }

    fn latest_version(&self) -> u64 {
        self.file.latest.read().version
    }

    fn refresh(&mut self) -> bool {
        if self.staging.is_some() {
            return false;
        }
        let latest = self.file.latest();
        let moved = latest.version != self.view.version;
        self.view = latest;
        self.pinned = true;
        moved
    }

    fn end_read(&mut self) {
        if self.staging.is_none() {
            self.pinned = false;
        }
    }

    fn get_row(&mut self, table: &str, key: &str) -> EngineResult<Option<Vec<Value>>> {
        Ok(self.read_view().table(table)?.rows.get(key).cloned())
    }

    fn set_row(&mut self, table: &str, key: &str, row: Vec<Value>) -> EngineResult<()> {
        let target = self.staging_mut()?.table_mut(table)?;
        if row.len() != target.columns.len() {
            return Err(EngineError::failure(format!(
                "row has {} values but '{table}' has {} columns",
                row.len(),
                target.columns.len()
            )));
        }
        target.rows.insert(key.to_string(), row);
        Ok(())
    }

    fn remove_row(&mut self, table: &str, key: &str) -> EngineResult<bool> {
        Ok(self.staging_mut()?.table_mut(table)?.rows.remove(key).is_some())
    }

    fn rows(&mut self, table: &str) -> EngineResult<Vec<Row>> {
        Ok(self
            .read_view()
            .table(table)?
            .rows
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_copy(&mut self, path: &Path, key: Option<&[u8; KEY_SIZE]>) -> EngineResult<()> {
        if self.staging.is_some() {
            return Err(EngineError::failure(
                "cannot write a copy inside a write transaction",
            ));
        }
        let snapshot = self.read_view().clone();
        let mut files = self.shared.files.lock();
        if files.contains_key(path) || path.exists() {
            return Err(EngineError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        files.insert(
            path.to_path_buf(),
            Arc::new(FileState::new(false, key, snapshot)),
        );
        Ok(())
    }

    fn compact(&mut self) -> EngineResult<bool> {
        if self.staging.is_some() {
            return Err(EngineError::failure("cannot compact inside a write transaction"));
        }
        Ok(self.file.sessions.lock().len() <= 1)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.staging.take().is_some() {
            self.file.release_writer(self.id);
        }
        let session = self.id;
        self.file.notifiers.lock().retain(|n| n.session != session);

        let mut files = self.shared.files.lock();
        let remaining = {
            let mut sessions = self.file.sessions.lock();
            sessions.remove(&session);
            sessions.len()
        };
        if remaining == 0
            && self.file.in_memory
            && files
                .get(&self.path)
                .is_some_and(|f| Arc::ptr_eq(f, &self.file))
        {
            files.remove(&self.path);
        }
    }
}

/// Migration context over the old snapshot and the staged one.
struct StagedMigration<'a> {
    old_schema: Schema,
    new_schema: Schema,
    old: &'a Snapshot,
    new: &'a mut Snapshot,
}

fn read_value(snapshot: &Snapshot, object_type: &str, key: &str, property: &str) -> Option<Value> {
    let table = snapshot.tables.get(object_type)?;
    let column = table.column(property)?;
    table.rows.get(key)?.get(column).cloned()
}

impl MigrationContext for StagedMigration<'_> {
    fn old_version(&self) -> u64 {
        self.old.schema_version
    }

    fn new_version(&self) -> u64 {
        self.new.schema_version
    }

    fn old_schema(&self) -> &Schema {
        &self.old_schema
    }

    fn new_schema(&self) -> &Schema {
        &self.new_schema
    }

    fn old_keys(&self, object_type: &str) -> Vec<String> {
        self.old
            .tables
            .get(object_type)
            .map(|t| t.rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn old_value(&self, object_type: &str, key: &str, property: &str) -> Option<Value> {
        read_value(self.old, object_type, key, property)
    }

    fn value(&self, object_type: &str, key: &str, property: &str) -> Option<Value> {
        read_value(self.new, object_type, key, property)
    }

    fn set_value(
        &mut self,
        object_type: &str,
        key: &str,
        property: &str,
        value: Value,
    ) -> EngineResult<()> {
        let table = self.new.table_mut(object_type)?;
        let column = table.column(property).ok_or_else(|| {
            EngineError::failure(format!("'{object_type}' has no property '{property}'"))
        })?;
        if !table.columns[column].accepts(&value) {
            return Err(EngineError::failure(format!(
                "value does not match the type of '{object_type}.{property}'"
            )));
        }
        let row = table.rows.get_mut(key).ok_or_else(|| {
            EngineError::failure(format!("no '{object_type}' object with key '{key}'"))
        })?;
        row[column] = value;
        Ok(())
    }

    fn delete_object(&mut self, object_type: &str, key: &str) -> bool {
        self.new
            .tables
            .get_mut(object_type)
            .is_some_and(|t| t.rows.remove(key).is_some())
    }
}
