//! Test fixtures and runtime helpers.
//!
//! Provides a runtime over a fresh reference engine, a temporary directory
//! for file paths, common schemas and a recorder for listener calls.

use parking_lot::Mutex;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tessera_core::{EncryptionGuard, Handle, HandleConfig, Notification, NotificationToken, Runtime};
use tessera_engine::{MemoryEngine, ObjectSchema, Property, PropertyType, Schema};

/// A runtime over a private [`MemoryEngine`] with a scratch directory.
pub struct TestRuntime {
    /// The runtime under test.
    pub runtime: Runtime,
    /// The engine behind the runtime, for inspection.
    pub engine: MemoryEngine,
    temp_dir: TempDir,
}

impl TestRuntime {
    /// Creates a runtime whose encryption guard accepts keys.
    pub fn new() -> Self {
        Self::with_guard(EncryptionGuard::new(false, || false))
    }

    /// Creates a runtime with an explicit encryption guard.
    pub fn with_guard(guard: EncryptionGuard) -> Self {
        let engine = MemoryEngine::new();
        Self {
            runtime: Runtime::with_guard(engine.clone(), guard),
            engine,
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// A second runtime over the same engine.
    ///
    /// Its cache is separate, so opening a path already open here yields a
    /// second engine session on the same thread.
    pub fn peer(&self) -> Runtime {
        Runtime::with_guard(self.engine.clone(), self.runtime.guard())
    }

    /// Path of `name` inside the scratch directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Config for `name` with the person schema at version 1.
    pub fn config(&self, name: &str) -> HandleConfig {
        HandleConfig::new(self.path(name))
            .schema(person_schema())
            .schema_version(1)
    }
}

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestRuntime {
    type Target = Runtime;

    fn deref(&self) -> &Self::Target {
        &self.runtime
    }
}

/// `Person { name: text, age: integer }`.
pub fn person_schema() -> Schema {
    Schema::new().with_object(
        ObjectSchema::new("Person")
            .with_property(Property::new("name", PropertyType::Text))
            .with_property(Property::new("age", PropertyType::Integer)),
    )
}

/// Parses a schema from JSON.
///
/// # Example
///
/// ```rust
/// let schema = tessera_testkit::schema_from_json(
///     r#"{"objects":[{"name":"Dog","properties":[{"name":"name","kind":"text"}]}]}"#,
/// );
/// assert!(schema.object("Dog").is_some());
/// ```
pub fn schema_from_json(json: &str) -> Schema {
    serde_json::from_str(json).expect("Invalid schema JSON")
}

/// Records every notification delivered to a listener.
#[derive(Clone, Default)]
pub struct ListenerLog {
    events: Arc<Mutex<Vec<Notification>>>,
}

impl ListenerLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a recording listener on `handle`.
    pub fn attach(&self, handle: &Handle) -> NotificationToken {
        let events = Arc::clone(&self.events);
        handle.add_listener(move |notification, _| events.lock().push(notification))
    }

    /// All notifications so far, in delivery order.
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }

    /// Number of notifications of `kind`.
    pub fn count(&self, kind: Notification) -> usize {
        self.events.lock().iter().filter(|n| **n == kind).count()
    }

    /// Forgets recorded notifications.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Runs `f` with a subscriber that records formatted events at `DEBUG` and
/// above on the current thread, and returns the output.
pub fn capture_logs<F: FnOnce()>(f: F) -> String {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    buffer.contents()
}

#[derive(Clone, Default)]
struct LogBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
