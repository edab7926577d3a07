//! Benchmark utilities.

use rand::Rng;
use tessera_core::{EncryptionGuard, HandleConfig, Runtime};
use tessera_engine::{MemoryEngine, ObjectSchema, Property, PropertyType, Schema, Value};

/// Schema used by every benchmark: `Blob { payload: bytes, size: integer }`.
pub fn blob_schema() -> Schema {
    Schema::new().with_object(
        ObjectSchema::new("Blob")
            .with_property(Property::new("payload", PropertyType::Bytes))
            .with_property(Property::new("size", PropertyType::Integer)),
    )
}

/// Runtime over a fresh memory engine with encryption checks disabled.
pub fn bench_runtime() -> Runtime {
    Runtime::with_guard(MemoryEngine::new(), EncryptionGuard::new(false, || false))
}

/// Configuration for a named in-memory file holding `Blob` objects.
pub fn blob_config(name: &str) -> HandleConfig {
    HandleConfig::in_memory(name)
        .schema(blob_schema())
        .schema_version(1)
}

/// Generate random payload bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Property values for one `Blob` object.
pub fn blob_fields(payload: Vec<u8>) -> [(&'static str, Value); 2] {
    let size = i64::try_from(payload.len()).unwrap_or(i64::MAX);
    [("payload", Value::from(payload)), ("size", Value::from(size))]
}
