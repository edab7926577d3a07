//! # Tessera Engine
//!
//! The storage engine boundary used by the Tessera coordination layer.
//!
//! The coordination layer never touches files directly. It opens
//! [`EngineSession`]s through a [`StorageEngine`] and drives transactions,
//! schema updates and change notifications through them.
//!
//! ## Contents
//!
//! - [`StorageEngine`] / [`EngineSession`] - the boundary traits
//! - [`MigrationContext`] - old/new data access during a schema migration
//! - [`Schema`], [`ObjectSchema`], [`Property`] - the object schema model
//! - [`Value`] - dynamic property values
//! - [`MemoryEngine`] - a reference engine keeping files in process memory
//!
//! ## Example
//!
//! ```rust
//! use tessera_engine::{
//!     MemoryEngine, ObjectSchema, OpenOptions, Property, PropertyType, Schema, StorageEngine,
//! };
//! use std::path::Path;
//!
//! let engine = MemoryEngine::new();
//! let mut session = engine
//!     .open_session(&OpenOptions {
//!         path: Path::new("/tmp/people.tessera"),
//!         key: None,
//!         read_only: false,
//!         in_memory: true,
//!     })
//!     .unwrap();
//!
//! let schema = Schema::new().with_object(
//!     ObjectSchema::new("Person").with_property(Property::new("name", PropertyType::Text)),
//! );
//! assert_eq!(session.update_schema(&schema, 1, None).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod keycheck;
mod memory;
mod schema;
mod value;

pub use engine::{
    EngineSession, MigrationContext, MigrationFn, NotificationCallback, NotificationId,
    OpenOptions, Row, StorageEngine, UNVERSIONED,
};
pub use error::{EngineError, EngineResult, MigrationError};
pub use keycheck::{KeyCheck, KEY_SIZE};
pub use memory::{MemoryEngine, MemorySession};
pub use schema::{ObjectSchema, Property, PropertyType, Schema};
pub use value::Value;
