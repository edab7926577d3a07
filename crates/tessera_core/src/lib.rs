//! # Tessera Core
//!
//! Instance lifecycle and coordination for the Tessera storage engine.
//!
//! This crate provides:
//! - A [`Runtime`] owning per-path defaults, the handle cache and the
//!   initialization lock
//! - Thread-affine [`Handle`]s, reused per (path, thread)
//! - Schema creation and versioned migration, run once per open
//! - Write transactions with rollback when a handle closes mid-transaction
//! - Change listeners and notifications from other sessions on the same file
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::{HandleConfig, Notification, Runtime};
//! use tessera_engine::{MemoryEngine, ObjectSchema, Property, PropertyType, Schema, Value};
//!
//! let runtime = Runtime::new(MemoryEngine::new());
//! let schema = Schema::new().with_object(
//!     ObjectSchema::new("Person").with_property(Property::new("name", PropertyType::Text)),
//! );
//! let handle = runtime
//!     .open(HandleConfig::in_memory("people").schema(schema).schema_version(1))
//!     .unwrap();
//!
//! let token = handle.add_listener(|change, _| assert_eq!(change, Notification::DidChange));
//! handle
//!     .run_in_transaction(|h| h.put("Person", "ann", &[("name", Value::from("Ann"))]))
//!     .unwrap();
//! assert_eq!(handle.objects("Person").unwrap().len(), 1);
//! assert!(handle.remove_listener(token).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod crypto;
mod enumerator;
mod error;
mod handle;
mod migration;
mod notification;
mod object;
mod registry;
mod runtime;
mod transaction;
mod types;

pub use config::{HandleConfig, HandleSettings, Location, MigrationCallback};
pub use crypto::{
    debugger_attached, encryption_disabled_by_env, EncryptionGuard, EncryptionKey,
    DISABLE_ENCRYPTION_ENV, KEY_SIZE,
};
pub use enumerator::Enumerator;
pub use error::{CoreError, CoreResult, ErrorCategory, ErrorCode};
pub use handle::Handle;
pub use migration::align_columns;
pub use notification::{Listener, Notification, NotificationHub, NotificationToken};
pub use object::Object;
pub use registry::ConfigRegistry;
pub use runtime::Runtime;
pub use transaction::{TransactionController, TransactionState};
pub use types::{EnumeratorId, HandleId, PathKey, TokenId, IN_MEMORY_DIR};

pub use tessera_engine::{MigrationContext, MigrationError, Schema, Value};
