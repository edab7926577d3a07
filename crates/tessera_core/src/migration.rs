//! Schema setup for newly opened sessions.
//!
//! Every cold open goes through [`open_or_migrate`] while the runtime's
//! initialization lock is held, so schema creation and migration for a path
//! run once and later opens either reuse a live handle's schema or find the
//! file already at the target version.

use crate::cache::{check_peers, CachedHandle};
use crate::config::HandleConfig;
use crate::crypto::EncryptionKey;
use crate::error::{CoreError, CoreResult};
use crate::runtime::RuntimeInner;
use crate::types::PathKey;
use std::sync::Arc;
use tessera_engine::{
    EngineSession, MigrationContext, ObjectSchema, OpenOptions, Schema, UNVERSIONED,
};

/// An engine session with its schema established.
pub(crate) struct OpenedSession {
    pub(crate) session: Box<dyn EngineSession>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) schema_version: u64,
}

/// Opens an engine session for `path` and brings its schema to the target
/// version.
///
/// The caller holds the runtime's initialization lock.
pub(crate) fn open_or_migrate(
    runtime: &RuntimeInner,
    path: &PathKey,
    config: &HandleConfig,
    key: Option<&EncryptionKey>,
) -> CoreResult<OpenedSession> {
    let peers = runtime.cache.live(path);
    check_peers(path, &peers, config)?;

    let target = config
        .schema_version
        .unwrap_or_else(|| runtime.registry.schema_version(path));
    if target == UNVERSIONED {
        return Err(CoreError::InvalidVersion { version: target });
    }

    let mut session = runtime.engine.open_session(&OpenOptions {
        path: path.as_path(),
        key: key.map(EncryptionKey::as_bytes),
        read_only: config.read_only,
        in_memory: config.is_in_memory(),
    })?;

    if config.dynamic_schema {
        let schema = session.schema();
        let schema_version = session.schema_version();
        finish_setup(session.as_mut(), config.read_only);
        tracing::debug!(path = %path, version = schema_version, "opened with stored schema");
        return Ok(OpenedSession {
            session,
            schema: Arc::new(schema),
            schema_version,
        });
    }

    if let Some(donor) = peers.first() {
        return adopt(path, session, donor, target, config.read_only);
    }

    let desired = config
        .custom_schema
        .clone()
        .or_else(|| runtime.schema.read().clone())
        .unwrap_or_default();
    let callback = if config.read_only || config.is_in_memory() {
        None
    } else {
        config
            .migration_callback
            .clone()
            .or_else(|| runtime.registry.migration_callback(path))
    };

    let stored = session.schema_version();
    let applied = match &callback {
        Some(callback) => {
            let mut migrate = |context: &mut dyn MigrationContext| callback(context);
            session.update_schema(&desired, target, Some(&mut migrate))?
        }
        None => session.update_schema(&desired, target, None)?,
    };
    if stored == UNVERSIONED {
        tracing::info!(path = %path, version = applied, "schema created");
    } else if stored != applied {
        tracing::info!(path = %path, from = stored, to = applied, "schema migrated");
    } else {
        tracing::debug!(path = %path, version = applied, "schema up to date");
    }

    let aligned = align_columns(&desired, &session.schema())?;
    finish_setup(session.as_mut(), config.read_only);
    Ok(OpenedSession {
        session,
        schema: Arc::new(aligned),
        schema_version: applied,
    })
}

fn adopt(
    path: &PathKey,
    mut session: Box<dyn EngineSession>,
    donor: &CachedHandle,
    target: u64,
    read_only: bool,
) -> CoreResult<OpenedSession> {
    if donor.schema_version != target {
        return Err(CoreError::AlreadyOpenConflict {
            path: path.as_path().to_path_buf(),
            open_version: donor.schema_version,
            requested: target,
        });
    }
    finish_setup(session.as_mut(), read_only);
    tracing::debug!(path = %path, donor = %donor.id, "reusing schema of open handle");
    Ok(OpenedSession {
        session,
        schema: Arc::clone(&donor.schema),
        schema_version: donor.schema_version,
    })
}

/// Read-write sessions leave setup idle; read-only ones stay on the
/// snapshot that established the schema.
fn finish_setup(session: &mut dyn EngineSession, read_only: bool) {
    if !read_only {
        session.end_read();
    }
}

/// Binds every declared property to the column the engine stores it in.
///
/// Properties come back in physical column order. Columns the file has but
/// the declaration does not are kept so rows can be written whole. An empty
/// declaration adopts the stored schema.
///
/// # Errors
///
/// `SchemaMismatch` if a declared object type or property is not stored with
/// the declared shape.
pub fn align_columns(desired: &Schema, stored: &Schema) -> CoreResult<Schema> {
    if desired.is_empty() {
        return Ok(stored.clone());
    }

    let mut aligned = Schema::new();
    for object in &desired.objects {
        let physical = stored.object(&object.name).ok_or_else(|| {
            CoreError::schema_mismatch(format!(
                "object type '{}' is not stored in the file",
                object.name
            ))
        })?;
        for property in &object.properties {
            let bound = physical
                .property(&property.name)
                .is_some_and(|p| p.same_shape(property) && p.column.is_some());
            if !bound {
                return Err(CoreError::schema_mismatch(format!(
                    "property '{}.{}' is not stored with its declared type",
                    object.name, property.name
                )));
            }
        }

        let mut properties = physical.properties.clone();
        properties.sort_by_key(|p| p.column);
        aligned = aligned.with_object(ObjectSchema {
            name: object.name.clone(),
            properties,
        });
    }
    Ok(aligned)
}
