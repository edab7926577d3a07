//! Objects read through a handle.

use crate::error::{CoreError, CoreResult};
use tessera_engine::{EngineSession, ObjectSchema, Schema, Value};

/// One stored object: its primary key and its property values.
///
/// Properties appear in physical column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    key: String,
    fields: Vec<(String, Value)>,
}

impl Object {
    pub(crate) fn from_row(key: String, row: &[Value], schema: &ObjectSchema) -> Self {
        let fields = schema
            .properties
            .iter()
            .map(|p| {
                let value = p
                    .column
                    .and_then(|c| row.get(c))
                    .cloned()
                    .unwrap_or(Value::Null);
                (p.name.clone(), value)
            })
            .collect();
        Self { key, fields }
    }

    /// Primary key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value of `property`, if the object has it.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, value)| value)
    }

    /// All properties in column order.
    #[must_use]
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }
}

pub(crate) fn object_schema<'a>(schema: &'a Schema, object_type: &str) -> CoreResult<&'a ObjectSchema> {
    schema
        .object(object_type)
        .ok_or_else(|| CoreError::schema_mismatch(format!("unknown object type '{object_type}'")))
}

pub(crate) fn read_objects(
    session: &mut dyn EngineSession,
    schema: &Schema,
    object_type: &str,
) -> CoreResult<Vec<Object>> {
    let object = object_schema(schema, object_type)?;
    Ok(session
        .rows(object_type)?
        .into_iter()
        .map(|(key, row)| Object::from_row(key, &row, object))
        .collect())
}

/// Builds the physical row for a write.
///
/// Properties not named in `fields` keep their value from `existing`, or get
/// their initial value for a new object.
pub(crate) fn build_row(
    schema: &ObjectSchema,
    existing: Option<Vec<Value>>,
    fields: &[(&str, Value)],
) -> CoreResult<Vec<Value>> {
    let width = schema
        .properties
        .iter()
        .filter_map(|p| p.column)
        .max()
        .map_or(0, |c| c + 1);

    let mut row = match existing {
        Some(row) if row.len() == width => row,
        _ => {
            let mut row = vec![Value::Null; width];
            for property in &schema.properties {
                if let Some(column) = property.column {
                    row[column] = property.initial_value();
                }
            }
            row
        }
    };

    for (name, value) in fields {
        let property = schema.property(name).ok_or_else(|| {
            CoreError::schema_mismatch(format!("'{}' has no property '{name}'", schema.name))
        })?;
        if !property.accepts(value) {
            return Err(CoreError::schema_mismatch(format!(
                "value for '{}.{name}' does not match its type",
                schema.name
            )));
        }
        let column = property.column.ok_or_else(|| {
            CoreError::schema_mismatch(format!("'{}.{name}' has no column", schema.name))
        })?;
        row[column] = value.clone();
    }
    Ok(row)
}
