//! Dynamic property values.

use crate::schema::PropertyType;
use serde::{Deserialize, Serialize};

/// A single stored property value.
///
/// Floats are intentionally not supported so values stay `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Text string (UTF-8).
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the zero value stored in a freshly added non-nullable column.
    #[must_use]
    pub fn default_for(kind: PropertyType) -> Self {
        match kind {
            PropertyType::Bool => Value::Bool(false),
            PropertyType::Integer => Value::Integer(0),
            PropertyType::Text => Value::Text(String::new()),
            PropertyType::Bytes => Value::Bytes(Vec::new()),
        }
    }

    /// Returns the property type this value belongs to, `None` for null.
    #[must_use]
    pub fn kind(&self) -> Option<PropertyType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(PropertyType::Bool),
            Value::Integer(_) => Some(PropertyType::Integer),
            Value::Text(_) => Some(PropertyType::Text),
            Value::Bytes(_) => Some(PropertyType::Bytes),
        }
    }

    /// Returns true for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}
