//! Object schema model shared by the engine and the coordination layer.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Type of a stored property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// Boolean column.
    Bool,
    /// 64-bit signed integer column.
    Integer,
    /// UTF-8 text column.
    Text,
    /// Raw bytes column.
    Bytes,
}

/// A named, typed property of an object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Property type.
    pub kind: PropertyType,
    /// Whether null is accepted.
    #[serde(default)]
    pub nullable: bool,
    /// Physical column index, resolved from the engine after schema setup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl Property {
    /// Creates a non-nullable property with no resolved column.
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            column: None,
        }
    }

    /// Marks the property as nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Returns true if `value` may be stored in this property.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match value.kind() {
            None => self.nullable,
            Some(kind) => kind == self.kind,
        }
    }

    /// Value written into this column for rows that predate it.
    #[must_use]
    pub fn initial_value(&self) -> Value {
        if self.nullable {
            Value::Null
        } else {
            Value::default_for(self.kind)
        }
    }

    /// Same name, type and nullability; the column binding is ignored.
    #[must_use]
    pub fn same_shape(&self, other: &Property) -> bool {
        self.name == other.name && self.kind == other.kind && self.nullable == other.nullable
    }
}

/// Schema of a single object type (a table in the engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSchema {
    /// Object type name.
    pub name: String,
    /// Properties, in declared order until aligned to physical column order.
    pub properties: Vec<Property>,
}

impl ObjectSchema {
    /// Creates an object schema with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// True when both declare the same properties, in any order.
    #[must_use]
    pub fn same_shape(&self, other: &ObjectSchema) -> bool {
        self.name == other.name
            && self.properties.len() == other.properties.len()
            && self.properties.iter().all(|p| {
                other
                    .property(&p.name)
                    .is_some_and(|o| o.same_shape(p))
            })
    }
}

/// A full database schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Object types.
    pub objects: Vec<ObjectSchema>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object type.
    #[must_use]
    pub fn with_object(mut self, object: ObjectSchema) -> Self {
        self.objects.push(object);
        self
    }

    /// Looks up an object type by name.
    #[must_use]
    pub fn object(&self, name: &str) -> Option<&ObjectSchema> {
        self.objects.iter().find(|o| o.name == name)
    }

    /// Returns true if the schema declares no object types.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Describes the first object type of `self` that `stored` does not match.
    ///
    /// Object types present only in `stored` are ignored.
    #[must_use]
    pub fn first_difference(&self, stored: &Schema) -> Option<String> {
        self.objects.iter().find_map(|desired| match stored.object(&desired.name) {
            None => Some(format!("object type '{}' was added", desired.name)),
            Some(existing) if !existing.same_shape(desired) => {
                Some(format!("properties of '{}' changed", desired.name))
            }
            Some(_) => None,
        })
    }
}
