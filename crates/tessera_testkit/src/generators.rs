//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, schema version sequences and object
//! operations.

use proptest::prelude::*;
use tessera_core::KEY_SIZE;
use tessera_engine::Value;

/// Strategy for key material of any length up to twice the valid size.
pub fn key_bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=KEY_SIZE * 2)
}

/// Strategy for keys of exactly the valid size.
pub fn valid_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), KEY_SIZE)
}

/// Strategy for non-decreasing schema version sequences starting at 0.
///
/// Repeated values model reopening a file without a version change.
pub fn version_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..3, 1..max_len).prop_map(|steps| {
        steps
            .into_iter()
            .scan(0u64, |version, step| {
                *version += step;
                Some(*version)
            })
            .collect()
    })
}

/// Strategy for object primary keys.
pub fn object_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,7}").expect("Invalid regex")
}

/// Strategy for `Person` field values.
pub fn person_fields_strategy() -> impl Strategy<Value = (String, i64)> {
    (
        prop::string::string_regex("[A-Z][a-z]{0,11}").expect("Invalid regex"),
        0i64..120,
    )
}

/// An operation on `Person` objects.
#[derive(Debug, Clone)]
pub enum PersonOperation {
    /// Insert or update a person
    Put {
        /// Primary key
        key: String,
        /// Name
        name: String,
        /// Age
        age: i64,
    },
    /// Delete a person
    Delete {
        /// Primary key
        key: String,
    },
}

impl PersonOperation {
    /// Primary key the operation touches.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }

    /// Field list for [`tessera_core::Handle::put`].
    #[must_use]
    pub fn fields(name: &str, age: i64) -> [(&'static str, Value); 2] {
        [("name", Value::from(name)), ("age", Value::from(age))]
    }
}

/// Strategy for person operations.
pub fn person_operation_strategy() -> impl Strategy<Value = PersonOperation> {
    prop_oneof![
        3 => (object_key_strategy(), person_fields_strategy())
            .prop_map(|(key, (name, age))| PersonOperation::Put { key, name, age }),
        1 => object_key_strategy().prop_map(|key| PersonOperation::Delete { key }),
    ]
}

/// Strategy for a sequence of person operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<PersonOperation>> {
    prop::collection::vec(person_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn version_sequences_never_decrease(versions in version_sequence_strategy(8)) {
            prop_assert!(versions.windows(2).all(|w| w[0] <= w[1]));
        }

        #[test]
        fn valid_keys_have_key_size(key in valid_key_strategy()) {
            prop_assert_eq!(key.len(), KEY_SIZE);
        }

        #[test]
        fn object_keys_start_with_a_letter(key in object_key_strategy()) {
            prop_assert!(key.chars().next().is_some_and(|c| c.is_ascii_lowercase()));
        }
    }
}
