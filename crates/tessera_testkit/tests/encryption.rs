//! Key validation, encrypted opens and encrypted copies.

use proptest::prelude::*;
use tessera_core::{
    encryption_disabled_by_env, CoreError, EncryptionGuard, EncryptionKey, ErrorCode, HandleConfig,
    Value, KEY_SIZE,
};
use tessera_testkit::prelude::*;

fn populated(rt: &TestRuntime, name: &str, key: &[u8]) -> tessera_core::Handle {
    let handle = rt.open(rt.config(name).encryption_key(key)).unwrap();
    handle
        .run_in_transaction(|h| {
            h.put("Person", "ann", &[("name", Value::from("Ann")), ("age", Value::from(31i64))])?;
            h.put("Person", "bob", &[("name", Value::from("Bob")), ("age", Value::from(42i64))])
        })
        .unwrap();
    handle
}

#[test]
fn short_key_fails_before_any_engine_io() {
    let rt = TestRuntime::new();
    let err = rt
        .open(rt.config("short.tessera").encryption_key([7u8; 63]))
        .unwrap_err();

    assert!(matches!(err, CoreError::InvalidKeyLength { expected: KEY_SIZE, actual: 63 }));
    assert_eq!(err.code(), ErrorCode::InvalidKeyLength);
    assert_eq!(rt.engine.sessions_opened(), 0);
}

#[test]
fn copy_opened_with_its_key_has_equal_data() {
    let rt = TestRuntime::new();
    let key = EncryptionKey::generate();
    let source = populated(&rt, "source.tessera", key.as_bytes());

    let copy_path = rt.path("copy.tessera");
    source.write_copy(&copy_path, Some(&key.as_bytes()[..])).unwrap();

    let copy = rt
        .open(
            HandleConfig::new(&copy_path)
                .schema(person_schema())
                .schema_version(1)
                .encryption_key(key.as_bytes()),
        )
        .unwrap();
    assert!(copy.settings().encrypted);
    assert_eq!(copy.objects("Person").unwrap(), source.objects("Person").unwrap());
}

#[test]
fn copy_can_change_the_key() {
    let rt = TestRuntime::new();
    let old_key = [1u8; KEY_SIZE];
    let new_key = [2u8; KEY_SIZE];
    let source = populated(&rt, "rekey.tessera", &old_key);

    let copy_path = rt.path("rekeyed.tessera");
    source.write_copy(&copy_path, Some(&new_key[..])).unwrap();

    let wrong = rt.open(
        HandleConfig::new(&copy_path)
            .schema(person_schema())
            .schema_version(1)
            .encryption_key(old_key),
    );
    assert!(matches!(wrong, Err(CoreError::AccessError { .. })));

    let right = rt
        .open(
            HandleConfig::new(&copy_path)
                .schema(person_schema())
                .schema_version(1)
                .encryption_key(new_key),
        )
        .unwrap();
    assert_eq!(right.objects("Person").unwrap().len(), 2);
}

#[test]
fn copy_refuses_existing_destination_and_bad_keys() {
    let rt = TestRuntime::new();
    let source = rt.open(rt.config("copy-errors.tessera")).unwrap();
    let copy_path = rt.path("copy-errors-out.tessera");

    let short = source.write_copy(&copy_path, Some(&[0u8; 10][..])).unwrap_err();
    assert!(matches!(short, CoreError::InvalidKeyLength { actual: 10, .. }));

    source.write_copy(&copy_path, None).unwrap();
    let again = source.write_copy(&copy_path, None).unwrap_err();
    assert!(matches!(again, CoreError::AlreadyExists { .. }));
}

#[test]
fn registered_key_is_used_when_the_config_has_none() {
    let rt = TestRuntime::new();
    let path = rt.path("registered-key.tessera");
    rt.set_encryption_key(&path, Some(&[5u8; KEY_SIZE][..])).unwrap();

    let handle = rt.open(rt.config("registered-key.tessera")).unwrap();
    assert!(handle.settings().encrypted);
    drop(handle);

    rt.set_encryption_key(&path, None).unwrap();
    let err = rt.open(rt.config("registered-key.tessera")).unwrap_err();
    assert!(matches!(err, CoreError::AccessError { .. }));
}

#[test]
fn attached_debugger_blocks_keys_only() {
    let rt = TestRuntime::with_guard(EncryptionGuard::new(false, || true));
    let err = rt
        .open(rt.config("debugged.tessera").encryption_key([3u8; KEY_SIZE]))
        .unwrap_err();
    assert!(matches!(err, CoreError::DebuggerAttached));
    assert_eq!(rt.engine.sessions_opened(), 0);

    let plain = rt.open(rt.config("debugged.tessera")).unwrap();
    assert!(!plain.settings().encrypted);
}

#[test]
fn disabled_encryption_ignores_every_key() {
    let rt = TestRuntime::with_guard(EncryptionGuard::new(true, || true));
    assert!(rt.guard().is_disabled());

    let handle = rt
        .open(rt.config("disabled.tessera").encryption_key([3u8; 17]))
        .unwrap();
    assert!(!handle.settings().encrypted);

    rt.set_encryption_key(rt.path("disabled.tessera"), Some(&[1u8; 5][..]))
        .unwrap();
    assert!(rt.encryption_key(rt.path("disabled.tessera")).unwrap().is_none());
}

#[test]
fn environment_guard_reflects_the_toggle() {
    assert_eq!(EncryptionGuard::from_env().is_disabled(), encryption_disabled_by_env());
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn only_full_size_keys_open(key in key_bytes_strategy()) {
        let rt = TestRuntime::new();
        let result = rt.open(rt.config("lengths.tessera").encryption_key(&key));
        if key.len() == KEY_SIZE {
            prop_assert!(result.is_ok());
        } else {
            let is_length_error = matches!(result, Err(CoreError::InvalidKeyLength { .. }));
            prop_assert!(is_length_error);
            prop_assert_eq!(rt.engine.sessions_opened(), 0);
        }
    }

    #[test]
    fn any_valid_key_round_trips_through_a_copy(key in valid_key_strategy()) {
        let rt = TestRuntime::new();
        let source = populated(&rt, "prop-source.tessera", &key);
        let copy_path = rt.path("prop-copy.tessera");
        source.write_copy(&copy_path, Some(key.as_slice())).unwrap();

        let copy = rt
            .open(
                HandleConfig::new(&copy_path)
                    .schema(person_schema())
                    .schema_version(1)
                    .encryption_key(&key),
            )
            .unwrap();
        prop_assert_eq!(copy.objects("Person").unwrap().len(), 2);
    }
}
