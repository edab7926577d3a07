//! Handle reuse, configuration conflicts, thread affinity and closing.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tessera_core::{CoreError, EncryptionGuard, HandleConfig, Value};
use tessera_testkit::prelude::*;

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_default()
}

#[test]
fn same_thread_open_reuses_the_session() {
    let rt = TestRuntime::new();
    let a = rt.open(rt.config("reuse.tessera")).unwrap();
    let b = rt.open(rt.config("reuse.tessera")).unwrap();

    assert_eq!(a.id(), b.id());
    assert_eq!(rt.engine.sessions_opened(), 1);
}

#[test]
fn same_thread_version_change_conflicts() {
    let rt = TestRuntime::new();
    let _open = rt.open(rt.config("reuse-version.tessera")).unwrap();
    let err = rt
        .open(rt.config("reuse-version.tessera").schema_version(2))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::AlreadyOpenConflict { open_version: 1, requested: 2, .. }
    ));
}

#[test]
fn two_threads_get_independent_handles() {
    let rt = TestRuntime::new();
    let here = rt.open(rt.config("threads.tessera")).unwrap();

    let runtime = rt.runtime.clone();
    let config = rt.config("threads.tessera");
    let there = thread::spawn(move || {
        let handle = runtime.open(config).unwrap();
        handle
            .run_in_transaction(|h| h.put("Person", "p1", &[("name", Value::from("Ann"))]))
            .unwrap();
        handle.id()
    })
    .join()
    .unwrap();

    assert_ne!(here.id(), there);
    assert_eq!(rt.engine.sessions_opened(), 2);
    here.refresh();
    assert_eq!(here.objects("Person").unwrap().len(), 1);
}

#[test]
fn read_only_mismatch_conflicts_across_threads() {
    let rt = TestRuntime::new();
    let _writer = rt.open(rt.config("ro-conflict.tessera")).unwrap();

    let runtime = rt.runtime.clone();
    let config = rt.config("ro-conflict.tessera").read_only(true);
    let result = thread::spawn(move || runtime.open(config).map(|_| ()))
        .join()
        .unwrap();
    assert!(matches!(result, Err(CoreError::ConfigurationConflict { .. })));

    let same_thread = rt.open(rt.config("ro-conflict.tessera").read_only(true));
    assert!(matches!(same_thread, Err(CoreError::ConfigurationConflict { .. })));
}

#[test]
fn dropping_inside_a_transaction_rolls_back() {
    let rt = TestRuntime::new();
    let handle = rt.open(rt.config("drop-txn.tessera")).unwrap();
    handle.begin_write().unwrap();
    handle
        .put("Person", "p1", &[("name", Value::from("Ann"))])
        .unwrap();
    drop(handle);
    assert_eq!(rt.cached_handle_count(), 0);

    let handle = rt.open(rt.config("drop-txn.tessera")).unwrap();
    assert!(handle.objects("Person").unwrap().is_empty());
    handle.begin_write().unwrap();
    handle.cancel_write().unwrap();
}

#[test]
fn invalidate_closes_every_clone() {
    let rt = TestRuntime::new();
    let handle = rt.open(rt.config("invalidate.tessera")).unwrap();
    let clone = handle.clone();
    let path = handle.path().to_path_buf();

    handle.begin_write().unwrap();
    handle.invalidate();
    assert!(clone.is_invalidated());
    assert_eq!(rt.engine.attached_sessions(&path), 0);
    assert_eq!(rt.cached_handle_count(), 0);

    let reopened = rt.open(rt.config("invalidate.tessera")).unwrap();
    assert!(!reopened.is_invalidated());
}

#[test]
#[should_panic(expected = "used after invalidate")]
fn using_an_invalidated_handle_panics() {
    let rt = TestRuntime::new();
    let handle = rt.open(rt.config("after-invalidate.tessera")).unwrap();
    handle.invalidate();
    let _ = handle.objects("Person");
}

#[test]
fn using_a_handle_off_its_thread_panics() {
    let rt = TestRuntime::new();
    let handle = rt.open(rt.config("wrong-thread.tessera")).unwrap();
    let stolen = handle.clone();

    let payload = thread::spawn(move || {
        let _ = stolen.begin_write();
    })
    .join()
    .unwrap_err();

    assert!(panic_message(payload).contains("WrongThreadAccess"));
    assert!(!handle.is_in_transaction());
}

#[test]
fn reset_forgets_registrations_and_cache() {
    let rt = TestRuntime::new();
    let path = rt.path("reset.tessera");
    rt.set_encryption_key(&path, Some(&[1u8; 64][..])).unwrap();
    rt.set_schema_version(&path, 7, None).unwrap();

    let before = rt.open(rt.config("other.tessera")).unwrap();
    rt.reset_all();

    assert!(rt.encryption_key(&path).unwrap().is_none());
    assert_eq!(rt.schema_version(&path).unwrap(), 0);
    assert_eq!(rt.cached_handle_count(), 0);

    let after = rt.open(rt.config("other.tessera")).unwrap();
    assert_ne!(before.id(), after.id());
    assert_eq!(before.objects("Person").unwrap().len(), 0);
}

#[test]
fn anonymous_in_memory_files_are_private() {
    let rt = TestRuntime::new();
    let a = rt
        .open(HandleConfig::anonymous_in_memory().schema(person_schema()))
        .unwrap();
    let b = rt
        .open(HandleConfig::anonymous_in_memory().schema(person_schema()))
        .unwrap();
    assert_ne!(a.path(), b.path());
    assert!(a.settings().in_memory);

    a.run_in_transaction(|h| h.put("Person", "p1", &[("age", Value::from(3i64))]))
        .unwrap();
    assert!(b.objects("Person").unwrap().is_empty());
}

#[test]
fn engine_errors_keep_their_category() {
    let rt = TestRuntime::with_guard(EncryptionGuard::new(false, || false));
    let path = rt.path("denied.tessera");
    let resolved = tessera_core::PathKey::resolve(&path).unwrap();
    rt.engine.deny_access(resolved.as_path());

    let err = rt.open(HandleConfig::new(&path)).unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied { .. }));
    assert_eq!(err.category(), tessera_core::ErrorCategory::File);

    let missing = rt
        .open(HandleConfig::new(rt.path("missing.tessera")).read_only(true))
        .unwrap_err();
    assert!(matches!(missing, CoreError::AccessError { .. }));
}

#[test]
fn cold_opens_do_not_wait_for_an_unrelated_writer() {
    let rt = TestRuntime::new();
    drop(rt.open(rt.config("held.tessera")).unwrap());

    let (ready_tx, ready_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let runtime = rt.runtime.clone();
    let held = rt.path("held.tessera");
    let writer = thread::spawn(move || {
        let handle = runtime
            .open(HandleConfig::new(&held).dynamic_schema(true))
            .unwrap();
        handle.begin_write().unwrap();
        ready_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        handle.cancel_write().unwrap();
    });
    ready_rx.recv().unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let runtime = rt.runtime.clone();
    let same_path = rt.config("held.tessera");
    let other_path = rt.config("unrelated.tessera");
    let opener = thread::spawn(move || {
        let same = runtime.open(same_path).map(|h| h.schema_version());
        let other = runtime.open(other_path).map(|h| h.schema_version());
        done_tx.send((same, other)).unwrap();
    });

    let opened = done_rx.recv_timeout(Duration::from_secs(5));
    release_tx.send(()).unwrap();
    writer.join().unwrap();
    let (same, other) = opened.expect("opens stalled behind the held writer");
    opener.join().unwrap();
    assert_eq!(same.unwrap(), 1);
    assert_eq!(other.unwrap(), 1);
}
