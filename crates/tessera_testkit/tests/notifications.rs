//! Local listeners and notifications from other sessions on the same file.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tessera_core::{Notification, Value};
use tessera_testkit::prelude::*;

fn add_person(handle: &tessera_core::Handle, key: &str) {
    handle
        .run_in_transaction(|h| h.put("Person", key, &[("name", Value::from(key))]))
        .unwrap();
}

#[test]
fn one_did_change_per_commit() {
    let rt = TestRuntime::new();
    let handle = rt.open(rt.config("commits.tessera")).unwrap();
    let log = ListenerLog::new();
    let token = log.attach(&handle);

    add_person(&handle, "a");
    add_person(&handle, "b");
    add_person(&handle, "c");
    assert_eq!(log.count(Notification::DidChange), 3);
    assert_eq!(log.count(Notification::RefreshRequired), 0);

    assert!(handle.remove_listener(token).unwrap());
    add_person(&handle, "d");
    assert_eq!(log.events().len(), 3);
}

#[test]
fn cancelled_and_failed_transactions_are_silent() {
    let rt = TestRuntime::new();
    let handle = rt.open(rt.config("silent.tessera")).unwrap();
    let log = ListenerLog::new();
    let token = log.attach(&handle);

    handle.begin_write().unwrap();
    handle.cancel_write().unwrap();
    let failed: tessera_core::CoreResult<()> = handle.run_in_transaction(|h| {
        h.put("Person", "x", &[("name", Value::from("x"))])?;
        Err(tessera_core::CoreError::transaction("abort"))
    });
    assert!(failed.is_err());
    assert!(log.events().is_empty());
    handle.remove_listener(token).unwrap();
}

#[test]
fn listeners_see_committed_data() {
    let rt = TestRuntime::new();
    let handle = rt.open(rt.config("see-data.tessera")).unwrap();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let token = handle.add_listener(move |_, h| {
        sink.lock().push(h.objects("Person").unwrap().len());
    });

    add_person(&handle, "a");
    add_person(&handle, "b");
    assert_eq!(*seen.lock(), vec![1, 2]);
    handle.remove_listener(token).unwrap();
}

#[test]
fn token_from_another_handle_is_refused() {
    let rt = TestRuntime::new();
    let a = rt.open(rt.config("tokens-a.tessera")).unwrap();
    let b = rt.open(rt.config("tokens-b.tessera")).unwrap();
    let token = a.add_listener(|_, _| {});

    let logs = capture_logs(|| {
        let refused = b.remove_listener(token).unwrap_err();
        assert!(refused.is_registered());
        assert_eq!(a.listener_count(), 1);
        assert!(a.remove_listener(refused).unwrap());
    });
    assert!(!logs.contains("WARN"));
    assert_eq!(a.listener_count(), 0);
}

#[test]
fn dropping_a_registered_token_warns_and_unregisters() {
    let rt = TestRuntime::new();
    let handle = rt.open(rt.config("token-drop.tessera")).unwrap();

    let logs = capture_logs(|| {
        let token = handle.add_listener(|_, _| {});
        assert!(token.is_registered());
        drop(token);
    });

    assert!(logs.contains("notification token dropped while its listener was registered"));
    assert_eq!(handle.listener_count(), 0);

    let released = handle.add_listener(|_, _| {});
    let quiet = capture_logs(|| {
        handle.remove_listener(released).unwrap();
    });
    assert!(!quiet.contains("WARN"));
}

#[test]
fn read_write_peer_auto_refreshes() {
    let rt = TestRuntime::new();
    let writer = rt.open(rt.config("peer-rw.tessera")).unwrap();
    let peer = rt.peer();
    let reader = peer.open(rt.config("peer-rw.tessera")).unwrap();
    let log = ListenerLog::new();
    let token = log.attach(&reader);

    assert!(!reader.process_notifications());
    add_person(&writer, "a");

    assert!(reader.process_notifications());
    assert_eq!(log.events(), vec![Notification::DidChange]);
    assert_eq!(reader.objects("Person").unwrap().len(), 1);
    assert!(!reader.process_notifications());
    reader.remove_listener(token).unwrap();
}

#[test]
fn read_only_peer_is_told_to_refresh() {
    let rt = TestRuntime::new();
    let writer = rt.open(rt.config("peer-ro.tessera")).unwrap();
    let peer = rt.peer();
    let reader = peer
        .open(rt.config("peer-ro.tessera").read_only(true))
        .unwrap();
    let log = ListenerLog::new();
    let token = log.attach(&reader);

    add_person(&writer, "a");
    assert!(reader.process_notifications());
    assert_eq!(log.events(), vec![Notification::RefreshRequired]);
    assert!(reader.objects("Person").unwrap().is_empty());

    assert!(reader.refresh());
    assert_eq!(
        log.events(),
        vec![Notification::RefreshRequired, Notification::DidChange]
    );
    assert_eq!(reader.objects("Person").unwrap().len(), 1);
    assert!(!reader.refresh());
    reader.remove_listener(token).unwrap();
}

#[test]
fn read_only_peer_is_told_once_per_commit() {
    let rt = TestRuntime::new();
    let writer = rt.open(rt.config("peer-ro-once.tessera")).unwrap();
    let peer = rt.peer();
    let reader = peer
        .open(rt.config("peer-ro-once.tessera").read_only(true))
        .unwrap();
    let log = ListenerLog::new();
    let token = log.attach(&reader);

    add_person(&writer, "a");
    assert!(reader.wait_for_change(Duration::from_millis(10)));
    assert!(!reader.wait_for_change(Duration::from_millis(10)));
    assert!(!reader.process_notifications());
    assert_eq!(log.events(), vec![Notification::RefreshRequired]);

    add_person(&writer, "b");
    assert!(reader.wait_for_change(Duration::from_millis(10)));
    assert_eq!(log.count(Notification::RefreshRequired), 2);

    assert!(reader.refresh());
    assert_eq!(reader.objects("Person").unwrap().len(), 2);
    assert!(!reader.wait_for_change(Duration::from_millis(10)));
    reader.remove_listener(token).unwrap();
}

#[test]
fn peer_in_a_transaction_defers_delivery() {
    let rt = TestRuntime::new();
    let writer = rt.open(rt.config("peer-busy.tessera")).unwrap();
    let peer = rt.peer();
    let busy = peer.open(rt.config("peer-busy.tessera")).unwrap();
    let log = ListenerLog::new();
    let token = log.attach(&busy);

    add_person(&writer, "a");
    busy.begin_write().unwrap();
    assert!(!busy.process_notifications());
    busy.cancel_write().unwrap();

    assert!(busy.wait_for_change(Duration::from_millis(10)));
    assert_eq!(log.events(), vec![Notification::DidChange]);
    busy.remove_listener(token).unwrap();
}

#[test]
fn wait_for_change_wakes_on_commit_from_another_thread() {
    init_tracing();
    let rt = TestRuntime::new();
    let handle = rt.open(rt.config("wait.tessera")).unwrap();
    let log = ListenerLog::new();
    let token = log.attach(&handle);

    let runtime = rt.runtime.clone();
    let config = rt.config("wait.tessera");
    let committer = thread::spawn(move || {
        let handle = runtime.open(config).unwrap();
        thread::sleep(Duration::from_millis(20));
        add_person(&handle, "remote");
    });

    assert!(handle.wait_for_change(Duration::from_secs(10)));
    committer.join().unwrap();
    assert_eq!(log.count(Notification::DidChange), 1);
    assert!(handle.get("Person", "remote").unwrap().is_some());
    handle.remove_listener(token).unwrap();
}

#[test]
fn wait_for_change_times_out_quietly() {
    let rt = TestRuntime::new();
    let handle = rt.open(rt.config("timeout.tessera")).unwrap();
    assert!(!handle.wait_for_change(Duration::from_millis(10)));
}
