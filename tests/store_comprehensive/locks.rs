//! Lock Tests
//!
//! Locks taken through sessions, as callers see them.

use crate::*;
use hyperstore::locks::LockResource;
use hyperstore::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

// ============================================================================
// Lock kinds
// ============================================================================

#[test]
fn shared_locks_coexist_across_sessions() {
    let store = store();
    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let session = store.session().unwrap();
                session.acquire_lock(LockKind::Shared, "catalog").unwrap();
                barrier.wait();
                barrier.wait();
                session.accept_changes().unwrap();
            })
        })
        .collect();

    barrier.wait();
    let holders = store.locks().holders(LockResource::from("catalog"));
    assert_eq!(holders.len(), 2);
    assert!(holders.iter().all(|(_, kind)| *kind == LockKind::Shared));
    barrier.wait();

    for h in handles {
        h.join().unwrap();
    }
    assert!(store.locks().is_empty());
}

#[test]
fn writes_hold_exclusive_locks_until_commit() {
    let store = store();
    let lib = library_with_value(&store, "1", 1);

    let session = store.session().unwrap();
    store.set_property_value(&lib, "Value", 2, None).unwrap();
    let holders = store.locks().holders(&lib);
    assert_eq!(holders, vec![(session.id(), LockKind::Exclusive)]);

    session.accept_changes().unwrap();
    assert!(store.locks().holders(&lib).is_empty());
}

#[test]
fn reads_take_no_locks() {
    let store = store();
    let lib = library_with_value(&store, "1", 1);
    let _session = store.session().unwrap();
    assert!(store.get_element(&lib).is_some());
    assert!(store.locks().is_empty());
}

#[test]
fn readonly_session_refuses_exclusive() {
    let store = store();
    let session = store
        .begin_session(SessionConfiguration::new().readonly())
        .unwrap();
    assert_eq!(
        session.acquire_lock(LockKind::Shared, "catalog").unwrap(),
        LockGrant::Acquired
    );
    let err = session.acquire_lock(LockKind::Exclusive, "catalog").unwrap_err();
    assert!(matches!(err, Error::ReadOnlySession));
    drop(session);
    assert!(store.locks().is_empty());
}

#[test]
fn relock_in_same_session_is_granted() {
    let store = store();
    let session = store.session().unwrap();
    session.acquire_lock(LockKind::Shared, "r").unwrap();
    session.acquire_lock(LockKind::Exclusive, "r").unwrap();
    session.acquire_lock(LockKind::Shared, "r").unwrap();
    assert_eq!(
        store.locks().holders(LockResource::from("r")),
        vec![(session.id(), LockKind::Exclusive)]
    );
}

// ============================================================================
// Run-once exclusive waits
// ============================================================================

/// Wait until `count` sessions are queued on `resource`
fn await_waiters(store: &Store, resource: &str, count: usize) {
    for _ in 0..400 {
        if store.locks().waiter_count(resource) == count {
            return;
        }
        thread::sleep(std::time::Duration::from_millis(5));
    }
    panic!("{count} waiters never queued on {resource}");
}

#[test]
fn exclusive_wait_runs_initializer_once() {
    let store = store();
    let runs = Arc::new(AtomicUsize::new(0));

    let session = store.session().unwrap();
    let grant = session
        .acquire_lock(LockKind::ExclusiveWait, "#init")
        .unwrap();
    assert!(grant.should_run());

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let store = store.clone();
            let runs = Arc::clone(&runs);
            thread::spawn(move || {
                let session = store.session().unwrap();
                let grant = session
                    .acquire_lock(LockKind::ExclusiveWait, "#init")
                    .unwrap();
                if grant.should_run() {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
                session.accept_changes().unwrap();
                grant
            })
        })
        .collect();

    await_waiters(&store, "#init", 3);
    runs.fetch_add(1, Ordering::SeqCst);
    store.create_entity(&library(), Some(id("init"))).unwrap();
    session.accept_changes().unwrap();

    for h in handles {
        assert_eq!(h.join().unwrap(), LockGrant::AlreadyHandled);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(store.get_entities(&library()).len(), 1);
    assert!(store.locks().is_empty());
}

#[test]
fn exclusive_wait_mixed_with_shared_initializes_once() {
    const TASKS: usize = 40;

    let store = store();
    let created = Arc::new(AtomicBool::new(false));
    let runs = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(TASKS));

    let handles: Vec<_> = (0..TASKS)
        .map(|i| {
            let store = store.clone();
            let created = Arc::clone(&created);
            let runs = Arc::clone(&runs);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let session = store
                    .begin_session(
                        SessionConfiguration::new().isolation(IsolationLevel::Serializable),
                    )
                    .unwrap();
                if i % 2 == 0 {
                    session.acquire_lock(LockKind::Shared, "a").unwrap();
                } else if !created.load(Ordering::SeqCst) {
                    let grant = session.acquire_lock(LockKind::ExclusiveWait, "a").unwrap();
                    if grant.should_run() && !created.load(Ordering::SeqCst) {
                        created.store(true, Ordering::SeqCst);
                        runs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(10));
                    }
                }
                session.accept_changes().unwrap();
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(store.locks().is_empty());
}

#[test]
fn exclusive_wait_after_rollback_runs_again() {
    let store = store();
    let barrier = Arc::new(Barrier::new(2));

    let first_store = store.clone();
    let first_barrier = Arc::clone(&barrier);
    let first = thread::spawn(move || {
        let session = first_store.session().unwrap();
        let grant = session
            .acquire_lock(LockKind::ExclusiveWait, "#init")
            .unwrap();
        first_barrier.wait();
        short_pause();
        drop(session);
        grant
    });

    barrier.wait();
    let session = store.session().unwrap();
    let grant = session
        .acquire_lock(LockKind::ExclusiveWait, "#init")
        .unwrap();
    assert_eq!(first.join().unwrap(), LockGrant::Acquired);
    assert_eq!(grant, LockGrant::Acquired);
    session.accept_changes().unwrap();
}

#[test]
fn exclusive_wait_after_commit_is_already_handled() {
    let store = store();
    let barrier = Arc::new(Barrier::new(2));

    let first_store = store.clone();
    let first_barrier = Arc::clone(&barrier);
    let first = thread::spawn(move || {
        let session = first_store.session().unwrap();
        session
            .acquire_lock(LockKind::ExclusiveWait, "#init")
            .unwrap();
        first_store.create_entity(&library(), None).unwrap();
        first_barrier.wait();
        short_pause();
        session.accept_changes().unwrap();
    });

    barrier.wait();
    let session = store.session().unwrap();
    let grant = session
        .acquire_lock(LockKind::ExclusiveWait, "#init")
        .unwrap();
    first.join().unwrap();
    assert_eq!(grant, LockGrant::AlreadyHandled);
    session.accept_changes().unwrap();
    assert!(store.locks().is_empty());
}

// ============================================================================
// Serializable sessions
// ============================================================================

fn serializable(store: &Store) -> Session {
    store
        .begin_session(SessionConfiguration::new().isolation(IsolationLevel::Serializable))
        .unwrap()
}

#[test]
fn serializable_exclusive_after_foreign_commit_conflicts() {
    let store = store();
    let barrier = Arc::new(Barrier::new(2));

    // Started before the other session commits
    let late = serializable(&store);

    let first_store = store.clone();
    let first_barrier = Arc::clone(&barrier);
    let first = thread::spawn(move || {
        let session = serializable(&first_store);
        session.acquire_lock(LockKind::Exclusive, "a").unwrap();
        first_barrier.wait();
        short_pause();
        session.accept_changes().unwrap();
    });

    barrier.wait();
    let err = late.acquire_lock(LockKind::Exclusive, "a").unwrap_err();
    first.join().unwrap();
    assert!(matches!(err, Error::SerializableTransaction { .. }));
    assert!(late.accept_changes().is_err());
    assert!(store.locks().is_empty());
}

#[test]
fn serializable_exclusive_on_unread_node_conflicts() {
    let store = store();
    let lib = library_with_value(&store, "1", 1);
    let late = serializable(&store);

    let other = store.clone();
    let target = lib.clone();
    thread::spawn(move || other.set_property_value(&target, "Value", 2, None).unwrap())
        .join()
        .unwrap();

    let err = late.acquire_lock(LockKind::Exclusive, &lib).unwrap_err();
    assert!(matches!(err, Error::SerializableTransaction { .. }));
    drop(late);
    assert!(store.locks().is_empty());
}

#[test]
fn serializable_session_started_after_commit_acquires() {
    let store = store();
    let first = serializable(&store);
    first.acquire_lock(LockKind::Exclusive, "a").unwrap();
    first.accept_changes().unwrap();

    let next = serializable(&store);
    assert_eq!(
        next.acquire_lock(LockKind::Exclusive, "a").unwrap(),
        LockGrant::Acquired
    );
    next.accept_changes().unwrap();
}

#[test]
fn rolled_back_exclusive_does_not_conflict() {
    let store = store();
    let late = serializable(&store);

    let other = store.clone();
    thread::spawn(move || {
        let session = serializable(&other);
        session.acquire_lock(LockKind::Exclusive, "a").unwrap();
        session.rollback().unwrap();
    })
    .join()
    .unwrap();

    late.acquire_lock(LockKind::Exclusive, "a").unwrap();
    late.accept_changes().unwrap();
}

// ============================================================================
// Lock table hygiene
// ============================================================================

#[test]
fn lock_table_empty_after_mixed_batch() {
    let store = store();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                let session = store.session().unwrap();
                let lib = id(&format!("batch-{}", i % 3));
                session.acquire_lock(LockKind::Shared, "catalog").unwrap();
                if store.get_element(&lib).is_none() {
                    let _ = store.create_entity(&library(), Some(lib));
                }
                if i % 2 == 0 {
                    let _ = session.accept_changes();
                } else {
                    drop(session);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(store.locks().is_empty());
}
