//! Concurrency Tests
//!
//! Deadlock detection, serializable conflicts and parallel writers.

use crate::*;
use hyperstore::prelude::*;
use std::sync::{mpsc, Arc, Barrier};
use std::thread;

/// Run `op` until it succeeds or fails with a non-retryable error
fn with_retry<T>(op: impl Fn() -> Result<T>) -> Result<T> {
    loop {
        match op() {
            Err(e) if e.is_retryable() => continue,
            other => return other,
        }
    }
}

// ============================================================================
// Deadlocks
// ============================================================================

#[test]
fn deadlock_cycle_aborts_exactly_one_session() {
    let store = store();
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [("left", "right"), ("right", "left")]
        .into_iter()
        .map(|(first, second)| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let session = store.session().unwrap();
                session.acquire_lock(LockKind::Exclusive, first).unwrap();
                barrier.wait();
                match session.acquire_lock(LockKind::Exclusive, second) {
                    Ok(_) => session.accept_changes().map(|_| ()),
                    Err(e) => Err(e),
                }
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let deadlocks = outcomes
        .iter()
        .filter(|r| matches!(r, Err(Error::DeadLock { .. })))
        .count();
    assert_eq!(deadlocks, 1);
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(store.locks().is_empty());
}

#[test]
fn lock_wait_times_out_as_deadlock() {
    let store = Store::builder()
        .schema(schema())
        .setting(Setting::MaxTimeBeforeDeadlockInMs, 100)
        .build()
        .unwrap();
    let session = store.session().unwrap();
    session.acquire_lock(LockKind::Exclusive, "slow").unwrap();

    let contender = store.clone();
    let err = thread::spawn(move || {
        let session = contender.session().unwrap();
        session.acquire_lock(LockKind::Shared, "slow").unwrap_err()
    })
    .join()
    .unwrap();
    assert!(matches!(err, Error::DeadLock { .. }));
    session.accept_changes().unwrap();
}

// ============================================================================
// Serializable isolation
// ============================================================================

#[test]
fn serializable_write_after_foreign_commit_conflicts() {
    let store = store();
    let lib = library_with_value(&store, "1", 1);
    let (read_tx, read_rx) = mpsc::channel();
    let (commit_tx, commit_rx) = mpsc::channel();

    let reader_store = store.clone();
    let reader_lib = lib.clone();
    let reader = thread::spawn(move || {
        let session = reader_store
            .begin_session(SessionConfiguration::new().isolation(IsolationLevel::Serializable))
            .unwrap();
        let seen = value_of(&reader_store, &reader_lib);
        read_tx.send(()).unwrap();
        commit_rx.recv().unwrap();
        let err = reader_store
            .set_property_value(&reader_lib, "Value", 100, None)
            .unwrap_err();
        let accepted = session.accept_changes();
        (seen, err, accepted.is_err())
    });

    read_rx.recv().unwrap();
    store.set_property_value(&lib, "Value", 2, None).unwrap();
    commit_tx.send(()).unwrap();

    let (seen, err, aborted) = reader.join().unwrap();
    assert_eq!(seen, Some(1));
    assert!(matches!(err, Error::SerializableTransaction { .. }));
    assert!(aborted);
    assert_eq!(value_of(&store, &lib), Some(2));
    assert!(store.locks().is_empty());
}

#[test]
fn serializable_session_without_foreign_commit_succeeds() {
    let store = store();
    let lib = library_with_value(&store, "1", 1);
    let session = store
        .begin_session(SessionConfiguration::new().isolation(IsolationLevel::Serializable))
        .unwrap();
    let current = value_of(&store, &lib).unwrap();
    store.set_property_value(&lib, "Value", current + 1, None).unwrap();
    session.accept_changes().unwrap();
    assert_eq!(value_of(&store, &lib), Some(2));
}

// ============================================================================
// Parallel writers
// ============================================================================

#[test]
fn parallel_increments_are_not_lost() {
    const THREADS: usize = 4;
    const ROUNDS: i64 = 25;

    let store = store();
    let counter = library_with_value(&store, "counter", 0);
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = store.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    with_retry(|| {
                        let session = store.session()?;
                        session.acquire_lock(LockKind::Exclusive, &counter)?;
                        let current = value_of(&store, &counter).unwrap_or(0);
                        store.set_property_value(&counter, "Value", current + 1, None)?;
                        session.accept_changes().map(|_| ())
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(value_of(&store, &counter), Some(THREADS as i64 * ROUNDS));
    assert!(store.locks().is_empty());
}

#[test]
fn parallel_creates_all_commit() {
    let store = store();
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                let session = store.session().unwrap();
                for i in 0..10 {
                    store
                        .create_entity(&book(), Some(id(&format!("b-{t}-{i}"))))
                        .unwrap();
                }
                session.accept_changes().unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(store.get_entities(&book()).len(), 80);
    assert!(store.locks().is_empty());
}

#[test]
fn stores_do_not_share_sessions() {
    let first = store();
    let second = store();
    let session = first.session().unwrap();
    first.create_entity(&library(), Some(id("1"))).unwrap();
    assert!(!second.in_session());
    second.create_entity(&library(), Some(id("1"))).unwrap();
    drop(session);
    assert!(first.get_element(&id("1")).is_none());
    assert!(second.get_element(&id("1")).is_some());
}
