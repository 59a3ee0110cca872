//! Session Tests
//!
//! Lifecycle, modes, results and domain events.

use crate::*;
use hyperstore::prelude::*;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

fn recorder(store: &Store) -> Arc<Mutex<Vec<DomainEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store.events().subscribe(move |event| sink.lock().push(event.clone()));
    seen
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn session_ids_are_monotonic() {
    let store = store();
    let first = store.session().unwrap();
    let a = first.id();
    first.accept_changes().unwrap();
    let second = store.session().unwrap();
    assert!(second.id() > a);
}

#[test]
fn current_session_tracks_scope() {
    let store = store();
    assert_eq!(store.current_session_id(), None);
    let session = store.session().unwrap();
    assert_eq!(store.current_session_id(), Some(session.id()));
    drop(session);
    assert_eq!(store.current_session_id(), None);
}

#[test]
fn default_isolation_from_config() {
    let config = StoreConfig {
        default_isolation: IsolationLevel::Serializable,
        ..StoreConfig::default()
    };
    let store = Store::builder()
        .schema(schema())
        .config(config)
        .build()
        .unwrap();
    let session = store.session().unwrap();
    assert_eq!(session.isolation(), IsolationLevel::Serializable);
    let nested = store
        .begin_session(SessionConfiguration::new().isolation(IsolationLevel::ReadCommitted))
        .unwrap();
    assert_eq!(nested.isolation(), IsolationLevel::Serializable);
}

#[test]
fn panic_inside_session_rolls_back() {
    let store = store();
    let worker = store.clone();
    let result = std::thread::spawn(move || {
        let _session = worker.session().unwrap();
        worker.create_entity(&library(), Some(id("1"))).unwrap();
        panic!("boom");
    })
    .join();
    assert!(result.is_err());
    assert!(store.get_element(&id("1")).is_none());
    assert!(store.locks().is_empty());
}

// ============================================================================
// Results
// ============================================================================

#[test]
fn result_reports_tracked_elements() {
    let store = store();
    let existing = library_with_value(&store, "old", 1);

    let session = store.session().unwrap();
    let lib = store.create_entity(&library(), Some(id("new"))).unwrap();
    store.set_property_value(&lib, "Value", 3, None).unwrap();
    store.set_property_value(&existing, "Value", 2, None).unwrap();
    let temp = store.create_entity(&book(), None).unwrap();
    store.remove_entity(&temp, true).unwrap();
    let result = session.accept_changes().unwrap();

    assert!(result.commit_seq.is_some());
    assert!(!result.nested);
    assert!(!result.has_errors());
    let states: Vec<_> = result.tracked.iter().map(|t| (t.id.clone(), t.state)).collect();
    assert_eq!(
        states,
        vec![(lib, TrackingState::Added), (existing, TrackingState::Updated)]
    );
}

#[test]
fn nested_result_is_not_committed() {
    let store = store();
    let outer = store.session().unwrap();
    let inner = store.session().unwrap();
    store.create_entity(&library(), None).unwrap();
    let result = inner.accept_changes().unwrap();
    assert!(result.nested);
    assert_eq!(result.commit_seq, None);
    assert_eq!(result.tracked.len(), 1);
    assert_eq!(outer.tracking().len(), 1);
    outer.accept_changes().unwrap();
}

#[test]
fn empty_session_commits_nothing() {
    let store = store();
    let before = store.memory().visible_seq();
    let result = store.session().unwrap().accept_changes().unwrap();
    assert_eq!(result.commit_seq, None);
    assert_eq!(store.memory().visible_seq(), before);
}

// ============================================================================
// Events
// ============================================================================

#[test]
fn events_dispatched_after_commit_in_order() {
    let store = store();
    let seen = recorder(&store);

    let session = store.session().unwrap();
    let lib = store.create_entity(&library(), Some(id("l"))).unwrap();
    let b = store.create_entity(&book(), Some(id("b"))).unwrap();
    store.create_relationship(&has_books(), &lib, &b, Some(id("r"))).unwrap();
    store.set_property_value(&lib, "Name", "Central", None).unwrap();
    assert!(seen.lock().is_empty());
    let result = session.accept_changes().unwrap();

    let events = seen.lock().clone();
    assert_eq!(events, result.events);
    assert_eq!(events.len(), 4);
    assert!(matches!(events[0].kind, EventKind::AddEntity { .. }));
    assert!(matches!(events[2].kind, EventKind::AddRelationship { .. }));
    match &events[3].kind {
        EventKind::ChangePropertyValue { property, old_value, value, .. } => {
            assert_eq!(property, "Name");
            assert_eq!(old_value, &None);
            assert_eq!(value, &Value::from("Central"));
        }
        other => panic!("unexpected {other:?}"),
    }
    let correlation = events[0].correlation_id;
    assert!(events.iter().all(|e| e.correlation_id == correlation));
    assert!(events.iter().all(|e| Some(e.version) == result.commit_seq));
}

#[test]
fn rolled_back_session_dispatches_nothing() {
    let store = store();
    let seen = recorder(&store);
    {
        let _session = store.session().unwrap();
        store.create_entity(&library(), None).unwrap();
    }
    assert!(seen.lock().is_empty());
}

#[test]
fn abandoned_nested_session_drops_its_events() {
    let store = store();
    let seen = recorder(&store);
    let outer = store.session().unwrap();
    store.create_entity(&library(), Some(id("kept"))).unwrap();
    {
        let _inner = store.session().unwrap();
        store.create_entity(&library(), Some(id("dropped"))).unwrap();
    }
    outer.accept_changes().unwrap();
    let events = seen.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind.element_id(), &id("kept"));
}

#[test]
fn loading_mode_records_no_events() {
    let store = store();
    let seen = recorder(&store);
    let session = store
        .begin_session(SessionConfiguration::new().mode(SessionMode::LOADING))
        .unwrap();
    store.create_entity(&library(), None).unwrap();
    let result = session.accept_changes().unwrap();
    assert!(result.events.is_empty());
    assert!(seen.lock().is_empty());
    assert_eq!(store.get_entities(&library()).len(), 1);
}

#[test]
fn unsubscribe_stops_delivery() {
    let store = store();
    let seen = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&seen);
    let sub = store.events().subscribe(move |_| *sink.lock() += 1);
    store.create_entity(&library(), None).unwrap();
    assert!(store.events().unsubscribe(sub));
    store.create_entity(&library(), None).unwrap();
    assert_eq!(*seen.lock(), 1);
}

#[test]
fn subscriber_may_use_the_store() {
    let store = store();
    let observed = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&observed);
    let reader = store.clone();
    store.events().subscribe(move |event| {
        *sink.lock() = Some(reader.get_element(event.kind.element_id()).is_some());
    });
    store.create_entity(&library(), None).unwrap();
    assert_eq!(*observed.lock(), Some(true));
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn cancelled_session_refuses_writes() {
    let store = store();
    let token = CancellationToken::new();
    let session = store
        .begin_session(SessionConfiguration::new().cancellation(token.clone()))
        .unwrap();
    token.cancel();
    let err = store.create_entity(&library(), None).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(session.accept_changes().is_err());
    assert!(store.locks().is_empty());
}

// ============================================================================
// Unwinding
// ============================================================================

#[test]
fn panicking_constraint_detaches_the_session() {
    let store = store();
    let lib = library_with_value(&store, "1", 1);
    store
        .constraints()
        .register(
            &library(),
            ClosureConstraint::implicit("explodes", |_| panic!("constraint exploded")),
        )
        .unwrap();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let session = store.session().unwrap();
        store.set_property_value(&lib, "Value", 2, None).unwrap();
        session.accept_changes()
    }));

    assert!(outcome.is_err());
    assert!(!store.in_session());
    assert!(store.locks().is_empty());
    assert_eq!(store.memory().live_transactions(), 0);
    assert_eq!(value_of(&store, &lib), Some(1));

    // The thread can start over
    let session = store.session().unwrap();
    assert_eq!(session.depth(), 1);
    session.rollback().unwrap();
}

#[test]
fn panicking_read_in_session_rolls_it_back() {
    let store = store();
    let lib = library_with_value(&store, "1", 1);

    let session = store.session().unwrap();
    store.set_property_value(&lib, "Value", 2, None).unwrap();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        store.read(|_, _| -> () { panic!("reader exploded") })
    }));

    assert!(outcome.is_err());
    assert!(!store.in_session());
    assert!(store.locks().is_empty());
    assert!(matches!(session.accept_changes(), Err(Error::SessionCompleted)));
    assert_eq!(value_of(&store, &lib), Some(1));
    assert_eq!(store.memory().live_transactions(), 0);
}

#[test]
fn panicking_read_outside_session_leaves_no_transaction() {
    let store = store();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        store.read(|_, _| -> () { panic!("reader exploded") })
    }));
    assert!(outcome.is_err());
    assert_eq!(store.memory().live_transactions(), 0);
    assert!(store.session().is_ok());
}
