//! Constraint Tests
//!
//! Commit-time validation, silencing, inheritance and on-demand checks.

use crate::*;
use hyperstore::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn positive_value() -> impl Constraint {
    property_constraint(
        ConstraintKind::Implicit,
        "Value",
        "Value must be positive",
        |v| v.as_int().map_or(false, |i| i > 0),
    )
}

// ============================================================================
// Commit-time validation
// ============================================================================

#[test]
fn violations_abort_with_every_message() {
    let store = store();
    store.constraints().register(&library(), positive_value()).unwrap();

    let session = store.session().unwrap();
    for i in 0..3 {
        let lib = store.create_entity(&library(), Some(id(&format!("bad{i}")))).unwrap();
        store.set_property_value(&lib, "Value", -i, None).unwrap();
    }
    let ok = store.create_entity(&library(), Some(id("good"))).unwrap();
    store.set_property_value(&ok, "Value", 5, None).unwrap();
    let err = session.accept_changes().unwrap_err();

    let messages = err.messages();
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|m| m.is_error()));
    assert!(messages.iter().all(|m| m.property_name.as_deref() == Some("Value")));
    assert!(store.get_entities(&library()).is_empty());
    assert!(store.locks().is_empty());
}

#[test]
fn unset_property_is_checked_against_default() {
    let store = store();
    store.constraints().register(&library(), positive_value()).unwrap();
    let err = store.create_entity(&library(), None).unwrap_err();
    assert_eq!(err.messages().len(), 1);
}

#[test]
fn silenced_errors_let_the_commit_through() {
    let store = store();
    store.constraints().register(&library(), positive_value()).unwrap();
    store.events().on_errors(|_, messages| {
        for m in messages.iter_mut() {
            m.silent = true;
        }
    });

    let session = store.session().unwrap();
    store.create_entity(&library(), Some(id("1"))).unwrap();
    let result = session.accept_changes().unwrap();
    assert!(result.commit_seq.is_some());
    assert!(result.has_errors());
    assert!(store.get_element(&id("1")).is_some());
}

#[test]
fn warnings_do_not_block() {
    let store = store();
    store
        .constraints()
        .register(
            &library(),
            ClosureConstraint::implicit("name advisory", |ctx| {
                if ctx.property("Name") == Value::from("") {
                    ctx.warning_on("Name", "library has no name");
                }
            }),
        )
        .unwrap();

    let session = store.session().unwrap();
    store.create_entity(&library(), Some(id("1"))).unwrap();
    let result = session.accept_changes().unwrap();
    assert!(result.has_warnings());
    assert!(!result.has_errors());
    assert!(store.get_element(&id("1")).is_some());
}

#[test]
fn removed_elements_are_not_validated() {
    let store = store();
    let lib = library_with_value(&store, "1", 3);
    store.constraints().register(&library(), positive_value()).unwrap();
    store.remove_entity(&lib, true).unwrap();
    assert!(store.get_element(&lib).is_none());
}

#[test]
fn skip_constraints_mode_bypasses_validation() {
    let store = store();
    store.constraints().register(&library(), positive_value()).unwrap();
    let session = store
        .begin_session(SessionConfiguration::new().mode(SessionMode::SKIP_CONSTRAINTS))
        .unwrap();
    store.create_entity(&library(), Some(id("raw"))).unwrap();
    session.accept_changes().unwrap();
    assert!(store.get_element(&id("raw")).is_some());
}

// ============================================================================
// Inheritance and kinds
// ============================================================================

#[test]
fn constraint_applies_to_derived_schemas() {
    let store = store();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    store
        .constraints()
        .register(
            &book(),
            ClosureConstraint::implicit("count books", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    let session = store.session().unwrap();
    store.create_entity(&book(), None).unwrap();
    store.create_entity(&novel(), None).unwrap();
    store.create_entity(&library(), None).unwrap();
    session.accept_changes().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn explicit_constraints_run_only_on_demand() {
    let store = store();
    store
        .constraints()
        .register(
            &library(),
            property_constraint(ConstraintKind::Explicit, "Value", "audit failed", |v| {
                v.as_int() != Some(0)
            }),
        )
        .unwrap();

    let lib = store.create_entity(&library(), Some(id("1"))).unwrap();
    let report = store.constraints().validate(&store, &[lib.clone()]).unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.messages[0].element_id, Some(lib.clone()));

    store.set_property_value(&lib, "Value", 1, None).unwrap();
    let report = store.constraints().validate(&store, &[lib]).unwrap();
    assert!(report.is_valid());
}

#[test]
fn on_demand_validation_sees_pending_changes() {
    let store = store();
    store.constraints().register(&library(), positive_value()).unwrap();
    let session = store.session().unwrap();
    let lib = store.create_entity(&library(), Some(id("1"))).unwrap();
    let report = store.constraints().validate(&store, &[lib.clone()]).unwrap();
    assert!(report.has_errors());
    store.set_property_value(&lib, "Value", 2, None).unwrap();
    let report = store.constraints().validate(&store, &[lib]).unwrap();
    assert!(report.is_valid());
    session.accept_changes().unwrap();
}

// ============================================================================
// Session constraints
// ============================================================================

#[test]
fn session_constraint_only_binds_its_session() {
    let store = store();
    let session = store.session().unwrap();
    session.add_constraint(&library(), positive_value()).unwrap();
    store.create_entity(&library(), None).unwrap();
    assert!(matches!(session.accept_changes(), Err(Error::Session { .. })));

    store.create_entity(&library(), Some(id("later"))).unwrap();
    assert!(store.get_element(&id("later")).is_some());
}

#[test]
fn nested_session_constraint_survives_merge() {
    let store = store();
    let outer = store.session().unwrap();
    {
        let inner = store.session().unwrap();
        inner.add_constraint(&library(), positive_value()).unwrap();
        inner.accept_changes().unwrap();
    }
    store.create_entity(&library(), None).unwrap();
    assert!(outer.accept_changes().is_err());
}

// ============================================================================
// Constraints are read-only
// ============================================================================

#[test]
fn constraint_reads_other_elements() {
    let store = store();
    store
        .constraints()
        .register(
            &has_books(),
            ClosureConstraint::implicit("end exists", |ctx| {
                let end = ctx.element().end_id().cloned();
                if let Some(end) = end {
                    if ctx.get(&end).is_none() {
                        ctx.error("dangling relationship");
                    }
                }
            }),
        )
        .unwrap();

    let session = store.session().unwrap();
    let lib = store.create_entity(&library(), None).unwrap();
    let b = store.create_entity(&book(), None).unwrap();
    store.create_relationship(&has_books(), &lib, &b, None).unwrap();
    let result = session.accept_changes().unwrap();
    assert!(result.messages.is_empty());
}

#[test]
fn constraint_writes_are_forbidden() {
    let store = store();
    let writer = store.clone();
    store
        .constraints()
        .register(
            &library(),
            ClosureConstraint::implicit("sneaky", move |_| {
                let _ = writer.create_entity(&book(), None);
            }),
        )
        .unwrap();

    let err = store.create_entity(&library(), None).unwrap_err();
    assert!(err
        .messages()
        .iter()
        .any(|m| m.message.contains("cannot modify")));
    assert!(store.get_entities(&book()).is_empty());
    assert!(store.get_entities(&library()).is_empty());
}
