//! Store Comprehensive Tests
//!
//! End-to-end tests of the hypergraph store through its public API.
//!
//! ## Modules
//!
//! - `memory_store`: visibility, round trips, nesting, pruning
//! - `locks`: lock kinds, run-once exclusive waits, lock table hygiene
//! - `sessions`: lifecycle, modes, results, events
//! - `constraints`: implicit, explicit and session constraints
//! - `graph`: entities, relationships, properties, paths
//! - `concurrency`: deadlocks, serializable conflicts, parallel writers

#![allow(dead_code)]

mod concurrency;
mod constraints;
mod locks;
mod sessions;

use hyperstore::prelude::*;
use std::time::Duration;

pub const DOMAIN: &str = "lib";

/// Identity in the test domain
pub fn id(key: &str) -> Identity {
    Identity::new(DOMAIN, key)
}

pub fn library() -> Identity {
    id("Library")
}

pub fn book() -> Identity {
    id("Book")
}

pub fn novel() -> Identity {
    id("Novel")
}

pub fn has_books() -> Identity {
    id("LibraryHasBooks")
}

/// Library schema
///
/// - `Library { Name = "", Value = 0 }`
/// - `Book { Value = 0 }`, `Novel: Book`
/// - `LibraryHasBooks: Library -> Book`
pub fn schema() -> Schema {
    let schema = Schema::with_primitives();
    schema
        .register(
            SchemaElement::entity(library())
                .property("Name", "")
                .property("Value", 0),
        )
        .unwrap();
    schema
        .register(SchemaElement::entity(book()).property("Value", 0))
        .unwrap();
    schema
        .register(SchemaElement::entity(novel()).extends(book()))
        .unwrap();
    schema
        .register(SchemaElement::relationship(has_books()))
        .unwrap();
    schema
}

/// Store over the library schema with a short deadlock timeout
pub fn store() -> Store {
    Store::builder()
        .schema(schema())
        .setting(Setting::MaxTimeBeforeDeadlockInMs, 2_000)
        .setting(Setting::LockPollIntervalInMs, 5)
        .build()
        .expect("store")
}

/// Create a library with `Value` set, in the current or an implicit session
pub fn library_with_value(store: &Store, key: &str, value: i64) -> Identity {
    let lib = store.create_entity(&library(), Some(id(key))).unwrap();
    store.set_property_value(&lib, "Value", value, None).unwrap();
    lib
}

/// `Value` of an element as seen by the calling thread
pub fn value_of(store: &Store, element: &Identity) -> Option<i64> {
    store
        .get_property_value(element, "Value")
        .and_then(|pv| pv.value.as_int())
}

pub fn short_pause() {
    std::thread::sleep(Duration::from_millis(100));
}
