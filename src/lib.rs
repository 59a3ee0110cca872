//! # Hyperstore
//!
//! In-process transactional hypergraph store.
//!
//! Typed entities and relationships live in a versioned in-memory store and
//! are changed through sessions that provide atomic commit, rollback,
//! isolation and constraint validation.
//!
//! ## Quick Start
//!
//! ```ignore
//! use hyperstore::prelude::*;
//!
//! let schema = Schema::with_primitives();
//! schema.register(SchemaElement::entity(Identity::new("lib", "Book")).property("Copies", 1))?;
//! let store = Store::new(schema);
//!
//! let session = store.session()?;
//! let book = store.create_entity(&Identity::new("lib", "Book"), None)?;
//! store.set_property_value(&book, "Copies", 3, None)?;
//! session.accept_changes()?;
//! ```
//!
//! ## Layers
//!
//! - [`model`]: identities, values, graph nodes, schema, errors
//! - [`locks`]: lock manager with deadlock detection
//! - [`storage`]: multi-version node store and transactions
//! - [`engine`]: sessions, constraints, events, graph operations

#![warn(missing_docs)]

pub mod logging;
pub mod prelude;

pub use hyperstore_concurrency as locks;
pub use hyperstore_core as model;
pub use hyperstore_engine as engine;
pub use hyperstore_storage as storage;

pub use hyperstore_core::{Error, Result};
pub use hyperstore_engine::{Session, SessionConfiguration, Store, StoreBuilder, StoreConfig};
