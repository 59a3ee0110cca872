//! Session engine for the hypergraph store
//!
//! This crate ties the lower layers together:
//! - [`Store`]: handle over schema, memory store, locks, constraints, events
//! - [`Session`]: nested units of work with isolation, tracking and commit
//! - [`constraint`]: validation run when a top-level session accepts
//! - [`events`]: domain events dispatched after each commit
//! - graph operations (entities, relationships, properties, paths)
//!
//! # Example
//!
//! ```ignore
//! let store = Store::builder().schema(schema).build()?;
//! let session = store.session()?;
//! let lib = store.create_entity(&library, None)?;
//! store.set_property_value(&lib, "Name", "Central", None)?;
//! session.accept_changes()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constraint;
pub mod events;
mod graph;
pub mod session;
mod store;
pub mod traversal;

pub use config::{Setting, Settings, StoreConfig};
pub use constraint::{
    property_constraint, ClosureConstraint, Constraint, ConstraintContext, ConstraintKind,
    ConstraintRegistry, ValidationReport,
};
pub use events::{DomainEvent, EventDispatcher, EventKind, SubscriptionId};
pub use graph::PropertyValue;
pub use session::{
    Session, SessionConfiguration, SessionMode, SessionResult, TrackedElement, TrackingData,
    TrackingState,
};
pub use store::{Store, StoreBuilder};
pub use traversal::{GraphPath, PathOptions, PathStep, DEFAULT_MAX_DEPTH};
