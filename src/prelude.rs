//! Convenient imports for Hyperstore.
//!
//! ```ignore
//! use hyperstore::prelude::*;
//! ```

// Entry points
pub use hyperstore_engine::{Store, StoreBuilder, StoreConfig, Setting};

// Sessions
pub use hyperstore_engine::{
    Session, SessionConfiguration, SessionMode, SessionResult, TrackingState,
};

// Error handling
pub use hyperstore_core::{DiagnosticMessage, Error, MessageKind, Result};

// Model
pub use hyperstore_core::{
    CancellationToken, Direction, GraphNode, Identity, IsolationLevel, NodeKind, Schema,
    SchemaElement, Value,
};

// Constraints and events
pub use hyperstore_engine::{
    property_constraint, ClosureConstraint, Constraint, ConstraintContext, ConstraintKind,
    DomainEvent, EventKind,
};

// Locks
pub use hyperstore_concurrency::{LockGrant, LockKind};

// Traversal
pub use hyperstore_engine::{GraphPath, PathOptions, PropertyValue};
