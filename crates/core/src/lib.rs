//! Core types for the hyperstore workspace
//!
//! This crate defines the data model shared by every other crate:
//! - [`Identity`]: two-part key addressing a versioned resource
//! - [`GraphNode`]: versioned entity, relationship or property record
//! - [`Value`]: property payloads
//! - [`Schema`]: minimal schema resolver (supertypes and defaults)
//! - [`Error`] / [`Result`]: unified error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diagnostic;
pub mod error;
pub mod identity;
pub mod node;
pub mod schema;
pub mod types;
pub mod value;

pub use diagnostic::{DiagnosticMessage, MessageKind};
pub use error::{Error, Result};
pub use identity::{IdGenerator, Identity, SequentialIdGenerator, UuidIdGenerator};
pub use node::{Direction, EdgeInfo, Endpoints, GraphNode, NodeKind};
pub use schema::{Schema, SchemaElement, SchemaKind, SchemaProperty, PRIMITIVES_DOMAIN};
pub use types::{CancellationToken, IsolationLevel, SessionId, SessionIdAllocator};
pub use value::Value;
