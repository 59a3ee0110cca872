//! Constraint validation
//!
//! A [`Constraint`] inspects one element and reports diagnostics through a
//! [`ConstraintContext`]. Constraints are bound to a schema in the
//! [`ConstraintRegistry`] and apply to every schema derived from it.
//!
//! - Implicit constraints run on every element added or updated by a
//!   session, when its top-level session accepts.
//! - Explicit constraints only run on demand through
//!   [`ConstraintRegistry::validate`].
//! - Session constraints (`Session::add_constraint`) run when that session's
//!   changes are committed.
//!
//! The context gives read access to the session's view of the model.
//! Writing to the store from a constraint fails with
//! `ConstraintWriteForbidden` and is reported as an error message.

mod pipeline;
mod registry;

pub(crate) use pipeline::{check_element, validate_commit};
pub use registry::ConstraintRegistry;

use hyperstore_core::{DiagnosticMessage, GraphNode, Identity, MessageKind, Schema, Value};
use hyperstore_storage::{MemoryStore, Transaction};
use std::sync::Arc;

/// When a constraint runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// At every commit touching a matching element
    Implicit,
    /// Only when validation is requested
    Explicit,
}

/// Validator bound to a schema
pub trait Constraint: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// When the constraint runs
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Implicit
    }

    /// Inspect `ctx.element()` and report through `ctx`
    fn check(&self, ctx: &mut ConstraintContext<'_>);
}

/// Constraint backed by a closure
pub struct ClosureConstraint<F> {
    name: String,
    kind: ConstraintKind,
    check: F,
}

impl<F> ClosureConstraint<F>
where
    F: Fn(&mut ConstraintContext<'_>) + Send + Sync,
{
    /// Constraint run at every commit
    pub fn implicit(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Implicit,
            check,
        }
    }

    /// Constraint run on demand
    pub fn explicit(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Explicit,
            check,
        }
    }
}

impl<F> Constraint for ClosureConstraint<F>
where
    F: Fn(&mut ConstraintContext<'_>) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConstraintKind {
        self.kind
    }

    fn check(&self, ctx: &mut ConstraintContext<'_>) {
        (self.check)(ctx)
    }
}

/// Constraint failing with `message` when `predicate` rejects a property
///
/// The property resolves to its schema default when never set.
pub fn property_constraint<P>(
    kind: ConstraintKind,
    property: impl Into<String>,
    message: impl Into<String>,
    predicate: P,
) -> impl Constraint
where
    P: Fn(&Value) -> bool + Send + Sync,
{
    let property = property.into();
    let message = message.into();
    let name = format!("{}: {}", property, message);
    let mut constraint = ClosureConstraint::implicit(name, move |ctx| {
        let value = ctx.property(&property);
        if !predicate(&value) {
            ctx.error_on(&property, message.clone());
        }
    });
    constraint.kind = kind;
    constraint
}

/// Read-only view handed to a constraint
pub struct ConstraintContext<'a> {
    memory: &'a MemoryStore,
    txn: &'a mut Transaction,
    schema: &'a Schema,
    element: Arc<GraphNode>,
    messages: Vec<DiagnosticMessage>,
}

impl<'a> ConstraintContext<'a> {
    pub(crate) fn new(
        memory: &'a MemoryStore,
        txn: &'a mut Transaction,
        schema: &'a Schema,
        element: Arc<GraphNode>,
    ) -> Self {
        Self {
            memory,
            txn,
            schema,
            element,
            messages: Vec::new(),
        }
    }

    /// Element being validated
    pub fn element(&self) -> &GraphNode {
        &self.element
    }

    /// Read another element in the session's view
    pub fn get(&mut self, id: &Identity) -> Option<Arc<GraphNode>> {
        self.memory.get_node(self.txn, id)
    }

    /// Property of the element, falling back to the schema default
    pub fn property(&self, name: &str) -> Value {
        if let Some(value) = self.element.property_value(name) {
            return value.clone();
        }
        self.element
            .schema_id
            .as_ref()
            .map(|sid| self.schema.default_value(sid, name))
            .unwrap_or(Value::Null)
    }

    /// Schema resolver
    pub fn schema(&self) -> &Schema {
        self.schema
    }

    /// Report an error on the element
    pub fn error(&mut self, message: impl Into<String>) {
        self.push(MessageKind::Error, message.into(), None);
    }

    /// Report an error on one property of the element
    pub fn error_on(&mut self, property: &str, message: impl Into<String>) {
        self.push(MessageKind::Error, message.into(), Some(property));
    }

    /// Report a warning on the element
    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(MessageKind::Warning, message.into(), None);
    }

    /// Report a warning on one property of the element
    pub fn warning_on(&mut self, property: &str, message: impl Into<String>) {
        self.push(MessageKind::Warning, message.into(), Some(property));
    }

    fn push(&mut self, kind: MessageKind, message: String, property: Option<&str>) {
        let mut msg = match kind {
            MessageKind::Error => DiagnosticMessage::error(message),
            MessageKind::Warning => DiagnosticMessage::warning(message),
        }
        .for_element(self.element.id.clone());
        if let Some(p) = property {
            msg = msg.for_property(p);
        }
        self.messages.push(msg);
    }

    pub(crate) fn into_messages(self) -> Vec<DiagnosticMessage> {
        self.messages
    }
}

/// Outcome of an on-demand validation
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Every message reported
    pub messages: Vec<DiagnosticMessage>,
}

impl ValidationReport {
    /// Check if any error was reported
    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.is_error())
    }

    /// Check if any warning was reported
    pub fn has_warnings(&self) -> bool {
        self.messages.iter().any(|m| !m.is_error())
    }

    /// Check if the elements passed every constraint
    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }
}
