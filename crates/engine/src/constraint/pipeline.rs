//! Commit-time validation pass

use super::{Constraint, ConstraintContext, ConstraintKind};
use crate::session::{TrackedElement, TrackingState};
use crate::store::StoreInner;
use hyperstore_core::error::{Error, Result};
use hyperstore_core::{CancellationToken, DiagnosticMessage, GraphNode, Identity, Schema};
use hyperstore_storage::{MemoryStore, Transaction};
use std::sync::Arc;
use tracing::debug;

/// Run `constraints` against one element
pub(crate) fn check_element(
    memory: &MemoryStore,
    txn: &mut Transaction,
    schema: &Schema,
    element: Arc<GraphNode>,
    constraints: &[Arc<dyn Constraint>],
) -> Vec<DiagnosticMessage> {
    let mut ctx = ConstraintContext::new(memory, txn, schema, element);
    for constraint in constraints {
        constraint.check(&mut ctx);
    }
    ctx.into_messages()
}

/// Validate every element added or updated by a top-level session
///
/// Each element is checked once, against the implicit constraints of its
/// schema lineage plus the session constraints whose schema it derives from.
pub(crate) fn validate_commit(
    inner: &StoreInner,
    txn: &mut Transaction,
    tracked: &[TrackedElement],
    session_constraints: &[(Identity, Arc<dyn Constraint>)],
    cancel: &CancellationToken,
) -> Result<Vec<DiagnosticMessage>> {
    let mut messages = Vec::new();
    let mut checked = 0usize;

    for element in tracked {
        if element.state == TrackingState::Removed {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Some(node) = inner.memory.get_node(txn, &element.id) else {
            continue;
        };
        let Some(schema_id) = node.schema_id.clone() else {
            continue;
        };

        let mut constraints = inner
            .constraints
            .applicable(&schema_id, Some(ConstraintKind::Implicit));
        constraints.extend(
            session_constraints
                .iter()
                .filter(|(bound, _)| inner.schema.is_a(&schema_id, bound))
                .map(|(_, c)| Arc::clone(c)),
        );
        if constraints.is_empty() {
            continue;
        }

        checked += 1;
        messages.extend(check_element(
            &inner.memory,
            txn,
            &inner.schema,
            node,
            &constraints,
        ));
    }

    debug!(
        session = %txn.id(),
        elements = checked,
        messages = messages.len(),
        "constraints checked"
    );
    Ok(messages)
}
