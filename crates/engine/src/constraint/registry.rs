//! Schema-bound constraint registry

use super::{check_element, Constraint, ConstraintKind, ValidationReport};
use crate::store::Store;
use hyperstore_core::error::Result;
use hyperstore_core::{Identity, Schema};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

/// Constraints keyed by the schema they are bound to
pub struct ConstraintRegistry {
    schema: Arc<Schema>,
    by_schema: RwLock<FxHashMap<Identity, Vec<Arc<dyn Constraint>>>>,
}

impl ConstraintRegistry {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            by_schema: RwLock::new(FxHashMap::default()),
        }
    }

    /// Bind a constraint to a registered schema
    pub fn register<C>(&self, schema_id: &Identity, constraint: C) -> Result<()>
    where
        C: Constraint + 'static,
    {
        self.register_arc(schema_id, Arc::new(constraint))
    }

    /// Bind a shared constraint to a registered schema
    pub fn register_arc(&self, schema_id: &Identity, constraint: Arc<dyn Constraint>) -> Result<()> {
        self.schema.require(schema_id)?;
        debug!(schema = %schema_id, constraint = constraint.name(), "constraint registered");
        self.by_schema
            .write()
            .entry(schema_id.clone())
            .or_default()
            .push(constraint);
        Ok(())
    }

    /// Constraints applying to `schema_id`, base schemas first
    ///
    /// `kind` restricts the result to one kind; `None` returns both.
    pub fn applicable(
        &self,
        schema_id: &Identity,
        kind: Option<ConstraintKind>,
    ) -> Vec<Arc<dyn Constraint>> {
        let lineage = self.schema.lineage(schema_id);
        let by_schema = self.by_schema.read();
        lineage
            .iter()
            .rev()
            .filter_map(|sid| by_schema.get(sid))
            .flatten()
            .filter(|c| kind.map_or(true, |k| c.kind() == k))
            .cloned()
            .collect()
    }

    /// Number of registered constraints
    pub fn len(&self) -> usize {
        self.by_schema.read().values().map(Vec::len).sum()
    }

    /// Check if no constraint is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every constraint (implicit and explicit) on `elements`
    ///
    /// Reads go through the current session of `store` if there is one, so
    /// pending changes are validated too. Missing elements are skipped.
    pub fn validate(&self, store: &Store, elements: &[Identity]) -> Result<ValidationReport> {
        let messages = store.read(|memory, txn| {
            let mut messages = Vec::new();
            for id in elements {
                let Some(node) = memory.get_node(txn, id) else {
                    continue;
                };
                let Some(schema_id) = node.schema_id.clone() else {
                    continue;
                };
                let constraints = self.applicable(&schema_id, None);
                messages.extend(check_element(memory, txn, &self.schema, node, &constraints));
            }
            messages
        });
        Ok(ValidationReport { messages })
    }
}

impl std::fmt::Debug for ConstraintRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintRegistry")
            .field("constraints", &self.len())
            .finish()
    }
}
