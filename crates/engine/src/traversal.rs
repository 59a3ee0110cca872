//! Path enumeration
//!
//! Enumerates simple paths (no node visited twice) from a start element by
//! following adjacency edges, depth-first, in edge order.

use crate::store::Store;
use hyperstore_core::{Direction, Identity, Schema};
use hyperstore_storage::{MemoryStore, Transaction};
use rustc_hash::FxHashSet;

/// Default bound on path length
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// How paths are walked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathOptions {
    /// Edge direction to follow
    pub direction: Direction,
    /// Only follow relationships of this schema or a derived one
    pub relationship_schema: Option<Identity>,
    /// Maximum number of relationships in a path
    pub max_depth: usize,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Outgoing,
            relationship_schema: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl PathOptions {
    /// Follow edges in `direction`
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Restrict to one relationship schema
    pub fn relationship_schema(mut self, schema_id: Identity) -> Self {
        self.relationship_schema = Some(schema_id);
        self
    }

    /// Bound the path length
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// One hop of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    /// Relationship followed
    pub relationship_id: Identity,
    /// Element reached
    pub node_id: Identity,
}

/// A simple path from `start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphPath {
    /// First element
    pub start: Identity,
    /// Hops in order
    pub steps: Vec<PathStep>,
}

impl GraphPath {
    /// Number of relationships
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if the path has no hop
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Last element
    pub fn end(&self) -> &Identity {
        self.steps.last().map_or(&self.start, |s| &s.node_id)
    }

    /// Elements visited, start first
    pub fn nodes(&self) -> impl Iterator<Item = &Identity> {
        std::iter::once(&self.start).chain(self.steps.iter().map(|s| &s.node_id))
    }
}

impl Store {
    /// Every simple path of one or more hops from `start`
    ///
    /// Returns nothing if `start` does not exist.
    pub fn paths(&self, start: &Identity, options: &PathOptions) -> Vec<GraphPath> {
        let schema = self.schema();
        self.read(|memory, txn| {
            let mut walk = Walk {
                memory,
                txn,
                schema,
                options,
                start,
                steps: Vec::new(),
                on_path: FxHashSet::default(),
                found: Vec::new(),
            };
            if memory.contains(walk.txn, start) {
                walk.on_path.insert(start.clone());
                walk.visit(start);
            }
            walk.found
        })
    }

    /// Simple paths from `start` that end on `end`
    pub fn paths_between(
        &self,
        start: &Identity,
        end: &Identity,
        options: &PathOptions,
    ) -> Vec<GraphPath> {
        self.paths(start, options)
            .into_iter()
            .filter(|p| p.end() == end)
            .collect()
    }
}

struct Walk<'a> {
    memory: &'a MemoryStore,
    txn: &'a mut Transaction,
    schema: &'a Schema,
    options: &'a PathOptions,
    start: &'a Identity,
    steps: Vec<PathStep>,
    on_path: FxHashSet<Identity>,
    found: Vec<GraphPath>,
}

impl Walk<'_> {
    fn visit(&mut self, current: &Identity) {
        if self.steps.len() >= self.options.max_depth {
            return;
        }
        let Some(node) = self.memory.get_node(self.txn, current) else {
            return;
        };
        let filter = self.options.relationship_schema.as_ref();
        let hops: Vec<PathStep> = node
            .edges(self.options.direction, None)
            .filter(|e| filter.map_or(true, |s| self.schema.is_a(&e.schema_id, s)))
            .map(|e| PathStep {
                relationship_id: e.id.clone(),
                node_id: e.other_id.clone(),
            })
            .collect();

        for hop in hops {
            if !self.on_path.insert(hop.node_id.clone()) {
                continue;
            }
            let next = hop.node_id.clone();
            self.steps.push(hop);
            self.found.push(GraphPath {
                start: self.start.clone(),
                steps: self.steps.clone(),
            });
            self.visit(&next);
            self.steps.pop();
            self.on_path.remove(&next);
        }
    }
}
