//! Versioned graph records
//!
//! A [`GraphNode`] is the unit the memory store versions. Entities and
//! relationships share one record; relationship-only fields (start and end)
//! are `None` on entities. Nodes are never mutated once committed: a write
//! produces a new node that replaces the head of the version chain.

use crate::identity::Identity;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Discriminant of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// A standalone element
    Entity,
    /// An edge between two elements, itself addressable
    Relationship,
    /// A plain value container
    Property,
}

/// Direction of an edge relative to the node holding it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// The relationship ends on this node
    Incoming,
    /// The relationship starts on this node
    Outgoing,
}

impl Direction {
    /// The opposite direction
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Incoming => Direction::Outgoing,
            Direction::Outgoing => Direction::Incoming,
        }
    }
}

/// One adjacency entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeInfo {
    /// Identity of the relationship node
    pub id: Identity,
    /// Schema of the relationship
    pub schema_id: Identity,
    /// Node at the other end of the relationship
    pub other_id: Identity,
    /// Direction relative to the owner
    pub direction: Direction,
}

/// Relationship endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Start node
    pub start_id: Identity,
    /// Schema of the start node
    pub start_schema_id: Identity,
    /// End node
    pub end_id: Identity,
    /// Schema of the end node
    pub end_schema_id: Identity,
}

/// Versioned entity, relationship or property record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Identity of this node
    pub id: Identity,
    /// Schema (type) of this node
    pub schema_id: Option<Identity>,
    /// Kind discriminant
    pub kind: NodeKind,
    /// Endpoints; present only on relationships
    pub endpoints: Option<Endpoints>,
    /// Version stamped at commit (0 until first commit)
    pub version: u64,
    /// Primary payload (used by property containers)
    pub value: Value,
    /// Named property bag
    pub properties: BTreeMap<String, Value>,
    /// Adjacency list
    pub edges: Vec<EdgeInfo>,
}

impl GraphNode {
    /// New entity node
    pub fn entity(id: Identity, schema_id: Identity) -> Self {
        Self {
            id,
            schema_id: Some(schema_id),
            kind: NodeKind::Entity,
            endpoints: None,
            version: 0,
            value: Value::Null,
            properties: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    /// New relationship node
    pub fn relationship(id: Identity, schema_id: Identity, endpoints: Endpoints) -> Self {
        Self {
            id,
            schema_id: Some(schema_id),
            kind: NodeKind::Relationship,
            endpoints: Some(endpoints),
            version: 0,
            value: Value::Null,
            properties: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    /// New property container holding `value`
    pub fn property(id: Identity, value: impl Into<Value>) -> Self {
        Self {
            id,
            schema_id: None,
            kind: NodeKind::Property,
            endpoints: None,
            version: 0,
            value: value.into(),
            properties: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    /// Builder-style schema assignment
    pub fn with_schema(mut self, schema_id: Identity) -> Self {
        self.schema_id = Some(schema_id);
        self
    }

    /// Builder-style property assignment
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Check if this node is a relationship
    pub fn is_relationship(&self) -> bool {
        self.kind == NodeKind::Relationship
    }

    /// Start identity of a relationship
    pub fn start_id(&self) -> Option<&Identity> {
        self.endpoints.as_ref().map(|e| &e.start_id)
    }

    /// End identity of a relationship
    pub fn end_id(&self) -> Option<&Identity> {
        self.endpoints.as_ref().map(|e| &e.end_id)
    }

    /// Property value if set
    pub fn property_value(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Edges in `direction`, optionally restricted to one relationship schema
    pub fn edges<'a>(
        &'a self,
        direction: Direction,
        schema_id: Option<&'a Identity>,
    ) -> impl Iterator<Item = &'a EdgeInfo> + 'a {
        self.edges.iter().filter(move |e| {
            e.direction == direction && schema_id.map_or(true, |s| &e.schema_id == s)
        })
    }

    /// Record an edge; a second add of the same relationship is ignored
    pub fn add_edge(&mut self, edge: EdgeInfo) {
        if !self
            .edges
            .iter()
            .any(|e| e.id == edge.id && e.direction == edge.direction)
        {
            self.edges.push(edge);
        }
    }

    /// Drop an edge; returns true if it was present
    pub fn remove_edge(&mut self, relationship_id: &Identity, direction: Direction) -> bool {
        let before = self.edges.len();
        self.edges
            .retain(|e| !(&e.id == relationship_id && e.direction == direction));
        before != self.edges.len()
    }
}
