//! Hypergraph operations
//!
//! Entities and relationships are [`GraphNode`]s. A relationship records its
//! endpoints and each endpoint records the relationship in its edge list, so
//! both directions can be walked without scanning the store.
//!
//! Every write runs in the calling thread's session, or in an implicit one.

use crate::events::EventKind;
use crate::session::TrackingState;
use crate::store::{Scope, Store};
use hyperstore_core::error::{Error, Result};
use hyperstore_core::{
    Direction, EdgeInfo, Endpoints, GraphNode, Identity, NodeKind, SchemaKind, Value,
};
use std::sync::Arc;

/// Property value with the version of its element
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
    /// Current value, the schema default when never set
    pub value: Value,
    /// Version of the owning element; 0 when the value is a default
    pub version: u64,
}

impl Store {
    // ========================================================================
    // Creation
    // ========================================================================

    /// Create an entity of `schema_id`
    ///
    /// A fresh identity is generated in the schema's domain unless `id` is
    /// given.
    ///
    /// # Errors
    ///
    /// - `SchemaNotFound` / `InvalidOperation` if the schema is not an entity
    ///   schema
    /// - `InvalidIdentity` if `id` has no parseable string form
    /// - `DuplicateNode` if the identity exists
    pub fn create_entity(&self, schema_id: &Identity, id: Option<Identity>) -> Result<Identity> {
        self.require_kind(schema_id, SchemaKind::Entity)?;
        let id = self.element_id(schema_id, id)?;
        self.write(|scope| {
            let node = GraphNode::entity(id.clone(), schema_id.clone());
            scope.add(node.clone())?;
            scope.track(&node, TrackingState::Added);
            scope.emit(EventKind::AddEntity {
                id: id.clone(),
                schema_id: schema_id.clone(),
            });
            Ok(id)
        })
    }

    /// Create a relationship of `schema_id` from `start` to `end`
    ///
    /// # Errors
    ///
    /// - `SchemaNotFound` / `InvalidOperation` if the schema is not a
    ///   relationship schema
    /// - `NodeNotFound` if an endpoint does not exist
    /// - `InvalidIdentity` if `id` has no parseable string form
    /// - `DuplicateNode` if the identity exists
    pub fn create_relationship(
        &self,
        schema_id: &Identity,
        start: &Identity,
        end: &Identity,
        id: Option<Identity>,
    ) -> Result<Identity> {
        self.require_kind(schema_id, SchemaKind::Relationship)?;
        let id = self.element_id(schema_id, id)?;
        self.write(|scope| {
            scope.lock(start)?;
            scope.lock(end)?;
            let start_node = scope
                .read(start)?
                .ok_or_else(|| Error::NodeNotFound(start.clone()))?;
            let end_node = scope
                .read(end)?
                .ok_or_else(|| Error::NodeNotFound(end.clone()))?;

            let endpoints = Endpoints {
                start_id: start.clone(),
                start_schema_id: schema_of(&start_node)?,
                end_id: end.clone(),
                end_schema_id: schema_of(&end_node)?,
            };
            let node = GraphNode::relationship(id.clone(), schema_id.clone(), endpoints);
            scope.add(node.clone())?;
            scope.track(&node, TrackingState::Added);

            link(scope, start, EdgeInfo {
                id: id.clone(),
                schema_id: schema_id.clone(),
                other_id: end.clone(),
                direction: Direction::Outgoing,
            })?;
            link(scope, end, EdgeInfo {
                id: id.clone(),
                schema_id: schema_id.clone(),
                other_id: start.clone(),
                direction: Direction::Incoming,
            })?;

            scope.emit(EventKind::AddRelationship {
                id: id.clone(),
                schema_id: schema_id.clone(),
                start_id: start.clone(),
                end_id: end.clone(),
            });
            Ok(id)
        })
    }

    /// Caller-supplied identity, or a fresh one in the schema's domain
    fn element_id(&self, schema_id: &Identity, id: Option<Identity>) -> Result<Identity> {
        match id {
            Some(id) if !id.is_valid() => Err(Error::InvalidIdentity(id.to_string())),
            Some(id) => Ok(id),
            None => Ok(self.create_id(schema_id.domain(), None)),
        }
    }

    fn require_kind(&self, schema_id: &Identity, kind: SchemaKind) -> Result<()> {
        let element = self.schema().require(schema_id)?;
        if element.kind != kind {
            return Err(Error::InvalidOperation(format!(
                "schema {} is not a {:?} schema",
                schema_id, kind
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove an entity and every relationship starting or ending on it
    ///
    /// Returns false when the entity does not exist and
    /// `throw_if_not_exists` is not set.
    pub fn remove_entity(&self, id: &Identity, throw_if_not_exists: bool) -> Result<bool> {
        self.write(|scope| {
            scope.lock(id)?;
            let Some(node) = scope.read(id)? else {
                return missing(id, throw_if_not_exists);
            };
            if node.kind != NodeKind::Entity {
                return Err(Error::InvalidOperation(format!("{} is not an entity", id)));
            }

            let relationships: Vec<Identity> = node.edges.iter().map(|e| e.id.clone()).collect();
            for relationship in &relationships {
                remove_relationship_in(scope, relationship)?;
            }

            scope.remove(id, true)?;
            scope.track(&node, TrackingState::Removed);
            if let Some(schema_id) = node.schema_id.clone() {
                scope.emit(EventKind::RemoveEntity {
                    id: id.clone(),
                    schema_id,
                });
            }
            Ok(true)
        })
    }

    /// Remove a relationship and its edges
    ///
    /// Returns false when the relationship does not exist and
    /// `throw_if_not_exists` is not set.
    pub fn remove_relationship(&self, id: &Identity, throw_if_not_exists: bool) -> Result<bool> {
        self.write(|scope| {
            scope.lock(id)?;
            match scope.read(id)? {
                None => missing(id, throw_if_not_exists),
                Some(node) if !node.is_relationship() => Err(Error::InvalidOperation(format!(
                    "{} is not a relationship",
                    id
                ))),
                Some(_) => remove_relationship_in(scope, id),
            }
        })
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Set a property of an element
    ///
    /// With `expected_version`, the write fails with `VersionConflict` unless
    /// the element is still at that version. Returns the previous value.
    pub fn set_property_value(
        &self,
        id: &Identity,
        property: &str,
        value: impl Into<Value>,
        expected_version: Option<u64>,
    ) -> Result<PropertyValue> {
        let value = value.into();
        self.write(|scope| {
            scope.lock(id)?;
            let node = scope
                .read(id)?
                .ok_or_else(|| Error::NodeNotFound(id.clone()))?;
            if let Some(expected) = expected_version {
                if expected != node.version {
                    return Err(Error::VersionConflict {
                        id: id.clone(),
                        expected,
                        actual: node.version,
                    });
                }
            }

            let old_value = node.property_value(property).cloned();
            let previous = match &old_value {
                Some(v) => PropertyValue {
                    value: v.clone(),
                    version: node.version,
                },
                None => PropertyValue {
                    value: default_of(scope, &node, property),
                    version: 0,
                },
            };

            let updated = GraphNode::clone(&node).with_property(property, value.clone());
            scope.update(updated)?;
            scope.track(&node, TrackingState::Updated);
            scope.emit(EventKind::ChangePropertyValue {
                id: id.clone(),
                property: property.to_string(),
                old_value,
                value,
            });
            Ok(previous)
        })
    }

    /// Current value of a property
    ///
    /// Returns `None` if the element does not exist. A property never set
    /// reports its schema default at version 0.
    pub fn get_property_value(&self, id: &Identity, property: &str) -> Option<PropertyValue> {
        let node = self.get_element(id)?;
        Some(match node.property_value(property) {
            Some(value) => PropertyValue {
                value: value.clone(),
                version: node.version,
            },
            None => PropertyValue {
                value: node
                    .schema_id
                    .as_ref()
                    .map(|sid| self.schema().default_value(sid, property))
                    .unwrap_or(Value::Null),
                version: 0,
            },
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Element as seen by the calling thread
    pub fn get_element(&self, id: &Identity) -> Option<Arc<GraphNode>> {
        self.read(|memory, txn| memory.get_node(txn, id))
    }

    /// Entities of `schema_id` or a schema derived from it
    pub fn get_entities(&self, schema_id: &Identity) -> Vec<Arc<GraphNode>> {
        self.elements_where(|node| {
            node.kind == NodeKind::Entity && self.is_of(node, Some(schema_id))
        })
    }

    /// Relationships, optionally filtered by schema (derived schemas
    /// included) and endpoints
    pub fn get_relationships(
        &self,
        schema_id: Option<&Identity>,
        start: Option<&Identity>,
        end: Option<&Identity>,
    ) -> Vec<Arc<GraphNode>> {
        self.elements_where(|node| {
            node.is_relationship()
                && self.is_of(node, schema_id)
                && start.map_or(true, |s| node.start_id() == Some(s))
                && end.map_or(true, |e| node.end_id() == Some(e))
        })
    }

    /// Entities and relationships of `schema_id` or a derived schema
    pub fn get_elements(&self, schema_id: &Identity) -> Vec<Arc<GraphNode>> {
        self.elements_where(|node| node.kind != NodeKind::Property && self.is_of(node, Some(schema_id)))
    }

    fn elements_where<F>(&self, filter: F) -> Vec<Arc<GraphNode>>
    where
        F: Fn(&GraphNode) -> bool,
    {
        self.read(|memory, txn| memory.nodes(txn, filter))
    }

    fn is_of(&self, node: &GraphNode, schema_id: Option<&Identity>) -> bool {
        match (schema_id, &node.schema_id) {
            (None, _) => true,
            (Some(base), Some(sid)) => self.schema().is_a(sid, base),
            (Some(_), None) => false,
        }
    }
}

fn missing(id: &Identity, throw_if_not_exists: bool) -> Result<bool> {
    if throw_if_not_exists {
        return Err(Error::NodeNotFound(id.clone()));
    }
    Ok(false)
}

/// Schema of a relationship endpoint
fn schema_of(node: &GraphNode) -> Result<Identity> {
    node.schema_id.clone().ok_or_else(|| {
        Error::InvalidOperation(format!("{} has no schema and cannot be an endpoint", node.id))
    })
}

fn default_of(scope: &Scope<'_>, node: &GraphNode, property: &str) -> Value {
    node.schema_id
        .as_ref()
        .map(|sid| scope.schema().default_value(sid, property))
        .unwrap_or(Value::Null)
}

/// Add an edge to an endpoint's adjacency list
fn link(scope: &mut Scope<'_>, node_id: &Identity, edge: EdgeInfo) -> Result<()> {
    let node = scope
        .read(node_id)?
        .ok_or_else(|| Error::NodeNotFound(node_id.clone()))?;
    let mut node = GraphNode::clone(&node);
    node.add_edge(edge);
    scope.update(node)
}

/// Drop an edge from an endpoint's adjacency list, if the endpoint exists
fn unlink(scope: &mut Scope<'_>, node_id: &Identity, relationship: &Identity, direction: Direction) -> Result<()> {
    scope.lock(node_id)?;
    let Some(node) = scope.read(node_id)? else {
        return Ok(());
    };
    let mut node = GraphNode::clone(&node);
    if node.remove_edge(relationship, direction) {
        scope.update(node)?;
    }
    Ok(())
}

/// Remove a relationship, its edges and, recursively, relationships whose
/// endpoint it is
fn remove_relationship_in(scope: &mut Scope<'_>, id: &Identity) -> Result<bool> {
    scope.lock(id)?;
    let Some(node) = scope.read(id)? else {
        return Ok(false);
    };

    let nested: Vec<Identity> = node.edges.iter().map(|e| e.id.clone()).collect();
    for relationship in &nested {
        remove_relationship_in(scope, relationship)?;
    }

    if let Some(endpoints) = &node.endpoints {
        unlink(scope, &endpoints.start_id, id, Direction::Outgoing)?;
        unlink(scope, &endpoints.end_id, id, Direction::Incoming)?;
    }
    scope.remove(id, true)?;
    scope.track(&node, TrackingState::Removed);

    if let (Some(schema_id), Some(endpoints)) = (node.schema_id.clone(), node.endpoints.clone()) {
        scope.emit(EventKind::RemoveRelationship {
            id: id.clone(),
            schema_id,
            start_id: endpoints.start_id,
            end_id: endpoints.end_id,
        });
    }
    Ok(true)
}
