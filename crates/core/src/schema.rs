//! Minimal schema registry
//!
//! Schema definition proper lives outside this workspace. The engine only
//! consumes a resolver that can answer three questions: does this schema
//! exist, what are its supertypes, and what is a property's default value.
//! [`Schema`] answers them from an in-memory map.

use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::value::Value;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Domain holding the built-in primitive schemas
pub const PRIMITIVES_DOMAIN: &str = "primitives";

/// What kind of element a schema describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    /// Entity type
    Entity,
    /// Relationship type
    Relationship,
    /// Primitive value type
    Primitive,
}

/// Property declared by a schema element
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaProperty {
    /// Property name
    pub name: String,
    /// Value reported when the property was never set
    pub default_value: Value,
}

/// A schema element (entity, relationship or primitive type)
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaElement {
    /// Identity of the schema element
    pub id: Identity,
    /// Kind of element described
    pub kind: SchemaKind,
    /// Direct supertype, if any
    pub super_type: Option<Identity>,
    /// Declared properties (inherited ones are resolved through the chain)
    pub properties: Vec<SchemaProperty>,
}

impl SchemaElement {
    /// Declare an entity schema
    pub fn entity(id: Identity) -> Self {
        Self::new(id, SchemaKind::Entity)
    }

    /// Declare a relationship schema
    pub fn relationship(id: Identity) -> Self {
        Self::new(id, SchemaKind::Relationship)
    }

    /// Declare a primitive schema in the primitives domain
    pub fn primitive(name: &str) -> Self {
        Self::new(Identity::new(PRIMITIVES_DOMAIN, name), SchemaKind::Primitive)
    }

    fn new(id: Identity, kind: SchemaKind) -> Self {
        Self {
            id,
            kind,
            super_type: None,
            properties: Vec::new(),
        }
    }

    /// Set the supertype
    pub fn extends(mut self, super_type: Identity) -> Self {
        self.super_type = Some(super_type);
        self
    }

    /// Declare a property with its default value
    pub fn property(mut self, name: impl Into<String>, default_value: impl Into<Value>) -> Self {
        self.properties.push(SchemaProperty {
            name: name.into(),
            default_value: default_value.into(),
        });
        self
    }
}

/// Thread-safe schema registry
#[derive(Debug, Default)]
pub struct Schema {
    elements: RwLock<FxHashMap<Identity, Arc<SchemaElement>>>,
}

impl Schema {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the primitive schemas
    /// (`primitives:bool`, `int`, `float`, `string`, `bytes`)
    pub fn with_primitives() -> Self {
        let schema = Self::new();
        {
            let mut elements = schema.elements.write();
            for name in ["bool", "int", "float", "string", "bytes"] {
                let el = SchemaElement::primitive(name);
                elements.insert(el.id.clone(), Arc::new(el));
            }
        }
        schema
    }

    /// Identity of a built-in primitive schema
    pub fn primitive_id(name: &str) -> Identity {
        Identity::new(PRIMITIVES_DOMAIN, name)
    }

    /// Register a schema element
    ///
    /// Fails if the id is already registered or if the supertype is unknown.
    pub fn register(&self, element: SchemaElement) -> Result<Arc<SchemaElement>> {
        let mut elements = self.elements.write();
        if elements.contains_key(&element.id) {
            return Err(Error::InvalidOperation(format!(
                "schema {} already registered",
                element.id
            )));
        }
        if let Some(super_type) = &element.super_type {
            if !elements.contains_key(super_type) {
                return Err(Error::SchemaNotFound(super_type.clone()));
            }
        }
        let element = Arc::new(element);
        elements.insert(element.id.clone(), Arc::clone(&element));
        Ok(element)
    }

    /// Look up a schema element
    pub fn get(&self, id: &Identity) -> Option<Arc<SchemaElement>> {
        self.elements.read().get(id).cloned()
    }

    /// Look up a schema element, failing if it is not registered
    pub fn require(&self, id: &Identity) -> Result<Arc<SchemaElement>> {
        self.get(id).ok_or_else(|| Error::SchemaNotFound(id.clone()))
    }

    /// Schema ids from `id` up to the root of its supertype chain (self first)
    pub fn lineage(&self, id: &Identity) -> Vec<Identity> {
        let elements = self.elements.read();
        let mut chain = Vec::new();
        let mut seen = FxHashSet::default();
        let mut current = Some(id.clone());
        while let Some(cur) = current {
            if !seen.insert(cur.clone()) {
                break;
            }
            current = elements.get(&cur).and_then(|e| e.super_type.clone());
            chain.push(cur);
        }
        chain
    }

    /// Check if `id` is `base` or derives from it
    pub fn is_a(&self, id: &Identity, base: &Identity) -> bool {
        self.lineage(id).iter().any(|s| s == base)
    }

    /// Resolve a property through the supertype chain
    pub fn get_property(&self, schema_id: &Identity, name: &str) -> Option<SchemaProperty> {
        let lineage = self.lineage(schema_id);
        let elements = self.elements.read();
        lineage.iter().find_map(|sid| {
            elements
                .get(sid)
                .and_then(|e| e.properties.iter().find(|p| p.name == name).cloned())
        })
    }

    /// Default value of a property, `Null` when undeclared
    pub fn default_value(&self, schema_id: &Identity, name: &str) -> Value {
        self.get_property(schema_id, name)
            .map(|p| p.default_value)
            .unwrap_or(Value::Null)
    }

    /// Number of registered schema elements
    pub fn len(&self) -> usize {
        self.elements.read().len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.elements.read().is_empty()
    }
}
