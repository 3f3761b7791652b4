//! Entity type registry.
//!
//! Each entity type is described by an [`EntitySchema`]: its name (also the
//! name of its storage table), an ordered list of typed properties, and the
//! edge tags its edge collection accepts. [`SchemaRegistry`] maps type names
//! to schemas in registration order, which is also the partition order of
//! the store.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::value::{Content, EdgeMap, PropertyValue};

/// The kind of value a property holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    /// A plain string.
    Text,
    /// A plain string or a rich-text document with a `blocks` sequence.
    Content,
    /// String-to-string key/value items.
    Items,
    /// Edge tag to ordered id list.
    Edges,
}

impl PropertyKind {
    /// The value a property of this kind holds when not supplied at creation.
    pub fn default_value(self) -> PropertyValue {
        match self {
            PropertyKind::Text => PropertyValue::Text(String::new()),
            PropertyKind::Content => PropertyValue::Content(Content::Plain(String::new())),
            PropertyKind::Items => PropertyValue::Items(IndexMap::new()),
            PropertyKind::Edges => PropertyValue::Edges(EdgeMap::default()),
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropertyKind::Text => "text",
            PropertyKind::Content => "content",
            PropertyKind::Items => "items",
            PropertyKind::Edges => "edges",
        };
        f.write_str(s)
    }
}

/// A named, typed property of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
}

/// Schema of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    name: String,
    properties: Vec<PropertyDef>,
    /// Accepted edge tags. Empty means any tag is accepted.
    edge_tags: Vec<String>,
}

impl EntitySchema {
    /// Starts a schema for `name`, which must be a plain identifier.
    pub fn new(name: &str) -> Result<Self, CoreError> {
        if !is_valid_type_name(name) {
            return Err(CoreError::InvalidTypeName {
                name: name.to_string(),
            });
        }
        Ok(EntitySchema {
            name: name.to_string(),
            properties: Vec::new(),
            edge_tags: Vec::new(),
        })
    }

    /// Adds a property. `id` is reserved and silently skipped.
    pub fn with_property(mut self, name: &str, kind: PropertyKind) -> Self {
        if name != "id" && self.property(name).is_none() {
            self.properties.push(PropertyDef {
                name: name.to_string(),
                kind,
            });
        }
        self
    }

    pub fn with_edge_tag(mut self, tag: &str) -> Self {
        if !self.edge_tags.iter().any(|t| t == tag) {
            self.edge_tags.push(tag.to_string());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Looks up a property, failing with `UnknownProperty`.
    pub fn require_property(&self, name: &str) -> Result<&PropertyDef, CoreError> {
        self.property(name).ok_or_else(|| CoreError::UnknownProperty {
            type_name: self.name.clone(),
            property: name.to_string(),
        })
    }

    /// Name of the property holding the edge collection, if the type has one.
    pub fn edge_property(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.kind == PropertyKind::Edges)
            .map(|p| p.name.as_str())
    }

    pub fn edge_tags(&self) -> &[String] {
        &self.edge_tags
    }

    pub fn allows_edge_tag(&self, tag: &str) -> bool {
        self.edge_tags.is_empty() || self.edge_tags.iter().any(|t| t == tag)
    }
}

/// Registered entity types, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    schemas: IndexMap<String, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    pub fn register(&mut self, schema: EntitySchema) -> Result<(), CoreError> {
        if self.schemas.contains_key(schema.name()) {
            return Err(CoreError::DuplicateType {
                type_name: schema.name().to_string(),
            });
        }
        self.schemas.insert(schema.name().to_string(), schema);
        Ok(())
    }

    /// Looks up a schema, failing with `UnknownType`.
    pub fn get(&self, type_name: &str) -> Result<&EntitySchema, CoreError> {
        self.schemas
            .get(type_name)
            .ok_or_else(|| CoreError::UnknownType {
                type_name: type_name.to_string(),
            })
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.schemas.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(|k| k.as_str())
    }

    pub fn schemas(&self) -> impl Iterator<Item = &EntitySchema> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Whether `name` is usable as a type (and table) name:
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
