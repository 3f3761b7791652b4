//! Live entity records.

use indexmap::IndexMap;

use crate::id::EntityId;
use crate::value::{EdgeMap, PropertyValue};

/// A typed, identified record in the graph.
///
/// Entities are owned by the [`EntityStore`](crate::store::EntityStore);
/// consumers get shared references for reading and go through the store for
/// every mutation so that a patch is emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: EntityId,
    type_name: String,
    /// Properties in schema order.
    props: IndexMap<String, PropertyValue>,
}

impl Entity {
    pub(crate) fn new(
        id: EntityId,
        type_name: &str,
        props: IndexMap<String, PropertyValue>,
    ) -> Self {
        Entity {
            id,
            type_name: type_name.to_string(),
            props,
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, prop: &str) -> Option<&PropertyValue> {
        self.props.get(prop)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.props.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The text of a `Text` property.
    pub fn text(&self, prop: &str) -> Option<&str> {
        self.get(prop).and_then(PropertyValue::as_text)
    }

    /// The first edge collection on this entity, if its type has one.
    pub fn edge_map(&self) -> Option<&EdgeMap> {
        self.props.values().find_map(PropertyValue::as_edges)
    }

    /// Ids under `tag`, empty when the entity has no such edges.
    pub fn edges(&self, tag: &str) -> &[EntityId] {
        self.edge_map().map(|e| e.get(tag)).unwrap_or(&[])
    }

    /// A single item of an `Items` property.
    pub fn item(&self, prop: &str, key: &str) -> Option<&str> {
        self.get(prop)
            .and_then(PropertyValue::as_items)
            .and_then(|items| items.get(key))
            .map(String::as_str)
    }

    pub(crate) fn set(&mut self, prop: &str, value: PropertyValue) {
        if let Some(slot) = self.props.get_mut(prop) {
            *slot = value;
        } else {
            self.props.insert(prop.to_string(), value);
        }
    }

    pub(crate) fn get_mut(&mut self, prop: &str) -> Option<&mut PropertyValue> {
        self.props.get_mut(prop)
    }
}
