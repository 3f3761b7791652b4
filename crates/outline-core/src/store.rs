//! EntityStore: the live, observable entity graph.
//!
//! [`EntityStore`] holds one partition per registered type, each an ordered
//! map from id to [`Entity`]. All mutations go through its methods, and each
//! committed mutation emits exactly one [`Patch`] to the registered
//! listeners before returning:
//!
//! | operation        | patch                                      |
//! |------------------|--------------------------------------------|
//! | `create_entity`  | `add /Type/id` with the entity snapshot     |
//! | `set_property`   | `replace /Type/id/prop` with the new value  |
//! | `add_edge`       | `replace /Type/id/edgeMap`                  |
//! | `remove_edge`    | `replace /Type/id/edgeMap`                  |
//! | `remove_entity`  | `remove /Type/id`                           |
//!
//! A failed call leaves the store untouched and emits nothing.

use indexmap::IndexMap;
use serde_json::Value;

use crate::entity::Entity;
use crate::error::CoreError;
use crate::id::{EntityId, SubscriptionId};
use crate::patch::{Patch, PatchEmitter, PatchListener};
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::snapshot::entity_to_snapshot;
use crate::value::{EdgeMap, PropertyValue};

/// One type partition: id to entity, in insertion order.
pub type Partition = IndexMap<EntityId, Entity>;

/// An edge whose target id is not present in any partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingEdge {
    pub type_name: String,
    pub source: EntityId,
    pub tag: String,
    pub target: EntityId,
}

/// The live entity graph.
#[derive(Debug)]
pub struct EntityStore {
    registry: SchemaRegistry,
    /// Partitions keyed by type name, in registry order.
    partitions: IndexMap<String, Partition>,
    emitter: PatchEmitter,
}

impl EntityStore {
    /// Creates an empty store with one partition per registered type.
    pub fn new(registry: SchemaRegistry) -> Self {
        let partitions = registry
            .type_names()
            .map(|name| (name.to_string(), Partition::new()))
            .collect();
        EntityStore {
            registry,
            partitions,
            emitter: PatchEmitter::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.registry.type_names()
    }

    pub fn partition(&self, type_name: &str) -> Result<&Partition, CoreError> {
        self.partitions
            .get(type_name)
            .ok_or_else(|| CoreError::UnknownType {
                type_name: type_name.to_string(),
            })
    }

    pub(crate) fn partitions(&self) -> &IndexMap<String, Partition> {
        &self.partitions
    }

    pub(crate) fn replace_partitions(&mut self, partitions: IndexMap<String, Partition>) {
        self.partitions = partitions;
    }

    /// Looks up an entity, failing with `EntityNotFound`.
    pub fn get(&self, type_name: &str, id: &str) -> Result<&Entity, CoreError> {
        self.partition(type_name)?
            .get(id)
            .ok_or_else(|| CoreError::EntityNotFound {
                type_name: type_name.to_string(),
                id: EntityId::from(id),
            })
    }

    pub fn find(&self, type_name: &str, id: &str) -> Option<&Entity> {
        self.partitions.get(type_name).and_then(|p| p.get(id))
    }

    pub fn contains(&self, type_name: &str, id: &str) -> bool {
        self.find(type_name, id).is_some()
    }

    /// Finds an id in any partition, in registry order.
    pub fn locate(&self, id: &str) -> Option<&Entity> {
        self.partitions.values().find_map(|p| p.get(id))
    }

    /// Total number of entities across partitions.
    pub fn len(&self) -> usize {
        self.partitions.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Edges whose targets are missing. Hydrated data is accepted as-is, so
    /// this is the place to look for broken references.
    pub fn dangling_edges(&self) -> Vec<DanglingEdge> {
        let mut out = Vec::new();
        for (type_name, partition) in &self.partitions {
            for entity in partition.values() {
                let Some(edges) = entity.edge_map() else {
                    continue;
                };
                for (tag, targets) in edges.iter() {
                    for target in targets {
                        if self.locate(target.as_str()).is_none() {
                            out.push(DanglingEdge {
                                type_name: type_name.clone(),
                                source: entity.id().clone(),
                                tag: tag.to_string(),
                                target: target.clone(),
                            });
                        }
                    }
                }
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    pub fn subscribe(&mut self, listener: Box<dyn PatchListener>) -> SubscriptionId {
        self.emitter.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.emitter.unsubscribe(id)
    }

    /// Total patches emitted since construction.
    pub fn patches_emitted(&self) -> u64 {
        self.emitter.emitted()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Creates an entity of `type_name` from plain initial properties.
    ///
    /// `props` must be a mapping (or null). An `id` key sets the id
    /// explicitly; otherwise a fresh one is allocated. Missing properties
    /// take their kind's default, unknown keys are rejected. Edge ids must
    /// name existing entities or the new entity itself.
    pub fn create_entity(&mut self, type_name: &str, props: Value) -> Result<EntityId, CoreError> {
        let schema = self.registry.get(type_name)?;
        let mut initial = match props {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            _ => {
                return Err(CoreError::InvalidSnapshot {
                    reason: format!("initial properties for '{}' must be a mapping", type_name),
                })
            }
        };

        let id = match initial.remove("id") {
            Some(Value::String(s)) => EntityId(s),
            Some(_) => {
                return Err(CoreError::InvalidSnapshot {
                    reason: "entity id must be a string".to_string(),
                })
            }
            None => EntityId::generate(),
        };
        if self.contains(type_name, id.as_str()) {
            return Err(CoreError::DuplicateEntity {
                type_name: type_name.to_string(),
                id,
            });
        }
        if let Some(key) = initial.keys().find(|k| schema.property(k).is_none()) {
            return Err(CoreError::UnknownProperty {
                type_name: type_name.to_string(),
                property: key.clone(),
            });
        }

        let props = decode_props(schema, &initial)?;
        for edges in props.values().filter_map(PropertyValue::as_edges) {
            self.check_edge_targets(edges, id.as_str())?;
        }
        let entity = Entity::new(id.clone(), type_name, props);
        let snapshot = entity_to_snapshot(&entity);
        self.partition_mut(type_name)?.insert(id.clone(), entity);

        self.emitter.emit(Patch::add(type_name, &id, snapshot));
        Ok(id)
    }

    /// Replaces one property. Text is accepted where content is expected;
    /// edge values are checked like [`add_edge`](Self::add_edge) targets.
    pub fn set_property(
        &mut self,
        type_name: &str,
        id: &str,
        prop: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), CoreError> {
        let schema = self.registry.get(type_name)?;
        let def = schema.require_property(prop)?;
        let value = value.into();
        let found = value.kind();
        let value = value.coerce(def.kind).ok_or_else(|| CoreError::PropertyKind {
            type_name: type_name.to_string(),
            property: prop.to_string(),
            expected: def.kind,
            found,
        })?;
        self.get(type_name, id)?;
        if let Some(edges) = value.as_edges() {
            self.check_edge_targets(edges, id)?;
        }

        let plain = value.to_plain();
        let entity = self.entity_mut(type_name, id)?;
        entity.set(prop, value);

        self.emitter
            .emit(Patch::replace(type_name, &EntityId::from(id), prop, plain));
        Ok(())
    }

    /// Deletes an entity. Edges pointing at it elsewhere are left in place.
    pub fn remove_entity(&mut self, type_name: &str, id: &str) -> Result<Entity, CoreError> {
        let removed = self
            .partition_mut(type_name)?
            .shift_remove(id)
            .ok_or_else(|| CoreError::EntityNotFound {
                type_name: type_name.to_string(),
                id: EntityId::from(id),
            })?;

        self.emitter.emit(Patch::remove(type_name, removed.id()));
        Ok(removed)
    }

    /// Appends `target` to the `tag` edge list of `type_name/id`.
    ///
    /// The target must exist in some partition.
    pub fn add_edge(
        &mut self,
        tag: &str,
        type_name: &str,
        id: &str,
        target: &EntityId,
    ) -> Result<(), CoreError> {
        self.insert_edge(tag, type_name, id, target, usize::MAX)
    }

    /// Inserts `target` at `index` (clamped) in the `tag` edge list.
    pub fn insert_edge(
        &mut self,
        tag: &str,
        type_name: &str,
        id: &str,
        target: &EntityId,
        index: usize,
    ) -> Result<(), CoreError> {
        self.require_edge_target(target)?;
        self.update_edges(tag, type_name, id, |edges| {
            edges.insert(tag, index, target.clone());
            true
        })
        .map(|_| ())
    }

    /// Drops every occurrence of `target` from the `tag` edge list. Returns
    /// false, and emits nothing, when it was not there.
    pub fn remove_edge(
        &mut self,
        tag: &str,
        type_name: &str,
        id: &str,
        target: &EntityId,
    ) -> Result<bool, CoreError> {
        self.update_edges(tag, type_name, id, |edges| edges.remove(tag, target))
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn require_edge_target(&self, target: &EntityId) -> Result<(), CoreError> {
        match self.locate(target.as_str()) {
            Some(_) => Ok(()),
            None => Err(CoreError::EdgeTargetNotFound { id: target.clone() }),
        }
    }

    /// Every target must exist somewhere, except `own_id` itself.
    fn check_edge_targets(&self, edges: &EdgeMap, own_id: &str) -> Result<(), CoreError> {
        edges
            .iter()
            .flat_map(|(_, targets)| targets)
            .filter(|target| target.as_str() != own_id)
            .try_for_each(|target| self.require_edge_target(target))
    }

    fn partition_mut(&mut self, type_name: &str) -> Result<&mut Partition, CoreError> {
        self.partitions
            .get_mut(type_name)
            .ok_or_else(|| CoreError::UnknownType {
                type_name: type_name.to_string(),
            })
    }

    fn entity_mut(&mut self, type_name: &str, id: &str) -> Result<&mut Entity, CoreError> {
        self.partition_mut(type_name)?
            .get_mut(id)
            .ok_or_else(|| CoreError::EntityNotFound {
                type_name: type_name.to_string(),
                id: EntityId::from(id),
            })
    }

    /// Runs `f` on the entity's edge map and emits a patch if it reports a
    /// change.
    fn update_edges(
        &mut self,
        tag: &str,
        type_name: &str,
        id: &str,
        f: impl FnOnce(&mut EdgeMap) -> bool,
    ) -> Result<bool, CoreError> {
        let schema = self.registry.get(type_name)?;
        let prop = schema
            .edge_property()
            .ok_or_else(|| CoreError::UnknownProperty {
                type_name: type_name.to_string(),
                property: "edgeMap".to_string(),
            })?
            .to_string();
        if !schema.allows_edge_tag(tag) {
            return Err(CoreError::UnknownEdgeTag {
                type_name: type_name.to_string(),
                tag: tag.to_string(),
            });
        }

        let entity = self.entity_mut(type_name, id)?;
        let Some(PropertyValue::Edges(edges)) = entity.get_mut(&prop) else {
            return Err(CoreError::InvalidSnapshot {
                reason: format!("{}/{} has no edge collection", type_name, id),
            });
        };
        if !f(edges) {
            return Ok(false);
        }
        let plain = edges.to_plain();

        self.emitter
            .emit(Patch::replace(type_name, &EntityId::from(id), &prop, plain));
        Ok(true)
    }
}

/// Decodes every schema property from a plain mapping, defaulting absent
/// ones.
pub(crate) fn decode_props(
    schema: &EntitySchema,
    plain: &serde_json::Map<String, Value>,
) -> Result<IndexMap<String, PropertyValue>, CoreError> {
    let mut props = IndexMap::new();
    for def in schema.properties() {
        let value = match plain.get(&def.name) {
            Some(v) => PropertyValue::from_plain(def.kind, v).map_err(|reason| {
                CoreError::InvalidSnapshot {
                    reason: format!("{}.{}: {}", schema.name(), def.name, reason),
                }
            })?,
            None => def.kind.default_value(),
        };
        props.insert(def.name.clone(), value);
    }
    Ok(props)
}
