//! Snapshot codec: live entities and stores to and from plain values.
//!
//! A snapshot is plain data (strings, numbers, booleans, sequences,
//! string-keyed mappings) holding no live references. An entity snapshot is
//! a mapping with `id` plus one key per schema property; a store snapshot
//! maps type name to id to entity snapshot.
//!
//! # Determinism
//!
//! [`EntityStore::apply_snapshot`] orders partitions by registry order and
//! entities by id, so the resulting store does not depend on the order rows
//! were read in. [`EntityStore::fingerprint`] hashes a canonical form with
//! every mapping key-sorted.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::Entity;
use crate::error::CoreError;
use crate::id::EntityId;
use crate::schema::EntitySchema;
use crate::store::{decode_props, EntityStore, Partition};

/// Plain form of a whole store: type name to id to entity snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreSnapshot(pub IndexMap<String, IndexMap<String, Value>>);

impl StoreSnapshot {
    pub fn new() -> Self {
        StoreSnapshot::default()
    }

    /// Adds a row to the `type_name` table, keyed by the row's `id`.
    pub fn insert_row(&mut self, type_name: &str, row: Value) -> Result<(), CoreError> {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::InvalidSnapshot {
                reason: format!("row in '{}' has no string id", type_name),
            })?
            .to_string();
        self.0.entry(type_name.to_string()).or_default().insert(id, row);
        Ok(())
    }

    /// Ensures a (possibly empty) table entry for `type_name`.
    pub fn ensure_table(&mut self, type_name: &str) {
        self.0.entry(type_name.to_string()).or_default();
    }

    pub fn rows(&self, type_name: &str) -> impl Iterator<Item = &Value> {
        self.0.get(type_name).into_iter().flat_map(IndexMap::values)
    }

    pub fn row_count(&self) -> usize {
        self.0.values().map(IndexMap::len).sum()
    }
}

/// Plain form of one entity.
pub fn entity_to_snapshot(entity: &Entity) -> Value {
    let mut map = Map::new();
    map.insert("id".to_string(), Value::String(entity.id().0.clone()));
    for (name, value) in entity.properties() {
        map.insert(name.to_string(), value.to_plain());
    }
    Value::Object(map)
}

/// Rebuilds an entity of `schema`'s type from its plain form.
///
/// Absent properties take their defaults; keys outside the schema are
/// ignored so that rows written by an older schema still load.
pub fn entity_from_snapshot(schema: &EntitySchema, value: &Value) -> Result<Entity, CoreError> {
    let map = value.as_object().ok_or_else(|| CoreError::InvalidSnapshot {
        reason: format!("{} snapshot must be a mapping", schema.name()),
    })?;
    let id = map
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::InvalidSnapshot {
            reason: format!("{} snapshot has no string id", schema.name()),
        })?;
    let props = decode_props(schema, map)?;
    Ok(Entity::new(EntityId::from(id), schema.name(), props))
}

impl EntityStore {
    /// Plain form of the whole store.
    pub fn snapshot(&self) -> StoreSnapshot {
        let tables = self
            .partitions()
            .iter()
            .map(|(type_name, partition)| {
                let rows = partition
                    .iter()
                    .map(|(id, entity)| (id.0.clone(), entity_to_snapshot(entity)))
                    .collect();
                (type_name.clone(), rows)
            })
            .collect();
        StoreSnapshot(tables)
    }

    /// Plain form of one entity, resolved by type and id.
    pub fn entity_snapshot(&self, type_name: &str, id: &str) -> Result<Value, CoreError> {
        self.get(type_name, id).map(entity_to_snapshot)
    }

    /// Overwrites every partition with the snapshot's contents.
    ///
    /// All-or-nothing: the whole snapshot is decoded before anything is
    /// replaced, so an error leaves the store as it was. Types missing from
    /// the snapshot become empty. No patches are emitted.
    pub fn apply_snapshot(&mut self, snapshot: &StoreSnapshot) -> Result<(), CoreError> {
        if let Some(unknown) = snapshot.0.keys().find(|t| !self.registry().contains(t)) {
            return Err(CoreError::UnknownType {
                type_name: unknown.clone(),
            });
        }

        let mut partitions = IndexMap::new();
        for schema in self.registry().schemas() {
            let mut rows: Vec<(&String, &Value)> = snapshot
                .0
                .get(schema.name())
                .map(|rows| rows.iter().collect())
                .unwrap_or_default();
            rows.sort_by(|a, b| a.0.cmp(b.0));

            let mut partition = Partition::new();
            for (key, row) in rows {
                let entity = entity_from_snapshot(schema, row)?;
                if entity.id().as_str() != key {
                    return Err(CoreError::InvalidSnapshot {
                        reason: format!(
                            "{} row keyed '{}' carries id '{}'",
                            schema.name(),
                            key,
                            entity.id()
                        ),
                    });
                }
                partition.insert(entity.id().clone(), entity);
            }
            partitions.insert(schema.name().to_string(), partition);
        }

        self.replace_partitions(partitions);
        Ok(())
    }

    /// BLAKE3 digest of the canonical plain form of the store.
    ///
    /// Equal stores hash equal regardless of partition or insertion order.
    pub fn fingerprint(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        let mut types: Vec<&String> = self.partitions().keys().collect();
        types.sort();
        for type_name in types {
            hasher.update(type_name.as_bytes());
            hasher.update(&[0]);
            let partition = &self.partitions()[type_name];
            let mut ids: Vec<&EntityId> = partition.keys().collect();
            ids.sort();
            for id in ids {
                let canonical = canonicalize(&entity_to_snapshot(&partition[id]));
                // Serializing a `Value` cannot fail.
                let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
                hasher.update(&bytes);
                hasher.update(&[0]);
            }
        }
        hasher.finalize()
    }
}

/// Rebuilds `value` with every mapping's keys in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
