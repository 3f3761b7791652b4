//! Conversion between the live store and table rows.
//!
//! Two directions:
//!
//! - [`read_snapshot`] collects every declared table into one
//!   [`StoreSnapshot`] for hydration.
//! - [`patch_to_op`] turns a buffered patch into the table write it implies,
//!   reading the *current* live value rather than the value the patch
//!   carried, since a buffered patch may be stale by flush time.

use serde_json::Value;

use outline_core::snapshot::entity_to_snapshot;
use outline_core::{CoreError, EntityStore, Patch, PatchOp, SchemaRegistry, StoreSnapshot};

use crate::error::StorageError;
use crate::traits::TableStore;
use crate::types::{Row, TableOp};

/// Reads every registered type's table into a snapshot.
pub fn read_snapshot<S: TableStore + ?Sized>(
    tables: &S,
    registry: &SchemaRegistry,
) -> Result<StoreSnapshot, StorageError> {
    let mut snapshot = StoreSnapshot::new();
    for type_name in registry.type_names() {
        snapshot.ensure_table(type_name);
        for row in tables.read_table(type_name)? {
            snapshot.insert_row(type_name, Value::Object(row))?;
        }
    }
    Ok(snapshot)
}

/// The table write implied by `patch` against the store as it is now.
///
/// Returns `None` when the entity (or the one a property patch targets)
/// has since been removed: a later `remove` patch in the same buffer
/// deletes the row.
pub fn patch_to_op(store: &EntityStore, patch: &Patch) -> Result<Option<TableOp>, StorageError> {
    let path = &patch.path;
    let schema = store.registry().get(&path.type_name)?;
    let table = schema.name().to_string();

    match (patch.op, path.property.as_deref()) {
        (PatchOp::Add, _) => Ok(store
            .find(&table, path.id.as_str())
            .map(|entity| TableOp::Put {
                row: into_row(entity_to_snapshot(entity)),
                table,
            })),
        (PatchOp::Replace | PatchOp::Remove, Some(prop)) => {
            schema.require_property(prop)?;
            let Some(entity) = store.find(&table, path.id.as_str()) else {
                return Ok(None);
            };
            let value = entity
                .get(prop)
                .map(|v| v.to_plain())
                .ok_or_else(|| CoreError::UnknownProperty {
                    type_name: table.clone(),
                    property: prop.to_string(),
                })?;
            Ok(Some(TableOp::Merge {
                table,
                id: path.id.0.clone(),
                column: prop.to_string(),
                value,
            }))
        }
        (PatchOp::Replace | PatchOp::Remove, None) => Ok(Some(TableOp::Delete {
            table,
            id: path.id.0.clone(),
        })),
    }
}

/// Converts a buffer of patches, in order. Any schema error aborts the
/// whole conversion.
pub fn patches_to_ops(store: &EntityStore, patches: &[Patch]) -> Result<Vec<TableOp>, StorageError> {
    let mut ops = Vec::with_capacity(patches.len());
    for patch in patches {
        if let Some(op) = patch_to_op(store, patch)? {
            ops.push(op);
        }
    }
    Ok(ops)
}

fn into_row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outline_core::outline::{CHILD, LABEL, NODE};
    use outline_core::{outline_registry, EntityId};
    use serde_json::json;

    fn store() -> EntityStore {
        EntityStore::new(outline_registry())
    }

    #[test]
    fn add_writes_current_snapshot() {
        let mut s = store();
        let id = s.create_entity(NODE, json!({"label": "old"})).unwrap();
        let patch = Patch::add(NODE, &id, json!({"id": id.as_str(), "label": "old"}));
        s.set_label(id.as_str(), "new").unwrap();

        match patch_to_op(&s, &patch).unwrap().unwrap() {
            TableOp::Put { table, row } => {
                assert_eq!(table, NODE);
                assert_eq!(row["label"], "new");
                assert_eq!(row["id"], id.as_str());
            }
            other => panic!("expected put, got {:?}", other),
        }
    }

    #[test]
    fn property_patch_merges_live_value() {
        let mut s = store();
        let a = s.create_entity(NODE, json!({"label": "a"})).unwrap();
        let b = s.create_entity(NODE, json!({"label": "b"})).unwrap();
        s.add_edge(CHILD, NODE, a.as_str(), &b).unwrap();
        let stale = Patch::replace(NODE, &a, "edgeMap", json!({}));

        match patch_to_op(&s, &stale).unwrap().unwrap() {
            TableOp::Merge { column, value, .. } => {
                assert_eq!(column, "edgeMap");
                assert_eq!(value, json!({"child": [b.as_str()]}));
            }
            other => panic!("expected merge, got {:?}", other),
        }
    }

    #[test]
    fn remove_without_property_deletes() {
        let s = store();
        let op = patch_to_op(&s, &Patch::remove(NODE, &EntityId::from("gone")))
            .unwrap()
            .unwrap();
        assert_eq!(
            op,
            TableOp::Delete {
                table: NODE.into(),
                id: "gone".into()
            }
        );
    }

    #[test]
    fn patches_for_removed_entities_are_skipped() {
        let mut s = store();
        let id = s.create_entity(NODE, json!({})).unwrap();
        s.remove_entity(NODE, id.as_str()).unwrap();
        let patches = vec![
            Patch::add(NODE, &id, json!({})),
            Patch::replace(NODE, &id, LABEL, json!("x")),
            Patch::remove(NODE, &id),
        ];
        let ops = patches_to_ops(&s, &patches).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], TableOp::Delete { .. }));
    }

    #[test]
    fn unknown_type_or_property_is_schema_error() {
        let s = store();
        let err = patch_to_op(&s, &Patch::remove("Task", &EntityId::from("t"))).unwrap_err();
        assert!(matches!(err, StorageError::Core(CoreError::UnknownType { .. })));

        let err = patch_to_op(&s, &Patch::replace(NODE, &EntityId::from("n"), "color", json!(1)))
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Core(CoreError::UnknownProperty { .. })
        ));
    }
}
