//! In-memory implementation of [`TableStore`].
//!
//! [`InMemoryTables`] is a first-class backend for tests and ephemeral
//! sessions. Clones share the same tables, the way a browser database
//! outlives any one page: a test can hand a clone to a graph, drop the
//! graph, and inspect or re-hydrate from the original handle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;

use crate::error::StorageError;
use crate::traits::TableStore;
use crate::types::{apply_to_rows, Row, TableOp};

#[derive(Debug, Default)]
struct Tables {
    tables: IndexMap<String, IndexMap<String, Row>>,
    batches: usize,
}

/// Shared in-memory tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTables {
    inner: Arc<Mutex<Tables>>,
}

impl InMemoryTables {
    pub fn new() -> Self {
        InMemoryTables::default()
    }

    /// Number of batches written so far (one per successful flush).
    pub fn batch_count(&self) -> usize {
        self.lock().batches
    }

    /// Seeds a row directly, bypassing the graph. Declares the table if
    /// needed.
    pub fn seed_row(&self, table: &str, row: Row) {
        let id = row
            .get("id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TableStore for InMemoryTables {
    fn open_tables(&mut self, names: &[&str]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        for name in names {
            inner.tables.entry(name.to_string()).or_default();
        }
        Ok(())
    }

    fn table_names(&self) -> Vec<String> {
        self.lock().tables.keys().cloned().collect()
    }

    fn read_table(&self, name: &str) -> Result<Vec<Row>, StorageError> {
        let inner = self.lock();
        let table = inner
            .tables
            .get(name)
            .ok_or_else(|| StorageError::UnknownTable {
                name: name.to_string(),
            })?;
        // Primary-key order, like an indexed table scan.
        let mut rows: Vec<(&String, &Row)> = table.iter().collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));
        Ok(rows.into_iter().map(|(_, r)| r.clone()).collect())
    }

    fn get_row(&self, name: &str, id: &str) -> Result<Option<Row>, StorageError> {
        let inner = self.lock();
        let table = inner
            .tables
            .get(name)
            .ok_or_else(|| StorageError::UnknownTable {
                name: name.to_string(),
            })?;
        Ok(table.get(id).cloned())
    }

    fn write_batch(&mut self, ops: &[TableOp]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(op) = ops.iter().find(|op| !inner.tables.contains_key(op.table())) {
            return Err(StorageError::UnknownTable {
                name: op.table().to_string(),
            });
        }
        for op in ops {
            if let Some(rows) = inner.tables.get_mut(op.table()) {
                apply_to_rows(rows, op);
            }
        }
        inner.batches += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn clones_share_tables() {
        let tables = InMemoryTables::new();
        let mut handle = tables.clone();
        handle.open_tables(&["Node", "Config"]).unwrap();
        handle
            .write_batch(&[TableOp::Put {
                table: "Node".into(),
                row: row(json!({"id": "a", "label": "A"})),
            }])
            .unwrap();

        assert_eq!(tables.table_names(), vec!["Node", "Config"]);
        assert_eq!(tables.count("Node").unwrap(), 1);
        assert_eq!(tables.batch_count(), 1);
    }

    #[test]
    fn batch_with_unknown_table_applies_nothing() {
        let mut tables = InMemoryTables::new();
        tables.open_tables(&["Node"]).unwrap();
        let err = tables
            .write_batch(&[
                TableOp::Put {
                    table: "Node".into(),
                    row: row(json!({"id": "a"})),
                },
                TableOp::Delete {
                    table: "Task".into(),
                    id: "x".into(),
                },
            ])
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownTable { .. }));
        assert_eq!(tables.count("Node").unwrap(), 0);
        assert_eq!(tables.batch_count(), 0);
    }

    #[test]
    fn read_table_is_id_ordered() {
        let mut tables = InMemoryTables::new();
        tables.open_tables(&["Node"]).unwrap();
        tables.seed_row("Node", row(json!({"id": "b"})));
        tables.seed_row("Node", row(json!({"id": "a"})));
        let ids: Vec<String> = tables
            .read_table("Node")
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(tables.get_row("Node", "a").unwrap().is_some());
        assert!(tables.read_table("Task").is_err());
    }
}
