//! Storage-layer types: rows and the write operations applied to tables.
//!
//! A [`Row`] is the plain snapshot of one entity, keyed by its `id` column.
//! Flushes turn buffered patches into [`TableOp`]s and hand the whole batch
//! to the backend at once.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the logical database every backend represents.
pub const DATABASE_NAME: &str = "default";

/// Version of the table layout.
pub const SCHEMA_VERSION: u32 = 1;

/// One stored row: column name to plain value, always including `id`.
pub type Row = Map<String, Value>;

/// A single write against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableOp {
    /// Insert or overwrite the whole row.
    Put { table: String, row: Row },
    /// Overwrite one column of an existing row. No-op when the row is absent.
    Merge {
        table: String,
        id: String,
        column: String,
        value: Value,
    },
    /// Delete the row if present.
    Delete { table: String, id: String },
}

impl TableOp {
    pub fn table(&self) -> &str {
        match self {
            TableOp::Put { table, .. }
            | TableOp::Merge { table, .. }
            | TableOp::Delete { table, .. } => table,
        }
    }

    /// Row id the op targets.
    pub fn id(&self) -> &str {
        match self {
            TableOp::Put { row, .. } => row.get("id").and_then(Value::as_str).unwrap_or(""),
            TableOp::Merge { id, .. } | TableOp::Delete { id, .. } => id,
        }
    }
}

/// Applies `op` to an in-memory row map. Shared by backends that keep rows
/// as JSON.
pub(crate) fn apply_to_rows(rows: &mut indexmap::IndexMap<String, Row>, op: &TableOp) {
    match op {
        TableOp::Put { row, .. } => {
            let id = op.id().to_string();
            rows.insert(id, row.clone());
        }
        TableOp::Merge {
            id, column, value, ..
        } => {
            if let Some(row) = rows.get_mut(id) {
                row.insert(column.clone(), value.clone());
            }
        }
        TableOp::Delete { id, .. } => {
            rows.shift_remove(id);
        }
    }
}
