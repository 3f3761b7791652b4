//! SQLite implementation of [`TableStore`].
//!
//! [`SqliteTables`] keeps one SQL table per entity type with the row stored
//! as a JSON TEXT column. Every batch runs in a single transaction.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::schema::{ensure_entity_table, registered_tables, table_ident};
use crate::traits::TableStore;
use crate::types::{Row, TableOp};

/// SQLite-backed implementation of [`TableStore`].
pub struct SqliteTables {
    conn: Connection,
    declared: HashSet<String>,
}

impl SqliteTables {
    /// Opens (or creates) a database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteTables {
            conn,
            declared: HashSet::new(),
        })
    }

    /// Opens an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteTables {
            conn,
            declared: HashSet::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn checked_ident(&self, name: &str) -> Result<String, StorageError> {
        if !self.declared.contains(name) {
            return Err(StorageError::UnknownTable {
                name: name.to_string(),
            });
        }
        table_ident(name)
    }

    fn parse_row(json: &str) -> Result<Row, StorageError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl TableStore for SqliteTables {
    fn open_tables(&mut self, names: &[&str]) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for name in names {
            ensure_entity_table(&tx, name)?;
        }
        tx.commit()?;
        self.declared.extend(names.iter().map(|n| n.to_string()));
        Ok(())
    }

    fn table_names(&self) -> Vec<String> {
        registered_tables(&self.conn)
            .unwrap_or_default()
            .into_iter()
            .filter(|name| self.declared.contains(name))
            .collect()
    }

    fn read_table(&self, name: &str) -> Result<Vec<Row>, StorageError> {
        let ident = self.checked_ident(name)?;
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT row_json FROM {} ORDER BY id", ident))?;
        let json_rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        json_rows.iter().map(|json| Self::parse_row(json)).collect()
    }

    fn get_row(&self, name: &str, id: &str) -> Result<Option<Row>, StorageError> {
        let ident = self.checked_ident(name)?;
        let json: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT row_json FROM {} WHERE id = ?1", ident),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        json.as_deref().map(Self::parse_row).transpose()
    }

    fn write_batch(&mut self, ops: &[TableOp]) -> Result<(), StorageError> {
        let idents = ops
            .iter()
            .map(|op| self.checked_ident(op.table()))
            .collect::<Result<Vec<_>, _>>()?;

        let tx = self.conn.transaction()?;
        for (op, ident) in ops.iter().zip(&idents) {
            match op {
                TableOp::Put { row, .. } => {
                    let json = serde_json::to_string(row)?;
                    let mut stmt = tx.prepare_cached(&format!(
                        "INSERT OR REPLACE INTO {} (id, row_json) VALUES (?1, ?2)",
                        ident
                    ))?;
                    stmt.execute(params![op.id(), json])?;
                }
                TableOp::Merge {
                    id, column, value, ..
                } => {
                    let existing: Option<String> = tx
                        .query_row(
                            &format!("SELECT row_json FROM {} WHERE id = ?1", ident),
                            params![id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    // Merging into a missing row is a no-op.
                    if let Some(json) = existing {
                        let mut row = Self::parse_row(&json)?;
                        row.insert(column.clone(), value.clone());
                        let json = serde_json::to_string(&row)?;
                        let mut stmt = tx.prepare_cached(&format!(
                            "UPDATE {} SET row_json = ?2 WHERE id = ?1",
                            ident
                        ))?;
                        stmt.execute(params![id, json])?;
                    }
                }
                TableOp::Delete { id, .. } => {
                    let mut stmt =
                        tx.prepare_cached(&format!("DELETE FROM {} WHERE id = ?1", ident))?;
                    stmt.execute(params![id])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn count(&self, name: &str) -> Result<usize, StorageError> {
        let ident = self.checked_ident(name)?;
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", ident), [], |row| {
                row.get(0)
            })?;
        Ok(n as usize)
    }
}
