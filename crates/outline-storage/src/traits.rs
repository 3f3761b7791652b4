//! The [`TableStore`] trait defining the persisted-table contract.
//!
//! A table store is one logical database ([`DATABASE_NAME`], schema version
//! [`SCHEMA_VERSION`]) holding one table per entity type, keyed by `id`.
//! Reads are whole-table (hydration reads everything once); writes arrive
//! as batches, and a batch is applied atomically: either every op lands or
//! none does.
//!
//! Implementations (`InMemoryTables`, `SqliteTables`) are swappable without
//! touching the persistence adapter. The trait is synchronous: the adapter
//! calls it from the single thread that owns the graph.
//!
//! [`DATABASE_NAME`]: crate::types::DATABASE_NAME
//! [`SCHEMA_VERSION`]: crate::types::SCHEMA_VERSION

use crate::error::StorageError;
use crate::types::{Row, TableOp};

pub trait TableStore {
    /// Declares the table set, creating missing tables. Must be called with
    /// the registered type names before any read or write.
    fn open_tables(&mut self, names: &[&str]) -> Result<(), StorageError>;

    /// Names of the declared tables.
    fn table_names(&self) -> Vec<String>;

    /// Every row of a table.
    fn read_table(&self, name: &str) -> Result<Vec<Row>, StorageError>;

    /// A single row by id.
    fn get_row(&self, name: &str, id: &str) -> Result<Option<Row>, StorageError>;

    /// Applies `ops` in order as one atomic batch.
    fn write_batch(&mut self, ops: &[TableOp]) -> Result<(), StorageError>;

    /// Row count of a table.
    fn count(&self, name: &str) -> Result<usize, StorageError> {
        self.read_table(name).map(|rows| rows.len())
    }
}
