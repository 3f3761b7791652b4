//! SQL schema and migration setup for the SQLite backend.
//!
//! The fixed schema (table registry, store metadata) is managed by
//! `rusqlite_migration` through SQLite's `user_version` pragma, with
//! migrations embedded via `include_str!`. Entity tables are created on
//! open, one per registered type, since the type set is only known at
//! runtime.

use rusqlite::{params, Connection};
use rusqlite_migration::{Migrations, M};

use outline_core::schema::is_valid_type_name;

use crate::error::StorageError;
use crate::types::{DATABASE_NAME, SCHEMA_VERSION};

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("migrations/001_initial_schema.sql"))])
}

/// Opens (or creates) the database at `path` with WAL mode and all pending
/// migrations applied.
pub fn open_database(path: &str) -> Result<Connection, StorageError> {
    let mut conn = Connection::open(path)?;
    configure_and_migrate(&mut conn)?;
    Ok(conn)
}

/// Opens a private in-memory database.
pub fn open_in_memory() -> Result<Connection, StorageError> {
    let mut conn = Connection::open_in_memory()?;
    configure_and_migrate(&mut conn)?;
    Ok(conn)
}

/// Sets connection pragmas, migrates, then checks the version and name.
fn configure_and_migrate(conn: &mut Connection) -> Result<(), StorageError> {
    // WAL: readers never block the single batch writer.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // With WAL, NORMAL still keeps each committed batch intact.
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    // SQLite leaves foreign keys off unless asked.
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations()
        .to_latest(conn)
        .map_err(|e| StorageError::Migration(e.to_string()))?;

    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version != SCHEMA_VERSION {
        return Err(StorageError::Migration(format!(
            "database is at schema version {}, expected {}",
            version, SCHEMA_VERSION
        )));
    }

    let name: String = conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'database'",
        [],
        |row| row.get(0),
    )?;
    if name != DATABASE_NAME {
        return Err(StorageError::Migration(format!(
            "database is named '{}', expected '{}'",
            name, DATABASE_NAME
        )));
    }
    Ok(())
}

/// Quoted SQL identifier for an entity table. Only valid type names are
/// accepted, so the quoting never needs escaping.
pub(crate) fn table_ident(name: &str) -> Result<String, StorageError> {
    if !is_valid_type_name(name) {
        return Err(StorageError::UnknownTable {
            name: name.to_string(),
        });
    }
    Ok(format!("\"{}\"", name))
}

/// Creates the table for `name` if missing and records it in the registry.
pub(crate) fn ensure_entity_table(conn: &Connection, name: &str) -> Result<(), StorageError> {
    let ident = table_ident(name)?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY NOT NULL,
            row_json TEXT NOT NULL
        );",
        ident
    ))?;
    conn.execute(
        "INSERT OR IGNORE INTO entity_tables (name) VALUES (?1)",
        params![name],
    )?;
    Ok(())
}

/// Every table name recorded in the registry, in creation order.
pub(crate) fn registered_tables(conn: &Connection) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare_cached("SELECT name FROM entity_tables ORDER BY rowid")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}
