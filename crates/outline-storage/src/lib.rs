//! Persistence for the outline entity graph.
//!
//! Provides the [`TableStore`] trait (one table per entity type, keyed by
//! id) with [`InMemoryTables`] and [`SqliteTables`] as first-class
//! backends, the debounced [`Persistence`] adapter, and [`Graph`], which
//! wires hydration, patch subscription and initialization together.
//!
//! # Architecture
//!
//! Reads happen once, at open, as a whole-store snapshot. Writes are
//! incremental: every committed mutation emits a patch, the adapter buffers
//! patches, and a flush converts the buffer into one atomic batch of row
//! puts, column merges and deletes.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: rows, TableOp, database constants
//! - [`traits`]: TableStore trait definition
//! - [`convert`]: tables to snapshot, patches to table ops
//! - [`memory`]: InMemoryTables implementation
//! - [`schema`]: SQL schema and migration setup
//! - [`sqlite`]: SqliteTables implementation
//! - [`persist`]: the debounced persistence adapter
//! - [`graph`]: Graph, the construction point and shutdown hook

pub mod convert;
pub mod error;
pub mod graph;
pub mod memory;
pub mod persist;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use error::StorageError;
pub use graph::Graph;
pub use memory::InMemoryTables;
pub use persist::{FlushOutcome, PersistConfig, PersistState, PersistStats, Persistence};
pub use sqlite::SqliteTables;
pub use traits::TableStore;
pub use types::{Row, TableOp, DATABASE_NAME, SCHEMA_VERSION};
