//! Live entity graph for the outline: typed entities with edge collections,
//! explicit change patches, and the snapshot codec used for persistence.
//!
//! # Modules
//!
//! - [`id`]: EntityId and SubscriptionId newtypes
//! - [`error`]: CoreError, split into lookup and schema failures
//! - [`schema`]: entity type registry
//! - [`value`]: property values, rich content, edge maps
//! - [`entity`]: the live entity record
//! - [`patch`]: Patch, PatchOp, PatchPath and the listener fan-out
//! - [`store`]: EntityStore, the only mutation surface
//! - [`snapshot`]: plain-value codec and store fingerprints
//! - [`outline`]: Node/Config model, initialization and tree operations

pub mod entity;
pub mod error;
pub mod id;
pub mod outline;
pub mod patch;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod value;

// Re-export commonly used types
pub use entity::Entity;
pub use error::CoreError;
pub use id::{EntityId, SubscriptionId};
pub use outline::{initialize, outline_registry, InitOutcome, NodeSummary};
pub use patch::{Patch, PatchListener, PatchOp, PatchPath};
pub use schema::{EntitySchema, PropertyKind, SchemaRegistry};
pub use snapshot::StoreSnapshot;
pub use store::{DanglingEdge, EntityStore};
pub use value::{Content, ContentSummary, EdgeMap, PropertyValue};
