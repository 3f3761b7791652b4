//! Core error types for outline-core.
//!
//! Uses `thiserror` for structured, matchable error variants. Variants fall
//! into two classes: lookup failures (a referenced entity does not exist)
//! and schema failures (the request does not fit the registered types).
//! [`CoreError::is_lookup`] and [`CoreError::is_schema`] expose that split.

use thiserror::Error;

use crate::id::EntityId;
use crate::schema::PropertyKind;

/// Core errors produced by the outline-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No entity with this id exists in the partition.
    #[error("entity not found: {type_name}/{id}")]
    EntityNotFound { type_name: String, id: EntityId },

    /// An edge was requested towards an id that no partition contains.
    #[error("edge target not found: {id}")]
    EdgeTargetNotFound { id: EntityId },

    /// The entity type is not registered.
    #[error("unknown entity type: '{type_name}'")]
    UnknownType { type_name: String },

    /// A type name cannot be used as a table name.
    #[error("invalid type name: '{name}'")]
    InvalidTypeName { name: String },

    /// A type with the same name is already registered.
    #[error("duplicate entity type: '{type_name}'")]
    DuplicateType { type_name: String },

    /// The property is not part of the type's schema.
    #[error("unknown property '{property}' on type '{type_name}'")]
    UnknownProperty { type_name: String, property: String },

    /// The value does not match the property's declared kind.
    #[error("property '{type_name}.{property}' expects {expected}, got {found}")]
    PropertyKind {
        type_name: String,
        property: String,
        expected: PropertyKind,
        found: PropertyKind,
    },

    /// The edge tag is not allowed for the type.
    #[error("unknown edge tag '{tag}' on type '{type_name}'")]
    UnknownEdgeTag { type_name: String, tag: String },

    /// An entity with this id already exists in the partition.
    #[error("duplicate entity: {type_name}/{id}")]
    DuplicateEntity { type_name: String, id: EntityId },

    /// A patch carried an op other than add, replace or remove.
    #[error("unknown patch op '{op}'")]
    UnknownPatchOp { op: String },

    /// A patch path did not decompose into type, id and optional property.
    #[error("invalid patch path '{path}'")]
    InvalidPatchPath { path: String },

    /// A structural edit that would break the outline (cycles, root removal).
    #[error("invalid operation: {reason}")]
    InvalidOperation { reason: String },

    /// A plain value could not be decoded into the live model.
    #[error("invalid snapshot: {reason}")]
    InvalidSnapshot { reason: String },
}

impl CoreError {
    /// True for references to ids that do not exist.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            CoreError::EntityNotFound { .. } | CoreError::EdgeTargetNotFound { .. }
        )
    }

    /// True for configuration or programming defects.
    pub fn is_schema(&self) -> bool {
        !self.is_lookup()
    }
}
