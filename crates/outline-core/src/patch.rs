//! Change patches and the emitter that fans them out to listeners.
//!
//! Every committed mutation of the [`EntityStore`](crate::store::EntityStore)
//! produces exactly one [`Patch`], delivered synchronously to every
//! registered [`PatchListener`] before the mutating call returns. Patches
//! are not deduplicated or coalesced here; that is the consumer's job.
//!
//! The wire form follows JSON patch:
//! `{"op": "replace", "path": "/Node/<id>/label", "value": "..."}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::id::{EntityId, SubscriptionId};

/// The kind of mutation a patch describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

impl PatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchOp::Add => "add",
            PatchOp::Replace => "replace",
            PatchOp::Remove => "remove",
        }
    }
}

impl FromStr for PatchOp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(PatchOp::Add),
            "replace" => Ok(PatchOp::Replace),
            "remove" => Ok(PatchOp::Remove),
            other => Err(CoreError::UnknownPatchOp {
                op: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for PatchOp {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a patch: `/typeName/id[/property]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PatchPath {
    pub type_name: String,
    pub id: EntityId,
    pub property: Option<String>,
}

impl PatchPath {
    pub fn entity(type_name: &str, id: &EntityId) -> Self {
        PatchPath {
            type_name: type_name.to_string(),
            id: id.clone(),
            property: None,
        }
    }

    pub fn property(type_name: &str, id: &EntityId, property: &str) -> Self {
        PatchPath {
            type_name: type_name.to_string(),
            id: id.clone(),
            property: Some(property.to_string()),
        }
    }
}

impl fmt::Display for PatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.type_name, self.id)?;
        if let Some(prop) = &self.property {
            write!(f, "/{}", prop)?;
        }
        Ok(())
    }
}

impl FromStr for PatchPath {
    type Err = CoreError;

    /// Segments past the property (e.g. an index into an edge list) are
    /// ignored: the whole property is re-read when the patch is applied.
    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidPatchPath {
            path: path.to_string(),
        };
        let rest = path.strip_prefix('/').ok_or_else(invalid)?;
        let mut segments = rest.split('/');
        let type_name = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let id = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let property = segments.next().filter(|s| !s.is_empty());
        Ok(PatchPath {
            type_name: type_name.to_string(),
            id: EntityId::from(id),
            property: property.map(str::to_string),
        })
    }
}

impl TryFrom<String> for PatchPath {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PatchPath> for String {
    fn from(path: PatchPath) -> Self {
        path.to_string()
    }
}

/// One committed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: PatchPath,
    /// Value at commit time. Consumers that apply patches later should read
    /// the live value instead, since this one may be stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Patch {
    pub fn add(type_name: &str, id: &EntityId, snapshot: Value) -> Self {
        Patch {
            op: PatchOp::Add,
            path: PatchPath::entity(type_name, id),
            value: Some(snapshot),
        }
    }

    pub fn replace(type_name: &str, id: &EntityId, property: &str, value: Value) -> Self {
        Patch {
            op: PatchOp::Replace,
            path: PatchPath::property(type_name, id, property),
            value: Some(value),
        }
    }

    pub fn remove(type_name: &str, id: &EntityId) -> Self {
        Patch {
            op: PatchOp::Remove,
            path: PatchPath::entity(type_name, id),
            value: None,
        }
    }

    /// Decodes the JSON wire form. Unknown ops and malformed paths are
    /// schema errors.
    pub fn from_json(value: Value) -> Result<Self, CoreError> {
        let op = value
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::UnknownPatchOp {
                op: value.get("op").map(Value::to_string).unwrap_or_default(),
            })?
            .parse::<PatchOp>()?;
        let path = value
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::InvalidPatchPath {
                path: value.get("path").map(Value::to_string).unwrap_or_default(),
            })?
            .parse::<PatchPath>()?;
        Ok(Patch {
            op,
            path,
            value: value.get("value").cloned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Receives patches synchronously, in mutation order.
pub trait PatchListener: Send {
    fn on_patch(&mut self, patch: &Patch);
}

impl<F> PatchListener for F
where
    F: FnMut(&Patch) + Send,
{
    fn on_patch(&mut self, patch: &Patch) {
        self(patch)
    }
}

/// Registry of listeners plus the fan-out.
#[derive(Default)]
pub struct PatchEmitter {
    listeners: Vec<(SubscriptionId, Box<dyn PatchListener>)>,
    next_id: u64,
    emitted: u64,
}

impl PatchEmitter {
    pub fn new() -> Self {
        PatchEmitter::default()
    }

    pub fn subscribe(&mut self, listener: Box<dyn PatchListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Detaches a listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        before != self.listeners.len()
    }

    pub fn emit(&mut self, patch: Patch) {
        self.emitted += 1;
        for (_, listener) in &mut self.listeners {
            listener.on_patch(&patch);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Total patches emitted since construction.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl fmt::Debug for PatchEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchEmitter")
            .field("listeners", &self.listeners.len())
            .field("emitted", &self.emitted)
            .finish()
    }
}
