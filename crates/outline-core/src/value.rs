//! Property values held by live entities.
//!
//! [`PropertyValue`] is the tagged union over the four [`PropertyKind`]s.
//! Every value converts to and from a plain `serde_json::Value`, which is the
//! form used in snapshots, patches and stored rows. Edge collections are
//! plain arrays of ids, never nested entities, so a cyclic graph always
//! serializes to a finite value.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::EntityId;
use crate::schema::PropertyKind;

/// A live property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    Content(Content),
    Items(IndexMap<String, String>),
    Edges(EdgeMap),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Text(_) => PropertyKind::Text,
            PropertyValue::Content(_) => PropertyKind::Content,
            PropertyValue::Items(_) => PropertyKind::Items,
            PropertyValue::Edges(_) => PropertyKind::Edges,
        }
    }

    /// Plain form of the value.
    pub fn to_plain(&self) -> Value {
        match self {
            PropertyValue::Text(s) => Value::String(s.clone()),
            PropertyValue::Content(c) => c.to_plain(),
            PropertyValue::Items(items) => Value::Object(
                items
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
            PropertyValue::Edges(edges) => edges.to_plain(),
        }
    }

    /// Decodes a plain value as `kind`. The error is a human-readable reason.
    pub fn from_plain(kind: PropertyKind, value: &Value) -> Result<Self, String> {
        match kind {
            PropertyKind::Text => match value {
                Value::String(s) => Ok(PropertyValue::Text(s.clone())),
                other => Err(format!("expected string, got {}", plain_type(other))),
            },
            PropertyKind::Content => Content::from_plain(value).map(PropertyValue::Content),
            PropertyKind::Items => {
                let map = value
                    .as_object()
                    .ok_or_else(|| format!("expected mapping, got {}", plain_type(value)))?;
                let mut items = IndexMap::new();
                for (k, v) in map {
                    let s = v
                        .as_str()
                        .ok_or_else(|| format!("item '{}' is not a string", k))?;
                    items.insert(k.clone(), s.to_string());
                }
                Ok(PropertyValue::Items(items))
            }
            PropertyKind::Edges => EdgeMap::from_plain(value).map(PropertyValue::Edges),
        }
    }

    /// Converts to `kind` where the conversion is lossless: a text value
    /// becomes plain content. Other mismatches return `None`.
    pub fn coerce(self, kind: PropertyKind) -> Option<Self> {
        match (self, kind) {
            (v, k) if v.kind() == k => Some(v),
            (PropertyValue::Text(s), PropertyKind::Content) => {
                Some(PropertyValue::Content(Content::Plain(s)))
            }
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_content(&self) -> Option<&Content> {
        match self {
            PropertyValue::Content(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_items(&self) -> Option<&IndexMap<String, String>> {
        match self {
            PropertyValue::Items(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_edges(&self) -> Option<&EdgeMap> {
        match self {
            PropertyValue::Edges(edges) => Some(edges),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

impl From<Content> for PropertyValue {
    fn from(c: Content) -> Self {
        PropertyValue::Content(c)
    }
}

fn plain_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Content supplied by the label/rich-text editor.
///
/// The store only detects which variant it received. A rich document is kept
/// verbatim as long as it carries a `blocks` sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Plain(String),
    Rich(Map<String, Value>),
}

/// Two-line summary of a piece of content, as shown in a list row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentSummary {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

impl Content {
    pub fn from_plain(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(Content::Plain(s.clone())),
            Value::Object(map) if map.get("blocks").is_some_and(Value::is_array) => {
                Ok(Content::Rich(map.clone()))
            }
            Value::Object(_) => Err("rich content must contain a 'blocks' sequence".to_string()),
            other => Err(format!(
                "expected string or rich document, got {}",
                plain_type(other)
            )),
        }
    }

    pub fn to_plain(&self) -> Value {
        match self {
            Content::Plain(s) => Value::String(s.clone()),
            Content::Rich(map) => Value::Object(map.clone()),
        }
    }

    pub fn is_rich(&self) -> bool {
        matches!(self, Content::Rich(_))
    }

    /// Plain text: first line is primary, the rest secondary. A leading
    /// newline does not split. Rich text: the first two non-empty blocks.
    pub fn summary(&self) -> ContentSummary {
        match self {
            Content::Plain(text) => match text.find('\n') {
                Some(idx) if idx > 0 => ContentSummary {
                    primary: Some(text[..idx].to_string()),
                    secondary: Some(text[idx + 1..].to_string()),
                },
                _ => ContentSummary {
                    primary: Some(text.clone()),
                    secondary: None,
                },
            },
            Content::Rich(map) => {
                let mut summary = ContentSummary::default();
                let blocks = map.get("blocks").and_then(Value::as_array);
                for block in blocks.into_iter().flatten() {
                    let text = block.get("text").and_then(Value::as_str).unwrap_or("");
                    if text.is_empty() {
                        continue;
                    }
                    if summary.primary.is_none() {
                        summary.primary = Some(text.to_string());
                    } else if summary.secondary.is_none() {
                        summary.secondary = Some(text.to_string());
                    } else {
                        break;
                    }
                }
                summary
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// Ordered edge collections keyed by tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeMap(IndexMap<String, Vec<EntityId>>);

impl EdgeMap {
    /// Ids under `tag`, in insertion order.
    pub fn get(&self, tag: &str) -> &[EntityId] {
        self.0.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn push(&mut self, tag: &str, id: EntityId) {
        self.0.entry(tag.to_string()).or_default().push(id);
    }

    /// Inserts at `index`, clamped to the list length.
    pub fn insert(&mut self, tag: &str, index: usize, id: EntityId) {
        let list = self.0.entry(tag.to_string()).or_default();
        let index = index.min(list.len());
        list.insert(index, id);
    }

    /// Removes every occurrence of `id` under `tag`. Returns whether any was
    /// present.
    pub fn remove(&mut self, tag: &str, id: &EntityId) -> bool {
        match self.0.get_mut(tag) {
            Some(list) => {
                let before = list.len();
                list.retain(|e| e != id);
                before != list.len()
            }
            None => false,
        }
    }

    pub fn contains(&self, tag: &str, id: &EntityId) -> bool {
        self.get(tag).contains(id)
    }

    pub fn count(&self, tag: &str) -> usize {
        self.get(tag).len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[EntityId])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn to_plain(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(tag, ids)| {
                    let ids = ids.iter().map(|id| Value::String(id.0.clone())).collect();
                    (tag.clone(), Value::Array(ids))
                })
                .collect(),
        )
    }

    pub fn from_plain(value: &Value) -> Result<Self, String> {
        let map = value
            .as_object()
            .ok_or_else(|| format!("expected edge mapping, got {}", plain_type(value)))?;
        let mut edges = EdgeMap::default();
        for (tag, ids) in map {
            let ids = ids
                .as_array()
                .ok_or_else(|| format!("edge tag '{}' is not a sequence", tag))?;
            let list = edges.0.entry(tag.clone()).or_default();
            for id in ids {
                let id = id
                    .as_str()
                    .ok_or_else(|| format!("edge tag '{}' holds a non-string id", tag))?;
                list.push(EntityId::from(id));
            }
        }
        Ok(edges)
    }
}
