//! The outline model: `Node` and `Config` types and the operations the UI
//! performs on them.
//!
//! Nodes form a tree through paired `child`/`parent` edges and may carry
//! further non-tree edges. The singleton config record `graph` names the
//! root node under its `rootNodeId` item.

use serde_json::json;

use crate::error::CoreError;
use crate::id::EntityId;
use crate::schema::{EntitySchema, PropertyKind, SchemaRegistry};
use crate::store::EntityStore;
use crate::value::{Content, ContentSummary};

pub const NODE: &str = "Node";
pub const CONFIG: &str = "Config";

pub const LABEL: &str = "label";
pub const CONTENT: &str = "content";
pub const EDGE_MAP: &str = "edgeMap";
pub const ITEMS: &str = "items";

pub const CHILD: &str = "child";
pub const PARENT: &str = "parent";

/// Id of the config record holding graph-level settings.
pub const GRAPH_CONFIG_ID: &str = "graph";
/// Config item naming the root node.
pub const ROOT_NODE_ID: &str = "rootNodeId";
/// Label given to a freshly created root.
pub const ROOT_LABEL: &str = "Root";

/// The built-in registry: `Node` and `Config`.
pub fn outline_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    let node = EntitySchema::new(NODE)
        .map(|s| {
            s.with_property(LABEL, PropertyKind::Text)
                .with_property(CONTENT, PropertyKind::Content)
                .with_property(EDGE_MAP, PropertyKind::Edges)
                .with_edge_tag(CHILD)
                .with_edge_tag(PARENT)
        })
        .and_then(|s| registry.register(s));
    let config = EntitySchema::new(CONFIG)
        .map(|s| s.with_property(ITEMS, PropertyKind::Items))
        .and_then(|s| registry.register(s));
    debug_assert!(node.is_ok() && config.is_ok());
    registry
}

/// Result of [`initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    /// The root node id named by the config record, if any.
    pub root: Option<EntityId>,
    /// Whether this call created the root and config.
    pub created: bool,
}

/// Ensures the root node and the `graph` config record exist.
///
/// Idempotent: when the config record is present nothing is created, even
/// if its root reference is missing.
pub fn initialize(store: &mut EntityStore) -> Result<InitOutcome, CoreError> {
    if store.contains(CONFIG, GRAPH_CONFIG_ID) {
        return Ok(InitOutcome {
            root: store.root_node_id(),
            created: false,
        });
    }

    let root = store.create_entity(NODE, json!({ LABEL: ROOT_LABEL }))?;
    store.create_entity(
        CONFIG,
        json!({
            "id": GRAPH_CONFIG_ID,
            ITEMS: { ROOT_NODE_ID: root.as_str() },
        }),
    )?;
    Ok(InitOutcome {
        root: Some(root),
        created: true,
    })
}

/// Display summary of a node: label if set, otherwise its content, with
/// the id as the last resort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    pub primary: String,
    pub secondary: Option<String>,
}

impl EntityStore {
    /// Id stored under `Config["graph"].items.rootNodeId`.
    pub fn root_node_id(&self) -> Option<EntityId> {
        self.find(CONFIG, GRAPH_CONFIG_ID)
            .and_then(|c| c.item(ITEMS, ROOT_NODE_ID))
            .map(EntityId::from)
    }

    /// The root node id, provided the node exists.
    pub fn root_node(&self) -> Option<EntityId> {
        self.root_node_id().filter(|id| self.contains(NODE, id.as_str()))
    }

    /// Creates a node under `parent` and links it both ways.
    pub fn create_child(&mut self, parent: &str, label: &str) -> Result<EntityId, CoreError> {
        self.get(NODE, parent)?;
        let child = self.create_entity(NODE, json!({ LABEL: label }))?;
        self.add_edge(CHILD, NODE, parent, &child)?;
        self.add_edge(PARENT, NODE, child.as_str(), &EntityId::from(parent))?;
        Ok(child)
    }

    pub fn children(&self, node: &str) -> Result<&[EntityId], CoreError> {
        Ok(self.get(NODE, node)?.edges(CHILD))
    }

    pub fn child_count(&self, node: &str) -> Result<usize, CoreError> {
        self.children(node).map(<[EntityId]>::len)
    }

    pub fn parents(&self, node: &str) -> Result<&[EntityId], CoreError> {
        Ok(self.get(NODE, node)?.edges(PARENT))
    }

    /// Moves `node` from under `from` to under `to`, at `index` among `to`'s
    /// children (appended when `None`).
    pub fn move_node(
        &mut self,
        node: &str,
        from: &str,
        to: &str,
        index: Option<usize>,
    ) -> Result<(), CoreError> {
        let node_id = EntityId::from(node);
        if node == to || self.is_descendant(to, node)? {
            return Err(CoreError::InvalidOperation {
                reason: format!("cannot move {} under its own subtree", node),
            });
        }
        if !self.children(from)?.contains(&node_id) {
            return Err(CoreError::EntityNotFound {
                type_name: NODE.to_string(),
                id: node_id,
            });
        }
        self.get(NODE, to)?;

        self.remove_edge(CHILD, NODE, from, &node_id)?;
        self.remove_edge(PARENT, NODE, node, &EntityId::from(from))?;
        self.insert_edge(CHILD, NODE, to, &node_id, index.unwrap_or(usize::MAX))?;
        self.add_edge(PARENT, NODE, node, &EntityId::from(to))?;
        Ok(())
    }

    /// Whether `candidate` sits somewhere below `ancestor`.
    pub fn is_descendant(&self, candidate: &str, ancestor: &str) -> Result<bool, CoreError> {
        let mut stack: Vec<&EntityId> = self.children(ancestor)?.iter().collect();
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if id.as_str() == candidate {
                return Ok(true);
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.find(NODE, id.as_str()) {
                stack.extend(node.edges(CHILD));
            }
        }
        Ok(false)
    }

    /// Unlinks `node` from every node that references it, then removes it.
    ///
    /// Any `child` or `parent` edge targeting the node is dropped, including
    /// one-sided links made with `add_edge`. Children are not deleted; they
    /// keep any other parents they have.
    pub fn delete_node(&mut self, node: &str) -> Result<(), CoreError> {
        if self.root_node_id().is_some_and(|r| r.as_str() == node) {
            return Err(CoreError::InvalidOperation {
                reason: "the root node cannot be deleted".to_string(),
            });
        }
        let node_id = self.get(NODE, node)?.id().clone();

        let mut referrers: Vec<(EntityId, String)> = Vec::new();
        for entity in self.partition(NODE)?.values() {
            if entity.id() == &node_id {
                continue;
            }
            let Some(edges) = entity.edge_map() else {
                continue;
            };
            for (tag, targets) in edges.iter() {
                if targets.contains(&node_id) {
                    referrers.push((entity.id().clone(), tag.to_string()));
                }
            }
        }
        for (source, tag) in &referrers {
            self.remove_edge(tag, NODE, source.as_str(), &node_id)?;
        }
        self.remove_entity(NODE, node)?;
        Ok(())
    }

    pub fn set_label(&mut self, node: &str, label: &str) -> Result<(), CoreError> {
        self.set_property(NODE, node, LABEL, label)
    }

    pub fn set_content(&mut self, node: &str, content: Content) -> Result<(), CoreError> {
        self.set_property(NODE, node, CONTENT, content)
    }

    /// Primary/secondary display text for a node.
    pub fn node_summary(&self, node: &str) -> Result<NodeSummary, CoreError> {
        let entity = self.get(NODE, node)?;
        let label = entity.text(LABEL).unwrap_or("");
        let summary = if label.is_empty() {
            entity
                .get(CONTENT)
                .and_then(|v| v.as_content())
                .map(Content::summary)
                .unwrap_or_default()
        } else {
            Content::Plain(label.to_string()).summary()
        };
        let ContentSummary { primary, secondary } = summary;
        Ok(NodeSummary {
            primary: primary
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| entity.id().to_string()),
            secondary,
        })
    }
}
