//! [`Graph`]: the single construction point for a persisted outline.
//!
//! Opening a graph hydrates the entity store from the table store,
//! subscribes the persistence adapter, and runs outline initialization, in
//! that order. Subscribing before initialization means a freshly created
//! root and config record are persisted like any other mutation.
//!
//! All mutations go through [`Graph::mutate`] (or the outline helpers built
//! on it) so the adapter sees each patch as soon as it is emitted. Closing
//! or dropping the graph flushes whatever is still buffered.

use std::time::Instant;

use tracing::{info, warn};

use outline_core::{
    initialize, outline_registry, Content, CoreError, EntityId, EntityStore, PatchListener,
    SchemaRegistry, SubscriptionId,
};

use crate::error::StorageError;
use crate::persist::{FlushOutcome, PersistConfig, Persistence};
use crate::traits::TableStore;

/// A live, persisted entity graph.
pub struct Graph<S: TableStore> {
    store: EntityStore,
    persistence: Persistence<S>,
    closed: bool,
}

impl<S: TableStore> Graph<S> {
    /// Opens the outline graph over `tables`.
    pub fn open(tables: S, config: PersistConfig) -> Result<Self, StorageError> {
        Self::open_with_registry(tables, config, outline_registry())
    }

    /// Opens a graph with a custom type registry. Initialization runs only
    /// when the registry has the outline types.
    pub fn open_with_registry(
        tables: S,
        config: PersistConfig,
        registry: SchemaRegistry,
    ) -> Result<Self, StorageError> {
        let mut store = EntityStore::new(registry);
        let mut persistence = Persistence::new(tables, config);

        persistence.hydrate(&mut store)?;
        persistence.subscribe(&mut store)?;

        let outline_types = [outline_core::outline::NODE, outline_core::outline::CONFIG];
        if outline_types.iter().all(|t| store.registry().contains(t)) {
            let outcome = initialize(&mut store).map_err(|e| StorageError::Initialization {
                reason: format!("could not create root and config: {}", e),
            })?;
            if outcome.created {
                info!(root = ?outcome.root, "initialized empty outline");
            }
        }

        let mut graph = Graph {
            store,
            persistence,
            closed: false,
        };
        graph.pump(Instant::now())?;
        Ok(graph)
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn persistence(&self) -> &Persistence<S> {
        &self.persistence
    }

    pub fn tables(&self) -> &S {
        self.persistence.tables()
    }

    /// The root node, as named by the config record. Fails with a lookup
    /// error when the config names no root or a node that does not exist.
    pub fn root(&self) -> Result<EntityId, StorageError> {
        if let Some(root) = self.store.root_node() {
            return Ok(root);
        }
        let id = self
            .store
            .root_node_id()
            .unwrap_or_else(|| EntityId::from(outline_core::outline::ROOT_NODE_ID));
        Err(StorageError::Core(CoreError::EntityNotFound {
            type_name: outline_core::outline::NODE.to_string(),
            id,
        }))
    }

    /// Adds a listener alongside the persistence adapter.
    pub fn subscribe(&mut self, listener: Box<dyn PatchListener>) -> SubscriptionId {
        self.store.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Runs `f` against the store, then hands its patches to the adapter.
    ///
    /// Patches emitted before `f` fails are still buffered: each one
    /// describes a mutation that was committed.
    pub fn mutate<T>(
        &mut self,
        f: impl FnOnce(&mut EntityStore) -> Result<T, CoreError>,
    ) -> Result<T, StorageError> {
        let result = f(&mut self.store);
        self.pump(Instant::now())?;
        Ok(result?)
    }

    pub fn create_child(&mut self, parent: &str, label: &str) -> Result<EntityId, StorageError> {
        self.mutate(|s| s.create_child(parent, label))
    }

    pub fn set_label(&mut self, node: &str, label: &str) -> Result<(), StorageError> {
        self.mutate(|s| s.set_label(node, label))
    }

    pub fn set_content(&mut self, node: &str, content: Content) -> Result<(), StorageError> {
        self.mutate(|s| s.set_content(node, content))
    }

    pub fn move_node(
        &mut self,
        node: &str,
        from: &str,
        to: &str,
        index: Option<usize>,
    ) -> Result<(), StorageError> {
        self.mutate(|s| s.move_node(node, from, to, index))
    }

    pub fn delete_node(&mut self, node: &str) -> Result<(), StorageError> {
        self.mutate(|s| s.delete_node(node))
    }

    /// Adds a `tag` edge between two nodes.
    pub fn link(&mut self, from: &str, to: &str, tag: &str) -> Result<(), StorageError> {
        self.mutate(|s| {
            s.add_edge(tag, outline_core::outline::NODE, from, &EntityId::from(to))
        })
    }

    // -----------------------------------------------------------------------
    // Flushing
    // -----------------------------------------------------------------------

    /// Lets the adapter act on time passing. Call when
    /// [`next_deadline`](Self::next_deadline) is reached.
    pub fn tick(&mut self, now: Instant) -> Result<Option<FlushOutcome>, StorageError> {
        self.pump(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.persistence.next_deadline()
    }

    pub fn pending(&self) -> usize {
        self.persistence.pending()
    }

    /// Writes everything buffered now.
    pub fn flush(&mut self) -> Result<FlushOutcome, StorageError> {
        self.persistence.flush(&self.store)
    }

    /// Flushes and tears down. Fails if buffered patches could not be
    /// written.
    pub fn close(mut self) -> Result<(), StorageError> {
        self.closed = true;
        let outcome = self.persistence.flush(&self.store);
        self.persistence.unsubscribe(&mut self.store);
        match outcome? {
            FlushOutcome::Retained {
                patches, reason, ..
            } => Err(StorageError::Backend {
                reason: format!("{} buffered patches not written: {}", patches, reason),
            }),
            FlushOutcome::Empty | FlushOutcome::Written { .. } => {
                info!("closed graph");
                Ok(())
            }
        }
    }

    fn pump(&mut self, now: Instant) -> Result<Option<FlushOutcome>, StorageError> {
        self.persistence.poll(&self.store, now)
    }
}

impl<S: TableStore> Drop for Graph<S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match self.persistence.flush(&self.store) {
            Ok(FlushOutcome::Retained { patches, .. }) => {
                warn!(patches, "graph dropped with unwritten patches")
            }
            Err(e) => warn!(error = %e, "flush on drop failed"),
            Ok(_) => {}
        }
    }
}
