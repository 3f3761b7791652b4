//! End-to-end tests for hydration, initialization and debounced flushing.
//!
//! Each test opens a [`Graph`] over a fresh [`InMemoryTables`] handle and
//! inspects the same handle afterwards, the way a reload would see the
//! database. Time is driven explicitly through `tick(now)` so debounce
//! behavior is deterministic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use outline_core::outline::{CHILD, CONFIG, NODE};
use outline_core::{CoreError, Patch};
use outline_storage::{
    FlushOutcome, Graph, InMemoryTables, PersistConfig, Row, SqliteTables, StorageError,
    TableOp, TableStore,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn config(flush_wait_ms: u64, buffer_limit: usize) -> PersistConfig {
    PersistConfig {
        flush_wait: Duration::from_millis(flush_wait_ms),
        buffer_limit,
        max_backoff: Duration::from_secs(30),
    }
}

fn later(ms: u64) -> Instant {
    Instant::now() + Duration::from_millis(ms)
}

fn row(v: Value) -> Row {
    v.as_object().cloned().unwrap()
}

/// Opens a graph and writes the initial root/config rows.
fn open_flushed(tables: &InMemoryTables, cfg: PersistConfig) -> Graph<InMemoryTables> {
    let mut graph = Graph::open(tables.clone(), cfg).unwrap();
    graph.flush().unwrap();
    graph
}

/// Table store whose writes can be made to fail on demand.
#[derive(Clone)]
struct FlakyTables {
    inner: InMemoryTables,
    failing: Arc<AtomicBool>,
}

impl FlakyTables {
    fn new() -> Self {
        FlakyTables {
            inner: InMemoryTables::new(),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl TableStore for FlakyTables {
    fn open_tables(&mut self, names: &[&str]) -> Result<(), StorageError> {
        self.inner.open_tables(names)
    }

    fn table_names(&self) -> Vec<String> {
        self.inner.table_names()
    }

    fn read_table(&self, name: &str) -> Result<Vec<Row>, StorageError> {
        self.inner.read_table(name)
    }

    fn get_row(&self, name: &str, id: &str) -> Result<Option<Row>, StorageError> {
        self.inner.get_row(name, id)
    }

    fn write_batch(&mut self, ops: &[TableOp]) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                reason: "quota exceeded".into(),
            });
        }
        self.inner.write_batch(ops)
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

#[test]
fn empty_store_gets_root_and_config_rows() {
    let tables = InMemoryTables::new();
    let mut graph = Graph::open(tables.clone(), config(1000, 1000)).unwrap();
    let root = graph.root().unwrap();

    assert_eq!(graph.pending(), 2);
    assert_eq!(tables.count(NODE).unwrap(), 0);

    let outcome = graph.tick(later(1500)).unwrap();
    assert_eq!(outcome, Some(FlushOutcome::Written { patches: 2, ops: 2 }));

    assert_eq!(tables.count(NODE).unwrap(), 1);
    assert_eq!(tables.count(CONFIG).unwrap(), 1);
    let node = tables.get_row(NODE, root.as_str()).unwrap().unwrap();
    assert_eq!(node["label"], "Root");
    let cfg = tables.get_row(CONFIG, "graph").unwrap().unwrap();
    assert_eq!(cfg["items"]["rootNodeId"], root.as_str());
}

#[test]
fn initialization_is_idempotent_across_reopen() {
    let tables = InMemoryTables::new();
    let first = open_flushed(&tables, config(1000, 1000));
    let root = first.root().unwrap();
    first.close().unwrap();

    let second = Graph::open(tables.clone(), config(1000, 1000)).unwrap();
    assert_eq!(second.root().unwrap(), root);
    assert_eq!(second.pending(), 0);
    assert_eq!(tables.count(NODE).unwrap(), 1);
    assert_eq!(tables.count(CONFIG).unwrap(), 1);
}

#[test]
fn hydration_emits_no_patches() {
    let tables = InMemoryTables::new();
    tables.seed_row(CONFIG, row(json!({"id": "graph", "items": {"rootNodeId": "r"}})));
    tables.seed_row(NODE, row(json!({"id": "r", "label": "Root"})));

    let graph = Graph::open(tables.clone(), config(1000, 1000)).unwrap();
    assert_eq!(graph.store().patches_emitted(), 0);
    assert_eq!(graph.pending(), 0);
    assert_eq!(graph.root().unwrap().as_str(), "r");
}

#[test]
fn hydration_does_not_depend_on_row_order() {
    let rows = vec![
        json!({"id": "r", "label": "Root", "edgeMap": {"child": ["b", "a"]}}),
        json!({"id": "a", "label": "A", "edgeMap": {"parent": ["r"]}}),
        json!({"id": "b", "label": "B", "edgeMap": {"parent": ["r"]}}),
    ];
    let forward = InMemoryTables::new();
    let backward = InMemoryTables::new();
    for r in &rows {
        forward.seed_row(NODE, row(r.clone()));
    }
    for r in rows.iter().rev() {
        backward.seed_row(NODE, row(r.clone()));
    }
    for t in [&forward, &backward] {
        t.seed_row(CONFIG, row(json!({"id": "graph", "items": {"rootNodeId": "r"}})));
    }

    let g1 = Graph::open(forward, config(1000, 1000)).unwrap();
    let g2 = Graph::open(backward, config(1000, 1000)).unwrap();
    assert_eq!(g1.store().fingerprint(), g2.store().fingerprint());
    let ids = |g: &Graph<InMemoryTables>| -> Vec<String> {
        g.store()
            .partition(NODE)
            .unwrap()
            .keys()
            .map(|id| id.to_string())
            .collect()
    };
    assert_eq!(ids(&g1), ids(&g2));
    assert_eq!(g1.store().children("r").unwrap().len(), 2);
}

#[test]
fn root_is_a_lookup_error_when_config_names_a_missing_node() {
    let tables = InMemoryTables::new();
    tables.seed_row(CONFIG, row(json!({"id": "graph", "items": {"rootNodeId": "gone"}})));

    let graph = Graph::open(tables.clone(), config(1000, 1000)).unwrap();
    assert_eq!(graph.pending(), 0);
    let err = graph.root().unwrap_err();
    assert!(err.is_lookup());
    assert!(err.to_string().contains("gone"));
}

// ---------------------------------------------------------------------------
// Patch application
// ---------------------------------------------------------------------------

#[test]
fn child_row_appears_after_flush_wait() {
    let tables = InMemoryTables::new();
    let mut graph = open_flushed(&tables, config(1000, 1000));
    let root = graph.root().unwrap();

    let a = graph.create_child(root.as_str(), "A").unwrap();
    assert_eq!(graph.pending(), 3);
    assert_eq!(graph.tick(Instant::now()).unwrap(), None);
    assert!(tables.get_row(NODE, a.as_str()).unwrap().is_none());

    graph.tick(later(1500)).unwrap();
    let child = tables.get_row(NODE, a.as_str()).unwrap().unwrap();
    assert_eq!(child["label"], "A");
    assert_eq!(child["edgeMap"]["parent"], json!([root.as_str()]));
    let parent = tables.get_row(NODE, root.as_str()).unwrap().unwrap();
    assert_eq!(parent["edgeMap"][CHILD], json!([a.as_str()]));
}

#[test]
fn removed_node_row_is_deleted() {
    let tables = InMemoryTables::new();
    let mut graph = open_flushed(&tables, config(1000, 1000));
    let root = graph.root().unwrap();
    let a = graph.create_child(root.as_str(), "A").unwrap();
    graph.flush().unwrap();
    assert!(tables.get_row(NODE, a.as_str()).unwrap().is_some());

    graph.delete_node(a.as_str()).unwrap();
    graph.tick(later(1500)).unwrap();

    assert!(tables.get_row(NODE, a.as_str()).unwrap().is_none());
    let parent = tables.get_row(NODE, root.as_str()).unwrap().unwrap();
    assert_eq!(parent["edgeMap"][CHILD], json!([]));
}

#[test]
fn entity_created_and_removed_within_one_batch_leaves_no_row() {
    let tables = InMemoryTables::new();
    let mut graph = open_flushed(&tables, config(1000, 1000));
    let root = graph.root().unwrap();

    let a = graph.create_child(root.as_str(), "A").unwrap();
    graph.set_label(a.as_str(), "renamed").unwrap();
    graph.delete_node(a.as_str()).unwrap();
    graph.flush().unwrap();

    assert!(tables.get_row(NODE, a.as_str()).unwrap().is_none());
    assert_eq!(tables.count(NODE).unwrap(), 1);
}

#[test]
fn removing_a_linked_node_clears_every_reference() {
    let tables = InMemoryTables::new();
    let mut graph = open_flushed(&tables, config(1000, 1000));
    let root = graph.root().unwrap();
    let a = graph.create_child(root.as_str(), "A").unwrap();
    let b = graph.create_child(a.as_str(), "B").unwrap();
    graph.link(root.as_str(), b.as_str(), CHILD).unwrap();
    graph.flush().unwrap();

    graph.delete_node(b.as_str()).unwrap();
    graph.flush().unwrap();

    assert!(graph.store().dangling_edges().is_empty());
    let parent = tables.get_row(NODE, root.as_str()).unwrap().unwrap();
    assert_eq!(parent["edgeMap"][CHILD], json!([a.as_str()]));
    let former_parent = tables.get_row(NODE, a.as_str()).unwrap().unwrap();
    assert_eq!(former_parent["edgeMap"][CHILD], json!([]));
}

#[test]
fn reopened_graph_matches_live_graph() {
    let tables = InMemoryTables::new();
    let mut graph = open_flushed(&tables, config(1000, 1000));
    let root = graph.root().unwrap();
    let a = graph.create_child(root.as_str(), "A").unwrap();
    let b = graph.create_child(root.as_str(), "B").unwrap();
    let c = graph.create_child(a.as_str(), "C").unwrap();
    graph.move_node(c.as_str(), a.as_str(), b.as_str(), None).unwrap();
    graph.set_label(a.as_str(), "A2").unwrap();
    graph.link(root.as_str(), c.as_str(), CHILD).unwrap();
    graph.delete_node(b.as_str()).unwrap();
    let live = graph.store().fingerprint();
    graph.close().unwrap();

    let reopened = Graph::open(tables.clone(), config(1000, 1000)).unwrap();
    assert_eq!(reopened.store().fingerprint(), live);
    assert!(reopened.store().dangling_edges().is_empty());
}

// ---------------------------------------------------------------------------
// Debounce and buffer limit
// ---------------------------------------------------------------------------

#[test]
fn patches_within_window_coalesce_into_one_batch() {
    let tables = InMemoryTables::new();
    let mut graph = open_flushed(&tables, config(1000, 100));
    let root = graph.root().unwrap();
    let batches = tables.batch_count();

    for i in 0..10 {
        graph.set_label(root.as_str(), &format!("v{}", i)).unwrap();
    }
    assert_eq!(tables.batch_count(), batches);

    let outcome = graph.tick(later(1500)).unwrap();
    assert_eq!(outcome, Some(FlushOutcome::Written { patches: 10, ops: 10 }));
    assert_eq!(tables.batch_count(), batches + 1);
    assert_eq!(
        tables.get_row(NODE, root.as_str()).unwrap().unwrap()["label"],
        "v9"
    );
    assert_eq!(graph.next_deadline(), None);
}

#[test]
fn exceeding_buffer_limit_flushes_immediately() {
    let tables = InMemoryTables::new();
    let mut graph = open_flushed(&tables, config(60_000, 5));
    let root = graph.root().unwrap();
    let batches = tables.batch_count();

    for i in 0..5 {
        graph.set_label(root.as_str(), &format!("v{}", i)).unwrap();
    }
    assert_eq!(graph.pending(), 5);
    assert_eq!(tables.batch_count(), batches);

    graph.set_label(root.as_str(), "v5").unwrap();
    assert_eq!(graph.pending(), 0);
    assert_eq!(tables.batch_count(), batches + 1);
    assert_eq!(graph.next_deadline(), None);
    assert_eq!(
        tables.get_row(NODE, root.as_str()).unwrap().unwrap()["label"],
        "v5"
    );
}

#[test]
fn each_patch_resets_the_deadline() {
    let tables = InMemoryTables::new();
    let mut graph = open_flushed(&tables, config(1000, 100));
    let root = graph.root().unwrap();

    graph.set_label(root.as_str(), "one").unwrap();
    let first = graph.next_deadline().unwrap();
    std::thread::sleep(Duration::from_millis(5));
    graph.set_label(root.as_str(), "two").unwrap();
    let second = graph.next_deadline().unwrap();
    assert!(second > first);
    assert_eq!(graph.tick(first).unwrap(), None);
    assert_eq!(graph.pending(), 2);
}

// ---------------------------------------------------------------------------
// Failure policy and shutdown
// ---------------------------------------------------------------------------

#[test]
fn failed_flush_keeps_patches_and_backs_off() {
    let tables = FlakyTables::new();
    let mut graph = Graph::open(tables.clone(), config(1000, 100)).unwrap();
    graph.flush().unwrap();
    let root = graph.root().unwrap();

    tables.set_failing(true);
    graph.set_label(root.as_str(), "x").unwrap();
    let t1 = later(1500);
    let retry_at = match graph.tick(t1).unwrap() {
        Some(FlushOutcome::Retained {
            patches, retry_at, ..
        }) => {
            assert_eq!(patches, 1);
            retry_at
        }
        other => panic!("expected retained flush, got {:?}", other),
    };
    assert_eq!(retry_at, t1 + Duration::from_millis(1000));
    assert_eq!(graph.pending(), 1);
    assert_eq!(graph.persistence().failures(), 1);
    assert_eq!(graph.next_deadline(), Some(retry_at));

    // Second failure doubles the delay.
    let retry_again = match graph.tick(retry_at).unwrap() {
        Some(FlushOutcome::Retained { retry_at, .. }) => retry_at,
        other => panic!("expected retained flush, got {:?}", other),
    };
    assert_eq!(retry_again, retry_at + Duration::from_millis(2000));
    assert_eq!(graph.tick(retry_at + Duration::from_millis(500)).unwrap(), None);

    tables.set_failing(false);
    let outcome = graph.tick(retry_again).unwrap();
    assert_eq!(outcome, Some(FlushOutcome::Written { patches: 1, ops: 1 }));
    assert_eq!(graph.persistence().failures(), 0);
    assert_eq!(graph.persistence().stats().failed_flushes, 2);
    let stored = tables.get_row(NODE, root.as_str()).unwrap().unwrap();
    assert_eq!(stored["label"], "x");
}

#[test]
fn retained_buffer_is_compacted_past_the_limit() {
    let tables = FlakyTables::new();
    let mut graph = Graph::open(tables.clone(), config(1000, 5)).unwrap();
    graph.flush().unwrap();
    let root = graph.root().unwrap();
    let a = graph.create_child(root.as_str(), "A").unwrap();
    graph.flush().unwrap();

    tables.set_failing(true);
    graph.set_label(a.as_str(), "x").unwrap();
    match graph.tick(later(1500)).unwrap() {
        Some(FlushOutcome::Retained { patches, .. }) => assert_eq!(patches, 1),
        other => panic!("expected retained flush, got {:?}", other),
    }

    for i in 0..100 {
        graph.set_label(root.as_str(), &format!("v{}", i)).unwrap();
        assert!(graph.pending() <= 6, "buffer grew to {}", graph.pending());
    }
    let b = graph.create_child(root.as_str(), "B").unwrap();
    graph.delete_node(b.as_str()).unwrap();
    assert!(graph.pending() <= 6);
    assert_eq!(graph.persistence().failures(), 1);

    tables.set_failing(false);
    assert!(matches!(graph.flush().unwrap(), FlushOutcome::Written { .. }));
    assert_eq!(graph.pending(), 0);
    let stored_root = tables.get_row(NODE, root.as_str()).unwrap().unwrap();
    assert_eq!(stored_root["label"], "v99");
    assert_eq!(stored_root["edgeMap"][CHILD], json!([a.as_str()]));
    assert_eq!(tables.get_row(NODE, a.as_str()).unwrap().unwrap()["label"], "x");
    assert!(tables.get_row(NODE, b.as_str()).unwrap().is_none());

    let live = graph.store().fingerprint();
    graph.close().unwrap();
    let reopened = Graph::open(tables.inner.clone(), config(1000, 5)).unwrap();
    assert_eq!(reopened.store().fingerprint(), live);
}

#[test]
fn close_flushes_pending_patches() {
    let tables = InMemoryTables::new();
    let mut graph = Graph::open(tables.clone(), config(60_000, 1000)).unwrap();
    let root = graph.root().unwrap();
    let a = graph.create_child(root.as_str(), "A").unwrap();
    graph.close().unwrap();

    assert!(tables.get_row(NODE, a.as_str()).unwrap().is_some());
    assert_eq!(tables.count(CONFIG).unwrap(), 1);
}

#[test]
fn drop_flushes_pending_patches() {
    let tables = InMemoryTables::new();
    let a = {
        let mut graph = Graph::open(tables.clone(), config(60_000, 1000)).unwrap();
        let root = graph.root().unwrap();
        graph.create_child(root.as_str(), "A").unwrap()
    };
    assert!(tables.get_row(NODE, a.as_str()).unwrap().is_some());
}

#[test]
fn close_reports_unwritten_patches() {
    let tables = FlakyTables::new();
    let graph = Graph::open(tables.clone(), config(60_000, 1000)).unwrap();
    tables.set_failing(true);
    let err = graph.close().unwrap_err();
    assert!(matches!(err, StorageError::Backend { .. }));
    assert!(err.to_string().contains("2 buffered patches"));
}

#[test]
fn lookup_errors_surface_without_breaking_persistence() {
    let tables = InMemoryTables::new();
    let mut graph = open_flushed(&tables, config(1000, 1000));

    let err = graph.set_label("missing", "x").unwrap_err();
    assert!(err.is_lookup());
    assert_eq!(graph.pending(), 0);

    let root = graph.root().unwrap();
    let err = graph.delete_node(root.as_str()).unwrap_err();
    assert!(matches!(
        err,
        StorageError::Core(CoreError::InvalidOperation { .. })
    ));
}

#[test]
fn unknown_patch_op_is_fatal() {
    let err = Patch::from_json(json!({"op": "move", "path": "/Node/x"})).unwrap_err();
    assert!(matches!(err, CoreError::UnknownPatchOp { .. }));
    let err = StorageError::from(err);
    assert!(!err.is_retryable());
    assert!(!err.is_lookup());
}

// ---------------------------------------------------------------------------
// SQLite backend
// ---------------------------------------------------------------------------

#[test]
fn sqlite_graph_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outline.db");
    let path = path.to_str().unwrap();

    let (root, a) = {
        let mut graph = Graph::open(SqliteTables::new(path).unwrap(), config(1000, 1000)).unwrap();
        let root = graph.root().unwrap();
        let a = graph.create_child(root.as_str(), "A").unwrap();
        graph.create_child(a.as_str(), "A.1").unwrap();
        graph.close().unwrap();
        (root, a)
    };

    let graph = Graph::open(SqliteTables::new(path).unwrap(), config(1000, 1000)).unwrap();
    assert_eq!(graph.root().unwrap(), root);
    assert_eq!(graph.pending(), 0);
    assert_eq!(graph.store().children(root.as_str()).unwrap(), &[a.clone()]);
    assert_eq!(graph.store().child_count(a.as_str()).unwrap(), 1);
    assert_eq!(graph.store().node_summary(a.as_str()).unwrap().primary, "A");
    assert_eq!(graph.tables().count(NODE).unwrap(), 3);
}
