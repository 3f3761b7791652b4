//! Property tests: both table backends apply the same batches to the same
//! rows.

use proptest::prelude::*;
use serde_json::json;

use outline_storage::{InMemoryTables, Row, SqliteTables, TableOp, TableStore};

const TABLES: [&str; 2] = ["Node", "Config"];

fn arb_op() -> impl Strategy<Value = TableOp> {
    let table = prop::sample::select(TABLES.to_vec()).prop_map(str::to_string);
    let id = prop::sample::select(vec!["a", "b", "c", "d"]).prop_map(str::to_string);
    prop_oneof![
        (table.clone(), id.clone(), "[a-z]{0,6}").prop_map(|(table, id, label)| {
            let row: Row = json!({"id": id, "label": label})
                .as_object()
                .cloned()
                .unwrap_or_default();
            TableOp::Put { table, row }
        }),
        (table.clone(), id.clone(), "[a-z]{0,6}").prop_map(|(table, id, label)| {
            TableOp::Merge {
                table,
                id,
                column: "label".to_string(),
                value: json!(label),
            }
        }),
        (table, id).prop_map(|(table, id)| TableOp::Delete { table, id }),
    ]
}

fn dump<S: TableStore>(tables: &S) -> Vec<Vec<Row>> {
    TABLES
        .iter()
        .map(|name| tables.read_table(name).unwrap())
        .collect()
}

proptest! {
    #[test]
    fn memory_and_sqlite_agree(batches in prop::collection::vec(prop::collection::vec(arb_op(), 0..8), 0..6)) {
        let mut memory = InMemoryTables::new();
        let mut sqlite = SqliteTables::in_memory().unwrap();
        memory.open_tables(&TABLES).unwrap();
        sqlite.open_tables(&TABLES).unwrap();

        for batch in &batches {
            memory.write_batch(batch).unwrap();
            sqlite.write_batch(batch).unwrap();
        }

        prop_assert_eq!(dump(&memory), dump(&sqlite));
    }
}
