//! Outline CLI.
//!
//! Provides the `outline` binary for inspecting and editing an outline
//! stored in a SQLite database. One-shot subcommands open the graph, apply
//! a single change and flush on exit; `shell` keeps the graph open and lets
//! the debounce timer decide when to write.
//!
//! Reads configuration from environment variables:
//! - `OUTLINE_DB_PATH`: SQLite database file path (default: "outline.db")
//! - `OUTLINE_FLUSH_WAIT_MS`, `OUTLINE_BUFFER_LIMIT`,
//!   `OUTLINE_MAX_BACKOFF_MS`: persistence tuning

mod shell;

use std::collections::HashSet;
use std::process;

use clap::{Parser, Subcommand};

use outline_core::outline::NODE;
use outline_core::{Content, EntityId};
use outline_storage::{Graph, PersistConfig, SqliteTables, StorageError, TableStore};

/// Outline database tools.
#[derive(Parser)]
#[command(name = "outline", about = "Inspect and edit a persisted outline")]
struct Cli {
    /// Path to the database file (default: $OUTLINE_DB_PATH or outline.db).
    #[arg(long, global = true)]
    db: Option<String>,

    /// Log lifecycle events to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Show table sizes, the root id and the store fingerprint.
    Status,
    /// Print the node tree.
    Tree {
        /// Node to start from (default: root).
        #[arg(long)]
        root: Option<String>,
    },
    /// Create a node.
    Add {
        label: String,
        /// Parent node (default: root).
        #[arg(long)]
        parent: Option<String>,
    },
    /// Set a node's label.
    Label { id: String, text: String },
    /// Set a node's content.
    Content {
        id: String,
        /// Plain text content.
        #[arg(long, conflicts_with = "json", required_unless_present = "json")]
        text: Option<String>,
        /// Rich document as JSON, e.g. '{"blocks": [...]}'.
        #[arg(long)]
        json: Option<String>,
    },
    /// Move a node to a new parent.
    Mv {
        id: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// Position among the new parent's children (default: last).
        #[arg(long)]
        index: Option<usize>,
    },
    /// Delete a node.
    Rm { id: String },
    /// Add an edge between two nodes.
    Link {
        from: String,
        to: String,
        #[arg(long, default_value = "child")]
        tag: String,
    },
    /// Print the whole store as JSON.
    Dump,
    /// Interactive mode; changes are written on the debounce timer.
    Shell {
        /// Print every patch as it is emitted.
        #[arg(long)]
        echo_patches: bool,
    },
}

/// Why a command failed, mapped to the process exit code.
#[derive(Debug)]
enum Failure {
    Usage(String),
    Storage(StorageError),
}

impl Failure {
    /// 1 = lookup/usage, 2 = schema/initialization, 3 = storage I/O.
    fn exit_code(&self) -> i32 {
        match self {
            Failure::Usage(_) => 1,
            Failure::Storage(e) => storage_exit_code(e),
        }
    }
}

impl From<StorageError> for Failure {
    fn from(e: StorageError) -> Self {
        Failure::Storage(e)
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Usage(msg) => f.write_str(msg),
            Failure::Storage(e) => write!(f, "{}", e),
        }
    }
}

pub(crate) fn storage_exit_code(e: &StorageError) -> i32 {
    match e {
        _ if e.is_lookup() => 1,
        StorageError::Core(_) | StorageError::Initialization { .. } => 2,
        _ => 3,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .init();

    let db_path = cli
        .db
        .clone()
        .or_else(|| std::env::var("OUTLINE_DB_PATH").ok())
        .unwrap_or_else(|| "outline.db".to_string());

    let exit_code = match run(&db_path, cli.command).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    process::exit(exit_code);
}

async fn run(db_path: &str, command: Commands) -> Result<(), Failure> {
    let tables = SqliteTables::new(db_path).map_err(|e| {
        Failure::Storage(StorageError::Backend {
            reason: format!("failed to open database '{}': {}", db_path, e),
        })
    })?;
    let mut graph = Graph::open(tables, PersistConfig::from_env())?;
    tracing::info!(db = db_path, "opened outline");

    match command {
        Commands::Status => print_status(&graph)?,
        Commands::Tree { root } => {
            let start = resolve(&graph, root.as_deref())?;
            print!("{}", render_tree(&graph, &start)?);
        }
        Commands::Add { label, parent } => {
            let parent = resolve(&graph, parent.as_deref())?;
            let id = graph.create_child(parent.as_str(), &label)?;
            println!("{}", id);
        }
        Commands::Label { id, text } => {
            let id = resolve(&graph, Some(id.as_str()))?;
            graph.set_label(id.as_str(), &text)?;
        }
        Commands::Content { id, text, json } => {
            let id = resolve(&graph, Some(id.as_str()))?;
            let content = match (text, json) {
                (Some(text), _) => Content::Plain(text),
                (None, Some(raw)) => parse_content(&raw)?,
                (None, None) => return Err(Failure::Usage("missing --text or --json".into())),
            };
            graph.set_content(id.as_str(), content)?;
        }
        Commands::Mv {
            id,
            from,
            to,
            index,
        } => {
            let id = resolve(&graph, Some(id.as_str()))?;
            let from = resolve(&graph, Some(from.as_str()))?;
            let to = resolve(&graph, Some(to.as_str()))?;
            graph.move_node(id.as_str(), from.as_str(), to.as_str(), index)?;
        }
        Commands::Rm { id } => {
            let id = resolve(&graph, Some(id.as_str()))?;
            graph.delete_node(id.as_str())?;
        }
        Commands::Link { from, to, tag } => {
            let from = resolve(&graph, Some(from.as_str()))?;
            let to = resolve(&graph, Some(to.as_str()))?;
            graph.link(from.as_str(), to.as_str(), &tag)?;
        }
        Commands::Dump => {
            let json = serde_json::to_string_pretty(&graph.store().snapshot())
                .map_err(StorageError::from)?;
            println!("{}", json);
        }
        Commands::Shell { echo_patches } => {
            shell::run_shell(&mut graph, echo_patches).await?;
        }
    }

    graph.close()?;
    Ok(())
}

/// Resolves a node argument. `None` and the alias `root` mean the root.
pub(crate) fn resolve<S: TableStore>(
    graph: &Graph<S>,
    arg: Option<&str>,
) -> Result<EntityId, StorageError> {
    match arg {
        None | Some("root") => graph.root(),
        Some(id) => graph.store().get(NODE, id).map(|n| n.id().clone()).map_err(Into::into),
    }
}

pub(crate) fn parse_content(raw: &str) -> Result<Content, Failure> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Failure::Usage(format!("invalid content JSON: {}", e)))?;
    Content::from_plain(&value).map_err(|reason| Failure::Usage(format!("invalid content: {}", reason)))
}

pub(crate) fn print_status<S: TableStore>(graph: &Graph<S>) -> Result<(), StorageError> {
    let store = graph.store();
    for type_name in store.type_names() {
        println!("{:<8} {}", type_name, store.partition(type_name)?.len());
    }
    match store.root_node() {
        Some(root) => println!("root     {}", root),
        None => println!("root     (missing)"),
    }
    println!("dangling {}", store.dangling_edges().len());
    println!("pending  {}", graph.pending());
    println!("hash     {}", store.fingerprint().to_hex());
    Ok(())
}

/// Indented tree under `start`, one node per line. Nodes reachable twice
/// (through extra `child` links) are printed once and marked after that.
pub(crate) fn render_tree<S: TableStore>(
    graph: &Graph<S>,
    start: &EntityId,
) -> Result<String, StorageError> {
    let store = graph.store();
    let mut out = String::new();
    let mut seen = HashSet::new();
    let mut stack = vec![(start.clone(), 0usize)];
    while let Some((id, depth)) = stack.pop() {
        let indent = "  ".repeat(depth);
        if !seen.insert(id.clone()) {
            out.push_str(&format!("{}{} (see above)\n", indent, id));
            continue;
        }
        let summary = store.node_summary(id.as_str())?;
        out.push_str(&format!("{}{}  [{}]\n", indent, summary.primary, id));
        if let Some(secondary) = summary.secondary {
            out.push_str(&format!("{}  {}\n", indent, secondary));
        }
        for child in store.children(id.as_str())?.iter().rev() {
            if store.contains(NODE, child.as_str()) {
                stack.push((child.clone(), depth + 1));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use outline_core::CoreError;
    use outline_storage::InMemoryTables;

    fn graph() -> Graph<InMemoryTables> {
        Graph::open(InMemoryTables::new(), PersistConfig::default()).unwrap()
    }

    #[test]
    fn exit_codes_follow_error_class() {
        let lookup = StorageError::Core(CoreError::EntityNotFound {
            type_name: NODE.into(),
            id: EntityId::from("x"),
        });
        assert_eq!(storage_exit_code(&lookup), 1);
        let schema = StorageError::Core(CoreError::UnknownType {
            type_name: "Task".into(),
        });
        assert_eq!(storage_exit_code(&schema), 2);
        let init = StorageError::Initialization {
            reason: "x".into(),
        };
        assert_eq!(storage_exit_code(&init), 2);
        let io = StorageError::Backend { reason: "x".into() };
        assert_eq!(storage_exit_code(&io), 3);
        assert_eq!(Failure::Usage("x".into()).exit_code(), 1);
    }

    #[test]
    fn tree_lists_children_in_order() {
        let mut g = graph();
        let root = g.root().unwrap();
        let a = g.create_child(root.as_str(), "A").unwrap();
        g.create_child(root.as_str(), "B").unwrap();
        g.create_child(a.as_str(), "A.1").unwrap();

        let tree = render_tree(&g, &root).unwrap();
        let labels: Vec<&str> = tree
            .lines()
            .map(|l| l.trim_start().split("  [").next().unwrap())
            .collect();
        assert_eq!(labels, vec!["Root", "A", "A.1", "B"]);
        assert!(tree.lines().nth(2).unwrap().starts_with("    A.1"));
    }

    #[test]
    fn resolve_accepts_root_alias() {
        let g = graph();
        let root = g.root().unwrap();
        assert_eq!(resolve(&g, None).unwrap(), root);
        assert_eq!(resolve(&g, Some("root")).unwrap(), root);
        assert!(resolve(&g, Some("nope")).unwrap_err().is_lookup());
    }

    #[test]
    fn content_json_must_have_blocks() {
        assert!(parse_content(r#"{"blocks": []}"#).unwrap().is_rich());
        assert!(matches!(
            parse_content(r#"{"title": "x"}"#),
            Err(Failure::Usage(_))
        ));
        assert!(matches!(parse_content("not json"), Err(Failure::Usage(_))));
    }
}
