//! Interactive shell.
//!
//! Reads one command per line from stdin while a single-threaded runtime
//! waits on the graph's flush deadline, so writes land on the debounce
//! timer exactly as they would under a UI. Errors are printed and the
//! shell keeps going; end of input flushes and exits.

use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};

use outline_core::{Content, Patch};
use outline_storage::{FlushOutcome, Graph, StorageError, TableStore};

use crate::{print_status, render_tree, resolve};

const HELP: &str = "\
commands:
  add <parent> <label...>      create a child node
  label <id> <text...>         set a node's label
  content <id> <text...>       set a node's content (plain text)
  mv <id> <from> <to>          move a node between parents
  rm <id>                      delete a node
  link <from> <to> [tag]       add an edge (default tag: child)
  tree [id]                    print the tree
  status                       table sizes and pending patches
  flush                        write buffered patches now
  help                         this text
  quit                         flush and exit
ids may be given as 'root'";

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ShellCommand {
    Add { parent: String, label: String },
    Label { id: String, text: String },
    Content { id: String, text: String },
    Mv { id: String, from: String, to: String },
    Rm { id: String },
    Link { from: String, to: String, tag: String },
    Tree { root: Option<String> },
    Status,
    Flush,
    Help,
    Quit,
    Empty,
}

/// Parses a shell line. Trailing words of labels and text are joined back
/// with single spaces.
pub(crate) fn parse_line(line: &str) -> Result<ShellCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(ShellCommand::Empty);
    };
    let mut arg = |name: &str| {
        words
            .next()
            .map(str::to_string)
            .ok_or_else(|| format!("{}: missing <{}>", verb, name))
    };

    let command = match verb {
        "add" => {
            let parent = arg("parent")?;
            ShellCommand::Add {
                parent,
                label: rest(&mut words),
            }
        }
        "label" => {
            let id = arg("id")?;
            ShellCommand::Label {
                id,
                text: rest(&mut words),
            }
        }
        "content" => {
            let id = arg("id")?;
            ShellCommand::Content {
                id,
                text: rest(&mut words),
            }
        }
        "mv" => ShellCommand::Mv {
            id: arg("id")?,
            from: arg("from")?,
            to: arg("to")?,
        },
        "rm" => ShellCommand::Rm { id: arg("id")? },
        "link" => ShellCommand::Link {
            from: arg("from")?,
            to: arg("to")?,
            tag: words.next().unwrap_or("child").to_string(),
        },
        "tree" => ShellCommand::Tree {
            root: words.next().map(str::to_string),
        },
        "status" => ShellCommand::Status,
        "flush" => ShellCommand::Flush,
        "help" | "?" => ShellCommand::Help,
        "quit" | "exit" => ShellCommand::Quit,
        other => return Err(format!("unknown command '{}' (try 'help')", other)),
    };
    Ok(command)
}

fn rest<'a>(words: &mut impl Iterator<Item = &'a str>) -> String {
    words.collect::<Vec<_>>().join(" ")
}

/// Runs the shell until `quit` or end of input.
pub(crate) async fn run_shell<S: TableStore>(
    graph: &mut Graph<S>,
    echo_patches: bool,
) -> Result<(), StorageError> {
    if echo_patches {
        graph.subscribe(Box::new(|patch: &Patch| {
            if let Ok(json) = serde_json::to_string(patch) {
                println!("{}", json);
            }
        }));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let deadline = graph.next_deadline();
        tokio::select! {
            line = lines.next_line() => {
                let line = line.map_err(|e| StorageError::Backend {
                    reason: format!("reading stdin: {}", e),
                })?;
                let Some(line) = line else { break };
                match parse_line(&line) {
                    Ok(ShellCommand::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = execute(graph, command) {
                            eprintln!("error: {}", e);
                        }
                    }
                    Err(msg) => eprintln!("error: {}", msg),
                }
            }
            _ = sleep_until(deadline) => {
                match graph.tick(Instant::now()) {
                    Ok(Some(FlushOutcome::Retained { patches, reason, .. })) => {
                        eprintln!("warning: {} patches not written yet: {}", patches, reason);
                    }
                    Ok(_) => {}
                    Err(e) => eprintln!("error: {}", e),
                }
            }
        }
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => std::future::pending().await,
    }
}

fn execute<S: TableStore>(graph: &mut Graph<S>, command: ShellCommand) -> Result<(), StorageError> {
    match command {
        ShellCommand::Add { parent, label } => {
            let parent = resolve(graph, Some(parent.as_str()))?;
            let id = graph.create_child(parent.as_str(), &label)?;
            println!("{}", id);
        }
        ShellCommand::Label { id, text } => {
            let id = resolve(graph, Some(id.as_str()))?;
            graph.set_label(id.as_str(), &text)?;
        }
        ShellCommand::Content { id, text } => {
            let id = resolve(graph, Some(id.as_str()))?;
            graph.set_content(id.as_str(), Content::Plain(text))?;
        }
        ShellCommand::Mv { id, from, to } => {
            let id = resolve(graph, Some(id.as_str()))?;
            let from = resolve(graph, Some(from.as_str()))?;
            let to = resolve(graph, Some(to.as_str()))?;
            graph.move_node(id.as_str(), from.as_str(), to.as_str(), None)?;
        }
        ShellCommand::Rm { id } => {
            let id = resolve(graph, Some(id.as_str()))?;
            graph.delete_node(id.as_str())?;
        }
        ShellCommand::Link { from, to, tag } => {
            let from = resolve(graph, Some(from.as_str()))?;
            let to = resolve(graph, Some(to.as_str()))?;
            graph.link(from.as_str(), to.as_str(), &tag)?;
        }
        ShellCommand::Tree { root } => {
            let start = resolve(graph, root.as_deref())?;
            print!("{}", render_tree(graph, &start)?);
        }
        ShellCommand::Status => print_status(graph)?,
        ShellCommand::Flush => match graph.flush()? {
            FlushOutcome::Written { patches, ops } => {
                println!("wrote {} patches as {} row ops", patches, ops)
            }
            FlushOutcome::Empty => println!("nothing to write"),
            FlushOutcome::Retained {
                patches, reason, ..
            } => println!("{} patches kept: {}", patches, reason),
        },
        ShellCommand::Help => println!("{}", HELP),
        ShellCommand::Quit | ShellCommand::Empty => {}
    }
    Ok(())
}
