//! # Openbook CLI (`openbook`)
//!
//! Manages projects and drives the indexing and retrieval engine.
//!
//! ## Usage
//!
//! ```bash
//! openbook --config ./config/openbook.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `openbook setup <dir>` | Create `<dir>/OpenbookLM-Projects` and remember it |
//! | `openbook projects` | List projects |
//! | `openbook create <name>` | Create a project |
//! | `openbook delete <name>` | Delete a project and all its files |
//! | `openbook rename <old> <new>` | Rename a project |
//! | `openbook add <project> <files..>` | Copy files into a project |
//! | `openbook note <project> <title> <text>` | Save text as a `.txt` source |
//! | `openbook link <project> <url>` | Save a web page's text as a source |
//! | `openbook sources <project>` | List source files and their index status |
//! | `openbook remove-source <project> <file>` | Delete a source file |
//! | `openbook rename-source <project> <old> <new>` | Rename a source file |
//! | `openbook sync <project>` | Index new and changed files |
//! | `openbook query <project> "<text>"` | Show the nearest fragments |
//! | `openbook ask <project> "<question>"` | Answer from the project's documents |
//! | `openbook history <project>` | Print the conversation log |
//! | `openbook chat <project>` | Interactive question loop |
//! | `openbook stats <project>` | Index statistics |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (e.g. `RUST_LOG=openbook=debug`).

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use openbook::config::{self, Config};
use openbook::models::Role;
use openbook::notebook::{Notebook, DEPENDENCY_DIR, REGISTRY_FILE};
use openbook::registry::Registry;
use openbook::{stats, Workspace};

/// Openbook — a local-first notebook that answers from your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means defaults (local Ollama on port 11434).
#[derive(Parser)]
#[command(
    name = "openbook",
    about = "Openbook — a local-first notebook that answers from your own documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/openbook.toml`. `setup` writes the storage
    /// root back to this file.
    #[arg(long, global = true, default_value = "./config/openbook.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Set the storage location.
    ///
    /// Projects live in `<dir>/OpenbookLM-Projects`. The directory must
    /// exist; the projects folder is created inside it.
    Setup {
        /// Existing parent directory.
        dir: PathBuf,
    },

    /// List projects in the storage root.
    Projects,

    /// Create a project (no-op if it already exists).
    Create { name: String },

    /// Delete a project, its sources and its index.
    Delete { name: String },

    /// Rename a project. The new name must be free.
    Rename { old: String, new: String },

    /// Copy files into a project.
    ///
    /// Files are copied, not moved. Run `sync` afterwards to index them.
    Add {
        project: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Save a piece of text as a `.txt` source.
    Note {
        project: String,
        /// Title, used as the filename.
        title: String,
        /// Note body.
        text: String,
    },

    /// Fetch a web page and save its text as a `.txt` source named after
    /// the page title.
    Link { project: String, url: String },

    /// List a project's source files.
    Sources { project: String },

    /// Delete one source file.
    ///
    /// Chunks already indexed from it stay in the index until `sync --full`.
    RemoveSource { project: String, file: String },

    /// Rename one source file. Omitting the extension keeps the old one.
    RenameSource {
        project: String,
        old: String,
        new: String,
    },

    /// Index new and changed files.
    ///
    /// Unchanged files are skipped by modification time, then by content
    /// hash, so repeated syncs do no embedding work.
    Sync {
        project: String,

        /// Clear the index and rebuild it from every source file.
        #[arg(long)]
        full: bool,
    },

    /// Show the fragments nearest to a query.
    Query {
        project: String,
        text: String,

        /// Number of results.
        #[arg(short, long, default_value = "5")]
        k: usize,
    },

    /// Answer a question from the project's documents.
    ///
    /// Both the question and the answer are added to the project's history.
    Ask { project: String, question: String },

    /// Print the project's conversation log.
    History { project: String },

    /// Interactive question loop. Type `exit` to quit.
    Chat { project: String },

    /// Show index statistics.
    Stats { project: String },
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut cfg = config::load_or_default(&cli.config)?;
    let mut workspace = Workspace::new(cfg.storage.root.clone());

    match cli.command {
        Commands::Setup { dir } => {
            let root = workspace.set_storage_location(&dir)?;
            cfg.storage.root = Some(root.clone());
            config::save_config(&cli.config, &cfg)?;
            println!("Storage root: {}", root.display());
        }
        Commands::Projects => {
            let projects = workspace.list_projects()?;
            if projects.is_empty() {
                println!("No projects yet. Create one with `openbook create <name>`.");
            }
            for name in projects {
                println!("{}", name);
            }
        }
        Commands::Create { name } => {
            let project = workspace.open_project(&name)?;
            println!("Project ready: {}", project.path().display());
        }
        Commands::Delete { name } => {
            workspace.delete_project(&name)?;
            println!("Deleted project: {}", name);
        }
        Commands::Rename { old, new } => {
            let project = workspace.rename_project(&old, &new)?;
            println!("Renamed {} -> {}", old, project.name());
        }
        Commands::Add { project, files } => {
            let project = workspace.project(&project)?;
            let copied = project.add_files(&files);
            println!("Added {} of {} file(s) to {}.", copied, files.len(), project.name());
            if copied < files.len() {
                bail!("some files could not be added");
            }
        }
        Commands::Note {
            project,
            title,
            text,
        } => {
            let project = workspace.project(&project)?;
            let file = project.save_text(&title, &text)?;
            println!("Saved {}", file);
        }
        Commands::Link { project, url } => {
            let project = workspace.project(&project)?;
            let file = project.save_link(&url)?;
            println!("Saved {}", file);
        }
        Commands::Sources { project } => {
            let project = workspace.project(&project)?;
            let sources = project.list_sources()?;
            if sources.is_empty() {
                println!("No sources.");
                return Ok(());
            }
            let registry =
                Registry::open(&project.path().join(DEPENDENCY_DIR).join(REGISTRY_FILE))?;
            for name in sources {
                let status = match registry.get_file_state(&name)? {
                    Some(state) => match state.indexed_at {
                        Some(ts) => format!("indexed {}", stats::format_ts_iso(ts)),
                        None => "indexed".to_string(),
                    },
                    None if openbook::ingest::is_supported(std::path::Path::new(&name)) => {
                        "pending".to_string()
                    }
                    None => "unsupported".to_string(),
                };
                println!("  {:<40} {}", name, status);
            }
        }
        Commands::RemoveSource { project, file } => {
            let project = workspace.project(&project)?;
            project.delete_source(&file)?;
            println!("Removed {}", file);
        }
        Commands::RenameSource { project, old, new } => {
            let project = workspace.project(&project)?;
            let renamed = project.rename_source(&old, &new)?;
            println!("Renamed {} -> {}", old, renamed);
        }
        Commands::Sync { project, full } => {
            let mut notebook = open_notebook(&workspace, &project, &cfg)?;
            let report = if full {
                notebook.reindex()?
            } else {
                notebook.sync()?
            };
            println!("{}", report);
            for failure in &report.failed {
                eprintln!("  {}: {}", failure.filename, failure.reason);
            }
        }
        Commands::Query { project, text, k } => {
            let mut notebook = open_notebook(&workspace, &project, &cfg)?;
            let results = notebook.query(&text, k)?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!("{}. [{:.4}] {}", i + 1, r.distance, r.metadata.source);
                println!("    {}", snippet(&r.metadata.text, 200));
            }
        }
        Commands::Ask { project, question } => {
            let mut notebook = open_notebook(&workspace, &project, &cfg)?;
            let answer = notebook.answer_query(&question)?;
            println!("{}", answer);
        }
        Commands::History { project } => {
            let notebook = open_notebook(&workspace, &project, &cfg)?;
            let history = notebook.history()?;
            if history.is_empty() {
                println!("No messages yet.");
            }
            for msg in history {
                let who = match msg.role {
                    Role::User => "You",
                    Role::Assistant => "Openbook",
                    Role::System => "System",
                };
                println!("[{}] {}: {}", msg.timestamp.format("%Y-%m-%d %H:%M"), who, msg.content);
            }
        }
        Commands::Chat { project } => {
            let notebook = open_notebook(&workspace, &project, &cfg)?;
            run_chat(notebook)?;
        }
        Commands::Stats { project } => {
            let mut notebook = open_notebook(&workspace, &project, &cfg)?;
            let stats = notebook.stats()?;
            stats::print_stats(&stats);
        }
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn open_notebook(workspace: &Workspace, name: &str, cfg: &Config) -> anyhow::Result<Notebook> {
    let project = workspace.project(name)?;
    project
        .open_notebook(cfg)
        .with_context(|| format!("Failed to open project '{}'", name))
}

/// The notebook runs on a worker thread; this thread only reads input and
/// prints replies.
fn run_chat(mut notebook: Notebook) -> anyhow::Result<()> {
    let name = notebook.name();
    let (request_tx, request_rx) = mpsc::channel::<String>();
    let (reply_tx, reply_rx) = mpsc::channel::<openbook::Result<String>>();

    let worker = thread::Builder::new()
        .name("openbook-engine".into())
        .spawn(move || {
            for question in request_rx {
                let reply = notebook.answer_query(&question);
                if reply_tx.send(reply).is_err() {
                    break;
                }
            }
        })
        .context("Failed to start engine thread")?;

    println!("Chatting with project '{}'. Type 'exit' to quit.\n", name);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("You > ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else { break };
        let line = line?;
        let trimmed = line.trim();

        if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
            tracing::info!("User exited chat");
            break;
        }
        if trimmed.is_empty() {
            continue;
        }

        request_tx
            .send(trimmed.to_owned())
            .context("engine thread stopped")?;
        println!("Thinking...");
        match reply_rx.recv().context("engine thread stopped")? {
            Ok(answer) => println!("\nOpenbook > {}\n", answer),
            Err(e) => eprintln!("error: {}", e),
        }
    }

    drop(request_tx);
    if worker.join().is_err() {
        bail!("engine thread panicked");
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
