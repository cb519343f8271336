use clap::{Parser, Subcommand};
use metawiki::config::{self, Settings};
use metawiki::mutation::{Applied, MutationError, OpReport};
use metawiki::types::{Direction, DropPosition, MoveTarget, NodeKind};
use metawiki::wiki::{Wiki, WikiOptions};
use metawiki::{bundle, output, scan};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "metawiki")]
#[command(about = "Markdown wiki indexer")]
#[command(long_about = "\
Markdown wiki indexer

A directory of Markdown documents is the wiki. Folders become sections,
documents become pages, and a small _meta.json per folder decides the order
of its entries.

Content structure:

  content/
  ├── _config.json          # { \"title\": ..., \"fontTheme\": ..., \"fontSize\": ... }
  ├── Physics/
  │   ├── _meta.json        # [\"Quantum\", \"Schrodinger\"]  explicit order
  │   ├── Quantum.md        # no front matter: title from the file name
  │   └── Schrodinger.md    # --- title / slug / tags / date --- front matter
  └── Meta/
      └── About.md          # not in a manifest: sorted after listed entries

Node ids are paths without the .md extension (Physics/Quantum). Use ':root'
as the move target for the top level.

Run 'metawiki gen-config' to generate a documented metawiki.toml.")]
#[command(version)]
struct Cli {
    /// Content root (defaults to `content_root` from the settings file)
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Tool settings file
    #[arg(long, default_value = config::SETTINGS_FILE, global = true)]
    settings: PathBuf,

    /// Print mutation results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the content root and print the ordered tree
    Scan,
    /// Scan and report recoverable problems (bad front matter, bad manifests)
    Check {
        /// Rewrite missing, broken or incomplete _meta.json files first
        #[arg(long)]
        fix: bool,
    },
    /// Write the static bundle { config, nodes }
    Generate {
        /// Bundle path (defaults to `bundle.path` from the settings file)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Watch the content root and rescan on every change until Ctrl-C
    Watch,
    /// Create a document (or a folder with --folder)
    New {
        name: String,
        /// Parent folder id; top level when omitted
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        folder: bool,
    },
    /// Delete a document or a folder with everything in it
    Rm { id: String },
    /// Rename a document or folder in place
    Rename { id: String, new_name: String },
    /// Move one step up or down among siblings
    Reorder {
        id: String,
        #[arg(value_enum)]
        direction: Direction,
    },
    /// Move a node before, after or inside a target (':root' for the top level)
    Mv {
        id: String,
        target: String,
        /// Defaults to inside for folders and after for documents
        #[arg(long, value_enum)]
        position: Option<DropPosition>,
    },
    /// Print a document's source, front matter included
    Cat { id: String },
    /// Change the wiki title in _config.json
    SetTitle { title: String },
    /// Print a stock metawiki.toml with all options documented
    GenConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_settings_toml());
        return Ok(());
    }

    let settings = config::load_settings(&cli.settings)?;
    init_tracing(&settings);
    let source = cli
        .source
        .clone()
        .unwrap_or_else(|| PathBuf::from(&settings.content_root));

    match cli.command {
        Command::Scan => {
            let scan = scan::scan(&source)?;
            output::print_scan_output(&scan.index, &scan.config);
        }
        Command::Check { fix } => {
            println!("==> Checking {}", source.display());
            let warnings = if fix {
                let wiki = Wiki::open(&source, WikiOptions::default()).await?;
                let applied = wiki.engine().repair_manifests().await?;
                output::print_repairs(&applied.value);
                wiki.settle(&applied).await?.warnings.clone()
            } else {
                scan::scan(&source)?.warnings
            };
            output::print_warnings(&warnings);
            if !warnings.is_empty() {
                std::process::exit(1);
            }
        }
        Command::Generate { output: target } => {
            let path = target.unwrap_or_else(|| PathBuf::from(&settings.bundle.path));
            let (scan, outcome) = bundle::generate(&source, &path)?;
            output::print_generate_output(&scan.index, &path, &outcome);
        }
        Command::Watch => {
            let options = WikiOptions {
                watch: true,
                bundle_path: settings
                    .watch
                    .sync_bundle
                    .then(|| PathBuf::from(&settings.bundle.path)),
            };
            let wiki = Wiki::open(&source, options).await?;
            if let Some(content) = wiki.content() {
                output::print_scan_output(&content.index, &content.config);
            }
            wiki.dispatcher().on_index_updated(|snapshot| {
                println!();
                println!("==> Revision {}", snapshot.revision);
                output::print_scan_output(&snapshot.index, &snapshot.config);
            });
            println!("==> Watching {} (Ctrl-C to stop)", source.display());
            tokio::signal::ctrl_c().await?;
            println!("==> Stopped");
        }
        Command::New {
            name,
            parent,
            folder,
        } => {
            let wiki = Wiki::open(&source, WikiOptions::default()).await?;
            let kind = if folder {
                NodeKind::Folder
            } else {
                NodeKind::Document
            };
            let result = wiki.engine().create(&name, parent.as_deref(), kind).await;
            finish(&wiki, cli.json, result, |id| {
                (format!("created {id}"), Some(id.clone()))
            })
            .await?;
        }
        Command::Rm { id } => {
            let wiki = Wiki::open(&source, WikiOptions::default()).await?;
            let result = wiki.engine().delete(&id).await;
            finish(&wiki, cli.json, result, |id| (format!("deleted {id}"), None)).await?;
        }
        Command::Rename { id, new_name } => {
            let wiki = Wiki::open(&source, WikiOptions::default()).await?;
            let result = wiki.engine().rename(&id, &new_name).await;
            finish(&wiki, cli.json, result, |new_id| {
                (format!("renamed {id} → {new_id}"), Some(new_id.clone()))
            })
            .await?;
        }
        Command::Reorder { id, direction } => {
            let wiki = Wiki::open(&source, WikiOptions::default()).await?;
            let result = wiki.engine().reorder(&id, direction).await;
            finish(&wiki, cli.json, result, |moved| {
                let step = match direction {
                    Direction::Up => "up",
                    Direction::Down => "down",
                };
                let message = if *moved {
                    format!("moved {id} {step}")
                } else {
                    format!("{id} is already at the edge")
                };
                (message, Some(id.clone()))
            })
            .await?;
        }
        Command::Mv {
            id,
            target,
            position,
        } => {
            let wiki = Wiki::open(&source, WikiOptions::default()).await?;
            let target = MoveTarget::parse(&target);
            let position = position.unwrap_or_else(|| default_drop(&wiki, &target));
            let result = wiki.engine().move_node(&id, &target, position).await;
            finish(&wiki, cli.json, result, |new_id| {
                (format!("moved {id} → {new_id}"), Some(new_id.clone()))
            })
            .await?;
        }
        Command::Cat { id } => {
            let wiki = Wiki::open(&source, WikiOptions::default()).await?;
            print!("{}", wiki.engine().read_source(&id).await?);
        }
        Command::SetTitle { title } => {
            let wiki = Wiki::open(&source, WikiOptions::default()).await?;
            let mut wiki_config = wiki
                .content()
                .map(|content| content.config.clone())
                .unwrap_or_default();
            wiki_config.title = title;
            let result = wiki.engine().save_config(&wiki_config).await;
            finish(&wiki, cli.json, result, |_| {
                (format!("title set to {}", wiki_config.title), None)
            })
            .await?;
        }
        // Handled before settings are loaded.
        Command::GenConfig => {}
    }

    Ok(())
}

/// Log filter from `RUST_LOG`, falling back to the settings file.
fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Inside for folder targets (and the root), after for documents.
fn default_drop(wiki: &Wiki, target: &MoveTarget) -> DropPosition {
    match target {
        MoveTarget::Root => DropPosition::Inside,
        MoveTarget::Node(id) => {
            let is_folder = wiki
                .content()
                .and_then(|content| content.index.get(id).map(|node| node.is_folder()))
                .unwrap_or(false);
            if is_folder {
                DropPosition::Inside
            } else {
                DropPosition::After
            }
        }
    }
}

/// Print a mutation's report and, on success, the index that reflects it.
/// Exits with status 1 on failure.
async fn finish<T>(
    wiki: &Wiki,
    json: bool,
    result: Result<Applied<T>, MutationError>,
    describe: impl FnOnce(&T) -> (String, Option<String>),
) -> Result<(), Box<dyn std::error::Error>> {
    let (report, applied) = match result {
        Ok(applied) => {
            let (message, id) = describe(&applied.value);
            (OpReport::success(message, id), Some(applied))
        }
        Err(error) => (OpReport::failure(&error), None),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", output::format_report(&report));
    }

    let Some(applied) = applied else {
        std::process::exit(1);
    };
    let snapshot = wiki.settle(&applied).await?;
    if !json {
        println!();
        output::print_scan_output(&snapshot.index, &snapshot.config);
    }
    Ok(())
}
