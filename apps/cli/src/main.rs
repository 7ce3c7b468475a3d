mod config;
mod main_lib;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use config::Config;
use main_lib::{build_services, init_tracing, AppServices};
use qtree_core::tree::{
    CollisionPolicy, ImportCancellation, ImportOptions, NodeId, SearchQuery, TreeExport,
    TreeNodeView,
};

#[derive(Parser)]
#[command(name = "qtree-admin")]
#[command(about = "Maintenance tooling for a qtree category database")]
#[command(version)]
struct Cli {
    /// SQLite database file (overrides QTREE_DB_PATH and DATABASE_URL)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check structural integrity; exits non-zero when issues are found
    Validate,
    /// Recompute paths and levels, reattach orphans, resequence siblings
    Repair,
    /// Tree-wide or per-node statistics
    Stats {
        #[arg(long)]
        node: Option<NodeId>,
    },
    /// Print the active tree
    Tree,
    /// Export the whole tree or one subtree as JSON
    Export {
        #[arg(long)]
        node: Option<NodeId>,
        /// Output file (stdout when omitted)
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Import a JSON export
    Import {
        file: PathBuf,
        /// Attach imported roots under this node
        #[arg(long)]
        parent: Option<NodeId>,
        #[arg(long, value_enum, default_value_t = OnCollision::Skip)]
        on_collision: OnCollision,
    },
    /// Search node names, codes and descriptions
    Search {
        term: String,
        #[arg(long)]
        scope: Option<NodeId>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        include_inactive: bool,
    },
    /// Hard-delete every soft-deleted node
    Purge,
    /// Show the categorizations of an item
    Item { id: i64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum OnCollision {
    Skip,
    Rename,
    Update,
    Fail,
}

impl From<OnCollision> for CollisionPolicy {
    fn from(value: OnCollision) -> Self {
        match value {
            OnCollision::Skip => CollisionPolicy::Skip,
            OnCollision::Rename => CollisionPolicy::Rename,
            OnCollision::Update => CollisionPolicy::Update,
            OnCollision::Fail => CollisionPolicy::Fail,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env(cli.db)?;
    init_tracing(config.log_format);
    let services = build_services(&config).await?;
    run(cli.command, &services).await
}

async fn run(command: Commands, services: &AppServices) -> anyhow::Result<()> {
    let tree = &services.tree_service;
    match command {
        Commands::Validate => {
            let report = tree.validate_tree().await?;
            for warning in &report.warnings {
                tracing::warn!("{}", warning);
            }
            print_json(&report)?;
            if !report.is_valid {
                anyhow::bail!("tree has {} integrity issue(s)", report.issues.len());
            }
        }
        Commands::Repair => {
            let result = tree.repair_tree().await?;
            for warning in &result.warnings {
                tracing::warn!("{}", warning);
            }
            print_json(&result)?;
        }
        Commands::Stats { node: Some(id) } => print_json(&tree.get_node_statistics(id).await?)?,
        Commands::Stats { node: None } => print_json(&tree.get_statistics().await?)?,
        Commands::Tree => {
            for root in tree.get_tree().await? {
                print_view(&root, 0);
            }
        }
        Commands::Export { node, out } => {
            let json = tree.export_subtree(node).await?.to_json()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    tracing::info!("Exported to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        Commands::Import {
            file,
            parent,
            on_collision,
        } => {
            let export = TreeExport::from_json(&std::fs::read_to_string(&file)?)?;
            let cancellation = ImportCancellation::new();
            let on_signal = cancellation.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping import");
                    on_signal.cancel();
                }
            });

            let options = ImportOptions {
                cancellation: Some(cancellation),
                ..ImportOptions::with_policy(on_collision.into())
            };
            let result = tree.import_tree(export, parent, options).await?;
            print_json(&result)?;
            if !result.success {
                anyhow::bail!(
                    "import incomplete: {}",
                    result.error_message.as_deref().unwrap_or("aborted")
                );
            }
        }
        Commands::Search {
            term,
            scope,
            limit,
            include_inactive,
        } => {
            let query = SearchQuery {
                scope_node_id: scope,
                max_results: limit,
                include_inactive,
                ..SearchQuery::new(term)
            };
            let hits = tree.search(query).await?;
            for hit in &hits {
                let trail: Vec<&str> = hit.breadcrumb.iter().map(|b| b.name.as_str()).collect();
                println!("{:>4}  {:<16} {}", hit.node.id, hit.node.code, trail.join(" > "));
            }
        }
        Commands::Purge => {
            let purged = tree.purge_deleted().await?;
            print_json(&json!({ "purged": purged }))?;
        }
        Commands::Item { id } => {
            let records = services.categorization_service.get_item_categorizations(id)?;
            print_json(&records)?;
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_view(view: &TreeNodeView, depth: usize) {
    let marker = if view.node.is_active { "" } else { " (inactive)" };
    println!(
        "{}{} [{}]{}",
        "  ".repeat(depth),
        view.node.name,
        view.node.code,
        marker
    );
    for child in &view.children {
        print_view(child, depth + 1);
    }
}
