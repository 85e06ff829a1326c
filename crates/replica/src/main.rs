use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use replica_common::logger::{self, LogTarget};
use replica_common::AppConfig;
use replica_vector::{JsonSignatureExtractor, Matcher, Metadata, SearchQuery};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Find project root by looking for .git directory
fn find_project_root() -> Option<PathBuf> {
    let mut current_dir = std::env::current_dir().ok()?;

    loop {
        if current_dir.join(".git").exists() {
            return Some(current_dir);
        }

        if !current_dir.pop() {
            break;
        }
    }

    None
}

/// Load .env file from project root
fn load_dotenv_from_project_root() {
    match find_project_root().map(|root| root.join(".env")) {
        Some(env_path) if env_path.exists() => {
            dotenv::from_path(&env_path).ok();
        }
        _ => {
            dotenv::dotenv().ok();
        }
    }
}

#[derive(Parser)]
#[command(name = "replica")]
#[command(about = "Replica - content-based image retrieval by relevance feedback", long_about = None)]
struct Cli {
    /// Configuration file (TOML/JSON/YAML); environment only when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also append logs to replica.log in the configured log directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank the items of a JSON file against relevant/irrelevant examples
    Rank {
        /// JSON array of {"key", "vector", "metadata"} records
        #[arg(long)]
        items: PathBuf,

        /// Keys marked relevant
        #[arg(long, required = true, num_args = 1..)]
        positive: Vec<String>,

        /// Keys marked irrelevant
        #[arg(long, num_args = 1..)]
        negative: Vec<String>,

        /// Number of results
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[derive(Deserialize)]
struct ItemRecord {
    key: String,
    vector: Vec<f32>,
    #[serde(default)]
    metadata: Metadata,
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn read_items(path: &Path) -> Result<Vec<ItemRecord>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading items from {}", path.display()))?;
    let items = serde_json::from_str(&data)
        .with_context(|| format!("parsing items from {}", path.display()))?;
    Ok(items)
}

async fn rank(
    mut config: AppConfig,
    items: &Path,
    positive: Vec<String>,
    negative: Vec<String>,
    top_k: Option<usize>,
) -> Result<()> {
    let records = read_items(items)?;
    if let Some(first) = records.first() {
        config.dimension = first.vector.len();
    }

    let extractor = Arc::new(JsonSignatureExtractor::new([config.feature_name.clone()]));
    let matcher = Matcher::new(&config, extractor)?;

    for record in records {
        matcher
            .add_vector(record.key, record.vector, record.metadata)
            .await?;
    }
    matcher.scheduler().run_cycle().await;

    let query = SearchQuery {
        positive,
        negative,
        limit: top_k,
    };
    let results = matcher.search(&query).await?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load environment variables from .env at project root
    load_dotenv_from_project_root();

    let config = load_config(cli.config.as_deref())?;
    let log_target = if cli.log_file {
        LogTarget::ConsoleAndFile(config.log_dir.clone())
    } else {
        LogTarget::Console
    };
    logger::init_logging(&log_target, &config.log_level)?;

    match cli.command {
        Commands::Rank {
            items,
            positive,
            negative,
            top_k,
        } => {
            tracing::info!("Ranking {} against {} examples", items.display(), positive.len());
            rank(config, &items, positive, negative, top_k).await?;
        }
    }

    Ok(())
}
