//! cachet maintenance CLI.
//!
//! Opens the cache described by the layered configuration (defaults,
//! `CACHET_CONFIG_FILE`, `CACHET_*` variables) and runs one operation.
//! Results go to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result, bail};
use cachet_core::{Cache, CacheConfig, PruneScope, Query};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cachet", version, about = "Inspect and maintain a cachet cache")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List stores with their index shape and TTL.
    Stores,
    /// Entry counts and timestamp ranges per store.
    Stats,
    /// Delete expired entries.
    Prune {
        /// Store to prune; repeat for several. Defaults to all stores.
        #[arg(long = "store")]
        stores: Vec<String>,
    },
    /// Destroy the cache container.
    Reset,
    /// Look up entries by key fields.
    Get {
        store: String,
        /// Key fields as a JSON object.
        #[arg(long)]
        key: Option<String>,
        /// Return up to N entries instead of the first match.
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        include_expired: bool,
    },
    /// Store a JSON payload under the given key fields.
    Put {
        store: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        data: String,
    },
}

fn parse_json(raw: &str, what: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("--{what} is not valid JSON"))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cache: &Cache, command: Command) -> Result<()> {
    match command {
        Command::Stores => {
            let stores: Vec<Value> = cache
                .schema()
                .iter()
                .map(|(name, shape)| {
                    let ttl = cache.ttl(name).map(|d| d.num_seconds());
                    serde_json::json!({ "store": name, "shape": shape.to_string(), "ttl_seconds": ttl })
                })
                .collect();
            print_json(&stores)
        }
        Command::Stats => print_json(&cache.stats().await),
        Command::Prune { stores } => {
            let scope = if stores.is_empty() { PruneScope::All } else { PruneScope::Stores(stores) };
            print_json(&cache.prune(scope).await)
        }
        Command::Reset => {
            cache.reset().await?;
            tracing::info!(namespace = cache.namespace(), "Cache reset");
            Ok(())
        }
        Command::Get { store, key, limit, include_expired } => {
            if cache.schema().get(&store).is_none() {
                bail!("unknown store {store:?}");
            }
            let mut query = Query::new();
            if let Some(key) = key {
                query = query.matching(parse_json(&key, "key")?);
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            if include_expired {
                query = query.include_expired();
            }
            let entries = cache.find::<Value>(&store, query).await.into_vec();
            print_json(&entries)
        }
        Command::Put { store, key, data } => {
            if cache.schema().get(&store).is_none() {
                bail!("unknown store {store:?}");
            }
            let key = parse_json(&key, "key")?;
            let data = parse_json(&data, "data")?;
            cache.save(&store, &data, &key).await;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = CacheConfig::load()?;
    let cache = Cache::init(&config).await?;

    let result = run(&cache, cli.command).await;
    cache.close().await?;
    result
}
