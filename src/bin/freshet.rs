//! freshet: cache driver CLI
//!
//! Runs the cache tiers against a live REST backend.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use freshet::{CacheKey, CacheRuntime, Config, Freshet, StoreState, SyncState};

/// Freshet CLI
#[derive(Parser)]
#[command(name = "freshet")]
#[command(version)]
#[command(about = "Data freshness and cache coherence driver")]
struct Args {
    /// Config file (default: ~/.freshet/config.toml, then /etc/freshet/config.toml)
    #[arg(short, long, env = "FRESHET_CONFIG")]
    config: Option<PathBuf>,

    /// Backend base URL (overrides the config file)
    #[arg(short, long, env = "FRESHET_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compare the stored data version with the server's; invalidate if stale
    Check,

    /// Invalidate every cache tier now
    Invalidate,

    /// Fetch a resource through the cache tiers
    Get {
        /// Dataset name
        dataset: String,
        /// Additional key parts (e.g. an entity id)
        parts: Vec<String>,
    },

    /// Load a configured collection
    Preload {
        /// Collection name
        collection: String,
    },

    /// Show data version, store state and collection sync states
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load_or_default(args.config.as_deref())?;
    if let Some(base_url) = args.base_url {
        config.source.base_url = Some(base_url);
    }
    if config.source.base_url.is_none() {
        return Err("no backend configured (pass --base-url or set source.base_url)".into());
    }

    let runtime = Freshet::builder().config(&config)?.build()?;

    match args.command {
        Command::Check => {
            let invalidated = runtime.initialize_with_freshness_check().await;
            let version = runtime.monitor().fence().local_version().await;
            println!(
                "data version: {}",
                version.as_ref().map_or("unknown", |v| v.as_str())
            );
            println!("{}", if invalidated { "stale, caches invalidated" } else { "fresh" });
        }

        Command::Invalidate => {
            runtime.invalidate_now().await?;
            println!("all cache tiers invalidated");
        }

        Command::Get { dataset, parts } => {
            let key = parts
                .into_iter()
                .fold(CacheKey::new(dataset), |key, part| key.with(part));
            let fetched = runtime.fetch(&key).await?;
            eprintln!(
                "{key}: {} in {:?}",
                fetched.source().as_str(),
                fetched.elapsed
            );
            println!("{}", serde_json::to_string_pretty(fetched.value().as_ref())?);
        }

        Command::Preload { collection } => {
            runtime.preload(&collection).await?;
            print_sync_state(&collection, runtime.sync_state(&collection));
        }

        Command::Status => print_status(&runtime).await,
    }

    Ok(())
}

async fn print_status(runtime: &CacheRuntime) {
    let version = runtime.monitor().fence().local_version().await;
    println!(
        "data version: {}",
        version.as_ref().map_or("unknown", |v| v.as_str())
    );

    let store = runtime.store();
    // opening is lazy; force it so the state is meaningful
    let _ = store.open().await;
    let state = match store.state() {
        StoreState::Open => "open",
        StoreState::Unavailable => "unavailable (memory-only)",
        StoreState::Failed => "failed (memory-only)",
        _ => "busy",
    };
    println!("store: {} ({state})", store.database());

    for spec in runtime.sync_engine().collections() {
        match runtime.last_synced(&spec.name).await {
            Some(marker) => println!(
                "{}: last synced {} rows at {}",
                spec.name, marker.total_rows, marker.completed_at_ms
            ),
            None => println!("{}: never synced", spec.name),
        }
    }
}

fn print_sync_state(name: &str, state: Option<SyncState>) {
    match state {
        Some(SyncState::Complete { total_rows, .. }) => {
            println!("{name}: complete, {total_rows} rows")
        }
        Some(SyncState::Syncing { pages, rows }) => {
            println!("{name}: syncing, {pages} pages / {rows} rows")
        }
        Some(SyncState::Idle) => println!("{name}: idle"),
        None => println!("{name}: not configured"),
    }
}
