use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use query_mediator::history::HistoryFilter;
use query_mediator::store::memory::banking_registry;
use query_mediator::{Mediator, MediatorConfig, Target};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "query-mediator")]
#[command(about = "Routes queries to the fastest of several backing stores, learning from every execution")]
struct Args {
    /// Directory for the execution log and learned profiles (or set MEDIATOR_DATA_DIR)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Per-store timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Confidence (percent) required before learned history is trusted
    #[arg(long, global = true)]
    confidence_threshold: Option<f64>,

    /// Run every candidate while a query is still being learned
    #[arg(long, global = true)]
    compare_while_exploring: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show which store a query would be routed to
    Recommend { query: String },

    /// Execute a query on the selected (or named) store
    Execute {
        query: String,

        /// Run on this store instead of the selected one
        #[arg(short, long)]
        store: Option<String>,

        /// Execute this many times (useful for training)
        #[arg(short, long, default_value_t = 1)]
        repeat: usize,
    },

    /// Execute a query on every compatible store and compare
    Compare { query: String },

    /// List recorded executions, newest first
    History {
        /// Case-insensitive substring of the query text
        #[arg(long)]
        contains: Option<String>,

        #[arg(long)]
        store: Option<String>,

        /// Only executions from the last N seconds
        #[arg(long)]
        since_secs: Option<i64>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Aggregate execution statistics
    Stats {
        #[arg(long)]
        store: Option<String>,
    },

    /// Delete all recorded executions and learned profiles
    Clear,
}

/// Instant `secs` seconds ago.
fn since_cutoff(secs: i64) -> Result<DateTime<Utc>> {
    chrono::Duration::try_seconds(secs)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .with_context(|| format!("--since-secs {} is out of range", secs))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = MediatorConfig::from_env().context("invalid MEDIATOR_* environment")?;
    if args.data_dir.is_some() {
        config.data_dir = args.data_dir;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.store_timeout_ms = timeout_ms;
    }
    if let Some(threshold) = args.confidence_threshold {
        config.confidence_threshold = threshold;
    }
    if args.compare_while_exploring {
        config.compare_while_exploring = true;
    }

    let mediator = Mediator::new(config, banking_registry()?)?;
    for (store, e) in mediator.connect_stores().await {
        warn!("Continuing without a connection to '{}': {}", store, e);
    }
    if mediator.is_degraded() {
        warn!("History persistence unavailable, running in memory only");
    }

    match args.command {
        Command::Recommend { query } => {
            print_json(&mediator.recommend(&query).await?)?;
        }
        Command::Execute { query, store, repeat } => {
            let target = Target::from_option(store);
            let mut last = None;
            for _ in 0..repeat.max(1) {
                last = Some(mediator.execute(&query, target.clone()).await?);
            }
            if let Some(response) = last {
                print_json(&response)?;
            }
        }
        Command::Compare { query } => {
            print_json(&mediator.execute_all(&query).await?)?;
        }
        Command::History {
            contains,
            store,
            since_secs,
            limit,
        } => {
            let filter = HistoryFilter {
                contains,
                store,
                since: since_secs.map(since_cutoff).transpose()?,
                limit: Some(limit),
            };
            print_json(&mediator.history(&filter)?)?;
        }
        Command::Stats { store } => {
            print_json(&mediator.stats(store.as_deref())?)?;
        }
        Command::Clear => {
            mediator.clear_history()?;
            info!("History cleared");
        }
    }

    Ok(())
}
