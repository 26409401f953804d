mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use folio::clock::SystemClock;
use folio::config::Config;
use folio::storage::{CacheLock, CacheStore, SweepStats, Sweeper};
use tracing::info;
use tracing_subscriber::EnvFilter;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Serve(args) => {
            let address = args.address.unwrap_or(config.server.bind_addr);
            folio::api::run(address, config).await?
        }
        Commands::Sweep => {
            sweep(&config)?;
        }
    }

    Ok(())
}

/// One forced sweep of the finalized zone, ignoring the rate limit.
///
/// Refuses to run while a server owns the cache root. Staging is left alone:
/// the next server start purges it.
fn sweep(config: &Config) -> Result<SweepStats, AnyError> {
    let _lock = CacheLock::acquire(&config.cache.root)?;
    let store = CacheStore::open(&config.cache.root, Arc::new(SystemClock))?;
    let sweeper = Sweeper::new(config.cache.sweep_interval.as_duration());

    let stats = sweeper.sweep(&store);
    info!(
        scanned = stats.scanned,
        evicted = stats.evicted,
        skipped = stats.skipped,
        "Sweep finished"
    );
    Ok(stats)
}
