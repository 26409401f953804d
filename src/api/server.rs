use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{debug, info, warn};

use super::{
    services::{
        book_file, book_manifest, get_annotations, get_last_read_position, health,
        set_last_read_position, update_annotations,
    },
    state::AppState,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::library::DirectoryLibrary;
use crate::observability::Metrics;
use crate::queue::JobQueue;
use crate::storage::{CacheLock, CacheStore, RenamePolicy, Sweeper};
use crate::viewer::Viewer;
use crate::worker::{PassthroughRenderer, WorkerPool};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Longest pause between two attempts of the rate-limited background sweep
const MAX_SWEEP_TICK: Duration = Duration::from_secs(60 * 60);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/book-manifest/{book_id}/{fmt}", get(book_manifest))
        .route(
            "/book-file/{book_id}/{fmt}/{size}/{mtime}/{*name}",
            get(book_file),
        )
        .route(
            "/book-get-last-read-position/{which}",
            get(get_last_read_position),
        )
        .route(
            "/book-set-last-read-position/{book_id}/{fmt}",
            post(set_last_read_position),
        )
        .route("/book-get-annotations/{which}", get(get_annotations))
        .route(
            "/book-update-annotations/{book_id}/{fmt}",
            post(update_annotations),
        )
        .route("/health", get(health))
        .with_state(state)
        // Clients may gzip large annotation uploads
        .layer(RequestDecompressionLayer::new())
}

/// Open the cache and library and start the render workers.
///
/// Must be called inside a tokio runtime.
pub fn build_state(config: Config) -> Result<AppState, AnyError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    info!(path = %config.cache.root.display(), "Opening render cache");
    let store = CacheStore::open(&config.cache.root, clock.clone())
        .map_err(|e| format!("Failed to open render cache: {e}"))?
        .with_rename_policy(RenamePolicy::for_platform(
            config.cache.publish_retry_delay.as_duration(),
        ));

    info!(path = %config.library.root.display(), "Opening library");
    let library = DirectoryLibrary::open(&config.library.root, config.library.library_id.clone())
        .map_err(|e| format!("Failed to open library: {e}"))?;

    let runner = WorkerPool::spawn(Arc::new(PassthroughRenderer), config.workers.count);
    let queue = JobQueue::new(
        store,
        Sweeper::new(config.cache.sweep_interval.as_duration()),
        Arc::new(runner),
        Arc::new(Metrics::new()),
    );

    let viewer = Viewer::builder()
        .library(Arc::new(library))
        .queue(queue)
        .clock(clock)
        .formats(config.viewer.formats.clone())
        .build();

    Ok(AppState::new(config, viewer))
}

pub async fn run(address: SocketAddr, config: Config) -> Result<(), AnyError> {
    let periodic_sweep = config.cache.periodic_sweep;
    let sweep_interval = config.cache.sweep_interval.as_duration();
    // Held until the server exits; `folio sweep` refuses to run meanwhile
    let cache_lock = CacheLock::acquire(&config.cache.root)?;
    let state = build_state(config)?;

    if periodic_sweep {
        tokio::spawn(sweep_periodically(
            state.viewer.queue().clone(),
            sweep_interval.min(MAX_SWEEP_TICK),
        ));
    }

    let app = build_router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "Folio viewer listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(cache_lock);
    Ok(())
}

/// Trigger the rate-limited sweep on a timer, so an idle server still evicts
async fn sweep_periodically(queue: JobQueue, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        let queue = queue.clone();
        match tokio::task::spawn_blocking(move || queue.sweep(false)).await {
            Ok(Some(stats)) => info!(
                scanned = stats.scanned,
                evicted = stats.evicted,
                "Periodic sweep finished"
            ),
            Ok(None) => debug!("Periodic sweep skipped, ran recently"),
            Err(e) => warn!(error = %e, "Periodic sweep task failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
