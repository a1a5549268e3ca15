use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::{Mutex, Notify, watch};
use tracing_subscriber::EnvFilter;

use siphon::archive::FileStore;
use siphon::archive::postgres::PgArchive;
use siphon::breaker::CircuitBreaker;
use siphon::config::Config;
use siphon::intake::InboxScanner;
use siphon::queue::WorkQueue;
use siphon::queue::postgres::PgWorkQueue;
use siphon::scheduler::ContinuousScheduler;
use siphon::state::AppState;
use siphon::upstream::http::HttpUpstream;
use siphon::worker::IngestionWorker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config = Config::from_env().expect("Failed to load configuration");

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting Siphon");

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations applied");

    let queue: Arc<dyn WorkQueue> = Arc::new(PgWorkQueue::new(
        pool.clone(),
        config.retry.clone(),
        config.scheduler.lease_duration,
    ));

    // Items left in flight by a previous run become retryable again.
    let recovered = queue
        .recover_interrupted()
        .await
        .expect("Failed to recover interrupted items");
    if recovered > 0 {
        tracing::info!("Recovered {recovered} items left in flight by the previous run");
    }

    let breaker = Arc::new(Mutex::new(CircuitBreaker::new(config.breaker.clone())));
    let upstream = Arc::new(HttpUpstream::new(config.upstream.clone()));
    let archive = Arc::new(PgArchive::new(
        pool.clone(),
        FileStore::new(&config.archive_path),
    ));
    let intake = Arc::new(InboxScanner::new(&config.inbox_path));

    let worker = IngestionWorker::new(
        queue.clone(),
        archive,
        upstream.clone(),
        upstream,
        breaker.clone(),
        config.worker.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let wake = Arc::new(Notify::new());

    let scheduler = ContinuousScheduler::new(
        queue.clone(),
        intake,
        worker,
        breaker.clone(),
        config.scheduler.clone(),
        shutdown_rx.clone(),
        wake.clone(),
    );
    let phase = scheduler.phase_receiver();
    let scheduler_handle = tokio::spawn(scheduler.run());

    let state = Arc::new(AppState {
        queue,
        breaker,
        phase,
        wake,
        shutdown: shutdown_tx.clone(),
    });

    let addr = SocketAddr::new(config.host, config.port);
    let app = siphon::build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx, shutdown_rx))
        .await?;

    let _ = scheduler_handle.await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolves when shutdown should begin, from an OS signal or the ops
/// API. Either way the watch flag is raised so the scheduler stops at
/// its next item boundary.
async fn shutdown_signal(shutdown: watch::Sender<bool>, mut requested: watch::Receiver<bool>) {
    tokio::select! {
        _ = os_signal() => {
            tracing::info!("Shutdown signal received, starting graceful shutdown");
            let _ = shutdown.send(true);
        }
        _ = requested.changed() => {
            tracing::info!("Shutdown requested, starting graceful shutdown");
        }
    }

    // A second signal skips the graceful drain.
    tokio::spawn(async {
        os_signal().await;
        tracing::warn!("Second shutdown signal, exiting immediately");
        std::process::exit(1);
    });
}

async fn os_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
