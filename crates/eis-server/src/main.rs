//! EIS Server - Main entry point

use anyhow::Result;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

use eis_batch::{
    ChunkStep, FlatFileReader, Job, JobLauncher, PassthroughProcessor, RecordReader, RecordWriter,
};
use eis_common::logging::{init_logging, LogConfig};
use eis_common::Employee;
use eis_server::{
    config::Config,
    ledger::PgExecutionLedger,
    routes::{import_routes, AppState},
    store::PgEmployeeStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_file_prefix("eis-server");

    init_logging(&log_config)?;

    info!("Starting EIS Server");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    // Run migrations
    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    // Wire up the import job
    let ledger = Arc::new(PgExecutionLedger::new(db_pool.clone()));
    let launcher = Arc::new(JobLauncher::new(ledger, config.import.concurrency_limit));
    let job = Arc::new(build_import_job(&config, db_pool.clone()));
    info!(
        input = %config.import.input_path,
        chunk_size = config.import.chunk_size,
        "Import job registered"
    );

    // Create application state
    let state = AppState {
        db: db_pool,
        launcher,
        job,
    };

    // Build the application router
    let app = create_router(state);

    // Create socket address
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown; in-flight requests get up to
    // the configured grace period after the signal before we give up.
    let (signal_tx, signal_rx) = tokio::sync::oneshot::channel();
    let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(());
    });

    let grace = Duration::from_secs(config.server.shutdown_timeout_secs);
    tokio::select! {
        result = graceful => {
            result?;
            info!("Server shut down gracefully");
        }
        _ = async {
            let _ = signal_rx.await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(
                "Shutdown grace period of {}s expired, aborting open connections",
                config.server.shutdown_timeout_secs
            );
        }
    }

    Ok(())
}

/// Build the employee import job from configuration
///
/// Each execution opens a fresh reader over the configured input resource;
/// chunks are committed through the Postgres store.
fn build_import_job(config: &Config, pool: sqlx::PgPool) -> Job<Employee> {
    let input_path = PathBuf::from(&config.import.input_path);
    let delimiter = config.import.delimiter;
    let lines_to_skip = config.import.lines_to_skip;

    let step = ChunkStep::new(
        "csv-to-db-step",
        config.import.chunk_size,
        Box::new(move || {
            Box::new(
                FlatFileReader::new(&input_path, Arc::new(Employee::from_tokens))
                    .with_delimiter(delimiter)
                    .with_lines_to_skip(lines_to_skip),
            ) as Box<dyn RecordReader<Employee>>
        }),
        Box::new(PassthroughProcessor),
        Arc::new(PgEmployeeStore::new(pool)) as Arc<dyn RecordWriter<Employee>>,
    );

    Job::new("csv-import-job", step)
}

/// Create the application router with all routes and middleware
fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(import_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
