//! Shipyard server: webhook-driven build and deployment.
//!
//! Receives push notifications from git hosters, verifies them against the
//! stored build definition, and runs the pipeline in the background. Build
//! records are kept in PostgreSQL, or in memory when no database is given.

mod config;
mod metrics;
mod migration;
mod models;
mod routes;
mod schema;
mod seeder;
mod services;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use shipyard_pipeline::deploy::{Deployer, MailSender, SmtpMailer, Ssh2Connector};
use shipyard_pipeline::{BuildStore, MemoryStore, Pipeline};

use crate::services::pg_store::{self, PgStore};

#[derive(Parser)]
#[command(name = "shipyard", about = "Shipyard build and deployment server")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "CI_PORT", default_value = "9090")]
    port: u16,

    /// PostgreSQL connection URL. Runs with an in-memory store when unset.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Directory of `*.yml` build definitions loaded into the in-memory store
    #[arg(long, env = "CI_SEED_DIR")]
    seed_dir: Option<PathBuf>,

    /// Database pool size
    #[arg(long, env = "CI_DB_MAX_CONNECTIONS", default_value = "10")]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let config = config::CiConfig::from_env();

    tracing::info!("Starting Shipyard server...");

    let store = open_store(&cli).await?;

    let mailer: Option<Arc<dyn MailSender>> = match config.smtp_settings() {
        Some(settings) => Some(Arc::new(SmtpMailer::new(&settings)?)),
        None => None,
    };
    let connector = Arc::new(Ssh2Connector::new(config.ssh_timeout()));
    let deployer = Deployer::new(mailer, connector);

    let shutdown = CancellationToken::new();
    let pipeline = Arc::new(Pipeline::new(
        config.pipeline_settings(),
        store,
        deployer,
        shutdown.clone(),
    ));

    // Initialize metrics
    metrics::init_metrics();

    let state = routes::AppState {
        pipeline,
        config: Arc::new(config),
    };
    let app = routes::router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Shipyard server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn open_store(cli: &Cli) -> anyhow::Result<Arc<dyn BuildStore>> {
    if let Some(url) = &cli.database_url {
        let pool = pg_store::create_pool(url, cli.max_connections)?;
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
            tracing::info!("Running database migration...");
            migration::run_migration(&mut conn).await?;
            tracing::info!("Database migration completed.");
        }
        return Ok(Arc::new(PgStore::new(pool)));
    }

    tracing::warn!("DATABASE_URL not set -- build records are kept in memory");
    let store = MemoryStore::new();
    if let Some(dir) = &cli.seed_dir {
        let count = seeder::seed_definitions(&store, dir).await?;
        tracing::info!("Seeded {} build definitions from {}", count, dir.display());
    }
    Ok(Arc::new(store))
}

/// Wait for SIGINT/SIGTERM, then cancel running pipelines.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
    shutdown.cancel();
}
