//! Studyhall lifecycle daemon.
//!
//! Connects to PostgreSQL, applies migrations and runs the lifecycle sweeper
//! until SIGTERM or Ctrl+C. SIGUSR1 requests an immediate pass.

mod config;

use anyhow::Context;
use config::Config;
use std::sync::Arc;
use studyhall_core::environment::SystemClock;
use studyhall_core::notify::TracingNotifier;
use studyhall_postgres::PostgresStore;
use studyhall_runtime::engine::{EngineEnvironment, MembershipEngine};
use studyhall_runtime::metrics::MetricsServer;
use studyhall_runtime::sweeper::LifecycleSweeper;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting studyhall daemon");
    info!(
        max_connections = config.postgres.max_connections,
        sweep_interval_secs = config.sweeper.interval_secs,
        sweep_batch_size = config.sweeper.batch_size,
        cash_window_hours = config.engine.cash_collection_window_hours,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr());
    if let Err(e) = metrics.start() {
        warn!(error = %e, "Metrics exporter unavailable, continuing without it");
    }

    info!("Connecting to database...");
    let store = PostgresStore::connect_with(&config.postgres.url, &config.pool_settings())
        .await
        .context("connecting to PostgreSQL")?;
    store.migrate().await.context("running migrations")?;
    info!("Database ready");

    let env = EngineEnvironment::with_store(
        Arc::new(SystemClock),
        Arc::new(store),
        Arc::new(TracingNotifier),
    );
    let engine = MembershipEngine::new(env, config.allocator(), config.issuer_retry());
    let sweeper = Arc::new(engine.sweeper(config.sweeper()));

    let (shutdown_tx, _) = broadcast::channel(1);
    let sweep_handle = Arc::clone(&sweeper).spawn(shutdown_tx.subscribe());
    let trigger_handle = spawn_trigger_listener(Arc::clone(&sweeper), shutdown_tx.subscribe());

    shutdown_signal().await?;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(config.shutdown_timeout(), sweep_handle).await {
        Ok(Ok(())) => info!("Sweeper stopped"),
        Ok(Err(e)) => error!(error = %e, "Sweeper task failed"),
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout,
            "Sweeper did not stop in time, abandoning current pass"
        ),
    }
    trigger_handle.abort();

    let status = sweeper.status();
    info!(
        passes = status.passes,
        last_error = status.last_error.as_deref().unwrap_or("none"),
        "Daemon stopped"
    );
    Ok(())
}

/// Run a sweep pass whenever the process receives SIGUSR1.
#[cfg(unix)]
fn spawn_trigger_listener(
    sweeper: Arc<LifecycleSweeper>,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut usr1 = match signal::unix::signal(signal::unix::SignalKind::user_defined1()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "SIGUSR1 handler unavailable, manual sweeps disabled");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                received = usr1.recv() => {
                    if received.is_none() {
                        break;
                    }
                    sweeper.trigger();
                }
            }
        }
    })
}

#[cfg(not(unix))]
fn spawn_trigger_listener(
    _sweeper: Arc<LifecycleSweeper>,
    _shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async {})
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("installing Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
    Ok(())
}
