//! Tutorlane service host.
//!
//! Connects the ledger store, applies migrations, starts the metrics exporter
//! and the notification worker, then runs until Ctrl+C or SIGTERM.

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tutorlane::Config;
use tutorlane_core::environment::SystemClock;
use tutorlane_postgres::PostgresLedgerStore;
use tutorlane_runtime::metrics::MetricsServer;
use tutorlane_runtime::{
    ConsoleNotificationGateway, Ledger, LedgerEnvironment, NotificationDispatcher,
    NotificationWorker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tutorlane ledger service");
    info!(
        max_connections = config.postgres.max_connections,
        cancel_before_minutes = config.policy.cancel_before_minutes,
        join_window_minutes = config.policy.join_window_minutes,
        "Configuration loaded"
    );

    // Metrics
    let metrics_addr = config
        .metrics_addr()
        .context("METRICS_HOST/METRICS_PORT do not form a socket address")?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start().context("Failed to start metrics exporter")?;

    // Ledger store
    info!("Connecting to ledger database...");
    let store = PostgresLedgerStore::connect_with(&config.postgres.url, &config.pool_settings())
        .await
        .context("Failed to connect to the ledger database")?;
    store.migrate().await.context("Failed to apply migrations")?;
    info!("Ledger database ready");

    // Notifications
    let (shutdown_tx, _) = broadcast::channel(1);
    let (dispatcher, outbox) = NotificationDispatcher::channel(config.notifications.queue_capacity);
    let worker = NotificationWorker::new(
        Arc::new(ConsoleNotificationGateway::new()),
        outbox,
        shutdown_tx.subscribe(),
    )
    .with_retry(config.delivery_retry())
    .spawn();

    // Engine; the transport layer attaches to this ledger.
    let env = LedgerEnvironment::new(store.clone(), SystemClock, dispatcher)
        .with_policy(config.booking_policy());
    let ledger = Ledger::new(env);
    info!("Ledger engine ready");

    shutdown_signal().await;

    // Dropping the ledger drops the last dispatcher, so the worker sees a
    // closed queue even if the broadcast is missed.
    drop(ledger);
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(config.shutdown_timeout(), worker).await {
        Ok(Ok(())) => info!("Notification worker drained"),
        Ok(Err(e)) => warn!(error = %e, "Notification worker panicked"),
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout,
            "Notification worker did not stop in time"
        ),
    }

    store.pool().close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
