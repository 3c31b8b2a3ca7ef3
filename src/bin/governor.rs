//! Governor Binary
//!
//! Standalone process that runs the monitoring loop against one database
//! target. Pairs with an external process supervisor: exit code 0 means
//! "asked to stop", the distinct memory-ceiling code means "crashed on
//! purpose, restart a clean instance".

use anyhow::Context;
use pg_governor::constants::{events, exit_codes};
use pg_governor::database::DatabaseConnection;
use pg_governor::events::{EventPublisher, GovernorEvent, Severity};
use pg_governor::monitor::MonitoringLoop;
use pg_governor::supervisor::MemoryWatchdog;
use pg_governor::{GovernorConfig, GovernorError, PgSessionControl};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    pg_governor::logging::init_structured_logging();
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let publisher = EventPublisher::default();
    publisher.publish(GovernorEvent::new(events::GOVERNOR_STARTING, Severity::Info));

    let (config, connection) = match startup(&publisher).await {
        Ok(started) => started,
        Err(e) => {
            publisher.publish(
                GovernorEvent::new(events::GOVERNOR_STARTUP_FAILED, Severity::Page)
                    .with_detail(serde_json::json!({ "error": format!("{e:#}") })),
            );
            error!(error = %format!("{e:#}"), "governor startup failed");
            return exit_codes::STARTUP_FAILURE;
        }
    };

    let sessions = Arc::new(PgSessionControl::new(connection.pool().clone()));
    let mut governor = MonitoringLoop::new(config, sessions, publisher.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    publisher.publish(GovernorEvent::new(events::GOVERNOR_STARTED, Severity::Info));

    let exit_code = match governor.run(shutdown_rx).await {
        Ok(()) => {
            publisher.publish(GovernorEvent::new(events::GOVERNOR_STOPPING, Severity::Info));
            exit_codes::SUCCESS
        }
        Err(GovernorError::ResourceExceeded {
            rss_bytes,
            ceiling_bytes,
        }) => {
            // Crash on purpose; the external supervisor restarts us clean.
            error!(rss_bytes, ceiling_bytes, "memory ceiling exceeded, self-terminating");
            return exit_codes::MEMORY_CEILING;
        }
        Err(e) => {
            error!(error = %e, "monitoring loop failed");
            exit_codes::STARTUP_FAILURE
        }
    };

    connection.close().await;
    publisher.publish(GovernorEvent::new(events::GOVERNOR_STOPPED, Severity::Info));
    exit_code
}

async fn startup(
    publisher: &EventPublisher,
) -> anyhow::Result<(GovernorConfig, DatabaseConnection)> {
    let config = GovernorConfig::from_env().context("loading configuration")?;

    let watchdog = MemoryWatchdog::new(config.memory_ceiling_bytes);
    match watchdog.install_rlimit() {
        Ok(()) => {
            publisher.publish(
                GovernorEvent::new(events::RESOURCE_LIMITS_SET, Severity::Info).with_detail(
                    serde_json::json!({ "memory_ceiling_bytes": config.memory_ceiling_bytes }),
                ),
            );
        }
        // Tolerated: the per-tick RSS check still enforces the ceiling.
        Err(e) => warn!(error = %e, "failed to install address-space rlimit"),
    }

    let connection = DatabaseConnection::new(&config)
        .await
        .context("connecting to the monitored database")?;
    connection
        .health_check()
        .await
        .context("database health check")?;

    Ok((config, connection))
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
