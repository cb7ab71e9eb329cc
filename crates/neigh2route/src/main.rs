//! neigh2route daemon
//!
//! Main entry point. Mirrors reachable kernel neighbors into host routes until
//! the neighbor subscription fails or a shutdown signal arrives.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Log daemon lifecycle
//! - SI-4: System Monitoring - Real-time event processing

use anyhow::Context;
use clap::Parser;
use neigh2route::rest_api::{self, ApiState};
use neigh2route::{
    Cli, Config, KernelNeighborSource, MetricsCollector, NeighborSource, NetlinkRouteBackend,
    Reconciler, link_index_by_name,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_cli(Cli::parse())?;

    // NIST: AU-3, AU-12 - Audit logging setup
    init_logging(config.debug)?;

    info!("neigh2route: Initializing neighbor table and monitoring updates");

    match run_daemon(config).await {
        Ok(()) => {
            info!("neigh2route: Daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "neigh2route: Daemon exiting with error");
            Err(e)
        }
    }
}

/// Initialize structured logging
///
/// INFO by default, DEBUG with `--debug`; `RUST_LOG` overrides both.
fn init_logging(debug: bool) -> anyhow::Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set logger")?;
    Ok(())
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let target = config
        .resolve_target(link_index_by_name)
        .context("Failed to initialize neighbor manager")?;
    match (&config.interface, target) {
        (Some(name), Some(index)) => {
            info!(interface = %name, link_index = index, "Monitoring single interface")
        }
        _ => info!("Monitoring all interfaces"),
    }

    let metrics = MetricsCollector::new()?;
    let engine = Arc::new(
        Reconciler::new(target, NetlinkRouteBackend::default()).with_metrics(metrics.clone()),
    );

    // Subscribe before the dump so nothing between the two is missed
    let source = KernelNeighborSource::new();
    let stream = source
        .subscribe()
        .await
        .context("Failed to subscribe to neighbor updates")?;
    engine
        .initial_sync(&source)
        .await
        .context("Failed to initialize neighbor table")?;

    #[cfg(target_os = "linux")]
    {
        let prober = neigh2route::LivenessProber::new(
            engine.table(),
            neigh2route::IcmpPinger::default(),
            config.probe_period,
        )
        .with_metrics(metrics.clone());
        tokio::spawn(prober.run());
    }

    tokio::spawn(engine.clone().run_refresh(config.refresh_period));

    if let Some(addr) = config.listen {
        let state = ApiState::new(engine.table(), metrics.clone());
        tokio::spawn(async move {
            if let Err(e) = rest_api::serve(addr, state).await {
                error!(error = %e, "HTTP server failed");
            }
        });
    }

    tokio::select! {
        result = engine.run(stream) => {
            result.context("Neighbor monitoring stopped")
        }
        _ = shutdown_signal() => {
            info!("neigh2route: Received shutdown signal, removing managed routes");
            let removed = engine.drain().await;
            info!(removed, "neigh2route: Graceful shutdown complete");
            Ok(())
        }
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("neigh2route: Received SIGINT"),
        _ = terminate => info!("neigh2route: Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
