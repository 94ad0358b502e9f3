use crate::config::Config;
use crate::server::{HttpServer, SharedState};
use crate::telemetry::Metrics;

use std::{sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;

const RECORDING_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new()?);
    let shutdown = CancellationToken::new();

    let state = match SharedState::new(&config, metrics, shutdown.clone()) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to initialize application state: {:?}", e);
            return Err(e);
        }
    };
    let recordings = state.recordings.clone();

    let server = HttpServer::new(state, &config).await?;
    let server_handle = server.run(shutdown.clone());

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    shutdown.cancel();

    let stopped = recordings.stop_all();
    if stopped > 0 {
        tracing::info!(stopped, "Waiting for recordings to close");
    }
    if !recordings.wait_idle(RECORDING_DRAIN_TIMEOUT).await {
        tracing::warn!("Recordings still running after {:?}", RECORDING_DRAIN_TIMEOUT);
    }

    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
