use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use crate::server::AppState;

/// How long in-flight runs get to tear down their sandboxes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Cancel queued and in-flight runs, then wait for the in-flight ones to
/// finish tearing down.
pub async fn graceful_shutdown(state: &Arc<AppState>) {
    drain(state, DRAIN_TIMEOUT).await;
}

async fn drain(state: &Arc<AppState>, timeout: Duration) {
    tracing::info!("Starting graceful shutdown...");
    state.shutdown.send_replace(true);

    let pending = state.queue.write().await.drain();
    for run_id in &pending {
        state.mark_cancelled(run_id).await;
    }
    if !pending.is_empty() {
        tracing::info!(count = pending.len(), "Dropped queued runs");
    }

    let in_flight = state.in_flight_runs().await;
    if in_flight.is_empty() {
        tracing::info!("No in-flight runs to clean up");
        return;
    }

    tracing::info!(count = in_flight.len(), "Waiting for in-flight runs to tear down");
    let slots = state.config.server.max_concurrent_runs.max(1) as u32;
    match tokio::time::timeout(timeout, state.permits.acquire_many(slots)).await {
        Ok(Ok(_all)) => tracing::info!("Graceful shutdown complete"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Run slots closed during shutdown"),
        Err(_) => tracing::warn!(
            remaining = ?state.in_flight_runs().await,
            "Timed out waiting for runs to tear down"
        ),
    }
}
