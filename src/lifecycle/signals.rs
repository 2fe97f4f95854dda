//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGTERM or SIGINT (Ctrl+C elsewhere)
//! - Report which one arrived so the caller can start a graceful shutdown

/// Resolve when the process is asked to stop. Returns the signal name.
#[cfg(unix)]
pub async fn wait_for_shutdown() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        name = ctrl_c() => name,
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
