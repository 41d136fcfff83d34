//! Signal handling for graceful shutdown.

use tracing::{info, warn};

/// Wait for a shutdown signal (SIGINT, SIGTERM, or SIGQUIT on Unix).
///
/// If a handler cannot be registered, that signal is skipped and the others
/// are still honored.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    async fn recv(handler: &mut Option<Signal>) {
        match handler {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    let register = |kind: SignalKind, name: &'static str| match signal(kind) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(signal = name, error = %e, "Failed to install signal handler");
            None
        }
    };

    let mut sigint = register(SignalKind::interrupt(), "SIGINT");
    let mut sigterm = register(SignalKind::terminate(), "SIGTERM");
    let mut sigquit = register(SignalKind::quit(), "SIGQUIT");

    tokio::select! {
        _ = recv(&mut sigint) => {
            info!(message = "Signal received.", signal = "SIGINT");
        }
        _ = recv(&mut sigterm) => {
            info!(message = "Signal received.", signal = "SIGTERM");
        }
        _ = recv(&mut sigquit) => {
            info!(message = "Signal received.", signal = "SIGQUIT");
        }
    }
}

/// Wait for Ctrl-C on platforms without Unix signals.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(message = "Signal received.", signal = "ctrl-c"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
