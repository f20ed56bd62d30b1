//! Operator-triggered shutdown.

use std::future::Future;
use std::io;

use tracing::info;

/// Installs the shutdown signal handlers and returns a future that resolves
/// when the operator asks the server to stop.
///
/// On unix this is SIGHUP, SIGINT or SIGTERM; elsewhere Ctrl-C. Must be
/// called from within a tokio runtime.
#[cfg(unix)]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = sighup.recv() => info!("SIGHUP received, shutting down"),
            _ = sigint.recv() => info!("SIGINT received, shutting down"),
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        }
    })
}

#[cfg(not(unix))]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    Ok(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
    })
}
