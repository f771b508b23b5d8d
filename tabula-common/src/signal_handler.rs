use std::future::Future;

use anyhow::{Context, Result};
use tracing::info;

#[cfg(unix)]
/// Registers the OS shutdown signal handlers and returns a future which
/// completes once any of them fires.
///
/// Registration happens eagerly so a signal received before the future is
/// first polled is not lost.
pub fn wait_shutdown_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut quit = signal(SignalKind::quit()).context("Register SIGQUIT handler")?;
    let mut interrupt =
        signal(SignalKind::interrupt()).context("Register SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Register SIGTERM handler")?;

    Ok(async move {
        let name = tokio::select! {
            _ = quit.recv() => "SIGQUIT",
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        info!(signal = name, "Received shutdown signal");
    })
}

#[cfg(not(unix))]
/// Returns a future which completes once Ctrl-C is pressed.
pub fn wait_shutdown_signal() -> Result<impl Future<Output = ()>> {
    Ok(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(signal = "ctrl-c", "Received shutdown signal");
        }
    })
}
