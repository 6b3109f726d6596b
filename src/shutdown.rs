//! Shutdown requests from the operating system
//!
//! Turns SIGINT, SIGTERM and SIGQUIT (Ctrl-C on Windows) into a cancellation
//! of the supervisor loop.

use tokio_util::sync::CancellationToken;

/// Waits for a termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => log::info!("Received SIGINT"),
        _ = sigterm.recv() => log::info!("Received SIGTERM"),
        _ = sigquit.recv() => log::info!("Received SIGQUIT"),
    }
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    log::info!("Received Ctrl-C");
    Ok(())
}

/// Cancel `token` on the first termination signal
///
/// If the signal handlers cannot be installed the supervisor keeps running
/// without graceful shutdown support.
pub fn cancel_on_shutdown_signal(token: CancellationToken) {
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                log::info!("Shutdown requested, stopping host");
                token.cancel();
            }
            Err(e) => log::error!("Failed to set up shutdown signal handlers: {}", e),
        }
    });
}
