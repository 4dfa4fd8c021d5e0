//! Shutdown signaling.
//!
//! The supervisor owns a `watch` channel; directors and relay tasks hold
//! receivers and stop when the flag flips. The binary additionally waits for
//! OS signals and turns them into a supervisor stop.

use tokio::sync::watch;
use tracing::info;

/// Resolve when the shutdown flag is set. A dropped sender counts as
/// shutdown so tasks never outlive their supervisor.
pub(crate) async fn triggered(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Wait for SIGINT or SIGTERM (ctrl-c on Windows).
#[cfg(unix)]
pub async fn wait_for_signal() -> crate::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> crate::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn triggered_fires_on_flag() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            triggered(&mut rx).await;
        });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn triggered_fires_on_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), triggered(&mut rx))
            .await
            .expect("dropped sender counts as shutdown");
    }
}
