//! Ctrl-C handling shared by the long-running daemons.

use std::time::Duration;
use tokio::sync::watch;

/// Install the Ctrl-C handler once. The receiver flips to `true` on the first interrupt.
///
/// A signal that arrives mid-cycle is latched, so the daemon stops as soon as the
/// cycle finishes instead of sleeping through another interval.
pub fn ctrl_c_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Unable to listen for Ctrl-C: {e}");
            // Keep the sender alive so daemons fall back to plain sleeping.
            std::future::pending::<()>().await;
        }
        log::info!("Shutting down...");
        let _ = tx.send(true);
    });
    rx
}

/// Sleep for `interval`. Returns `true` when shutdown was requested before or during the wait.
pub async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    if *shutdown.borrow_and_update() {
        return true;
    }

    let changed = tokio::select! {
        _ = tokio::time::sleep(interval) => return false,
        changed = shutdown.changed() => changed,
    };

    match changed {
        Ok(()) => *shutdown.borrow(),
        Err(_) => {
            // No sender left, so no request can arrive any more.
            tokio::time::sleep(interval).await;
            false
        }
    }
}
