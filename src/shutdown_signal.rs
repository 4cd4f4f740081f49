use tokio::{signal, sync::broadcast};
use tracing::info;

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for Ctrl-C");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received terminate signal"),
    }
}

// Resolves once a shutdown was broadcast, or the sender is gone
pub async fn wait_for_shutdown(mut shutdown_rx: broadcast::Receiver<()>) {
    let _ = shutdown_rx.recv().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_for_shutdown_resolves_on_broadcast() {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let waiters = (0..3)
            .map(|_| tokio::spawn(wait_for_shutdown(shutdown_tx.subscribe())))
            .collect::<Vec<_>>();

        shutdown_tx.send(()).unwrap();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_resolves_when_sender_dropped() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(shutdown_rx))
            .await
            .unwrap();
    }
}
