use tokio::sync::watch;
use tracing::{info, warn};

/// Cooperative shutdown signal.
///
/// The ETL cycle polls `is_triggered` at its safe checkpoints (between
/// pagination pages and between sink table loads) so an in-flight cycle is
/// never killed mid-write.
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct ShutdownHandle {
    sender: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> (ShutdownHandle, Shutdown) {
        let (sender, receiver) = watch::channel(false);
        (ShutdownHandle { sender }, Shutdown { receiver })
    }

    /// A shutdown signal that never fires, for one-shot invocations and tests.
    pub fn never() -> Shutdown {
        let (sender, receiver) = watch::channel(false);
        // Keep the channel open for the lifetime of the process.
        std::mem::forget(sender);
        Shutdown { receiver }
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves when shutdown is requested.
    pub async fn triggered(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.sender.send(true);
    }
}

/// Listen for SIGINT/SIGTERM and trip the shutdown flag.
pub async fn listen_for_signals(handle: ShutdownHandle) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                if ctrl_c.await.is_ok() {
                    info!("Received SIGINT, graceful shutdown...");
                    handle.trigger();
                }
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, graceful shutdown..."),
            _ = sigterm.recv() => info!("Received SIGTERM, graceful shutdown..."),
        }
        handle.trigger();
    }

    #[cfg(not(unix))]
    {
        if ctrl_c.await.is_ok() {
            info!("Received SIGINT, graceful shutdown...");
            handle.trigger();
        }
    }
}
