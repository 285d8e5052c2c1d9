//! Root cancellation signal.
//!
//! The binary creates one [`ShutdownController`] from the process signal
//! handler; every long-running loop holds a [`Shutdown`] clone and selects on
//! [`Shutdown::cancelled`] next to its work.

use tokio::sync::watch;

/// Create a linked controller/token pair.
pub fn channel() -> (ShutdownController, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownController { tx }, Shutdown { rx })
}

/// Owning side of the shutdown signal.
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    /// Signal every [`Shutdown`] clone. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cancellation token handed to every loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once shutdown has been requested. A dropped controller counts
    /// as shutdown so orphaned loops cannot hang.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}
