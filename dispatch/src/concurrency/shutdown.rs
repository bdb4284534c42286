//! Broadcast shutdown signal built on a [`watch`] channel.
//!
//! Every receiver observes the signal, including receivers subscribed after it was sent.

use tokio::sync::watch;

/// Receiver side of the shutdown signal.
pub type ShutdownRx = watch::Receiver<bool>;

/// Sending side of the shutdown signal, cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals shutdown to every receiver.
    ///
    /// Fails only when all receivers have been dropped.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<bool>> {
        self.0.send(true)
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }
}

/// Creates a new shutdown signal in the "running" state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), rx)
}

/// Resolves once shutdown has been signaled or every sender is gone.
pub async fn wait_for_shutdown(shutdown_rx: &mut ShutdownRx) {
    // An error means the sender was dropped, which is treated as a shutdown as well.
    let _ = shutdown_rx.wait_for(|shutdown| *shutdown).await;
}
