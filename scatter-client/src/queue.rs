//! Response queue - the FIFO between sub-request completion and consumer.
//!
//! Pushes never block: completions arrive from transport tasks that must
//! not stall. Once the consuming iterator is gone, pushes drop silently;
//! in-flight sub-requests are never rescinded, their late results just
//! have nowhere to go.

use tokio::sync::mpsc;
use tracing::trace;

/// Push side of a response FIFO.
pub struct ResponseQueue<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> ResponseQueue<T> {
    /// Creates a queue, returning the push side and the receive side.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Pushes a completed result.
    ///
    /// Never blocks. Results pushed after the consumer is gone are
    /// dropped silently.
    pub fn push(&self, item: T) {
        if self.tx.send(item).is_err() {
            trace!("result dropped, response iterator already closed");
        }
    }

    /// Returns true if the consuming side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Clone for ResponseQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}
