//! In-memory transport pair.
//!
//! Backends cross-wire an inner server and a proxy client through a pair of
//! unbounded channels carrying [`JsonRpcMessage`] values in both directions.
//! No serialization happens on this path.

use tokio::sync::mpsc;

use crate::protocol::JsonRpcMessage;

/// One end of an in-memory message transport.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<JsonRpcMessage>,
    rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
}

/// Create a connected transport pair. Messages sent on one end are received
/// on the other.
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport { tx: a_tx, rx: b_rx },
        MemoryTransport { tx: b_tx, rx: a_rx },
    )
}

impl MemoryTransport {
    /// Send a message to the peer. Returns false when the peer is gone.
    pub fn send(&self, message: JsonRpcMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Receive the next message, or `None` once the peer has closed.
    pub async fn recv(&mut self) -> Option<JsonRpcMessage> {
        self.rx.recv().await
    }

    /// Split into the raw sender and receiver halves.
    pub fn into_split(
        self,
    ) -> (
        mpsc::UnboundedSender<JsonRpcMessage>,
        mpsc::UnboundedReceiver<JsonRpcMessage>,
    ) {
        (self.tx, self.rx)
    }
}
