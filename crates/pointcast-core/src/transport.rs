//! In-process transport behind the channel seam
//!
//! The replication protocol only needs an abstract bidirectional reliable
//! message pipe plus a way to bind and dial well-known addresses. This
//! backend implements that seam with an in-process switchboard: a shared
//! address registry handing out paired mpsc queues. Per-channel FIFO
//! ordering comes from the queues; closure is observed as `recv()`
//! returning `None` on one side and failed sends on the other.
//!
//! Binding an address that is already taken fails with `AddrInUse`, which
//! is what drives session-code collision retry. Dialing an unbound
//! address fails with `NotFound`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Queue depth for pending inbound connections on a listener
const ACCEPT_DEPTH: usize = 16;

/// Queue depth for in-flight messages on one channel direction
const CHANNEL_DEPTH: usize = 64;

/// Transport-layer failures
#[derive(Error, Debug)]
pub enum TransportError {
    /// The address is already bound by a live listener
    #[error("Address already in use: {0}")]
    AddrInUse(String),

    /// No live listener at the address
    #[error("No listener at address: {0}")]
    NotFound(String),

    /// The remote end of the channel is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// The channel's send queue is full; the peer is not draining
    #[error("Channel backlogged")]
    ChannelFull,
}

type Bindings = Arc<Mutex<HashMap<String, mpsc::Sender<Channel>>>>;

/// Shared address registry for binding and dialing endpoints
///
/// Clones share the same registry; hand one clone to every peer that
/// should be able to reach the others.
#[derive(Clone, Default)]
pub struct Switchboard {
    bindings: Bindings,
}

impl Switchboard {
    /// Create a new empty switchboard
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an address and start accepting connections
    ///
    /// Fails with `AddrInUse` while a live listener holds the address.
    /// A binding whose listener has been dropped counts as released.
    pub fn bind(&self, addr: &str) -> Result<Listener, TransportError> {
        let mut bindings = self.bindings.lock();
        if let Some(existing) = bindings.get(addr) {
            if !existing.is_closed() {
                return Err(TransportError::AddrInUse(addr.to_string()));
            }
        }
        let (tx, rx) = mpsc::channel(ACCEPT_DEPTH);
        bindings.insert(addr.to_string(), tx);
        debug!(addr, "Address bound");
        Ok(Listener {
            addr: addr.to_string(),
            rx,
            bindings: self.bindings.clone(),
        })
    }

    /// Dial a bound address and open a channel to its listener
    pub async fn connect(&self, addr: &str) -> Result<Channel, TransportError> {
        let accept_tx = self
            .bindings
            .lock()
            .get(addr)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(addr.to_string()))?;

        let (local, remote) = Channel::pair();
        // A binding whose listener is gone is indistinguishable from an
        // unbound address to the dialer.
        accept_tx
            .send(remote)
            .await
            .map_err(|_| TransportError::NotFound(addr.to_string()))?;
        debug!(addr, "Channel connected");
        Ok(local)
    }
}

/// Accepting side of a bound address
///
/// Dropping the listener releases the binding.
pub struct Listener {
    addr: String,
    rx: mpsc::Receiver<Channel>,
    bindings: Bindings,
}

impl Listener {
    /// Wait for the next inbound channel
    ///
    /// Returns `None` once the listener is closed.
    pub async fn accept(&mut self) -> Option<Channel> {
        self.rx.recv().await
    }

    /// The address this listener is bound to
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let mut bindings = self.bindings.lock();
        // Only release our own (now closed) binding; a rebind may already
        // hold the address.
        if let Some(tx) = bindings.get(&self.addr) {
            self.rx.close();
            if tx.is_closed() {
                bindings.remove(&self.addr);
                debug!(addr = %self.addr, "Address released");
            }
        }
    }
}

/// One end of a bidirectional reliable message pipe
pub struct Channel {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Channel {
    /// Create two connected channel ends
    pub fn pair() -> (Channel, Channel) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_DEPTH);
        (
            Channel { tx: a_tx, rx: a_rx },
            Channel { tx: b_tx, rx: b_rx },
        )
    }

    /// Split into independently owned send and receive halves
    pub fn split(self) -> (ChannelSender, ChannelReceiver) {
        (
            ChannelSender { tx: self.tx },
            ChannelReceiver { rx: self.rx },
        )
    }
}

/// Sending half of a channel; clones share the same pipe
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelSender {
    /// Send one message, preserving per-channel FIFO order
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        self.tx
            .send(data.into())
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Send without waiting for queue space
    ///
    /// A full queue means the peer stopped draining; callers that hold a
    /// lock use this and treat `ChannelFull` like a dead channel rather
    /// than blocking everyone else behind the slow peer.
    pub fn try_send(&self, data: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        self.tx.try_send(data.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ChannelClosed,
        })
    }

    /// Whether the remote receive half still exists
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Receiving half of a channel
///
/// Should be polled by a single task, not shared.
pub struct ChannelReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelReceiver {
    /// Receive the next message; `None` means the channel closed
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_connect_round_trip() {
        let board = Switchboard::new();
        let mut listener = board.bind("pointcast/ABCD").unwrap();

        let client = board.connect("pointcast/ABCD").await.unwrap();
        let server = listener.accept().await.unwrap();

        let (client_tx, _client_rx) = client.split();
        let (_server_tx, mut server_rx) = server.split();

        client_tx.send(b"hello".to_vec()).await.unwrap();
        assert_eq!(server_rx.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_double_bind_fails() {
        let board = Switchboard::new();
        let _listener = board.bind("pointcast/ABCD").unwrap();
        assert!(matches!(
            board.bind("pointcast/ABCD"),
            Err(TransportError::AddrInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_after_release() {
        let board = Switchboard::new();
        let listener = board.bind("pointcast/ABCD").unwrap();
        drop(listener);
        assert!(board.bind("pointcast/ABCD").is_ok());
    }

    #[tokio::test]
    async fn test_connect_unbound_fails() {
        let board = Switchboard::new();
        assert!(matches!(
            board.connect("pointcast/ZZZZ").await,
            Err(TransportError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_recv_none_after_remote_drop() {
        let (a, b) = Channel::pair();
        let (_a_tx, mut a_rx) = a.split();
        drop(b);
        assert!(a_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_fails_after_remote_drop() {
        let (a, b) = Channel::pair();
        let (a_tx, _a_rx) = a.split();
        drop(b);
        assert!(!a_tx.is_open());
        assert!(matches!(
            a_tx.send(b"x".to_vec()).await,
            Err(TransportError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_try_send_full_queue_is_backlogged() {
        let (a, b) = Channel::pair();
        let (a_tx, _a_rx) = a.split();
        let (_b_tx, _b_rx) = b.split();

        // Fill the queue without draining the other side.
        let mut sent = 0;
        let err = loop {
            match a_tx.try_send(vec![0u8]) {
                Ok(()) => sent += 1,
                Err(e) => break e,
            }
        };
        assert!(sent >= 1);
        assert!(matches!(err, TransportError::ChannelFull));
        assert!(a_tx.is_open());
    }

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let (a, b) = Channel::pair();
        let (a_tx, _a_rx) = a.split();
        let (_b_tx, mut b_rx) = b.split();

        for i in 0u8..10 {
            a_tx.send(vec![i]).await.unwrap();
        }
        for i in 0u8..10 {
            assert_eq!(b_rx.recv().await.unwrap(), vec![i]);
        }
    }
}
