//! Kernel-side collaborator interfaces.
//!
//! The kernel process manager and the channel transport are external to
//! the bridge; this module pins down the two seams it relies on:
//! [`KernelManager`] (readiness, session identity, per-channel socket
//! connectors, connection accounting) and [`ChannelSocket`] (multipart
//! send/recv plus close). An in-memory [`InMemorySocket`] pair backs the
//! crate's tests and the [`crate::loopback`] kernel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kernelmux_protocol::connect_info::ConnectionInfo;
use kernelmux_protocol::ChannelName;

use crate::errors::SocketError;
use crate::session::SessionContext;

/// One directional kernel channel socket carrying multipart messages.
///
/// `close` must unblock any task blocked in `recv_multipart`; pollers
/// treat the resulting [`SocketError::Closed`] as normal termination.
#[async_trait]
pub trait ChannelSocket: Send + Sync {
    /// Receive one multipart message, blocking until a message arrives
    /// or the socket closes.
    async fn recv_multipart(&self) -> Result<Vec<Vec<u8>>, SocketError>;

    /// Send one multipart message.
    async fn send_multipart(&self, frames: Vec<Vec<u8>>) -> Result<(), SocketError>;

    /// Close the socket, unblocking pending receives on both ends.
    async fn close(&self);
}

/// The kernel process manager, specified at its interface only.
#[async_trait]
pub trait KernelManager: Send + Sync {
    /// The kernel this manager owns.
    fn kernel_id(&self) -> &str;

    /// Whether the kernel backend reports ready.
    fn is_ready(&self) -> bool;

    /// The kernel's session identity (signing key, session id).
    fn session(&self) -> SessionContext;

    /// The kernel's channel endpoint set.
    fn connection_info(&self) -> ConnectionInfo;

    /// Open a new socket connected to the given channel's endpoint.
    async fn connect_channel(
        &self,
        channel: ChannelName,
    ) -> Result<Arc<dyn ChannelSocket>, SocketError>;

    /// A client connection attached.
    fn notify_connect(&self);

    /// A client connection detached. Returns `true` when it was the last
    /// open connection, so the manager can decide to start buffering
    /// kernel output (a policy it owns, not the bridge).
    fn notify_disconnect(&self) -> bool;
}

type Frames = Vec<Vec<u8>>;

/// One end of an in-memory duplex channel socket.
///
/// Used by tests and the loopback kernel; semantics mirror what the
/// bridge needs from a real queue socket: multipart framing, blocking
/// receive, and close-unblocks-receive on both ends.
pub struct InMemorySocket {
    tx: parking_lot::Mutex<Option<mpsc::Sender<Frames>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Frames>>,
    closed: CancellationToken,
}

/// Create a connected pair of in-memory sockets.
pub fn socket_pair(capacity: usize) -> (Arc<InMemorySocket>, Arc<InMemorySocket>) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    let a = Arc::new(InMemorySocket {
        tx: parking_lot::Mutex::new(Some(b_tx)),
        rx: tokio::sync::Mutex::new(a_rx),
        closed: CancellationToken::new(),
    });
    let b = Arc::new(InMemorySocket {
        tx: parking_lot::Mutex::new(Some(a_tx)),
        rx: tokio::sync::Mutex::new(b_rx),
        closed: CancellationToken::new(),
    });
    (a, b)
}

#[async_trait]
impl ChannelSocket for InMemorySocket {
    async fn recv_multipart(&self) -> Result<Frames, SocketError> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(SocketError::Closed),
            msg = rx.recv() => msg.ok_or(SocketError::Closed),
        }
    }

    async fn send_multipart(&self, frames: Frames) -> Result<(), SocketError> {
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => tx.send(frames).await.map_err(|_| SocketError::Closed),
            None => Err(SocketError::Closed),
        }
    }

    async fn close(&self) {
        // Dropping the sender lets the peer's receive drain and end.
        let _ = self.tx.lock().take();
        self.closed.cancel();
    }
}
