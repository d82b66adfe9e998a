//! Per-client connection lifecycle.
//!
//! A [`KernelConnection`] owns everything one websocket client needs to
//! talk to one kernel: the channel registry, the session context, the
//! outbound frame queue feeding the transport writer, and the poller
//! tasks. Lifecycle is connect → live → disconnect; connect runs the
//! liveness handshake before any poller starts, and disconnect is
//! idempotent so transport-close and server-shutdown paths can both
//! call it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kernelmux_protocol::codec::decode_from_client;
use kernelmux_protocol::{ChannelName, ClientFrame, Subprotocol};

use crate::channels::ChannelRegistry;
use crate::config::GatewayConfig;
use crate::errors::{BridgeError, SocketError};
use crate::kernel::KernelManager;
use crate::metrics::{
    INBOUND_DISCARDED_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::nudge::nudge;
use crate::poller::spawn_poller;
use crate::ratelimit::RateLimitWindow;
use crate::session::SessionContext;

/// Channels that get a poller. Heartbeat is opened but never polled;
/// it carries no protocol messages.
const POLLED_CHANNELS: [ChannelName; 4] = [
    ChannelName::Iopub,
    ChannelName::Shell,
    ChannelName::Control,
    ChannelName::Stdin,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Idle,
    Connecting,
    Live,
    Closed,
}

impl ConnectionState {
    fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Live => "live",
            ConnectionState::Closed => "closed",
        }
    }
}

/// One client's bridge to one kernel.
pub struct KernelConnection {
    connection_id: String,
    kernel_id: String,
    manager: Arc<dyn KernelManager>,
    config: Arc<GatewayConfig>,
    subprotocol: Subprotocol,
    state: Mutex<ConnectionState>,
    /// Whether `notify_connect` has been issued and not yet balanced.
    /// Teardown can race a failing connect; whichever path swaps this
    /// flag first owns the matching `notify_disconnect`.
    notified_connect: AtomicBool,
    session: Mutex<Option<SessionContext>>,
    channels: ChannelRegistry,
    outbound: Mutex<Option<mpsc::Sender<ClientFrame>>>,
    pollers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl KernelConnection {
    pub fn new(
        manager: Arc<dyn KernelManager>,
        config: Arc<GatewayConfig>,
        subprotocol: Subprotocol,
        outbound: mpsc::Sender<ClientFrame>,
    ) -> Self {
        Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            kernel_id: manager.kernel_id().to_string(),
            manager,
            config,
            subprotocol,
            state: Mutex::new(ConnectionState::Idle),
            notified_connect: AtomicBool::new(false),
            session: Mutex::new(None),
            channels: ChannelRegistry::new(),
            outbound: Mutex::new(Some(outbound)),
            pollers: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    pub fn subprotocol(&self) -> Subprotocol {
        self.subprotocol
    }

    pub fn is_live(&self) -> bool {
        *self.state.lock() == ConnectionState::Live
    }

    /// Fires when the connection tears down; the transport read loop
    /// watches this.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Open all channels, run the liveness handshake, and start the
    /// pollers. Callable exactly once per connection.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Idle {
                return Err(BridgeError::AlreadyConnected {
                    state: state.as_str(),
                });
            }
            *state = ConnectionState::Connecting;
        }

        // A kernel mid-restart may still come up during the nudge's
        // retry budget, so readiness is advisory rather than fatal.
        if !self.manager.is_ready() {
            warn!(
                kernel_id = %self.kernel_id,
                "kernel not reporting ready, attempting connect anyway"
            );
        }

        let session = self.manager.session();
        *self.session.lock() = Some(session.clone());
        self.manager.notify_connect();
        self.notified_connect.store(true, Ordering::SeqCst);

        if let Err(e) = self.channels.open_all(self.manager.as_ref()).await {
            self.abort_connect();
            return Err(e);
        }

        let Some(iopub) = self.channels.get(ChannelName::Iopub) else {
            self.channels.close_all().await;
            self.abort_connect();
            return Err(BridgeError::ChannelOpen {
                channel: ChannelName::Iopub,
                source: SocketError::Closed,
            });
        };

        let timeout = Duration::from_millis(self.config.nudge_timeout_ms);
        match nudge(
            self.manager.as_ref(),
            &session,
            &iopub,
            self.config.nudge_attempts,
            timeout,
        )
        .await
        {
            Ok(attempts) => {
                debug!(connection_id = %self.connection_id, attempts, "kernel nudge complete");
            }
            Err(e) => {
                self.channels.close_all().await;
                self.abort_connect();
                return Err(e);
            }
        }

        let Some(outbound) = self.outbound.lock().clone() else {
            self.channels.close_all().await;
            self.abort_connect();
            return Err(BridgeError::AlreadyConnected { state: "closed" });
        };
        let mut handles = Vec::with_capacity(POLLED_CHANNELS.len());
        for channel in POLLED_CHANNELS {
            if let Some(socket) = self.channels.get(channel) {
                let limiter =
                    (channel == ChannelName::Iopub).then(|| RateLimitWindow::new(&self.config));
                handles.push(spawn_poller(
                    channel,
                    socket,
                    self.subprotocol,
                    outbound.clone(),
                    limiter,
                    self.cancel.child_token(),
                ));
            }
        }
        *self.pollers.lock() = handles;

        // A disconnect may have run while the handshake was in flight;
        // it already tore the channels down, so do not go live over it.
        let became_live = {
            let mut state = self.state.lock();
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Live;
                true
            } else {
                false
            }
        };
        if !became_live {
            self.channels.close_all().await;
            if self.notified_connect.swap(false, Ordering::SeqCst) {
                let _ = self.manager.notify_disconnect();
            }
            return Err(BridgeError::AlreadyConnected { state: "closed" });
        }

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(
            connection_id = %self.connection_id,
            kernel_id = %self.kernel_id,
            subprotocol = ?self.subprotocol,
            "connection live"
        );
        Ok(())
    }

    fn abort_connect(&self) {
        *self.state.lock() = ConnectionState::Closed;
        if self.notified_connect.swap(false, Ordering::SeqCst) {
            let _ = self.manager.notify_disconnect();
        }
    }

    /// Forward one client frame to the kernel's request/reply channel.
    ///
    /// Frames that arrive before the channels are open, or that fail to
    /// decode, are discarded with a log; neither closes the connection.
    pub async fn handle_incoming(&self, frame: &ClientFrame) {
        if self.channels.is_empty() {
            counter!(INBOUND_DISCARDED_TOTAL).increment(1);
            warn!(
                connection_id = %self.connection_id,
                "discarding client frame, channels not open"
            );
            return;
        }
        let message = match decode_from_client(frame) {
            Ok(message) => message,
            Err(e) => {
                counter!(INBOUND_DISCARDED_TOTAL).increment(1);
                warn!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "discarding undecodable client frame"
                );
                return;
            }
        };
        let session = self.session.lock().clone();
        let Some(session) = session else {
            counter!(INBOUND_DISCARDED_TOTAL).increment(1);
            return;
        };
        let Some(shell) = self.channels.get(ChannelName::Shell) else {
            counter!(INBOUND_DISCARDED_TOTAL).increment(1);
            return;
        };
        if let Err(e) = session.send(&*shell, ChannelName::Shell, &message).await {
            warn!(
                connection_id = %self.connection_id,
                error = %e,
                "failed to forward client message to kernel"
            );
        }
    }

    /// Tear the connection down. Safe to call more than once; repeat
    /// calls are no-ops.
    pub async fn disconnect(&self) {
        let prev = {
            let mut state = self.state.lock();
            let prev = *state;
            *state = ConnectionState::Closed;
            prev
        };
        if prev == ConnectionState::Closed {
            return;
        }

        if self.notified_connect.swap(false, Ordering::SeqCst) && self.manager.notify_disconnect() {
            debug!(
                kernel_id = %self.kernel_id,
                "last client disconnected, kernel output may be buffered"
            );
        }

        self.cancel.cancel();
        self.channels.close_all().await;
        // Dropping the sender ends the transport writer loop.
        let _ = self.outbound.lock().take();
        let handles = std::mem::take(&mut *self.pollers.lock());
        for handle in handles {
            let _ = handle.await;
        }

        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        if prev == ConnectionState::Live {
            gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        }
        info!(
            connection_id = %self.connection_id,
            kernel_id = %self.kernel_id,
            "connection closed"
        );
    }
}
