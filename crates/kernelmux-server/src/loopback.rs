//! In-process loopback kernel.
//!
//! Implements [`KernelManager`] over in-memory socket pairs, standing in
//! for a real kernel process in tests and local experiments. With
//! auto-respond enabled it answers `kernel_info_request` on shell and
//! control and publishes a status message on iopub, which is exactly the
//! traffic the liveness handshake needs to observe.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use kernelmux_protocol::codec::decode_multipart;
use kernelmux_protocol::connect_info::ConnectionInfo;
use kernelmux_protocol::{ChannelName, WireMessage};

use crate::errors::SocketError;
use crate::kernel::{socket_pair, ChannelSocket, InMemorySocket, KernelManager};
use crate::session::SessionContext;

/// Socket buffer depth for loopback channels.
const SOCKET_CAPACITY: usize = 64;

/// An in-process kernel backend.
pub struct LoopbackKernel {
    kernel_id: String,
    session: SessionContext,
    ready: AtomicBool,
    auto_respond: AtomicBool,
    /// Kernel-side halves of every connected iopub socket.
    iopub: Arc<Mutex<Vec<Arc<InMemorySocket>>>>,
    /// Kernel-side halves of every connected socket, per channel.
    endpoints: Mutex<HashMap<ChannelName, Vec<Arc<InMemorySocket>>>>,
    /// Channels configured to refuse connection, for failure tests.
    failing: Mutex<HashSet<ChannelName>>,
    connections: AtomicUsize,
}

impl LoopbackKernel {
    /// Create a ready loopback kernel with the given signing key.
    pub fn new(kernel_id: impl Into<String>, key: &str) -> Self {
        let kernel_id = kernel_id.into();
        let session = SessionContext::new(format!("{kernel_id}-session"), key.as_bytes().to_vec(), "kernel");
        Self {
            kernel_id,
            session,
            ready: AtomicBool::new(true),
            auto_respond: AtomicBool::new(false),
            iopub: Arc::new(Mutex::new(Vec::new())),
            endpoints: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            connections: AtomicUsize::new(0),
        }
    }

    /// Answer kernel-info probes automatically and emit iopub status.
    pub fn enable_auto_respond(&self) {
        self.auto_respond.store(true, Ordering::Relaxed);
    }

    /// Flip the readiness flag.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Make future connects to a channel fail.
    pub fn fail_channel(&self, channel: ChannelName) {
        let _ = self.failing.lock().insert(channel);
    }

    /// The most recently connected kernel-side half of a channel.
    pub fn last_endpoint(&self, channel: ChannelName) -> Option<Arc<InMemorySocket>> {
        self.endpoints.lock().get(&channel).and_then(|v| v.last().cloned())
    }

    /// The kernel-side half of the nth socket connected on a channel.
    pub fn endpoint(&self, channel: ChannelName, index: usize) -> Option<Arc<InMemorySocket>> {
        self.endpoints
            .lock()
            .get(&channel)
            .and_then(|v| v.get(index).cloned())
    }

    /// Open connections as counted by connect/disconnect notifications.
    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Publish a message on every connected iopub socket.
    pub async fn publish_iopub(&self, msg: &WireMessage) {
        let frames = self.session.to_frames(msg);
        let sockets: Vec<_> = self.iopub.lock().clone();
        for socket in sockets {
            let _ = socket.send_multipart(frames.clone()).await;
        }
    }

    fn spawn_responder(&self, socket: Arc<InMemorySocket>) {
        let session = self.session.clone();
        let iopub = Arc::clone(&self.iopub);
        let _ = tokio::spawn(async move {
            while let Ok(frames) = socket.recv_multipart().await {
                let Ok((_, request)) = decode_multipart(&frames) else {
                    continue;
                };
                if request.msg_type() != Some("kernel_info_request") {
                    continue;
                }
                let reply = session.reply("kernel_info_reply", &request);
                let _ = socket.send_multipart(session.to_frames(&reply)).await;

                let mut status = session.reply("status", &request);
                status.content = kernelmux_protocol::MessagePart::from_value(
                    serde_json::json!({"execution_state": "busy"}),
                );
                let status_frames = session.to_frames(&status);
                let iopub_sockets: Vec<_> = iopub.lock().clone();
                for iopub_socket in iopub_sockets {
                    let _ = iopub_socket.send_multipart(status_frames.clone()).await;
                }
            }
            debug!("loopback responder exiting");
        });
    }
}

#[async_trait]
impl KernelManager for LoopbackKernel {
    fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn session(&self) -> SessionContext {
        self.session.clone()
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            ip: "127.0.0.1".into(),
            transport: "inproc".into(),
            signature_scheme: "hmac-sha256".into(),
            key: String::new(),
            shell_port: 0,
            iopub_port: 0,
            stdin_port: 0,
            control_port: 0,
            hb_port: 0,
        }
    }

    async fn connect_channel(
        &self,
        channel: ChannelName,
    ) -> Result<Arc<dyn ChannelSocket>, SocketError> {
        if self.failing.lock().contains(&channel) {
            return Err(SocketError::Transport(format!(
                "connection refused on {channel}"
            )));
        }
        let (client, kernel) = socket_pair(SOCKET_CAPACITY);
        self.endpoints
            .lock()
            .entry(channel)
            .or_default()
            .push(Arc::clone(&kernel));
        match channel {
            ChannelName::Iopub => self.iopub.lock().push(kernel),
            ChannelName::Shell | ChannelName::Control
                if self.auto_respond.load(Ordering::Relaxed) =>
            {
                self.spawn_responder(kernel);
            }
            _ => {}
        }
        Ok(client)
    }

    fn notify_connect(&self) {
        let _ = self.connections.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_disconnect(&self) -> bool {
        self.connections.fetch_sub(1, Ordering::SeqCst) == 1
    }
}
