//! Kernel connection endpoints.
//!
//! Mirrors the Jupyter connection-file shape: one port per channel plus
//! transport, ip, and signing key. The kernel manager resolves these to
//! connectable socket addresses; the bridge itself never opens network
//! sockets directly.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelName;

/// Connection information for one running kernel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Kernel host address.
    pub ip: String,
    /// Transport scheme, typically `tcp`.
    pub transport: String,
    /// Signature scheme, typically `hmac-sha256`.
    pub signature_scheme: String,
    /// Session signing key.
    pub key: String,
    /// Request/reply channel port.
    pub shell_port: u16,
    /// Broadcast channel port.
    pub iopub_port: u16,
    /// Input prompt channel port.
    pub stdin_port: u16,
    /// Out-of-band command channel port.
    pub control_port: u16,
    /// Heartbeat channel port.
    pub hb_port: u16,
}

impl ConnectionInfo {
    /// The port bound to a channel.
    pub fn port(&self, channel: ChannelName) -> u16 {
        match channel {
            ChannelName::Control => self.control_port,
            ChannelName::Shell => self.shell_port,
            ChannelName::Iopub => self.iopub_port,
            ChannelName::Stdin => self.stdin_port,
            ChannelName::Heartbeat => self.hb_port,
        }
    }

    /// The connectable endpoint address for a channel,
    /// e.g. `tcp://127.0.0.1:5301`.
    pub fn endpoint(&self, channel: ChannelName) -> String {
        format!("{}://{}:{}", self.transport, self.ip, self.port(channel))
    }
}
