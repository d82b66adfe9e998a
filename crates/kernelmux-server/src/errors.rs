//! Error hierarchy for the bridge.

use kernelmux_protocol::ChannelName;
use thiserror::Error;

/// A channel socket failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SocketError {
    /// The socket was closed. Normal poller termination, never surfaced
    /// to the client as an error.
    #[error("socket closed")]
    Closed,

    /// Transport-level failure.
    #[error("socket error: {0}")]
    Transport(String),
}

/// Connection-level bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No kernel with this id is registered with the gateway.
    #[error("kernel {kernel_id} is not available")]
    KernelUnavailable {
        /// The kernel being requested.
        kernel_id: String,
    },

    /// Opening a channel socket failed; the connect transition is
    /// abandoned and the registry left empty.
    #[error("failed to open {channel} channel: {source}")]
    ChannelOpen {
        /// The channel that failed to open.
        channel: ChannelName,
        /// The socket failure.
        #[source]
        source: SocketError,
    },

    /// The liveness handshake exhausted its retry budget.
    #[error(
        "kernel liveness handshake failed after {attempts} attempts \
         (shell/control reply: {info_reply_seen}, iopub observed: {iopub_seen})"
    )]
    NudgeFailed {
        /// Attempts made before giving up.
        attempts: u32,
        /// Whether any shell or control reply arrived.
        info_reply_seen: bool,
        /// Whether any broadcast-channel message arrived.
        iopub_seen: bool,
    },

    /// `connect` was called more than once on the same connection.
    #[error("connection already connected (state: {state})")]
    AlreadyConnected {
        /// The state the connection was found in.
        state: &'static str,
    },

    /// A kernel-bound send failed.
    #[error("failed to send on {channel} channel: {source}")]
    Send {
        /// The channel being written.
        channel: ChannelName,
        /// The socket failure.
        #[source]
        source: SocketError,
    },
}
