//! # kernelmux-server
//!
//! WebSocket gateway bridging many client connections to one running
//! kernel's channel sockets.
//!
//! - WebSocket endpoint with subprotocol negotiation (JSON envelope or
//!   the binary-offset `v1.kernel.websocket.jupyter.org` format)
//! - Per-connection lifecycle: `Idle → Connecting → Live → Closed`
//! - All-or-nothing channel registry over the kernel's five sockets
//! - Retrying liveness handshake ("nudge") before channels are trusted
//! - One poller task per subscribed channel, fanning kernel messages into
//!   a bounded per-connection outbound queue (the backpressure point)
//! - Sliding-window flood protection on the iopub broadcast channel
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`
//!
//! The kernel process itself is an external collaborator behind the
//! [`kernel::KernelManager`] and [`kernel::ChannelSocket`] traits.

#![deny(unsafe_code)]

pub mod channels;
pub mod config;
pub mod connection;
pub mod errors;
pub mod kernel;
pub mod logging;
pub mod loopback;
pub mod metrics;
pub mod nudge;
pub mod poller;
pub mod ratelimit;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod websocket;

pub use config::GatewayConfig;
pub use connection::KernelConnection;
pub use errors::{BridgeError, SocketError};
pub use server::Gateway;
