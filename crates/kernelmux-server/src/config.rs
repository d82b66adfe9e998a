//! Gateway configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the kernelmux gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Whether iopub flood protection is enabled.
    pub limit_rate: bool,
    /// Messages admitted per rate window on iopub.
    pub iopub_msg_rate_limit: usize,
    /// Bytes admitted per rate window on iopub.
    pub iopub_data_rate_limit: usize,
    /// Rate window length in seconds.
    pub rate_limit_window_secs: u64,
    /// Capacity of the per-connection outbound queue (the backpressure
    /// point between pollers and the client transport).
    pub outbound_queue_capacity: usize,
    /// Liveness handshake attempts before the connect fails.
    pub nudge_attempts: u32,
    /// Per-attempt liveness handshake timeout in milliseconds.
    pub nudge_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            limit_rate: true,
            iopub_msg_rate_limit: 1000,
            iopub_data_rate_limit: 1_000_000,
            rate_limit_window_secs: 3,
            outbound_queue_capacity: 256,
            nudge_attempts: 5,
            nudge_timeout_ms: 500,
        }
    }
}
