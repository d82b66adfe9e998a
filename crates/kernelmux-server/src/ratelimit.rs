//! Sliding-window flood protection for the iopub broadcast channel.
//!
//! Best-effort flood guard, not a guaranteed-delivery mechanism: a
//! rejected message is dropped silently, never queued or retried.

use std::time::{Duration, Instant};

use metrics::counter;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::metrics::{IOPUB_DATA_DROPPED_TOTAL, IOPUB_MSGS_DROPPED_TOTAL};

/// Per-connection iopub rate-limit state.
#[derive(Debug)]
pub struct RateLimitWindow {
    enabled: bool,
    msg_limit: usize,
    data_limit: usize,
    window: Duration,
    window_start: Instant,
    msg_count: usize,
    byte_count: usize,
    msgs_exceeded: u64,
    data_exceeded: u64,
}

impl RateLimitWindow {
    /// Create limiter state from the gateway configuration.
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            enabled: config.limit_rate,
            msg_limit: config.iopub_msg_rate_limit,
            data_limit: config.iopub_data_rate_limit,
            window: Duration::from_secs(config.rate_limit_window_secs),
            window_start: Instant::now(),
            msg_count: 0,
            byte_count: 0,
            msgs_exceeded: 0,
            data_exceeded: 0,
        }
    }

    /// Decide whether a message of `nbytes` encoded size is forwarded.
    ///
    /// Counters accrue even when limiting is disabled, for observability;
    /// only the admit decision is unconditional then.
    pub fn admit(&mut self, nbytes: usize) -> bool {
        self.admit_at(Instant::now(), nbytes)
    }

    /// `admit` against an explicit clock, for tests.
    pub(crate) fn admit_at(&mut self, now: Instant, nbytes: usize) -> bool {
        if now.duration_since(self.window_start) >= self.window {
            self.msg_count = 0;
            self.byte_count = 0;
            self.window_start = now;
        }
        self.msg_count += 1;
        self.byte_count += nbytes;

        if !self.enabled {
            return true;
        }
        if self.msg_count > self.msg_limit {
            self.msgs_exceeded += 1;
            counter!(IOPUB_MSGS_DROPPED_TOTAL).increment(1);
            debug!(
                msg_count = self.msg_count,
                limit = self.msg_limit,
                "iopub message rate exceeded, dropping"
            );
            return false;
        }
        if self.byte_count > self.data_limit {
            self.data_exceeded += 1;
            counter!(IOPUB_DATA_DROPPED_TOTAL).increment(1);
            debug!(
                byte_count = self.byte_count,
                limit = self.data_limit,
                "iopub data rate exceeded, dropping"
            );
            return false;
        }
        true
    }

    /// Messages counted in the current window.
    pub fn msg_count(&self) -> usize {
        self.msg_count
    }

    /// Bytes counted in the current window.
    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    /// Messages dropped by the count limit, across all windows.
    pub fn msgs_exceeded(&self) -> u64 {
        self.msgs_exceeded
    }

    /// Messages dropped by the byte limit, across all windows.
    pub fn data_exceeded(&self) -> u64 {
        self.data_exceeded
    }
}
