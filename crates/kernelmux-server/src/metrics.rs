//! Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Kernel messages forwarded to clients (counter, labels: channel).
pub const CHANNEL_MESSAGES_TOTAL: &str = "channel_messages_total";
/// Iopub messages dropped by count limit (counter).
pub const IOPUB_MSGS_DROPPED_TOTAL: &str = "iopub_msgs_dropped_total";
/// Iopub messages dropped by byte limit (counter).
pub const IOPUB_DATA_DROPPED_TOTAL: &str = "iopub_data_dropped_total";
/// Liveness handshake attempts (counter).
pub const NUDGE_ATTEMPTS_TOTAL: &str = "nudge_attempts_total";
/// Liveness handshake failures (counter).
pub const NUDGE_FAILURES_TOTAL: &str = "nudge_failures_total";
/// Client frames discarded because the connection was not live (counter).
pub const INBOUND_DISCARDED_TOTAL: &str = "inbound_discarded_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_unique() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            CHANNEL_MESSAGES_TOTAL,
            IOPUB_MSGS_DROPPED_TOTAL,
            IOPUB_DATA_DROPPED_TOTAL,
            NUDGE_ATTEMPTS_TOTAL,
            NUDGE_FAILURES_TOTAL,
            INBOUND_DISCARDED_TOTAL,
        ];
        let mut sorted = names.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
    }
}
