//! Kernel liveness handshake.
//!
//! Before the long-lived channel set is trusted, the bridge nudges the
//! kernel with `kernel_info_request` probes on transient shell and
//! control sockets. The handshake completes only once a shell or control
//! reply *and* at least one iopub message have been observed: the iopub
//! observation is what proves the broadcast subscription is actually
//! established, not just that the kernel answers requests. Each attempt
//! uses a fresh message id and an explicit timeout; the retry budget is
//! bounded, and exhaustion fails the connect rather than hanging.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use kernelmux_protocol::ChannelName;

use crate::errors::BridgeError;
use crate::kernel::{ChannelSocket, KernelManager};
use crate::metrics::{NUDGE_ATTEMPTS_TOTAL, NUDGE_FAILURES_TOTAL};
use crate::session::SessionContext;

/// Run the liveness handshake. Returns the number of attempts used.
///
/// `iopub` is the connection's already-subscribed broadcast socket; the
/// transient probe sockets are opened and closed here.
pub async fn nudge(
    manager: &dyn KernelManager,
    session: &SessionContext,
    iopub: &Arc<dyn ChannelSocket>,
    max_attempts: u32,
    attempt_timeout: Duration,
) -> Result<u32, BridgeError> {
    let shell = manager
        .connect_channel(ChannelName::Shell)
        .await
        .map_err(|source| BridgeError::ChannelOpen {
            channel: ChannelName::Shell,
            source,
        })?;
    let control = match manager.connect_channel(ChannelName::Control).await {
        Ok(socket) => socket,
        Err(source) => {
            shell.close().await;
            return Err(BridgeError::ChannelOpen {
                channel: ChannelName::Control,
                source,
            });
        }
    };

    let mut info_reply_seen = false;
    let mut iopub_seen = false;
    let mut shell_open = true;
    let mut control_open = true;
    let mut iopub_open = true;
    let mut attempts = 0u32;

    'attempts: while attempts < max_attempts {
        attempts += 1;
        counter!(NUDGE_ATTEMPTS_TOTAL).increment(1);

        // Fresh message id per probe so a retried attempt's reply is
        // distinguishable from a stale one.
        if control_open {
            if let Err(e) = session
                .send(&*control, ChannelName::Control, &session.message("kernel_info_request"))
                .await
            {
                debug!(error = %e, "control probe send failed");
                control_open = false;
            }
        }
        if shell_open {
            if let Err(e) = session
                .send(&*shell, ChannelName::Shell, &session.message("kernel_info_request"))
                .await
            {
                debug!(error = %e, "shell probe send failed");
                shell_open = false;
            }
        }

        let deadline = Instant::now() + attempt_timeout;
        while !(info_reply_seen && iopub_seen) {
            // No path to the missing signal: give up early.
            if !iopub_seen && !iopub_open {
                break 'attempts;
            }
            if !info_reply_seen && !shell_open && !control_open {
                break 'attempts;
            }
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => continue 'attempts,
                r = shell.recv_multipart(), if shell_open && !info_reply_seen => match r {
                    Ok(_) => {
                        debug!("shell reply observed");
                        info_reply_seen = true;
                    }
                    Err(_) => shell_open = false,
                },
                r = control.recv_multipart(), if control_open && !info_reply_seen => match r {
                    Ok(_) => {
                        debug!("control reply observed");
                        info_reply_seen = true;
                    }
                    Err(_) => control_open = false,
                },
                r = iopub.recv_multipart(), if iopub_open && !iopub_seen => match r {
                    Ok(_) => {
                        debug!("iopub message observed");
                        iopub_seen = true;
                    }
                    Err(_) => iopub_open = false,
                },
            }
        }
        break;
    }

    shell.close().await;
    control.close().await;

    if info_reply_seen && iopub_seen {
        debug!(attempts, "kernel nudge successful");
        Ok(attempts)
    } else {
        counter!(NUDGE_FAILURES_TOTAL).increment(1);
        Err(BridgeError::NudgeFailed {
            attempts,
            info_reply_seen,
            iopub_seen,
        })
    }
}
