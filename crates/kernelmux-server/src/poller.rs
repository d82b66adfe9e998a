//! Kernel-to-client channel pollers.
//!
//! One poller task per subscribed channel: receive a multipart message
//! from the kernel socket, decode it, re-encode for the negotiated
//! client subprotocol, and hand the frame to the connection's outbound
//! queue. Decode failures skip the message and keep the loop alive;
//! socket closure and cancellation end it. The iopub poller additionally
//! carries the rate limiter, since iopub is the only channel a kernel
//! can flood.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kernelmux_protocol::codec::{decode_multipart, encode_for_client};
use kernelmux_protocol::{ChannelName, ClientFrame, Subprotocol};

use crate::errors::SocketError;
use crate::kernel::ChannelSocket;
use crate::metrics::CHANNEL_MESSAGES_TOTAL;
use crate::ratelimit::RateLimitWindow;

/// Spawn the poll loop for one channel. The handle resolves when the
/// socket closes, the token fires, or the outbound queue is gone.
pub fn spawn_poller(
    channel: ChannelName,
    socket: Arc<dyn ChannelSocket>,
    subprotocol: Subprotocol,
    outbound: mpsc::Sender<ClientFrame>,
    mut limiter: Option<RateLimitWindow>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let frames = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(%channel, "poller cancelled");
                    break;
                }
                result = socket.recv_multipart() => match result {
                    Ok(frames) => frames,
                    Err(SocketError::Closed) => {
                        debug!(%channel, "channel socket closed");
                        break;
                    }
                    Err(e) => {
                        warn!(%channel, error = %e, "channel receive failed");
                        break;
                    }
                },
            };

            let message = match decode_multipart(&frames) {
                Ok((_identities, message)) => message,
                Err(e) => {
                    warn!(%channel, error = %e, "dropping undecodable kernel message");
                    continue;
                }
            };

            let frame = match encode_for_client(&message, subprotocol) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(%channel, error = %e, "dropping unencodable kernel message");
                    continue;
                }
            };

            if let Some(limiter) = limiter.as_mut() {
                if !limiter.admit(frame.len()) {
                    continue;
                }
            }

            counter!(CHANNEL_MESSAGES_TOTAL, "channel" => channel.as_str()).increment(1);
            if outbound.send(frame).await.is_err() {
                debug!(%channel, "outbound queue dropped, stopping poller");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;

    use kernelmux_protocol::MessagePart;

    use crate::config::GatewayConfig;
    use crate::kernel::socket_pair;
    use crate::session::SessionContext;

    fn session() -> SessionContext {
        SessionContext::new("sess-1", b"key".to_vec(), "tester")
    }

    async fn next_frame(rx: &mut mpsc::Receiver<ClientFrame>) -> ClientFrame {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for outbound frame")
            .expect("outbound channel closed")
    }

    #[tokio::test]
    async fn forwards_decoded_messages_as_json() {
        let (bridge, kernel) = socket_pair(8);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = spawn_poller(
            ChannelName::Iopub,
            bridge,
            Subprotocol::Json,
            tx,
            None,
            cancel.clone(),
        );

        let sess = session();
        let mut msg = sess.message("stream");
        msg.content = MessagePart::from_value(json!({"name": "stdout", "text": "hi"}));
        kernel.send_multipart(sess.to_frames(&msg)).await.unwrap();

        match next_frame(&mut rx).await {
            ClientFrame::Text(text) => {
                let v: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(v["header"]["msg_type"], "stream");
                assert_eq!(v["content"]["text"], "hi");
            }
            ClientFrame::Binary(_) => panic!("expected text frame"),
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn forwards_binary_when_negotiated() {
        let (bridge, kernel) = socket_pair(8);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let _handle = spawn_poller(
            ChannelName::Shell,
            bridge,
            Subprotocol::BinaryV1,
            tx,
            None,
            cancel.clone(),
        );

        let sess = session();
        let msg = sess.message("execute_reply");
        kernel.send_multipart(sess.to_frames(&msg)).await.unwrap();

        assert!(matches!(next_frame(&mut rx).await, ClientFrame::Binary(_)));
        cancel.cancel();
    }

    #[tokio::test]
    async fn undecodable_message_is_skipped_not_fatal() {
        let (bridge, kernel) = socket_pair(8);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let _handle = spawn_poller(
            ChannelName::Iopub,
            bridge,
            Subprotocol::Json,
            tx,
            None,
            cancel.clone(),
        );

        // No delimiter frame: undecodable.
        kernel
            .send_multipart(vec![b"garbage".to_vec()])
            .await
            .unwrap();
        let sess = session();
        let msg = sess.message("status");
        kernel.send_multipart(sess.to_frames(&msg)).await.unwrap();

        match next_frame(&mut rx).await {
            ClientFrame::Text(text) => assert!(text.contains("status")),
            ClientFrame::Binary(_) => panic!("expected text frame"),
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn rate_limited_messages_are_dropped_silently() {
        let config = GatewayConfig {
            iopub_msg_rate_limit: 1,
            ..GatewayConfig::default()
        };
        let (bridge, kernel) = socket_pair(8);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let _handle = spawn_poller(
            ChannelName::Iopub,
            bridge,
            Subprotocol::Json,
            tx,
            Some(RateLimitWindow::new(&config)),
            cancel.clone(),
        );

        let sess = session();
        for _ in 0..3 {
            let msg = sess.message("stream");
            kernel.send_multipart(sess.to_frames(&msg)).await.unwrap();
        }
        // First passes; the rest exceed the msg limit within the window.
        let _ = next_frame(&mut rx).await;
        let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(extra.is_err(), "over-limit messages must not be forwarded");
        cancel.cancel();
    }

    #[tokio::test]
    async fn socket_close_ends_poller() {
        let (bridge, kernel) = socket_pair(8);
        let (tx, _rx) = mpsc::channel(8);
        let handle = spawn_poller(
            ChannelName::Stdin,
            bridge,
            Subprotocol::Json,
            tx,
            None,
            CancellationToken::new(),
        );

        kernel.close().await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller did not stop on close")
            .unwrap();
    }

    #[tokio::test]
    async fn cancellation_ends_poller() {
        let (bridge, _kernel) = socket_pair(8);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = spawn_poller(
            ChannelName::Control,
            bridge,
            Subprotocol::Json,
            tx,
            None,
            cancel.clone(),
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller did not stop on cancel")
            .unwrap();
    }
}
