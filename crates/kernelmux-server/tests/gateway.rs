//! End-to-end bridge tests over the loopback kernel.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use kernelmux_protocol::codec::encode_for_client;
use kernelmux_protocol::{ChannelName, ClientFrame, MessagePart, Subprotocol};
use kernelmux_server::config::GatewayConfig;
use kernelmux_server::kernel::KernelManager;
use kernelmux_server::loopback::LoopbackKernel;
use kernelmux_server::{Gateway, KernelConnection};

fn responsive_kernel(kernel_id: &str) -> Arc<LoopbackKernel> {
    let kernel = Arc::new(LoopbackKernel::new(kernel_id, "integration-key"));
    kernel.enable_auto_respond();
    kernel
}

fn bridge(
    kernel: &Arc<LoopbackKernel>,
    subprotocol: Subprotocol,
) -> (Arc<KernelConnection>, mpsc::Receiver<ClientFrame>) {
    let config = Arc::new(GatewayConfig::default());
    let (tx, rx) = mpsc::channel(config.outbound_queue_capacity);
    let manager: Arc<dyn KernelManager> = Arc::clone(kernel) as Arc<dyn KernelManager>;
    (
        Arc::new(KernelConnection::new(manager, config, subprotocol, tx)),
        rx,
    )
}

async fn next_json(rx: &mut mpsc::Receiver<ClientFrame>) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for outbound frame")
        .expect("outbound queue closed");
    match frame {
        ClientFrame::Text(text) => serde_json::from_str(&text).unwrap(),
        ClientFrame::Binary(_) => panic!("expected a text frame"),
    }
}

async fn next_json_of_type(
    rx: &mut mpsc::Receiver<ClientFrame>,
    msg_type: &str,
) -> serde_json::Value {
    loop {
        let v = next_json(rx).await;
        if v["header"]["msg_type"] == msg_type {
            return v;
        }
    }
}

#[tokio::test]
async fn full_connect_execute_disconnect_cycle() {
    let kernel = responsive_kernel("it-kernel");
    let (conn, mut rx) = bridge(&kernel, Subprotocol::Json);

    conn.connect().await.unwrap();
    assert!(conn.is_live());
    assert_eq!(kernel.active_connections(), 1);

    // Client sends a kernel-info request; the loopback answers on shell
    // and publishes a status on iopub, both of which must reach the
    // outbound queue.
    let request = kernel.session().message("kernel_info_request");
    let frame = encode_for_client(&request, Subprotocol::Json).unwrap();
    conn.handle_incoming(&frame).await;

    let reply = next_json_of_type(&mut rx, "kernel_info_reply").await;
    assert_eq!(
        reply["parent_header"]["msg_id"],
        json!(request.msg_id().unwrap())
    );

    conn.disconnect().await;
    assert_eq!(kernel.active_connections(), 0);

    // Once pollers stop and the sender is dropped, the queue ends.
    while rx.recv().await.is_some() {}
}

#[tokio::test]
async fn iopub_broadcast_reaches_every_connection() {
    let kernel = responsive_kernel("it-kernel");
    let (conn_a, mut rx_a) = bridge(&kernel, Subprotocol::Json);
    let (conn_b, mut rx_b) = bridge(&kernel, Subprotocol::Json);
    conn_a.connect().await.unwrap();
    conn_b.connect().await.unwrap();

    let mut stream = kernel.session().message("stream");
    stream.content = MessagePart::from_value(json!({"name": "stdout", "text": "fan-out"}));
    kernel.publish_iopub(&stream).await;

    for rx in [&mut rx_a, &mut rx_b] {
        let v = next_json_of_type(rx, "stream").await;
        assert_eq!(v["content"]["text"], "fan-out");
    }

    conn_a.disconnect().await;
    conn_b.disconnect().await;
}

#[tokio::test]
async fn binary_negotiation_round_trips_buffers() {
    let kernel = responsive_kernel("it-kernel");
    let (conn, mut rx) = bridge(&kernel, Subprotocol::BinaryV1);
    conn.connect().await.unwrap();

    let mut display = kernel.session().message("display_data");
    display.content = MessagePart::from_value(json!({"data": {}}));
    display.buffers = vec![vec![0xDE, 0xAD, 0xBE, 0xEF]];
    kernel.publish_iopub(&display).await;

    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("outbound closed");
        let ClientFrame::Binary(bytes) = frame else {
            panic!("binary subprotocol must emit binary frames");
        };
        let decoded = kernelmux_protocol::codec::decode_binary(&bytes).unwrap();
        if decoded.msg_type() == Some("display_data") {
            assert_eq!(decoded.buffers, vec![vec![0xDE, 0xAD, 0xBE, 0xEF]]);
            break;
        }
    }
    conn.disconnect().await;
}

#[tokio::test]
async fn channel_failure_never_leaves_partial_state() {
    let kernel = responsive_kernel("it-kernel");
    kernel.fail_channel(ChannelName::Stdin);
    let (conn, _rx) = bridge(&kernel, Subprotocol::Json);

    assert!(conn.connect().await.is_err());
    assert!(!conn.is_live());
    assert_eq!(kernel.active_connections(), 0);

    // The failed connection still disconnects cleanly.
    conn.disconnect().await;
    conn.disconnect().await;
    assert_eq!(kernel.active_connections(), 0);
}

#[tokio::test]
async fn gateway_registry_tracks_connections() {
    let gateway = Gateway::new(GatewayConfig::default());
    let kernel = responsive_kernel("it-kernel");
    gateway.add_kernel(Arc::clone(&kernel) as Arc<dyn KernelManager>);
    let state = gateway.state();

    assert!(state.kernel("it-kernel").is_some());
    assert!(state.kernel("missing").is_none());

    let (conn, _rx) = bridge(&kernel, Subprotocol::Json);
    conn.connect().await.unwrap();
    state.connections.add(Arc::clone(&conn)).await;
    assert_eq!(state.connections.connection_count(), 1);
    assert_eq!(
        state.connections.kernel_connections("it-kernel").await.len(),
        1
    );

    state.connections.close_all().await;
    assert_eq!(state.connections.connection_count(), 0);
    assert!(!conn.is_live());
    assert_eq!(kernel.active_connections(), 0);
}
