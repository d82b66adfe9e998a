//! WebSocket upgrade and per-connection transport loops.
//!
//! `GET /kernels/{kernel_id}/channels` upgrades to a websocket,
//! negotiates the subprotocol (binary if the client offered the v1
//! token, JSON otherwise), and runs one [`KernelConnection`] for the
//! lifetime of the socket: a writer task drains the outbound queue into
//! the sink, while this task reads client frames and feeds them to the
//! connection until the socket or the connection goes away.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use kernelmux_protocol::{ClientFrame, Subprotocol};

use crate::connection::KernelConnection;
use crate::errors::BridgeError;
use crate::server::AppState;

/// Upgrade handler for the kernel channels endpoint.
pub async fn kernel_channels(
    ws: WebSocketUpgrade,
    Path(kernel_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let Some(manager) = state.kernel(&kernel_id) else {
        let err = BridgeError::KernelUnavailable { kernel_id };
        warn!(error = %err, "rejecting channels request");
        return (StatusCode::NOT_FOUND, err.to_string()).into_response();
    };
    ws.protocols([Subprotocol::V1_TOKEN])
        .on_upgrade(move |socket| serve_connection(socket, manager, state))
}

async fn serve_connection(
    socket: WebSocket,
    manager: Arc<dyn crate::kernel::KernelManager>,
    state: AppState,
) {
    let subprotocol =
        Subprotocol::from_token(socket.protocol().and_then(|value| value.to_str().ok()));

    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.outbound_queue_capacity);
    let connection = Arc::new(KernelConnection::new(
        manager,
        Arc::clone(&state.config),
        subprotocol,
        outbound_tx,
    ));
    let connection_id = connection.connection_id().to_string();
    info!(
        %connection_id,
        kernel_id = connection.kernel_id(),
        subprotocol = ?subprotocol,
        "websocket accepted"
    );

    state.connections.add(Arc::clone(&connection)).await;
    if let Err(e) = connection.connect().await {
        warn!(%connection_id, error = %e, "connect failed");
        let _ = state.connections.remove(&connection_id).await;
        connection.disconnect().await;
        return;
    }

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, outbound_rx));

    read_inbound(stream, &connection).await;

    connection.disconnect().await;
    let _ = state.connections.remove(&connection_id).await;
    // The writer ends once disconnect drops the outbound sender.
    let _ = writer.await;
    debug!(%connection_id, "websocket task finished");
}

/// Drain the outbound queue into the websocket sink.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ClientFrame>,
) {
    while let Some(frame) = outbound.recv().await {
        let message = match frame {
            ClientFrame::Text(text) => Message::Text(text.into()),
            ClientFrame::Binary(bytes) => Message::Binary(bytes.into()),
        };
        if sink.send(message).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Read client frames until the socket closes or the connection is
/// cancelled out from under us (server shutdown).
async fn read_inbound(mut stream: SplitStream<WebSocket>, connection: &KernelConnection) {
    let cancel = connection.cancel_token();
    loop {
        let incoming = tokio::select! {
            () = cancel.cancelled() => break,
            incoming = stream.next() => incoming,
        };
        match incoming {
            Some(Ok(Message::Text(text))) => {
                connection
                    .handle_incoming(&ClientFrame::Text(text.to_string()))
                    .await;
            }
            Some(Ok(Message::Binary(bytes))) => {
                connection
                    .handle_incoming(&ClientFrame::Binary(bytes.to_vec()))
                    .await;
            }
            // axum answers pings itself; pongs need no action.
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                debug!(
                    connection_id = connection.connection_id(),
                    "client closed websocket"
                );
                break;
            }
            Some(Err(e)) => {
                debug!(
                    connection_id = connection.connection_id(),
                    error = %e,
                    "websocket read error"
                );
                break;
            }
        }
    }
}
