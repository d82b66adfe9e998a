//! Per-kernel session identity.
//!
//! A [`SessionContext`] is captured once per connection from the kernel
//! manager and never mutated: it carries the signing key and builds
//! protocol-correct messages (fresh message id, canonical timestamp,
//! signed frames) for every kernel-bound send.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use kernelmux_protocol::codec::DELIMITER;
use kernelmux_protocol::sign::sign_frames;
use kernelmux_protocol::{ChannelName, MessagePart, WireMessage};

use crate::errors::BridgeError;
use crate::kernel::ChannelSocket;

/// Protocol version stamped into built headers.
const PROTOCOL_VERSION: &str = "5.3";

/// Immutable session identity shared read-only across the handshake,
/// the pollers, and the inbound path.
#[derive(Clone)]
pub struct SessionContext {
    session_id: String,
    key: Vec<u8>,
    username: String,
}

impl SessionContext {
    /// Create a session context.
    pub fn new(session_id: impl Into<String>, key: impl Into<Vec<u8>>, username: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            key: key.into(),
            username: username.into(),
        }
    }

    /// The kernel session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Build a message of the given type with a fresh message id.
    pub fn message(&self, msg_type: &str) -> WireMessage {
        let mut msg = WireMessage::empty();
        msg.header = MessagePart::from_value(self.header(msg_type));
        msg
    }

    /// Build a reply message whose parent header is the request's header.
    pub fn reply(&self, msg_type: &str, parent: &WireMessage) -> WireMessage {
        let mut msg = self.message(msg_type);
        msg.parent_header = parent.header.clone();
        msg
    }

    fn header(&self, msg_type: &str) -> Value {
        json!({
            "msg_id": Uuid::new_v4().to_string(),
            "msg_type": msg_type,
            "session": self.session_id,
            "username": self.username,
            "date": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "version": PROTOCOL_VERSION,
        })
    }

    /// Serialize a message to kernel-bound multipart frames:
    /// delimiter, signature, four sections, then buffers.
    pub fn to_frames(&self, msg: &WireMessage) -> Vec<Vec<u8>> {
        let sections = msg.section_frames();
        let signature = sign_frames(
            &self.key,
            &[&sections[0], &sections[1], &sections[2], &sections[3]],
        );
        let mut frames = Vec::with_capacity(6 + msg.buffers.len());
        frames.push(DELIMITER.to_vec());
        frames.push(signature.into_bytes());
        frames.extend(sections);
        frames.extend(msg.buffers.iter().cloned());
        frames
    }

    /// Sign and send a message on a channel socket.
    pub async fn send(
        &self,
        socket: &dyn ChannelSocket,
        channel: ChannelName,
        msg: &WireMessage,
    ) -> Result<(), BridgeError> {
        socket
            .send_multipart(self.to_frames(msg))
            .await
            .map_err(|source| BridgeError::Send { channel, source })
    }
}
