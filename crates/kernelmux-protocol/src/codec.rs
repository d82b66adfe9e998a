//! Wire-format codecs.
//!
//! Two client-facing encodings exist, negotiated by WebSocket subprotocol
//! token: a JSON envelope (the default) and the binary-offset format
//! selected by `v1.kernel.websocket.jupyter.org`. Kernel-facing traffic is
//! always identity-framed multipart: opaque routing prefixes, the
//! `<IDS|MSG>` delimiter, a signature, the four JSON sections, then any
//! buffer frames.

use serde_json::{Map, Value};

use crate::dates::normalize_dates;
use crate::errors::{FramingError, ProtocolError};
use crate::message::{MessagePart, WireMessage};

/// Literal delimiter separating identity frames from the signed payload.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Frames required after the delimiter: signature plus four sections.
const MIN_PAYLOAD_FRAMES: usize = 5;

/// Client wire encoding, negotiated at WebSocket upgrade.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Subprotocol {
    /// JSON text envelope; selected for any other or absent token.
    #[default]
    Json,
    /// Binary-offset framing, both directions.
    BinaryV1,
}

impl Subprotocol {
    /// The token selecting the binary encoding.
    pub const V1_TOKEN: &'static str = "v1.kernel.websocket.jupyter.org";

    /// Resolve a negotiated subprotocol token.
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            Some(t) if t == Self::V1_TOKEN => Subprotocol::BinaryV1,
            _ => Subprotocol::Json,
        }
    }

    /// The token to offer during negotiation, if any.
    pub fn token(self) -> Option<&'static str> {
        match self {
            Subprotocol::Json => None,
            Subprotocol::BinaryV1 => Some(Self::V1_TOKEN),
        }
    }
}

/// One frame on the client transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientFrame {
    /// JSON text frame.
    Text(String),
    /// Binary-offset frame.
    Binary(Vec<u8>),
}

impl ClientFrame {
    /// Encoded size in bytes, the unit the rate limiter counts.
    pub fn len(&self) -> usize {
        match self {
            ClientFrame::Text(s) => s.len(),
            ClientFrame::Binary(b) => b.len(),
        }
    }

    /// Whether the frame is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split a frame sequence at the first `<IDS|MSG>` delimiter.
///
/// Frames before it are identity frames, preserved but never interpreted;
/// frames strictly after it are the payload. The delimiter is consumed
/// exactly once: re-applying to the remainder fails with
/// [`FramingError::DelimiterNotFound`].
pub fn split_identities(
    frames: &[Vec<u8>],
) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>), FramingError> {
    let at = frames
        .iter()
        .position(|f| f == DELIMITER)
        .ok_or(FramingError::DelimiterNotFound)?;
    Ok((frames[..at].to_vec(), frames[at + 1..].to_vec()))
}

/// Decode an identity-framed multipart kernel message.
///
/// Returns the identity frames and the decoded message. Each section is
/// JSON-decoded independently: a failure on one section is recorded on
/// that section only and decoding continues, so partially malformed
/// kernel output still surfaces to the client with a visible diagnostic.
pub fn decode_multipart(
    frames: &[Vec<u8>],
) -> Result<(Vec<Vec<u8>>, WireMessage), FramingError> {
    let (identities, payload) = split_identities(frames)?;
    if payload.len() < MIN_PAYLOAD_FRAMES {
        return Err(FramingError::TruncatedMultipart {
            expected: MIN_PAYLOAD_FRAMES,
            got: payload.len(),
        });
    }
    // payload[0] is the signature frame; verification is the session's
    // concern, not the codec's.
    let msg = WireMessage {
        header: MessagePart::from_json_bytes(&payload[1]),
        parent_header: MessagePart::from_json_bytes(&payload[2]),
        metadata: MessagePart::from_json_bytes(&payload[3]),
        content: MessagePart::from_json_bytes(&payload[4]),
        buffers: payload[MIN_PAYLOAD_FRAMES..].to_vec(),
    };
    Ok((identities, msg))
}

/// Decode a binary-offset client message.
///
/// Layout, big-endian: `[u32 nbuffers][u32 offset_0]..[u32 offset_{n-1}]
/// [payload]`. Offsets are relative to the payload and non-decreasing;
/// together with an implicit final offset equal to the payload length they
/// slice it into `n + 1` segments. Segment 0 is the JSON envelope, the
/// rest become buffers. ISO-8601 strings inside the decoded header and
/// parent header are normalized to canonical UTC form.
pub fn decode_binary(bytes: &[u8]) -> Result<WireMessage, FramingError> {
    if bytes.len() < 4 {
        return Err(FramingError::TooShort {
            needed: 4,
            have: bytes.len(),
        });
    }
    let nbufs = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let table_end = 4 * (nbufs + 1);
    if bytes.len() < table_end {
        return Err(FramingError::TooShort {
            needed: table_end,
            have: bytes.len(),
        });
    }

    let payload = &bytes[table_end..];
    let mut bounds = Vec::with_capacity(nbufs + 2);
    bounds.push(0usize);
    for i in 0..nbufs {
        let at = 4 + 4 * i;
        let offset =
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize;
        if offset > payload.len() || offset < bounds[bounds.len() - 1] {
            return Err(FramingError::BadOffsets {
                offset,
                payload_len: payload.len(),
            });
        }
        bounds.push(offset);
    }
    bounds.push(payload.len());

    let mut envelope: Map<String, Value> =
        serde_json::from_slice(&payload[bounds[0]..bounds[1]]).map_err(FramingError::BadEnvelope)?;
    for section in ["header", "parent_header"] {
        if let Some(v) = envelope.get_mut(section) {
            normalize_dates(v);
        }
    }
    let mut msg = WireMessage::from_envelope(envelope);
    msg.buffers = (1..=nbufs)
        .map(|i| payload[bounds[i]..bounds[i + 1]].to_vec())
        .collect();
    Ok(msg)
}

/// Encode a message in the binary-offset format.
pub fn encode_binary(msg: &WireMessage) -> Result<Vec<u8>, ProtocolError> {
    let envelope = serde_json::to_vec(&client_envelope(msg)).map_err(ProtocolError::Serialize)?;

    let nbufs = msg.buffers.len();
    let mut out = Vec::with_capacity(4 * (nbufs + 1) + envelope.len());
    out.extend_from_slice(&(nbufs as u32).to_be_bytes());
    let mut offset = envelope.len();
    for buffer in &msg.buffers {
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        offset += buffer.len();
    }
    out.extend_from_slice(&envelope);
    for buffer in &msg.buffers {
        out.extend_from_slice(buffer);
    }
    Ok(out)
}

/// Serialize a message for the client in its negotiated subprotocol.
///
/// The JSON encoding carries no buffers (the text transport has no binary
/// framing); the binary encoding carries them as trailing segments. Decode
/// errors, when present, are included as a `decode_errors` diagnostic
/// object in either encoding.
pub fn encode_for_client(
    msg: &WireMessage,
    subprotocol: Subprotocol,
) -> Result<ClientFrame, ProtocolError> {
    match subprotocol {
        Subprotocol::Json => {
            let text = serde_json::to_string(&Value::Object(client_envelope(msg)))
                .map_err(ProtocolError::Serialize)?;
            Ok(ClientFrame::Text(text))
        }
        Subprotocol::BinaryV1 => Ok(ClientFrame::Binary(encode_binary(msg)?)),
    }
}

/// Decode a client frame into a message. The frame kind selects the
/// codec: text frames are JSON envelopes, binary frames use the offset
/// format.
pub fn decode_from_client(frame: &ClientFrame) -> Result<WireMessage, FramingError> {
    match frame {
        ClientFrame::Text(text) => {
            let envelope: Map<String, Value> =
                serde_json::from_str(text).map_err(FramingError::BadEnvelope)?;
            Ok(WireMessage::from_envelope(envelope))
        }
        ClientFrame::Binary(bytes) => decode_binary(bytes),
    }
}

fn client_envelope(msg: &WireMessage) -> Map<String, Value> {
    let mut envelope = Map::new();
    for (name, part) in msg.sections() {
        let _ = envelope.insert(name.to_string(), part.to_value());
    }
    let errors = msg.decode_errors();
    if !errors.is_empty() {
        let diag: Map<String, Value> = errors
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(v)))
            .collect();
        let _ = envelope.insert("decode_errors".into(), Value::Object(diag));
    }
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frames(parts: &[&[u8]]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.to_vec()).collect()
    }

    // ── split_identities ────────────────────────────────────────────────

    #[test]
    fn split_returns_prefix_and_suffix() {
        let input = frames(&[b"ident1", b"ident2", DELIMITER, b"sig", b"{}"]);
        let (idents, rest) = split_identities(&input).unwrap();
        assert_eq!(idents, frames(&[b"ident1", b"ident2"]));
        assert_eq!(rest, frames(&[b"sig", b"{}"]));
    }

    #[test]
    fn split_with_no_identities() {
        let input = frames(&[DELIMITER, b"sig"]);
        let (idents, rest) = split_identities(&input).unwrap();
        assert!(idents.is_empty());
        assert_eq!(rest, frames(&[b"sig"]));
    }

    #[test]
    fn split_consumed_exactly_once() {
        let input = frames(&[b"ident", DELIMITER, b"sig", b"{}"]);
        let (_, rest) = split_identities(&input).unwrap();
        // The delimiter was consumed: the remainder has none left.
        assert!(matches!(
            split_identities(&rest),
            Err(FramingError::DelimiterNotFound)
        ));
    }

    #[test]
    fn split_missing_delimiter_fails() {
        let input = frames(&[b"ident", b"sig", b"{}"]);
        assert!(matches!(
            split_identities(&input),
            Err(FramingError::DelimiterNotFound)
        ));
    }

    // ── decode_multipart ────────────────────────────────────────────────

    fn status_frames() -> Vec<Vec<u8>> {
        frames(&[
            b"ident1",
            DELIMITER,
            b"sig",
            br#"{"msg_type":"status"}"#,
            b"{}",
            b"{}",
            br#"{"execution_state":"idle"}"#,
        ])
    }

    #[test]
    fn decode_status_message() {
        let (idents, msg) = decode_multipart(&status_frames()).unwrap();
        assert_eq!(idents, frames(&[b"ident1"]));
        assert_eq!(msg.msg_type(), Some("status"));
        assert_eq!(msg.content.get("execution_state"), Some(&json!("idle")));
        assert!(msg.decode_errors().is_empty());
        assert!(msg.buffers.is_empty());
    }

    #[test]
    fn decode_missing_delimiter_returns_no_message() {
        let input = frames(&[b"sig", b"{}", b"{}", b"{}", b"{}"]);
        assert!(matches!(
            decode_multipart(&input),
            Err(FramingError::DelimiterNotFound)
        ));
    }

    #[test]
    fn decode_truncated_payload_fails() {
        let input = frames(&[DELIMITER, b"sig", b"{}", b"{}"]);
        match decode_multipart(&input) {
            Err(FramingError::TruncatedMultipart { expected: 5, got: 3 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decode_bad_section_is_recorded_not_fatal() {
        let input = frames(&[
            DELIMITER,
            b"sig",
            b"not json at all",
            b"{}",
            b"{}",
            br#"{"execution_state":"busy"}"#,
        ]);
        let (_, msg) = decode_multipart(&input).unwrap();
        // Header failed, content still decoded.
        assert!(msg.decode_errors().contains_key("header"));
        assert_eq!(msg.content.get("execution_state"), Some(&json!("busy")));
    }

    #[test]
    fn decode_trailing_frames_become_buffers() {
        let mut input = status_frames();
        input.push(b"\x01\x02\x03".to_vec());
        input.push(b"buf2".to_vec());
        let (_, msg) = decode_multipart(&input).unwrap();
        assert_eq!(msg.buffers, frames(&[b"\x01\x02\x03", b"buf2"]));
    }

    // ── decode_binary ───────────────────────────────────────────────────

    #[test]
    fn binary_zero_buffers_spans_whole_payload() {
        let envelope = br#"{"header":{"msg_type":"status"},"content":{}}"#;
        let mut bytes = 0u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(envelope);
        let msg = decode_binary(&bytes).unwrap();
        assert_eq!(msg.msg_type(), Some("status"));
        assert!(msg.buffers.is_empty());
    }

    #[test]
    fn binary_one_buffer_concrete_layout() {
        // [00 00 00 01][00 00 00 0C][12-byte envelope][buffer bytes]
        let envelope = br#"{"a":"bcde"}"#;
        assert_eq!(envelope.len(), 12);
        let mut bytes = 1u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&0x0Cu32.to_be_bytes());
        bytes.extend_from_slice(envelope);
        bytes.extend_from_slice(b"\xDE\xAD\xBE\xEF");
        let msg = decode_binary(&bytes).unwrap();
        assert_eq!(msg.buffers, vec![b"\xDE\xAD\xBE\xEF".to_vec()]);
    }

    #[test]
    fn binary_shorter_than_offset_table_fails() {
        // Claims 2 buffers (needs 12 bytes of header+table), provides 6.
        let mut bytes = 2u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0]);
        match decode_binary(&bytes) {
            Err(FramingError::TooShort { needed: 12, have: 6 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn binary_under_four_bytes_fails() {
        assert!(matches!(
            decode_binary(&[0, 0]),
            Err(FramingError::TooShort { .. })
        ));
    }

    #[test]
    fn binary_offset_past_payload_fails() {
        let mut bytes = 1u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&100u32.to_be_bytes());
        bytes.extend_from_slice(b"{}");
        assert!(matches!(
            decode_binary(&bytes),
            Err(FramingError::BadOffsets { offset: 100, .. })
        ));
    }

    #[test]
    fn binary_decreasing_offsets_fail() {
        let envelope = b"{}";
        let mut bytes = 2u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(envelope);
        bytes.extend_from_slice(b"abcd");
        assert!(matches!(
            decode_binary(&bytes),
            Err(FramingError::BadOffsets { offset: 2, .. })
        ));
    }

    #[test]
    fn binary_envelope_not_json_fails() {
        let mut bytes = 0u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"not json");
        assert!(matches!(
            decode_binary(&bytes),
            Err(FramingError::BadEnvelope(_))
        ));
    }

    #[test]
    fn binary_decode_normalizes_header_dates() {
        let envelope =
            br#"{"header":{"date":"2024-05-01T12:00:00+02:00"},"content":{"note":"2024-05-01T12:00:00+02:00"}}"#;
        let mut bytes = 0u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(envelope);
        let msg = decode_binary(&bytes).unwrap();
        assert_eq!(msg.header.get("date"), Some(&json!("2024-05-01T10:00:00.000Z")));
        // Content is not a header; left untouched.
        assert_eq!(
            msg.content.get("note"),
            Some(&json!("2024-05-01T12:00:00+02:00"))
        );
    }

    // ── encode_for_client / round trips ─────────────────────────────────

    #[test]
    fn json_encoding_round_trips_sections() {
        let (_, msg) = decode_multipart(&status_frames()).unwrap();
        let frame = encode_for_client(&msg, Subprotocol::Json).unwrap();
        let ClientFrame::Text(text) = frame else {
            panic!("expected text frame")
        };
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["header"]["msg_type"], json!("status"));
        assert_eq!(v["parent_header"], json!({}));
        assert_eq!(v["metadata"], json!({}));
        assert_eq!(v["content"]["execution_state"], json!("idle"));
        assert!(v.get("decode_errors").is_none());
    }

    #[test]
    fn json_encoding_surfaces_decode_errors() {
        let input = frames(&[DELIMITER, b"sig", b"bad", b"{}", b"{}", b"{}"]);
        let (_, msg) = decode_multipart(&input).unwrap();
        let ClientFrame::Text(text) = encode_for_client(&msg, Subprotocol::Json).unwrap() else {
            panic!("expected text frame")
        };
        let v: Value = serde_json::from_str(&text).unwrap();
        assert!(v["decode_errors"]["header"].is_string());
    }

    #[test]
    fn binary_encoding_round_trips_buffers() {
        let mut msg = WireMessage::empty();
        msg.header = MessagePart::from_json_bytes(br#"{"msg_type":"display_data"}"#);
        msg.buffers = vec![b"first".to_vec(), b"second-buffer".to_vec()];
        let encoded = encode_binary(&msg).unwrap();
        let back = decode_binary(&encoded).unwrap();
        assert_eq!(back.msg_type(), Some("display_data"));
        assert_eq!(back.buffers, msg.buffers);
    }

    #[test]
    fn binary_subprotocol_produces_binary_frame() {
        let msg = WireMessage::empty();
        let frame = encode_for_client(&msg, Subprotocol::BinaryV1).unwrap();
        assert!(matches!(frame, ClientFrame::Binary(_)));
    }

    #[test]
    fn decode_from_client_text_envelope() {
        let frame = ClientFrame::Text(
            r#"{"header":{"msg_type":"execute_request"},"content":{"code":"x"},"channel":"shell"}"#
                .into(),
        );
        let msg = decode_from_client(&frame).unwrap();
        assert_eq!(msg.msg_type(), Some("execute_request"));
    }

    #[test]
    fn decode_from_client_rejects_bad_text() {
        let frame = ClientFrame::Text("not json".into());
        assert!(matches!(
            decode_from_client(&frame),
            Err(FramingError::BadEnvelope(_))
        ));
    }

    // ── subprotocol negotiation ─────────────────────────────────────────

    #[test]
    fn v1_token_selects_binary() {
        assert_eq!(
            Subprotocol::from_token(Some("v1.kernel.websocket.jupyter.org")),
            Subprotocol::BinaryV1
        );
    }

    #[test]
    fn absent_or_unknown_token_selects_json() {
        assert_eq!(Subprotocol::from_token(None), Subprotocol::Json);
        assert_eq!(Subprotocol::from_token(Some("v2.custom")), Subprotocol::Json);
    }

    #[test]
    fn client_frame_len_counts_bytes() {
        assert_eq!(ClientFrame::Text("abc".into()).len(), 3);
        assert_eq!(ClientFrame::Binary(vec![0; 7]).len(), 7);
        assert!(ClientFrame::Text(String::new()).is_empty());
    }
}
