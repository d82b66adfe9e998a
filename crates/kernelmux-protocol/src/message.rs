//! In-memory protocol message model.
//!
//! A [`WireMessage`] is one protocol unit: four JSON sections (header,
//! parent header, metadata, content) plus zero or more opaque binary
//! buffers. Each section is a [`MessagePart`] so a section that failed to
//! decode is carried explicitly instead of dropping the whole message.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// One JSON section of a message.
///
/// The sum type distinguishes the three outcomes a section can be in:
/// successfully parsed as a mapping, deliberately left as raw bytes
/// (client pass-through), or failed to decode. A failed section keeps the
/// original bytes and the error text so the message is still deliverable
/// with a visible diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessagePart {
    /// Section parsed as a JSON mapping.
    Parsed(Map<String, Value>),
    /// Raw bytes, carried verbatim.
    Raw(Vec<u8>),
    /// Section that failed to parse as a mapping.
    Failed {
        /// The original bytes.
        raw: Vec<u8>,
        /// The decode error text.
        error: String,
    },
}

impl MessagePart {
    /// An empty parsed mapping, the value of an absent section.
    pub fn empty() -> Self {
        MessagePart::Parsed(Map::new())
    }

    /// Decode a section from JSON bytes.
    ///
    /// Every section must independently deserialize as a mapping; anything
    /// else (a scalar, an array, malformed JSON) becomes
    /// [`MessagePart::Failed`] for this section only.
    pub fn from_json_bytes(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => MessagePart::Parsed(map),
            Ok(other) => MessagePart::Failed {
                raw: bytes.to_vec(),
                error: format!("expected a JSON mapping, got {}", json_type_name(&other)),
            },
            Err(e) => MessagePart::Failed {
                raw: bytes.to_vec(),
                error: e.to_string(),
            },
        }
    }

    /// Build a section from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => MessagePart::Parsed(map),
            Value::Null => MessagePart::empty(),
            other => MessagePart::Failed {
                error: format!("expected a JSON mapping, got {}", json_type_name(&other)),
                raw: other.to_string().into_bytes(),
            },
        }
    }

    /// The section as a JSON value for client serialization.
    ///
    /// A failed section serializes as an empty mapping; its error is
    /// reported separately via [`WireMessage::decode_errors`].
    pub fn to_value(&self) -> Value {
        match self {
            MessagePart::Parsed(map) => Value::Object(map.clone()),
            MessagePart::Raw(bytes) => {
                serde_json::from_slice(bytes).unwrap_or(Value::Object(Map::new()))
            }
            MessagePart::Failed { .. } => Value::Object(Map::new()),
        }
    }

    /// The section as wire bytes for kernel-bound multipart frames.
    pub fn to_frame(&self) -> Vec<u8> {
        match self {
            MessagePart::Parsed(map) => {
                serde_json::to_vec(map).unwrap_or_else(|_| b"{}".to_vec())
            }
            MessagePart::Raw(bytes) | MessagePart::Failed { raw: bytes, .. } => bytes.clone(),
        }
    }

    /// The decode error, if this section failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            MessagePart::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Look up a key in a parsed section.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            MessagePart::Parsed(map) => map.get(key),
            _ => None,
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}

/// One protocol unit flowing in either direction through the bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireMessage {
    /// Message id, type, session, timestamp, version.
    pub header: MessagePart,
    /// Header of the causing request; empty for unsolicited messages.
    pub parent_header: MessagePart,
    /// Free-form mapping.
    pub metadata: MessagePart,
    /// Free-form mapping; semantics depend on `header.msg_type`.
    pub content: MessagePart,
    /// Ordered opaque byte blocks, may be empty.
    pub buffers: Vec<Vec<u8>>,
}

/// Section names in wire order.
pub const SECTION_NAMES: [&str; 4] = ["header", "parent_header", "metadata", "content"];

impl WireMessage {
    /// A message with all sections empty.
    pub fn empty() -> Self {
        Self {
            header: MessagePart::empty(),
            parent_header: MessagePart::empty(),
            metadata: MessagePart::empty(),
            content: MessagePart::empty(),
            buffers: Vec::new(),
        }
    }

    /// Build a message from a combined JSON envelope, extracting the four
    /// sections by name. Unknown envelope keys are ignored.
    pub fn from_envelope(mut envelope: Map<String, Value>) -> Self {
        let mut take = |key: &str| {
            envelope
                .remove(key)
                .map_or_else(MessagePart::empty, MessagePart::from_value)
        };
        let header = take("header");
        let parent_header = take("parent_header");
        let metadata = take("metadata");
        let content = take("content");
        Self {
            header,
            parent_header,
            metadata,
            content,
            buffers: Vec::new(),
        }
    }

    /// The four sections with their wire names, in order.
    pub fn sections(&self) -> [(&'static str, &MessagePart); 4] {
        [
            ("header", &self.header),
            ("parent_header", &self.parent_header),
            ("metadata", &self.metadata),
            ("content", &self.content),
        ]
    }

    /// Per-section decode errors, keyed by section name.
    pub fn decode_errors(&self) -> BTreeMap<&'static str, String> {
        self.sections()
            .into_iter()
            .filter_map(|(name, part)| part.error().map(|e| (name, e.to_string())))
            .collect()
    }

    /// Whether any section failed to decode.
    pub fn has_decode_errors(&self) -> bool {
        self.sections().into_iter().any(|(_, p)| p.error().is_some())
    }

    /// `header.msg_type`, if the header parsed and carries one.
    pub fn msg_type(&self) -> Option<&str> {
        self.header.get("msg_type").and_then(Value::as_str)
    }

    /// `header.msg_id`, if the header parsed and carries one.
    pub fn msg_id(&self) -> Option<&str> {
        self.header.get("msg_id").and_then(Value::as_str)
    }

    /// The four sections as kernel-bound wire frames, in order.
    pub fn section_frames(&self) -> [Vec<u8>; 4] {
        [
            self.header.to_frame(),
            self.parent_header.to_frame(),
            self.metadata.to_frame(),
            self.content.to_frame(),
        ]
    }
}
