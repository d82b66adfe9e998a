//! Error hierarchy for wire-protocol decoding.
//!
//! Framing errors are fatal to the single message being decoded, never to
//! the connection. Per-field JSON failures are *not* errors at this level:
//! they are recorded as [`crate::message::MessagePart::Failed`] so a
//! partially malformed message still reaches the client with diagnostics.

use thiserror::Error;

/// A malformed frame sequence or binary envelope.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The `<IDS|MSG>` delimiter was absent from a multipart message.
    #[error("delimiter not found in multipart message")]
    DelimiterNotFound,

    /// Too few frames followed the delimiter.
    #[error("multipart message truncated: expected {expected} frames after delimiter, got {got}")]
    TruncatedMultipart {
        /// Frames required after the delimiter.
        expected: usize,
        /// Frames actually present.
        got: usize,
    },

    /// A binary message was shorter than its own offset table requires.
    #[error("binary message too short: need {needed} bytes, have {have}")]
    TooShort {
        /// Bytes required by the header and offset table.
        needed: usize,
        /// Bytes actually present.
        have: usize,
    },

    /// An offset pointed outside the payload or decreased.
    #[error("binary message offset table malformed: offset {offset} invalid for payload of {payload_len} bytes")]
    BadOffsets {
        /// The offending offset value.
        offset: usize,
        /// Length of the payload being sliced.
        payload_len: usize,
    },

    /// The binary envelope segment was not valid JSON.
    #[error("binary envelope is not valid JSON: {0}")]
    BadEnvelope(#[source] serde_json::Error),
}

/// Top-level protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Wire framing was malformed.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// A message could not be serialized for the client.
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
}
