//! # kernelmux-protocol
//!
//! Wire-protocol foundation for the kernelmux gateway.
//!
//! - **Messages**: [`message::WireMessage`] with [`message::MessagePart`]
//!   modeling each JSON section as parsed, raw, or failed-to-decode
//! - **Codecs**: [`codec::decode_multipart`] for identity-framed multipart
//!   kernel messages, [`codec::decode_binary`] / [`codec::encode_for_client`]
//!   for the client-facing subprotocols
//! - **Channels**: [`channel::ChannelName`] and the per-channel endpoint set
//!   in [`connect_info::ConnectionInfo`]
//! - **Signing**: [`sign::sign_frames`] (HMAC-SHA256, hex-encoded)
//! - **Errors**: [`errors::FramingError`] / [`errors::ProtocolError`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `kernelmux-server`.

#![deny(unsafe_code)]

pub mod channel;
pub mod codec;
pub mod connect_info;
pub mod dates;
pub mod errors;
pub mod message;
pub mod sign;

pub use channel::ChannelName;
pub use codec::{ClientFrame, Subprotocol, DELIMITER};
pub use errors::{FramingError, ProtocolError};
pub use message::{MessagePart, WireMessage};
