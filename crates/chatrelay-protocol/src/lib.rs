//! Wire protocol for chatrelay.
//!
//! This crate defines the bytes that cross a client connection:
//!
//! - **Types** ([`SessionId`], [`MessageType`], [`Message`]): what a
//!   frame carries.
//! - **Payload codecs** ([`PayloadCodec`], [`CodecRegistry`]): one
//!   strategy per type tag for laying out that type's fields.
//! - **Framing** ([`WireCodec`]): the `[type][length][payload]` envelope,
//!   synchronous encode/decode plus an async frame reader.
//! - **Errors** ([`EncodeError`], [`DecodeError`], [`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw sockets) and session
//! (client identity). It knows nothing about rooms or servers.
//!
//! ```text
//! Transport (TcpStream) → Protocol (Message) → Session (routing)
//! ```

mod codec;
mod error;
mod payload;
mod types;

pub use codec::{WireCodec, FRAME_HEADER_SIZE};
pub use error::{DecodeError, EncodeError, ProtocolError};
pub use payload::{
    AuthRequestCodec, ClientIdCodec, ClientNameCodec, ClientTextCodec,
    CodecRegistry, PayloadCodec,
};
pub use types::{Message, MessageType, SessionId};
