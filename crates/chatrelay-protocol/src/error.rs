//! Error types for the protocol layer.
//!
//! Encoding and decoding fail for different reasons and are handled by
//! different callers (a write path vs. a read loop), so each gets its own
//! enum. [`ProtocolError`] unifies them for callers that do both.

use crate::MessageType;

/// Errors produced while turning a [`Message`](crate::Message) into a frame.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// No payload codec is registered for this message type.
    #[error("no payload codec registered for {0}")]
    Unsupported(MessageType),

    /// The encoded payload does not fit the 32-bit length field.
    #[error("payload of {0} bytes exceeds the frame length field")]
    PayloadTooLarge(usize),
}

/// Errors produced while reading a frame or decoding its payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The type tag has no registered payload codec.
    #[error("unknown message type tag {0:#04x}")]
    UnknownType(u8),

    /// The stream ended cleanly on a frame boundary.
    #[error("end of stream")]
    EndOfStream,

    /// Fewer bytes were available than the header promised.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The payload bytes do not match the layout of its type.
    #[error("malformed {message_type} payload: {reason}")]
    Malformed {
        message_type: MessageType,
        reason: String,
    },

    /// The underlying reader failed.
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Either side of the codec failed.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
