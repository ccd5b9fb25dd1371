//! Core protocol types for chatrelay's wire format.
//!
//! This module defines every type that crosses the connection boundary.
//! A [`Message`] is ephemeral: it is built only to be written to a socket
//! or produced by reading one, and is never stored by the hierarchy.

use std::fmt;

use bytes::Bytes;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a client session.
///
/// Newtype over the 32-bit id that travels on the wire. The value `0` is
/// reserved as [`SessionId::INVALID`] and is never handed out by the
/// identity allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u32);

impl SessionId {
    /// The reserved "no session" sentinel.
    pub const INVALID: SessionId = SessionId(0);

    /// Returns `true` unless this is the reserved sentinel.
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Returns the underlying `u32` value.
    pub fn into_inner(self) -> u32 {
        self.0
    }
}

/// `tracing::info!(session_id = %id, ...)` prints "S-42".
impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MessageType: the one-byte tag at the front of every frame
// ---------------------------------------------------------------------------

/// The type tag of a frame.
///
/// `#[repr(u8)]` pins each variant's discriminant to the byte that is
/// written on the wire, so `MessageType::ClientText as u8 == 3`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Server → client: "identify yourself". Empty payload.
    AuthRequest = 0,
    /// Client → server: the client's id (4 bytes, big-endian).
    ClientIdResponse = 1,
    /// Client → server: the client's display name (UTF-8).
    ClientNameResponse = 2,
    /// Either direction: sender id (4 bytes, big-endian) + raw text.
    ClientText = 3,
}

impl MessageType {
    /// Every known tag, in wire order.
    pub const ALL: [MessageType; 4] = [
        MessageType::AuthRequest,
        MessageType::ClientIdResponse,
        MessageType::ClientNameResponse,
        MessageType::ClientText,
    ];

    /// Converts a raw tag byte, returning `None` for unknown tags.
    pub fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| *t as u8 == tag)
    }

    /// The byte written on the wire for this type.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AuthRequest => "AuthRequest",
            Self::ClientIdResponse => "ClientIdResponse",
            Self::ClientNameResponse => "ClientNameResponse",
            Self::ClientText => "ClientText",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A decoded wire message.
///
/// Each variant's payload layout is owned by one payload codec in
/// [`crate::CodecRegistry`]; this enum only describes the fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Asks the client to start the identity handshake.
    AuthRequest,

    /// The client's claimed id.
    ClientIdResponse(SessionId),

    /// The client's display name.
    ClientNameResponse(String),

    /// A chat line. `text` is kept as raw bytes; the relay never
    /// interprets it.
    ClientText { sender: SessionId, text: Bytes },
}

impl Message {
    /// Returns the frame type tag for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::AuthRequest => MessageType::AuthRequest,
            Self::ClientIdResponse(_) => MessageType::ClientIdResponse,
            Self::ClientNameResponse(_) => MessageType::ClientNameResponse,
            Self::ClientText { .. } => MessageType::ClientText,
        }
    }

    /// Convenience constructor for a text message.
    pub fn text(sender: SessionId, text: impl Into<Bytes>) -> Self {
        Self::ClientText {
            sender,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_invalid_sentinel_is_zero() {
        assert_eq!(SessionId::INVALID.into_inner(), 0);
        assert!(!SessionId::INVALID.is_valid());
        assert!(SessionId(1).is_valid());
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId(42).to_string(), "S-42");
    }

    #[test]
    fn test_message_type_tags_are_stable() {
        assert_eq!(MessageType::AuthRequest.tag(), 0);
        assert_eq!(MessageType::ClientIdResponse.tag(), 1);
        assert_eq!(MessageType::ClientNameResponse.tag(), 2);
        assert_eq!(MessageType::ClientText.tag(), 3);
    }

    #[test]
    fn test_message_type_from_u8_rejects_unknown() {
        for t in MessageType::ALL {
            assert_eq!(MessageType::from_u8(t.tag()), Some(t));
        }
        assert_eq!(MessageType::from_u8(4), None);
        assert_eq!(MessageType::from_u8(0xFF), None);
    }

    #[test]
    fn test_message_reports_its_type() {
        assert_eq!(
            Message::text(SessionId(1), "x").message_type(),
            MessageType::ClientText
        );
        assert_eq!(
            Message::ClientNameResponse("a".into()).message_type(),
            MessageType::ClientNameResponse
        );
    }
}
