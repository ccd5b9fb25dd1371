//! Per-type payload codecs and the registry that maps tags to them.
//!
//! Framing (tag + length) lives in [`crate::WireCodec`] and never changes.
//! Payload layout is delegated to one [`PayloadCodec`] per type tag, so
//! adding a message kind means registering one more codec, not touching
//! the framing logic. This is the "strategy pattern" again, keyed by tag.

use std::collections::HashMap;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{DecodeError, EncodeError, Message, MessageType, SessionId};

/// Encodes and decodes the payload of exactly one message type.
///
/// Implementations only ever see their own bytes: the frame header has
/// already been stripped on decode and is added afterwards on encode.
pub trait PayloadCodec: Send + Sync + 'static {
    /// The tag this codec is registered under.
    fn message_type(&self) -> MessageType;

    /// Appends the payload of `message` to `out`.
    ///
    /// # Errors
    /// Returns [`EncodeError::Unsupported`] if `message` is not the
    /// variant this codec handles.
    fn encode(
        &self,
        message: &Message,
        out: &mut BytesMut,
    ) -> Result<(), EncodeError>;

    /// Builds a message from a complete payload.
    ///
    /// # Errors
    /// Returns [`DecodeError::Malformed`] if the bytes don't match the
    /// layout of this type.
    fn decode(&self, payload: Bytes) -> Result<Message, DecodeError>;
}

fn malformed(message_type: MessageType, reason: impl Into<String>) -> DecodeError {
    DecodeError::Malformed {
        message_type,
        reason: reason.into(),
    }
}

/// Reads the leading big-endian id shared by the id and text payloads.
fn take_id(
    message_type: MessageType,
    payload: &mut Bytes,
) -> Result<SessionId, DecodeError> {
    if payload.remaining() < 4 {
        return Err(malformed(
            message_type,
            format!("need 4 id bytes, have {}", payload.remaining()),
        ));
    }
    Ok(SessionId(payload.get_u32()))
}

// ---------------------------------------------------------------------------
// Built-in codecs
// ---------------------------------------------------------------------------

/// `AuthRequest`: empty payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthRequestCodec;

impl PayloadCodec for AuthRequestCodec {
    fn message_type(&self) -> MessageType {
        MessageType::AuthRequest
    }

    fn encode(&self, message: &Message, _out: &mut BytesMut) -> Result<(), EncodeError> {
        match message {
            Message::AuthRequest => Ok(()),
            other => Err(EncodeError::Unsupported(other.message_type())),
        }
    }

    fn decode(&self, payload: Bytes) -> Result<Message, DecodeError> {
        if !payload.is_empty() {
            return Err(malformed(
                MessageType::AuthRequest,
                format!("expected empty payload, got {} bytes", payload.len()),
            ));
        }
        Ok(Message::AuthRequest)
    }
}

/// `ClientIdResponse`: 4-byte big-endian id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientIdCodec;

impl PayloadCodec for ClientIdCodec {
    fn message_type(&self) -> MessageType {
        MessageType::ClientIdResponse
    }

    fn encode(&self, message: &Message, out: &mut BytesMut) -> Result<(), EncodeError> {
        match message {
            Message::ClientIdResponse(id) => {
                out.put_u32(id.0);
                Ok(())
            }
            other => Err(EncodeError::Unsupported(other.message_type())),
        }
    }

    fn decode(&self, mut payload: Bytes) -> Result<Message, DecodeError> {
        let id = take_id(MessageType::ClientIdResponse, &mut payload)?;
        if payload.has_remaining() {
            return Err(malformed(
                MessageType::ClientIdResponse,
                format!("{} trailing bytes after id", payload.remaining()),
            ));
        }
        Ok(Message::ClientIdResponse(id))
    }
}

/// `ClientNameResponse`: UTF-8 bytes, no terminator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientNameCodec;

impl PayloadCodec for ClientNameCodec {
    fn message_type(&self) -> MessageType {
        MessageType::ClientNameResponse
    }

    fn encode(&self, message: &Message, out: &mut BytesMut) -> Result<(), EncodeError> {
        match message {
            Message::ClientNameResponse(name) => {
                out.put_slice(name.as_bytes());
                Ok(())
            }
            other => Err(EncodeError::Unsupported(other.message_type())),
        }
    }

    fn decode(&self, payload: Bytes) -> Result<Message, DecodeError> {
        let name = String::from_utf8(payload.to_vec())
            .map_err(|e| malformed(MessageType::ClientNameResponse, e.to_string()))?;
        Ok(Message::ClientNameResponse(name))
    }
}

/// `ClientText`: 4-byte big-endian sender id, then raw text bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientTextCodec;

impl PayloadCodec for ClientTextCodec {
    fn message_type(&self) -> MessageType {
        MessageType::ClientText
    }

    fn encode(&self, message: &Message, out: &mut BytesMut) -> Result<(), EncodeError> {
        match message {
            Message::ClientText { sender, text } => {
                out.reserve(4 + text.len());
                out.put_u32(sender.0);
                out.put_slice(text);
                Ok(())
            }
            other => Err(EncodeError::Unsupported(other.message_type())),
        }
    }

    fn decode(&self, mut payload: Bytes) -> Result<Message, DecodeError> {
        let sender = take_id(MessageType::ClientText, &mut payload)?;
        // What's left is the text; `Bytes` hands it over without copying.
        Ok(Message::ClientText {
            sender,
            text: payload,
        })
    }
}

// ---------------------------------------------------------------------------
// CodecRegistry
// ---------------------------------------------------------------------------

/// Maps type tags to payload codecs.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: HashMap<u8, Box<dyn PayloadCodec>>,
}

impl CodecRegistry {
    /// An empty registry. Every encode/decode fails until codecs are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the four built-in message types.
    pub fn standard() -> Self {
        Self::new()
            .with(AuthRequestCodec)
            .with(ClientIdCodec)
            .with(ClientNameCodec)
            .with(ClientTextCodec)
    }

    /// Registers `codec` under its own tag, returning any codec it replaced.
    pub fn register(
        &mut self,
        codec: impl PayloadCodec,
    ) -> Option<Box<dyn PayloadCodec>> {
        self.codecs.insert(codec.message_type().tag(), Box::new(codec))
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, codec: impl PayloadCodec) -> Self {
        self.register(codec);
        self
    }

    /// Looks up the codec for a raw tag byte.
    pub fn get(&self, tag: u8) -> Option<&dyn PayloadCodec> {
        self.codecs.get(&tag).map(|c| c.as_ref())
    }

    /// Returns `true` if `message_type` has a codec.
    pub fn contains(&self, message_type: MessageType) -> bool {
        self.codecs.contains_key(&message_type.tag())
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self
            .codecs
            .values()
            .map(|c| c.message_type())
            .collect();
        types.sort_by_key(|t| t.tag());
        f.debug_struct("CodecRegistry").field("types", &types).finish()
    }
}
