//! Frame codec: the fixed envelope around every payload.
//!
//! ```text
//! +----------+-------------------+-----------------+
//! | type (1) | length (4, BE)    | payload         |
//! +----------+-------------------+-----------------+
//! ```
//!
//! `length` is the exact byte count of `payload`. Decoding validates the
//! header against what is actually available and never consumes bytes
//! past the end of the frame.

use std::io::ErrorKind;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{CodecRegistry, DecodeError, EncodeError, Message};

/// Frame header size: 1 byte type + 4 bytes length.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Encodes messages to frames and decodes frames back, delegating each
/// payload to the codec registered for its type tag.
///
/// Shared by every session (`Arc<WireCodec>`); it holds no mutable state.
#[derive(Debug)]
pub struct WireCodec {
    registry: CodecRegistry,
}

impl WireCodec {
    /// Creates a codec over the given registry.
    pub fn new(registry: CodecRegistry) -> Self {
        Self { registry }
    }

    /// A codec for the four built-in message types.
    pub fn standard() -> Self {
        Self::new(CodecRegistry::standard())
    }

    /// The registry this codec dispatches to.
    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// Serializes one message into a complete frame.
    ///
    /// # Errors
    /// - [`EncodeError::Unsupported`] if no codec is registered for the
    ///   message's type.
    /// - [`EncodeError::PayloadTooLarge`] if the payload exceeds `u32::MAX`.
    pub fn encode(&self, message: &Message) -> Result<Bytes, EncodeError> {
        let message_type = message.message_type();
        let codec = self
            .registry
            .get(message_type.tag())
            .ok_or(EncodeError::Unsupported(message_type))?;

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE);
        buf.put_u8(message_type.tag());
        // Length is patched in once the payload size is known.
        buf.put_u32(0);
        codec.encode(message, &mut buf)?;

        let payload_len = buf.len() - FRAME_HEADER_SIZE;
        let len = u32::try_from(payload_len)
            .map_err(|_| EncodeError::PayloadTooLarge(payload_len))?;
        buf[1..FRAME_HEADER_SIZE].copy_from_slice(&len.to_be_bytes());

        Ok(buf.freeze())
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// On success exactly one frame is consumed and any following bytes
    /// are left in place. On failure `buf` is left untouched.
    ///
    /// # Errors
    /// - [`DecodeError::EndOfStream`] if `buf` is empty.
    /// - [`DecodeError::Truncated`] if the header or payload is incomplete.
    /// - [`DecodeError::UnknownType`] if the tag has no codec.
    /// - [`DecodeError::Malformed`] if the payload doesn't match its type.
    pub fn decode(&self, buf: &mut Bytes) -> Result<Message, DecodeError> {
        if buf.is_empty() {
            return Err(DecodeError::EndOfStream);
        }
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(DecodeError::Truncated {
                expected: FRAME_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let tag = buf[0];
        let codec = self
            .registry
            .get(tag)
            .ok_or(DecodeError::UnknownType(tag))?;

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&buf[1..FRAME_HEADER_SIZE]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        let available = buf.len() - FRAME_HEADER_SIZE;
        if available < len {
            return Err(DecodeError::Truncated {
                expected: len,
                actual: available,
            });
        }

        let mut frame = buf.split_to(FRAME_HEADER_SIZE + len);
        frame.advance(FRAME_HEADER_SIZE);
        codec.decode(frame)
    }

    /// Reads exactly one frame from an async byte stream.
    ///
    /// The payload is read with `take(length)`, so the reader is never
    /// advanced past the frame and a bogus length can't force a large
    /// up-front allocation.
    ///
    /// # Errors
    /// [`DecodeError::EndOfStream`] if the stream closes before the first
    /// header byte; [`DecodeError::Truncated`] if it closes anywhere after.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Message, DecodeError>
    where
        R: AsyncRead + Unpin,
    {
        let tag = match reader.read_u8().await {
            Ok(tag) => tag,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(DecodeError::EndOfStream);
            }
            Err(e) => return Err(e.into()),
        };

        let mut len_buf = Vec::with_capacity(FRAME_HEADER_SIZE - 1);
        (&mut *reader)
            .take((FRAME_HEADER_SIZE - 1) as u64)
            .read_to_end(&mut len_buf)
            .await?;
        let Ok(len_bytes) = <[u8; 4]>::try_from(len_buf.as_slice()) else {
            return Err(DecodeError::Truncated {
                expected: FRAME_HEADER_SIZE,
                actual: 1 + len_buf.len(),
            });
        };

        let codec = self
            .registry
            .get(tag)
            .ok_or(DecodeError::UnknownType(tag))?;

        let len = u32::from_be_bytes(len_bytes);
        let mut payload = Vec::new();
        (&mut *reader)
            .take(u64::from(len))
            .read_to_end(&mut payload)
            .await?;
        if payload.len() < len as usize {
            return Err(DecodeError::Truncated {
                expected: len as usize,
                actual: payload.len(),
            });
        }

        codec.decode(Bytes::from(payload))
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::standard()
    }
}
