//! Length-prefixed transport frame.
//!
//! Layout on the wire:
//! `[length: u32 BE][opcode: u8][body: length - 1 bytes]`
//!
//! A `Frame` holds the opcode and the raw body bytes. It does not deserialize
//! the body, so a router can forward a frame it has only partially inspected.
//! For the typed view see [`crate::Payload::into_frame`] and
//! [`crate::Payload::from_frame`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame
///
/// # Invariants
///
/// - Size Limit: `1 + body.len()` MUST NOT exceed [`Frame::MAX_SIZE`]. The
///   limit is enforced on encode and checked against the length prefix before
///   any body bytes are copied on decode.
///
/// # Security
///
/// Provides structural validity only: a known opcode and a body of the claimed
/// length. Says nothing about CBOR validity or the authenticity of the
/// ciphertext inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload type
    pub opcode: Opcode,

    /// Raw payload bytes (already CBOR-encoded)
    pub body: Bytes,
}

impl Frame {
    /// Size of the length prefix.
    pub const LENGTH_SIZE: usize = 4;

    /// Maximum value of the length prefix (16 MiB).
    pub const MAX_SIZE: usize = 16 * 1024 * 1024;

    /// Create a frame from an opcode and encoded body.
    pub fn new(opcode: Opcode, body: impl Into<Bytes>) -> Self {
        Self { opcode, body: body.into() }
    }

    /// Bytes this frame occupies on the wire, prefix included.
    pub fn wire_len(&self) -> usize {
        Self::LENGTH_SIZE + 1 + self.body.len()
    }

    /// Encode frame into buffer.
    ///
    /// # Errors
    ///
    /// - `FrameTooLarge` if the opcode plus body exceeds [`Frame::MAX_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let length = 1 + self.body.len();
        if length > Self::MAX_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: length, max: Self::MAX_SIZE });
        }

        // INVARIANT: length <= MAX_SIZE (16 MiB) which fits in u32
        dst.put_u32(length as u32);
        dst.put_u8(self.opcode.to_u8());
        dst.put_slice(&self.body);

        Ok(())
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode exactly one frame from the start of `bytes`.
    ///
    /// Trailing bytes after the frame are ignored.
    ///
    /// # Errors
    ///
    /// - `FrameTruncated` if the prefix or body is incomplete, or the length
    ///   prefix is zero (no room for an opcode)
    /// - `FrameTooLarge` if the length prefix exceeds [`Frame::MAX_SIZE`]
    /// - `UnknownOpcode` if the opcode byte is not in the table
    ///
    /// # Security
    ///
    /// - Fail Fast: the size check happens before the body is copied, so a
    ///   hostile prefix cannot force a large allocation.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let length = Self::peek_length(bytes)?.ok_or(ProtocolError::FrameTruncated {
            expected: Self::LENGTH_SIZE,
            actual: bytes.len(),
        })?;

        let total = Self::LENGTH_SIZE + length;
        if bytes.len() < total {
            #[cfg_attr(not(fuzzing), allow(unexpected_cfgs))]
            #[cfg(fuzzing)]
            {
                let _ = total; // Proves we hit this branch
            }

            return Err(ProtocolError::FrameTruncated {
                expected: length,
                actual: bytes.len() - Self::LENGTH_SIZE,
            });
        }

        let opcode_byte = bytes[Self::LENGTH_SIZE];
        let opcode =
            Opcode::from_u8(opcode_byte).ok_or(ProtocolError::UnknownOpcode(opcode_byte))?;
        let body = Bytes::copy_from_slice(&bytes[Self::LENGTH_SIZE + 1..total]);

        Ok(Self { opcode, body })
    }

    /// Incrementally decode one frame from a stream buffer.
    ///
    /// Returns `Ok(None)` while the buffer holds less than a full frame. On
    /// success the frame's bytes are consumed from `buf`.
    ///
    /// # Errors
    ///
    /// Same as [`Frame::decode`], except truncation is reported as `Ok(None)`.
    /// After an error the stream is unusable.
    pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Self>> {
        let Some(length) = Self::peek_length(buf)? else {
            return Ok(None);
        };

        if buf.len() < Self::LENGTH_SIZE + length {
            return Ok(None);
        }

        buf.advance(Self::LENGTH_SIZE);
        let mut frame_bytes = buf.split_to(length);

        let opcode_byte = frame_bytes.get_u8();
        let opcode =
            Opcode::from_u8(opcode_byte).ok_or(ProtocolError::UnknownOpcode(opcode_byte))?;

        Ok(Some(Self { opcode, body: frame_bytes.freeze() }))
    }

    /// Read and validate the length prefix, `None` if fewer than 4 bytes.
    fn peek_length(bytes: &[u8]) -> Result<Option<usize>> {
        let Some(prefix) = bytes.get(..Self::LENGTH_SIZE) else {
            return Ok(None);
        };

        let mut raw = [0u8; Self::LENGTH_SIZE];
        raw.copy_from_slice(prefix);
        let length = u32::from_be_bytes(raw) as usize;

        if length > Self::MAX_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: length, max: Self::MAX_SIZE });
        }
        if length == 0 {
            return Err(ProtocolError::FrameTruncated { expected: 1, actual: 0 });
        }

        Ok(Some(length))
    }
}
