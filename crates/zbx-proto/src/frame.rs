//! Binary frame codec shared by the sender and get protocols.
//!
//! Standard header (13 bytes):
//! ```text
//! +--------+-------+-------------+-------------+-----------+
//! | "ZBXD" | flags | length LE   | reserved LE | payload   |
//! | 4 bytes| 1 byte| 4 bytes     | 4 bytes     | N bytes   |
//! +--------+-------+-------------+-------------+-----------+
//! ```
//!
//! With [`FLAG_LARGE`] set the length and reserved fields widen to 8 bytes
//! each (21-byte header). The reserved field carries the uncompressed size
//! for compressed frames and is zero otherwise.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, ProtocolError, TransportError};
use crate::version::Version;

pub const MAGIC: &[u8; 4] = b"ZBXD";

/// Payload follows the JSON/protocol conventions.
pub const FLAG_PROTOCOL: u8 = 0x01;

/// Payload is zlib-compressed. Not negotiated by this client.
pub const FLAG_COMPRESSED: u8 = 0x02;

/// Extended 8-byte length and reserved fields.
pub const FLAG_LARGE: u8 = 0x04;

pub const HEADER_SIZE: usize = 13;
pub const LARGE_HEADER_SIZE: usize = 21;

/// Magic plus flag byte; enough to decide which header follows.
const PREFIX_SIZE: usize = 5;

/// Sanity ceiling for a declared payload length (1 GiB)
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 1 << 30;

/// First peer version that understands the extended header.
pub const LARGE_PAYLOAD_SINCE: Version = Version::new(4, 4, 0);

/// Header layout a peer is able to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderVariant {
    /// 4-byte length field only.
    #[default]
    Standard,
    /// Switches to the 8-byte length field when the payload needs it.
    Large,
}

impl HeaderVariant {
    #[must_use]
    pub fn for_version(version: &Version) -> Self {
        if *version >= LARGE_PAYLOAD_SINCE {
            Self::Large
        } else {
            Self::Standard
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn is_large(&self) -> bool {
        self.flags & FLAG_LARGE != 0
    }
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Header,
    Payload { flags: u8, length: usize },
}

/// Codec for "ZBXD" frames
#[derive(Debug)]
pub struct FrameCodec {
    variant: HeaderVariant,
    max_frame_size: u64,
    state: DecodeState,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(HeaderVariant::Standard)
    }
}

impl FrameCodec {
    #[must_use]
    pub fn new(variant: HeaderVariant) -> Self {
        Self {
            variant,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            state: DecodeState::Header,
        }
    }

    #[must_use]
    pub fn with_max_frame_size(mut self, max: u64) -> Self {
        self.max_frame_size = max;
        self
    }

    #[must_use]
    pub fn variant(&self) -> HeaderVariant {
        self.variant
    }

    /// Bytes still owed for the frame currently being decoded.
    fn expected_len(&self, src: &BytesMut) -> u64 {
        match self.state {
            DecodeState::Header if src.len() > 4 && src[4] & FLAG_LARGE != 0 => {
                LARGE_HEADER_SIZE as u64
            }
            DecodeState::Header => HEADER_SIZE as u64,
            DecodeState::Payload { length, .. } => length as u64,
        }
    }

    fn decode_header(&mut self, src: &mut BytesMut) -> Result<Option<()>, ProtocolError> {
        let magic_len = src.len().min(MAGIC.len());
        if src[..magic_len] != MAGIC[..magic_len] {
            let mut got = [0u8; 4];
            got[..magic_len].copy_from_slice(&src[..magic_len]);
            return Err(ProtocolError::BadMagic(got));
        }

        if src.len() < PREFIX_SIZE {
            return Ok(None);
        }

        let flags = src[4];
        if flags & FLAG_COMPRESSED != 0 {
            return Err(ProtocolError::bad_payload(
                "compressed frames are not supported",
            ));
        }

        let large = flags & FLAG_LARGE != 0;
        let header_size = if large {
            LARGE_HEADER_SIZE
        } else {
            HEADER_SIZE
        };
        if src.len() < header_size {
            src.reserve(header_size - src.len());
            return Ok(None);
        }

        src.advance(PREFIX_SIZE);
        let length = if large {
            let length = src.get_u64_le();
            src.advance(8);
            length
        } else {
            let length = u64::from(src.get_u32_le());
            src.advance(4);
            length
        };

        if length > self.max_frame_size {
            return Err(ProtocolError::Oversize {
                size: length,
                max: self.max_frame_size,
            });
        }
        let length = usize::try_from(length).map_err(|_| ProtocolError::Oversize {
            size: length,
            max: usize::MAX as u64,
        })?;

        self.state = DecodeState::Payload { flags, length };
        Ok(Some(()))
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if matches!(self.state, DecodeState::Header)
            && (src.is_empty() || self.decode_header(src)?.is_none())
        {
            return Ok(None);
        }

        let DecodeState::Payload { flags, length } = self.state else {
            return Ok(None);
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let payload = src.split_to(length).freeze();
        self.state = DecodeState::Header;

        Ok(Some(Frame { flags, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        if src.is_empty() && matches!(self.state, DecodeState::Header) {
            return Ok(None);
        }

        Err(ProtocolError::Truncated {
            expected: self.expected_len(src),
            actual: src.len() as u64,
        }
        .into())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = CodecError;

    // Lengths are range-checked before narrowing
    #[allow(clippy::cast_possible_truncation)]
    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = payload.len() as u64;
        let large = length > u64::from(u32::MAX);

        if large && self.variant == HeaderVariant::Standard {
            return Err(ProtocolError::Oversize {
                size: length,
                max: u64::from(u32::MAX),
            }
            .into());
        }

        if large {
            dst.reserve(LARGE_HEADER_SIZE + payload.len());
            dst.put_slice(MAGIC);
            dst.put_u8(FLAG_PROTOCOL | FLAG_LARGE);
            dst.put_u64_le(length);
            dst.put_u64_le(0);
        } else {
            dst.reserve(HEADER_SIZE + payload.len());
            dst.put_slice(MAGIC);
            dst.put_u8(FLAG_PROTOCOL);
            dst.put_u32_le(length as u32);
            dst.put_u32_le(0);
        }
        dst.put_slice(&payload);

        Ok(())
    }
}

/// Encode a payload into a complete frame.
///
/// # Errors
///
/// Returns `ProtocolError::Oversize` if the payload does not fit the variant.
pub fn encode_frame(payload: &[u8], variant: HeaderVariant) -> Result<Bytes, ProtocolError> {
    let mut dst = BytesMut::new();
    FrameCodec::new(variant)
        .encode(Bytes::copy_from_slice(payload), &mut dst)
        .map_err(CodecError::into_protocol)?;
    Ok(dst.freeze())
}

/// Decode exactly one frame from a complete buffer.
///
/// The buffer must hold the frame and nothing else: missing or surplus bytes
/// both fail with `ProtocolError::Truncated`.
///
/// # Errors
///
/// Returns the `ProtocolError` describing why the buffer is not a frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    let mut codec = FrameCodec::new(HeaderVariant::Large);
    let mut src = BytesMut::from(bytes);

    let frame = codec
        .decode_eof(&mut src)
        .map_err(CodecError::into_protocol)?
        .ok_or(ProtocolError::Truncated {
            expected: HEADER_SIZE as u64,
            actual: 0,
        })?;

    if !src.is_empty() {
        return Err(ProtocolError::Truncated {
            expected: frame.payload.len() as u64,
            actual: (frame.payload.len() + src.len()) as u64,
        });
    }

    Ok(frame)
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl CodecError {
    fn into_protocol(self) -> ProtocolError {
        match self {
            Self::Protocol(e) => e,
            Self::Io(e) => ProtocolError::bad_payload(e.to_string()),
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => Self::Transport(TransportError::Io(e)),
            CodecError::Protocol(e) => Self::Protocol(e),
        }
    }
}
