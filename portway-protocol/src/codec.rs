//! Codec for encoding and decoding tunnel frames
//!
//! The wire format is a fixed 9-byte header followed by the raw payload:
//!
//! ```text
//! ┌──────────┬─────────────────────┬──────────────────┬───────────────┐
//! │ Type (u8)│ Stream ID (u32, BE) │ Length (u32, BE) │ Payload       │
//! │ 1 byte   │ 4 bytes             │ 4 bytes          │ Length bytes  │
//! └──────────┴─────────────────────┴──────────────────┴───────────────┘
//! ```
//!
//! No byte is reserved for escaping; payloads may contain arbitrary data
//! because the length is explicit. A frame is fully buffered before it is
//! handed to the caller; partial frames never cross this boundary.

use crate::constants::{FRAME_HEADER_LEN, MAX_PAYLOAD_SIZE};
use crate::frame::{Frame, FrameError, FrameType};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Tunnel frame codec
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }
}

impl FrameCodec {
    /// Create a codec with the default payload limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom payload limit
    pub fn with_max_payload(max_payload: u32) -> Self {
        Self { max_payload }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        // Peek the header without consuming; the type byte is validated
        // up front so garbage input fails fast instead of stalling on a
        // bogus length.
        let frame_type = FrameType::try_from(src[0])?;
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[5..9]);
        let length = u32::from_be_bytes(length_bytes);

        if length > self.max_payload {
            return Err(FrameError::Oversize {
                len: length,
                max: self.max_payload,
            });
        }

        let total = FRAME_HEADER_LEN + length as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(1);
        let stream_id = src.get_u32();
        src.advance(4);
        let payload = src.split_to(length as usize).freeze();

        Ok(Some(Frame {
            frame_type,
            stream_id,
            payload,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                // Source exhausted mid-header or mid-payload. Report how
                // much a complete frame would have needed.
                let needed = if src.len() < FRAME_HEADER_LEN {
                    FRAME_HEADER_LEN
                } else {
                    let mut length_bytes = [0u8; 4];
                    length_bytes.copy_from_slice(&src[5..9]);
                    FRAME_HEADER_LEN + u32::from_be_bytes(length_bytes) as usize
                };
                Err(FrameError::Truncated {
                    needed,
                    got: src.len(),
                })
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = u32::try_from(frame.payload.len()).map_err(|_| FrameError::Oversize {
            len: u32::MAX,
            max: self.max_payload,
        })?;

        if length > self.max_payload {
            return Err(FrameError::Oversize {
                len: length,
                max: self.max_payload,
            });
        }

        dst.reserve(FRAME_HEADER_LEN + frame.payload.len());
        dst.put_u8(frame.frame_type as u8);
        dst.put_u32(frame.stream_id);
        dst.put_u32(length);
        if length > 0 {
            dst.put_slice(&frame.payload);
        }

        Ok(())
    }
}
