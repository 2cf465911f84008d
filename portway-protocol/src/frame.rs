//! Protocol frame definitions

use bytes::Bytes;
use thiserror::Error;

/// Frame type discriminant.
///
/// The numeric values are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// A new logical stream is being opened by the peer
    Connect = 1,
    /// Payload bytes for an open stream
    Data = 2,
    /// A logical stream is being torn down
    Close = 3,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            1 => Ok(FrameType::Connect),
            2 => Ok(FrameType::Data),
            3 => Ok(FrameType::Close),
            other => Err(FrameError::InvalidType(other)),
        }
    }
}

/// One unit of the wire protocol: `[type][stream id][length][payload]`.
///
/// The length field is derived from the payload on encode; it is never
/// stored separately. CONNECT and CLOSE frames carry no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl Frame {
    /// Announce a new logical stream.
    pub fn connect(stream_id: u32) -> Self {
        Self {
            frame_type: FrameType::Connect,
            stream_id,
            payload: Bytes::new(),
        }
    }

    /// Carry payload bytes for a stream.
    pub fn data(stream_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type: FrameType::Data,
            stream_id,
            payload: payload.into(),
        }
    }

    /// Tear down a logical stream.
    pub fn close(stream_id: u32) -> Self {
        Self {
            frame_type: FrameType::Close,
            stream_id,
            payload: Bytes::new(),
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame{{type:{:?} stream:{} len:{}}}",
            self.frame_type,
            self.stream_id,
            self.payload.len()
        )
    }
}

/// Errors produced while encoding or decoding frames
#[derive(Error, Debug)]
pub enum FrameError {
    /// The source ended mid-header or mid-payload
    #[error("truncated frame: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    /// Unknown frame type byte
    #[error("invalid frame type: {0}")]
    InvalidType(u8),

    /// Declared payload length exceeds the configured maximum
    #[error("payload too large: {len} bytes (max: {max})")]
    Oversize { len: u32, max: u32 },

    /// Underlying transport failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
