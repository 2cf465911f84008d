//! Protocol constants

/// Size of the fixed frame header: 1 byte type, 4 bytes stream id,
/// 4 bytes payload length.
pub const FRAME_HEADER_LEN: usize = 9;

/// Maximum payload size accepted by the codec (16MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;
