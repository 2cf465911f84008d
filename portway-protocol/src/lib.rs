//! Portway wire protocol
//!
//! This crate defines the binary frame format carried over the tunnel
//! connection between a Portway server and client.

pub mod codec;
pub mod constants;
pub mod frame;

pub use codec::FrameCodec;
pub use frame::{Frame, FrameError, FrameType};
