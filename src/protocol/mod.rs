//! Protocol module - framing and wire constants.
//!
//! This module implements the transport framing of the data plane:
//! - 4-byte big-endian length prefix encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Stream helpers for reading/writing one frame at a time

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, read_frame, write_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_length, encode_length, op, validate_length, xid, DEFAULT_MAX_FRAME_SIZE,
    LENGTH_PREFIX_SIZE, PROTOCOL_VERSION,
};
