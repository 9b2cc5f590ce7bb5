//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForLength`: Need at least 4 bytes
//! - `WaitingForPayload`: Length parsed, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use zkwire_client::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = build_frame(b"hello").unwrap();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[3..]).unwrap();
//! assert_eq!(frames[0].payload(), b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{decode_length, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use super::Frame;
use crate::error::Result;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the complete 4-byte length prefix.
    WaitingForLength,
    /// Length parsed, waiting for payload bytes.
    WaitingForPayload { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom max payload size.
    pub fn with_max_frame(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a declared length is negative or exceeds
    /// the configured maximum.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    let len = match decode_length(&self.buffer, self.max_frame_size) {
                        None => return Ok(None),
                        Some(len) => len?,
                    };
                    let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);

                    if len == 0 {
                        return Ok(Some(Frame::new(Bytes::new())));
                    }
                    self.state = State::WaitingForPayload { remaining: len };
                }
                State::WaitingForPayload { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }
                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForLength;
                    return Ok(Some(Frame::new(payload)));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_frame;

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(b"hello").unwrap()).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();
        let mut combined = Vec::new();
        combined.extend(build_frame(b"first").unwrap());
        combined.extend(build_frame(b"second").unwrap());
        combined.extend(build_frame(b"third").unwrap());

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload(), b"first");
        assert_eq!(frames[1].payload(), b"second");
        assert_eq!(frames[2].payload(), b"third");
    }

    #[test]
    fn test_fragmented_length_prefix() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(b"test").unwrap();

        assert!(buffer.push(&bytes[..2]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForLength");

        let frames = buffer.push(&bytes[2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"test");
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new();
        let payload = b"this is a longer payload that will be fragmented";
        let bytes = build_frame(payload).unwrap();

        let partial = LENGTH_PREFIX_SIZE + 10;
        assert!(buffer.push(&bytes[..partial]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&bytes[partial..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), payload);
    }

    #[test]
    fn test_empty_payload() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(b"").unwrap()).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload().is_empty());
    }

    #[test]
    fn test_max_frame_validation() {
        let mut buffer = FrameBuffer::with_max_frame(100);
        let result = buffer.push(&1000i32.to_be_bytes());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();
        let frame1 = build_frame(b"first").unwrap();
        let frame2 = build_frame(b"second").unwrap();

        let mut data = frame1.clone();
        data.extend_from_slice(&frame2[..5]);

        let frames = buffer.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&frame2[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"second");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(b"hi").unwrap();

        let mut all_frames = Vec::new();
        for byte in &bytes {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(all_frames[0].payload(), b"hi");
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(b"test").unwrap();
        buffer.push(&bytes[..LENGTH_PREFIX_SIZE + 1]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForLength");
        assert!(buffer.is_empty());
    }
}
