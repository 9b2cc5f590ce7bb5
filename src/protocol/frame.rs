//! Frame struct and stream helpers.
//!
//! A frame is one length-prefixed wire unit carrying exactly one encoded
//! record (plus its header). [`read_frame`] and [`write_frame`] work on any
//! `AsyncRead`/`AsyncWrite` and hide how the transport chunks the bytes.
//!
//! # Example
//!
//! ```
//! use zkwire_client::protocol::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (mut client, mut server) = tokio::io::duplex(64);
//! tokio::spawn(async move { write_frame(&mut client, b"hello").await.unwrap() });
//! let frame = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
//! assert_eq!(frame.payload(), b"hello");
//! # }
//! ```

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire_format::{encode_length, validate_length, LENGTH_PREFIX_SIZE};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from payload bytes.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Consume the frame, returning its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Build a complete frame (length prefix plus payload) as a single vector.
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&encode_length(payload.len())?);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Read exactly one frame from a streaming transport.
///
/// # Errors
///
/// - `Protocol` if the declared length is negative or exceeds `max_frame_size`
/// - `Connection` on end of stream or any I/O fault
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await?;
    let len = validate_length(i32::from_be_bytes(prefix), max_frame_size)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Frame::new(Bytes::from(payload)))
}

/// Write one frame, retrying until every byte is flushed.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_length(payload.len())?).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
