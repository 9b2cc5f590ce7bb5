//! Dedicated writer task for the socket's write half.
//!
//! The connection task hands encoded requests to a writer task over a
//! bounded mpsc channel. The writer batches whatever is ready and writes it
//! with one vectored write per batch.
//!
//! ```text
//! pipeline queue ─► connection task ─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► TCP
//! pings, closeSession ───────┘
//! ```
//!
//! - **Batching**: several frames per syscall via writev
//! - **Backpressure**: pending count with a configurable limit; a writer
//!   that stays full past the timeout reports `Backpressure`

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, ZkError};
use crate::protocol::{encode_length, LENGTH_PREFIX_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded length prefix.
    pub length: [u8; LENGTH_PREFIX_SIZE],
    /// Request header plus body.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Frame an encoded request.
    #[inline]
    pub fn new(payload: Bytes) -> Result<Self> {
        Ok(Self {
            length: encode_length(payload.len())?,
            payload,
        })
    }

    /// Total size of this frame (prefix + payload).
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::Sender<OutboundFrame>,
    /// Pending frame count (for backpressure).
    pending: Arc<AtomicUsize>,
    /// Maximum pending frames.
    max_pending: usize,
    /// Backpressure timeout.
    timeout: Duration,
}

impl WriterHandle {
    /// Create a new writer handle.
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Send a frame to the writer task.
    ///
    /// This method will wait if backpressure is active, timing out after
    /// the configured duration.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        // Check backpressure
        let current = self.pending.load(Ordering::Acquire);
        if current >= self.max_pending {
            // Wait with timeout for backpressure to clear
            self.wait_for_backpressure().await?;
        }

        // Increment pending count BEFORE sending
        self.pending.fetch_add(1, Ordering::AcqRel);

        // Send to channel
        self.tx.send(frame).await.map_err(|_| {
            // Decrement on failure
            self.pending.fetch_sub(1, Ordering::Release);
            ZkError::ConnectionClosed
        })
    }

    /// Wait for backpressure to clear with timeout.
    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(ZkError::Backpressure);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// # Arguments
///
/// * `writer` - The async writer (socket write half)
/// * `config` - Writer configuration
///
/// # Returns
///
/// A tuple of `(WriterHandle, JoinHandle)` where the JoinHandle can be used
/// to wait for the writer task to complete.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the socket.
///
/// Uses batching and scatter/gather I/O (writev) for efficiency.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        // Wait for first frame
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                // Channel closed, clean shutdown
                writer.shutdown().await.ok();
                return Ok(());
            }
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        // Write the batch
        let batch_size = batch.len();
        write_batch(&mut writer, &batch).await?;

        // Update pending count
        pending.fetch_sub(batch_size, Ordering::Release);
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    // Each frame contributes 1-2 slices (prefix, optionally payload)
    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);

    for frame in batch {
        slices.push(IoSlice::new(&frame.length));
        if !frame.payload.is_empty() {
            slices.push(IoSlice::new(&frame.payload));
        }
    }

    // Calculate total size
    let total_size: usize = batch.iter().map(|f| f.size()).sum();

    // Fast path: the kernel buffer usually takes the whole batch
    let written = writer.write_vectored(&slices).await?;

    if written == total_size {
        writer.flush().await?;
        return Ok(());
    }

    if written == 0 {
        return Err(ZkError::Connection(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "write_vectored returned 0",
        )));
    }

    // Slow path: partial write, need to continue with remaining data
    let mut total_written = written;

    while total_written < total_size {
        // Rebuild slices for remaining data
        let remaining_slices = build_remaining_slices(batch, total_written);
        if remaining_slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&remaining_slices).await?;
        if written == 0 {
            return Err(ZkError::Connection(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        // Handle length prefix
        let prefix_start = skipped;
        let prefix_end = skipped + LENGTH_PREFIX_SIZE;

        if skip_bytes < prefix_end {
            let start_in_prefix = skip_bytes.saturating_sub(prefix_start);
            slices.push(IoSlice::new(&frame.length[start_in_prefix..]));
        }
        skipped = prefix_end;

        // Handle payload
        if !frame.payload.is_empty() {
            let payload_start = skipped;
            let payload_end = skipped + frame.payload.len();

            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(payload_start);
                slices.push(IoSlice::new(&frame.payload[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    use crate::protocol::{read_frame, DEFAULT_MAX_FRAME_SIZE};

    fn frame(payload: &'static [u8]) -> OutboundFrame {
        OutboundFrame::new(Bytes::from_static(payload)).unwrap()
    }

    #[test]
    fn test_outbound_frame_creation() {
        let frame = frame(b"hello");

        assert_eq!(frame.length, 5i32.to_be_bytes());
        assert_eq!(frame.payload.len(), 5);
        assert_eq!(frame.size(), LENGTH_PREFIX_SIZE + 5);
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(frame(b"hello")).await.unwrap();

        let received = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(received.payload(), b"hello");
    }

    #[tokio::test]
    async fn test_writer_handle_pending_count() {
        let (client, _server) = duplex(4096);
        let config = WriterConfig {
            max_pending_frames: 1000,
            channel_capacity: 100,
            backpressure_timeout: Duration::from_secs(1),
        };
        let (handle, _task) = spawn_writer_task(client, config);

        assert_eq!(handle.pending_count(), 0);
        assert!(!handle.is_backpressure_active());
    }

    #[tokio::test]
    async fn test_writer_batching_preserves_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        for i in 0..10u32 {
            let payload = Bytes::copy_from_slice(&i.to_be_bytes());
            handle.send(OutboundFrame::new(payload).unwrap()).await.unwrap();
        }

        for i in 0..10u32 {
            let received = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
            assert_eq!(received.payload(), &i.to_be_bytes());
        }
    }

    #[tokio::test]
    async fn test_send_times_out_when_writer_stalls() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(AtomicUsize::new(100)); // At capacity

        let handle = WriterHandle::new(tx, pending, 100, Duration::from_millis(20));

        let result = handle.send(frame(b"x")).await;
        assert!(matches!(result, Err(ZkError::Backpressure)));
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![frame(b"hello")];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2); // prefix + payload
    }

    #[test]
    fn test_build_remaining_slices_partial_prefix() {
        let batch = vec![frame(b"hello")];

        let slices = build_remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), LENGTH_PREFIX_SIZE - 3);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_skip_prefix() {
        let batch = vec![frame(b"hello")];

        let slices = build_remaining_slices(&batch, LENGTH_PREFIX_SIZE + 2);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 3);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());

        let batch: Vec<_> = (0..5).map(|_| frame(b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        let written = buf.into_inner();
        assert_eq!(written.len(), 5 * (LENGTH_PREFIX_SIZE + 3));
        assert_eq!(&written[..4], &3i32.to_be_bytes());
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
        // Write half shut down: the peer sees end of stream.
        let mut rest = Vec::new();
        assert_eq!(server.read_to_end(&mut rest).await.unwrap(), 0);
    }
}
