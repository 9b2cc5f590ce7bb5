//! Read loop for one connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::shared::Shared;
use crate::error::ZkError;
use crate::pipeline::dispatch;
use crate::protocol::FrameBuffer;

/// Read frames until the connection fails, dispatching each one.
///
/// No inbound traffic within `idle_timeout` counts as a failure. Always
/// returns the error that ended the loop.
pub(crate) async fn read_loop<R>(shared: Arc<Shared>, mut reader: R, idle_timeout: Duration) -> ZkError
where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::with_max_frame(shared.config().max_frame_size);
    let mut buf = vec![0u8; 64 * 1024]; // 64KB read buffer

    loop {
        let n = match tokio::time::timeout(idle_timeout, reader.read(&mut buf)).await {
            Err(_) => {
                tracing::warn!("No traffic from server for {:?}", idle_timeout);
                return ZkError::Timeout;
            }
            Ok(Ok(0)) => {
                return ZkError::Connection(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                ))
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return ZkError::Connection(e),
        };

        let frames = match frame_buffer.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!("Read loop error: {}", e);
                return e;
            }
        };

        for frame in frames {
            if let Err(e) = dispatch(&shared, frame.into_payload()) {
                if !matches!(e, ZkError::AuthFailed) {
                    tracing::error!("Read loop error: {}", e);
                }
                return e;
            }
        }
    }
}
