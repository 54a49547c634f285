//! Dedicated writer task for outbound frames.
//!
//! Every caller (binds, invocations, aborts sent from the read loop) pushes
//! frames into one mpsc channel; a single task owns the socket's write half
//! and drains the channel, batching ready frames into vectored writes.
//!
//! ```text
//! Client::query ─┐
//! Client::query ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► socket
//! read loop     ─┘        (abort frames)
//! ```
//!
//! The task exits cleanly once every [`WriterHandle`] is dropped, shutting
//! down the write half so the service sees EOF.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ConsumerError, Result};
use crate::protocol::{flags, Header, ABORT_METHOD_ID, HEADER_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Interval between backpressure checks.
const BACKPRESSURE_CHECK_INTERVAL: Duration = Duration::from_micros(100);

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (11 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for ABORT).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Build a client -> service request frame.
    pub fn request(method_id: u16, request_id: u32, payload: Bytes) -> Self {
        let header = Header::new(method_id, flags::REQUEST, request_id, payload.len() as u32);
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Build an ABORT frame for a request.
    pub fn abort(request_id: u32) -> Self {
        Self::request(ABORT_METHOD_ID, request_id, Bytes::new())
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
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
///
/// Cheap to clone; shared by the connection and its read loop.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Send a frame to the writer task.
    ///
    /// Waits while backpressure is active, up to the configured timeout.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            ConsumerError::ConnectionLost("writer task has stopped".to_string())
        })
    }

    /// Try to send a frame without waiting.
    ///
    /// Used from synchronous contexts (drop guards) where awaiting is not
    /// possible.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(ConsumerError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => ConsumerError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => {
                    ConsumerError::ConnectionLost("writer task has stopped".to_string())
                }
            }
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(ConsumerError::BackpressureTimeout);
            }

            tokio::time::sleep(BACKPRESSURE_CHECK_INTERVAL).await;
        }
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The returned `JoinHandle` resolves once all handles are dropped and the
/// queue is flushed, or on the first write error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        max_pending: config.max_pending_frames,
        timeout: config.backpressure_timeout,
    };

    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let result = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(batch_size, Ordering::Release);
        batch.clear();

        if let Err(e) = result {
            tracing::error!(error = %e, "writer task failed");
            return Err(e);
        }
    }

    // Channel closed: every handle is gone.
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(error = %e, "shutdown of write half failed");
    }
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(ConsumerError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let parts: [&[u8]; 2] = [&frame.header[..], &frame.payload[..]];
        for part in parts {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}
