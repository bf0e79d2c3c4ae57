//! Bounded in-memory pipe between a blocking producer and an async consumer
//!
//! The writer side implements [`std::io::Write`] so synchronous encoders
//! (the tar builder) can write straight into it from a blocking task. Bytes
//! are handed over in chunks of at most [`CHUNK_SIZE`] through a channel
//! holding at most [`PIPE_CAPACITY`] chunks, so a slow consumer blocks the
//! producer instead of letting the archive pile up in memory.

use bytes::Bytes;
use futures::Stream;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const CHUNK_SIZE: usize = 32 * 1024;
pub const PIPE_CAPACITY: usize = 4;

/// Create a connected writer/reader pair
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(PIPE_CAPACITY);
    let stats = Arc::new(PipeStats::default());
    (
        PipeWriter {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
            stats: stats.clone(),
        },
        PipeReader { rx, stats },
    )
}

/// Bytes sent into the pipe but not yet taken out by the reader
#[derive(Debug, Default)]
pub struct PipeStats {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl PipeStats {
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of buffered bytes observed so far
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Producer half; must only be used from a blocking context
pub struct PipeWriter {
    tx: mpsc::Sender<Bytes>,
    buf: Vec<u8>,
    stats: Arc<PipeStats>,
}

impl PipeWriter {
    pub fn stats(&self) -> Arc<PipeStats> {
        self.stats.clone()
    }

    /// Flush the pending chunk and close the pipe, ending the reader's stream
    pub fn close(mut self) -> io::Result<()> {
        self.send_buffered()
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }

        let chunk = Bytes::from(std::mem::replace(
            &mut self.buf,
            Vec::with_capacity(CHUNK_SIZE),
        ));
        let len = chunk.len();
        let in_flight = self.stats.in_flight.fetch_add(len, Ordering::SeqCst) + len;
        self.stats.peak.fetch_max(in_flight, Ordering::SeqCst);

        self.tx.blocking_send(chunk).map_err(|_| {
            self.stats.in_flight.fetch_sub(len, Ordering::SeqCst);
            io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer closed the pipe")
        })
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.tx.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "archive consumer closed the pipe",
            ));
        }

        let n = data.len().min(CHUNK_SIZE - self.buf.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() == CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// Consumer half
pub struct PipeReader {
    rx: mpsc::Receiver<Bytes>,
    stats: Arc<PipeStats>,
}

impl PipeReader {
    pub fn stats(&self) -> Arc<PipeStats> {
        self.stats.clone()
    }

    /// Receive the next chunk, `None` once the writer is closed or dropped
    pub async fn recv(&mut self) -> Option<Bytes> {
        let chunk = self.rx.recv().await?;
        self.stats.in_flight.fetch_sub(chunk.len(), Ordering::SeqCst);
        Some(chunk)
    }

    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        futures::stream::unfold(self, |mut reader| async move {
            let chunk = reader.recv().await?;
            Some((chunk, reader))
        })
    }
}
