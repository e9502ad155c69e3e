//! Reader decoding on a background thread
//!
//! The caller's thread owns all window bookkeeping. The worker owns the source and
//! the codec and only ever sees the buffer region of the job it is running:
//!
//! ```text
//!  caller                               worker
//!  ------                               ------
//!  grant(region) ── Job{region, want} ─▶ fill(region)
//!                                           │
//!  complete(region) ◀── Done{region, filled} ┘
//! ```
//!
//! Jobs run one at a time and complete in submission order, so completions are
//! applied in the same order the regions were granted.

use std::io::{self, BufRead, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, trace};

use super::buffer::SharedBuffer;
use super::producer::{Filled, Producer};
use super::window::{Window, Windows};
use super::{fill_buf, read_into, DecodedBytes};
use crate::block::{BgzfCodec, BlockCodec};
use crate::error::{take_sticky, Error, PipelineError, Result, StateError};

/// Decode request for one buffer region
struct Job {
    region: Window,
    want: usize,
}

/// Result of a [`Job`], sent back to the caller's thread
struct Done {
    region: Window,
    filled: Filled,
}

/// Reader decoding a BGZF stream ahead of demand on a background thread
///
/// A [`read`](Self::read) returns immediately when enough data is buffered. When it
/// is not, it waits for outstanding decode jobs, and if those cannot cover the
/// request either, it submits one job for the shortfall and one more for a full
/// prefetch quantum of read-ahead. The read-ahead job keeps running after the read
/// returns.
pub struct PrefetchReader<R, C = BgzfCodec>
where
    R: Read + Send + 'static,
    C: BlockCodec + Send + 'static,
{
    buffer: Arc<SharedBuffer>,
    windows: Windows,

    /// Bytes of read-ahead requested per job
    quantum: usize,

    jobs: Option<Sender<Job>>,
    done: Receiver<Done>,
    worker: Option<JoinHandle<Producer<R, C>>>,

    /// Source returned by the worker once it has stopped
    source: Option<R>,

    /// The source is drained
    exhausted: bool,

    /// Failure waiting for the buffered data to be read
    failure: Option<Error>,

    closed: bool,
}
impl<R, C> PrefetchReader<R, C>
where
    R: Read + Send + 'static,
    C: BlockCodec + Send + 'static,
{
    pub(crate) fn new(
        source: R,
        codec: C,
        buffer_size: usize,
        chunk_size: usize,
        quantum: usize,
    ) -> Result<Self> {
        let buffer = Arc::new(SharedBuffer::new(buffer_size));
        let producer = Producer::new(source, codec, chunk_size);
        let (job_tx, job_rx) = unbounded();
        let (done_tx, done_rx) = unbounded();

        let worker = {
            let buffer = Arc::clone(&buffer);
            thread::Builder::new()
                .name("bgzf-prefetch".to_string())
                .spawn(move || run_worker(producer, &buffer, &job_rx, &done_tx))?
        };
        debug!("Started prefetch worker ({buffer_size} byte buffer)");

        Ok(Self {
            buffer,
            windows: Windows::new(buffer_size),
            quantum,
            jobs: Some(job_tx),
            done: done_rx,
            worker: Some(worker),
            source: None,
            exhausted: false,
            failure: None,
            closed: false,
        })
    }

    /// Returns up to `size` decoded bytes
    ///
    /// Same contract as [`BgzfReader::read`](super::BgzfReader::read).
    ///
    /// # Errors
    ///
    /// * `StateError::Closed` - If the reader was closed
    /// * `FormatError` - Once all data decoded before a malformed block was read,
    ///   on this and every later call
    /// * `PipelineError::WorkerDisconnected` - If the worker stopped unexpectedly
    pub fn read(&mut self, size: usize) -> Result<&[u8]> {
        if self.closed {
            return Err(StateError::Closed.into());
        }
        if size == 0 {
            return Ok(&[]);
        }
        if self.fill_front(size)? == 0 {
            return match self.take_failure() {
                Some(err) => Err(err),
                None => Ok(&[]),
            };
        }
        let range = self.windows.consume(size);
        // SAFETY: the range lies in a completed window that no job can be granted
        unsafe { Ok(self.buffer.slice(range)) }
    }

    /// Number of decoded bytes buffered and not yet read
    #[must_use]
    pub fn available(&self) -> usize {
        self.windows.available()
    }

    /// Number of decode jobs submitted and not yet applied
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.windows.reserved()
    }

    /// Stops the worker and releases the decode buffer
    ///
    /// Waits for outstanding jobs first. Closing again does nothing.
    ///
    /// # Errors
    ///
    /// Returns the first failure reported by an outstanding job, or
    /// `PipelineError::WorkerPanicked` if the worker panicked.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.jobs = None;

        let mut first_err = None;
        for _ in 0..self.windows.reserved() {
            match self.done.recv() {
                Ok(done) => {
                    if first_err.is_none() {
                        first_err = done.filled.failure;
                    }
                }
                Err(_) => break,
            }
        }
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(producer) => self.source = Some(producer.into_source()),
                Err(_) => {
                    first_err.get_or_insert(PipelineError::WorkerPanicked.into());
                }
            }
        }
        debug!("Stopped prefetch worker");

        self.windows = Windows::new(0);
        self.buffer = Arc::new(SharedBuffer::new(0));
        self.failure = None;
        first_err.map_or(Ok(()), Err)
    }

    /// Stops the worker and returns the source
    ///
    /// Failures of read-ahead jobs whose output was never read are dropped along
    /// with the buffer; the source is only lost if the worker panicked.
    pub fn into_inner(mut self) -> Result<R> {
        let closed = self.close();
        match self.source.take() {
            Some(source) => {
                if let Err(err) = closed {
                    debug!("Dropped pending read-ahead failure: {err}");
                }
                Ok(source)
            }
            None => Err(closed.err().unwrap_or_else(|| PipelineError::WorkerPanicked.into())),
        }
    }

    /// Submits a job for `want` more bytes
    ///
    /// Returns `false` without submitting when the stream cannot grow: the source is
    /// drained, a failure is pending, at least half of the buffer is unread, or no
    /// free region is left.
    fn submit(&mut self, want: usize) -> Result<bool> {
        let available = self.windows.available();
        if self.exhausted
            || self.failure.is_some()
            || (available > 0 && available >= self.windows.capacity() / 2)
        {
            return Ok(false);
        }
        let Some(region) = self.windows.grant(Some(want)) else {
            return Ok(false);
        };
        let Some(jobs) = &self.jobs else {
            return Err(StateError::Closed.into());
        };
        jobs.send(Job { region, want })
            .map_err(|_| PipelineError::WorkerDisconnected)?;
        trace!(
            "Submitted job for {want} bytes into [{}, {})",
            region.start,
            region.end
        );
        Ok(true)
    }

    /// Applies a completion, in submission order
    fn apply(&mut self, done: Done) -> Result<()> {
        let Done { region, filled } = done;
        self.windows
            .complete(region, filled.produced, filled.stalled)?;
        self.exhausted |= filled.exhausted;
        if self.failure.is_none() {
            self.failure = filled.failure;
        }
        Ok(())
    }

    /// Applies completions that have already arrived
    fn apply_ready(&mut self) -> Result<()> {
        while self.windows.reserved() > 0 {
            let Ok(done) = self.done.try_recv() else {
                break;
            };
            self.apply(done)?;
        }
        Ok(())
    }

    /// Blocks on the oldest outstanding job
    fn apply_next(&mut self) -> Result<()> {
        let done = self
            .done
            .recv()
            .map_err(|_| PipelineError::WorkerDisconnected)?;
        self.apply(done)
    }

    /// Waits until `size` bytes are available or the stream cannot grow any further
    fn wait_for(&mut self, size: usize) -> Result<()> {
        while self.windows.available() < size {
            if self.windows.reserved() == 0 {
                let shortfall = size - self.windows.available();
                if !self.submit(shortfall)? {
                    break;
                }
            }
            self.apply_next()?;
        }
        Ok(())
    }
}

impl<R, C> DecodedBytes for PrefetchReader<R, C>
where
    R: Read + Send + 'static,
    C: BlockCodec + Send + 'static,
{
    fn fill_front(&mut self, size: usize) -> Result<usize> {
        if self.closed {
            return Err(StateError::Closed.into());
        }
        self.apply_ready()?;

        let available = self.windows.available();
        if size > available {
            let future = available + self.quantum * self.windows.reserved();
            if size > future {
                self.submit(size - future)?;
                self.submit(self.quantum)?;
            }
            self.wait_for(size)?;
        }
        Ok(self.windows.front().len())
    }

    fn take_failure(&mut self) -> Option<Error> {
        take_sticky(&mut self.failure)
    }

    fn front(&self) -> &[u8] {
        // SAFETY: the oldest window is completed and no job can be granted it
        unsafe { self.buffer.slice(self.windows.front()) }
    }

    fn advance(&mut self, size: usize) {
        self.windows.consume(size);
    }
}

impl<R, C> Read for PrefetchReader<R, C>
where
    R: Read + Send + 'static,
    C: BlockCodec + Send + 'static,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_into(self, buf)
    }
}

impl<R, C> BufRead for PrefetchReader<R, C>
where
    R: Read + Send + 'static,
    C: BlockCodec + Send + 'static,
{
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        fill_buf(self)
    }

    fn consume(&mut self, amt: usize) {
        self.advance(amt);
    }
}

impl<R, C> Drop for PrefetchReader<R, C>
where
    R: Read + Send + 'static,
    C: BlockCodec + Send + 'static,
{
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("PrefetchReader: failed to shut down cleanly: {err}");
        }
    }
}

fn run_worker<R: Read, C: BlockCodec>(
    mut producer: Producer<R, C>,
    buffer: &SharedBuffer,
    jobs: &Receiver<Job>,
    done: &Sender<Done>,
) -> Producer<R, C> {
    for Job { region, want } in jobs {
        // SAFETY: the region was granted to this job alone and the caller does not
        // read it before receiving the completion
        let dst = unsafe { buffer.slice_mut(region.range()) };
        let filled = producer.fill(dst, want);
        if done.send(Done { region, filled }).is_err() {
            break;
        }
    }
    producer
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use rand::rngs::SmallRng;
    use rand::{Rng, RngCore, SeedableRng};

    use super::*;
    use crate::block::{BLOCK_PAYLOAD_SIZE, EOF_MARKER};
    use crate::{BgzfReaderBuilder, BgzfWriterBuilder};

    fn compress(payload: &[u8]) -> Result<Vec<u8>> {
        let mut writer = BgzfWriterBuilder::default()
            .batch_size(8)
            .num_threads(2)
            .build(Vec::new())?;
        writer.write(payload)?;
        writer.into_inner()
    }

    fn open(
        stream: Vec<u8>,
        buffer_size: usize,
        quantum: usize,
    ) -> Result<PrefetchReader<io::Cursor<Vec<u8>>>> {
        BgzfReaderBuilder::default()
            .buffer_size(buffer_size)
            .num_threads(2)
            .read_chunk_size(8192)
            .prefetch_quantum(quantum)
            .build_prefetch(io::Cursor::new(stream))
    }

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut data = vec![0u8; len];
        rng.fill_bytes(&mut data);
        data
    }

    #[test]
    fn test_prefetch_round_trip() -> anyhow::Result<()> {
        let payload = random_bytes(20 * BLOCK_PAYLOAD_SIZE + 999, 1);
        let stream = compress(&payload)?;
        let mut reader = open(stream, 1 << 22, 1 << 18)?;

        let mut decoded = Vec::new();
        reader.read_to_end(&mut decoded)?;
        assert_eq!(decoded, payload);
        reader.close()?;
        Ok(())
    }

    #[test]
    fn test_random_read_sizes() -> Result<()> {
        let payload = random_bytes(12 * BLOCK_PAYLOAD_SIZE + 5, 2);
        let stream = compress(&payload)?;
        let mut reader = open(stream, 6 * BLOCK_PAYLOAD_SIZE, 2 * BLOCK_PAYLOAD_SIZE)?;

        let mut rng = SmallRng::seed_from_u64(3);
        let mut decoded = Vec::with_capacity(payload.len());
        loop {
            let chunk = reader.read(rng.random_range(1..3 * BLOCK_PAYLOAD_SIZE))?;
            if chunk.is_empty() {
                break;
            }
            decoded.extend_from_slice(chunk);
            assert!(reader.available() <= 6 * BLOCK_PAYLOAD_SIZE);
        }
        assert_eq!(decoded, payload);
        Ok(())
    }

    #[test]
    fn test_read_ahead_stays_in_flight() -> Result<()> {
        let payload = random_bytes(10 * BLOCK_PAYLOAD_SIZE, 4);
        let stream = compress(&payload)?;
        let mut reader = open(stream, 1 << 22, 2 * BLOCK_PAYLOAD_SIZE)?;

        assert_eq!(reader.read(10)?.len(), 10);
        assert!(reader.in_flight() <= 1);
        Ok(())
    }

    #[test]
    fn test_close_with_jobs_in_flight() -> Result<()> {
        let payload = random_bytes(10 * BLOCK_PAYLOAD_SIZE, 5);
        let stream = compress(&payload)?;
        let mut reader = open(stream.clone(), 1 << 22, 4 * BLOCK_PAYLOAD_SIZE)?;

        reader.read(1)?;
        reader.close()?;
        reader.close()?;
        assert!(reader.read(1).unwrap_err().is_closed());

        let reader = open(stream, 1 << 22, 4 * BLOCK_PAYLOAD_SIZE)?;
        let source = reader.into_inner()?;
        assert_eq!(source.position(), 0);
        Ok(())
    }

    #[test]
    fn test_into_inner_after_failed_read_ahead() -> Result<()> {
        let payload = random_bytes(100, 7);
        let mut stream = compress(&payload)?;
        stream.truncate(stream.len() - EOF_MARKER.len());
        stream.extend_from_slice(b"trailing junk following the only block");
        let len = stream.len();
        let mut reader = open(stream, 1 << 20, 1 << 16)?;

        assert_eq!(reader.read(10)?, &payload[..10]);
        let source = reader.into_inner()?;
        assert_eq!(source.position() as usize, len);
        Ok(())
    }

    #[test]
    fn test_empty_stream() -> Result<()> {
        let mut reader = open(EOF_MARKER.to_vec(), 1024, 1024)?;
        assert!(reader.read(10)?.is_empty());

        let mut reader = open(Vec::new(), 1024, 1024)?;
        assert!(reader.read(10)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_malformed_stream() -> Result<()> {
        let payload = random_bytes(3 * BLOCK_PAYLOAD_SIZE, 6);
        let mut stream = compress(&payload)?;
        stream.truncate(stream.len() - EOF_MARKER.len());
        stream.extend_from_slice(b"not a bgzf block at all, just some trailing junk");
        let mut reader = open(stream, 1 << 22, 1 << 16)?;

        let mut decoded = Vec::new();
        let err = loop {
            match reader.read(4096) {
                Ok(chunk) => {
                    assert!(!chunk.is_empty());
                    decoded.extend_from_slice(chunk);
                }
                Err(err) => break err,
            }
        };
        assert!(err.is_malformed());
        assert_eq!(decoded, payload);
        assert!(reader.read(4096).unwrap_err().is_malformed());
        Ok(())
    }
}
