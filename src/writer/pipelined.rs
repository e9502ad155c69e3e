//! Writer compressing on a background thread
//!
//! The caller keeps accumulating input and sends every whole batch to a single
//! worker, which owns the [`Deflater`] and the sink. Batches therefore reach the
//! sink in the order they were sent. The caller tracks outstanding tasks and never
//! lets more than `queue_size` of them pile up.

use std::io::{self, Write};
use std::marker::PhantomData;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, trace};

use super::{next_batch, Deflater};
use crate::block::{BgzfCodec, BlockCodec, BLOCK_PAYLOAD_SIZE, EOF_MARKER};
use crate::error::{take_sticky, Error, PipelineError, Result, StateError};

/// Work sent to the background thread
enum Task {
    /// Compress and write a batch of uncompressed bytes
    Batch(Vec<u8>),
    /// Flush the sink
    Flush,
}

/// Counters describing the tasks a [`PipelinedWriter`] has run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Tasks handed to the worker
    pub submitted: usize,
    /// Tasks whose completion has been received
    pub completed: usize,
    /// Largest number of tasks outstanding at the same time
    pub peak_in_flight: usize,
}

/// Writer compressing a BGZF stream on a background thread
///
/// [`write`](Self::write) only blocks when `queue_size` tasks are already
/// outstanding, or fails with `PipelineError::Backpressure` instead when a strict
/// limit is configured. A failure of the worker is raised by the next call made on
/// the writer; every call after that fails with `StateError::Poisoned`.
pub struct PipelinedWriter<W, C = BgzfCodec>
where
    W: Write + Send + 'static,
    C: BlockCodec + Send + 'static,
{
    /// Uncompressed bytes not yet sent to the worker
    pending: Vec<u8>,

    /// Blocks per batch
    batch_size: usize,

    queue_size: usize,
    strict_limit: Option<usize>,

    tasks: Option<Sender<Task>>,
    done: Receiver<Result<()>>,
    worker: Option<JoinHandle<W>>,

    /// Sink returned by the worker once it has stopped
    sink: Option<W>,

    in_flight: usize,
    stats: PipelineStats,

    /// First failure reported by the worker
    failure: Option<Error>,

    closed: bool,

    /// The codec lives in the worker
    _codec: PhantomData<fn() -> C>,
}
impl<W, C> PipelinedWriter<W, C>
where
    W: Write + Send + 'static,
    C: BlockCodec + Send + 'static,
{
    pub(crate) fn new(
        sink: W,
        deflater: Deflater<C>,
        queue_size: usize,
        strict_limit: Option<usize>,
    ) -> Result<Self> {
        let batch_size = deflater.batch_size();
        let (task_tx, task_rx) = unbounded();
        let (done_tx, done_rx) = unbounded();
        let worker = thread::Builder::new()
            .name("bgzf-writer".to_string())
            .spawn(move || run_worker(deflater, sink, &task_rx, &done_tx))?;
        debug!("Started writer worker (batch size {batch_size}, queue size {queue_size})");

        Ok(Self {
            pending: Vec::new(),
            batch_size,
            queue_size,
            strict_limit,
            tasks: Some(task_tx),
            done: done_rx,
            worker: Some(worker),
            sink: None,
            in_flight: 0,
            stats: PipelineStats::default(),
            failure: None,
            closed: false,
            _codec: PhantomData,
        })
    }

    /// Appends `data` to the stream
    ///
    /// # Errors
    ///
    /// * `StateError::Closed` - If the writer was closed
    /// * A failure of an earlier batch, then `StateError::Poisoned`
    /// * `PipelineError::Backpressure` - If a strict limit is configured and the
    ///   worker has fallen behind
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.check()?;
        if data.is_empty() {
            return Ok(());
        }
        self.pending.extend_from_slice(data);
        if self.pending.len() > self.batch_size * BLOCK_PAYLOAD_SIZE {
            self.dispatch(false)?;
        }
        Ok(())
    }

    /// Waits for every outstanding task and flushes the sink
    ///
    /// Input that does not fill a whole batch stays buffered.
    pub fn flush(&mut self) -> Result<()> {
        self.check()?;
        self.submit(Task::Flush, true)?;
        while self.in_flight > 0 {
            self.wait_one()?;
        }
        self.raise()
    }

    /// Compresses all remaining input, stops the worker and terminates the stream
    ///
    /// Waits for the worker even when a strict limit is configured. Closing a
    /// writer that finished its stream again does nothing; closing a failed writer
    /// again fails with `StateError::Poisoned`.
    ///
    /// # Errors
    ///
    /// Any failure of an outstanding task, then any failure writing the end-of-stream
    /// marker.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return self.raise();
        }
        self.apply_ready();
        if self.failure.is_none() {
            if let Err(err) = self.dispatch(true) {
                self.failure.get_or_insert(err);
            }
        }
        self.closed = true;
        self.shutdown();
        self.raise()?;

        let Some(sink) = self.sink.as_mut() else {
            return Err(PipelineError::WorkerPanicked.into());
        };
        if let Err(err) = sink.write_all(&EOF_MARKER).and_then(|()| sink.flush()) {
            self.failure = Some(err.into());
            return self.raise();
        }
        debug!(
            "Closed pipelined writer ({} tasks, peak {} in flight)",
            self.stats.submitted, self.stats.peak_in_flight
        );
        Ok(())
    }

    /// Closes the writer and returns the sink
    pub fn into_inner(mut self) -> Result<W> {
        self.close()?;
        self.sink
            .take()
            .ok_or_else(|| PipelineError::WorkerPanicked.into())
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Applies finished tasks and raises what the caller must see first
    fn check(&mut self) -> Result<()> {
        if self.closed {
            return Err(StateError::Closed.into());
        }
        self.apply_ready();
        self.raise()
    }

    fn raise(&mut self) -> Result<()> {
        match take_sticky(&mut self.failure) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Sends whole batches (and the remainder when finalizing) to the worker
    ///
    /// A final dispatch always waits for room instead of failing on a strict limit.
    fn dispatch(&mut self, finalize: bool) -> Result<()> {
        let mut offset = 0;
        let mut result = Ok(());
        while let Some(size) = next_batch(self.pending.len() - offset, self.batch_size, finalize)
        {
            let batch = self.pending[offset..offset + size].to_vec();
            result = self.submit(Task::Batch(batch), finalize);
            if result.is_err() {
                break;
            }
            offset += size;
        }
        self.pending.drain(..offset);
        result
    }

    /// Hands `task` to the worker
    ///
    /// With `wait` set, a strict limit blocks like `queue_size` does.
    fn submit(&mut self, task: Task, wait: bool) -> Result<()> {
        self.apply_ready();
        let strict_limit = self.strict_limit.filter(|_| !wait);
        if let Some(limit) = strict_limit {
            if self.in_flight >= limit {
                // The task is dropped, so the stream can no longer be completed
                self.failure.get_or_insert(StateError::Poisoned.into());
                return Err(PipelineError::Backpressure {
                    outstanding: self.in_flight + 1,
                    limit,
                }
                .into());
            }
        } else {
            let bound = self.strict_limit.unwrap_or(self.queue_size);
            while self.in_flight >= bound {
                self.wait_one()?;
            }
        }

        let Some(tasks) = &self.tasks else {
            return Err(StateError::Closed.into());
        };
        tasks
            .send(task)
            .map_err(|_| PipelineError::WorkerDisconnected)?;
        self.in_flight += 1;
        self.stats.submitted += 1;
        self.stats.peak_in_flight = self.stats.peak_in_flight.max(self.in_flight);
        trace!("Submitted task ({} in flight)", self.in_flight);
        Ok(())
    }

    fn complete(&mut self, result: Result<()>) {
        self.in_flight -= 1;
        self.stats.completed += 1;
        if let Err(err) = result {
            self.failure.get_or_insert(err);
        }
    }

    fn apply_ready(&mut self) {
        while self.in_flight > 0 {
            let Ok(result) = self.done.try_recv() else {
                break;
            };
            self.complete(result);
        }
    }

    /// Blocks on the oldest outstanding task
    fn wait_one(&mut self) -> Result<()> {
        let result = self
            .done
            .recv()
            .map_err(|_| PipelineError::WorkerDisconnected)?;
        self.complete(result);
        Ok(())
    }

    /// Drains outstanding tasks and joins the worker
    fn shutdown(&mut self) {
        self.tasks = None;
        while self.in_flight > 0 {
            match self.done.recv() {
                Ok(result) => self.complete(result),
                Err(_) => break,
            }
        }
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(sink) => self.sink = Some(sink),
                Err(_) => {
                    self.failure
                        .get_or_insert(PipelineError::WorkerPanicked.into());
                }
            }
        }
        debug!("Stopped writer worker");
    }
}

impl<W, C> Write for PipelinedWriter<W, C>
where
    W: Write + Send + 'static,
    C: BlockCodec + Send + 'static,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        PipelinedWriter::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        PipelinedWriter::flush(self)?;
        Ok(())
    }
}

impl<W, C> Drop for PipelinedWriter<W, C>
where
    W: Write + Send + 'static,
    C: BlockCodec + Send + 'static,
{
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.close() {
            error!("PipelinedWriter: failed to finish stream: {err}");
        }
    }
}

fn run_worker<W: Write, C: BlockCodec>(
    mut deflater: Deflater<C>,
    mut sink: W,
    tasks: &Receiver<Task>,
    done: &Sender<Result<()>>,
) -> W {
    let mut failed = false;
    for task in tasks {
        let result = if failed {
            Err(StateError::Poisoned.into())
        } else {
            match task {
                Task::Batch(batch) => deflater.deflate_into(&batch, &mut sink),
                Task::Flush => sink.flush().map_err(Error::from),
            }
        };
        failed |= result.is_err();
        if done.send(result).is_err() {
            break;
        }
    }
    sink
}
