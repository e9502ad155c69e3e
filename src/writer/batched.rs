use std::io::{self, Write};

use log::{debug, error};

use super::{next_batch, Deflater};
use crate::block::{BgzfCodec, BlockCodec, EOF_MARKER};
use crate::error::{take_sticky, Error, Result, StateError};

/// Writer compressing a BGZF stream on the calling thread
///
/// Input is buffered until it covers more than one batch of blocks; writes below
/// that size never touch the sink. The stream is only complete once the writer is
/// closed, which happens on drop at the latest.
///
/// A failed batch may leave some of its blocks in the sink, so the first failure is
/// raised once and every later call fails with `StateError::Poisoned`.
///
/// ```rust,no_run
/// use bgzip::BgzfWriterBuilder;
/// use std::fs::File;
///
/// let file = File::create("reads.fastq.gz").unwrap();
/// let mut writer = BgzfWriterBuilder::default().build(file).unwrap();
/// writer.write(b"@read1\nACGT\n+\nIIII\n").unwrap();
/// writer.close().unwrap();
/// ```
pub struct BgzfWriter<W: Write, C: BlockCodec = BgzfCodec> {
    /// Output sink (taken by `into_inner`)
    sink: Option<W>,

    deflater: Deflater<C>,

    /// Uncompressed bytes not yet compressed
    pending: Vec<u8>,

    failure: Option<Error>,

    closed: bool,
}
impl<W: Write, C: BlockCodec> BgzfWriter<W, C> {
    pub(crate) fn new(sink: W, deflater: Deflater<C>) -> Self {
        Self {
            sink: Some(sink),
            pending: Vec::new(),
            deflater,
            failure: None,
            closed: false,
        }
    }

    /// Appends `data` to the stream
    ///
    /// Compresses and writes whole batches once more than one batch is buffered.
    ///
    /// # Errors
    ///
    /// * `StateError::Closed` - If the writer was closed
    /// * Any codec or sink failure while writing a batch
    /// * `StateError::Poisoned` - If an earlier batch failed
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(StateError::Closed.into());
        }
        self.raise()?;
        if data.is_empty() {
            return Ok(());
        }
        self.pending.extend_from_slice(data);
        if self.pending.len() > self.deflater.batch_bytes() {
            self.compress(false)?;
        }
        Ok(())
    }

    /// Compresses all remaining input and terminates the stream
    ///
    /// Writes the end-of-stream marker and flushes the sink. Closing a finished
    /// writer again does nothing; closing a failed writer fails again.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return self.raise();
        }
        self.closed = true;
        self.raise()?;
        self.compress(true)?;

        let Some(sink) = self.sink.as_mut() else {
            return Err(StateError::Closed.into());
        };
        if let Err(err) = sink.write_all(&EOF_MARKER).and_then(|()| sink.flush()) {
            self.failure = Some(err.into());
            return self.raise();
        }
        debug!("Closed BGZF writer");
        Ok(())
    }

    /// Closes the writer and returns the sink
    pub fn into_inner(mut self) -> Result<W> {
        self.close()?;
        self.sink.take().ok_or_else(|| StateError::Closed.into())
    }

    /// Number of uncompressed bytes waiting for a whole batch
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn raise(&mut self) -> Result<()> {
        match take_sticky(&mut self.failure) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Compresses whole batches (and the remainder when finalizing) into the sink
    fn compress(&mut self, finalize: bool) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(StateError::Closed.into());
        };
        let batch_size = self.deflater.batch_size();
        let mut offset = 0;
        while let Some(size) = next_batch(self.pending.len() - offset, batch_size, finalize) {
            if let Err(err) = self
                .deflater
                .deflate_into(&self.pending[offset..offset + size], sink)
            {
                self.failure = Some(err);
                break;
            }
            offset += size;
        }
        self.pending.drain(..offset);
        self.raise()
    }
}

impl<W: Write, C: BlockCodec> Write for BgzfWriter<W, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BgzfWriter::write(self, buf)?;
        Ok(buf.len())
    }

    /// Flushes the sink
    ///
    /// Buffered input is not cut into a short block; blocks are only cut on batch
    /// boundaries and on close.
    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(Error::from(StateError::Closed).into());
        }
        self.raise()?;
        match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Err(Error::from(StateError::Closed).into()),
        }
    }
}

impl<W: Write, C: BlockCodec> Drop for BgzfWriter<W, C> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.close() {
            error!("BgzfWriter: failed to finish stream: {err}");
        }
    }
}
