use std::io::{self, BufRead, Read};

use super::producer::Producer;
use super::window::Windows;
use super::{fill_buf, read_into, DecodedBytes};
use crate::block::{BgzfCodec, BlockCodec};
use crate::error::{take_sticky, Error, Result, StateError};

/// Reader decoding a BGZF stream on the calling thread
///
/// Memory use is bounded by the decode buffer, whatever the size of the stream.
/// Decoding happens lazily: a [`read`](Self::read) call decodes only when less than
/// the requested amount is buffered, and never lets buffered data grow past half of
/// the buffer.
///
/// ```rust,no_run
/// use bgzip::BgzfReaderBuilder;
/// use std::fs::File;
///
/// let file = File::open("reads.fastq.gz").unwrap();
/// let mut reader = BgzfReaderBuilder::default().build(file).unwrap();
/// loop {
///     let chunk = reader.read(1 << 20).unwrap();
///     if chunk.is_empty() {
///         break;
///     }
///     // use the chunk before the next call
/// }
/// ```
pub struct BgzfReader<R: Read, C: BlockCodec = BgzfCodec> {
    buffer: Box<[u8]>,
    windows: Windows,
    producer: Producer<R, C>,

    /// The source is drained
    exhausted: bool,

    /// Failure waiting for the buffered data to be read
    failure: Option<Error>,

    closed: bool,
}
impl<R: Read, C: BlockCodec> BgzfReader<R, C> {
    pub(crate) fn new(source: R, codec: C, buffer_size: usize, chunk_size: usize) -> Self {
        Self {
            buffer: vec![0u8; buffer_size].into_boxed_slice(),
            windows: Windows::new(buffer_size),
            producer: Producer::new(source, codec, chunk_size),
            exhausted: false,
            failure: None,
            closed: false,
        }
    }

    /// Returns up to `size` decoded bytes
    ///
    /// The returned slice is shorter than `size` when the stream ends or when the
    /// data continues in another part of the buffer; an empty slice marks the end of
    /// the stream.
    ///
    /// # Errors
    ///
    /// * `StateError::Closed` - If the reader was closed
    /// * `FormatError` - Once all data decoded before a malformed block was read,
    ///   on this and every later call
    /// * `BufferError::InsufficientCapacity` - If a block does not fit into the buffer
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
        Ok(&self.buffer[range])
    }

    /// Number of decoded bytes buffered and not yet read
    #[must_use]
    pub fn available(&self) -> usize {
        self.windows.available()
    }

    /// Releases the decode buffer
    ///
    /// Every later read fails; closing again does nothing.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.buffer = Box::default();
            self.windows = Windows::new(0);
            self.failure = None;
        }
    }

    /// Returns the source, dropping any buffered data
    pub fn into_inner(self) -> R {
        self.producer.into_source()
    }

    fn fill(&mut self, size: usize) -> Result<()> {
        let half = self.windows.capacity() / 2;
        while !self.exhausted && self.failure.is_none() {
            let available = self.windows.available();
            if available >= size || (available > 0 && available >= half) {
                break;
            }
            let Some(region) = self.windows.grant(None) else {
                break;
            };
            let filled = self.producer.fill(&mut self.buffer[region.range()], 1);
            self.windows
                .complete(region, filled.produced, filled.stalled)?;
            self.exhausted = filled.exhausted;
            self.failure = filled.failure;
            if filled.produced > 0 {
                break;
            }
        }
        Ok(())
    }
}

impl<R: Read, C: BlockCodec> DecodedBytes for BgzfReader<R, C> {
    fn fill_front(&mut self, size: usize) -> Result<usize> {
        if self.closed {
            return Err(StateError::Closed.into());
        }
        self.fill(size)?;
        Ok(self.windows.front().len())
    }

    fn take_failure(&mut self) -> Option<Error> {
        take_sticky(&mut self.failure)
    }

    fn front(&self) -> &[u8] {
        &self.buffer[self.windows.front()]
    }

    fn advance(&mut self, size: usize) {
        self.windows.consume(size);
    }
}

impl<R: Read, C: BlockCodec> Read for BgzfReader<R, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_into(self, buf)
    }
}

impl<R: Read, C: BlockCodec> BufRead for BgzfReader<R, C> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        fill_buf(self)
    }

    fn consume(&mut self, amt: usize) {
        self.advance(amt);
    }
}
