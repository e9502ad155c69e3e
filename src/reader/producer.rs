use std::io::{ErrorKind, Read};

use log::trace;

use crate::block::BlockCodec;
use crate::error::{Error, FormatError, Result};

/// Outcome of filling one region of the decode buffer
///
/// Failures are reported next to the progress made before them, so that data decoded
/// ahead of a bad block is still delivered.
#[derive(Debug, Default)]
pub(crate) struct Filled {
    /// Bytes written to the start of the region
    pub produced: usize,

    /// Not a single block fit into the region
    pub stalled: bool,

    /// The source is drained and no pending input is left
    pub exhausted: bool,

    pub failure: Option<Error>,
}

/// Pulls compressed bytes from a source and decodes them into buffer regions
pub(crate) struct Producer<R, C> {
    source: R,
    codec: C,

    /// Compressed bytes read from the source but not yet decoded
    pending: Vec<u8>,

    /// Number of bytes requested from the source per pull
    chunk_size: usize,

    /// The source returned an empty read
    eof: bool,
}
impl<R: Read, C: BlockCodec> Producer<R, C> {
    pub fn new(source: R, codec: C, chunk_size: usize) -> Self {
        Self {
            source,
            codec,
            pending: Vec::with_capacity(chunk_size),
            chunk_size,
            eof: false,
        }
    }

    pub fn into_source(self) -> R {
        self.source
    }

    /// Decodes whole blocks into `dst` until at least `want` bytes are produced
    ///
    /// Stops early when the next block does not fit into what is left of `dst`, when
    /// the source is drained, or on the first failure.
    pub fn fill(&mut self, dst: &mut [u8], want: usize) -> Filled {
        let mut filled = Filled::default();
        let mut starved = false;
        loop {
            if !self.eof && (starved || self.pending.len() < self.chunk_size) {
                if let Err(err) = self.pull() {
                    filled.failure = Some(err);
                    break;
                }
            }

            let inflated = match self
                .codec
                .decode_blocks(&self.pending, &mut dst[filled.produced..])
            {
                Ok(inflated) => inflated,
                Err(err) => {
                    filled.failure = Some(err);
                    break;
                }
            };
            self.pending.drain(..inflated.consumed);
            filled.produced += inflated.produced;
            trace!(
                "Decoded {} blocks ({} -> {} bytes)",
                inflated.blocks,
                inflated.consumed,
                inflated.produced
            );

            if inflated.dst_full {
                filled.stalled = filled.produced == 0;
                break;
            }
            if filled.produced >= want {
                break;
            }
            starved = inflated.consumed == 0;
            if starved && self.eof {
                if self.pending.is_empty() {
                    filled.exhausted = true;
                } else {
                    filled.failure = Some(FormatError::Truncated(self.pending.len()).into());
                }
                break;
            }
        }
        filled
    }

    /// Appends up to one chunk from the source to the pending input
    fn pull(&mut self) -> Result<()> {
        let len = self.pending.len();
        self.pending.resize(len + self.chunk_size, 0);
        loop {
            match self.source.read(&mut self.pending[len..]) {
                Ok(n) => {
                    self.pending.truncate(len + n);
                    self.eof = n == 0;
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    self.pending.truncate(len);
                    return Err(err.into());
                }
            }
        }
    }
}
