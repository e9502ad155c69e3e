use std::io::Write;

use log::trace;

use crate::block::{BgzfCodec, BlockCodec, BLOCK_PAYLOAD_SIZE, ENCODE_BUFFER_SIZE};
use crate::error::{ConfigError, Result};

/// Largest number of blocks compressed together in one batch
///
/// Every block of a batch needs its own scratch buffer of [`ENCODE_BUFFER_SIZE`]
/// bytes, which are all allocated up front.
pub const MAX_BATCH_SIZE: usize = 4096;

/// Batch encoder compressing whole blocks into a pool of scratch buffers
///
/// Concatenating the blocks of successive [`deflate`](Self::deflate) calls over a
/// payload, followed by [`EOF_MARKER`](crate::EOF_MARKER), gives the same bytes a
/// [`BgzfWriter`](crate::BgzfWriter) with the same batch size and level writes.
pub struct Deflater<C: BlockCodec = BgzfCodec> {
    codec: C,

    /// One scratch buffer per block of a batch
    buffers: Vec<Vec<u8>>,
}
impl Deflater {
    pub fn new(batch_size: usize, level: u32, num_threads: usize) -> Result<Self> {
        Self::with_codec(BgzfCodec::new(level, num_threads)?, batch_size)
    }
}
impl<C: BlockCodec> Deflater<C> {
    pub fn with_codec(codec: C, batch_size: usize) -> Result<Self> {
        if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(ConfigError::InvalidBatchSize {
                got: batch_size,
                max: MAX_BATCH_SIZE,
            }
            .into());
        }
        Ok(Self {
            codec,
            buffers: vec![vec![0u8; ENCODE_BUFFER_SIZE]; batch_size],
        })
    }

    /// Number of blocks compressed per batch
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.buffers.len()
    }

    /// Number of uncompressed bytes covered by a full batch
    #[must_use]
    pub fn batch_bytes(&self) -> usize {
        self.batch_size() * BLOCK_PAYLOAD_SIZE
    }

    /// Compresses one batch from the front of `data`
    ///
    /// Returns the number of bytes of `data` consumed and the compressed blocks, in
    /// input order. The blocks borrow the scratch buffers and are overwritten by the
    /// next call.
    pub fn deflate(&mut self, data: &[u8]) -> Result<(usize, Vec<&[u8]>)> {
        let consumed = data.len().min(self.batch_bytes());
        let sizes = self
            .codec
            .encode_chunks(&data[..consumed], &mut self.buffers)?;
        trace!("Deflated {consumed} bytes into {} blocks", sizes.len());
        let blocks = self
            .buffers
            .iter()
            .zip(sizes)
            .map(|(buffer, size)| &buffer[..size])
            .collect();
        Ok((consumed, blocks))
    }

    /// Compresses all of `data` and writes the blocks to `sink` in order
    pub fn deflate_into<W: Write>(&mut self, mut data: &[u8], sink: &mut W) -> Result<()> {
        while !data.is_empty() {
            let (consumed, blocks) = self.deflate(data)?;
            for block in blocks {
                sink.write_all(block)?;
            }
            data = &data[consumed..];
        }
        Ok(())
    }
}
