use std::io::Write;

use super::{BgzfWriter, Deflater, PipelinedWriter};
use crate::block::{BgzfCodec, BlockCodec, DEFAULT_LEVEL};
use crate::error::{ConfigError, Result};
use crate::utils::resolve_threads;

/// Default number of blocks compressed together
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Default number of batches a [`PipelinedWriter`] lets pile up before blocking
pub const DEFAULT_QUEUE_SIZE: usize = 2;

/// A builder for configured [`BgzfWriter`] and [`PipelinedWriter`] instances
///
/// Every setting is optional and falls back to its default in `build`.
///
/// ```rust,no_run
/// use bgzip::BgzfWriterBuilder;
/// use std::fs::File;
///
/// let file = File::create("reads.fastq.gz").unwrap();
/// let mut writer = BgzfWriterBuilder::default()
///     .level(9)
///     .batch_size(64)
///     .build_pipelined(file)
///     .unwrap();
/// writer.write(b"ACGT").unwrap();
/// writer.close().unwrap();
/// ```
#[derive(Clone, Debug, Default)]
pub struct BgzfWriterBuilder {
    batch_size: Option<usize>,
    num_threads: Option<usize>,
    level: Option<u32>,
    queue_size: Option<usize>,
    strict_limit: Option<usize>,
}
impl BgzfWriterBuilder {
    /// Sets the number of blocks compressed in parallel per batch
    ///
    /// Must lie within `1..=MAX_BATCH_SIZE`. Each block of a batch holds a scratch
    /// buffer of about 65 KiB for the lifetime of the writer.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Sets the number of threads used to deflate blocks
    ///
    /// `0` (the default) uses every available CPU.
    #[must_use]
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Sets the DEFLATE compression level (0-9)
    #[must_use]
    pub fn level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    /// Sets how many batches a [`PipelinedWriter`] may have outstanding
    #[must_use]
    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = Some(queue_size);
        self
    }

    /// Makes a [`PipelinedWriter`] fail instead of blocking once `limit` batches are
    /// outstanding
    #[must_use]
    pub fn strict_limit(mut self, limit: usize) -> Self {
        self.strict_limit = Some(limit);
        self
    }

    /// Builds a writer compressing on the calling thread
    pub fn build<W: Write>(self, sink: W) -> Result<BgzfWriter<W>> {
        let codec = self.codec()?;
        self.build_with_codec(sink, codec)
    }

    /// Builds a writer compressing with a custom codec
    pub fn build_with_codec<W: Write, C: BlockCodec>(
        self,
        sink: W,
        codec: C,
    ) -> Result<BgzfWriter<W, C>> {
        let deflater = self.deflater(codec)?;
        Ok(BgzfWriter::new(sink, deflater))
    }

    /// Builds a writer compressing on a background thread
    pub fn build_pipelined<W: Write + Send + 'static>(self, sink: W) -> Result<PipelinedWriter<W>> {
        let codec = self.codec()?;
        self.build_pipelined_with_codec(sink, codec)
    }

    /// Builds a pipelined writer with a custom codec
    pub fn build_pipelined_with_codec<W, C>(self, sink: W, codec: C) -> Result<PipelinedWriter<W, C>>
    where
        W: Write + Send + 'static,
        C: BlockCodec + Send + 'static,
    {
        let queue_size = self.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE);
        if queue_size == 0 || self.strict_limit == Some(0) {
            return Err(ConfigError::ZeroQueueSize.into());
        }
        let deflater = self.deflater(codec)?;
        PipelinedWriter::new(sink, deflater, queue_size, self.strict_limit)
    }

    fn codec(&self) -> Result<BgzfCodec> {
        let num_threads = resolve_threads(self.num_threads.unwrap_or(0));
        BgzfCodec::new(self.level.unwrap_or(DEFAULT_LEVEL), num_threads)
    }

    fn deflater<C: BlockCodec>(&self, codec: C) -> Result<Deflater<C>> {
        if let Some(level) = self.level.filter(|&level| level > 9) {
            return Err(ConfigError::InvalidLevel(level).into());
        }
        Deflater::with_codec(codec, self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE))
    }
}
