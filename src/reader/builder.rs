use std::io::Read;

use super::{BgzfReader, PrefetchReader};
use crate::block::{BgzfCodec, BlockCodec, DEFAULT_LEVEL};
use crate::error::{ConfigError, Result};
use crate::utils::resolve_threads;

/// Default size of the decode buffer (50 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 50 * 1024 * 1024;

/// Default number of compressed bytes pulled from the source at a time (256 KiB)
pub const DEFAULT_READ_CHUNK_SIZE: usize = 256 * 1024;

/// Default read-ahead of each prefetch job (4 MiB)
pub const DEFAULT_PREFETCH_QUANTUM: usize = 4 * 1024 * 1024;

/// A builder for configured [`BgzfReader`] and [`PrefetchReader`] instances
///
/// Every setting is optional and falls back to its default in `build`.
///
/// ```rust,no_run
/// use bgzip::BgzfReaderBuilder;
/// use std::fs::File;
///
/// let file = File::open("reads.fastq.gz").unwrap();
/// let reader = BgzfReaderBuilder::default()
///     .buffer_size(16 << 20)
///     .num_threads(4)
///     .build_prefetch(file)
///     .unwrap();
/// ```
#[derive(Clone, Debug, Default)]
pub struct BgzfReaderBuilder {
    buffer_size: Option<usize>,
    num_threads: Option<usize>,
    read_chunk_size: Option<usize>,
    prefetch_quantum: Option<usize>,
}
impl BgzfReaderBuilder {
    /// Sets the size of the decode buffer in bytes
    ///
    /// The buffer must hold at least one whole block (up to 64 KiB) at a time.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Sets the number of threads used to inflate blocks
    ///
    /// `0` (the default) uses every available CPU.
    #[must_use]
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Sets the number of compressed bytes requested from the source per read
    #[must_use]
    pub fn read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.read_chunk_size = Some(read_chunk_size);
        self
    }

    /// Sets how many bytes each read-ahead job of a [`PrefetchReader`] decodes
    #[must_use]
    pub fn prefetch_quantum(mut self, prefetch_quantum: usize) -> Self {
        self.prefetch_quantum = Some(prefetch_quantum);
        self
    }

    /// Builds a reader decoding on the calling thread
    pub fn build<R: Read>(self, source: R) -> Result<BgzfReader<R>> {
        let codec = self.codec()?;
        self.build_with_codec(source, codec)
    }

    /// Builds a reader decoding with a custom codec
    pub fn build_with_codec<R: Read, C: BlockCodec>(
        self,
        source: R,
        codec: C,
    ) -> Result<BgzfReader<R, C>> {
        let (buffer_size, chunk_size) = self.validate()?;
        Ok(BgzfReader::new(source, codec, buffer_size, chunk_size))
    }

    /// Builds a reader decoding ahead of demand on a background thread
    pub fn build_prefetch<R: Read + Send + 'static>(self, source: R) -> Result<PrefetchReader<R>> {
        let codec = self.codec()?;
        self.build_prefetch_with_codec(source, codec)
    }

    /// Builds a prefetching reader with a custom codec
    pub fn build_prefetch_with_codec<R, C>(self, source: R, codec: C) -> Result<PrefetchReader<R, C>>
    where
        R: Read + Send + 'static,
        C: BlockCodec + Send + 'static,
    {
        let (buffer_size, chunk_size) = self.validate()?;
        let quantum = self.prefetch_quantum.unwrap_or(DEFAULT_PREFETCH_QUANTUM);
        if quantum == 0 {
            return Err(ConfigError::ZeroChunkSize.into());
        }
        PrefetchReader::new(source, codec, buffer_size, chunk_size, quantum)
    }

    fn codec(&self) -> Result<BgzfCodec> {
        let num_threads = resolve_threads(self.num_threads.unwrap_or(0));
        BgzfCodec::new(DEFAULT_LEVEL, num_threads)
    }

    fn validate(&self) -> Result<(usize, usize)> {
        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size == 0 {
            return Err(ConfigError::ZeroCapacity.into());
        }
        let chunk_size = self.read_chunk_size.unwrap_or(DEFAULT_READ_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize.into());
        }
        Ok((buffer_size, chunk_size))
    }
}
