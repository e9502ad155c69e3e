//! Parallel encode/decode of whole BGZF blocks.
//!
//! The engine above this module never looks inside a block: it hands a run of raw
//! compressed bytes and a destination region to [`BlockCodec::decode_blocks`], or a
//! batch of uncompressed bytes and a pool of scratch buffers to
//! [`BlockCodec::encode_chunks`]. Any parallelism happens inside a single call and
//! the call returns only once every block of it is done.

use std::ops::Range;
use std::sync::Arc;

use auto_impl::auto_impl;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{
    BlockFooter, BlockHeader, BLOCK_FOOTER_SIZE, BLOCK_HEADER_SIZE, BLOCK_METADATA_SIZE,
    BLOCK_PAYLOAD_SIZE, MAX_BLOCK_SIZE, MAX_INFLATED_BLOCK_SIZE,
};
use crate::error::{BufferError, ConfigError, FormatError, Result};

/// Outcome of a [`BlockCodec::decode_blocks`] call
///
/// * `consumed` - Bytes of compressed input covered by the decoded blocks
/// * `produced` - Bytes written to the start of the destination
/// * `blocks` - Number of whole blocks decoded (empty blocks included)
/// * `dst_full` - The next complete block in the input did not fit into the
///   destination. When `produced == 0` this tells the caller to move to a new write
///   region; `consumed == 0` without `dst_full` means the input ends inside a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Inflated {
    pub consumed: usize,
    pub produced: usize,
    pub blocks: usize,
    pub dst_full: bool,
}

/// Stateless whole-block codec
///
/// Implementations must never write a partial block into a destination and must
/// return encoded chunks in input order, whatever order they finish in.
#[auto_impl(&, Box, Arc)]
pub trait BlockCodec {
    /// Decodes as many whole blocks from the front of `input` as fit into `dst`
    ///
    /// Returns `Inflated::default()` for an empty input.
    fn decode_blocks(&self, input: &[u8], dst: &mut [u8]) -> Result<Inflated>;

    /// Encodes `payload` as `ceil(len / BLOCK_PAYLOAD_SIZE)` independent blocks
    ///
    /// Block `i` is written to the front of `dst[i]`; the returned vector holds the
    /// encoded size of every block, in order.
    fn encode_chunks(&self, payload: &[u8], dst: &mut [Vec<u8>]) -> Result<Vec<usize>>;
}

/// DEFLATE-backed [`BlockCodec`] running per-block work on its own thread pool
#[derive(Clone, Debug)]
pub struct BgzfCodec {
    level: Compression,
    pool: Arc<ThreadPool>,
}
impl BgzfCodec {
    /// Creates a codec compressing at `level` (0-9) on `num_threads` threads
    ///
    /// A `num_threads` of 0 lets the pool pick the host CPU count.
    pub fn new(level: u32, num_threads: usize) -> Result<Self> {
        if level > 9 {
            return Err(ConfigError::InvalidLevel(level).into());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|idx| format!("bgzf-codec-{idx}"))
            .build()?;
        Ok(Self {
            level: Compression::new(level),
            pool: Arc::new(pool),
        })
    }

    /// Number of threads used for per-block work
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Compression level used by `encode_chunks`
    #[must_use]
    pub fn level(&self) -> u32 {
        self.level.level()
    }
}

impl BlockCodec for BgzfCodec {
    fn decode_blocks(&self, input: &[u8], dst: &mut [u8]) -> Result<Inflated> {
        let scan = BlockScan::new(input, dst.len())?;

        // Carve one output slice per block
        let mut jobs = Vec::with_capacity(scan.spans.len());
        let mut rest = &mut dst[..scan.produced];
        for span in &scan.spans {
            let (out, tail) = std::mem::take(&mut rest).split_at_mut(span.inflated);
            jobs.push((&input[span.deflated.clone()], out));
            rest = tail;
        }

        let results: Vec<Result<()>> = self.pool.install(|| {
            jobs.into_par_iter()
                .map(|(deflated, out)| inflate_block(deflated, out))
                .collect()
        });

        // Keep the successful prefix; the next call fails on the first bad block
        let mut inflated = Inflated {
            dst_full: scan.dst_full,
            ..Inflated::default()
        };
        for (span, result) in scan.spans.iter().zip(results) {
            if let Err(err) = result {
                if inflated.blocks == 0 {
                    return Err(err);
                }
                inflated.dst_full = false;
                break;
            }
            inflated.consumed = span.end;
            inflated.produced += span.inflated;
            inflated.blocks += 1;
        }
        Ok(inflated)
    }

    fn encode_chunks(&self, payload: &[u8], dst: &mut [Vec<u8>]) -> Result<Vec<usize>> {
        let chunks: Vec<&[u8]> = payload.chunks(BLOCK_PAYLOAD_SIZE).collect();
        if chunks.len() > dst.len() {
            return Err(BufferError::TooFewBuffers {
                chunks: chunks.len(),
                buffers: dst.len(),
            }
            .into());
        }
        let level = self.level;
        self.pool.install(|| {
            chunks
                .par_iter()
                .zip(dst[..chunks.len()].par_iter_mut())
                .map(|(chunk, buffer)| deflate_block(chunk, buffer, level))
                .collect()
        })
    }
}

/// Location of one whole block inside a compressed input
struct BlockSpan {
    /// Raw DEFLATE payload
    deflated: Range<usize>,
    /// Number of bytes the payload inflates to
    inflated: usize,
    /// Offset just past the block footer
    end: usize,
}

/// Sequential walk over block headers, done before any inflation happens
struct BlockScan {
    spans: Vec<BlockSpan>,
    produced: usize,
    dst_full: bool,
}
impl BlockScan {
    fn new(input: &[u8], capacity: usize) -> Result<Self> {
        let mut scan = Self {
            spans: Vec::new(),
            produced: 0,
            dst_full: false,
        };
        let mut offset = 0;
        while offset < input.len() {
            let span = match Self::next_block(&input[offset..]) {
                Ok(Some((header_size, block_size, inflated))) => BlockSpan {
                    deflated: offset + header_size..offset + block_size - BLOCK_FOOTER_SIZE,
                    inflated,
                    end: offset + block_size,
                },
                Ok(None) => break,
                // Decode what precedes the bad block first
                Err(_) if !scan.spans.is_empty() => break,
                Err(err) => return Err(err),
            };
            if scan.produced + span.inflated > capacity {
                scan.dst_full = true;
                break;
            }
            scan.produced += span.inflated;
            offset = span.end;
            scan.spans.push(span);
        }
        Ok(scan)
    }

    /// Returns `(header_size, block_size, inflated_size)` of the leading block, if whole
    fn next_block(input: &[u8]) -> Result<Option<(usize, usize, usize)>> {
        let Some(header) = BlockHeader::from_bytes(input)? else {
            return Ok(None);
        };
        let block_size = header.block_size();
        if input.len() < block_size {
            return Ok(None);
        }
        let footer = BlockFooter::from_bytes(&input[block_size - BLOCK_FOOTER_SIZE..block_size]);
        let inflated = footer.inflated_size as usize;
        if inflated > MAX_INFLATED_BLOCK_SIZE {
            return Err(FormatError::PayloadTooLarge(inflated).into());
        }
        Ok(Some((header.header_size(), block_size, inflated)))
    }
}

fn inflate_block(deflated: &[u8], out: &mut [u8]) -> Result<()> {
    // Empty blocks (end-of-stream markers) carry nothing to check
    if out.is_empty() {
        return Ok(());
    }
    let mut inflater = Decompress::new(false);
    let status = inflater
        .decompress(deflated, out, FlushDecompress::Finish)
        .map_err(|err| FormatError::Inflate(err.to_string()))?;
    let got = inflater.total_out() as usize;
    match status {
        Status::StreamEnd if got == out.len() => Ok(()),
        Status::StreamEnd => Err(FormatError::SizeMismatch {
            expected: out.len(),
            got,
        }
        .into()),
        _ => Err(FormatError::Inflate(format!(
            "payload does not end within {} bytes",
            out.len()
        ))
        .into()),
    }
}

fn deflate_block(chunk: &[u8], buffer: &mut [u8], level: Compression) -> Result<usize> {
    let capacity = buffer.len();
    if capacity < BLOCK_METADATA_SIZE {
        return Err(BufferError::BlockOverflow(capacity).into());
    }

    let mut deflater = Compress::new(level, false);
    let status = deflater
        .compress(
            chunk,
            &mut buffer[BLOCK_HEADER_SIZE..capacity - BLOCK_FOOTER_SIZE],
            FlushCompress::Finish,
        )
        .map_err(|_| BufferError::BlockOverflow(capacity))?;
    if status != Status::StreamEnd {
        return Err(BufferError::BlockOverflow(capacity).into());
    }

    let block_size = BLOCK_METADATA_SIZE + deflater.total_out() as usize;
    if block_size > MAX_BLOCK_SIZE {
        return Err(BufferError::BlockOverflow(MAX_BLOCK_SIZE).into());
    }
    BlockHeader::new(block_size).write_bytes(&mut buffer[..BLOCK_HEADER_SIZE]);
    BlockFooter::new(crc32fast::hash(chunk), chunk.len() as u32)
        .write_bytes(&mut buffer[block_size - BLOCK_FOOTER_SIZE..block_size]);
    Ok(block_size)
}
