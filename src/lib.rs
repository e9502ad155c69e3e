//! # bgzip
//!
//! Bounded-memory, multi-threaded streaming codec for BGZF, the blocked gzip format
//! used throughout genomics (BAM, tabix-indexed VCF, bgzipped FASTQ).
//!
//! A BGZF stream is a concatenation of gzip members of at most 64 KiB each, so any
//! gzip decoder can read it, while this crate inflates and deflates whole runs of
//! blocks in parallel.
//!
//! * Reading decodes into a single buffer allocated up front and hands out slices of
//!   it: see [`BgzfReader`] and its background-prefetching twin [`PrefetchReader`].
//! * Writing groups input into batches of blocks compressed in parallel and written
//!   in order: see [`BgzfWriter`] and its background-thread twin [`PipelinedWriter`].
//!
//! ```rust,no_run
//! use bgzip::{BgzfReaderBuilder, BgzfWriterBuilder};
//! use std::fs::File;
//! use std::io;
//!
//! let mut reader = BgzfReaderBuilder::default()
//!     .build_prefetch(File::open("in.fastq.gz").unwrap())
//!     .unwrap();
//! let mut writer = BgzfWriterBuilder::default()
//!     .build_pipelined(File::create("out.fastq.gz").unwrap())
//!     .unwrap();
//! io::copy(&mut reader, &mut writer).unwrap();
//! writer.close().unwrap();
//! ```

pub mod block;
pub mod error;
mod reader;
mod utils;
mod writer;

pub use block::{
    BgzfCodec, BlockCodec, Inflated, BLOCK_METADATA_SIZE, BLOCK_PAYLOAD_SIZE, EOF_MARKER,
};
pub use error::{Error, Result};
pub use reader::{BgzfReader, BgzfReaderBuilder, PrefetchReader};
pub use writer::{
    BgzfWriter, BgzfWriterBuilder, Deflater, PipelineStats, PipelinedWriter, MAX_BATCH_SIZE,
};

#[cfg(test)]
mod testing {

    use super::*;
    use anyhow::Result;
    use std::io::{self, Read};

    use parking_lot::{Condvar, Mutex};
    use rand::rngs::SmallRng;
    use rand::{Rng, RngCore, SeedableRng};

    use crate::block::BlockHeader;

    const SIZES: [usize; 6] = [
        0,
        1,
        BLOCK_PAYLOAD_SIZE - 1,
        BLOCK_PAYLOAD_SIZE,
        BLOCK_PAYLOAD_SIZE + 1,
        23 * BLOCK_PAYLOAD_SIZE + 17,
    ];

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut data = vec![0u8; len];
        rng.fill_bytes(&mut data);
        data
    }

    fn compress(data: &[u8], batch_size: usize) -> crate::Result<Vec<u8>> {
        let mut writer = BgzfWriterBuilder::default()
            .batch_size(batch_size)
            .num_threads(4)
            .build(Vec::new())?;
        writer.write(data)?;
        writer.into_inner()
    }

    fn decompress(stream: &[u8], buffer_size: usize) -> Result<Vec<u8>> {
        let mut reader = BgzfReaderBuilder::default()
            .buffer_size(buffer_size)
            .num_threads(4)
            .build(stream)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Offsets of every block in a well-formed stream
    fn block_offsets(stream: &[u8]) -> crate::Result<Vec<usize>> {
        let mut offsets = Vec::new();
        let mut offset = 0;
        while offset < stream.len() {
            offsets.push(offset);
            let header = BlockHeader::from_bytes(&stream[offset..])?.expect("complete header");
            offset += header.block_size();
        }
        Ok(offsets)
    }

    #[test]
    fn test_round_trip_sizes() -> Result<()> {
        for (seed, size) in SIZES.into_iter().enumerate() {
            let data = random_bytes(size, seed as u64);
            let stream = compress(&data, 4)?;
            assert!(stream.ends_with(&EOF_MARKER));
            assert_eq!(decompress(&stream, 1 << 20)?, data, "size {size}");
        }
        Ok(())
    }

    #[test]
    fn test_pipelined_round_trip_sizes() -> Result<()> {
        for (seed, size) in SIZES.into_iter().enumerate() {
            let data = random_bytes(size, 100 + seed as u64);

            let mut writer = BgzfWriterBuilder::default()
                .batch_size(3)
                .num_threads(4)
                .build_pipelined(Vec::new())?;
            writer.write(&data)?;
            let stream = writer.into_inner()?;

            let mut reader = BgzfReaderBuilder::default()
                .buffer_size(4 * BLOCK_PAYLOAD_SIZE)
                .prefetch_quantum(BLOCK_PAYLOAD_SIZE)
                .num_threads(4)
                .build_prefetch(io::Cursor::new(stream))?;
            let mut decoded = Vec::new();
            reader.read_to_end(&mut decoded)?;
            assert_eq!(decoded, data, "size {size}");
        }
        Ok(())
    }

    #[test]
    fn test_read_size_independence() -> Result<()> {
        let data = random_bytes(9 * BLOCK_PAYLOAD_SIZE + 4321, 7);
        let stream = compress(&data, 2)?;

        let mut reader = BgzfReaderBuilder::default()
            .buffer_size(5 * BLOCK_PAYLOAD_SIZE)
            .read_chunk_size(10_000)
            .build(stream.as_slice())?;
        let mut rng = SmallRng::seed_from_u64(8);
        let mut decoded = Vec::new();
        loop {
            let chunk = reader.read(rng.random_range(1..2 * BLOCK_PAYLOAD_SIZE))?;
            if chunk.is_empty() {
                break;
            }
            decoded.extend_from_slice(chunk);
        }
        assert_eq!(decoded, data);
        assert_eq!(decompress(&stream, 1 << 24)?, data);
        Ok(())
    }

    #[test]
    fn test_large_write() -> Result<()> {
        let data = random_bytes(50 * 1024 * 1024, 50);
        let split = 987_345;

        let mut writer = BgzfWriterBuilder::default().build(Vec::new())?;
        writer.write(&data[..split])?;
        writer.write(&data[split..])?;
        let stream = writer.into_inner()?;
        assert!(stream.ends_with(&EOF_MARKER));

        // Batch-by-batch deflation gives the same bytes
        let mut deflater = Deflater::new(64, 6, 0)?;
        let mut expected = Vec::with_capacity(stream.len());
        let mut rest = data.as_slice();
        while !rest.is_empty() {
            let (consumed, blocks) = deflater.deflate(rest)?;
            for block in blocks {
                expected.extend_from_slice(block);
            }
            rest = &rest[consumed..];
        }
        expected.extend_from_slice(&EOF_MARKER);
        assert!(expected == stream);

        assert!(decompress(&stream, 1 << 24)? == data);
        Ok(())
    }

    #[test]
    fn test_close_without_writes() -> Result<()> {
        let stream = BgzfWriterBuilder::default().build(Vec::new())?.into_inner()?;
        assert_eq!(stream, EOF_MARKER);
        assert!(decompress(&stream, 1024)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_small_buffer() -> Result<()> {
        // Buffer holding one and a half blocks
        let data = random_bytes(6 * BLOCK_PAYLOAD_SIZE + 99, 11);
        let stream = compress(&data, 2)?;
        assert_eq!(decompress(&stream, 3 * BLOCK_PAYLOAD_SIZE / 2)?, data);

        // Buffer smaller than a full block, with a stream of short blocks
        let mut stream = Vec::new();
        let mut data = Vec::new();
        for seed in 0..50 {
            let member = random_bytes(700, 200 + seed);
            stream.extend(compress(&member, 1)?);
            data.extend(member);
        }
        assert_eq!(decompress(&stream, 2048)?, data);
        Ok(())
    }

    #[test]
    fn test_gzip_compatible() -> Result<()> {
        let data = random_bytes(3 * BLOCK_PAYLOAD_SIZE + 5, 12);
        let stream = compress(&data, 2)?;

        let mut decoder = flate2::read::MultiGzDecoder::new(stream.as_slice());
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded)?;
        assert_eq!(decoded, data);
        Ok(())
    }

    #[test]
    fn test_malformed_block_keeps_prefix() -> Result<()> {
        let data = random_bytes(5 * BLOCK_PAYLOAD_SIZE, 13);
        let mut stream = compress(&data, 8)?;
        let offsets = block_offsets(&stream)?;
        stream[offsets[3]] = b'X';

        let mut reader = BgzfReaderBuilder::default()
            .buffer_size(1 << 20)
            .build(stream.as_slice())?;
        let mut decoded = Vec::new();
        let err = loop {
            match reader.read(10_000) {
                Ok(chunk) => {
                    assert!(!chunk.is_empty());
                    decoded.extend_from_slice(chunk);
                }
                Err(err) => break err,
            }
        };
        assert!(err.is_malformed());
        assert_eq!(decoded, data[..3 * BLOCK_PAYLOAD_SIZE]);
        assert!(reader.read(1).unwrap_err().is_malformed());

        // Through `std::io::Read` the error shows up as invalid data
        let mut reader = BgzfReaderBuilder::default().build(stream.as_slice())?;
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        Ok(())
    }

    #[test]
    fn test_recompress_with_io_copy() -> Result<()> {
        let data = random_bytes(4 * BLOCK_PAYLOAD_SIZE + 1, 14);
        let stream = compress(&data, 2)?;

        let mut reader = BgzfReaderBuilder::default()
            .buffer_size(2 * BLOCK_PAYLOAD_SIZE)
            .build_prefetch(io::Cursor::new(stream))?;
        let mut writer = BgzfWriterBuilder::default()
            .batch_size(3)
            .build_pipelined(Vec::new())?;
        io::copy(&mut reader, &mut writer)?;
        let restream = writer.into_inner()?;

        assert_eq!(decompress(&restream, 1 << 20)?, data);
        Ok(())
    }

    /// Codec finishing the chunks of every batch in reverse order
    struct ReversedCodec(BgzfCodec);
    impl BlockCodec for ReversedCodec {
        fn decode_blocks(&self, input: &[u8], dst: &mut [u8]) -> crate::Result<Inflated> {
            self.0.decode_blocks(input, dst)
        }

        fn encode_chunks(&self, payload: &[u8], dst: &mut [Vec<u8>]) -> crate::Result<Vec<usize>> {
            let chunks: Vec<&[u8]> = payload.chunks(BLOCK_PAYLOAD_SIZE).collect();
            assert!(chunks.len() <= dst.len());
            let remaining = Mutex::new(chunks.len());
            let turn = Condvar::new();

            std::thread::scope(|scope| {
                let handles: Vec<_> = chunks
                    .iter()
                    .zip(dst.iter_mut())
                    .enumerate()
                    .map(|(idx, (chunk, buffer))| {
                        let (remaining, turn) = (&remaining, &turn);
                        scope.spawn(move || {
                            let mut left = remaining.lock();
                            while *left != idx + 1 {
                                turn.wait(&mut left);
                            }
                            let size = self.0.encode_chunks(chunk, std::slice::from_mut(buffer));
                            *left -= 1;
                            turn.notify_all();
                            size.map(|sizes| sizes[0])
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().expect("encoder thread"))
                    .collect()
            })
        }
    }

    #[test]
    fn test_ordering_with_out_of_order_codec() -> Result<()> {
        // Every chunk is filled with its own index
        let n_chunks = 19;
        let mut data = Vec::with_capacity(n_chunks * BLOCK_PAYLOAD_SIZE);
        for idx in 0..n_chunks {
            data.extend_from_slice(&[idx as u8; BLOCK_PAYLOAD_SIZE]);
        }

        let codec = ReversedCodec(BgzfCodec::new(6, 2)?);
        let mut writer = BgzfWriterBuilder::default()
            .batch_size(5)
            .build_with_codec(Vec::new(), codec)?;
        writer.write(&data)?;
        let stream = writer.into_inner()?;

        let decoded = decompress(&stream, 1 << 22)?;
        for (idx, chunk) in decoded.chunks(BLOCK_PAYLOAD_SIZE).enumerate() {
            assert!(chunk.iter().all(|&b| b as usize == idx));
        }
        assert_eq!(decoded.len(), data.len());
        Ok(())
    }
}
