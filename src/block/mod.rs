//! # BGZF Blocks
//!
//! A BGZF stream is a series of independent gzip members ("blocks"), each holding at
//! most 64 KiB of inflated data and announcing its own compressed size in a `BC`
//! extra subfield. Because every block can be inflated on its own, whole runs of
//! blocks can be decoded or encoded in parallel.
//!
//! ```text
//! ┌──────────────────────┐
//! │ gzip header + BC     │ 18 bytes (BSIZE = total block size - 1)
//! ├──────────────────────┤
//! │ raw DEFLATE payload  │ variable
//! ├──────────────────────┤
//! │ CRC32 + ISIZE        │ 8 bytes
//! └──────────────────────┘
//! ```
//!
//! A compliant stream ends with [`EOF_MARKER`], an empty block.

mod codec;
mod header;

pub use codec::{BgzfCodec, BlockCodec, Inflated};
pub use header::{BlockFooter, BlockHeader};

/// Maximum number of uncompressed bytes placed into a single block by the encoder
///
/// This matches htslib so that incompressible chunks still fit into a 64 KiB block.
pub const BLOCK_PAYLOAD_SIZE: usize = 0xff00;

/// Size of the gzip header written in front of every block (with the `BC` subfield)
pub const BLOCK_HEADER_SIZE: usize = 18;

/// Size of the CRC32 + ISIZE trailer of every block
pub const BLOCK_FOOTER_SIZE: usize = 8;

/// Fixed framing overhead of a block
pub const BLOCK_METADATA_SIZE: usize = BLOCK_HEADER_SIZE + BLOCK_FOOTER_SIZE;

/// Largest total (compressed) size a block may have on the wire
pub const MAX_BLOCK_SIZE: usize = 1 << 16;

/// Largest number of bytes a single block may inflate to
pub const MAX_INFLATED_BLOCK_SIZE: usize = 1 << 16;

/// Extra room in every encode buffer for chunks that grow when deflated
pub const DEFLATE_PADDING: usize = 1024;

/// Compression level used unless configured otherwise
pub const DEFAULT_LEVEL: u32 = 6;

/// Size of each scratch buffer handed to [`BlockCodec::encode_chunks`]
pub const ENCODE_BUFFER_SIZE: usize = BLOCK_PAYLOAD_SIZE + BLOCK_METADATA_SIZE + DEFLATE_PADDING;

/// The empty block terminating every BGZF stream
pub const EOF_MARKER: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];
