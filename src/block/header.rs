//! # Block Header and Footer Definitions
//!
//! Every BGZF block is a gzip member whose header carries an extra field with a
//! `BC` subfield. The subfield stores `BSIZE`, the total size of the block minus one,
//! which is what lets a reader find block boundaries without inflating anything.
//!
//! The footer is the standard gzip trailer: CRC32 of the inflated data followed by
//! the inflated size (`ISIZE`).

use byteorder::{ByteOrder, LittleEndian};

use super::{BLOCK_FOOTER_SIZE, BLOCK_HEADER_SIZE};
use crate::error::{FormatError, Result};

/// gzip ID1, ID2 and the DEFLATE compression method
const MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// FLG bit announcing an extra field
const FLAG_EXTRA: u8 = 0x04;

/// Subfield identifier of the block size ("BC")
const SUBFIELD_ID: [u8; 2] = *b"BC";

/// Length of the `BC` subfield payload
const SUBFIELD_LEN: u16 = 2;

/// Operating system byte written into new headers (unknown)
const OS_UNKNOWN: u8 = 0xff;

/// Bytes of the gzip header up to and including XLEN
const SIZE_FIXED_HEADER: usize = 12;

/// Size of a subfield descriptor (SI1, SI2, SLEN)
const SIZE_SUBFIELD: usize = 4;

/// Parsed header of a single block
///
/// # Fields
///
/// * `xlen` - Length of the gzip extra field (6 for blocks written by this crate)
/// * `bsize` - Total block size minus one, as stored in the `BC` subfield
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub xlen: u16,
    pub bsize: u16,
}
impl BlockHeader {
    /// Creates the header of a block with the given total on-wire size
    ///
    /// The size must lie within `BLOCK_METADATA_SIZE..=MAX_BLOCK_SIZE`.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        debug_assert!((1..=super::MAX_BLOCK_SIZE).contains(&block_size));
        Self {
            xlen: (SIZE_SUBFIELD + SUBFIELD_LEN as usize) as u16,
            bsize: (block_size - 1) as u16,
        }
    }

    /// Number of bytes occupied by the header, extra field included
    #[must_use]
    pub fn header_size(&self) -> usize {
        SIZE_FIXED_HEADER + self.xlen as usize
    }

    /// Total size of the block on the wire
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.bsize as usize + 1
    }

    /// Parses a header from the start of `buffer`
    ///
    /// Returns `Ok(None)` if `buffer` ends before the header does, so that the
    /// caller can pull more input and retry.
    ///
    /// # Errors
    ///
    /// * `FormatError::InvalidMagic` - If the buffer does not start a gzip member
    /// * `FormatError::UnsupportedFlags` - If the member has no extra field
    /// * `FormatError::MissingBlockSize` - If the extra field has no `BC` subfield
    /// * `FormatError::InvalidBlockSize` - If `BSIZE` cannot cover header and footer
    pub fn from_bytes(buffer: &[u8]) -> Result<Option<Self>> {
        if buffer.len() < SIZE_FIXED_HEADER {
            return Ok(None);
        }
        if buffer[0..3] != MAGIC {
            return Err(FormatError::InvalidMagic([buffer[0], buffer[1], buffer[2]]).into());
        }
        let flags = buffer[3];
        if flags & FLAG_EXTRA == 0 {
            return Err(FormatError::UnsupportedFlags(flags).into());
        }
        let xlen = LittleEndian::read_u16(&buffer[10..12]);
        let extra_end = SIZE_FIXED_HEADER + xlen as usize;
        if buffer.len() < extra_end {
            return Ok(None);
        }

        let mut bsize = None;
        let mut pos = SIZE_FIXED_HEADER;
        while pos + SIZE_SUBFIELD <= extra_end {
            let slen = LittleEndian::read_u16(&buffer[pos + 2..pos + 4]) as usize;
            let data = pos + SIZE_SUBFIELD;
            if buffer[pos..pos + 2] == SUBFIELD_ID
                && slen == SUBFIELD_LEN as usize
                && data + slen <= extra_end
            {
                bsize = Some(LittleEndian::read_u16(&buffer[data..data + slen]));
                break;
            }
            pos = data + slen;
        }
        let Some(bsize) = bsize else {
            return Err(FormatError::MissingBlockSize.into());
        };

        let header = Self { xlen, bsize };
        if header.block_size() < header.header_size() + BLOCK_FOOTER_SIZE {
            return Err(FormatError::InvalidBlockSize(header.block_size()).into());
        }
        Ok(Some(header))
    }

    /// Writes the header into the first [`BLOCK_HEADER_SIZE`] bytes of `buffer`
    pub fn write_bytes(&self, buffer: &mut [u8]) {
        buffer[0..3].copy_from_slice(&MAGIC);
        buffer[3] = FLAG_EXTRA;
        buffer[4..8].fill(0); // MTIME
        buffer[8] = 0; // XFL
        buffer[9] = OS_UNKNOWN;
        LittleEndian::write_u16(&mut buffer[10..12], self.xlen);
        buffer[12..14].copy_from_slice(&SUBFIELD_ID);
        LittleEndian::write_u16(&mut buffer[14..16], SUBFIELD_LEN);
        LittleEndian::write_u16(&mut buffer[16..BLOCK_HEADER_SIZE], self.bsize);
    }
}

/// Trailer of a single block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockFooter {
    /// CRC32 of the inflated payload
    pub crc32: u32,
    /// Number of bytes the payload inflates to
    pub inflated_size: u32,
}
impl BlockFooter {
    #[must_use]
    pub fn new(crc32: u32, inflated_size: u32) -> Self {
        Self {
            crc32,
            inflated_size,
        }
    }

    /// Parses the footer from the first [`BLOCK_FOOTER_SIZE`] bytes of `buffer`
    #[must_use]
    pub fn from_bytes(buffer: &[u8]) -> Self {
        Self {
            crc32: LittleEndian::read_u32(&buffer[0..4]),
            inflated_size: LittleEndian::read_u32(&buffer[4..8]),
        }
    }

    /// Writes the footer into the first [`BLOCK_FOOTER_SIZE`] bytes of `buffer`
    pub fn write_bytes(&self, buffer: &mut [u8]) {
        LittleEndian::write_u32(&mut buffer[0..4], self.crc32);
        LittleEndian::write_u32(&mut buffer[4..8], self.inflated_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_write_parse() -> Result<()> {
        let mut buffer = [0u8; BLOCK_HEADER_SIZE];
        BlockHeader::new(1234).write_bytes(&mut buffer);

        let header = BlockHeader::from_bytes(&buffer)?.expect("complete header");
        assert_eq!(header.block_size(), 1234);
        assert_eq!(header.header_size(), BLOCK_HEADER_SIZE);
        Ok(())
    }

    #[test]
    fn test_incomplete_header() -> Result<()> {
        let mut buffer = [0u8; BLOCK_HEADER_SIZE];
        BlockHeader::new(100).write_bytes(&mut buffer);

        assert!(BlockHeader::from_bytes(&buffer[..5])?.is_none());
        assert!(BlockHeader::from_bytes(&buffer[..BLOCK_HEADER_SIZE - 1])?.is_none());
        Ok(())
    }

    #[test]
    fn test_invalid_magic() {
        let buffer = [0u8; BLOCK_HEADER_SIZE];
        let err = BlockHeader::from_bytes(&buffer).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_plain_gzip_member_rejected() {
        // gzip header without FEXTRA
        let buffer = [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0, 0xff, 0, 0];
        assert!(matches!(
            BlockHeader::from_bytes(&buffer),
            Err(crate::Error::FormatError(FormatError::UnsupportedFlags(0)))
        ));
    }

    #[test]
    fn test_bc_after_foreign_subfield() -> Result<()> {
        // XLEN = 10: a 2-byte "AB" subfield followed by BC
        let mut buffer = vec![0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff, 10, 0];
        buffer.extend_from_slice(&[b'A', b'B', 0, 0]);
        buffer.extend_from_slice(&[b'B', b'C', 2, 0, 99, 0]);

        let header = BlockHeader::from_bytes(&buffer)?.expect("complete header");
        assert_eq!(header.header_size(), 22);
        assert_eq!(header.block_size(), 100);
        Ok(())
    }

    #[test]
    fn test_block_size_too_small() {
        let mut buffer = [0u8; BLOCK_HEADER_SIZE];
        BlockHeader::new(BLOCK_HEADER_SIZE).write_bytes(&mut buffer);
        assert!(matches!(
            BlockHeader::from_bytes(&buffer),
            Err(crate::Error::FormatError(FormatError::InvalidBlockSize(18)))
        ));
    }

    #[test]
    fn test_footer_write_parse() {
        let mut buffer = [0u8; BLOCK_FOOTER_SIZE];
        BlockFooter::new(0xdead_beef, 65280).write_bytes(&mut buffer);
        let footer = BlockFooter::from_bytes(&buffer);
        assert_eq!(footer.crc32, 0xdead_beef);
        assert_eq!(footer.inflated_size, 65280);
    }
}
