//! # BGZF Readers
//!
//! Decoding happens into a single buffer allocated up front. Reads hand out slices
//! of that buffer directly; a slice stays valid until the next call on the reader,
//! which the borrow checker enforces by tying it to `&mut self`.
//!
//! * [`BgzfReader`] decodes on the calling thread, on demand.
//! * [`PrefetchReader`] decodes on a background thread ahead of demand.
//!
//! Both implement [`std::io::Read`] and [`std::io::BufRead`] and are created with
//! [`BgzfReaderBuilder`].

mod bgzf;
mod buffer;
mod builder;
mod prefetch;
mod producer;
mod window;

use std::io;

pub use bgzf::BgzfReader;
pub use builder::BgzfReaderBuilder;
pub use prefetch::PrefetchReader;

use crate::error::{Error, Result};

/// Decoded data exposed one window at a time
///
/// Shared by both readers to implement the `std::io` traits.
trait DecodedBytes {
    /// Decodes until at least `size` bytes are available, if possible
    ///
    /// Returns the length of the oldest window (0 at the end of the stream or when
    /// a failure is waiting to be raised). Stored failures are not raised here.
    fn fill_front(&mut self, size: usize) -> Result<usize>;

    /// Raises the stored failure, if any
    fn take_failure(&mut self) -> Option<Error>;

    /// The oldest window
    fn front(&self) -> &[u8];

    /// Consumes `size` bytes of the oldest window
    fn advance(&mut self, size: usize);
}

/// Copies into `buf` until it is full or the stream ends
fn read_into<D: DecodedBytes>(reader: &mut D, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let ready = match reader.fill_front(buf.len() - total) {
            Ok(ready) => ready,
            Err(err) if total == 0 => return Err(err.into()),
            Err(_) => break,
        };
        if ready == 0 {
            if total == 0 {
                if let Some(err) = reader.take_failure() {
                    return Err(err.into());
                }
            }
            break;
        }
        let size = ready.min(buf.len() - total);
        buf[total..total + size].copy_from_slice(&reader.front()[..size]);
        reader.advance(size);
        total += size;
    }
    Ok(total)
}

fn fill_buf<D: DecodedBytes>(reader: &mut D) -> io::Result<&[u8]> {
    if reader.fill_front(1)? == 0 {
        if let Some(err) = reader.take_failure() {
            return Err(err.into());
        }
    }
    Ok(reader.front())
}
