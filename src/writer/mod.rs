//! # BGZF Writers
//!
//! Uncompressed input is accumulated until it covers a whole batch of blocks, and
//! each batch is compressed in parallel and written in input order. Closing a writer
//! compresses what is left (ending with a partial block if needed) and appends the
//! end-of-stream marker.
//!
//! * [`BgzfWriter`] compresses and writes on the calling thread.
//! * [`PipelinedWriter`] hands batches to a background thread under a bounded queue.
//! * [`Deflater`] is the batch encoder both are built on.

mod batched;
mod builder;
mod deflater;
mod pipelined;

pub use batched::BgzfWriter;
pub use builder::BgzfWriterBuilder;
pub use deflater::{Deflater, MAX_BATCH_SIZE};
pub use pipelined::{PipelineStats, PipelinedWriter};

use crate::block::BLOCK_PAYLOAD_SIZE;

/// Size of the next batch to cut from `pending` accumulated bytes, if any
///
/// Only whole batches of `batch_size` blocks are cut, unless `finalize` is set, in
/// which case the remainder goes out as a last (possibly short) batch.
fn next_batch(pending: usize, batch_size: usize, finalize: bool) -> Option<usize> {
    let full = batch_size * BLOCK_PAYLOAD_SIZE;
    if pending >= full {
        Some(full)
    } else if finalize && pending > 0 {
        Some(pending)
    } else {
        None
    }
}
