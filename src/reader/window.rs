//! Bookkeeping of decoded data inside a fixed-capacity buffer
//!
//! The buffer is never resized and its contents are never moved. Decoded data lives
//! in a short FIFO of windows (oldest first), followed by the regions currently
//! handed out to decode calls. Together these occupy the buffer in a single sweep
//! from low to high offsets that may restart at offset zero once, so free space is
//! always either the tail after the newest region or the gap in front of the oldest.

use std::collections::VecDeque;
use std::ops::Range;

use log::debug;

use crate::block::MAX_INFLATED_BLOCK_SIZE;
use crate::error::{BufferError, Result};

/// Upper bound on windows plus outstanding regions
pub(crate) const MAX_SPANS: usize = 16;

/// A contiguous span `[start, end)` of the decode buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Window {
    pub start: usize,
    pub end: usize,
}
impl Window {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

#[derive(Debug)]
pub(crate) struct Windows {
    capacity: usize,

    /// Decoded, unread data in production order (never empty)
    spans: VecDeque<Window>,

    /// Regions handed to decode calls that have not completed, in grant order
    reserved: VecDeque<Window>,

    /// Sum of all span lengths
    available: usize,

    /// Free regions a decode call could not fit a single block into
    ///
    /// Cleared whenever data is consumed, since that changes the free space.
    stalled: Vec<Window>,
}
impl Windows {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            spans: VecDeque::with_capacity(MAX_SPANS),
            reserved: VecDeque::with_capacity(MAX_SPANS),
            available: 0,
            stalled: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Decoded bytes not yet consumed
    pub fn available(&self) -> usize {
        self.available
    }

    /// Regions currently handed out to decode calls
    pub fn reserved(&self) -> usize {
        self.reserved.len()
    }

    /// Range of the oldest window (empty if nothing is decoded)
    pub fn front(&self) -> Range<usize> {
        self.spans.front().map_or(0..0, Window::range)
    }

    /// Hands out the next free region for a decode call
    ///
    /// With `want`, the region is cut down to `want` bytes plus room for one more
    /// block, so that a single call cannot claim the whole free space.
    ///
    /// Returns `None` if no free region is left that has not already stalled.
    pub fn grant(&mut self, want: Option<usize>) -> Option<Window> {
        if self.spans.len() + self.reserved.len() >= MAX_SPANS {
            return None;
        }
        let first = self.spans.front().or(self.reserved.front()).copied();
        let last = self.reserved.back().or(self.spans.back()).copied();

        let candidates = match (first, last) {
            (Some(first), Some(last)) if last.start < first.start => {
                [Window::new(last.end, first.start), Window::new(0, 0)]
            }
            (Some(first), Some(last)) => [
                Window::new(last.end, self.capacity),
                Window::new(0, first.start),
            ],
            _ => [Window::new(0, self.capacity), Window::new(0, 0)],
        };
        let mut region = candidates
            .into_iter()
            .find(|region| region.len() > 0 && !self.stalled.contains(region))?;

        if region.start == 0 && last.is_some_and(|last| last.start > 0) {
            debug!(
                "Restarting decode at buffer start ({} bytes available)",
                self.available
            );
        }
        if let Some(want) = want {
            let limit = want.saturating_add(MAX_INFLATED_BLOCK_SIZE);
            region.end = region.end.min(region.start.saturating_add(limit));
        }
        self.reserved.push_back(region);
        self.check();
        Some(region)
    }

    /// Records the outcome of the decode call holding `region`
    ///
    /// Regions must be completed in the order they were granted. `stalled` reports
    /// that not even one block fit into the region.
    pub fn complete(&mut self, region: Window, produced: usize, stalled: bool) -> Result<()> {
        let granted = self.reserved.pop_front();
        debug_assert_eq!(granted, Some(region));
        debug_assert!(produced <= region.len());

        if produced > 0 {
            let end = region.start + produced;
            match self.spans.back_mut() {
                Some(newest) if newest.end == region.start => newest.end = end,
                _ => self.spans.push_back(Window::new(region.start, end)),
            }
            self.available += produced;
        } else if stalled {
            if region.len() == self.capacity {
                return Err(BufferError::InsufficientCapacity {
                    capacity: self.capacity,
                }
                .into());
            }
            debug!(
                "No room for the next block in [{}, {})",
                region.start, region.end
            );
            self.stalled.push(region);
        }
        self.check();
        Ok(())
    }

    /// Consumes `size` bytes from the front of the oldest window
    ///
    /// `size` must not exceed the length of that window.
    pub fn consume(&mut self, size: usize) -> Range<usize> {
        let Some(oldest) = self.spans.front_mut() else {
            return 0..0;
        };
        let size = size.min(oldest.len());
        let range = oldest.start..oldest.start + size;
        oldest.start += size;
        if oldest.len() == 0 {
            self.spans.pop_front();
        }
        self.available -= size;
        if size > 0 {
            self.stalled.clear();
        }
        self.check();
        range
    }

    fn check(&self) {
        assert!(self.available <= self.capacity);
        assert!(self.spans.len() + self.reserved.len() <= MAX_SPANS);
        debug_assert_eq!(
            self.spans.iter().map(Window::len).sum::<usize>(),
            self.available
        );
        debug_assert!(self
            .spans
            .iter()
            .chain(&self.reserved)
            .all(|w| w.start <= w.end && w.end <= self.capacity));
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_first_grant_is_whole_buffer() {
        let mut windows = Windows::new(1000);
        assert_eq!(windows.grant(None), Some(Window::new(0, 1000)));
        assert_eq!(windows.reserved(), 1);
    }

    #[test]
    fn test_complete_extends_newest_window() -> Result<()> {
        let mut windows = Windows::new(1000);
        let region = windows.grant(None).expect("free space");
        windows.complete(region, 100, false)?;

        let region = windows.grant(None).expect("free space");
        assert_eq!(region, Window::new(100, 1000));
        windows.complete(region, 50, false)?;

        assert_eq!(windows.available(), 150);
        assert_eq!(windows.front(), 0..150);
        Ok(())
    }

    #[test]
    fn test_stall_moves_to_buffer_start() -> Result<()> {
        let mut windows = Windows::new(1000);
        let region = windows.grant(None).expect("free space");
        windows.complete(region, 900, false)?;
        assert_eq!(windows.consume(500), 0..500);

        // The tail cannot hold a block
        let tail = windows.grant(None).expect("free space");
        assert_eq!(tail, Window::new(900, 1000));
        windows.complete(tail, 0, true)?;

        let head = windows.grant(None).expect("free space");
        assert_eq!(head, Window::new(0, 500));
        windows.complete(head, 300, false)?;

        // Oldest window first, then the restarted one
        assert_eq!(windows.consume(1000), 500..900);
        assert_eq!(windows.consume(1000), 0..300);
        assert_eq!(windows.available(), 0);
        Ok(())
    }

    #[test]
    fn test_stalled_regions_are_skipped() -> Result<()> {
        let mut windows = Windows::new(1000);
        let region = windows.grant(None).expect("free space");
        windows.complete(region, 1000, false)?;
        windows.consume(100);

        let head = windows.grant(None).expect("free space");
        assert_eq!(head, Window::new(0, 100));
        windows.complete(head, 0, true)?;
        assert_eq!(windows.grant(None), None);

        // Consuming frees space, so the head is worth another try
        windows.consume(100);
        assert_eq!(windows.grant(None), Some(Window::new(0, 200)));
        Ok(())
    }

    #[test]
    fn test_whole_buffer_stall_is_an_error() {
        let mut windows = Windows::new(1000);
        let region = windows.grant(None).expect("free space");
        let err = windows.complete(region, 0, true).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::BufferError(BufferError::InsufficientCapacity { capacity: 1000 })
        ));
    }

    #[test]
    fn test_wanted_grants_are_bounded() -> Result<()> {
        let capacity = 4 * MAX_INFLATED_BLOCK_SIZE;
        let mut windows = Windows::new(capacity);
        let first = windows.grant(Some(10)).expect("free space");
        assert_eq!(first, Window::new(0, 10 + MAX_INFLATED_BLOCK_SIZE));

        let second = windows.grant(Some(capacity)).expect("free space");
        assert_eq!(second, Window::new(first.end, capacity));
        assert_eq!(windows.grant(Some(1)), None);

        // The first region comes back short, leaving a gap before the second
        windows.complete(first, 5, false)?;
        windows.complete(second, 100, false)?;
        assert_eq!(windows.consume(usize::MAX), 0..5);
        assert_eq!(windows.consume(usize::MAX), first.end..first.end + 100);
        Ok(())
    }

    #[test]
    fn test_span_limit() -> Result<()> {
        let mut windows = Windows::new(1 << 20);
        for _ in 0..MAX_SPANS {
            assert!(windows.grant(Some(1)).is_some());
        }
        assert_eq!(windows.grant(Some(1)), None);
        while windows.reserved() > 0 {
            let region = windows.reserved.front().copied().expect("reserved region");
            windows.complete(region, 1, false)?;
        }
        assert_eq!(windows.available(), MAX_SPANS);
        Ok(())
    }

    #[test]
    fn test_random_operations_keep_invariants() -> Result<()> {
        let capacity = 10_000;
        let mut rng = SmallRng::seed_from_u64(42);
        let mut windows = Windows::new(capacity);
        let mut produced_total = 0;
        let mut consumed_total = 0;

        for _ in 0..10_000 {
            if rng.random_bool(0.5) {
                if let Some(region) = windows.grant(None) {
                    let produced = rng.random_range(0..=region.len().min(3000));
                    let stalled = produced == 0 && region.len() < capacity;
                    windows.complete(region, produced, stalled)?;
                    produced_total += produced;
                }
            } else {
                let range = windows.consume(rng.random_range(1..2000));
                assert!(range.end <= capacity);
                consumed_total += range.len();
            }
            assert!(windows.available() <= capacity);
            assert_eq!(windows.available(), produced_total - consumed_total);
            let front = windows.front();
            assert!(front.start <= front.end);
        }
        Ok(())
    }
}
