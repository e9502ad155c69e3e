use std::ptr::NonNull;

/// Fixed-size byte buffer shared between the prefetch coordinator and its worker
///
/// The buffer hands out raw subslices. Callers are responsible for never creating
/// overlapping slices where one of them is mutable; the window bookkeeping does this
/// by granting every decode region to exactly one task.
pub(crate) struct SharedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the buffer owns its allocation and only hands out disjoint slices
unsafe impl Send for SharedBuffer {}
// SAFETY: see above; access to each byte is serialized by the window bookkeeping
unsafe impl Sync for SharedBuffer {}

impl SharedBuffer {
    pub fn new(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let ptr = NonNull::from(Box::leak(boxed)).cast::<u8>();
        Self { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Borrows `range` immutably
    ///
    /// # Safety
    ///
    /// No mutable slice overlapping `range` may be alive for the lifetime of the
    /// returned slice.
    pub unsafe fn slice(&self, range: std::ops::Range<usize>) -> &[u8] {
        assert!(range.start <= range.end && range.end <= self.len);
        // SAFETY: in bounds per the assertion, aliasing upheld by the caller
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(range.start), range.len()) }
    }

    /// Borrows `range` mutably
    ///
    /// # Safety
    ///
    /// No other slice overlapping `range` may be alive for the lifetime of the
    /// returned slice.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, range: std::ops::Range<usize>) -> &mut [u8] {
        assert!(range.start <= range.end && range.end <= self.len);
        // SAFETY: in bounds per the assertion, exclusivity upheld by the caller
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(range.start), range.len())
        }
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        // SAFETY: the pointer came from `Box::leak` of a slice of exactly `len` bytes
        drop(unsafe { Box::from_raw(slice) });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_disjoint_writers() {
        let buffer = Arc::new(SharedBuffer::new(1000));
        let handles: Vec<_> = (0..4u8)
            .map(|idx| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    let start = idx as usize * 250;
                    // SAFETY: every thread writes its own quarter
                    let region = unsafe { buffer.slice_mut(start..start + 250) };
                    region.fill(idx);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        // SAFETY: all writers have been joined
        let data = unsafe { buffer.slice(0..buffer.len()) };
        for (idx, quarter) in data.chunks(250).enumerate() {
            assert!(quarter.iter().all(|&b| b as usize == idx));
        }
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = SharedBuffer::new(0);
        // SAFETY: nothing else borrows the buffer
        assert!(unsafe { buffer.slice(0..0) }.is_empty());
    }
}
