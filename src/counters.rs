//! Track allocation counters for Segalloc.

use crate::{Segalloc, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Counters {
    /// Number of active allocations.
    pub allocation_count: usize,
    /// Total number of allocations.
    pub total_allocation_count: u64,

    /// Sum of active allocations' block sizes, boundary tags included.
    pub allocated_bytes: usize,
    /// Sum of all allocations' maximum block size.
    ///
    /// In-place resizes' unchanged bytes are not recounted.
    pub total_allocated_bytes: u64,

    /// Number of bytes in free blocks.
    pub available_bytes: usize,
    /// Number of free blocks.
    pub fragment_count: usize,

    /// Size of the heap, sentinels included.
    pub heap_bytes: usize,
    /// Number of times the heap was grown after initialization.
    pub grow_count: u64,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            allocation_count: 0,
            total_allocation_count: 0,
            allocated_bytes: 0,
            total_allocated_bytes: 0,
            available_bytes: 0,
            fragment_count: 0,
            heap_bytes: 0,
            grow_count: 0,
        }
    }

    /// Returns the number of bytes in neither free nor allocated blocks.
    pub const fn overhead_bytes(&self) -> usize {
        self.heap_bytes - self.available_bytes - self.allocated_bytes
    }

    /// Returns the total number of allocated bytes freed.
    pub const fn total_freed_bytes(&self) -> u64 {
        self.total_allocated_bytes - self.allocated_bytes as u64
    }

    pub(crate) fn account_register_gap(&mut self, size: usize) {
        self.available_bytes += size;
        self.fragment_count += 1;
    }
    pub(crate) fn account_deregister_gap(&mut self, size: usize) {
        self.available_bytes -= size;
        self.fragment_count -= 1;
    }

    pub(crate) fn account_alloc(&mut self, alloc_size: usize) {
        self.allocation_count += 1;
        self.allocated_bytes += alloc_size;

        self.total_allocation_count += 1;
        self.total_allocated_bytes += alloc_size as u64;
    }

    pub(crate) fn account_dealloc(&mut self, alloc_size: usize) {
        self.allocation_count -= 1;
        self.allocated_bytes -= alloc_size;
    }

    pub(crate) fn account_grow_in_place(&mut self, old_alloc_size: usize, new_alloc_size: usize) {
        self.allocated_bytes += new_alloc_size - old_alloc_size;
        self.total_allocated_bytes += (new_alloc_size - old_alloc_size) as u64;
    }

    pub(crate) fn account_shrink_in_place(&mut self, old_alloc_size: usize, new_alloc_size: usize) {
        self.allocated_bytes -= old_alloc_size - new_alloc_size;
        self.total_allocated_bytes -= (old_alloc_size - new_alloc_size) as u64;
    }

    pub(crate) fn account_heap_growth(&mut self, size: usize) {
        if self.heap_bytes != 0 {
            self.grow_count += 1;
        }

        self.heap_bytes += size;
    }

    /// A new heap was started; current figures restart while totals carry over.
    pub(crate) fn account_reset(&mut self) {
        self.allocation_count = 0;
        self.allocated_bytes = 0;
        self.available_bytes = 0;
        self.fragment_count = 0;
        self.heap_bytes = 0;
    }
}

impl core::fmt::Display for Counters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            r#"Stat                 | Current Total       | Accumulative Total
---------------------|---------------------|--------------------
# of Allocations     | {:>19} | {:>19}
# of Allocated Bytes | {:>19} | {:>19}
# of Available Bytes | {:>19} |                 N/A
# of Overhead Bytes  | {:>19} |                 N/A
# of Heap Bytes      | {:>19} |                 N/A
# of Heap Growths    |                 N/A | {:>19}
# of Fragments       | {:>19} |                 N/A"#,
            self.allocation_count,
            self.total_allocation_count,
            self.allocated_bytes,
            self.total_allocated_bytes,
            self.available_bytes,
            self.overhead_bytes(),
            self.heap_bytes,
            self.grow_count,
            self.fragment_count,
        )
    }
}

impl<S: Source> Segalloc<S> {
    /// Obtain a reference to the internal allocation statistics.
    ///
    /// Avoid holding onto the reference as this will block allocations
    /// (as you're effectively holding the lock on the allocator,
    /// or preventing a mutable reference being created to the allocator).
    /// Reading immediately or cloning the struct is recommended.
    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use crate::ptr_utils::WORD_SIZE;
    use crate::*;

    #[test]
    fn test_alloc_resize_free() {
        let mut mem = vec![0u128; 4096];
        let mut segalloc = Segalloc::new(unsafe { Arena::new(Span::from(&mut mem[..])) });
        segalloc.init().unwrap();

        let sentinels = 4 * WORD_SIZE;

        assert_eq!(segalloc.counters().heap_bytes, sentinels);
        assert_eq!(segalloc.counters().overhead_bytes(), sentinels);
        assert_eq!(segalloc.counters().available_bytes, 0);
        assert_eq!(segalloc.counters().fragment_count, 0);
        assert_eq!(segalloc.counters().grow_count, 0);

        let a = segalloc.allocate(10).unwrap();

        // the first chunk is handed out whole
        assert_eq!(segalloc.counters().allocation_count, 1);
        assert_eq!(segalloc.counters().allocated_bytes, DEFAULT_CHUNK_SIZE);
        assert_eq!(segalloc.counters().fragment_count, 0);
        assert_eq!(segalloc.counters().grow_count, 1);
        assert_eq!(segalloc.counters().heap_bytes, sentinels + DEFAULT_CHUNK_SIZE);
        assert_eq!(segalloc.counters().available_bytes, 0);
        assert_eq!(segalloc.counters().overhead_bytes(), sentinels);

        let a = unsafe { segalloc.resize(a.as_ptr(), 60) }.unwrap();
        let shrunk = unsafe { segalloc.block_size(a) };

        assert_eq!(shrunk, required_block_size(60).unwrap());
        assert_eq!(segalloc.counters().allocation_count, 1);
        assert_eq!(segalloc.counters().total_allocation_count, 1);
        assert_eq!(segalloc.counters().allocated_bytes, shrunk);
        assert_eq!(segalloc.counters().available_bytes, DEFAULT_CHUNK_SIZE - shrunk);
        assert_eq!(segalloc.counters().overhead_bytes(), sentinels);

        let a = unsafe { segalloc.resize(a.as_ptr(), 1) }.unwrap();

        assert_eq!(segalloc.counters().allocated_bytes, MIN_BLOCK_SIZE);
        assert_eq!(segalloc.counters().fragment_count, 1);

        unsafe { segalloc.release(a.as_ptr()) };

        assert_eq!(segalloc.counters().allocation_count, 0);
        assert_eq!(segalloc.counters().allocated_bytes, 0);
        assert_eq!(segalloc.counters().fragment_count, 1);
        assert_eq!(segalloc.counters().available_bytes, DEFAULT_CHUNK_SIZE);
        assert_eq!(segalloc.counters().total_freed_bytes(), segalloc.counters().total_allocated_bytes);
        assert_eq!(segalloc.counters().overhead_bytes(), sentinels);
    }

    #[test]
    fn test_reinit_keeps_totals() {
        let mut mem = vec![0u128; 4096];
        let mut segalloc = Segalloc::new(unsafe { Arena::new(Span::from(&mut mem[..])) });
        segalloc.init().unwrap();

        segalloc.allocate(100).unwrap();
        segalloc.allocate(200).unwrap();

        segalloc.init().unwrap();

        assert_eq!(segalloc.counters().allocation_count, 0);
        assert_eq!(segalloc.counters().allocated_bytes, 0);
        assert_eq!(segalloc.counters().available_bytes, 0);
        assert_eq!(segalloc.counters().heap_bytes, 4 * WORD_SIZE);
        assert_eq!(segalloc.counters().total_allocation_count, 2);

        let table = segalloc.counters().to_string();
        assert!(table.contains("# of Allocations"));
    }
}
