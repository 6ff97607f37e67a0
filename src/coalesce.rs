//! Merging free blocks with their free neighbors.
//!
//! The prologue footer and the epilogue header are always allocated,
//! so both neighbors of any block are always readable.

use crate::tag::{header, next_block, prev_block, prev_footer_of, write_tags, Tag};
use crate::{Segalloc, Source};

impl<S: Source> Segalloc<S> {
    /// Merges the unlisted free block at `block` with its free neighbors,
    /// deregistering them.
    ///
    /// Returns `(block, size)` of the merged block, which is not registered.
    ///
    /// # Safety
    /// `block` must be the payload pointer of an unlisted `size`-byte block in the heap.
    pub(crate) unsafe fn coalesce(&mut self, block: *mut u8, size: usize) -> (*mut u8, usize) {
        let below = Tag::read(prev_footer_of(block));
        let above_ptr = next_block(block, size);
        let above = header(above_ptr);

        match (below.is_allocated(), above.is_allocated()) {
            (true, true) => (block, size),

            (true, false) => {
                self.deregister(above_ptr, above.size());

                let size = size + above.size();
                write_tags(block, size, false);
                (block, size)
            }

            (false, true) => {
                let below_ptr = prev_block(block, below.size());
                self.deregister(below_ptr, below.size());

                let size = size + below.size();
                write_tags(below_ptr, size, false);
                (below_ptr, size)
            }

            (false, false) => {
                let below_ptr = prev_block(block, below.size());
                self.deregister(below_ptr, below.size());
                self.deregister(above_ptr, above.size());

                let size = size + below.size() + above.size();
                write_tags(below_ptr, size, false);
                (below_ptr, size)
            }
        }
    }

    /// Returns the size `coalesce` would produce for `block`, without modifying anything.
    ///
    /// # Safety
    /// `block` must be the payload pointer of a `size`-byte block in the heap.
    pub(crate) unsafe fn coalesced_size(&self, block: *mut u8, size: usize) -> usize {
        let below = Tag::read(prev_footer_of(block));
        let above = header(next_block(block, size));

        let mut merged = size;
        if !below.is_allocated() {
            merged += below.size();
        }
        if !above.is_allocated() {
            merged += above.size();
        }
        merged
    }
}
