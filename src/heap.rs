//! Heap initialization and growth.

use crate::ptr_utils::{align_size_up, is_aligned_to, ALIGN, WORD_SIZE};
use crate::tag::{header_of, next_block, write_tags, Tag};
use crate::{OutOfMemory, Segalloc, Source, Span};

/// Padding word, prologue header and footer, epilogue header.
const SENTINEL_SIZE: usize = 4 * WORD_SIZE;

impl<S: Source> Segalloc<S> {
    /// Initialize the heap: request space for the sentinels and empty the free lists.
    ///
    /// Calling this again abandons the current heap and starts over on fresh memory
    /// from the source; outstanding allocations must not be used afterwards.
    /// On failure, the allocator is left as it was.
    pub fn init(&mut self) -> Result<(), OutOfMemory> {
        let base = match self.source.grow(SENTINEL_SIZE) {
            Ok(base) => base.as_ptr(),
            Err(err) => {
                log::warn!("heap initialization failed: {}", err);
                return Err(err);
            }
        };

        debug_assert!(is_aligned_to(base, ALIGN), "heap source returned misaligned memory");

        // SAFETY: the source granted SENTINEL_SIZE bytes at base
        unsafe {
            // alignment padding
            base.cast::<usize>().write(0);

            let prologue = base.add(2 * WORD_SIZE);
            write_tags(prologue, ALIGN, true);
            Tag::write(header_of(next_block(prologue, ALIGN)), Tag::EPILOGUE);

            self.heap_base = prologue;
            self.heap_acme = base.add(SENTINEL_SIZE);
        }

        self.lists.clear();

        #[cfg(feature = "counters")]
        {
            self.counters.account_reset();
            self.counters.account_heap_growth(SENTINEL_SIZE);
        }

        log::debug!("initialized heap at {}", self.heap_span());

        Ok(())
    }

    /// Returns whether [`init`](Segalloc::init) has succeeded.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.heap_base.is_null()
    }

    /// Returns the [`Span`] of memory obtained from the source for the
    /// current heap, or an empty span if uninitialized.
    pub fn heap_span(&self) -> Span {
        if self.is_initialized() {
            Span::new(self.heap_base.wrapping_sub(2 * WORD_SIZE), self.heap_acme)
        } else {
            Span::empty()
        }
    }

    /// Extends the heap by at least `min_size` bytes, turning the new memory
    /// into a free block merged with the free block below, if any.
    ///
    /// Returns `(block, size)` of the resulting block, which is not registered.
    ///
    /// # Safety
    /// The heap must be initialized.
    pub(crate) unsafe fn grow_heap(&mut self, min_size: usize) -> Result<(*mut u8, usize), OutOfMemory> {
        debug_assert!(self.is_initialized());

        // an even number of words keeps blocks aligned
        let size = align_size_up(min_size).ok_or(OutOfMemory)?;

        let block = match self.source.grow(size) {
            Ok(region) => region.as_ptr(),
            Err(err) => {
                log::warn!("heap growth by {} bytes failed: {}", size, err);
                return Err(err);
            }
        };

        debug_assert!(block == self.heap_acme, "heap source returned discontiguous memory");

        // the old epilogue header becomes the new block's header
        write_tags(block, size, false);
        let acme = next_block(block, size);
        Tag::write(header_of(acme), Tag::EPILOGUE);
        self.heap_acme = acme;

        #[cfg(feature = "counters")]
        self.counters.account_heap_growth(size);

        log::debug!("grew heap by {} bytes to {}", size, self.heap_span());

        Ok(self.coalesce(block, size))
    }
}
