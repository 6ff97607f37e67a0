//! A boundary-tag allocator over a single growable heap.
//!
//! Free blocks are kept in [`CLASS_COUNT`] segregated free lists, searched first-fit
//! from the smallest fitting class up. Oversized fits are split, freed blocks are
//! coalesced with free neighbors immediately, and [`resize`](Segalloc::resize)
//! grows and shrinks in place where it can.
//!
//! The heap grows on demand through a [`Source`]:
//! ```rust
//! use segalloc::{Arena, Segalloc, Span};
//!
//! let mut mem = vec![0u128; 4096];
//! let mut segalloc = Segalloc::new(unsafe { Arena::new(Span::from(&mut mem[..])) });
//! segalloc.init().unwrap();
//!
//! let a = segalloc.allocate(24).unwrap();
//! let a = unsafe { segalloc.resize(a.as_ptr(), 100) }.unwrap();
//! unsafe { segalloc.release(a.as_ptr()) };
//!
//! assert!(segalloc.is_consistent());
//! ```
//!
//! `Segalloc` is not synchronized. Call [`lock`](Segalloc::lock) to get a
//! [`Segallock`] which implements [`GlobalAlloc`](core::alloc::GlobalAlloc)
//! and [`Allocator`](allocator_api2::alloc::Allocator).

#![cfg_attr(not(test), no_std)]

mod check;
mod class;
mod coalesce;
mod heap;
mod llist;
mod ptr_utils;
mod source;
mod span;
mod tag;

#[cfg(feature = "counters")]
mod counters;
#[cfg(feature = "lock_api")]
mod lock;

pub use check::{Corruption, HeapStats};
pub use class::{class_limit, class_of_size, CLASS_COUNT};
pub use ptr_utils::ALIGN;
pub use source::{Arena, OutOfMemory, Source};
pub use span::Span;

#[cfg(feature = "counters")]
pub use counters::Counters;
#[cfg(feature = "lock_api")]
pub use lock::Segallock;
#[cfg(all(feature = "sbrk", unix))]
pub use source::Sbrk;

use core::ptr::NonNull;

use check::scan_for_errors;
use class::class_of_size as class_of;
use llist::{FreeLists, FreeNode};
use ptr_utils::{align_size_up, WORD_SIZE};
use tag::{header, next_block, write_tags};

// Heap layout:
//   pad | prologue hdr | prologue ftr | blocks... | epilogue hdr
// Allocated block:
//   hdr: Tag | payload ... | ftr: Tag
// Free block (MIN_BLOCK_SIZE minimum):
//   hdr: Tag | NODE: FreeNode (2 * ptr) ... | ftr: Tag

/// Header plus footer.
pub const OVERHEAD: usize = 2 * WORD_SIZE;

/// Minimum block size: header, footer and the two free list links.
pub const MIN_BLOCK_SIZE: usize = OVERHEAD + core::mem::size_of::<FreeNode>();

/// The minimum amount the heap grows by when no free block fits.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 7;

/// Returns the block size that serves a request of `size` bytes.
///
/// Returns `None` if the size is unrepresentable.
#[inline]
pub const fn required_block_size(size: usize) -> Option<usize> {
    if size <= ALIGN {
        Some(MIN_BLOCK_SIZE)
    } else {
        match size.checked_add(OVERHEAD) {
            Some(size) => align_size_up(size),
            None => None,
        }
    }
}

/// The segregated-fit allocator.
///
/// Initialize with [`new`](Segalloc::new), then [`init`](Segalloc::init).
///
/// Call [`lock`](Segalloc::lock) to get a [`Segallock`] which supports the
/// [`GlobalAlloc`](core::alloc::GlobalAlloc) and [`Allocator`](allocator_api2::alloc::Allocator) traits.
pub struct Segalloc<S: Source> {
    pub source: S,

    /// Payload pointer of the prologue block, null until initialized.
    heap_base: *mut u8,
    /// The end of the heap, directly after the epilogue header.
    heap_acme: *mut u8,

    chunk_size: usize,

    lists: FreeLists,

    #[cfg(feature = "counters")]
    counters: counters::Counters,
}

unsafe impl<S: Source + Send> Send for Segalloc<S> {}

impl<S: Source> core::fmt::Debug for Segalloc<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Segalloc")
            .field("heap", &self.heap_span())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl<S: Source> Segalloc<S> {
    pub const fn new(source: S) -> Self {
        Self {
            source,
            heap_base: core::ptr::null_mut(),
            heap_acme: core::ptr::null_mut(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            lists: FreeLists::new(),
            #[cfg(feature = "counters")]
            counters: counters::Counters::new(),
        }
    }

    /// Set the minimum amount the heap grows by, rounded up to a valid block size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = match align_size_up(chunk_size) {
            Some(size) => size.max(MIN_BLOCK_SIZE),
            None => usize::MAX & !(ALIGN - 1),
        };
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Adds the free block at `block` to the free lists.
    ///
    /// # Safety
    /// `block` must be the payload pointer of a `size`-byte block that isn't
    /// allocated nor listed, and whose neighbors are not free.
    #[inline]
    unsafe fn register(&mut self, block: *mut u8, size: usize) {
        debug_assert!(size >= MIN_BLOCK_SIZE);

        write_tags(block, size, false);
        self.lists.insert(NonNull::new_unchecked(block.cast()), class_of(size));

        #[cfg(feature = "counters")]
        self.counters.account_register_gap(size);
    }

    /// Removes the free block at `block` from the free lists.
    ///
    /// # Safety
    /// `block` must be a listed free block of `size` bytes.
    #[inline]
    unsafe fn deregister(&mut self, block: *mut u8, size: usize) {
        debug_assert!(!header(block).is_allocated());
        debug_assert!(header(block).size() == size);

        self.lists.remove(NonNull::new_unchecked(block.cast()), class_of(size));

        #[cfg(feature = "counters")]
        self.counters.account_deregister_gap(size);
    }

    /// First-fit search from the class of `required` upward.
    /// The returned block is deregistered.
    ///
    /// Returns `(block, block_size)`.
    unsafe fn find_fit(&mut self, required: usize) -> Option<(*mut u8, usize)> {
        for class in class_of(required)..CLASS_COUNT {
            for node in self.lists.iter(class) {
                let block = node.as_ptr().cast::<u8>();
                let size = header(block).size();

                if size >= required {
                    self.deregister(block, size);
                    return Some((block, size));
                }
            }
        }

        None
    }

    /// Marks the unlisted free block at `block` allocated, splitting off
    /// and registering the tail if it's large enough to be a block.
    ///
    /// Returns the allocated size.
    unsafe fn place(&mut self, block: *mut u8, block_size: usize, required: usize) -> usize {
        debug_assert!(block_size >= required);

        let remainder = block_size - required;

        if remainder >= MIN_BLOCK_SIZE {
            write_tags(block, required, true);
            // the block above a free block is allocated, no need to coalesce
            self.register(next_block(block, required), remainder);
            required
        } else {
            write_tags(block, block_size, true);
            block_size
        }
    }

    /// Allocate a block with at least `size` bytes of payload.
    ///
    /// Returns `None` if `size` is zero, the allocator is uninitialized,
    /// or the heap source is out of memory.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        if !self.is_initialized() {
            log::warn!("allocate({}) on an uninitialized heap", size);
            return None;
        }

        let Some(required) = required_block_size(size) else {
            log::warn!("allocate({}): size overflows", size);
            return None;
        };

        // SAFETY: the heap is initialized, all listed blocks are valid
        let (block, allocated_size) = unsafe {
            match self.find_fit(required) {
                Some((block, block_size)) => (block, self.place(block, block_size, required)),
                None => match self.grow_heap(required.max(self.chunk_size)) {
                    // the grown block is handed out whole, unsplit
                    Ok((block, block_size)) => {
                        write_tags(block, block_size, true);
                        (block, block_size)
                    }
                    Err(OutOfMemory) => {
                        log::warn!("allocate({}): out of memory", size);
                        return None;
                    }
                },
            }
        };

        #[cfg(feature = "counters")]
        self.counters.account_alloc(allocated_size);

        log::trace!("allocate({}) -> {:p} [{}]", size, block, allocated_size);

        scan_for_errors(self);

        NonNull::new(block)
    }

    /// Free previously allocated/resized memory.
    ///
    /// Null is ignored.
    ///
    /// # Safety
    /// `ptr` must be null or have been returned by [`allocate`](Segalloc::allocate)
    /// or [`resize`](Segalloc::resize) on this allocator and not released since.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let tag = header(ptr);
        debug_assert!(tag.is_allocated());

        let size = tag.size();

        #[cfg(feature = "counters")]
        self.counters.account_dealloc(size);

        write_tags(ptr, size, false);
        let (block, size) = self.coalesce(ptr, size);
        self.register(block, size);

        log::trace!("release({:p}) [{}]", ptr, tag.size());

        scan_for_errors(self);
    }

    /// Resize previously allocated/resized memory to `size` bytes of payload.
    ///
    /// - A null `ptr` is equivalent to [`allocate`](Segalloc::allocate).
    /// - A zero `size` is equivalent to [`release`](Segalloc::release), returning `None`.
    /// - Shrinking always succeeds in place.
    /// - Growing absorbs free neighbors if that makes enough room, moving the
    ///   payload down if the block below was absorbed. Otherwise the payload is
    ///   copied into a new allocation.
    ///
    /// The payload is preserved up to the smaller of the old and new sizes.
    /// On failure `None` is returned and `ptr` remains valid and untouched.
    ///
    /// # Safety
    /// `ptr` must be null or have been returned by [`allocate`](Segalloc::allocate)
    /// or [`resize`](Segalloc::resize) on this allocator and not released since.
    pub unsafe fn resize(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            self.release(ptr);
            return None;
        }

        if ptr.is_null() {
            return self.allocate(size);
        }

        let tag = header(ptr);
        debug_assert!(tag.is_allocated());

        let old_size = tag.size();
        let required = required_block_size(size)?;

        let result = if required > old_size {
            self.grow_block(ptr, old_size, size, required)
        } else {
            self.shrink_block(ptr, old_size, required);
            NonNull::new(ptr)
        };

        log::trace!("resize({:p}, {}) -> {:?}", ptr, size, result);

        scan_for_errors(self);

        result
    }

    unsafe fn grow_block(
        &mut self,
        ptr: *mut u8,
        old_size: usize,
        size: usize,
        required: usize,
    ) -> Option<NonNull<u8>> {
        if self.coalesced_size(ptr, old_size) >= required {
            write_tags(ptr, old_size, false);
            let (block, merged_size) = self.coalesce(ptr, old_size);

            if block != ptr {
                // the block below was absorbed, slide the payload down
                core::ptr::copy(ptr, block, old_size - OVERHEAD);
            }

            write_tags(block, merged_size, true);

            #[cfg(feature = "counters")]
            self.counters.account_grow_in_place(old_size, merged_size);

            return NonNull::new(block);
        }

        // grow in-place failed; reallocate the slow way

        let allocation = self.allocate(size)?;
        allocation.as_ptr().copy_from_nonoverlapping(ptr, size.min(old_size - OVERHEAD));
        self.release(ptr);

        Some(allocation)
    }

    unsafe fn shrink_block(&mut self, ptr: *mut u8, old_size: usize, required: usize) {
        let remainder = old_size - required;

        if remainder < MIN_BLOCK_SIZE {
            return;
        }

        write_tags(ptr, required, true);

        let rest = next_block(ptr, required);
        write_tags(rest, remainder, false);
        // the block above may be free
        let (rest, rest_size) = self.coalesce(rest, remainder);
        self.register(rest, rest_size);

        #[cfg(feature = "counters")]
        self.counters.account_shrink_in_place(old_size, required);
    }

    /// Returns the size of the block backing an allocation, overhead included.
    ///
    /// # Safety
    /// `ptr` must be a live allocation of this allocator.
    pub unsafe fn block_size(&self, ptr: NonNull<u8>) -> usize {
        header(ptr.as_ptr()).size()
    }

    /// Returns how many payload bytes an allocation may actually use.
    ///
    /// # Safety
    /// `ptr` must be a live allocation of this allocator.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.block_size(ptr) - OVERHEAD
    }

    /// Wrap in [`Segallock`], a mutex-locked wrapper struct using [`lock_api`].
    ///
    /// This implements the [`GlobalAlloc`](core::alloc::GlobalAlloc) trait and provides
    /// access to the [`Allocator`](allocator_api2::alloc::Allocator) API.
    ///
    /// # Examples
    /// ```
    /// # use segalloc::*;
    /// # use core::alloc::{GlobalAlloc, Layout};
    /// use spin::Mutex;
    /// let mut mem = vec![0u128; 1024];
    /// let segalloc = Segalloc::new(unsafe { Arena::new(Span::from(&mut mem[..])) });
    /// let segallock = segalloc.lock::<Mutex<()>>();
    ///
    /// unsafe {
    ///     segallock.alloc(Layout::from_size_align_unchecked(32, 4));
    /// }
    /// ```
    #[cfg(feature = "lock_api")]
    pub const fn lock<R: lock_api::RawMutex>(self) -> Segallock<R, S> {
        Segallock::new(self)
    }
}
