//! Heap consistency checking.

use core::ptr::NonNull;

use crate::class::{class_of_size, CLASS_COUNT};
use crate::llist::FreeNode;
use crate::ptr_utils::{is_aligned_to, ALIGN};
use crate::tag::{footer_of, header, next_block, Tag};
use crate::{Segalloc, Source, MIN_BLOCK_SIZE};

/// A summary of the heap produced by [`Segalloc::check_consistency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HeapStats {
    /// Size of the heap, sentinels included.
    pub heap_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
}

/// The first structural problem found in the heap.
///
/// Addresses are payload pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Corruption {
    #[error("prologue at {0:#x} is damaged")]
    Prologue(usize),
    #[error("expected the epilogue at {expected:#x}, found a terminator at {found:#x}")]
    Epilogue { expected: usize, found: usize },
    #[error("block at {0:#x} is misaligned")]
    Misaligned(usize),
    #[error("block at {block:#x} has invalid size {size}")]
    BadSize { block: usize, size: usize },
    #[error("block at {block:#x} runs past the heap end at {acme:#x}")]
    OutOfBounds { block: usize, acme: usize },
    #[error("free block at {0:#x} has a footer different from its header")]
    TagMismatch(usize),
    #[error("free blocks at {0:#x} and {1:#x} are adjacent")]
    Uncoalesced(usize, usize),
    #[error("free block at {0:#x} is missing from the free lists")]
    Unlisted(usize),
    #[error("free list {class} holds {node:#x}, which is not a free block")]
    NotFree { class: usize, node: usize },
    #[error("free block at {node:#x} of size {size} is in list {class}")]
    WrongClass { class: usize, node: usize, size: usize },
    #[error("free list {class} has a broken back link at {node:#x}")]
    BrokenLink { class: usize, node: usize },
    #[error("free lists hold {listed} nodes, but the heap has {free} free blocks")]
    ListCount { listed: usize, free: usize },
    #[error("free list {class} holds {node:#x}, but there is no heap")]
    ListedWithoutHeap { class: usize, node: usize },
}

impl<S: Source> Segalloc<S> {
    /// Walk the heap and the free lists, verifying every structural invariant.
    ///
    /// This is slow, being quadratic in the number of free blocks in the worst case.
    /// An uninitialized allocator reports empty stats.
    pub fn check_consistency(&self) -> Result<HeapStats, Corruption> {
        let mut stats = HeapStats::default();

        if !self.is_initialized() {
            for class in 0..CLASS_COUNT {
                if let Some(node) = self.lists.first(class) {
                    return Err(Corruption::ListedWithoutHeap { class, node: node.as_ptr() as usize });
                }
            }
            return Ok(stats);
        }

        let heap = self.heap_span();
        stats.heap_bytes = heap.size();

        // SAFETY: all reads are bounds-checked against the heap before dereferencing
        unsafe {
            let prologue = self.heap_base;
            let prologue_tag = Tag::new(ALIGN, true);
            if header(prologue) != prologue_tag || Tag::read(footer_of(prologue, ALIGN)) != prologue_tag {
                return Err(Corruption::Prologue(prologue as usize));
            }

            let mut block = next_block(prologue, ALIGN);
            let mut free_below = None;

            loop {
                let tag = header(block);

                if tag.size() == 0 {
                    if block != self.heap_acme || !tag.is_allocated() {
                        return Err(Corruption::Epilogue {
                            expected: self.heap_acme as usize,
                            found: block as usize,
                        });
                    }
                    break;
                }

                if !is_aligned_to(block, ALIGN) {
                    return Err(Corruption::Misaligned(block as usize));
                }
                if tag.size() < MIN_BLOCK_SIZE {
                    return Err(Corruption::BadSize { block: block as usize, size: tag.size() });
                }

                let above = next_block(block, tag.size());
                if above > self.heap_acme || above <= block {
                    return Err(Corruption::OutOfBounds {
                        block: block as usize,
                        acme: self.heap_acme as usize,
                    });
                }

                if tag.is_allocated() {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += tag.size();
                    free_below = None;
                } else {
                    if Tag::read(footer_of(block, tag.size())) != tag {
                        return Err(Corruption::TagMismatch(block as usize));
                    }
                    if let Some(below) = free_below {
                        return Err(Corruption::Uncoalesced(below as usize, block as usize));
                    }
                    if !self.is_listed(block, tag.size()) {
                        return Err(Corruption::Unlisted(block as usize));
                    }

                    stats.free_blocks += 1;
                    stats.free_bytes += tag.size();
                    free_below = Some(block);
                }

                block = above;
            }

            let mut listed = 0;

            for class in 0..CLASS_COUNT {
                let mut prev: Option<NonNull<FreeNode>> = None;

                for node in self.lists.iter(class) {
                    // more nodes than free blocks, possibly a cycle
                    if listed == stats.free_blocks {
                        return Err(Corruption::ListCount { listed: listed + 1, free: stats.free_blocks });
                    }

                    let addr = node.as_ptr().cast::<u8>();
                    if !heap.contains(addr) || !is_aligned_to(addr, ALIGN) || header(addr).is_allocated() {
                        return Err(Corruption::NotFree { class, node: addr as usize });
                    }

                    let size = header(addr).size();
                    if class_of_size(size) != class {
                        return Err(Corruption::WrongClass { class, node: addr as usize, size });
                    }

                    if (*node.as_ptr()).prev != prev {
                        return Err(Corruption::BrokenLink { class, node: addr as usize });
                    }

                    prev = Some(node);
                    listed += 1;
                }
            }

            if listed != stats.free_blocks {
                return Err(Corruption::ListCount { listed, free: stats.free_blocks });
            }
        }

        Ok(stats)
    }

    /// Returns whether [`check_consistency`](Segalloc::check_consistency) finds no problems.
    pub fn is_consistent(&self) -> bool {
        self.check_consistency().is_ok()
    }

    /// Returns whether `block` is in the free list of its size class.
    unsafe fn is_listed(&self, block: *mut u8, size: usize) -> bool {
        // a heap can't hold more blocks than this, bounding the walk of a cyclic list
        let max_blocks = self.heap_span().size() / MIN_BLOCK_SIZE;

        self.lists
            .iter(class_of_size(size))
            .take(max_blocks)
            .any(|node| node.as_ptr().cast::<u8>() == block)
    }
}

/// Panics if the heap is inconsistent. Only active in debug builds, under test
/// or with the `paranoid` feature.
#[cfg(all(debug_assertions, any(test, feature = "paranoid")))]
pub(crate) fn scan_for_errors<S: Source>(segalloc: &Segalloc<S>) {
    if let Err(corruption) = segalloc.check_consistency() {
        panic!("heap corruption: {}", corruption);
    }
}

#[cfg(not(all(debug_assertions, any(test, feature = "paranoid"))))]
#[inline(always)]
pub(crate) fn scan_for_errors<S: Source>(_: &Segalloc<S>) {}
