//! Boundary tags and block addressing.
//!
//! A block is addressed by its payload pointer: the word directly after its header.
//! ```text
//!  hdr | payload .................................. | ftr |
//!      ^ payload pointer                                  ^ payload + size - WORD_SIZE
//! ```
//! All arithmetic from a payload pointer and a block size to the header, footer
//! and neighbors lives here.

use crate::ptr_utils::{ALIGN, WORD_SIZE};

/// A boundary tag: the block size with the allocated flag in the least significant bit.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Tag(usize);

impl core::fmt::Debug for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tag")
            .field("size", &self.size())
            .field("is_allocated", &self.is_allocated())
            .finish()
    }
}

impl Tag {
    pub const ALLOCATED_FLAG: usize = 1 << 0; // sizes are always multiples of ALIGN

    const SIZE: usize = !(ALIGN - 1);

    /// The tag of the zero-sized epilogue header.
    pub const EPILOGUE: Tag = Tag::new(0, true);

    #[inline]
    pub const fn new(size: usize, is_allocated: bool) -> Self {
        debug_assert!(size & !Self::SIZE == 0);

        if is_allocated {
            Self(size | Self::ALLOCATED_FLAG)
        } else {
            Self(size)
        }
    }

    #[inline]
    pub const fn size(self) -> usize {
        self.0 & Self::SIZE
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED_FLAG != 0
    }

    /// # Safety
    /// `tag_ptr` must be valid for a word-sized read.
    #[inline]
    pub unsafe fn read(tag_ptr: *mut u8) -> Self {
        tag_ptr.cast::<Tag>().read()
    }

    /// # Safety
    /// `tag_ptr` must be valid for a word-sized write.
    #[inline]
    pub unsafe fn write(tag_ptr: *mut u8, tag: Tag) {
        tag_ptr.cast::<Tag>().write(tag)
    }
}

/// Address of the header of the block at `payload`.
#[inline]
pub fn header_of(payload: *mut u8) -> *mut u8 {
    payload.wrapping_sub(WORD_SIZE)
}

/// Address of the footer of the block at `payload` spanning `size` bytes.
#[inline]
pub fn footer_of(payload: *mut u8, size: usize) -> *mut u8 {
    payload.wrapping_add(size).wrapping_sub(2 * WORD_SIZE)
}

/// Payload pointer of the block physically after the block at `payload`.
#[inline]
pub fn next_block(payload: *mut u8, size: usize) -> *mut u8 {
    payload.wrapping_add(size)
}

/// Payload pointer of the block physically before the block at `payload`,
/// given that block's size.
#[inline]
pub fn prev_block(payload: *mut u8, prev_size: usize) -> *mut u8 {
    payload.wrapping_sub(prev_size)
}

/// Address of the footer of the block physically before the block at `payload`.
#[inline]
pub fn prev_footer_of(payload: *mut u8) -> *mut u8 {
    payload.wrapping_sub(2 * WORD_SIZE)
}

/// Reads the header of the block at `payload`.
///
/// # Safety
/// `payload` must be the payload pointer of a block within an initialized heap.
#[inline]
pub unsafe fn header(payload: *mut u8) -> Tag {
    Tag::read(header_of(payload))
}

/// Writes matching header and footer tags for the block at `payload`.
///
/// # Safety
/// The whole block at `payload` spanning `size` bytes must be writable.
#[inline]
pub unsafe fn write_tags(payload: *mut u8, size: usize, is_allocated: bool) {
    let tag = Tag::new(size, is_allocated);
    Tag::write(header_of(payload), tag);
    Tag::write(footer_of(payload, size), tag);
}
