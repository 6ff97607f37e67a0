//! Generic utilities for pointer handling and sizing.

pub const WORD_SIZE: usize = core::mem::size_of::<usize>();

/// The alignment quantum: every block size and payload pointer is a multiple of it.
pub const ALIGN: usize = 2 * WORD_SIZE;

/// Aligns `ptr` up to the next `align_mask + 1`.
///
/// `align_mask` must be a power of two minus one.
#[inline]
pub fn align_up_by(ptr: *mut u8, align_mask: usize) -> *mut u8 {
    debug_assert!((align_mask + 1).is_power_of_two());

    // this incantation maintains provenance of ptr
    // while allowing the compiler to see through the wrapping_add and optimize it
    ptr.wrapping_add(((ptr as usize).wrapping_add(align_mask) & !align_mask).wrapping_sub(ptr as usize))
}

/// Aligns `ptr` down to `align_mask + 1`.
///
/// `align_mask` must be a power of two minus one.
#[inline]
pub fn align_down_by(ptr: *mut u8, align_mask: usize) -> *mut u8 {
    debug_assert!((align_mask + 1).is_power_of_two());

    ptr.wrapping_sub(ptr as usize & align_mask)
}

/// Rounds `size` up to a multiple of [`ALIGN`], returning `None` on overflow.
#[inline]
pub const fn align_size_up(size: usize) -> Option<usize> {
    match size.checked_add(ALIGN - 1) {
        Some(padded) => Some(padded & !(ALIGN - 1)),
        None => None,
    }
}

#[inline]
pub fn is_aligned_to(ptr: *mut u8, align: usize) -> bool {
    (ptr as usize).trailing_zeros() >= align.trailing_zeros()
}

#[cfg(test)]
mod tests {
    use core::ptr::null_mut;

    use super::*;

    #[test]
    fn align_ptr_test() {
        let mask = ALIGN - 1;

        assert!(align_up_by(null_mut(), mask) == null_mut());
        assert!(align_down_by(null_mut(), mask) == null_mut());

        assert!(align_up_by(null_mut::<u8>().wrapping_add(1), mask) == null_mut::<u8>().wrapping_add(ALIGN));
        assert!(align_up_by(null_mut::<u8>().wrapping_add(3), mask) == null_mut::<u8>().wrapping_add(ALIGN));
        assert!(
            align_up_by(null_mut::<u8>().wrapping_add(ALIGN), mask) == null_mut::<u8>().wrapping_add(ALIGN)
        );

        assert!(align_down_by(null_mut::<u8>().wrapping_add(1), mask) == null_mut::<u8>());
        assert!(align_down_by(null_mut::<u8>().wrapping_add(ALIGN + 3), mask) == null_mut::<u8>().wrapping_add(ALIGN));

        assert!(is_aligned_to(null_mut::<u8>().wrapping_add(2 * ALIGN), ALIGN));
        assert!(!is_aligned_to(null_mut::<u8>().wrapping_add(WORD_SIZE), ALIGN));
    }

    #[test]
    fn align_size_test() {
        assert_eq!(align_size_up(0), Some(0));
        assert_eq!(align_size_up(1), Some(ALIGN));
        assert_eq!(align_size_up(ALIGN), Some(ALIGN));
        assert_eq!(align_size_up(ALIGN + 1), Some(2 * ALIGN));
        assert_eq!(align_size_up(usize::MAX), None);
    }
}
