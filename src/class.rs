//! Size classes of the segregated free lists.
//!
//! Class `i` has the threshold `FIRST_CLASS_LIMIT << i`. A block belongs to the
//! smallest class whose threshold is at least its size; everything beyond the
//! second-to-last threshold lands in the last class.
//! ```text
//! class:  0    1     2     3      ...  14
//! sizes: ..32 ..64 ..128 ..256    ...  >2^18
//! ```

/// Number of free lists.
pub const CLASS_COUNT: usize = 15;

/// Threshold of the first class.
pub const FIRST_CLASS_LIMIT: usize = 32;

/// Returns the class index of a block of `size` bytes.
#[inline]
pub const fn class_of_size(size: usize) -> usize {
    if size <= FIRST_CLASS_LIMIT {
        return 0;
    }

    // ceil(log2(size / FIRST_CLASS_LIMIT)), computed without the division rounding down
    let class = (usize::BITS - (size - 1).leading_zeros()) as usize - FIRST_CLASS_LIMIT.trailing_zeros() as usize;

    if class < CLASS_COUNT {
        class
    } else {
        CLASS_COUNT - 1
    }
}

/// Returns the largest size that class `class` is guaranteed to cover,
/// or `None` for the unbounded last class.
pub const fn class_limit(class: usize) -> Option<usize> {
    if class + 1 < CLASS_COUNT {
        Some(FIRST_CLASS_LIMIT << class)
    } else {
        None
    }
}
