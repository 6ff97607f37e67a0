use core::ops::Range;

use crate::ptr_utils::{align_down_by, align_up_by};

/// Represents an interval of memory `[base, acme)`
///
/// Use `get_base_acme` to retrieve `base` and `acme` directly.
///
/// # Empty Spans
/// Note that where `base >= acme`, the [`Span`] is empty, in which case
/// the specific values of `base` and `acme` are considered meaningless.
/// * Empty spans contain nothing and overlap with nothing.
/// * Empty spans are contained by any sized span.
#[derive(Clone, Copy, Hash)]
pub struct Span {
    base: *mut u8,
    acme: *mut u8,
}

unsafe impl Send for Span {}

impl Default for Span {
    fn default() -> Self {
        Self::empty()
    }
}

impl core::fmt::Debug for Span {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{:p}..[{}]..{:p}", self.base, self.size(), self.acme))
    }
}

impl core::fmt::Display for Span {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.get_base_acme() {
            Some((base, acme)) => f.write_fmt(format_args!("{:p}..{:p}", base, acme)),
            None => f.write_str("Empty Span"),
        }
    }
}

impl<T> From<Range<*mut T>> for Span {
    fn from(value: Range<*mut T>) -> Self {
        Self { base: value.start.cast(), acme: value.end.cast() }
    }
}

impl<T> From<&mut [T]> for Span {
    fn from(value: &mut [T]) -> Self {
        Self::from(value.as_mut_ptr_range())
    }
}

impl<T> From<*mut [T]> for Span {
    fn from(value: *mut [T]) -> Self {
        let base = value.cast::<T>();
        Self { base: base.cast(), acme: base.wrapping_add(value.len()).cast() }
    }
}

impl PartialEq for Span {
    fn eq(&self, other: &Self) -> bool {
        self.is_empty() && other.is_empty() || self.base == other.base && self.acme == other.acme
    }
}
impl Eq for Span {}

impl Span {
    /// Create an empty span.
    #[inline]
    pub const fn empty() -> Self {
        Self { base: core::ptr::null_mut(), acme: core::ptr::null_mut() }
    }

    /// Create a new span.
    #[inline]
    pub const fn new(base: *mut u8, acme: *mut u8) -> Self {
        Self { base, acme }
    }

    /// Creates a [`Span`] given a `base` and a `size`.
    ///
    /// If `base + size` overflows, the result is empty.
    #[inline]
    pub fn from_base_size(base: *mut u8, size: usize) -> Self {
        Self { base, acme: if (base as usize).checked_add(size).is_some() { base.wrapping_add(size) } else { base } }
    }

    /// Returns whether `base >= acme`.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.acme <= self.base
    }

    /// Returns the size of the span, else zero if `base >= span`.
    #[inline]
    pub fn size(self) -> usize {
        if self.is_empty() { 0 } else { self.acme as usize - self.base as usize }
    }

    /// If `self` isn't empty, returns `(base, acme)`
    #[inline]
    pub fn get_base_acme(self) -> Option<(*mut u8, *mut u8)> {
        if self.is_empty() { None } else { Some((self.base, self.acme)) }
    }

    /// Returns whether `self` contains `ptr`.
    ///
    /// Empty spans contain nothing.
    #[inline]
    pub fn contains(self, ptr: *mut u8) -> bool {
        // if self is empty, this always evaluates to false
        self.base <= ptr && ptr < self.acme
    }

    /// Returns whether `self` contains `other`.
    ///
    /// Empty spans are contained by any span, even empty ones.
    #[inline]
    pub fn contains_span(self, other: Span) -> bool {
        other.is_empty() || self.base <= other.base && other.acme <= self.acme
    }

    /// Returns whether some of `self` overlaps with `other`.
    ///
    /// Empty spans don't overlap with anything.
    #[inline]
    pub fn overlaps(self, other: Span) -> bool {
        self.is_sized() && other.is_sized() && !(other.base >= self.acme || self.base >= other.acme)
    }

    /// Returns whether `base < acme`.
    #[inline]
    pub fn is_sized(self) -> bool {
        !self.is_empty()
    }

    /// Aligns `base` upward and `acme` downward by `align`.
    ///
    /// If either operation overflows, or the result is otherwise empty, an empty span is returned.
    ///
    /// # Panics
    /// Panics if `align` is not a power of two.
    #[inline]
    pub fn align_inward(self, align: usize) -> Self {
        assert!(align.is_power_of_two(), "align is not a power of two");

        let aligned_base = align_up_by(self.base, align - 1);

        if self.is_empty() || aligned_base < self.base {
            return Self::empty();
        }

        Self { base: aligned_base, acme: align_down_by(self.acme, align - 1) }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ptr(addr: usize) -> *mut u8 {
        core::ptr::null_mut::<u8>().wrapping_add(addr)
    }

    #[test]
    fn test_span_basics() {
        let span = Span::new(ptr(1234), ptr(5678));
        assert_eq!(span.size(), 5678 - 1234);
        assert_eq!(span.get_base_acme(), Some((ptr(1234), ptr(5678))));
        assert!(span.contains(ptr(1234)));
        assert!(!span.contains(ptr(5678)));

        assert!(Span::empty().is_empty());
        assert!(Span::new(ptr(10), ptr(5)).is_empty());
        assert_eq!(Span::new(ptr(10), ptr(5)), Span::empty());
        assert_eq!(Span::from_base_size(ptr(10), 20), Span::new(ptr(10), ptr(30)));
        assert!(Span::from_base_size(ptr(usize::MAX - 4), 20).is_empty());
    }

    #[test]
    fn test_span_relations() {
        let span = Span::new(ptr(1000), ptr(2000));

        assert!(span.contains_span(Span::new(ptr(1000), ptr(1500))));
        assert!(span.contains_span(Span::empty()));
        assert!(!span.contains_span(Span::new(ptr(999), ptr(1500))));

        assert!(span.overlaps(Span::new(ptr(1999), ptr(3000))));
        assert!(!span.overlaps(Span::new(ptr(2000), ptr(3000))));
        assert!(!span.overlaps(Span::empty()));
    }

    #[test]
    fn test_span_align_inward() {
        assert_eq!(Span::new(ptr(1), ptr(47)).align_inward(16), Span::new(ptr(16), ptr(32)));
        assert_eq!(Span::new(ptr(17), ptr(31)).align_inward(16), Span::empty());
        assert_eq!(Span::new(ptr(usize::MAX - 2), ptr(usize::MAX)).align_inward(16), Span::empty());
    }

    #[test]
    fn test_span_from_slice() {
        let mut mem = [0u64; 4];
        let span = Span::from(&mut mem[..]);
        assert_eq!(span.size(), 32);

        let span = Span::from(core::ptr::slice_from_raw_parts_mut(mem.as_mut_ptr(), 2));
        assert_eq!(span.size(), 16);
    }
}
