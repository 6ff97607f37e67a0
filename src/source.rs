//! Sources of heap memory.
//!
//! A [`Source`] is the primitive the allocator grows its heap with: every
//! successful [`grow`](Source::grow) hands over the bytes directly following
//! the previously granted ones, in the manner of `sbrk`.

use core::ptr::NonNull;

use crate::{ptr_utils::ALIGN, Span};

/// The heap source refused to provide more memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, thiserror::Error)]
#[error("heap source refused to grow")]
pub struct OutOfMemory;

/// Extends the managed heap region at its high end.
///
/// # Safety
///
/// Implementors must uphold that:
/// - the first region returned is aligned to [`ALIGN`](crate::ALIGN),
/// - every region returned starts exactly where the previously returned region ended,
/// - returned memory is valid for reads and writes, and is not accessed
///   by anything else for as long as the allocator holds it.
///
/// Do not call into the allocator that owns the [`Source`] from within `grow`,
/// directly or indirectly (e.g. through the global allocator).
pub unsafe trait Source {
    /// Extend the region by `delta` contiguous bytes, returning the start of the new bytes.
    fn grow(&mut self, delta: usize) -> Result<NonNull<u8>, OutOfMemory>;
}

/// Grows within a fixed [`Span`] of memory, refusing once it is exhausted.
///
/// The span's base is aligned up to [`ALIGN`](crate::ALIGN) on construction.
#[derive(Debug)]
pub struct Arena {
    span: Span,
    brk: *mut u8,
}

unsafe impl Send for Arena {}

impl Arena {
    /// # Safety
    /// The memory within `span` must be valid for reads and writes
    /// and must not be used by anything else while the allocator owns the [`Arena`].
    pub unsafe fn new(span: Span) -> Self {
        let span = span.align_inward(ALIGN);

        let brk = match span.get_base_acme() {
            Some((base, _)) => base,
            None => core::ptr::null_mut(),
        };

        Self { span, brk }
    }

    /// The aligned span the arena grows within.
    pub fn span(&self) -> Span {
        self.span
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        match self.span.get_base_acme() {
            Some((base, _)) => self.brk as usize - base as usize,
            None => 0,
        }
    }

    /// Bytes that may still be handed out.
    pub fn remaining(&self) -> usize {
        self.span.size() - self.used()
    }
}

unsafe impl Source for Arena {
    fn grow(&mut self, delta: usize) -> Result<NonNull<u8>, OutOfMemory> {
        if delta > self.remaining() {
            log::warn!("arena {} exhausted: {} bytes requested, {} remaining", self.span, delta, self.remaining());
            return Err(OutOfMemory);
        }

        let old_brk = self.brk;
        self.brk = self.brk.wrapping_add(delta);

        NonNull::new(old_brk).ok_or(OutOfMemory)
    }
}

/// Grows the process data segment using `sbrk(2)`.
///
/// Nothing else in the process may move the program break
/// while an allocator uses this source.
#[cfg(all(feature = "sbrk", unix))]
#[derive(Debug, Default)]
pub struct Sbrk {
    is_aligned: bool,
}

#[cfg(all(feature = "sbrk", unix))]
impl Sbrk {
    pub const fn new() -> Self {
        Self { is_aligned: false }
    }

    fn sbrk(increment: usize) -> Result<*mut u8, OutOfMemory> {
        let increment = libc::intptr_t::try_from(increment).map_err(|_| OutOfMemory)?;

        let brk = unsafe { libc::sbrk(increment) };

        if brk == usize::MAX as *mut libc::c_void {
            log::warn!("sbrk({}) failed", increment);
            Err(OutOfMemory)
        } else {
            Ok(brk.cast())
        }
    }
}

#[cfg(all(feature = "sbrk", unix))]
unsafe impl Source for Sbrk {
    fn grow(&mut self, delta: usize) -> Result<NonNull<u8>, OutOfMemory> {
        if !self.is_aligned {
            // pad the initial break up to ALIGN so the first region is aligned
            let brk = Self::sbrk(0)?;
            let padding = brk.align_offset(ALIGN);

            if padding != 0 {
                Self::sbrk(padding)?;
            }

            self.is_aligned = true;
        }

        NonNull::new(Self::sbrk(delta)?).ok_or(OutOfMemory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_grows_contiguously() {
        let mut mem = vec![0u128; 64];
        let mut arena = unsafe { Arena::new(Span::from(&mut mem[..])) };

        assert_eq!(arena.used(), 0);
        assert_eq!(arena.remaining(), 64 * 16);

        let a = arena.grow(4 * ALIGN).unwrap();
        let b = arena.grow(ALIGN).unwrap();

        assert_eq!(a.as_ptr() as usize % ALIGN, 0);
        assert_eq!(b.as_ptr(), a.as_ptr().wrapping_add(4 * ALIGN));
        assert_eq!(arena.used(), 5 * ALIGN);
    }

    #[test]
    fn arena_refuses_when_exhausted() {
        let mut mem = vec![0u128; 4];
        let mut arena = unsafe { Arena::new(Span::from(&mut mem[..])) };

        assert_eq!(arena.grow(128), Err(OutOfMemory));
        assert!(arena.grow(64).is_ok());
        assert_eq!(arena.grow(1), Err(OutOfMemory));
        assert!(arena.grow(0).is_ok());
    }

    #[cfg(all(feature = "sbrk", unix))]
    #[test]
    fn sbrk_grows_contiguously() {
        let mut sbrk = Sbrk::new();

        let a = sbrk.grow(4 * ALIGN).unwrap();
        let b = sbrk.grow(ALIGN).unwrap();

        assert_eq!(a.as_ptr() as usize % ALIGN, 0);
        assert_eq!(b.as_ptr(), a.as_ptr().wrapping_add(4 * ALIGN));
    }

    #[test]
    fn arena_over_empty_span() {
        let mut arena = unsafe { Arena::new(Span::empty()) };

        assert_eq!(arena.remaining(), 0);
        assert_eq!(arena.grow(16), Err(OutOfMemory));
        // the break of an empty arena is null, so even zero-sized growth fails
        assert_eq!(arena.grow(0), Err(OutOfMemory));
    }
}
