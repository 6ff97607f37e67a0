//! [`Segallock`] facilitates using [`Segalloc`] as a Rust global allocator,
//! or other usage across multiple threads.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{null_mut, NonNull};

use crate::{Segalloc, Source, ALIGN};

#[cfg(feature = "allocator")]
use allocator_api2::alloc::{AllocError, Allocator};

/// Wraps a mutex-locked [`Segalloc`].
///
/// The heap is initialized lazily on the first allocation if it isn't already.
/// Layouts aligned beyond [`ALIGN`] are refused.
///
/// When used as the global allocator, don't install a logger that allocates,
/// or filter out this crate's log records.
///
/// # Example
/// ```rust
/// # use segalloc::*;
/// use spin::Mutex;
///
/// let mut mem = vec![0u128; 1024];
/// let segallock = Segallock::<Mutex<()>, _>::new(Segalloc::new(unsafe { Arena::new(Span::from(&mut mem[..])) }));
///
/// let mut v = allocator_api2::vec::Vec::new_in(&segallock);
/// v.extend_from_slice(&[1u32, 2, 3]);
/// ```
#[derive(Debug)]
pub struct Segallock<R: lock_api::RawMutex, S: Source> {
    mutex: lock_api::Mutex<R, Segalloc<S>>,
}

impl<R: lock_api::RawMutex, S: Source> Segallock<R, S> {
    /// Create a new [`Segallock`].
    pub const fn new(segalloc: Segalloc<S>) -> Self {
        Self { mutex: lock_api::Mutex::new(segalloc) }
    }

    /// Lock the mutex and access the inner [`Segalloc`].
    #[track_caller]
    pub fn lock(&self) -> lock_api::MutexGuard<R, Segalloc<S>> {
        self.mutex.lock()
    }

    /// Try to lock the mutex and access the inner [`Segalloc`].
    pub fn try_lock(&self) -> Option<lock_api::MutexGuard<R, Segalloc<S>>> {
        self.mutex.try_lock()
    }

    /// Returns a mutable reference to the inner [`Segalloc`].
    ///
    /// This avoids locking, as having a mutable reference statically
    /// guarantees that `self` is not locked.
    pub fn get_mut(&mut self) -> &mut Segalloc<S> {
        self.mutex.get_mut()
    }

    /// Retrieve the inner [`Segalloc`].
    pub fn into_inner(self) -> Segalloc<S> {
        self.mutex.into_inner()
    }
}

/// Allocate for `layout`, initializing the heap first if needed.
fn allocate_layout<S: Source>(segalloc: &mut Segalloc<S>, layout: Layout) -> Option<NonNull<u8>> {
    if layout.align() > ALIGN {
        log::warn!("refusing {:?}: alignment exceeds {}", layout, ALIGN);
        return None;
    }

    if !segalloc.is_initialized() {
        segalloc.init().ok()?;
    }

    segalloc.allocate(layout.size())
}

unsafe impl<R: lock_api::RawMutex, S: Source> GlobalAlloc for Segallock<R, S> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        allocate_layout(&mut self.lock(), layout).map_or(null_mut(), |nn| nn.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.lock().release(ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        self.lock().resize(ptr, new_size).map_or(null_mut(), |nn| nn.as_ptr())
    }
}

#[cfg(feature = "allocator")]
#[inline(always)]
fn nonnull_slice_from_raw_parts(nn: NonNull<u8>, len: usize) -> NonNull<[u8]> {
    // SAFETY: if `nn` is non-null, then the resulting slice is non-null
    unsafe { NonNull::new_unchecked(core::ptr::slice_from_raw_parts_mut(nn.as_ptr(), len)) }
}

#[cfg(feature = "allocator")]
#[inline(always)]
fn dangling_for(layout: Layout) -> NonNull<[u8]> {
    // the alignment is nonzero, and is a valid address for zero-sized access
    let dangling = NonNull::new(layout.align() as *mut u8).unwrap_or(NonNull::dangling());
    nonnull_slice_from_raw_parts(dangling, 0)
}

#[cfg(feature = "allocator")]
unsafe impl<R: lock_api::RawMutex, S: Source> Allocator for Segallock<R, S> {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Ok(dangling_for(layout));
        }

        allocate_layout(&mut self.lock(), layout)
            .map(|nn| nonnull_slice_from_raw_parts(nn, layout.size()))
            .ok_or(AllocError)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            self.lock().release(ptr.as_ptr());
        }
    }

    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(new_layout.size() >= old_layout.size());

        if old_layout.size() == 0 {
            return self.allocate(new_layout);
        }

        if new_layout.align() > ALIGN {
            return Err(AllocError);
        }

        self.lock()
            .resize(ptr.as_ptr(), new_layout.size())
            .map(|nn| nonnull_slice_from_raw_parts(nn, new_layout.size()))
            .ok_or(AllocError)
    }

    unsafe fn grow_zeroed(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        let res = self.grow(ptr, old_layout, new_layout);

        if let Ok(allocation) = res {
            allocation
                .cast::<u8>()
                .as_ptr()
                .add(old_layout.size())
                .write_bytes(0, new_layout.size() - old_layout.size());
        }

        res
    }

    unsafe fn shrink(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(new_layout.size() <= old_layout.size());

        if new_layout.size() == 0 {
            if old_layout.size() > 0 {
                self.lock().release(ptr.as_ptr());
            }

            return Ok(dangling_for(new_layout));
        }

        if new_layout.align() > ALIGN {
            return Err(AllocError);
        }

        self.lock()
            .resize(ptr.as_ptr(), new_layout.size())
            .map(|nn| nonnull_slice_from_raw_parts(nn, new_layout.size()))
            .ok_or(AllocError)
    }
}

#[cfg(test)]
mod tests {
    use core::alloc::{GlobalAlloc, Layout};

    use crate::*;

    fn arena(mem: &mut [u128]) -> Arena {
        unsafe { Arena::new(Span::from(mem)) }
    }

    #[test]
    fn global_alloc_initializes_lazily() {
        let _ = env_logger::try_init();

        let mut mem = vec![0u128; 1024];
        let segallock = Segalloc::new(arena(&mut mem)).lock::<spin::Mutex<()>>();

        assert!(!segallock.lock().is_initialized());

        unsafe {
            let layout = Layout::from_size_align(40, 8).unwrap();
            let ptr = segallock.alloc(layout);
            assert!(!ptr.is_null());
            assert!(segallock.lock().is_initialized());

            ptr.write_bytes(0xab, 40);

            let ptr = segallock.realloc(ptr, layout, 400);
            assert!(!ptr.is_null());
            assert!(core::slice::from_raw_parts(ptr, 40).iter().all(|&b| b == 0xab));

            segallock.dealloc(ptr, Layout::from_size_align(400, 8).unwrap());
        }

        assert!(segallock.lock().is_consistent());
    }

    #[test]
    fn over_aligned_layouts_fail() {
        let mut mem = vec![0u128; 1024];
        let segallock = Segalloc::new(arena(&mut mem)).lock::<spin::Mutex<()>>();

        let ptr = unsafe { segallock.alloc(Layout::from_size_align(64, 2 * ALIGN).unwrap()) };
        assert!(ptr.is_null());
    }

    #[test]
    fn global_alloc_out_of_memory() {
        let mut mem = vec![0u128; 64];
        let segallock = Segalloc::new(arena(&mut mem)).lock::<spin::Mutex<()>>();

        let ptr = unsafe { segallock.alloc(Layout::from_size_align(4096, 8).unwrap()) };
        assert!(ptr.is_null());
    }

    #[cfg(feature = "allocator")]
    #[test]
    fn allocator_api_vec() {
        let _ = env_logger::try_init();

        let mut mem = vec![0u128; 4096];
        let segallock = Segalloc::new(arena(&mut mem)).lock::<spin::Mutex<()>>();

        let mut vec = allocator_api2::vec::Vec::new_in(&segallock);
        for i in 0..1000u32 {
            vec.push(i);
        }
        assert!(vec.iter().copied().eq(0..1000));

        vec.truncate(10);
        vec.shrink_to_fit();
        assert!(vec.iter().copied().eq(0..10));

        drop(vec);

        let stats = segallock.lock().check_consistency().unwrap();
        assert_eq!(stats.allocated_blocks, 0);
    }

    #[cfg(feature = "allocator")]
    #[test]
    fn allocator_api_zero_sized() {
        use allocator_api2::alloc::Allocator;

        let mut mem = vec![0u128; 64];
        let segallock = Segalloc::new(arena(&mut mem)).lock::<spin::Mutex<()>>();

        let layout = Layout::from_size_align(0, 8).unwrap();
        let slice = segallock.allocate(layout).unwrap();
        assert_eq!(slice.len(), 0);
        assert_eq!(slice.cast::<u8>().as_ptr() as usize % 8, 0);

        unsafe { segallock.deallocate(slice.cast(), layout) };

        // nothing touched the heap
        assert!(!segallock.lock().is_initialized());
    }

    #[cfg(feature = "allocator")]
    #[test]
    fn allocator_api_grow_zeroed() {
        use allocator_api2::alloc::Allocator;

        let mut mem = vec![0xffff_ffffu128; 1024];
        let segallock = Segalloc::new(arena(&mut mem)).lock::<spin::Mutex<()>>();

        let old = Layout::from_size_align(16, 8).unwrap();
        let new = Layout::from_size_align(256, 8).unwrap();

        unsafe {
            let ptr = segallock.allocate_zeroed(old).unwrap().cast::<u8>();
            let grown = segallock.grow_zeroed(ptr, old, new).unwrap();

            let bytes = core::slice::from_raw_parts(grown.cast::<u8>().as_ptr(), 256);
            assert!(bytes.iter().all(|&b| b == 0));

            segallock.deallocate(grown.cast(), new);
        }
    }
}
