use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

/// Minimum alignment of the block backing a pool, in bytes.
///
/// This matches a common cache line size, so the first entry of every pool starts on a cache
/// line boundary and pools do not share a cache line with unrelated data at their start.
pub const MIN_BLOCK_ALIGN: usize = 64;

/// Supplies and releases the single aligned block of memory that backs a pool.
///
/// A pool calls [`allocate_aligned()`][1] exactly once when it is created and
/// [`free_aligned()`][2] exactly once when it is dropped. Neither is called while entries are
/// allocated or deallocated.
///
/// # Safety
///
/// When [`allocate_aligned()`][1] returns `Some`, the pointer must be valid for reads and writes
/// of `layout.size()` bytes, aligned to `layout.align()` and not aliased by any other live
/// allocation until it is passed to [`free_aligned()`][2].
///
/// # Examples
///
/// ```
/// use std::alloc::Layout;
/// use std::ptr::NonNull;
///
/// use fixed_pool::{BlockAllocator, RawFixedPool};
///
/// /// Refuses every request, for exercising the failure path.
/// struct Exhausted;
///
/// // SAFETY: Never returns a block, so there is nothing to uphold.
/// unsafe impl BlockAllocator for Exhausted {
///     fn allocate_aligned(&self, _layout: Layout) -> Option<NonNull<u8>> {
///         None
///     }
///
///     unsafe fn free_aligned(&self, _ptr: NonNull<u8>, _layout: Layout) {
///         unreachable!("no block was ever handed out");
///     }
/// }
///
/// let result = RawFixedPool::builder()
///     .entry_size(16)
///     .capacity(8)
///     .allocator(Exhausted)
///     .build();
///
/// assert!(result.is_err());
/// ```
///
/// [1]: Self::allocate_aligned
/// [2]: Self::free_aligned
pub unsafe trait BlockAllocator {
    /// Allocates a block matching `layout`, or returns `None` if the request cannot be satisfied.
    ///
    /// The pool only ever requests non-zero-sized layouts.
    fn allocate_aligned(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a block previously returned by [`allocate_aligned()`][1].
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by [`allocate_aligned()`][1] on this
    /// allocator with the same `layout` and that it has not already been released.
    ///
    /// [1]: Self::allocate_aligned
    unsafe fn free_aligned(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Obtains pool blocks from the Rust global allocator.
///
/// This is the default [`BlockAllocator`] of every pool. Zero-sized requests are refused with
/// `None` because the global allocator does not support them.
#[derive(Clone, Copy, Debug, Default)]
#[expect(
    clippy::exhaustive_structs,
    reason = "callers name the unit value directly when choosing an allocator"
)]
pub struct SystemBlockAllocator;

// SAFETY: The global allocator guarantees size and alignment of the memory it returns.
unsafe impl BlockAllocator for SystemBlockAllocator {
    #[inline]
    fn allocate_aligned(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }

        // SAFETY: The layout is not zero-sized, checked above.
        NonNull::new(unsafe { alloc(layout) })
    }

    #[inline]
    unsafe fn free_aligned(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantee that the block came from `alloc()`
        // with this same layout and was not yet released.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }
    }
}
