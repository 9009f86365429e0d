use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::{BlockAllocator, RawFixedPool, Result, SystemBlockAllocator};

/// Builder for creating an instance of [`RawFixedPool`].
///
/// [`RawFixedPool`] requires the entry layout and the capacity to be specified at construction
/// time. Use `.entry_size()` for plain byte entries, `.layout()` to provide a specific layout or
/// `.layout_of::<T>()` to generate a layout based on the provided type.
///
/// The entry layout and capacity are mandatory, whereas the block allocator is optional.
///
/// # Examples
///
/// ```
/// use fixed_pool::RawFixedPool;
///
/// let pool = RawFixedPool::builder()
///     .layout_of::<[u64; 4]>()
///     .capacity(128)
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.entry_stride(), 32);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct RawFixedPoolBuilder<A: BlockAllocator = SystemBlockAllocator> {
    entry_layout: Option<Layout>,
    capacity: Option<NonZero<usize>>,
    allocator: A,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl RawFixedPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            entry_layout: None,
            capacity: None,
            allocator: SystemBlockAllocator,
            _not_sync: PhantomData,
        }
    }
}

impl<A: BlockAllocator> RawFixedPoolBuilder<A> {
    /// Sets the size in bytes of each entry, with no alignment requirement beyond that of the
    /// block itself.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or greater than `isize::MAX`.
    #[inline]
    pub fn entry_size(self, size: usize) -> Self {
        assert!(size > 0, "RawFixedPool must have non-zero entry size");

        let layout = Layout::from_size_align(size, 1)
            .expect("entry size must not exceed isize::MAX");
        self.layout(layout)
    }

    /// Sets the memory layout of each entry.
    ///
    /// # Panics
    ///
    /// Panics if the layout has zero size.
    #[inline]
    pub fn layout(mut self, layout: Layout) -> Self {
        assert!(layout.size() > 0, "RawFixedPool must have non-zero entry size");
        self.entry_layout = Some(layout);
        self
    }

    /// Sets the memory layout of each entry based on a type.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    #[inline]
    pub fn layout_of<T>(self) -> Self {
        self.layout(Layout::new::<T>())
    }

    /// Sets the maximum number of entries the pool can hold.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[inline]
    pub fn capacity(mut self, capacity: usize) -> Self {
        let capacity = NonZero::new(capacity).expect("RawFixedPool must have non-zero capacity");
        self.capacity = Some(capacity);
        self
    }

    /// Sets the [block allocator][BlockAllocator] that supplies the memory block of the pool.
    ///
    /// By default, blocks come from the Rust global allocator via [`SystemBlockAllocator`].
    #[inline]
    pub fn allocator<B: BlockAllocator>(self, allocator: B) -> RawFixedPoolBuilder<B> {
        RawFixedPoolBuilder {
            entry_layout: self.entry_layout,
            capacity: self.capacity,
            allocator,
            _not_sync: PhantomData,
        }
    }

    /// Builds the pool, reserving its memory block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the block
    /// allocator cannot supply the block, or [`Error::CapacityTooLarge`][crate::Error::CapacityTooLarge]
    /// if the block cannot be described for the requested capacity.
    ///
    /// # Panics
    ///
    /// Panics if the entry layout or the capacity has not been set.
    #[inline]
    pub fn build(self) -> Result<RawFixedPool<A>> {
        let entry_layout = self.entry_layout.expect(
            "entry layout must be set using .entry_size(), .layout() or .layout_of::<T>() before calling .build()",
        );
        let capacity = self
            .capacity
            .expect("capacity must be set using .capacity() before calling .build()");

        RawFixedPool::new_in(entry_layout, capacity, self.allocator)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(RawFixedPoolBuilder: Send);
    assert_not_impl_any!(RawFixedPoolBuilder: Sync);

    #[test]
    fn entry_size_sets_byte_aligned_layout() {
        let pool = RawFixedPool::builder()
            .entry_size(12)
            .capacity(3)
            .build()
            .unwrap();

        assert_eq!(pool.entry_layout(), Layout::from_size_align(12, 1).unwrap());
        assert_eq!(pool.capacity(), 3);
    }

    #[test]
    fn layout_of_uses_type_layout() {
        let pool = RawFixedPool::builder()
            .layout_of::<u128>()
            .capacity(2)
            .build()
            .unwrap();

        assert_eq!(pool.entry_layout(), Layout::new::<u128>());
    }

    #[test]
    fn later_layout_overrides_earlier() {
        let pool = RawFixedPool::builder()
            .entry_size(100)
            .layout_of::<u16>()
            .capacity(2)
            .build()
            .unwrap();

        assert_eq!(pool.entry_layout(), Layout::new::<u16>());
    }

    #[test]
    #[should_panic]
    fn zero_entry_size_panics() {
        _ = RawFixedPool::builder().entry_size(0);
    }

    #[test]
    #[should_panic]
    fn zero_sized_type_panics() {
        _ = RawFixedPool::builder().layout_of::<()>();
    }

    #[test]
    #[should_panic]
    fn zero_capacity_panics() {
        _ = RawFixedPool::builder().capacity(0);
    }

    #[test]
    #[should_panic]
    fn build_without_layout_panics() {
        _ = RawFixedPool::builder().capacity(4).build();
    }

    #[test]
    #[should_panic]
    fn build_without_capacity_panics() {
        _ = RawFixedPool::builder().entry_size(4).build();
    }
}
