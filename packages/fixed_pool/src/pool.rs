use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use scopeguard::ScopeGuard;

use crate::{BlockAllocator, PoolStats, RawFixedPool, Result, SystemBlockAllocator};

/// A fixed-capacity pool of `T` values, constructed and destroyed in place.
///
/// This wraps a [`RawFixedPool`] whose entries are laid out for `T`. [`construct()`][1] obtains
/// an entry and moves a value into it, [`destroy()`][2] drops the value in place and returns
/// the entry to the pool. Both complete in constant time.
///
/// The pool hands out raw pointers and keeps no references to its values, so the caller decides
/// how the values are accessed. Every value must be destroyed (or [taken][3]) before the pool is
/// dropped.
///
/// # Examples
///
/// ```
/// use fixed_pool::FixedPool;
///
/// let mut pool = FixedPool::<String>::new(2).unwrap();
///
/// let hello = pool.construct("hello".to_string()).unwrap();
/// let world = pool.construct("world".to_string()).unwrap();
///
/// // The pool is full, so nothing else fits.
/// assert!(pool.construct("!".to_string()).is_none());
///
/// // SAFETY: Both values are live and not referenced anywhere else.
/// unsafe {
///     assert_eq!(hello.as_ref(), "hello");
///     assert_eq!(world.as_ref(), "world");
///
///     pool.destroy(hello);
///     pool.destroy(world);
/// }
/// ```
///
/// [1]: Self::construct
/// [2]: Self::destroy
/// [3]: Self::take
pub struct FixedPool<T, A: BlockAllocator = SystemBlockAllocator> {
    raw: RawFixedPool<A>,

    _values: PhantomData<T>,
}

impl<T> FixedPool<T> {
    /// Creates a pool with room for `capacity` values, backed by the Rust global allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory block for the pool cannot be reserved.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or `capacity` is zero.
    #[inline]
    pub fn new(capacity: usize) -> Result<Self> {
        Self::new_in(capacity, SystemBlockAllocator)
    }
}

impl<T, A: BlockAllocator> FixedPool<T, A> {
    /// Creates a pool with room for `capacity` values, backed by a block from `allocator`.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory block for the pool cannot be reserved.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or `capacity` is zero.
    pub fn new_in(capacity: usize, allocator: A) -> Result<Self> {
        assert!(size_of::<T>() > 0, "FixedPool must have non-zero item size");

        let raw = RawFixedPool::builder()
            .layout_of::<T>()
            .capacity(capacity)
            .allocator(allocator)
            .build()?;

        Ok(Self {
            raw,
            _values: PhantomData,
        })
    }

    /// The maximum number of values the pool can hold at the same time.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// The number of live values in the pool.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the pool holds no live values.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Whether the pool is at capacity, so [`construct()`][1] would return `None`.
    ///
    /// [1]: Self::construct
    #[must_use]
    #[inline]
    pub fn is_full(&self) -> bool {
        self.raw.is_full()
    }

    /// Returns occupancy statistics for the pool.
    #[must_use]
    #[inline]
    pub fn stats(&self) -> PoolStats {
        self.raw.stats()
    }

    /// Whether `ptr` addresses one of the entries of this pool.
    ///
    /// This says nothing about whether a live value is stored there.
    #[must_use]
    #[inline]
    pub fn contains(&self, ptr: NonNull<T>) -> bool {
        self.raw.contains(ptr.cast())
    }

    /// Moves `value` into a free entry and returns a pointer to it.
    ///
    /// Returns `None` if the pool is full, in which case `value` is dropped. Use
    /// [`construct_with()`][1] to avoid creating the value when there is no room for it.
    ///
    /// The pointer is valid for reads and writes until the value is passed to
    /// [`destroy()`][2] or [`take()`][3].
    ///
    /// [1]: Self::construct_with
    /// [2]: Self::destroy
    /// [3]: Self::take
    #[must_use]
    #[inline]
    pub fn construct(&mut self, value: T) -> Option<NonNull<T>> {
        self.construct_with(|| value)
    }

    /// Creates a value with `f` in a free entry and returns a pointer to it.
    ///
    /// `f` is only called if the pool has a free entry. If the pool is full, this returns `None`
    /// without calling `f`.
    ///
    /// If `f` panics, the entry is returned to the pool before the panic propagates.
    #[must_use]
    pub fn construct_with(&mut self, f: impl FnOnce() -> T) -> Option<NonNull<T>> {
        // SAFETY: The closure fully initializes the value by writing to it.
        unsafe {
            self.construct_in_place(|uninit: &mut MaybeUninit<T>| {
                uninit.write(f());
            })
        }
    }

    /// Initializes a value in a free entry through `f` and returns a pointer to it.
    ///
    /// This avoids creating the value on the stack first, which may matter for large types.
    /// If the pool is full, this returns `None` without calling `f`.
    ///
    /// If `f` panics, the entry is returned to the pool before the panic propagates.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `f` fully initializes the `MaybeUninit<T>` before returning.
    #[must_use]
    pub unsafe fn construct_in_place(
        &mut self,
        f: impl FnOnce(&mut MaybeUninit<T>),
    ) -> Option<NonNull<T>> {
        let entry = self.raw.allocate()?;

        let raw = &mut self.raw;

        // Hand the entry back if initialization panics, so the pool stays consistent.
        let entry = scopeguard::guard(entry, |entry| {
            // SAFETY: The entry was just allocated from this pool and holds no value.
            unsafe { raw.deallocate(entry) };
        });

        let mut uninit_ptr = entry.cast::<MaybeUninit<T>>();

        // SAFETY: The entry is laid out for T and exclusively ours until we return it.
        f(unsafe { uninit_ptr.as_mut() });

        Some(ScopeGuard::into_inner(entry).cast())
    }

    /// Drops the value at `ptr` in place and returns its entry to the pool.
    ///
    /// If dropping the value panics, the entry is still returned to the pool.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not address an entry of this pool.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by a construction method of this pool,
    /// that the value has not been destroyed or taken since and that nothing accesses it
    /// afterwards.
    pub unsafe fn destroy(&mut self, ptr: NonNull<T>) {
        assert!(
            self.contains(ptr),
            "{ptr:?} does not address an entry of this FixedPool"
        );

        let raw = &mut self.raw;

        let _release = scopeguard::guard(ptr, |ptr| {
            // SAFETY: The caller guarantees the entry was allocated from this pool and
            // the value in it has been dropped by the time this runs.
            unsafe { raw.deallocate(ptr.cast()) };
        });

        // SAFETY: The caller guarantees that ptr points to a live T that nobody else uses.
        unsafe {
            ptr.drop_in_place();
        }
    }

    /// Moves the value at `ptr` out of the pool and returns its entry to the pool.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not address an entry of this pool.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by a construction method of this pool,
    /// that the value has not been destroyed or taken since and that nothing accesses it
    /// afterwards.
    #[must_use]
    pub unsafe fn take(&mut self, ptr: NonNull<T>) -> T {
        assert!(
            self.contains(ptr),
            "{ptr:?} does not address an entry of this FixedPool"
        );

        // SAFETY: The caller guarantees that ptr points to a live T that nobody else uses.
        let value = unsafe { ptr.read() };

        // SAFETY: The value has been moved out, so the entry can go back to the pool.
        unsafe {
            self.raw.deallocate(ptr.cast());
        }

        value
    }
}

impl<T, A: BlockAllocator + fmt::Debug> fmt::Debug for FixedPool<T, A> {
    #[cfg_attr(test, mutants::skip)] // Debug output is not part of the contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPool")
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::MIN_BLOCK_ALIGN;

    assert_impl_all!(FixedPool<u32>: Send);
    assert_not_impl_any!(FixedPool<u32>: Sync);
    assert_not_impl_any!(FixedPool<Rc<u32>>: Send, Sync);

    /// Counts how many times values of this type have been dropped.
    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    struct PanicOnDrop;

    impl Drop for PanicOnDrop {
        fn drop(&mut self) {
            panic!("PanicOnDrop dropped");
        }
    }

    #[test]
    fn single_construct_and_destroy() {
        let mut pool = FixedPool::<u32>::new(64).unwrap();

        let value = pool.construct(0xaabb_ccdd).unwrap();

        assert_eq!(value.as_ptr().align_offset(align_of::<u32>()), 0);
        assert_eq!(value.as_ptr().align_offset(MIN_BLOCK_ALIGN), 0);
        assert_eq!(unsafe { value.read() }, 0xaabb_ccdd);

        unsafe { pool.destroy(value) };
        assert!(pool.is_empty());
    }

    #[test]
    fn consecutive_values_are_adjacent() {
        let mut pool = FixedPool::<u32>::new(64).unwrap();

        let first = pool.construct(0x1122_3344).unwrap();
        let second = pool.construct(0x5566_7788).unwrap();

        assert_eq!(second, unsafe { first.add(1) });
        assert_eq!(unsafe { first.read() }, 0x1122_3344);

        unsafe { pool.destroy(first) };
        assert_eq!(unsafe { second.read() }, 0x5566_7788);

        unsafe { pool.destroy(second) };
    }

    #[test]
    fn construct_on_full_pool_returns_none() {
        let mut pool = FixedPool::<u64>::new(1).unwrap();

        let value = pool.construct(1).unwrap();
        assert!(pool.is_full());
        assert!(pool.construct(2).is_none());
        assert_eq!(pool.len(), 1);

        unsafe { pool.destroy(value) };
    }

    #[test]
    fn construct_with_skips_closure_when_full() {
        let mut pool = FixedPool::<u64>::new(1).unwrap();
        let calls = Cell::new(0);

        let value = pool
            .construct_with(|| {
                calls.set(calls.get() + 1);
                5
            })
            .unwrap();

        let rejected = pool.construct_with(|| {
            calls.set(calls.get() + 1);
            6
        });

        assert!(rejected.is_none());
        assert_eq!(calls.get(), 1);

        unsafe { pool.destroy(value) };
    }

    #[test]
    fn construct_in_place_initializes_large_value() {
        let mut pool = FixedPool::<[u64; 128]>::new(2).unwrap();

        let value = unsafe {
            pool.construct_in_place(|uninit: &mut MaybeUninit<[u64; 128]>| {
                uninit.write([7; 128]);
            })
        }
        .unwrap();

        assert!(unsafe { value.as_ref() }.iter().all(|&item| item == 7));

        unsafe { pool.destroy(value) };
    }

    #[test]
    fn destroy_runs_teardown_once() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = FixedPool::<DropCounter>::new(4).unwrap();

        let value = pool
            .construct(DropCounter {
                drops: Rc::clone(&drops),
            })
            .unwrap();
        assert_eq!(drops.get(), 0);

        unsafe { pool.destroy(value) };
        assert_eq!(drops.get(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn take_returns_value_without_dropping_it() {
        let drops = Rc::new(Cell::new(0));
        let mut pool = FixedPool::<DropCounter>::new(4).unwrap();

        let ptr = pool
            .construct(DropCounter {
                drops: Rc::clone(&drops),
            })
            .unwrap();

        let value = unsafe { pool.take(ptr) };
        assert_eq!(drops.get(), 0);
        assert!(pool.is_empty());

        drop(value);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn destroyed_slot_is_reused_first() {
        let mut pool = FixedPool::<u64>::new(8).unwrap();

        let a = pool.construct(1).unwrap();
        let b = pool.construct(2).unwrap();

        unsafe { pool.destroy(a) };

        let c = pool.construct(3).unwrap();
        assert_eq!(a, c);

        unsafe {
            pool.destroy(b);
            pool.destroy(c);
        }
    }

    #[test]
    fn panicking_constructor_returns_entry() {
        let mut pool = FixedPool::<u64>::new(2).unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            _ = pool.construct_with(|| panic!("constructor failed"));
        }));

        assert!(result.is_err());
        assert!(pool.is_empty());
    }

    #[test]
    fn panicking_teardown_returns_entry() {
        let mut pool = FixedPool::<PanicOnDrop>::new(2).unwrap();

        let value = pool.construct(PanicOnDrop).unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { pool.destroy(value) }));

        assert!(result.is_err());
        assert!(pool.is_empty());
    }

    #[test]
    fn stats_reflect_live_values() {
        let mut pool = FixedPool::<u16>::new(3).unwrap();

        let a = pool.construct(1).unwrap();
        let b = pool.construct(2).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.block_count(), 1);
        assert_eq!(stats.allocation_count(), 2);

        unsafe {
            pool.destroy(a);
            pool.destroy(b);
        }

        assert_eq!(pool.stats().allocation_count(), 0);
    }

    #[test]
    #[should_panic]
    fn destroy_foreign_pointer_panics() {
        let mut pool = FixedPool::<u64>::new(2).unwrap();
        let mut foreign = 5_u64;

        unsafe { pool.destroy(NonNull::from(&mut foreign)) };
    }

    #[test]
    #[should_panic]
    fn zero_sized_type_panics() {
        _ = FixedPool::<()>::new(4);
    }

    #[test]
    #[should_panic]
    fn zero_capacity_panics() {
        _ = FixedPool::<u32>::new(0);
    }

    #[test]
    #[should_panic]
    fn drop_with_live_values_panics() {
        let mut pool = FixedPool::<u32>::new(2).unwrap();

        _ = pool.construct(1).unwrap();
    }
}
