use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use tracing::{debug, warn};

use crate::{
    BlockAllocator, Error, MIN_BLOCK_ALIGN, PoolStats, RawFixedPoolBuilder, Result,
    SystemBlockAllocator,
};

/// The representation of a free list link stored in the first bytes of a vacant entry.
///
/// Using a 32-bit index keeps 4-byte entries densely packed.
type Link = u32;

const LINK_SIZE: usize = size_of::<Link>();

/// Number of entries tracked by one word of the debug occupancy bitset.
#[cfg(debug_assertions)]
const OCCUPANCY_WORD_BITS: usize = u64::BITS as usize;

/// A fixed-capacity pool of untyped, same-size memory entries.
///
/// The pool reserves one contiguous block for `capacity` entries when it is created and never
/// grows or shrinks afterwards. Each entry is handed out by [`allocate()`][1] and returned by
/// [`deallocate()`][2] in constant time.
///
/// # Free list
///
/// Vacant entries form an intrusive singly linked list: the first 4 bytes of each vacant entry
/// hold the index of the next vacant entry, with `capacity` marking the end of the list. The
/// pool never reads or writes the storage of an allocated entry.
///
/// The list is last-in-first-out. An entry that was just deallocated is the next one that
/// [`allocate()`][1] returns.
///
/// # Entry geometry
///
/// Entries are `entry_stride()` bytes apart, which is the entry size rounded up to at least 4 bytes
/// (to fit a link) and to the entry alignment. The block itself is aligned to at least
/// [`MIN_BLOCK_ALIGN`], so the first entry starts on a cache line boundary.
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) if its block allocator is, but not thread-safe
/// ([`Sync`]). Use external synchronization to share a pool between threads.
///
/// # Examples
///
/// ```
/// use fixed_pool::RawFixedPool;
///
/// let mut pool = RawFixedPool::builder()
///     .layout_of::<u64>()
///     .capacity(16)
///     .build()
///     .unwrap();
///
/// let entry = pool.allocate().expect("a fresh pool has free entries");
///
/// // SAFETY: The entry is sized and aligned for a u64 and nobody else uses it.
/// unsafe {
///     entry.cast::<u64>().write(42);
///     assert_eq!(entry.cast::<u64>().read(), 42);
/// }
///
/// assert_eq!(pool.stats().allocation_count(), 1);
///
/// // SAFETY: The entry came from this pool and is not used after this.
/// unsafe { pool.deallocate(entry) };
/// ```
///
/// [1]: Self::allocate
/// [2]: Self::deallocate
#[derive(Debug)]
pub struct RawFixedPool<A: BlockAllocator = SystemBlockAllocator> {
    /// Maximum number of entries. Also the sentinel value that terminates the free list.
    capacity: NonZero<usize>,

    /// Layout requested by the creator of the pool for a single entry.
    entry_layout: Layout,

    layout: PoolLayout,

    /// Start of the block. Entry `i` starts at `block + i * entry_stride`.
    block: NonNull<u8>,

    /// Index of the first vacant entry, or `capacity` if there is none.
    free_head: usize,

    /// Number of vacant entries, always equal to the length of the free list.
    free_count: usize,

    /// One bit per entry, set while the entry is allocated. Lets deallocation detect double
    /// frees without walking the free list.
    #[cfg(debug_assertions)]
    occupancy: Vec<u64>,

    allocator: A,
}

/// Layout calculations for a [`RawFixedPool`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct PoolLayout {
    /// Distance in bytes between the starts of two consecutive entries.
    entry_stride: usize,

    /// Layout of the whole block, `capacity * entry_stride` bytes.
    block_layout: Layout,
}

impl PoolLayout {
    /// Calculates the layout of a pool holding `capacity` entries of `entry_layout`.
    ///
    /// # Panics
    ///
    /// Panics if the entry layout is zero-sized.
    fn calculate(entry_layout: Layout, capacity: NonZero<usize>) -> Result<Self> {
        assert!(
            entry_layout.size() > 0,
            "RawFixedPool cannot be created for zero-sized entries"
        );

        // Every vacant entry stores a link, so it needs at least that much room.
        let entry_stride =
            Layout::from_size_align(entry_layout.size().max(LINK_SIZE), entry_layout.align())
                .expect("growing a valid layout to link size cannot exceed the limits of Layout")
                .pad_to_align()
                .size();

        let too_large = || Error::CapacityTooLarge {
            capacity: capacity.get(),
            entry_stride,
        };

        // The sentinel is `capacity` itself, so it must be representable as a link.
        if Link::try_from(capacity.get()).is_err() {
            return Err(too_large());
        }

        let block_size = entry_stride
            .checked_mul(capacity.get())
            .ok_or_else(too_large)?;

        let Ok(block_layout) =
            Layout::from_size_align(block_size, entry_layout.align().max(MIN_BLOCK_ALIGN))
        else {
            return Err(too_large());
        };

        Ok(Self {
            entry_stride,
            block_layout,
        })
    }
}

impl RawFixedPool {
    /// Creates a builder for a new [`RawFixedPool`].
    ///
    /// The entry layout and the capacity are mandatory, the block allocator is optional.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_pool::RawFixedPool;
    ///
    /// let pool = RawFixedPool::builder()
    ///     .entry_size(24)
    ///     .capacity(1000)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.capacity(), 1000);
    /// ```
    #[inline]
    pub fn builder() -> RawFixedPoolBuilder {
        RawFixedPoolBuilder::new()
    }
}

impl<A: BlockAllocator> RawFixedPool<A> {
    /// Reserves the block and threads all entries onto the free list in index order.
    pub(crate) fn new_in(
        entry_layout: Layout,
        capacity: NonZero<usize>,
        allocator: A,
    ) -> Result<Self> {
        let layout = PoolLayout::calculate(entry_layout, capacity)?;

        let Some(block) = allocator.allocate_aligned(layout.block_layout) else {
            warn!(
                size = layout.block_layout.size(),
                align = layout.block_layout.align(),
                "block allocator could not supply a pool block"
            );

            return Err(Error::AllocationFailed {
                size: layout.block_layout.size(),
                align: layout.block_layout.align(),
            });
        };

        debug_assert!(
            block.as_ptr().align_offset(layout.block_layout.align()) == 0,
            "block allocator returned a misaligned block"
        );

        let mut pool = Self {
            capacity,
            entry_layout,
            layout,
            block,
            free_head: 0,
            free_count: capacity.get(),
            #[cfg(debug_assertions)]
            occupancy: vec![0; capacity.get().div_ceil(OCCUPANCY_WORD_BITS)],
            allocator,
        };

        for index in 0..capacity.get() {
            // Cannot overflow because capacity fits in a link.
            pool.write_link(index, index.wrapping_add(1));
        }

        debug!(
            capacity = capacity.get(),
            entry_stride = layout.entry_stride,
            block_size = layout.block_layout.size(),
            block_align = layout.block_layout.align(),
            "reserved pool block"
        );

        Ok(pool)
    }

    /// The maximum number of entries that can be allocated at the same time.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// The layout of a single entry, as requested when the pool was created.
    #[must_use]
    #[inline]
    pub fn entry_layout(&self) -> Layout {
        self.entry_layout
    }

    /// The distance in bytes between the starts of two consecutive entries.
    ///
    /// This is at least the entry size and at least 4 bytes, rounded up to the entry alignment.
    #[must_use]
    #[inline]
    pub fn entry_stride(&self) -> usize {
        self.layout.entry_stride
    }

    /// The number of entries currently allocated.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        // Cannot overflow because free_count never exceeds capacity.
        self.capacity.get().wrapping_sub(self.free_count)
    }

    /// The number of entries that can still be allocated.
    #[must_use]
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Whether no entries are currently allocated.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.free_count == self.capacity.get()
    }

    /// Whether every entry is allocated, so [`allocate()`][1] would return `None`.
    ///
    /// [1]: Self::allocate
    #[must_use]
    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_count == 0
    }

    /// Returns occupancy statistics for the pool.
    #[must_use]
    #[inline]
    pub fn stats(&self) -> PoolStats {
        PoolStats::new(1, self.len())
    }

    /// Whether `ptr` is the start of one of the entries of this pool.
    ///
    /// This says nothing about whether the entry is currently allocated.
    #[must_use]
    #[inline]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.entry_index(ptr).is_some()
    }

    /// Allocates an entry and returns a pointer to the start of its storage.
    ///
    /// Returns `None` if every entry is already allocated. This is an expected outcome that the
    /// caller must handle, not an error, and it leaves the pool unchanged.
    ///
    /// The storage of the returned entry is uninitialized from the caller's point of view. It is
    /// valid for reads and writes of [`entry_stride()`][1] bytes and aligned to the entry
    /// alignment until it is passed to [`deallocate()`][2] or the pool is dropped.
    ///
    /// [1]: Self::entry_stride
    /// [2]: Self::deallocate
    #[must_use]
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        if self.free_count == 0 {
            return None;
        }

        // Pop the head of the free list.
        let index = self.free_head;
        self.free_head = self.read_link(index);

        // Cannot underflow because we checked for zero above.
        self.free_count = self.free_count.wrapping_sub(1);

        #[cfg(debug_assertions)]
        {
            let was_allocated = self.set_occupied(index, true);
            debug_assert!(
                !was_allocated,
                "free list of RawFixedPool of capacity {} handed out allocated entry {index}",
                self.capacity.get()
            );
        }

        Some(self.entry_ptr(index))
    }

    /// Returns an entry to the pool, making it the next entry that [`allocate()`][1] hands out.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not the start of an entry of this pool.
    ///
    /// In builds with debug assertions, panics if the entry is not currently allocated.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by [`allocate()`][1] on this pool, has not
    /// been deallocated since and that nothing accesses the entry's storage afterwards.
    ///
    /// [1]: Self::allocate
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        let index = self.index_of(ptr);

        assert!(
            self.free_count < self.capacity.get(),
            "deallocate({index}) called on a RawFixedPool of capacity {} with no allocated entries",
            self.capacity.get()
        );

        #[cfg(debug_assertions)]
        {
            let was_allocated = self.set_occupied(index, false);
            assert!(
                was_allocated,
                "deallocate({index}) entry was already vacant in RawFixedPool of capacity {}",
                self.capacity.get()
            );
        }

        // Push the entry onto the free list.
        let next_free_index = self.free_head;
        self.write_link(index, next_free_index);
        self.free_head = index;

        // Cannot overflow because we asserted above that some entry was allocated.
        self.free_count = self.free_count.wrapping_add(1);
    }

    /// Returns a pointer to the start of the entry at `index`.
    fn entry_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.capacity.get(),
            "entry {index} index out of bounds in RawFixedPool of capacity {}",
            self.capacity.get()
        );

        // Cannot overflow because that would imply the block extends beyond virtual memory.
        let offset = index.wrapping_mul(self.layout.entry_stride);

        // SAFETY: The block is valid for capacity * entry_stride bytes and the index
        // is bounds checked above, so the offset stays within the block.
        unsafe { self.block.byte_add(offset) }
    }

    /// Returns the index of the entry that starts at `ptr`.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not the start of an entry of this pool.
    fn index_of(&self, ptr: NonNull<u8>) -> usize {
        self.entry_index(ptr).unwrap_or_else(|| {
            panic!(
                "{ptr:?} is not the start of an entry in RawFixedPool at {:?} of capacity {}",
                self.block,
                self.capacity.get()
            )
        })
    }

    #[expect(
        clippy::integer_division,
        clippy::modulo_arithmetic,
        reason = "entry indexes are whole multiples of the stride, checked by the remainder"
    )]
    fn entry_index(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = ptr.as_ptr().addr().checked_sub(self.block.as_ptr().addr())?;

        if offset >= self.layout.block_layout.size() || offset % self.layout.entry_stride != 0 {
            return None;
        }

        Some(offset / self.layout.entry_stride)
    }

    /// Reads the link stored in the vacant entry at `index`.
    fn read_link(&self, index: usize) -> usize {
        let link_ptr = self.entry_ptr(index).cast::<Link>();

        // SAFETY: Every entry is at least LINK_SIZE bytes long and the entry at `index` is
        // vacant, so its first bytes hold a link that we wrote earlier. Links are not
        // necessarily aligned for Link, hence the unaligned read.
        let link = unsafe { link_ptr.read_unaligned() };

        link as usize
    }

    /// Stores a link in the entry at `index`, which must not be in use by a caller.
    #[expect(clippy::needless_pass_by_ref_mut, reason = "writes through the block pointer")]
    fn write_link(&mut self, index: usize, next_free_index: usize) {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "capacity is validated to fit in a link, so every index and the sentinel do"
        )]
        let link = next_free_index as Link;

        let link_ptr = self.entry_ptr(index).cast::<Link>();

        // SAFETY: Every entry is at least LINK_SIZE bytes long and the caller no longer owns
        // the entry at `index`. The write is unaligned because entries may have alignment 1.
        unsafe {
            link_ptr.write_unaligned(link);
        }
    }

    /// Marks the entry at `index` as allocated or vacant, returning whether it was allocated.
    #[cfg(debug_assertions)]
    #[allow(
        clippy::indexing_slicing,
        clippy::integer_division,
        clippy::modulo_arithmetic,
        clippy::arithmetic_side_effects,
        reason = "index is a valid entry index, so its word exists and the shift is in range"
    )]
    fn set_occupied(&mut self, index: usize, allocated: bool) -> bool {
        let word = &mut self.occupancy[index / OCCUPANCY_WORD_BITS];
        let mask = 1_u64 << (index % OCCUPANCY_WORD_BITS);
        let was_allocated = *word & mask != 0;

        if allocated {
            *word |= mask;
        } else {
            *word &= !mask;
        }

        was_allocated
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    /// Verifies that the free list is a single chain of exactly `free_count` distinct entries
    /// ending in the sentinel, and that no entry on it is marked as allocated.
    ///
    /// This walks the whole free list, so tests call it at the points they want checked.
    #[allow(
        clippy::indexing_slicing,
        clippy::integer_division,
        clippy::modulo_arithmetic,
        clippy::arithmetic_side_effects,
        reason = "integrity check needs array access"
    )]
    pub(crate) fn integrity_check(&self) {
        let capacity_value = self.capacity.get();
        let mut observed_vacant = vec![false; capacity_value];
        let mut observed_vacant_count: usize = 0;
        let mut current = self.free_head;

        while current != capacity_value {
            assert!(
                current < capacity_value,
                "free list link {current} is out of bounds in RawFixedPool of capacity {capacity_value}"
            );

            assert!(
                !observed_vacant[current],
                "free list visits entry {current} twice in RawFixedPool of capacity {capacity_value}"
            );

            #[cfg(debug_assertions)]
            {
                let word = self.occupancy[current / OCCUPANCY_WORD_BITS];
                let mask = 1_u64 << (current % OCCUPANCY_WORD_BITS);

                assert!(
                    word & mask == 0,
                    "free list entry {current} is marked as allocated in RawFixedPool of capacity {capacity_value}"
                );
            }

            observed_vacant[current] = true;
            observed_vacant_count += 1;
            current = self.read_link(current);
        }

        assert!(
            self.free_count == observed_vacant_count,
            "self.free_count {} does not match the observed free list length {} in RawFixedPool of capacity {}",
            self.free_count,
            observed_vacant_count,
            capacity_value,
        );
    }
}

impl<A: BlockAllocator> Drop for RawFixedPool<A> {
    fn drop(&mut self) {
        let live_entries = self.len();

        // SAFETY: The block was allocated by this allocator with this layout in new_in()
        // and this is the only place that releases it.
        unsafe {
            self.allocator
                .free_aligned(self.block, self.layout.block_layout);
        }

        debug!(
            capacity = self.capacity.get(),
            live_entries, "released pool block"
        );

        // We check at the end so the memory is released first. If we are already panicking,
        // we do not want to panic again because that would obscure the original panic.
        if !thread::panicking() {
            assert!(
                live_entries == 0,
                "dropped a RawFixedPool with {live_entries} allocated entries - every entry must be deallocated first"
            );
        }
    }
}

// SAFETY: The pool exclusively owns its block and hands out only raw pointers, so nothing in it
// is tied to the thread that created it. Moving the allocator along requires it to be Send.
unsafe impl<A: BlockAllocator + Send> Send for RawFixedPool<A> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(RawFixedPool: Send);
    assert_not_impl_any!(RawFixedPool: Sync);

    fn pool_of<T>(capacity: usize) -> RawFixedPool {
        RawFixedPool::builder()
            .layout_of::<T>()
            .capacity(capacity)
            .build()
            .unwrap()
    }

    /// Refuses every block request and counts how often it was asked.
    #[derive(Debug, Default)]
    struct RefusingAllocator {
        requests: Rc<Cell<usize>>,
    }

    unsafe impl BlockAllocator for RefusingAllocator {
        fn allocate_aligned(&self, _layout: Layout) -> Option<NonNull<u8>> {
            self.requests.set(self.requests.get() + 1);
            None
        }

        unsafe fn free_aligned(&self, _ptr: NonNull<u8>, _layout: Layout) {
            panic!("free_aligned() called without a successful allocate_aligned()");
        }
    }

    /// Forwards to the system allocator and counts released blocks.
    #[derive(Debug, Default)]
    struct CountingAllocator {
        released: Rc<Cell<usize>>,
    }

    unsafe impl BlockAllocator for CountingAllocator {
        fn allocate_aligned(&self, layout: Layout) -> Option<NonNull<u8>> {
            SystemBlockAllocator.allocate_aligned(layout)
        }

        unsafe fn free_aligned(&self, ptr: NonNull<u8>, layout: Layout) {
            self.released.set(self.released.get() + 1);
            unsafe { SystemBlockAllocator.free_aligned(ptr, layout) };
        }
    }

    #[test]
    fn smoke_test() {
        let mut pool = pool_of::<u32>(3);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        unsafe {
            a.cast::<u32>().write(42);
            b.cast::<u32>().write(43);
            c.cast::<u32>().write(44);
        }

        assert_eq!(pool.len(), 3);
        assert!(pool.is_full());

        unsafe { pool.deallocate(b) };
        assert_eq!(pool.len(), 2);

        let d = pool.allocate().unwrap();
        unsafe { d.cast::<u32>().write(45) };

        unsafe {
            assert_eq!(a.cast::<u32>().read(), 42);
            assert_eq!(c.cast::<u32>().read(), 44);
            assert_eq!(d.cast::<u32>().read(), 45);
        }

        unsafe {
            pool.deallocate(a);
            pool.deallocate(c);
            pool.deallocate(d);
        }

        assert!(pool.is_empty());
    }

    #[test]
    fn fresh_pool_allocates_in_index_order() {
        let mut pool = pool_of::<u32>(4);

        let entries: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();

        for (index, entry) in entries.iter().enumerate() {
            assert_eq!(pool.entry_index(*entry), Some(index));
        }

        for entry in entries {
            unsafe { pool.deallocate(entry) };
        }
    }

    #[test]
    fn four_byte_entries_are_adjacent() {
        let mut pool = pool_of::<u32>(64);

        let first = pool.allocate().unwrap();
        let second = pool.allocate().unwrap();

        assert_eq!(pool.entry_stride(), 4);
        assert_eq!(second.as_ptr().addr() - first.as_ptr().addr(), 4);

        unsafe {
            pool.deallocate(first);
            pool.deallocate(second);
        }
    }

    #[test]
    fn exhausted_pool_returns_none() {
        let mut pool = pool_of::<u64>(2);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        assert!(pool.allocate().is_none());
        assert!(pool.allocate().is_none());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.free_count(), 0);

        unsafe {
            pool.deallocate(a);
            pool.deallocate(b);
        }
    }

    #[test]
    fn deallocate_into_exhausted_pool_is_reused() {
        let mut pool = pool_of::<u64>(1);

        let a = pool.allocate().unwrap();
        assert!(pool.allocate().is_none());

        unsafe { pool.deallocate(a) };

        let b = pool.allocate().unwrap();
        assert_eq!(a, b);
        assert!(pool.allocate().is_none());

        unsafe { pool.deallocate(b) };
    }

    #[test]
    fn most_recently_freed_entry_is_reused_first() {
        let mut pool = pool_of::<u64>(8);

        let entries: Vec<_> = (0..8).map(|_| pool.allocate().unwrap()).collect();

        unsafe {
            pool.deallocate(entries[2]);
            pool.deallocate(entries[5]);
            pool.deallocate(entries[7]);
        }

        assert_eq!(pool.allocate(), Some(entries[7]));
        assert_eq!(pool.allocate(), Some(entries[5]));
        assert_eq!(pool.allocate(), Some(entries[2]));
        assert!(pool.allocate().is_none());

        for entry in entries {
            unsafe { pool.deallocate(entry) };
        }
    }

    #[test]
    fn first_entry_is_cache_line_aligned() {
        let mut pool = pool_of::<u8>(10);

        let entry = pool.allocate().unwrap();
        assert_eq!(entry.as_ptr().addr() % MIN_BLOCK_ALIGN, 0);

        unsafe { pool.deallocate(entry) };
    }

    #[test]
    fn over_aligned_entries_keep_their_alignment() {
        #[repr(C, align(128))]
        #[allow(dead_code, reason = "only the layout matters")]
        struct Wide {
            data: [u8; 3],
        }

        let mut pool = pool_of::<Wide>(3);
        assert_eq!(pool.entry_stride(), 128);

        let entries: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();

        for entry in &entries {
            assert_eq!(entry.as_ptr().addr() % 128, 0);
        }

        for entry in entries {
            unsafe { pool.deallocate(entry) };
        }
    }

    #[test]
    fn small_entries_are_widened_to_fit_a_link() {
        let mut pool = pool_of::<u8>(100);
        assert_eq!(pool.entry_stride(), LINK_SIZE);

        let entries: Vec<_> = (0..100_u8)
            .map(|value| {
                let entry = pool.allocate().unwrap();
                unsafe { entry.write(value) };
                entry
            })
            .collect();

        for (value, entry) in entries.iter().enumerate() {
            assert_eq!(usize::from(unsafe { entry.read() }), value);
        }

        for entry in entries {
            unsafe { pool.deallocate(entry) };
        }
    }

    #[test]
    fn odd_sized_entries_use_unaligned_links() {
        let mut pool = RawFixedPool::builder()
            .entry_size(7)
            .capacity(5)
            .build()
            .unwrap();

        assert_eq!(pool.entry_stride(), 7);

        let entries: Vec<_> = (0..5).map(|_| pool.allocate().unwrap()).collect();

        for entry in entries.iter().rev() {
            unsafe { pool.deallocate(*entry) };
        }

        assert_eq!(pool.allocate(), Some(entries[0]));
        unsafe { pool.deallocate(entries[0]) };
    }

    #[test]
    fn stats_track_allocations() {
        let mut pool = pool_of::<u32>(5);
        assert_eq!(pool.stats(), PoolStats::new(1, 0));

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_eq!(pool.stats(), PoolStats::new(1, 2));
        assert_eq!(pool.len() + pool.free_count(), pool.capacity());

        unsafe { pool.deallocate(a) };
        assert_eq!(pool.stats(), PoolStats::new(1, 1));

        unsafe { pool.deallocate(b) };
        assert_eq!(pool.stats(), PoolStats::new(1, 0));
    }

    #[test]
    fn contains_recognizes_only_entry_starts() {
        let mut pool = pool_of::<u64>(4);
        let mut other = pool_of::<u64>(4);

        let entry = pool.allocate().unwrap();
        let foreign = other.allocate().unwrap();

        assert!(pool.contains(entry));
        assert!(!pool.contains(unsafe { entry.byte_add(1) }));
        assert!(!pool.contains(foreign));
        assert!(!pool.contains(unsafe { entry.byte_add(pool.entry_stride() * 4) }));

        unsafe {
            pool.deallocate(entry);
            other.deallocate(foreign);
        }
    }

    #[test]
    #[should_panic]
    fn deallocate_foreign_pointer_panics() {
        let mut pool = pool_of::<u64>(4);
        let mut other = pool_of::<u64>(4);

        let _entry = pool.allocate().unwrap();
        let foreign = other.allocate().unwrap();

        unsafe { pool.deallocate(foreign) };
    }

    #[test]
    #[should_panic]
    fn deallocate_misaligned_pointer_panics() {
        let mut pool = pool_of::<u64>(4);

        let entry = pool.allocate().unwrap();

        unsafe { pool.deallocate(entry.byte_add(1)) };
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn double_free_panics() {
        let mut pool = pool_of::<u64>(4);

        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        unsafe {
            pool.deallocate(a);
            pool.deallocate(a);
        }
    }

    #[test]
    #[should_panic]
    fn deallocate_on_empty_pool_panics() {
        let mut pool = pool_of::<u64>(4);

        let a = pool.allocate().unwrap();

        unsafe {
            pool.deallocate(a);
            pool.deallocate(a);
        }
    }

    #[test]
    #[should_panic]
    fn drop_with_allocated_entries_panics() {
        let mut pool = pool_of::<u32>(3);

        // Allocate an entry but do not deallocate it before the pool is dropped.
        _ = pool.allocate().unwrap();
    }

    #[test]
    fn drop_releases_block_exactly_once() {
        let allocator = CountingAllocator::default();
        let released = Rc::clone(&allocator.released);

        let mut pool = RawFixedPool::builder()
            .entry_size(32)
            .capacity(8)
            .allocator(allocator)
            .build()
            .unwrap();

        let entry = pool.allocate().unwrap();
        unsafe { pool.deallocate(entry) };
        assert_eq!(released.get(), 0);

        drop(pool);
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn allocation_failure_is_reported() {
        let allocator = RefusingAllocator::default();
        let requests = Rc::clone(&allocator.requests);

        let result = RawFixedPool::builder()
            .entry_size(16)
            .capacity(64)
            .allocator(allocator)
            .build();

        assert!(matches!(
            result,
            Err(Error::AllocationFailed {
                size: 1024,
                align: MIN_BLOCK_ALIGN
            })
        ));
        assert_eq!(requests.get(), 1);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn capacity_beyond_link_range_is_rejected() {
        let capacity = usize::try_from(u64::from(u32::MAX) + 1).unwrap();

        let result = PoolLayout::calculate(Layout::new::<u32>(), NonZero::new(capacity).unwrap());

        assert!(matches!(result, Err(Error::CapacityTooLarge { .. })));
    }

    #[test]
    fn block_size_overflow_is_rejected() {
        let entry_layout = Layout::from_size_align(usize::MAX / 4, 1).unwrap();

        let result = PoolLayout::calculate(entry_layout, NonZero::new(4).unwrap());

        assert!(matches!(result, Err(Error::CapacityTooLarge { .. })));
    }

    #[test]
    fn layout_calculation_basic() {
        let layout =
            PoolLayout::calculate(Layout::new::<u64>(), NonZero::new(10).unwrap()).unwrap();

        assert_eq!(layout.entry_stride, 8);
        assert_eq!(layout.block_layout.size(), 80);
        assert_eq!(layout.block_layout.align(), MIN_BLOCK_ALIGN);
    }

    #[test]
    fn layout_calculation_pads_to_alignment() {
        #[repr(C, align(8))]
        #[allow(dead_code, reason = "only the layout matters")]
        struct Padded {
            a: u32,
            b: u8,
        }

        let layout =
            PoolLayout::calculate(Layout::new::<Padded>(), NonZero::new(3).unwrap()).unwrap();

        assert_eq!(layout.entry_stride, 8);
        assert_eq!(layout.block_layout.size(), 24);
    }

    #[test]
    #[should_panic]
    fn layout_calculation_zero_size_panics() {
        let zero_layout = Layout::from_size_align(0, 1).unwrap();
        _ = PoolLayout::calculate(zero_layout, NonZero::new(3).unwrap());
    }

    #[test]
    fn multithreaded_via_mutex() {
        use std::sync::{Arc, Mutex};

        let pool = Arc::new(Mutex::new(pool_of::<u64>(3)));

        let entry_addr = {
            let mut pool = pool.lock().unwrap();
            let entry = pool.allocate().unwrap();
            unsafe { entry.cast::<u64>().write(7) };
            entry.as_ptr().addr()
        };

        let pool_clone = Arc::clone(&pool);
        thread::spawn(move || {
            let mut pool = pool_clone.lock().unwrap();

            let entry = (0..pool.capacity())
                .map(|index| pool.entry_ptr(index))
                .find(|entry| entry.as_ptr().addr() == entry_addr)
                .unwrap();

            assert_eq!(unsafe { entry.cast::<u64>().read() }, 7);
            unsafe { pool.deallocate(entry) };
        })
        .join()
        .unwrap();

        assert!(pool.lock().unwrap().is_empty());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn double_free_below_free_list_head_panics() {
        let mut pool = pool_of::<u64>(4);

        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        unsafe {
            pool.deallocate(a);
            pool.deallocate(c);
            pool.deallocate(a);
        }
    }

    #[test]
    fn large_pool_fills_and_drains() {
        const CAPACITY: usize = 200_000;

        let mut pool = pool_of::<u32>(CAPACITY);

        let entries: Vec<_> = (0..CAPACITY).map(|_| pool.allocate().unwrap()).collect();

        assert!(pool.is_full());
        assert!(pool.allocate().is_none());
        pool.integrity_check();

        for entry in entries.into_iter().rev() {
            unsafe { pool.deallocate(entry) };
        }

        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn integrity_check_accepts_interleaved_use() {
        let mut pool = pool_of::<u32>(16);
        let mut live = Vec::new();

        for round in 0..64_usize {
            if round % 3 == 2 {
                if let Some(entry) = live.pop() {
                    unsafe { pool.deallocate(entry) };
                }
            } else if let Some(entry) = pool.allocate() {
                live.push(entry);
            }

            pool.integrity_check();
            assert_eq!(pool.len(), live.len());
        }

        for entry in live {
            unsafe { pool.deallocate(entry) };
        }
    }
}
