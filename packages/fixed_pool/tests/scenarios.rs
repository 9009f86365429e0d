//! Integration tests for the `fixed_pool` package.
//!
//! These tests exercise the public API of `RawFixedPool` and `FixedPool<T>` through longer
//! sequences of allocations and deallocations, checking capacity, addressing, reuse order and
//! value integrity along the way.
#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same safety rigor as production code"
)]

use std::collections::HashSet;
use std::ptr::NonNull;

use fixed_pool::{FixedPool, MIN_BLOCK_ALIGN, RawFixedPool};

const CAPACITY: usize = 64;

/// Fills a pool of 64 `u32` values with `1 << (i % 32)` for every index `i`, so the bit
/// pattern wraps around at index 32.
fn fill_with_powers_of_two(pool: &mut FixedPool<u32>) -> Vec<Option<NonNull<u32>>> {
    (0..CAPACITY)
        .map(|i| {
            let value = 1_u32 << (i % 32);
            let ptr = pool.construct(value).expect("pool has room for every index");
            assert_eq!(unsafe { ptr.read() }, value);
            Some(ptr)
        })
        .collect()
}

fn destroy_all(pool: &mut FixedPool<u32>, values: Vec<Option<NonNull<u32>>>) {
    for ptr in values.into_iter().flatten() {
        unsafe { pool.destroy(ptr) };
    }
}

#[test]
fn fill_and_read_back() {
    let mut pool = FixedPool::<u32>::new(CAPACITY).unwrap();
    let values = fill_with_powers_of_two(&mut pool);

    let stats = pool.stats();
    assert_eq!(stats.block_count(), 1);
    assert_eq!(stats.allocation_count(), CAPACITY);

    for (i, ptr) in values.iter().enumerate() {
        assert_eq!(unsafe { ptr.unwrap().read() }, 1_u32 << (i % 32));
    }

    destroy_all(&mut pool, values);
}

#[test]
fn freeing_odd_entries_keeps_even_values() {
    let mut pool = FixedPool::<u32>::new(CAPACITY).unwrap();
    let mut values = fill_with_powers_of_two(&mut pool);

    for i in (1..CAPACITY).step_by(2) {
        let ptr = values[i].take().unwrap();
        unsafe { pool.destroy(ptr) };
    }

    let stats = pool.stats();
    assert_eq!(stats.block_count(), 1);
    assert_eq!(stats.allocation_count(), 32);

    for i in (0..CAPACITY).step_by(2) {
        assert_eq!(unsafe { values[i].unwrap().read() }, 1_u32 << (i % 32));
    }

    destroy_all(&mut pool, values);
}

#[test]
fn refill_reuses_most_recently_freed_entries_in_reverse_order() {
    let mut pool = FixedPool::<u32>::new(CAPACITY).unwrap();
    let mut values = fill_with_powers_of_two(&mut pool);

    let mut freed = Vec::new();
    for i in (1..CAPACITY).step_by(2) {
        let ptr = values[i].take().unwrap();
        freed.push(ptr);
        unsafe { pool.destroy(ptr) };
    }

    // Allocate 16 new values into the first 16 odd positions.
    for (n, i) in (1..32).step_by(2).enumerate() {
        assert!(values[i].is_none());

        let ptr = pool.construct(1_u32 << i).unwrap();

        // The most recently freed entry comes back first.
        assert_eq!(ptr, freed[freed.len() - 1 - n]);
        values[i] = Some(ptr);
    }

    let stats = pool.stats();
    assert_eq!(stats.block_count(), 1);
    assert_eq!(stats.allocation_count(), 48);

    for i in 32..CAPACITY {
        if let Some(ptr) = values[i].take() {
            unsafe { pool.destroy(ptr) };
        }
    }

    assert_eq!(pool.stats().allocation_count(), 32);

    destroy_all(&mut pool, values);

    let stats = pool.stats();
    assert_eq!(stats.block_count(), 1);
    assert_eq!(stats.allocation_count(), 0);
}

#[test]
fn allocation_beyond_capacity_returns_none() {
    let mut pool = RawFixedPool::builder()
        .entry_size(24)
        .capacity(10)
        .build()
        .unwrap();

    let entries: Vec<_> = (0..10).map(|_| pool.allocate().unwrap()).collect();

    assert!(pool.allocate().is_none());
    assert_eq!(pool.stats().allocation_count(), 10);

    for entry in entries {
        unsafe { pool.deallocate(entry) };
    }
}

#[test]
fn live_entries_are_distinct_and_within_the_block() {
    let mut pool = RawFixedPool::builder()
        .layout_of::<u64>()
        .capacity(CAPACITY)
        .build()
        .unwrap();

    let entries: Vec<_> = (0..CAPACITY).map(|_| pool.allocate().unwrap()).collect();

    let first = entries
        .iter()
        .map(|entry| entry.as_ptr().addr())
        .min()
        .unwrap();
    assert_eq!(first % MIN_BLOCK_ALIGN, 0);

    let block_end = first + CAPACITY * pool.entry_stride();

    let mut seen = HashSet::new();
    for entry in &entries {
        let addr = entry.as_ptr().addr();
        assert!((first..block_end).contains(&addr));
        assert_eq!(addr % align_of::<u64>(), 0);
        assert!(seen.insert(addr), "entry {addr:#x} handed out twice");
    }

    for entry in entries {
        unsafe { pool.deallocate(entry) };
    }
}

#[test]
fn conservation_holds_through_interleaved_use() {
    let mut pool = RawFixedPool::builder()
        .entry_size(16)
        .capacity(32)
        .build()
        .unwrap();

    let mut live = Vec::new();

    for round in 0..500_usize {
        // A deterministic pattern with phases of growth and shrinkage.
        let grow = (round / 40) % 2 == 0 || round % 7 == 0;

        if grow {
            if let Some(entry) = pool.allocate() {
                live.push(entry);
            }
        } else if !live.is_empty() {
            let entry = live.swap_remove(round % live.len());
            unsafe { pool.deallocate(entry) };
        }

        assert_eq!(pool.stats().allocation_count(), live.len());
        assert_eq!(pool.len() + pool.free_count(), pool.capacity());
    }

    for entry in live {
        unsafe { pool.deallocate(entry) };
    }
}

#[test]
fn values_survive_unrelated_churn() {
    let mut pool = FixedPool::<[u64; 4]>::new(16).unwrap();

    let anchor = pool.construct([1, 2, 3, 4]).unwrap();

    for round in 0..100_u64 {
        let a = pool.construct([round; 4]).unwrap();
        let b = pool.construct([round + 1; 4]).unwrap();

        unsafe {
            assert_eq!(a.read(), [round; 4]);
            pool.destroy(a);
            assert_eq!(b.read(), [round + 1; 4]);
            pool.destroy(b);
        }

        assert_eq!(unsafe { anchor.read() }, [1, 2, 3, 4]);
    }

    unsafe { pool.destroy(anchor) };
}

#[test]
fn full_cycle_restores_a_fresh_pool() {
    let mut pool = RawFixedPool::builder()
        .layout_of::<u32>()
        .capacity(CAPACITY)
        .build()
        .unwrap();

    let first_round: Vec<_> = (0..CAPACITY).map(|_| pool.allocate().unwrap()).collect();
    let expected: HashSet<_> = first_round.iter().copied().collect();

    // Free in an order that is neither allocation order nor its reverse.
    for i in (0..CAPACITY)
        .step_by(3)
        .chain((1..CAPACITY).step_by(3))
        .chain((2..CAPACITY).step_by(3))
    {
        unsafe { pool.deallocate(first_round[i]) };
    }

    assert_eq!(pool.stats().allocation_count(), 0);

    let second_round: Vec<_> = (0..CAPACITY).map(|_| pool.allocate().unwrap()).collect();
    let observed: HashSet<_> = second_round.iter().copied().collect();

    assert_eq!(observed, expected);
    assert!(pool.allocate().is_none());

    for entry in second_round {
        unsafe { pool.deallocate(entry) };
    }
}

#[test]
fn pool_can_move_to_another_thread() {
    let mut pool = FixedPool::<String>::new(4).unwrap();
    let value = pool.construct("moved".to_string()).unwrap();
    let addr = value.as_ptr().addr();

    let pool = std::thread::spawn(move || {
        assert_eq!(pool.len(), 1);
        pool
    })
    .join()
    .unwrap();

    // The value stays where it was, only the pool moved.
    assert_eq!(value.as_ptr().addr(), addr);
    assert!(pool.contains(value));

    let mut pool = pool;
    let text = unsafe { pool.take(value) };
    assert_eq!(text, "moved");
}

#[test]
fn large_typed_pool_fills_and_drains() {
    const LARGE_CAPACITY: usize = 20_000;

    let mut pool = FixedPool::<u32>::new(LARGE_CAPACITY).unwrap();

    let values: Vec<_> = (0..LARGE_CAPACITY)
        .map(|i| pool.construct(u32::try_from(i).unwrap()).unwrap())
        .collect();

    assert!(pool.is_full());

    for (i, value) in values.into_iter().enumerate() {
        assert_eq!(unsafe { pool.take(value) }, u32::try_from(i).unwrap());
    }

    assert!(pool.is_empty());
}
