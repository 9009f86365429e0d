#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-capacity memory pool for same-size entries.
//!
//! A pool reserves one aligned block of memory for a known maximum number of entries when it is
//! created, then serves individual allocations and deallocations from that block in constant
//! time. This avoids general-purpose allocator overhead and fragmentation for workloads that
//! repeatedly create and destroy objects of the same size.
//!
//! This crate provides two layers:
//!
//! * [`RawFixedPool`] hands out untyped entries via [`allocate()`][1] and takes them back via
//!   [`deallocate()`][2]. Entries are described by a [`std::alloc::Layout`].
//! * [`FixedPool<T>`] wraps a raw pool and constructs or destroys `T` values in place via
//!   [`construct()`][3] and [`destroy()`][4].
//!
//! # Key Features
//!
//! - **Fixed capacity**: The pool never grows. When every entry is in use, allocation returns
//!   `None`, which is an expected outcome rather than an error.
//! - **Intrusive free list**: Vacant entries store the index of the next vacant entry in their own
//!   storage, so no bookkeeping memory is needed beyond the block itself.
//! - **Last-in-first-out reuse**: The most recently freed entry is the next one handed out, which
//!   tends to keep hot entries in cache.
//! - **Cache line alignment**: The block is aligned to at least [`MIN_BLOCK_ALIGN`] bytes.
//! - **Pluggable block source**: The block comes from a [`BlockAllocator`], by default the Rust
//!   global allocator.
//! - **Thread mobility**: Pools can be moved between threads but not shared without
//!   synchronization.
//!
//! # Contract
//!
//! Every allocated entry must be returned to the pool before the pool is dropped. Returning an
//! entry twice or returning a pointer that did not come from the pool are programming errors.
//! Pointers outside the pool are always detected, double frees are detected in builds with
//! debug assertions.
//!
//! # Examples
//!
//! ```
//! use fixed_pool::FixedPool;
//!
//! let mut pool = FixedPool::<u32>::new(64).unwrap();
//!
//! let values: Vec<_> = (0..64_u32)
//!     .map(|i| pool.construct(i * 10).unwrap())
//!     .collect();
//!
//! // Every entry is in use.
//! assert!(pool.construct(0).is_none());
//! assert_eq!(pool.stats().allocation_count(), 64);
//!
//! for value in values {
//!     // SAFETY: Each value came from this pool and is destroyed exactly once.
//!     unsafe { pool.destroy(value) };
//! }
//!
//! assert!(pool.is_empty());
//! ```
//!
//! [1]: RawFixedPool::allocate
//! [2]: RawFixedPool::deallocate
//! [3]: FixedPool::construct
//! [4]: FixedPool::destroy

mod block;
mod builder;
mod error;
mod pool;
mod raw_pool;
mod stats;

pub use block::*;
pub use builder::*;
pub use error::*;
pub use pool::FixedPool;
pub use raw_pool::RawFixedPool;
pub use stats::PoolStats;
