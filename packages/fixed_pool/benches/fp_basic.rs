//! Basic benchmarks for the `fixed_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use fixed_pool::FixedPool;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

type TestItem = usize;
const TEST_VALUE: TestItem = 1024;

const CAPACITY: usize = 10_000;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fp_basic");

    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(FixedPool::<TestItem>::new(CAPACITY).unwrap()));
            }

            start.elapsed()
        });
    });

    group.bench_function("construct_destroy_one", |b| {
        b.iter_custom(|iters| {
            let mut pool = FixedPool::<TestItem>::new(1).unwrap();

            let start = Instant::now();

            for _ in 0..iters {
                let ptr = pool.construct(black_box(TEST_VALUE)).unwrap();

                // SAFETY: The value was constructed just above and is not used after this.
                unsafe { pool.destroy(black_box(ptr)) };
            }

            start.elapsed()
        });
    });

    group.bench_function("box_new_drop_one", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(Box::new(black_box(TEST_VALUE))));
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("fp_slow");

    group.bench_function("fill_10k", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| FixedPool::<TestItem>::new(CAPACITY).unwrap())
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let mut ptr_sets = Vec::with_capacity(pools.len());

            let start = Instant::now();

            for pool in &mut pools {
                let ptrs = iter::repeat_with(|| pool.construct(black_box(TEST_VALUE)).unwrap())
                    .take(CAPACITY)
                    .collect::<Vec<_>>();

                ptr_sets.push(ptrs);
            }

            let elapsed = start.elapsed();

            for (pool, ptrs) in pools.iter_mut().zip(ptr_sets) {
                for ptr in ptrs {
                    // SAFETY: Each value came from this pool and is destroyed exactly once.
                    unsafe { pool.destroy(ptr) };
                }
            }

            elapsed
        });
    });

    group.bench_function("forward_10_back_5_times_1000", |b| {
        // We add 10 items, remove the first 5 and repeat this 1000 times.
        // This mixes reuse of freed entries with first use of untouched ones.
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| FixedPool::<TestItem>::new(CAPACITY).unwrap())
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let mut to_remove = Vec::with_capacity(5);
            let mut to_keep = Vec::with_capacity(5000);

            let start = Instant::now();

            for pool in &mut pools {
                to_keep.clear();

                for _ in 0..1000 {
                    to_remove.clear();

                    for _ in 0..5 {
                        to_remove.push(pool.construct(black_box(TEST_VALUE)).unwrap());
                    }

                    for _ in 0..5 {
                        to_keep.push(pool.construct(black_box(TEST_VALUE)).unwrap());
                    }

                    #[expect(clippy::iter_with_drain, reason = "to reuse the allocation")]
                    for ptr in to_remove.drain(..) {
                        // SAFETY: Each value came from this pool and is destroyed exactly once.
                        unsafe { pool.destroy(ptr) };
                    }
                }

                #[expect(clippy::iter_with_drain, reason = "to reuse the allocation")]
                for ptr in to_keep.drain(..) {
                    // SAFETY: Each value came from this pool and is destroyed exactly once.
                    unsafe { pool.destroy(ptr) };
                }
            }

            start.elapsed()
        });
    });

    group.finish();
}
