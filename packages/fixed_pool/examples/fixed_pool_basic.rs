//! Basic usage example for `FixedPool` and `RawFixedPool`.
//!
//! This example fills a pool to capacity, frees part of it and shows that the
//! most recently freed entries are handed out again first.

use fixed_pool::{FixedPool, RawFixedPool};

struct Particle {
    position: [f32; 3],
    velocity: [f32; 3],
}

fn main() {
    let mut pool = FixedPool::<Particle>::new(4).expect("pool block must be available");

    println!("Created FixedPool with capacity: {}", pool.capacity());

    let mut particles = Vec::new();

    while let Some(particle) = pool.construct_with(|| Particle {
        position: [0.0; 3],
        velocity: [1.0, 0.5, 0.0],
    }) {
        particles.push(particle);
    }

    println!("Pool is full after {} particles: {}", particles.len(), pool.stats());

    let freed = particles.remove(1);
    let freed_addr = freed.as_ptr().addr();

    // SAFETY: The particle came from this pool and is not used after this.
    unsafe { pool.destroy(freed) };

    let reused = pool
        .construct(Particle {
            position: [9.0; 3],
            velocity: [0.0; 3],
        })
        .expect("an entry was just freed");

    println!(
        "Freed entry {freed_addr:#x} was reused: {}",
        reused.as_ptr().addr() == freed_addr
    );

    particles.push(reused);

    for particle in particles {
        // SAFETY: Each particle came from this pool and is destroyed exactly once.
        let particle = unsafe { pool.take(particle) };
        println!(
            "Particle at {:?} moving {:?}",
            particle.position, particle.velocity
        );
    }

    // The untyped layer works the same way, on plain bytes.
    let mut raw = RawFixedPool::builder()
        .entry_size(48)
        .capacity(16)
        .build()
        .expect("pool block must be available");

    let entry = raw.allocate().expect("a fresh pool has free entries");
    println!(
        "Raw entry at {:#x}, stride {} bytes, {}",
        entry.as_ptr().addr(),
        raw.entry_stride(),
        raw.stats()
    );

    // SAFETY: The entry came from this pool and is not used after this.
    unsafe { raw.deallocate(entry) };
}
