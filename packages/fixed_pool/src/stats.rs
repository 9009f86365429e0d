use std::fmt;

/// A point-in-time summary of pool occupancy, returned by [`RawFixedPool::stats()`][1].
///
/// [1]: crate::RawFixedPool::stats
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct PoolStats {
    block_count: usize,
    allocation_count: usize,
}

impl PoolStats {
    #[must_use]
    pub(crate) fn new(block_count: usize, allocation_count: usize) -> Self {
        Self {
            block_count,
            allocation_count,
        }
    }

    /// Number of memory blocks backing the pool.
    ///
    /// A pool is always backed by exactly one block, so this is always 1.
    #[must_use]
    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Number of entries currently allocated from the pool.
    #[must_use]
    #[inline]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }
}

impl fmt::Display for PoolStats {
    #[cfg_attr(test, mutants::skip)] // Human-readable output, not part of the contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} allocations in {} block(s)",
            self.allocation_count, self.block_count
        )
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(PoolStats: Send, Sync, Copy);

    #[test]
    fn accessors_return_constructed_values() {
        let stats = PoolStats::new(1, 17);

        assert_eq!(stats.block_count(), 1);
        assert_eq!(stats.allocation_count(), 17);
    }
}
