use thiserror::Error;

/// Errors that can occur when creating a pool.
///
/// Running out of free entries is not an error. [`allocate()`][1] and [`construct()`][2]
/// signal exhaustion by returning `None`.
///
/// [1]: crate::RawFixedPool::allocate
/// [2]: crate::FixedPool::construct
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The block allocator could not supply the backing block for the pool.
    #[error("failed to allocate a pool block of {size} bytes with alignment {align}")]
    AllocationFailed {
        /// Requested size of the block, in bytes.
        size: usize,

        /// Requested alignment of the block, in bytes.
        align: usize,
    },

    /// The requested capacity cannot be addressed by the pool, either because the free list
    /// cannot index that many entries or because the block size overflows.
    #[error("capacity {capacity} with entry stride {entry_stride} exceeds what a pool block can hold")]
    CapacityTooLarge {
        /// The capacity that was requested.
        capacity: usize,

        /// Distance in bytes between the starts of consecutive entries.
        entry_stride: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn allocation_failed_message_names_the_request() {
        let error = Error::AllocationFailed {
            size: 256,
            align: 64,
        };

        let message = error.to_string();
        assert!(message.contains("256"));
        assert!(message.contains("64"));
    }

    #[test]
    fn capacity_too_large_message_names_the_capacity() {
        let error = Error::CapacityTooLarge {
            capacity: usize::MAX,
            entry_stride: 8,
        };

        assert!(error.to_string().contains(&usize::MAX.to_string()));
    }
}
