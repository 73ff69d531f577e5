//! Parallel fan-out of a logical request across a pool of host sessions

mod discovery;
mod execution;

pub use discovery::ParallelDiscoveryManager;
pub use execution::ParallelExecutionManager;

use testgrid_config::domains::engine::effective_parallelism;

/// Pool size for a run: requested parallelism bounded by the unit count
///
/// Requested parallelism falls back to the processor count when unset.
pub(crate) fn pool_size(requested: Option<usize>, unit_count: usize) -> usize {
    effective_parallelism(requested).min(unit_count).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_bounded_by_units() {
        assert_eq!(pool_size(Some(8), 3), 3);
        assert_eq!(pool_size(Some(2), 5), 2);
        assert_eq!(pool_size(None, 1), 1);
        // Degenerate inputs still produce a usable pool
        assert_eq!(pool_size(Some(4), 0), 1);
    }
}
