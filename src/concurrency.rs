//! Sizing of the concurrency budget shared by one fetch run.

use std::num::NonZeroUsize;

use tracing::info;

pub const MIN_DERIVED: usize = 3;
pub const MAX_DERIVED: usize = 20;

/// Resolve how many fetches may be in flight at once.
///
/// An explicit override is used as given. Otherwise the budget is half the
/// enabled-source count, clamped to `[MIN_DERIVED, MAX_DERIVED]`: small
/// catalogs still get some parallelism and large ones do not open a socket
/// per source.
pub fn resolve(explicit: Option<NonZeroUsize>, enabled_sources: usize) -> usize {
    if let Some(budget) = explicit {
        info!(budget = budget.get(), "Using explicit concurrency budget");
        return budget.get();
    }
    let budget = (enabled_sources / 2).clamp(MIN_DERIVED, MAX_DERIVED);
    info!(budget, enabled_sources, "Derived concurrency budget");
    budget
}
