//! Pure mapping from a Quota Limit's allocation to its Hard Limit.

use pkg_constants::quota::TRACKED_RESOURCES;
use pkg_types::quota::{HardLimit, QuotaLimit, limits_key, requests_key};

/// What should happen to the Hard Limits of one namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// No Hard Limit exists; this default one should be created.
    Create(HardLimit),
    /// Exactly one exists; this is its desired state.
    Update(HardLimit),
    /// Several exist and none may be picked.
    Skip { existing: usize },
}

/// Decide the single correct action for `quota` given the Hard Limits
/// currently present in its namespace.
pub fn reconcile_one(quota: &QuotaLimit, existing: &[HardLimit]) -> Action {
    match existing {
        [] => Action::Create(HardLimit::for_quota_limit(quota)),
        [current] => {
            let mut desired = current.clone();
            apply_allocation(quota, &mut desired);
            Action::Update(desired)
        }
        many => Action::Skip {
            existing: many.len(),
        },
    }
}

/// Copy each tracked kind present in `allocated` into the `limits.` and
/// `requests.` entries of `hard`. Other entries are left alone.
pub fn apply_allocation(quota: &QuotaLimit, limit: &mut HardLimit) {
    for kind in TRACKED_RESOURCES {
        if let Some(quantity) = quota.allocated.get(kind) {
            limit.hard.insert(limits_key(kind), quantity.clone());
            limit.hard.insert(requests_key(kind), quantity.clone());
        }
    }
}
