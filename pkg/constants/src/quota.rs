//! Quota reconciliation constants.

/// Hard Limit name = `HARD_LIMIT_NAME_PREFIX + <quota limit name>`.
pub const HARD_LIMIT_NAME_PREFIX: &str = "quota-";

/// Resource kinds copied from a Quota Limit's `allocated` map into `hard`.
pub const TRACKED_RESOURCES: [&str; 2] = ["cpu", "memory"];

/// Qualifier for the enforcement ceiling entry (`limits.cpu`).
pub const LIMITS_QUALIFIER: &str = "limits";

/// Qualifier for the reservation entry (`requests.cpu`).
pub const REQUESTS_QUALIFIER: &str = "requests";

/// Default drift-correction period in milliseconds.
pub const DEFAULT_RESYNC_PERIOD_MS: u64 = 500;
