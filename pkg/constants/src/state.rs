//! State store key layout and event log sizing.

/// Key prefix for Quota Limit records: `/registry/quotalimits/<ns>/<name>`.
pub const QUOTA_LIMIT_PREFIX: &str = "/registry/quotalimits/";

/// Key prefix for Hard Limit records: `/registry/hardlimits/<ns>/<name>`.
pub const HARD_LIMIT_PREFIX: &str = "/registry/hardlimits/";

/// Number of recent mutations kept in the in-memory event log for replay.
pub const EVENT_LOG_CAPACITY: usize = 4096;

/// Capacity of the broadcast channel feeding live watchers.
pub const EVENT_BROADCAST_CAPACITY: usize = 1024;
