use chrono::{DateTime, Utc};
use pkg_constants::quota::{
    HARD_LIMIT_NAME_PREFIX, LIMITS_QUALIFIER, REQUESTS_QUALIFIER, TRACKED_RESOURCES,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::quantity::Quantity;

/// Resource accounting for a workload group (queue) in a namespace.
/// Written by the workload manager; the quota controller only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaLimit {
    pub name: String,
    pub namespace: String,
    /// Allocated quantity per resource kind (`cpu`, `memory`, ...)
    #[serde(default)]
    pub allocated: BTreeMap<String, Quantity>,
    /// Not every writer records a timestamp; absent means "first seen now".
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl QuotaLimit {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            allocated: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Name of the Hard Limit derived from this Quota Limit.
    pub fn hard_limit_name(&self) -> String {
        hard_limit_name(&self.name)
    }
}

/// Enforcement object capping consumption in a namespace.
/// Keys of `hard` are qualified resource names such as `limits.cpu`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardLimit {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub hard: BTreeMap<String, Quantity>,
    /// Assigned by the state store: 1 on create, bumped on every update.
    /// Updates are rejected when this does not match the stored record.
    #[serde(default)]
    pub resource_version: u64,
    pub created_at: DateTime<Utc>,
}

impl HardLimit {
    /// Default Hard Limit for a newly observed Quota Limit: every tracked
    /// kind's limit and request set to zero.
    pub fn for_quota_limit(quota: &QuotaLimit) -> Self {
        let hard = TRACKED_RESOURCES
            .iter()
            .flat_map(|kind| [limits_key(kind), requests_key(kind)])
            .map(|key| (key, Quantity::zero()))
            .collect();
        Self {
            name: quota.hard_limit_name(),
            namespace: quota.namespace.clone(),
            hard,
            resource_version: 0,
            created_at: Utc::now(),
        }
    }
}

pub fn hard_limit_name(quota_name: &str) -> String {
    format!("{}{}", HARD_LIMIT_NAME_PREFIX, quota_name)
}

pub fn limits_key(kind: &str) -> String {
    format!("{}.{}", LIMITS_QUALIFIER, kind)
}

pub fn requests_key(kind: &str) -> String {
    format!("{}.{}", REQUESTS_QUALIFIER, kind)
}

/// Manifest accepted by `quota-manager apply`: a list of Quota Limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaLimitManifest {
    #[serde(default, alias = "quota-limits")]
    pub quota_limits: Vec<QuotaLimitEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaLimitEntry {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub allocated: BTreeMap<String, Quantity>,
}

impl From<QuotaLimitEntry> for QuotaLimit {
    fn from(entry: QuotaLimitEntry) -> Self {
        Self {
            allocated: entry.allocated,
            ..QuotaLimit::new(&entry.namespace, &entry.name)
        }
    }
}
