//! Filesystem path constants.

/// Default config file path for the quota manager.
pub const DEFAULT_MANAGER_CONFIG: &str = "/etc/quota-manager/config.yaml";

/// Default data directory for the state store.
pub const DEFAULT_DATA_DIR: &str = "/tmp/quota-manager-data";
