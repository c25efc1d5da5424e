use serde::{Deserialize, Serialize};

/// Quota manager configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// data-dir: /var/lib/quota-manager/data
/// resync-period-ms: 500
/// ensure-hard-limits: false
/// in-memory: false
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "resync-period-ms")]
    pub resync_period_ms: Option<u64>,
    /// Let the drift loop create missing Hard Limits as well as update them.
    #[serde(default, alias = "ensure-hard-limits")]
    pub ensure_hard_limits: Option<bool>,
    /// Run against a process-local registry instead of SlateDB.
    #[serde(default, alias = "in-memory")]
    pub in_memory: Option<bool>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg: ManagerConfigFile =
            load_config_file("/nonexistent/quota-manager/config.yaml").unwrap();
        assert!(cfg.data_dir.is_none());
        assert!(cfg.resync_period_ms.is_none());
        assert!(cfg.ensure_hard_limits.is_none());
    }

    #[test]
    fn kebab_case_keys() {
        let yaml = "data-dir: /var/lib/qm\nresync-period-ms: 2000\nensure-hard-limits: true\n";
        let cfg: ManagerConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.data_dir.as_deref(), Some("/var/lib/qm"));
        assert_eq!(cfg.resync_period_ms, Some(2000));
        assert_eq!(cfg.ensure_hard_limits, Some(true));
        assert_eq!(cfg.in_memory, None);
    }
}
