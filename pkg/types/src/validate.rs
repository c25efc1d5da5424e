use anyhow::{Result, bail};

use crate::quota::hard_limit_name;

/// Validate a Kubernetes-style object name or namespace.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Check that the Hard Limit name derived from `quota_name` is itself valid.
/// The prefix adds six characters, so quota names over 57 chars overflow.
pub fn validate_hard_limit_name(quota_name: &str) -> Result<String> {
    let name = hard_limit_name(quota_name);
    validate_name(&name)?;
    Ok(name)
}
