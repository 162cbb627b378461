//! Tunables for the membership synchronizer
//!
//! File format (every field optional):
//! ```json
//! {
//!   "hashsize": 2048,
//!   "maxelem": 131072,
//!   "switch_threshold": 5,
//!   "ipset_cmd": "ipset",
//!   "root_helper": "sudo"
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ipsetmgr_common::{IpsetError, IpsetResult, IPSET_CMD};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{SetSizing, SetSpec};

/// Default number of add/del operations at which a full rebuild replaces
/// incremental patching.
pub const SWITCH_SPLIT_THRESHOLD: usize = 5;

/// ipset manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpsetConfig {
    /// `hashsize` for created sets; ipset's default when unset
    pub hashsize: Option<u32>,
    /// `maxelem` for created sets; ipset's default when unset
    pub maxelem: Option<u32>,
    /// Delta size at which `set_members` rebuilds instead of patching
    pub switch_threshold: usize,
    /// ipset binary
    pub ipset_cmd: String,
    /// Command prefix used for privileged execution, e.g. `sudo`
    pub root_helper: Option<String>,
}

impl Default for IpsetConfig {
    fn default() -> Self {
        Self {
            hashsize: None,
            maxelem: None,
            switch_threshold: SWITCH_SPLIT_THRESHOLD,
            ipset_cmd: IPSET_CMD.to_string(),
            root_helper: None,
        }
    }
}

impl IpsetConfig {
    /// Sizing hints rendered into create commands
    pub fn sizing(&self) -> SetSizing {
        SetSizing {
            hashsize: self.hashsize,
            maxelem: self.maxelem,
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> IpsetResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| IpsetError::invalid_config("json", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> IpsetResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            IpsetError::invalid_config(
                "path",
                format!("Failed to open config file {}: {}", path.display(), e),
            )
        })?;

        let config: Self = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            IpsetError::invalid_config(
                "json",
                format!("Failed to parse JSON from {}: {}", path.display(), e),
            )
        })?;
        config.validate()?;

        info!("Loaded ipset config from {}", path.display());
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> IpsetResult<()> {
        if self.switch_threshold == 0 {
            return Err(IpsetError::invalid_config(
                "switch_threshold",
                "must be at least 1",
            ));
        }
        if let Some(hashsize) = self.hashsize {
            if !hashsize.is_power_of_two() {
                return Err(IpsetError::invalid_config(
                    "hashsize",
                    format!("{} is not a power of two", hashsize),
                ));
            }
        }
        if self.maxelem == Some(0) {
            return Err(IpsetError::invalid_config("maxelem", "must be positive"));
        }
        if self.ipset_cmd.trim().is_empty() {
            return Err(IpsetError::invalid_config("ipset_cmd", "must not be empty"));
        }
        Ok(())
    }
}

/// Load the desired memberships listed in a JSON file
///
/// The file holds an array of `{"id", "family", "members"}` objects.
pub fn load_set_specs(path: impl AsRef<Path>) -> IpsetResult<Vec<SetSpec>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        IpsetError::invalid_config(
            "sets",
            format!("Failed to open sets file {}: {}", path.display(), e),
        )
    })?;

    let specs: Vec<SetSpec> = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        IpsetError::invalid_config(
            "sets",
            format!("Failed to parse JSON from {}: {}", path.display(), e),
        )
    })?;

    info!("Loaded {} set(s) from {}", specs.len(), path.display());
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = IpsetConfig::default();
        assert_eq!(config.switch_threshold, 5);
        assert_eq!(config.ipset_cmd, "ipset");
        assert_eq!(config.sizing(), SetSizing::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            IpsetConfig::from_json_str(r#"{"hashsize": 2048, "maxelem": 131072}"#).unwrap();
        assert_eq!(config.hashsize, Some(2048));
        assert_eq!(config.maxelem, Some(131072));
        assert_eq!(config.switch_threshold, SWITCH_SPLIT_THRESHOLD);
        assert_eq!(config.root_helper, None);
    }

    #[test]
    fn test_from_json_rejects_unknown_field() {
        let err = IpsetConfig::from_json_str(r#"{"hash_size": 2048}"#).unwrap_err();
        assert!(matches!(err, IpsetError::InvalidConfig { .. }));
    }

    #[test]
    fn test_validate() {
        let bad_threshold = IpsetConfig {
            switch_threshold: 0,
            ..Default::default()
        };
        assert!(bad_threshold.validate().is_err());

        let bad_hashsize = IpsetConfig {
            hashsize: Some(1000),
            ..Default::default()
        };
        assert!(bad_hashsize.validate().is_err());

        let bad_maxelem = IpsetConfig {
            maxelem: Some(0),
            ..Default::default()
        };
        assert!(bad_maxelem.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"switch_threshold": 10, "root_helper": "sudo -n"}}"#
        )
        .unwrap();

        let config = IpsetConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.switch_threshold, 10);
        assert_eq!(config.root_helper.as_deref(), Some("sudo -n"));
    }

    #[test]
    fn test_from_json_file_missing() {
        let err = IpsetConfig::from_json_file("/nonexistent/ipsetmgrd.json").unwrap_err();
        assert!(err.to_string().contains("Failed to open config file"));
    }

    #[test]
    fn test_load_set_specs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "sg1", "family": "IPv4", "members": ["10.0.0.1", "10.0.0.2"]}}]"#
        )
        .unwrap();

        let specs = load_set_specs(file.path()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, "sg1");
        assert_eq!(specs[0].members.len(), 2);
    }
}
