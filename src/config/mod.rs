//! System configuration
//!
//! Reads the datasource settings from the cloud-init system configuration:
//!
//! ```yaml
//! datasource_list: [ConfigDrive, OpenStack]
//! datasource:
//!   OpenStack:
//!     metadata_url: http://169.254.169.254/
//!     max_wait: 30
//! ```

pub mod loader;
pub mod merge;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

use crate::CloudInitError;

/// Default cloud-init configuration directory
pub const CONFIG_DIR: &str = "/etc/cloud";

/// Locations of the system configuration files
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    config_dir: PathBuf,
}

impl ConfigPaths {
    pub fn new() -> Self {
        Self::with_dir(CONFIG_DIR)
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// `/etc/cloud/cloud.cfg`
    pub fn main_config(&self) -> PathBuf {
        self.config_dir.join("cloud.cfg")
    }

    /// `/etc/cloud/cloud.cfg.d`
    pub fn config_d(&self) -> PathBuf {
        self.config_dir.join("cloud.cfg.d")
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::new()
    }
}

/// Datasource related part of the system configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Datasources to consider, in order; empty means all
    pub datasource_list: Vec<String>,

    /// Per-datasource settings, keyed by datasource name
    pub datasource: Mapping,
}

impl SystemConfig {
    /// Parse a YAML document; an empty document yields the defaults
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        Self::from_value(serde_yaml::from_str(yaml)?)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_yaml::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value)
    }

    /// Settings for datasource `name`, if any
    pub fn datasource_overrides(&self, name: &str) -> Option<&Value> {
        self.datasource.get(name)
    }

    /// Typed settings for datasource `name`
    ///
    /// Keys present under `datasource.<name>` replace the defaults of `T`;
    /// everything else keeps its default.
    pub fn datasource_config<T>(&self, name: &str) -> Result<T, CloudInitError>
    where
        T: Default + Serialize + DeserializeOwned,
    {
        let defaults = serde_yaml::to_value(T::default())?;
        let merged = match self.datasource_overrides(name) {
            Some(overrides) if overrides.is_mapping() => merge::merge_yaml_values(&defaults, overrides),
            Some(Value::Null) | None => defaults,
            Some(other) => {
                return Err(CloudInitError::Config(format!(
                    "datasource.{} must be a mapping, got {:?}",
                    name, other
                )));
            }
        };
        serde_yaml::from_value(merged)
            .map_err(|e| CloudInitError::Config(format!("datasource.{}: {}", name, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasources::openstack::{ConfigDriveConfig, OpenStackConfig};

    #[test]
    fn test_parse_system_config() {
        let yaml = r#"
datasource_list: [ConfigDrive, OpenStack]
datasource:
  OpenStack:
    metadata_url: http://10.0.0.1/
    max_wait: 30
"#;
        let config = SystemConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.datasource_list, vec!["ConfigDrive", "OpenStack"]);
        assert!(config.datasource_overrides("OpenStack").is_some());
        assert!(config.datasource_overrides("Ec2").is_none());
    }

    #[test]
    fn test_empty_config() {
        let config = SystemConfig::from_yaml("").unwrap();
        assert_eq!(config, SystemConfig::default());

        let config = SystemConfig::from_yaml("# only a comment\n").unwrap();
        assert!(config.datasource_list.is_empty());
    }

    #[test]
    fn test_datasource_config_overrides_defaults() {
        let yaml = "datasource:\n  OpenStack:\n    metadata_url: http://10.0.0.1/\n    max_wait: 30\n";
        let config = SystemConfig::from_yaml(yaml).unwrap();

        let openstack: OpenStackConfig = config.datasource_config("OpenStack").unwrap();
        assert_eq!(openstack.metadata_url, "http://10.0.0.1/");
        assert_eq!(openstack.max_wait, 30);
        assert_eq!(openstack.retries, 3);
        assert_eq!(openstack.timeout, 10);
    }

    #[test]
    fn test_datasource_config_without_overrides() {
        let config = SystemConfig::default();

        let drive: ConfigDriveConfig = config.datasource_config("ConfigDrive").unwrap();
        assert_eq!(drive, ConfigDriveConfig::default());
    }

    #[test]
    fn test_datasource_config_lists_are_replaced() {
        let yaml = "datasource:\n  ConfigDrive:\n    fs_types: [iso9660]\n";
        let config = SystemConfig::from_yaml(yaml).unwrap();

        let drive: ConfigDriveConfig = config.datasource_config("ConfigDrive").unwrap();
        assert_eq!(drive.fs_types, vec!["iso9660"]);
    }

    #[test]
    fn test_datasource_config_rejects_bad_values() {
        let yaml = "datasource:\n  OpenStack:\n    max_wait: soon\n";
        let config = SystemConfig::from_yaml(yaml).unwrap();

        let result = config.datasource_config::<OpenStackConfig>("OpenStack");
        assert!(matches!(result, Err(CloudInitError::Config(_))));

        let config = SystemConfig::from_yaml("datasource:\n  OpenStack: [1, 2]\n").unwrap();
        let result = config.datasource_config::<OpenStackConfig>("OpenStack");
        assert!(matches!(result, Err(CloudInitError::Config(_))));
    }
}
