//! Configuration file parsing for vpcctl
//!
//! Parses the optional `vpcctl.toml` using serde. Every key has a default,
//! so a missing default file is equivalent to an empty one.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file looked up when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "vpcctl.toml";

/// Load configuration from a file
///
/// A missing file is only an error when the path was given explicitly.
pub fn load(path: &Path, explicit: bool) -> Result<VpcctlConfig> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(VpcctlConfig::default());
        }
        Err(e) => {
            return Err(Error::ConfigRead {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let config: VpcctlConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct VpcctlConfig {
    /// Global configuration settings
    #[serde(default)]
    pub config: GlobalConfig,
}

impl VpcctlConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let global = &self.config;

        for (key, value) in [("ip", &global.ip), ("iptables", &global.iptables)] {
            if value.trim().is_empty() {
                return Err(Error::ConfigValidation(format!(
                    "'{}' must name an executable",
                    key
                )));
            }
        }

        if global.lock_file.as_os_str().is_empty() {
            return Err(Error::ConfigValidation(
                "'lock_file' must not be empty".into(),
            ));
        }

        Ok(())
    }
}

/// Global settings
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// iproute2 binary
    #[serde(default = "default_ip")]
    pub ip: String,

    /// iptables binary
    #[serde(default = "default_iptables")]
    pub iptables: String,

    /// Advisory lock held by mutating commands
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// Log filter used when neither VPCCTL_LOG nor -v is given
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            iptables: default_iptables(),
            lock_file: default_lock_file(),
            log_level: default_log_level(),
        }
    }
}

fn default_ip() -> String {
    "ip".into()
}

fn default_iptables() -> String {
    "iptables".into()
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/run/vpcctl.lock")
}

fn default_log_level() -> String {
    "info".into()
}
