//! Config file handling

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::SocatError;

/// Timeouts as humantime strings (`"60s"`, `"2m"`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutsConfig {
    pub ready: Option<String>,
    pub grace: Option<String>,
    pub delete: Option<String>,
    /// Interval of the tunnel health check
    pub tunnel_check: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeleteConfig {
    pub attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourcesConfig {
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

/// kubectl-socat configuration
///
/// ```toml
/// image = "alpine/socat:1.8.0.0"
/// namespace = "tools"
///
/// [timeouts]
/// ready = "2m"
///
/// [labels]
/// team = "platform"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub image: Option<String>,
    pub namespace: Option<String>,
    pub address: Option<IpAddr>,
    pub relay_port: Option<u16>,
    pub timeouts: TimeoutsConfig,
    pub delete: DeleteConfig,
    pub resources: ResourcesConfig,
    /// Extra labels for the relay pod
    pub labels: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing default file yields the default config; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, SocatError> {
        let (config_file, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !config_file.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_file).map_err(|e| {
            SocatError::Config(format!("Failed to read config {}: {}", config_file.display(), e))
        })?;

        Self::from_toml(&content)
            .map_err(|e| SocatError::Config(format!("Invalid config {}: {}", config_file.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// `<config dir>/kubectl-socat/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("kubectl-socat").join("config.toml"))
    }
}
