//! Runtime configuration model.
//!
//! Every path the runtime touches on the host is configurable so the image
//! store and container bookkeeping can be exercised against a scratch
//! directory.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{LayerboxError, Result};

/// Root configuration for the layerbox runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Base directory holding `images/` and `containers/`.
    pub data_dir: PathBuf,
    /// Cgroup filesystem mount point.
    pub cgroup_root: PathBuf,
    /// Directory holding named network namespace files.
    pub netns_dir: PathBuf,
    /// Sysfs directory used to check for host links.
    pub sysfs_net_dir: PathBuf,
    /// Container network settings.
    pub network: NetworkSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(constants::DEFAULT_DATA_DIR),
            cgroup_root: PathBuf::from(constants::CGROUP_ROOT),
            netns_dir: PathBuf::from(constants::NETNS_RUN_DIR),
            sysfs_net_dir: PathBuf::from(constants::SYSFS_NET_DIR),
            network: NetworkSettings::default(),
        }
    }
}

/// Addressing for the private container network behind the host bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Host bridge the veth pairs attach to. Must exist before `run`.
    pub bridge: String,
    /// First two octets of the /16 container network.
    pub subnet: [u8; 2],
    /// Default gateway installed inside every container.
    pub gateway: Ipv4Addr,
    /// Nameserver written to the container's `/etc/resolv.conf`.
    pub nameserver: Ipv4Addr,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bridge: constants::DEFAULT_BRIDGE.to_string(),
            subnet: [172, 16],
            gateway: Ipv4Addr::new(172, 16, 0, 1),
            nameserver: Ipv4Addr::new(8, 8, 8, 8),
        }
    }
}

impl NetworkSettings {
    /// Prefix length of the container network.
    pub const PREFIX_LEN: u8 = 16;

    /// Broadcast address of the container network.
    #[must_use]
    pub const fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.subnet[0], self.subnet[1], 255, 255)
    }

    /// Network address of the container network.
    #[must_use]
    pub const fn network(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.subnet[0], self.subnet[1], 0, 0)
    }
}

impl RuntimeConfig {
    /// Directory holding one subdirectory per image.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// Directory holding one subdirectory per container.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.data_dir.join("containers")
    }

    /// Reads a configuration file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LayerboxError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Resolves the effective configuration.
    ///
    /// An explicit `config_file` wins; otherwise `<data_dir>/config.json` is
    /// used when present. An explicit `data_dir` always overrides the file.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file exists but cannot be parsed.
    pub fn load(config_file: Option<&Path>, data_dir: Option<&Path>) -> Result<Self> {
        let base = data_dir.map_or_else(
            || PathBuf::from(constants::DEFAULT_DATA_DIR),
            Path::to_path_buf,
        );
        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => {
                let implicit = base.join(constants::CONFIG_FILE_NAME);
                if implicit.is_file() {
                    Self::from_file(&implicit)?
                } else {
                    Self::default()
                }
            }
        };
        if let Some(dir) = data_dir {
            config.data_dir = dir.to_path_buf();
        }
        Ok(config)
    }
}
