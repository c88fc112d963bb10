//! Host network operations behind a trait, so wiring logic can be exercised
//! without touching the host.

use std::path::PathBuf;
use std::process::Command;

use layerbox_common::config::RuntimeConfig;
use layerbox_common::error::{LayerboxError, Result};

use super::netns;

/// Primitive network operations the wiring logic is built from.
pub trait NetworkDriver {
    /// Returns true if a link called `name` exists in the current namespace.
    fn link_exists(&self, name: &str) -> bool;

    /// Returns true if `name` exists and is a bridge.
    fn bridge_exists(&self, name: &str) -> bool;

    /// Runs one `ip` command in the current network namespace.
    ///
    /// # Errors
    ///
    /// Returns a network error if the command fails.
    fn ip(&self, args: &[&str]) -> Result<()>;

    /// Creates a named network namespace and returns its pin path.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be created.
    fn create_namespace(&self, name: &str) -> Result<PathBuf>;

    /// Deletes a named network namespace. Returns false if it was absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace exists but cannot be deleted.
    fn delete_namespace(&self, name: &str) -> Result<bool>;

    /// Path of the pin file for `name`.
    fn namespace_path(&self, name: &str) -> PathBuf;
}

/// [`NetworkDriver`] backed by the host kernel and the iproute2 `ip` tool.
#[derive(Debug, Clone)]
pub struct SystemNetwork {
    ip_binary: PathBuf,
    netns_dir: PathBuf,
    sysfs_net_dir: PathBuf,
}

impl SystemNetwork {
    /// Locates the `ip` binary and takes directories from `config`.
    ///
    /// # Errors
    ///
    /// Returns a network error if `ip` is not on `PATH`.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let ip_binary = which::which("ip").map_err(|e| LayerboxError::Network {
            message: format!("iproute2 `ip` binary not found: {e}"),
        })?;
        Ok(Self {
            ip_binary,
            netns_dir: config.netns_dir.clone(),
            sysfs_net_dir: config.sysfs_net_dir.clone(),
        })
    }
}

impl NetworkDriver for SystemNetwork {
    fn link_exists(&self, name: &str) -> bool {
        self.sysfs_net_dir.join(name).exists()
    }

    fn bridge_exists(&self, name: &str) -> bool {
        self.sysfs_net_dir.join(name).join("bridge").is_dir()
    }

    fn ip(&self, args: &[&str]) -> Result<()> {
        tracing::debug!(args = ?args, "ip");
        let output = Command::new(&self.ip_binary)
            .args(args)
            .output()
            .map_err(|e| LayerboxError::io(&self.ip_binary, e))?;
        if output.status.success() {
            return Ok(());
        }
        Err(LayerboxError::Network {
            message: format!(
                "`ip {}` failed ({}): {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }

    fn create_namespace(&self, name: &str) -> Result<PathBuf> {
        netns::create_named(&self.netns_dir, name)
    }

    fn delete_namespace(&self, name: &str) -> Result<bool> {
        netns::delete_named(&self.netns_dir, name)
    }

    fn namespace_path(&self, name: &str) -> PathBuf {
        self.netns_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(sysfs: &std::path::Path) -> SystemNetwork {
        SystemNetwork {
            ip_binary: PathBuf::from("/bin/false"),
            netns_dir: PathBuf::from("/var/run/netns"),
            sysfs_net_dir: sysfs.to_path_buf(),
        }
    }

    #[test]
    fn bridge_detection_requires_bridge_subdirectory() {
        let sysfs = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(sysfs.path().join("lbx0/bridge")).expect("mkdir");
        std::fs::create_dir_all(sysfs.path().join("eth0")).expect("mkdir");

        let net = driver(sysfs.path());
        assert!(net.bridge_exists("lbx0"));
        assert!(!net.bridge_exists("eth0"));
        assert!(net.link_exists("eth0"));
        assert!(!net.link_exists("veth0_deadbeef"));
    }

    #[test]
    fn namespace_path_is_under_netns_dir() {
        let sysfs = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            driver(sysfs.path()).namespace_path("lbx_deadbeef"),
            PathBuf::from("/var/run/netns/lbx_deadbeef")
        );
    }
}
