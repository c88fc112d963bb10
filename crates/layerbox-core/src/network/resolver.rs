//! Name resolution files inside a container root.

use std::path::Path;

use layerbox_common::config::NetworkSettings;
use layerbox_common::error::{LayerboxError, Result};

use super::NetworkIdentity;

/// Writes `etc/resolv.conf` and `etc/hosts` below `root`.
///
/// Called after the root switch, with `root` set to `/`.
///
/// # Errors
///
/// Returns an I/O error if `etc/` or either file cannot be written.
pub fn write_resolver_files(
    root: &Path,
    identity: &NetworkIdentity,
    settings: &NetworkSettings,
) -> Result<()> {
    let etc = root.join("etc");
    std::fs::create_dir_all(&etc).map_err(|e| LayerboxError::io(&etc, e))?;

    let resolv = etc.join("resolv.conf");
    std::fs::write(&resolv, format!("nameserver {}\n", settings.nameserver))
        .map_err(|e| LayerboxError::io(&resolv, e))?;

    let hosts = etc.join("hosts");
    let content = format!(
        "127.0.0.1 localhost\n{} {}\n",
        identity.address, identity.container_id
    );
    std::fs::write(&hosts, content).map_err(|e| LayerboxError::io(&hosts, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use layerbox_common::types::ContainerId;

    use super::*;

    #[test]
    fn writes_nameserver_and_hosts_entries() {
        let root = tempfile::tempdir().expect("tempdir");
        let settings = NetworkSettings::default();
        let id = ContainerId::new("0102abcd-0000-4000-8000-000000000000");
        let identity = NetworkIdentity::derive(&id, &settings).expect("derive");

        write_resolver_files(root.path(), &identity, &settings).expect("write");

        let resolv = std::fs::read_to_string(root.path().join("etc/resolv.conf")).expect("read");
        assert_eq!(resolv, "nameserver 8.8.8.8\n");
        let hosts = std::fs::read_to_string(root.path().join("etc/hosts")).expect("read");
        assert_eq!(
            hosts,
            "127.0.0.1 localhost\n172.16.1.2 0102abcd-0000-4000-8000-000000000000\n"
        );
    }
}
