//! Container networking: a named network namespace per container, joined
//! to a pre-existing host bridge through a veth pair.
//!
//! [`provision`] runs on the host before the container namespaces exist,
//! [`configure_inside_namespace`] runs in the init process after it has
//! joined the named namespace, and [`teardown`] runs on the host once the
//! container is gone.

pub mod driver;
pub mod identity;
pub mod netns;
pub mod resolver;

pub use driver::{NetworkDriver, SystemNetwork};
pub use identity::NetworkIdentity;
pub use resolver::write_resolver_files;

use layerbox_common::config::NetworkSettings;
use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::TeardownWarning;

/// Creates the namespace and veth pair for `identity` and attaches the host
/// end to `bridge`.
///
/// Nothing is created when the bridge is missing. If a later step fails,
/// everything created so far is torn down before the error is returned.
///
/// # Errors
///
/// Returns a network error if the bridge is missing or any step fails.
pub fn provision(driver: &dyn NetworkDriver, identity: &NetworkIdentity, bridge: &str) -> Result<()> {
    if !driver.bridge_exists(bridge) {
        return Err(LayerboxError::Network {
            message: format!("bridge {bridge} does not exist; create it before running containers"),
        });
    }

    if let Err(e) = provision_steps(driver, identity, bridge) {
        tracing::error!(container = %identity.container_id, error = %e, "network provisioning failed");
        for warning in teardown(driver, identity) {
            tracing::warn!(%warning, "rollback left a resource behind");
        }
        return Err(e);
    }
    tracing::info!(
        container = %identity.container_id,
        namespace = %identity.namespace,
        address = %identity.address,
        "network provisioned"
    );
    Ok(())
}

fn provision_steps(driver: &dyn NetworkDriver, identity: &NetworkIdentity, bridge: &str) -> Result<()> {
    let ns_path = driver.create_namespace(&identity.namespace)?;
    let ns_path = ns_path.display().to_string();
    let host = identity.host_veth.as_str();
    let peer = identity.container_veth.as_str();

    driver.ip(&["link", "add", host, "type", "veth", "peer", "name", peer])?;
    driver.ip(&["link", "set", host, "master", bridge])?;
    driver.ip(&["link", "set", host, "up"])?;
    driver.ip(&["link", "set", peer, "netns", &ns_path])?;
    Ok(())
}

/// Configures the container end of the veth pair.
///
/// The caller must already be inside the container's network namespace.
///
/// # Errors
///
/// Returns a network error if any `ip` command fails.
pub fn configure_inside_namespace(
    driver: &dyn NetworkDriver,
    identity: &NetworkIdentity,
    settings: &NetworkSettings,
) -> Result<()> {
    let dev = identity.container_veth.as_str();
    let cidr = identity.cidr();
    let broadcast = settings.broadcast().to_string();
    let gateway = settings.gateway.to_string();

    driver.ip(&["link", "set", "lo", "up"])?;
    driver.ip(&["link", "set", dev, "address", &identity.mac])?;
    driver.ip(&["addr", "add", &cidr, "broadcast", &broadcast, "dev", dev])?;
    driver.ip(&["link", "set", dev, "up"])?;
    driver.ip(&["route", "add", "default", "via", &gateway])?;
    tracing::debug!(container = %identity.container_id, %cidr, "container interface configured");
    Ok(())
}

/// Deletes the host veth (destroying its peer) and the named namespace.
///
/// Resources already gone are skipped, so repeated calls are harmless.
#[must_use]
pub fn teardown(driver: &dyn NetworkDriver, identity: &NetworkIdentity) -> Vec<TeardownWarning> {
    let mut warnings = Vec::new();

    if driver.link_exists(&identity.host_veth) {
        if let Err(e) = driver.ip(&["link", "delete", &identity.host_veth]) {
            tracing::warn!(link = %identity.host_veth, error = %e, "veth deletion failed");
            warnings.push(TeardownWarning::new(identity.host_veth.clone(), &e));
        }
    }

    match driver.delete_namespace(&identity.namespace) {
        Ok(true) => tracing::debug!(namespace = %identity.namespace, "namespace deleted"),
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(namespace = %identity.namespace, error = %e, "namespace deletion failed");
            warnings.push(TeardownWarning::new(identity.namespace.clone(), &e));
        }
    }
    warnings
}
