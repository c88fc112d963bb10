//! Deterministic per-container network identity.

use std::net::Ipv4Addr;

use layerbox_common::config::NetworkSettings;
use layerbox_common::constants::{ID_PREFIX_LEN, NETNS_PREFIX};
use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::ContainerId;

/// Names and addresses a container uses on the host bridge network.
///
/// Everything is derived from the container id, so any process can rebuild
/// the identity from the id alone. Two ids sharing their first two bytes
/// receive the same address; that collision is accepted, not prevented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    /// Container the identity belongs to.
    pub container_id: ContainerId,
    /// Name of the dedicated network namespace.
    pub namespace: String,
    /// Veth end that stays on the host and joins the bridge.
    pub host_veth: String,
    /// Veth end moved into the container namespace.
    pub container_veth: String,
    /// Container address inside the /16 network.
    pub address: Ipv4Addr,
    /// Locally administered MAC for the container veth.
    pub mac: String,
}

impl NetworkIdentity {
    /// Derives the identity of `id`.
    ///
    /// The address is `<subnet>.<byte0>.<byte1>` where the bytes are the
    /// first four hex characters of the id.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the id does not start with four hex
    /// characters.
    pub fn derive(id: &ContainerId, settings: &NetworkSettings) -> Result<Self> {
        let raw = id.as_str();
        let byte = |range: std::ops::Range<usize>| {
            raw.get(range)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| LayerboxError::Config {
                    message: format!("container id does not start with hex bytes: {raw}"),
                })
        };
        let high = byte(0..2)?;
        let low = byte(2..4)?;

        let short = id.prefix(ID_PREFIX_LEN);
        let address = Ipv4Addr::new(settings.subnet[0], settings.subnet[1], high, low);
        let identity = Self {
            container_id: id.clone(),
            namespace: format!("{NETNS_PREFIX}{short}"),
            host_veth: format!("veth0_{short}"),
            container_veth: format!("veth1_{short}"),
            address,
            mac: format!("02:42:ac:11:00:{high:02x}"),
        };

        if address == settings.network()
            || address == settings.gateway
            || address == settings.broadcast()
        {
            tracing::warn!(
                container = %id,
                %address,
                "derived address collides with a reserved network address"
            );
        }
        Ok(identity)
    }

    /// Address with prefix length, as `ip addr` expects it.
    #[must_use]
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.address, NetworkSettings::PREFIX_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derive(id: &str) -> NetworkIdentity {
        NetworkIdentity::derive(&ContainerId::new(id), &NetworkSettings::default())
            .expect("derive")
    }

    #[test]
    fn address_comes_from_first_two_id_bytes() {
        let identity = derive("0a1b2c3d-0000-4000-8000-000000000000");
        assert_eq!(identity.address, Ipv4Addr::new(172, 16, 10, 27));
        assert_eq!(identity.cidr(), "172.16.10.27/16");
        assert_eq!(identity.mac, "02:42:ac:11:00:0a");
    }

    #[test]
    fn derivation_is_pure() {
        let a = derive("ff01aaaa-0000-4000-8000-000000000000");
        let b = derive("ff01bbbb-1111-4111-9111-111111111111");
        assert_eq!(a.address, b.address);
        assert_ne!(a.namespace, b.namespace);
        assert_eq!(a, derive("ff01aaaa-0000-4000-8000-000000000000"));
    }

    #[test]
    fn names_use_eight_character_prefix_and_fit_ifnamsiz() {
        let identity = derive("deadbeef-0000-4000-8000-000000000000");
        assert_eq!(identity.namespace, "lbx_deadbeef");
        assert_eq!(identity.host_veth, "veth0_deadbeef");
        assert_eq!(identity.container_veth, "veth1_deadbeef");
        assert!(identity.host_veth.len() <= 15);
    }

    #[test]
    fn non_hex_prefix_is_rejected() {
        let result =
            NetworkIdentity::derive(&ContainerId::new("zz-not-hex"), &NetworkSettings::default());
        assert!(matches!(result, Err(LayerboxError::Config { .. })));
    }
}
