//! Device information: the query/set surface for a link's configuration.
//!
//! Outer layers (the network configuration tool, DHCP when it finishes a
//! lease) read and write an address entry's configuration through a
//! [`NetworkDeviceInformation`] record.  Changing or dropping an address
//! detaches every socket bound to it.

use alloc::sync::Arc;

use netcore_abi::device::{
    AddressConfigurationMethod, NETWORK_DEVICE_INFORMATION_VERSION, NETWORK_DEVICE_MAX_DNS_SERVERS,
    NetworkDeviceFlags, NetworkDeviceInformation,
};
use netcore_abi::net::{NetDomain, NetworkAddress};
use netcore_lib::{klog_debug, klog_warn};

use crate::NetCore;
use crate::link::{Link, LinkAddressEntry, LinkAddressId, LinkInner};
use crate::plugin::NetDevice;
use crate::types::NetError;

fn entry_index(inner: &LinkInner, entry: Option<LinkAddressId>, domain: NetDomain) -> Result<usize, NetError> {
    match entry {
        Some(id) => {
            let index = inner
                .addresses
                .iter()
                .position(|entry| entry.id == id)
                .ok_or(NetError::NotFound)?;
            if inner.addresses[index].address.domain != domain {
                return Err(NetError::InvalidConfiguration);
            }
            Ok(index)
        }
        None => inner
            .addresses
            .iter()
            .position(|entry| entry.address.domain == domain)
            .ok_or(NetError::InvalidConfiguration),
    }
}

fn check_configuration(information: &NetworkDeviceInformation) -> Result<(), NetError> {
    let domain = information.domain;
    let method_ok = matches!(
        information.configuration_method,
        AddressConfigurationMethod::Static | AddressConfigurationMethod::Dhcp
    );

    if information.address.domain != domain
        || information.subnet.domain != domain
        || information.gateway.domain != domain
        || !method_ok
    {
        return Err(NetError::InvalidConfiguration);
    }

    if information.dns_servers().iter().any(|server| server.domain != domain) {
        return Err(NetError::InvalidConfiguration);
    }

    Ok(())
}

/// Apply a configure request to `entry`. Returns `true` if the address is
/// unchanged.
fn configure_entry(entry: &mut LinkAddressEntry, information: &NetworkDeviceInformation) -> bool {
    let same_address = entry.address == information.address;
    entry.address = information.address.without_port();
    entry.subnet = information.subnet.without_port();
    entry.default_gateway = information.gateway.without_port();
    entry.set_dns_servers(information.dns_servers());

    entry.static_address = true;
    if information.configuration_method == AddressConfigurationMethod::Dhcp {
        entry.static_address = false;
        entry.lease_server = information.lease_server_address;
        entry.lease_start_time = information.lease_start_time;
        entry.lease_end_time = information.lease_end_time;
    }

    entry.configured = true;
    same_address
}

fn fill_information(link: &Link, entry: &LinkAddressEntry, information: &mut NetworkDeviceInformation) {
    information.flags = NetworkDeviceFlags::empty();
    information.physical_address = entry.physical_address;
    if link.is_up() {
        information.flags |= NetworkDeviceFlags::MEDIA_CONNECTED;
    }

    if !entry.configured {
        information.configuration_method = AddressConfigurationMethod::None;
        return;
    }

    information.flags |= NetworkDeviceFlags::CONFIGURED;
    information.configuration_method = if entry.static_address {
        AddressConfigurationMethod::Static
    } else {
        AddressConfigurationMethod::Dhcp
    };

    information.address = entry.address;
    information.subnet = entry.subnet;
    information.gateway = entry.default_gateway;

    information.dns_servers = [NetworkAddress::ZERO; NETWORK_DEVICE_MAX_DNS_SERVERS];
    for (slot, server) in information.dns_servers.iter_mut().zip(&entry.dns_servers) {
        *slot = *server;
    }
    information.dns_server_count = entry.dns_servers.len() as u32;

    if !entry.static_address {
        information.lease_server_address = entry.lease_server;
        information.lease_start_time = entry.lease_start_time;
        information.lease_end_time = entry.lease_end_time;
    }
}

impl NetCore {
    /// Device-level entry point: find the device's link and forward.
    pub fn get_set_device_information(
        &self,
        device: &Arc<dyn NetDevice>,
        information: &mut NetworkDeviceInformation,
        set: bool,
    ) -> Result<(), NetError> {
        let link = self
            .lookup_link_by_device(device)
            .map_err(|_| NetError::NoSuchDevice)?;
        if !link.information_registered() {
            return Err(NetError::NotSupported);
        }

        self.get_set_network_device_information(&link, None, information, set)
    }

    /// Read, or write then read back, the configuration of one address
    /// entry on `link`.
    ///
    /// Without `entry`, the first entry of `information.domain` is used.  On
    /// a set, `information` holds the resulting configuration on return.
    pub fn get_set_network_device_information(
        &self,
        link: &Arc<Link>,
        entry: Option<LinkAddressId>,
        information: &mut NetworkDeviceInformation,
        set: bool,
    ) -> Result<(), NetError> {
        if information.version < NETWORK_DEVICE_INFORMATION_VERSION {
            return Err(NetError::InvalidParameter);
        }

        let domain = information.domain;
        if domain != NetDomain::Ip4 {
            return Err(NetError::InvalidConfiguration);
        }

        let mut inner = link.lock_inner();
        let mut index = entry_index(&inner, entry, domain)?;

        if set {
            let configure = information.flags.contains(NetworkDeviceFlags::CONFIGURED);
            let mut same_address = false;
            let mut released: Option<LinkAddressEntry> = None;

            if configure {
                check_configuration(information)?;
                information.dns_server_count = information
                    .dns_server_count
                    .min(NETWORK_DEVICE_MAX_DNS_SERVERS as u32);
                same_address = configure_entry(&mut inner.addresses[index], information);
            } else {
                let entry = &mut inner.addresses[index];
                if !entry.static_address {
                    released = Some(entry.clone());
                    entry.clear_dynamic_address();
                }
                entry.configured = false;
            }

            if !same_address {
                // Nothing may bind to the entry while its sockets are
                // detached outside the lock.
                let entry = &mut inner.addresses[index];
                let restore = entry.configured;
                entry.configured = false;
                let snapshot = entry.clone();
                drop(inner);

                if let Some(lease) = released {
                    let configurator = self.configurator.read().clone();
                    if let Some(configurator) = configurator {
                        let _ = configurator.cancel_lease(link, &lease).inspect_err(|err| {
                            klog_warn!("net: lease cancel for {} failed: {}", lease.address, err);
                        });
                    }
                }

                self.detach_sockets(link, Some(snapshot.id));

                inner = link.lock_inner();
                index = entry_index(&inner, Some(snapshot.id), domain)?;
                inner.addresses[index].configured = restore;
            }

            klog_debug!(
                "net: {}: entry {} {} ({})",
                link.device().name(),
                inner.addresses[index].id.raw(),
                if configure { "configured" } else { "unconfigured" },
                inner.addresses[index].address
            );
        }

        fill_information(link, &inner.addresses[index], information);
        Ok(())
    }
}
