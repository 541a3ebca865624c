//! Network device information exchanged through the device-information
//! query/set surface.

use bitflags::bitflags;

use crate::net::{NetDomain, NetworkAddress};

/// Current version of [`NetworkDeviceInformation`]. Older callers are rejected.
pub const NETWORK_DEVICE_INFORMATION_VERSION: u32 = 1;

/// Maximum number of DNS servers stored per link address entry.
pub const NETWORK_DEVICE_MAX_DNS_SERVERS: usize = 4;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NetworkDeviceFlags: u32 {
        /// The link has carrier.
        const MEDIA_CONNECTED = 1 << 0;
        /// The address entry is configured (or, on set, should become configured).
        const CONFIGURED      = 1 << 1;
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressConfigurationMethod {
    #[default]
    Invalid = 0,
    None = 1,
    Static = 2,
    Dhcp = 3,
}

/// Network configuration of one link address entry.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkDeviceInformation {
    pub version: u32,
    pub flags: NetworkDeviceFlags,
    pub domain: NetDomain,
    pub configuration_method: AddressConfigurationMethod,
    pub address: NetworkAddress,
    pub subnet: NetworkAddress,
    pub gateway: NetworkAddress,
    pub dns_servers: [NetworkAddress; NETWORK_DEVICE_MAX_DNS_SERVERS],
    pub dns_server_count: u32,
    pub physical_address: NetworkAddress,
    pub lease_server_address: NetworkAddress,
    /// Lease start, seconds since the epoch.
    pub lease_start_time: u64,
    /// Lease end, seconds since the epoch.
    pub lease_end_time: u64,
}

impl NetworkDeviceInformation {
    /// Empty query structure for `domain` at the current version.
    pub const fn new(domain: NetDomain) -> Self {
        Self {
            version: NETWORK_DEVICE_INFORMATION_VERSION,
            flags: NetworkDeviceFlags::empty(),
            domain,
            configuration_method: AddressConfigurationMethod::Invalid,
            address: NetworkAddress::ZERO,
            subnet: NetworkAddress::ZERO,
            gateway: NetworkAddress::ZERO,
            dns_servers: [NetworkAddress::ZERO; NETWORK_DEVICE_MAX_DNS_SERVERS],
            dns_server_count: 0,
            physical_address: NetworkAddress::ZERO,
            lease_server_address: NetworkAddress::ZERO,
            lease_start_time: 0,
            lease_end_time: 0,
        }
    }

    /// The populated prefix of `dns_servers`.
    pub fn dns_servers(&self) -> &[NetworkAddress] {
        let count = (self.dns_server_count as usize).min(NETWORK_DEVICE_MAX_DNS_SERVERS);
        &self.dns_servers[..count]
    }
}
