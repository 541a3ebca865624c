use core::cmp::Ordering;
use core::fmt;

// =============================================================================
// Address sizes
// =============================================================================

/// Size in bytes of the address storage carried by every [`NetworkAddress`].
pub const MAX_NETWORK_ADDRESS_SIZE: usize = 16;

pub const IP4_ADDRESS_SIZE: usize = 4;
pub const ETHERNET_ADDRESS_SIZE: usize = 6;

// =============================================================================
// Domains
// =============================================================================

/// Network domain of an address, link or socket.
///
/// Socket domains (network layers) sit below [`NetDomain::PHYSICAL_BASE`];
/// physical domains (data links) sit at or above it.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NetDomain {
    #[default]
    Invalid = 0,
    Local = 1,
    Ip4 = 2,
    Ip6 = 3,
    Netlink = 4,
    Ethernet = 0x1000,
    Wifi80211 = 0x1001,
}

impl NetDomain {
    pub const PHYSICAL_BASE: u32 = 0x1000;

    /// `true` for data-link domains (Ethernet, 802.11).
    #[inline]
    pub const fn is_physical(self) -> bool {
        self as u32 >= Self::PHYSICAL_BASE
    }

    /// `true` for domains a socket can be created in.
    #[inline]
    pub const fn is_socket_domain(self) -> bool {
        !matches!(self, Self::Invalid) && !self.is_physical()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Local => "local",
            Self::Ip4 => "ip4",
            Self::Ip6 => "ip6",
            Self::Netlink => "netlink",
            Self::Ethernet => "ethernet",
            Self::Wifi80211 => "802.11",
        }
    }
}

// =============================================================================
// Network address
// =============================================================================

/// A domain-tagged network or physical address with an optional port.
///
/// Ordering compares the port first, then the domain, then the address bytes.
/// The binding tables depend on this order: every entry sharing a
/// (port, domain) pair is contiguous.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    pub domain: NetDomain,
    pub port: u16,
    pub address: [u8; MAX_NETWORK_ADDRESS_SIZE],
}

impl NetworkAddress {
    /// All-zero address in the invalid domain. Sorts below every real address.
    pub const ZERO: Self = Self {
        domain: NetDomain::Invalid,
        port: 0,
        address: [0; MAX_NETWORK_ADDRESS_SIZE],
    };

    #[inline]
    pub const fn new(domain: NetDomain, port: u16, address: [u8; MAX_NETWORK_ADDRESS_SIZE]) -> Self {
        Self {
            domain,
            port,
            address,
        }
    }

    /// Build an IPv4 address. `octets` are in network byte order.
    pub const fn ipv4(octets: [u8; IP4_ADDRESS_SIZE], port: u16) -> Self {
        let mut address = [0u8; MAX_NETWORK_ADDRESS_SIZE];
        address[0] = octets[0];
        address[1] = octets[1];
        address[2] = octets[2];
        address[3] = octets[3];
        Self::new(NetDomain::Ip4, port, address)
    }

    /// Build an Ethernet hardware address.
    pub const fn ethernet(mac: [u8; ETHERNET_ADDRESS_SIZE]) -> Self {
        let mut address = [0u8; MAX_NETWORK_ADDRESS_SIZE];
        let mut i = 0;
        while i < ETHERNET_ADDRESS_SIZE {
            address[i] = mac[i];
            i += 1;
        }
        Self::new(NetDomain::Ethernet, 0, address)
    }

    /// An unspecified ("any") address in `domain`.
    #[inline]
    pub const fn any(domain: NetDomain, port: u16) -> Self {
        Self::new(domain, port, [0; MAX_NETWORK_ADDRESS_SIZE])
    }

    /// `true` if every address byte is zero. Domain and port are ignored.
    #[inline]
    pub fn is_unspecified(&self) -> bool {
        self.address.iter().all(|&b| b == 0)
    }

    /// Copy of this address with the port cleared.
    #[inline]
    pub const fn without_port(&self) -> Self {
        self.with_port(0)
    }

    #[inline]
    pub const fn with_port(&self, port: u16) -> Self {
        Self {
            domain: self.domain,
            port,
            address: self.address,
        }
    }

    /// Copy of this address with the address bytes zeroed, keeping only the domain.
    #[inline]
    pub const fn domain_only(&self) -> Self {
        Self::any(self.domain, 0)
    }

    /// Compare address bytes only.
    #[inline]
    pub fn same_address(&self, other: &Self) -> bool {
        self.address == other.address
    }

    /// First four address bytes, meaningful for [`NetDomain::Ip4`].
    #[inline]
    pub const fn ipv4_octets(&self) -> [u8; IP4_ADDRESS_SIZE] {
        [self.address[0], self.address[1], self.address[2], self.address[3]]
    }
}

impl Ord for NetworkAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.port
            .cmp(&other.port)
            .then(self.domain.cmp(&other.domain))
            .then_with(|| self.address.cmp(&other.address))
    }
}

impl PartialOrd for NetworkAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.domain {
            NetDomain::Ip4 => {
                let o = self.ipv4_octets();
                write!(f, "{}.{}.{}.{}", o[0], o[1], o[2], o[3])?;
                if self.port != 0 {
                    write!(f, ":{}", self.port)?;
                }
                Ok(())
            }
            NetDomain::Ethernet | NetDomain::Wifi80211 => {
                let a = &self.address;
                write!(
                    f,
                    "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                    a[0], a[1], a[2], a[3], a[4], a[5]
                )
            }
            domain => {
                write!(f, "{}:", domain.name())?;
                for byte in self.address.iter() {
                    write!(f, "{:02x}", byte)?;
                }
                if self.port != 0 {
                    write!(f, ":{}", self.port)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkAddress({})", self)
    }
}

// =============================================================================
// Socket kinds and well-known protocol numbers
// =============================================================================

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Stream = 1,
    Datagram = 2,
    Raw = 3,
    SequencedPacket = 5,
}

pub const IP4_PROTOCOL_NUMBER: u32 = 0x0800;
pub const IP6_PROTOCOL_NUMBER: u32 = 0x86DD;
pub const ARP_PROTOCOL_NUMBER: u32 = 0x0806;

pub const IPPROTO_ICMP: u32 = 1;
pub const IPPROTO_TCP: u32 = 6;
pub const IPPROTO_UDP: u32 = 17;
pub const IPPROTO_RAW: u32 = 255;

// =============================================================================
// Link speeds
// =============================================================================

pub const NET_SPEED_NONE: u64 = 0;
pub const NET_SPEED_10_MBPS: u64 = 10_000_000;
pub const NET_SPEED_100_MBPS: u64 = 100_000_000;
pub const NET_SPEED_1000_MBPS: u64 = 1_000_000_000;
pub const NET_SPEED_2500_MBPS: u64 = 2_500_000_000;
