//! Shared value types for the network core: the error enum, address
//! classification, and packet size accounting.

use core::fmt;

// =============================================================================
// NetError
// =============================================================================

/// Error type for every fallible network core operation.
///
/// Conversion to POSIX errno happens at the outer boundary via [`to_errno`].
///
/// [`to_errno`]: NetError::to_errno
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetError {
    /// Malformed argument or illegal state transition (EINVAL).
    InvalidParameter,
    /// Caller structure is older than this core understands (EINVAL).
    VersionMismatch,
    /// No plugin handles the requested domain or protocol (EOPNOTSUPP).
    NotSupported,
    /// Device information is inconsistent with the link (EINVAL).
    InvalidConfiguration,
    /// A plugin for the same domain or protocol is already registered (EEXIST).
    DuplicateEntry,
    /// Allocation or collaborator resource failure (ENOMEM).
    InsufficientResources,
    /// Every ephemeral port is taken (EADDRNOTAVAIL).
    ResourceInUse,
    /// Local address conflicts with another socket (EADDRINUSE).
    AddressInUse,
    /// Socket already has a link (EISCONN).
    ConnectionExists,
    /// The link is down or no link is usable (ENETDOWN).
    NoNetworkConnection,
    /// Connection-based protocol aimed at a group address (EHOSTUNREACH).
    DestinationUnreachable,
    /// Socket is not bound (ENOTCONN).
    NotConfigured,
    /// Device has no link (ENODEV).
    NoSuchDevice,
    /// Lookup miss (ENOENT).
    NotFound,
    /// No link owns the address, or a group address was used locally (EADDRNOTAVAIL).
    InvalidAddress,
    /// Address translation deadline passed (ETIMEDOUT).
    TimedOut,
    /// Caller buffer too small (ENOBUFS).
    BufferTooSmall,
}

impl NetError {
    /// Convert to a negative POSIX errno value.
    pub const fn to_errno(&self) -> i32 {
        match self {
            Self::InvalidParameter => -22,       // EINVAL
            Self::VersionMismatch => -22,        // EINVAL
            Self::NotSupported => -95,           // EOPNOTSUPP
            Self::InvalidConfiguration => -22,   // EINVAL
            Self::DuplicateEntry => -17,         // EEXIST
            Self::InsufficientResources => -12,  // ENOMEM
            Self::ResourceInUse => -99,          // EADDRNOTAVAIL
            Self::AddressInUse => -98,           // EADDRINUSE
            Self::ConnectionExists => -106,      // EISCONN
            Self::NoNetworkConnection => -100,   // ENETDOWN
            Self::DestinationUnreachable => -113, // EHOSTUNREACH
            Self::NotConfigured => -107,         // ENOTCONN
            Self::NoSuchDevice => -19,           // ENODEV
            Self::NotFound => -2,                // ENOENT
            Self::InvalidAddress => -99,         // EADDRNOTAVAIL
            Self::TimedOut => -110,              // ETIMEDOUT
            Self::BufferTooSmall => -105,        // ENOBUFS
        }
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidParameter => "invalid parameter",
            Self::VersionMismatch => "structure version mismatch",
            Self::NotSupported => "not supported",
            Self::InvalidConfiguration => "invalid configuration",
            Self::DuplicateEntry => "duplicate entry",
            Self::InsufficientResources => "insufficient resources",
            Self::ResourceInUse => "no ephemeral port available",
            Self::AddressInUse => "address already in use",
            Self::ConnectionExists => "socket already has a link",
            Self::NoNetworkConnection => "no network connection",
            Self::DestinationUnreachable => "destination unreachable",
            Self::NotConfigured => "socket not bound",
            Self::NoSuchDevice => "no such device",
            Self::NotFound => "not found",
            Self::InvalidAddress => "invalid address",
            Self::TimedOut => "address translation timed out",
            Self::BufferTooSmall => "buffer too small",
        };
        f.write_str(text)
    }
}

// =============================================================================
// Address classification
// =============================================================================

/// Classification a network layer assigns to an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressType {
    Unknown,
    Any,
    Unicast,
    Broadcast,
    Multicast,
}

impl AddressType {
    /// `true` for addresses that name a group of hosts.
    #[inline]
    pub const fn is_group(self) -> bool {
        matches!(self, Self::Broadcast | Self::Multicast)
    }
}

// =============================================================================
// Packet size accounting
// =============================================================================

/// Header/footer reservation and payload bounds for one layer, or for a
/// whole stack of layers once combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketSizeInformation {
    pub header_size: u32,
    pub footer_size: u32,
    pub max_packet_size: u32,
    pub min_packet_size: u32,
}

impl PacketSizeInformation {
    pub const fn new(header_size: u32, footer_size: u32, max_packet_size: u32, min_packet_size: u32) -> Self {
        Self {
            header_size,
            footer_size,
            max_packet_size,
            min_packet_size,
        }
    }

    /// Wrap `inner` in this layer.
    ///
    /// The outer layer's header and footer are added around the inner
    /// bounds; the result is then clamped to the outer layer's own
    /// maximum and raised to its minimum.
    pub fn stack(&self, inner: &Self) -> Self {
        let framing = self.header_size.saturating_add(self.footer_size);
        let mut max = inner.max_packet_size.saturating_add(framing);
        if max > self.max_packet_size {
            max = self.max_packet_size;
        }

        let mut min = inner.min_packet_size.saturating_add(framing);
        if min < self.min_packet_size {
            min = self.min_packet_size;
        }

        Self {
            header_size: inner.header_size.saturating_add(self.header_size),
            footer_size: inner.footer_size.saturating_add(self.footer_size),
            max_packet_size: max,
            min_packet_size: min,
        }
    }
}
