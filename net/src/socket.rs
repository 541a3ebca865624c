//! Network sockets as the binding layer sees them.
//!
//! A [`Socket`] carries the addresses it is bound to, the link it reaches
//! the network through, and a handful of flags controlling address reuse and
//! whether inbound lookups may select it.  Binding state changes only
//! through [`NetCore`](crate::NetCore), with the owning protocol's table lock
//! held; the per-socket mutex orders readers against those changes.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;
use netcore_abi::net::{NetDomain, NetworkAddress, SocketKind};
use spin::{Mutex, MutexGuard};

use crate::link::{Link, LinkAddressId};
use crate::protocol::ProtocolEntry;
use crate::types::{NetError, PacketSizeInformation};

bitflags! {
    /// Per-socket behavior and state flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SocketFlags: u32 {
        /// Share a port with other sockets bound to the unspecified address.
        const REUSE_ANY_ADDRESS       = 1 << 0;
        /// Share an identical local address (multicast listeners).
        const REUSE_EXACT_ADDRESS     = 1 << 1;
        /// Take over a tuple held by a socket in time-wait.
        const REUSE_TIME_WAIT         = 1 << 2;
        const BROADCAST_ENABLED       = 1 << 3;
        /// Visible to inbound lookups.
        const ACTIVE                  = 1 << 4;
        /// Was active before the bind that made it fully bound.
        const PREVIOUSLY_ACTIVE       = 1 << 5;
        const TIME_WAIT               = 1 << 6;
        /// Spawned by a listener; its tuple is already known to be unique.
        const FORKED_LISTENER         = 1 << 7;
        const NETWORK_HEADER_INCLUDED = 1 << 8;
        const KERNEL                  = 1 << 9;
    }
}

impl Default for SocketFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// How specifically a socket is bound.
///
/// `Invalid` means "in no table"; the other three name the table the socket
/// lives in, from least to most specific.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingType {
    Invalid,
    Unbound,
    LocallyBound,
    FullyBound,
}

impl BindingType {
    /// Position in the specificity order. `Invalid` is lowest.
    #[inline]
    pub(crate) const fn rank(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Unbound => 1,
            Self::LocallyBound => 2,
            Self::FullyBound => 3,
        }
    }

    /// `true` once the socket has a concrete local address.
    #[inline]
    pub(crate) const fn has_local_binding(self) -> bool {
        matches!(self, Self::LocallyBound | Self::FullyBound)
    }
}

/// A link, one of its address entries, and the local address a socket
/// should bind to there.
#[derive(Clone, Debug)]
pub struct LinkLocalAddress {
    pub link: Option<Arc<Link>>,
    pub link_address: Option<LinkAddressId>,
    pub local_address: NetworkAddress,
}

impl LinkLocalAddress {
    /// Local information for a socket that is not tied to any link.
    pub const fn unlinked(local_address: NetworkAddress) -> Self {
        Self {
            link: None,
            link_address: None,
            local_address,
        }
    }
}

/// Link information borrowed for a send that bypasses the socket's binding.
#[derive(Clone, Debug)]
pub struct SocketLinkOverride {
    pub link_information: LinkLocalAddress,
    pub packet_size: PacketSizeInformation,
}

/// Unique, never reused socket identifier. Also the tie break that keeps
/// otherwise identical table keys distinct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketId(u64);

impl SocketId {
    /// Below every id ever handed out; used to start range scans.
    pub(crate) const MIN: Self = Self(0);

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Binding state. Only mutated with the protocol table lock (or the raw
/// socket list lock) held exclusively.
#[derive(Clone, Debug)]
pub(crate) struct SocketBinding {
    pub(crate) binding_type: BindingType,
    /// Table the socket was in before its last deactivation. Lets a fan-out
    /// resume after a socket that has since left the tables.
    pub(crate) last_table: BindingType,
    pub(crate) local_receive_address: NetworkAddress,
    pub(crate) local_send_address: NetworkAddress,
    pub(crate) remote_address: NetworkAddress,
    pub(crate) link: Option<Arc<Link>>,
    pub(crate) link_address: Option<LinkAddressId>,
    pub(crate) packet_size: PacketSizeInformation,
}

impl SocketBinding {
    /// `true` if this binding goes through `link`, and through `entry` when
    /// one is given.
    pub(crate) fn uses_link(&self, link: &Arc<Link>, entry: Option<LinkAddressId>) -> bool {
        let Some(bound) = &self.link else {
            return false;
        };

        Arc::ptr_eq(bound, link) && entry.is_none_or(|entry| self.link_address == Some(entry))
    }
}

pub struct Socket {
    id: SocketId,
    protocol: Arc<ProtocolEntry>,
    domain: NetDomain,
    network_protocol: u32,
    flags: AtomicU32,
    unbound_packet_size: PacketSizeInformation,
    binding: Mutex<SocketBinding>,
    last_error: Mutex<Option<NetError>>,
    disconnected: AtomicBool,
}

impl Socket {
    pub(crate) fn new(
        protocol: Arc<ProtocolEntry>,
        domain: NetDomain,
        network_protocol: u32,
        unbound_packet_size: PacketSizeInformation,
    ) -> Self {
        Self {
            id: SocketId(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed)),
            protocol,
            domain,
            network_protocol,
            flags: AtomicU32::new(0),
            unbound_packet_size,
            binding: Mutex::new(SocketBinding {
                binding_type: BindingType::Invalid,
                last_table: BindingType::Invalid,
                local_receive_address: NetworkAddress::ZERO,
                local_send_address: NetworkAddress::ZERO,
                remote_address: NetworkAddress::ZERO,
                link: None,
                link_address: None,
                packet_size: unbound_packet_size,
            }),
            last_error: Mutex::new(None),
            disconnected: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> SocketId {
        self.id
    }

    #[inline]
    pub fn protocol(&self) -> &Arc<ProtocolEntry> {
        &self.protocol
    }

    #[inline]
    pub fn kind(&self) -> SocketKind {
        self.protocol.properties().kind
    }

    #[inline]
    pub fn domain(&self) -> NetDomain {
        self.domain
    }

    /// Protocol number as carried in the network header.
    #[inline]
    pub fn network_protocol(&self) -> u32 {
        self.network_protocol
    }

    #[inline]
    pub fn flags(&self) -> SocketFlags {
        SocketFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    /// Set `flags`, returning the flags as they were before.
    pub fn set_flags(&self, flags: SocketFlags) -> SocketFlags {
        SocketFlags::from_bits_retain(self.flags.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    /// Clear `flags`, returning the flags as they were before.
    pub fn clear_flags(&self, flags: SocketFlags) -> SocketFlags {
        SocketFlags::from_bits_retain(self.flags.fetch_and(!flags.bits(), Ordering::AcqRel))
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.flags().contains(SocketFlags::ACTIVE)
    }

    pub(crate) fn lock_binding(&self) -> MutexGuard<'_, SocketBinding> {
        self.binding.lock()
    }

    pub fn binding_type(&self) -> BindingType {
        self.binding.lock().binding_type
    }

    pub fn local_address(&self) -> NetworkAddress {
        self.binding.lock().local_receive_address
    }

    /// Source address for outbound packets. Differs from the receive
    /// address when the socket is bound to the unspecified address.
    pub fn local_send_address(&self) -> NetworkAddress {
        self.binding.lock().local_send_address
    }

    pub fn remote_address(&self) -> NetworkAddress {
        self.binding.lock().remote_address
    }

    pub fn link(&self) -> Option<Arc<Link>> {
        self.binding.lock().link.clone()
    }

    pub fn link_address(&self) -> Option<LinkAddressId> {
        self.binding.lock().link_address
    }

    pub fn packet_size(&self) -> PacketSizeInformation {
        self.binding.lock().packet_size
    }

    #[inline]
    pub fn unbound_packet_size(&self) -> PacketSizeInformation {
        self.unbound_packet_size
    }

    pub fn last_error(&self) -> Option<NetError> {
        *self.last_error.lock()
    }

    pub fn take_last_error(&self) -> Option<NetError> {
        self.last_error.lock().take()
    }

    /// `true` once the socket's link went away underneath it.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Record that the socket lost its network: later I/O sees
    /// `NoNetworkConnection`.
    pub(crate) fn mark_detached(&self) {
        *self.last_error.lock() = Some(NetError::NoNetworkConnection);
        self.disconnected.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.binding.lock();
        f.debug_struct("Socket")
            .field("id", &self.id.raw())
            .field("kind", &self.kind())
            .field("binding_type", &binding.binding_type)
            .field("local", &binding.local_receive_address)
            .field("remote", &binding.remote_address)
            .field("flags", &self.flags())
            .finish()
    }
}
