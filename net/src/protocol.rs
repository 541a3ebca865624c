//! Per-protocol socket binding tables.
//!
//! Each registered transport protocol owns three ordered maps, one per
//! binding level.  Keys lead with the local port and domain so every socket
//! that could collide on a (port, domain) pair sits in one contiguous run;
//! the socket id closes every key so duplicate addresses (reuse) coexist.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use bitflags::bitflags;
use netcore_abi::net::{MAX_NETWORK_ADDRESS_SIZE, NetDomain, NetworkAddress, SocketKind};
use spin::{Mutex, RwLock};

use crate::socket::{BindingType, Socket, SocketBinding, SocketId};
use crate::types::PacketSizeInformation;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ProtocolFlags: u32 {
        /// Stream-style protocol; group addresses are never valid endpoints.
        const CONNECTION_BASED = 1 << 0;
        /// Ports are meaningless; never assign an ephemeral one.
        const NO_PORTS         = 1 << 1;
        /// Every inbound packet goes to every matching socket.
        const ALWAYS_FAN_OUT   = 1 << 2;
    }
}

impl Default for ProtocolFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// What a transport protocol declares when it registers.
#[derive(Clone, Copy, Debug)]
pub struct ProtocolProperties {
    pub kind: SocketKind,
    /// Protocol number in the network header (e.g. `IPPROTO_UDP`).
    pub protocol_number: u32,
    pub flags: ProtocolFlags,
    /// Header and size requirements of the protocol itself.
    pub packet_size: PacketSizeInformation,
}

pub struct ProtocolEntry {
    properties: ProtocolProperties,
    pub(crate) tables: RwLock<SocketTables>,
}

impl ProtocolEntry {
    pub(crate) fn new(properties: ProtocolProperties) -> Self {
        Self {
            properties,
            tables: RwLock::new(SocketTables::new()),
        }
    }

    #[inline]
    pub fn properties(&self) -> &ProtocolProperties {
        &self.properties
    }

    #[inline]
    pub fn flags(&self) -> ProtocolFlags {
        self.properties.flags
    }

    /// Number of sockets currently held at `binding_type`.
    pub fn socket_count(&self, binding_type: BindingType) -> usize {
        let tables = self.tables.read();
        match binding_type {
            BindingType::Unbound => tables.unbound.len(),
            BindingType::LocallyBound => tables.locally_bound.len(),
            BindingType::FullyBound => tables.fully_bound.len(),
            BindingType::Invalid => 0,
        }
    }
}

// =============================================================================
// Table keys
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct UnboundKey {
    pub(crate) port: u16,
    pub(crate) domain: NetDomain,
    pub(crate) id: SocketId,
}

/// Ordered by the local address (port, domain, bytes), then id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct LocallyBoundKey {
    pub(crate) local: NetworkAddress,
    pub(crate) id: SocketId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct FullyBoundKey {
    pub(crate) local_port: u16,
    pub(crate) local_domain: NetDomain,
    pub(crate) remote: NetworkAddress,
    pub(crate) local_address: [u8; MAX_NETWORK_ADDRESS_SIZE],
    pub(crate) id: SocketId,
}

impl UnboundKey {
    pub(crate) fn new(binding: &SocketBinding, id: SocketId) -> Self {
        Self {
            port: binding.local_receive_address.port,
            domain: binding.local_receive_address.domain,
            id,
        }
    }

    /// Smallest key for (port, domain).
    pub(crate) fn first(local: &NetworkAddress) -> Self {
        Self {
            port: local.port,
            domain: local.domain,
            id: SocketId::MIN,
        }
    }

    #[inline]
    pub(crate) fn same_port(&self, local: &NetworkAddress) -> bool {
        self.port == local.port && self.domain == local.domain
    }
}

impl LocallyBoundKey {
    pub(crate) fn new(binding: &SocketBinding, id: SocketId) -> Self {
        Self {
            local: binding.local_receive_address,
            id,
        }
    }

    pub(crate) fn first(local: &NetworkAddress) -> Self {
        Self {
            local: NetworkAddress::any(local.domain, local.port),
            id: SocketId::MIN,
        }
    }

    #[inline]
    pub(crate) fn same_port(&self, local: &NetworkAddress) -> bool {
        self.local.port == local.port && self.local.domain == local.domain
    }
}

impl FullyBoundKey {
    pub(crate) fn new(binding: &SocketBinding, id: SocketId) -> Self {
        Self {
            local_port: binding.local_receive_address.port,
            local_domain: binding.local_receive_address.domain,
            remote: binding.remote_address,
            local_address: binding.local_receive_address.address,
            id,
        }
    }

    pub(crate) fn first(local: &NetworkAddress) -> Self {
        Self {
            local_port: local.port,
            local_domain: local.domain,
            remote: NetworkAddress::ZERO,
            local_address: [0; MAX_NETWORK_ADDRESS_SIZE],
            id: SocketId::MIN,
        }
    }

    /// Smallest key for an exact (local, remote) tuple.
    pub(crate) fn first_of_tuple(local: &NetworkAddress, remote: &NetworkAddress) -> Self {
        Self {
            local_port: local.port,
            local_domain: local.domain,
            remote: *remote,
            local_address: local.address,
            id: SocketId::MIN,
        }
    }

    #[inline]
    pub(crate) fn same_port(&self, local: &NetworkAddress) -> bool {
        self.local_port == local.port && self.local_domain == local.domain
    }

    #[inline]
    pub(crate) fn same_tuple(&self, local: &NetworkAddress, remote: &NetworkAddress) -> bool {
        self.same_port(local) && self.remote == *remote && self.local_address == local.address
    }
}

// =============================================================================
// Tables
// =============================================================================

pub(crate) struct SocketTables {
    pub(crate) unbound: BTreeMap<UnboundKey, Arc<Socket>>,
    pub(crate) locally_bound: BTreeMap<LocallyBoundKey, Arc<Socket>>,
    pub(crate) fully_bound: BTreeMap<FullyBoundKey, Arc<Socket>>,
    /// Last fully bound socket a lookup returned. Lookups refresh it under
    /// the shared table lock, hence its own mutex.
    pub(crate) last_socket: Mutex<Option<Arc<Socket>>>,
}

impl SocketTables {
    pub(crate) const fn new() -> Self {
        Self {
            unbound: BTreeMap::new(),
            locally_bound: BTreeMap::new(),
            fully_bound: BTreeMap::new(),
            last_socket: Mutex::new(None),
        }
    }

    /// Add `socket` to the table matching `binding.binding_type`.
    pub(crate) fn insert(&mut self, socket: Arc<Socket>, binding: &SocketBinding) {
        let id = socket.id();
        match binding.binding_type {
            BindingType::Unbound => {
                self.unbound.insert(UnboundKey::new(binding, id), socket);
            }
            BindingType::LocallyBound => {
                self.locally_bound.insert(LocallyBoundKey::new(binding, id), socket);
            }
            BindingType::FullyBound => {
                self.fully_bound.insert(FullyBoundKey::new(binding, id), socket);
            }
            BindingType::Invalid => {}
        }
    }

    /// Take `id` out of the table matching `binding.binding_type`. The key
    /// is rebuilt from `binding`, which must not have changed since insert.
    pub(crate) fn remove(&mut self, id: SocketId, binding: &SocketBinding) -> Option<Arc<Socket>> {
        match binding.binding_type {
            BindingType::Unbound => self.unbound.remove(&UnboundKey::new(binding, id)),
            BindingType::LocallyBound => self.locally_bound.remove(&LocallyBoundKey::new(binding, id)),
            BindingType::FullyBound => self.fully_bound.remove(&FullyBoundKey::new(binding, id)),
            BindingType::Invalid => None,
        }
    }

    /// Drop the lookup cache if it holds `id`.
    pub(crate) fn forget_cached(&self, id: SocketId) {
        let mut last = self.last_socket.lock();
        if last.as_ref().is_some_and(|socket| socket.id() == id) {
            *last = None;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.unbound.clear();
        self.locally_bound.clear();
        self.fully_bound.clear();
        *self.last_socket.get_mut() = None;
    }
}
