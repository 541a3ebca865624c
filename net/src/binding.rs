//! Socket binding state machine.
//!
//! A socket moves `Invalid → Unbound → LocallyBound → FullyBound`, one
//! table per level.  [`NetCore::bind_socket`] validates the transition,
//! checks the requested address against every socket already holding the
//! same (port, domain) under the reuse rules, assigns an ephemeral port when
//! none was requested, and moves the socket between tables.  A failed bind
//! leaves the socket exactly where it was.
//!
//! # Lock order
//!
//! protocol table (exclusive) → socket binding → link.  Plugins and
//! collaborators are only called before the table lock is taken.

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use netcore_abi::net::{NetworkAddress, SocketKind};
use netcore_lib::klog_debug;

use crate::NetCore;
use crate::link::{Link, LinkAddressId};
use crate::protocol::{FullyBoundKey, LocallyBoundKey, ProtocolEntry, ProtocolFlags, SocketTables, UnboundKey};
use crate::socket::{BindingType, LinkLocalAddress, Socket, SocketFlags, SocketLinkOverride};
use crate::types::{NetError, PacketSizeInformation};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BindingFlags: u32 {
        /// Make the socket visible to inbound lookups once bound.
        const ACTIVATE           = 1 << 0;
        /// Leave a zero port alone instead of assigning an ephemeral one.
        const NO_PORT_ASSIGNMENT = 1 << 1;
        /// Allow rebinding at the same level, or to a less specific one.
        /// The socket takes the new local information wholesale.
        const ALLOW_REBIND       = 1 << 2;
    }
}

impl Default for BindingFlags {
    fn default() -> Self {
        Self::empty()
    }
}

// =============================================================================
// Reuse predicates
// =============================================================================

/// Both sockets agree to share a port between the unspecified address and
/// a concrete one.
#[inline]
pub fn can_reuse_any_address(candidate: SocketFlags, existing: SocketFlags) -> bool {
    candidate.contains(SocketFlags::REUSE_ANY_ADDRESS) && existing.contains(SocketFlags::REUSE_ANY_ADDRESS)
}

/// Both sockets agree to share an identical local address.
#[inline]
pub fn can_reuse_exact_address(candidate: SocketFlags, existing: SocketFlags) -> bool {
    candidate.contains(SocketFlags::REUSE_EXACT_ADDRESS) && existing.contains(SocketFlags::REUSE_EXACT_ADDRESS)
}

/// The existing socket is in time-wait and both agree to hand its address over.
#[inline]
pub fn can_reuse_time_wait(candidate: SocketFlags, existing: SocketFlags) -> bool {
    existing.contains(SocketFlags::TIME_WAIT)
        && candidate.contains(SocketFlags::REUSE_TIME_WAIT)
        && existing.contains(SocketFlags::REUSE_TIME_WAIT)
}

// =============================================================================
// Table helpers (protocol table lock held exclusively)
// =============================================================================

/// Take `socket` out of its table and mark it inactive and unbound.
///
/// Only the table's reference is dropped; the socket keeps its addresses
/// and its link until it is rebound or freed.
pub(crate) fn deactivate_locked(tables: &mut SocketTables, socket: &Arc<Socket>) {
    let mut binding = socket.lock_binding();
    if !socket.is_active() && binding.binding_type == BindingType::Invalid {
        return;
    }

    socket.clear_flags(SocketFlags::ACTIVE);
    let membership = tables.remove(socket.id(), &binding);
    if binding.binding_type != BindingType::Invalid {
        binding.last_table = binding.binding_type;
    }
    binding.binding_type = BindingType::Invalid;
    tables.forget_cached(socket.id());
    drop(binding);
    drop(membership);
}

/// Deactivate `socket` because its link went away.
pub(crate) fn detach_locked(tables: &mut SocketTables, socket: &Arc<Socket>) {
    deactivate_locked(tables, socket);
    socket.mark_detached();
}

/// Outbound source for a socket bound to `local`. A socket bound to the
/// unspecified address sends from its link entry's concrete address.
pub(crate) fn resolve_send_address(
    link: Option<&Arc<Link>>,
    entry: Option<LinkAddressId>,
    local: &NetworkAddress,
) -> NetworkAddress {
    if !local.is_unspecified() {
        return *local;
    }

    match (link, entry) {
        (Some(link), Some(entry)) => link
            .address_entry(entry)
            .map(|entry| entry.address.with_port(local.port))
            .unwrap_or(*local),
        _ => *local,
    }
}

fn log_conflict(existing: &Socket, local: &NetworkAddress) {
    klog_debug!(
        "net: {} unavailable, held by socket {} ({:?}, local {}, remote {})",
        local,
        existing.id().raw(),
        existing.binding_type(),
        existing.local_address(),
        existing.remote_address()
    );
}

impl NetCore {
    /// Can a socket with `candidate` flags use `local`?
    ///
    /// Walks the fully bound, locally bound and unbound tables in that
    /// order, stopping at the first socket that refuses to share.  Sockets
    /// in time-wait whose address is handed over are deactivated once the
    /// fully bound walk is past them.
    pub(crate) fn check_address_availability(
        &self,
        tables: &mut SocketTables,
        candidate: SocketFlags,
        local: &NetworkAddress,
    ) -> bool {
        let unspecified = local.is_unspecified();

        let mut time_wait: Vec<Arc<Socket>> = Vec::new();
        let mut available = true;
        for (key, existing) in tables.fully_bound.range(FullyBoundKey::first(local)..) {
            if !key.same_port(local) {
                break;
            }

            let flags = existing.flags();
            if unspecified {
                if !can_reuse_any_address(candidate, flags) {
                    log_conflict(existing, local);
                    available = false;
                    break;
                }
            } else if key.local_address == local.address {
                if !can_reuse_exact_address(candidate, flags) && !can_reuse_time_wait(candidate, flags) {
                    log_conflict(existing, local);
                    available = false;
                    break;
                }

                if flags.contains(SocketFlags::TIME_WAIT) {
                    time_wait.push(Arc::clone(existing));
                }
            }
        }

        for socket in &time_wait {
            klog_debug!("net: reclaiming {} from time-wait socket {}", local, socket.id().raw());
            deactivate_locked(tables, socket);
        }

        if !available {
            return false;
        }

        for (key, existing) in tables.locally_bound.range(LocallyBoundKey::first(local)..) {
            if !key.same_port(local) {
                break;
            }

            let flags = existing.flags();
            let allowed = if unspecified {
                can_reuse_any_address(candidate, flags)
            } else if key.local.same_address(local) {
                can_reuse_exact_address(candidate, flags)
            } else {
                true
            };

            if !allowed {
                log_conflict(existing, local);
                return false;
            }
        }

        for (key, existing) in tables.unbound.range(UnboundKey::first(local)..) {
            if !key.same_port(local) {
                break;
            }

            let flags = existing.flags();
            let allowed = if unspecified {
                can_reuse_exact_address(candidate, flags)
            } else {
                can_reuse_any_address(candidate, flags)
            };

            if !allowed {
                log_conflict(existing, local);
                return false;
            }
        }

        true
    }

    /// Probe the ephemeral range for a port `local` can use, starting at an
    /// offset derived from the platform time counter and wrapping around.
    fn assign_ephemeral_port(
        &self,
        tables: &mut SocketTables,
        candidate: SocketFlags,
        local: &NetworkAddress,
    ) -> Option<u16> {
        let start = self.config.ephemeral_port_start;
        let count = self.config.ephemeral_port_count;
        let mut offset = (self.platform.time_counter() % u64::from(count)) as u32;

        for _ in 0..count {
            let port = u16::try_from(start + offset).ok()?;
            if self.check_address_availability(tables, candidate, &local.with_port(port)) {
                return Some(port);
            }

            offset += 1;
            if offset == count {
                offset = 0;
            }
        }

        None
    }

    /// Claim the exact (local, remote) tuple, deactivating holders in
    /// time-wait. Any other holder makes the tuple unavailable.
    fn claim_tuple(
        &self,
        tables: &mut SocketTables,
        local: &NetworkAddress,
        remote: &NetworkAddress,
    ) -> Result<(), NetError> {
        let holders: Vec<Arc<Socket>> = tables
            .fully_bound
            .range(FullyBoundKey::first_of_tuple(local, remote)..)
            .take_while(|(key, _)| key.same_tuple(local, remote))
            .map(|(_, socket)| Arc::clone(socket))
            .collect();

        if let Some(owner) = holders
            .iter()
            .find(|socket| !socket.flags().contains(SocketFlags::TIME_WAIT))
        {
            log_conflict(owner, local);
            return Err(NetError::AddressInUse);
        }

        for socket in &holders {
            deactivate_locked(tables, socket);
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Bind
    // -------------------------------------------------------------------------

    /// Bind `socket` to `target`.
    ///
    /// `local` names the link and local address; it may be omitted for a
    /// fully bound target, in which case a link that can reach `remote` is
    /// chosen.  `remote` is required for, and only used by, a fully bound
    /// target.
    pub fn bind_socket(
        &self,
        socket: &Arc<Socket>,
        target: BindingType,
        local: Option<LinkLocalAddress>,
        remote: Option<&NetworkAddress>,
        flags: BindingFlags,
    ) -> Result<(), NetError> {
        let remote = match (target, remote) {
            (BindingType::Invalid, _) | (BindingType::FullyBound, None) => {
                return Err(NetError::InvalidParameter);
            }
            (BindingType::FullyBound, Some(remote)) => Some(*remote),
            _ => None,
        };

        let local = match (local, &remote) {
            (Some(local), _) => local,
            (None, Some(remote)) => self.find_link_for_remote_address(&remote.without_port())?,
            (None, None) => return Err(NetError::InvalidParameter),
        };

        let protocol = Arc::clone(socket.protocol());
        if protocol.flags().contains(ProtocolFlags::CONNECTION_BASED) {
            let link = local.link.as_deref();
            if remote
                .as_ref()
                .is_some_and(|remote| self.address_type(link, remote).is_group())
            {
                return Err(NetError::DestinationUnreachable);
            }

            if self.address_type(link, &local.local_address).is_group() {
                return Err(NetError::InvalidAddress);
            }
        }

        // Asks the data link, so it is computed before any lock is taken.
        let packet_size = match &local.link {
            Some(link) => link.packet_size_for(&socket.unbound_packet_size()),
            None => socket.unbound_packet_size(),
        };

        if socket.kind() == SocketKind::Raw {
            return self.bind_raw_socket(socket, target, local, remote.as_ref(), packet_size, flags);
        }

        self.bind_in_tables(&protocol, socket, target, local, remote, packet_size, flags)
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_in_tables(
        &self,
        protocol: &ProtocolEntry,
        socket: &Arc<Socket>,
        target: BindingType,
        local: LinkLocalAddress,
        remote: Option<NetworkAddress>,
        packet_size: PacketSizeInformation,
        flags: BindingFlags,
    ) -> Result<(), NetError> {
        let mut tables = protocol.tables.write();
        let mut binding = socket.lock_binding();
        let current = binding.binding_type;

        let backwards = current.rank() > target.rank() || (current == target && current != BindingType::FullyBound);
        if backwards && !flags.contains(BindingFlags::ALLOW_REBIND) {
            return Err(NetError::InvalidParameter);
        }

        let rebind = backwards && current != BindingType::Invalid;
        if current != BindingType::Invalid {
            let old_port = binding.local_receive_address.port;
            let new_port = local.local_address.port;
            if old_port != 0 && new_port != 0 && old_port != new_port {
                return Err(NetError::InvalidParameter);
            }
        }

        let keeps_local = current.has_local_binding() && !rebind;
        if keeps_local && target == BindingType::FullyBound {
            let same_link = match (&binding.link, &local.link) {
                (Some(bound), Some(requested)) => Arc::ptr_eq(bound, requested),
                (None, None) => true,
                _ => false,
            };

            if !same_link || binding.link_address != local.link_address {
                return Err(NetError::InvalidParameter);
            }
        }

        let (link, link_address, mut local_address) = if keeps_local {
            (binding.link.clone(), binding.link_address, binding.local_receive_address)
        } else {
            let mut address = local.local_address;
            if address.port == 0 && current != BindingType::Invalid {
                address.port = binding.local_receive_address.port;
            }

            (local.link, local.link_address, address)
        };

        if link.as_ref().is_some_and(|link| !link.is_up()) {
            drop(binding);
            detach_locked(&mut tables, socket);
            return Err(NetError::NoNetworkConnection);
        }

        // Out of the table while validating, so the socket cannot collide
        // with itself.
        let membership = tables.remove(socket.id(), &binding);
        let socket_flags = socket.flags();
        let skip_validation = keeps_local || socket_flags.contains(SocketFlags::FORKED_LISTENER);

        let mut outcome = Ok(());
        if local_address.port == 0
            && !flags.contains(BindingFlags::NO_PORT_ASSIGNMENT)
            && !protocol.flags().contains(ProtocolFlags::NO_PORTS)
        {
            match self.assign_ephemeral_port(&mut tables, socket_flags, &local_address) {
                Some(port) => local_address.port = port,
                None => outcome = Err(NetError::ResourceInUse),
            }
        } else if !skip_validation && !self.check_address_availability(&mut tables, socket_flags, &local_address) {
            outcome = Err(NetError::AddressInUse);
        }

        if let (true, Some(remote)) = (outcome.is_ok(), &remote) {
            outcome = self.claim_tuple(&mut tables, &local_address, remote);
        }

        if let Err(err) = outcome {
            if let Some(membership) = membership {
                tables.insert(membership, &binding);
            }

            if self.config.debug {
                klog_debug!(
                    "net: bind of socket {} to {:?} {} failed: {}",
                    socket.id().raw(),
                    target,
                    local_address,
                    err
                );
            }

            return Err(err);
        }

        binding.remote_address = remote.unwrap_or(NetworkAddress::ZERO);
        if !keeps_local {
            binding.packet_size = packet_size;
            binding.link = link;
            binding.link_address = link_address;
        }

        binding.local_receive_address = local_address;
        binding.local_send_address = resolve_send_address(binding.link.as_ref(), binding.link_address, &local_address);

        if flags.contains(BindingFlags::ACTIVATE) {
            let before = socket.set_flags(SocketFlags::ACTIVE);
            if target == BindingType::FullyBound
                && current != BindingType::FullyBound
                && before.contains(SocketFlags::ACTIVE)
            {
                socket.set_flags(SocketFlags::PREVIOUSLY_ACTIVE);
            }
        }

        binding.binding_type = target;
        tables.insert(membership.unwrap_or_else(|| Arc::clone(socket)), &binding);

        if self.config.debug {
            match target {
                BindingType::FullyBound => klog_debug!(
                    "net: socket {} fully bound, local {}, remote {}",
                    socket.id().raw(),
                    binding.local_receive_address,
                    binding.remote_address
                ),
                _ => klog_debug!(
                    "net: socket {} {:?}, local {}",
                    socket.id().raw(),
                    target,
                    binding.local_receive_address
                ),
            }
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Activation
    // -------------------------------------------------------------------------

    /// Make a bound socket visible to inbound lookups.
    pub fn activate_socket(&self, socket: &Arc<Socket>) -> Result<(), NetError> {
        let activate = || {
            if socket.binding_type() == BindingType::Invalid {
                return Err(NetError::NotConfigured);
            }

            socket.set_flags(SocketFlags::ACTIVE);
            Ok(())
        };

        if socket.kind() == SocketKind::Raw {
            let _raw = self.raw_sockets.read();
            activate()
        } else {
            let _tables = socket.protocol().tables.read();
            activate()
        }
    }

    /// Hide `socket` from lookups and drop it from its table.
    pub fn deactivate_socket(&self, socket: &Arc<Socket>) {
        if socket.kind() == SocketKind::Raw {
            let mut raw = self.raw_sockets.write();
            crate::raw::deactivate_raw_locked(&mut raw, socket);
            return;
        }

        let protocol = Arc::clone(socket.protocol());
        let mut tables = protocol.tables.write();
        deactivate_locked(&mut tables, socket);
    }

    /// Roll a fully bound socket back to locally bound, forgetting its
    /// remote address.
    ///
    /// If the connect was what activated the socket, it goes inactive again.
    pub fn disconnect_socket(&self, socket: &Arc<Socket>) -> Result<(), NetError> {
        if socket.kind() == SocketKind::Raw {
            return self.disconnect_raw_socket(socket);
        }

        let protocol = Arc::clone(socket.protocol());
        let mut tables = protocol.tables.write();
        let mut binding = socket.lock_binding();
        if binding.binding_type != BindingType::FullyBound {
            return Err(NetError::InvalidParameter);
        }

        let membership = tables.remove(socket.id(), &binding);
        tables.forget_cached(socket.id());

        binding.remote_address = NetworkAddress::ZERO;
        let before = socket.clear_flags(SocketFlags::PREVIOUSLY_ACTIVE);
        if !before.contains(SocketFlags::PREVIOUSLY_ACTIVE) {
            socket.clear_flags(SocketFlags::ACTIVE);
        }

        binding.binding_type = BindingType::LocallyBound;
        tables.insert(membership.unwrap_or_else(|| Arc::clone(socket)), &binding);
        Ok(())
    }

    /// Link information for sending through `link_information` without
    /// binding. Fails if the socket already has a link.
    pub fn initialize_socket_link_override(
        &self,
        socket: &Arc<Socket>,
        link_information: LinkLocalAddress,
    ) -> Result<SocketLinkOverride, NetError> {
        if socket.link().is_some() {
            return Err(NetError::ConnectionExists);
        }

        let link = link_information.link.as_ref().ok_or(NetError::InvalidParameter)?;
        let packet_size = link.packet_size_for(&socket.unbound_packet_size());
        Ok(SocketLinkOverride {
            link_information,
            packet_size,
        })
    }

    /// Detach every socket bound through `link` (and through `entry`, when
    /// given). Each one is deactivated and told it lost its network.
    pub(crate) fn detach_sockets(&self, link: &Arc<Link>, entry: Option<LinkAddressId>) {
        let protocols: Vec<Arc<ProtocolEntry>> = self.plugins.read().protocols.clone();
        for protocol in protocols {
            let mut tables = protocol.tables.write();
            let victims: Vec<Arc<Socket>> = tables
                .fully_bound
                .values()
                .chain(tables.locally_bound.values())
                .filter(|socket| socket.lock_binding().uses_link(link, entry))
                .cloned()
                .collect();

            for socket in &victims {
                detach_locked(&mut tables, socket);
            }

            if !victims.is_empty() {
                klog_debug!(
                    "net: detached {} socket(s) from {}",
                    victims.len(),
                    link.device().name()
                );
            }
        }

        self.detach_raw_sockets(link, entry);
    }
}
