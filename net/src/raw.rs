//! Raw sockets.
//!
//! Raw sockets bypass the per-protocol tables: they sit in one list on the
//! core, matched against every inbound packet by domain and network
//! protocol.  The list has its own lock, independent of any protocol's.

use alloc::sync::Arc;
use alloc::vec::Vec;

use netcore_abi::net::NetworkAddress;
use netcore_lib::klog_debug;

use crate::NetCore;
use crate::binding::{BindingFlags, resolve_send_address};
use crate::link::{Link, LinkAddressId};
use crate::socket::{BindingType, LinkLocalAddress, Socket, SocketFlags};
use crate::types::{NetError, PacketSizeInformation};

/// Take `socket` off the raw list and mark it inactive and unbound.
/// The raw list lock must be held exclusively.
pub(crate) fn deactivate_raw_locked(raw: &mut Vec<Arc<Socket>>, socket: &Arc<Socket>) {
    let mut binding = socket.lock_binding();
    if !socket.is_active() && binding.binding_type == BindingType::Invalid {
        return;
    }

    socket.clear_flags(SocketFlags::ACTIVE);
    binding.binding_type = BindingType::Invalid;
    drop(binding);

    raw.retain(|member| !Arc::ptr_eq(member, socket));
}

fn detach_raw_locked(raw: &mut Vec<Arc<Socket>>, socket: &Arc<Socket>) {
    deactivate_raw_locked(raw, socket);
    socket.mark_detached();
}

impl NetCore {
    pub(crate) fn bind_raw_socket(
        &self,
        socket: &Arc<Socket>,
        target: BindingType,
        local: LinkLocalAddress,
        remote: Option<&NetworkAddress>,
        packet_size: PacketSizeInformation,
        flags: BindingFlags,
    ) -> Result<(), NetError> {
        let mut raw = self.raw_sockets.write();
        let mut binding = socket.lock_binding();
        let current = binding.binding_type;

        let backwards = current.rank() > target.rank() || (current == target && current != BindingType::FullyBound);
        if backwards && !flags.contains(BindingFlags::ALLOW_REBIND) {
            return Err(NetError::InvalidParameter);
        }

        if current != BindingType::Invalid {
            let old_port = binding.local_receive_address.port;
            let new_port = local.local_address.port;
            if old_port != 0 && new_port != 0 && old_port != new_port {
                return Err(NetError::InvalidParameter);
            }
        }

        // The link was picked because it reaches the remote; a locally bound
        // socket must already be on it.
        if current.has_local_binding() && target == BindingType::FullyBound {
            let same_link = match (&binding.link, &local.link) {
                (Some(bound), Some(requested)) => Arc::ptr_eq(bound, requested),
                (None, None) => true,
                _ => false,
            };

            if !same_link || binding.link_address != local.link_address {
                return Err(NetError::InvalidParameter);
            }
        }

        if self.config.debug {
            match (target, remote) {
                (BindingType::FullyBound, Some(remote)) => klog_debug!(
                    "net: binding fully bound raw socket {}, local {}, remote {}",
                    socket.id().raw(),
                    local.local_address,
                    remote
                ),
                _ => klog_debug!(
                    "net: binding {:?} raw socket {}, local {}",
                    target,
                    socket.id().raw(),
                    local.local_address
                ),
            }
        }

        if local.link.as_ref().is_some_and(|link| !link.is_up()) {
            drop(binding);
            detach_raw_locked(&mut raw, socket);
            return Err(NetError::NoNetworkConnection);
        }

        if let Some(remote) = remote {
            binding.remote_address = *remote;
        }

        if binding.link.take().is_some() {
            binding.link_address = None;
            binding.packet_size = socket.unbound_packet_size();
        }

        if let Some(link) = local.link {
            binding.packet_size = packet_size;
            binding.link = Some(link);
            binding.link_address = local.link_address;
        }

        binding.local_receive_address = local.local_address;
        binding.local_send_address =
            resolve_send_address(binding.link.as_ref(), binding.link_address, &local.local_address);

        if flags.contains(BindingFlags::ACTIVATE) {
            let before = socket.set_flags(SocketFlags::ACTIVE);
            if target == BindingType::FullyBound
                && current != BindingType::FullyBound
                && before.contains(SocketFlags::ACTIVE)
            {
                socket.set_flags(SocketFlags::PREVIOUSLY_ACTIVE);
            }
        }

        if current == BindingType::Invalid {
            raw.push(Arc::clone(socket));
        }

        binding.binding_type = target;
        Ok(())
    }

    pub(crate) fn disconnect_raw_socket(&self, socket: &Arc<Socket>) -> Result<(), NetError> {
        let _raw = self.raw_sockets.write();
        let mut binding = socket.lock_binding();
        if binding.binding_type != BindingType::FullyBound {
            return Err(NetError::InvalidParameter);
        }

        binding.remote_address = NetworkAddress::ZERO;
        let before = socket.clear_flags(SocketFlags::PREVIOUSLY_ACTIVE);
        if !before.contains(SocketFlags::PREVIOUSLY_ACTIVE) {
            socket.clear_flags(SocketFlags::ACTIVE);
        }

        binding.binding_type = BindingType::LocallyBound;
        Ok(())
    }

    /// Detach every raw socket bound through `link` (and `entry`).
    pub(crate) fn detach_raw_sockets(&self, link: &Arc<Link>, entry: Option<LinkAddressId>) {
        let mut raw = self.raw_sockets.write();
        let victims: Vec<Arc<Socket>> = raw
            .iter()
            .filter(|socket| socket.lock_binding().uses_link(link, entry))
            .cloned()
            .collect();

        for socket in &victims {
            detach_raw_locked(&mut raw, socket);
        }
    }

    /// Raw sockets that should see a packet of `network_protocol` sent from
    /// `source` to `destination`.
    ///
    /// Returned in list order; the caller delivers outside the list lock.
    pub fn raw_sockets_process_received_data(
        &self,
        _link: &Arc<Link>,
        source: &NetworkAddress,
        destination: &NetworkAddress,
        network_protocol: u32,
    ) -> Vec<Arc<Socket>> {
        let raw = self.raw_sockets.read();
        raw.iter()
            .filter(|socket| {
                if socket.domain() != destination.domain || socket.network_protocol() != network_protocol {
                    return false;
                }

                let binding = socket.lock_binding();
                match binding.binding_type {
                    BindingType::LocallyBound => binding.local_receive_address.address == destination.address,
                    BindingType::FullyBound => {
                        binding.local_receive_address.address == destination.address
                            && binding.remote_address.address == source.address
                    }
                    _ => true,
                }
            })
            .cloned()
            .collect()
    }

    /// Number of sockets on the raw list.
    pub fn raw_socket_count(&self) -> usize {
        self.raw_sockets.read().len()
    }
}
