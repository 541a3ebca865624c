//! Inbound socket lookup.
//!
//! A unicast packet goes to the single most specific active socket: fully
//! bound, then locally bound, then unbound.  A packet to a broadcast or
//! multicast address, or for a protocol that always fans out, goes to every
//! matching socket; the caller walks them one call at a time, passing the
//! previous result back in.

use alloc::sync::Arc;
use core::ops::Bound;

use netcore_abi::net::NetworkAddress;

use crate::NetCore;
use crate::protocol::{FullyBoundKey, LocallyBoundKey, ProtocolEntry, ProtocolFlags, SocketTables, UnboundKey};
use crate::socket::{BindingType, Socket};

/// Outcome of [`NetCore::find_socket`].
#[derive(Clone, Debug)]
pub enum SocketLookup {
    /// The only match, or the last one of a fan-out.
    Found(Arc<Socket>),
    /// A fan-out match with more to come. Pass it back as `previous`.
    MoreProcessingRequired(Arc<Socket>),
    NotFound,
}

impl SocketLookup {
    pub fn socket(&self) -> Option<&Arc<Socket>> {
        match self {
            Self::Found(socket) | Self::MoreProcessingRequired(socket) => Some(socket),
            Self::NotFound => None,
        }
    }

    #[inline]
    pub fn has_more(&self) -> bool {
        matches!(self, Self::MoreProcessingRequired(_))
    }
}

/// Position of a match, so a scan can resume right after it.
#[derive(Clone, Copy)]
enum Cursor {
    Start,
    FullyBound(FullyBoundKey),
    LocallyBound(LocallyBoundKey),
    Unbound(UnboundKey),
}

impl NetCore {
    /// Find the socket(s) of `protocol` that should receive a packet sent
    /// from `remote` to `local`.
    ///
    /// Fans out when the protocol always does, when `local` is a group
    /// address, or when `previous` continues an earlier fan-out.
    pub fn find_socket(
        &self,
        protocol: &ProtocolEntry,
        local: &NetworkAddress,
        remote: &NetworkAddress,
        previous: Option<&Arc<Socket>>,
    ) -> SocketLookup {
        let group = self.address_type(None, local).is_group();
        let fan_out = group || previous.is_some() || protocol.flags().contains(ProtocolFlags::ALWAYS_FAN_OUT);

        let tables = protocol.tables.read();
        if fan_out {
            find_next(&tables, local, remote, previous, group)
        } else {
            find_single(&tables, local, remote)
        }
    }
}

fn find_single(tables: &SocketTables, local: &NetworkAddress, remote: &NetworkAddress) -> SocketLookup {
    let cached = tables.last_socket.lock().clone();
    if let Some(socket) = cached {
        let hit = {
            let binding = socket.lock_binding();
            binding.binding_type == BindingType::FullyBound
                && binding.local_receive_address == *local
                && binding.remote_address == *remote
        };

        if hit && socket.is_active() {
            return SocketLookup::Found(socket);
        }
    }

    match next_match(tables, Cursor::Start, local, remote, false) {
        Some((Cursor::FullyBound(_), socket)) => {
            *tables.last_socket.lock() = Some(Arc::clone(&socket));
            SocketLookup::Found(socket)
        }
        Some((_, socket)) => SocketLookup::Found(socket),
        None => SocketLookup::NotFound,
    }
}

fn find_next(
    tables: &SocketTables,
    local: &NetworkAddress,
    remote: &NetworkAddress,
    previous: Option<&Arc<Socket>>,
    group: bool,
) -> SocketLookup {
    let cursor = match previous {
        None => Cursor::Start,
        Some(previous) => {
            let binding = previous.lock_binding();
            let bound = &binding.local_receive_address;
            if bound.port != local.port || bound.domain != local.domain {
                return SocketLookup::NotFound;
            }

            // A socket deactivated since it was returned still marks its
            // old position; its addresses are left in place.
            let table = match binding.binding_type {
                BindingType::Invalid => binding.last_table,
                current => current,
            };

            match table {
                BindingType::FullyBound => Cursor::FullyBound(FullyBoundKey::new(&binding, previous.id())),
                BindingType::LocallyBound => Cursor::LocallyBound(LocallyBoundKey::new(&binding, previous.id())),
                BindingType::Unbound => Cursor::Unbound(UnboundKey::new(&binding, previous.id())),
                BindingType::Invalid => return SocketLookup::NotFound,
            }
        }
    };

    let Some((position, socket)) = next_match(tables, cursor, local, remote, group) else {
        return SocketLookup::NotFound;
    };

    if next_match(tables, position, local, remote, group).is_some() {
        SocketLookup::MoreProcessingRequired(socket)
    } else {
        SocketLookup::Found(socket)
    }
}

/// First active socket strictly after `after` that should see the packet.
///
/// Tables are scanned most specific first.  With `group` set, the local
/// address bytes are not compared: every socket on the port qualifies.
fn next_match(
    tables: &SocketTables,
    after: Cursor,
    local: &NetworkAddress,
    remote: &NetworkAddress,
    group: bool,
) -> Option<(Cursor, Arc<Socket>)> {
    let fully_start = match after {
        Cursor::Start => Some(Bound::Included(FullyBoundKey::first(local))),
        Cursor::FullyBound(key) => Some(Bound::Excluded(key)),
        Cursor::LocallyBound(_) | Cursor::Unbound(_) => None,
    };

    if let Some(start) = fully_start {
        for (key, socket) in tables.fully_bound.range((start, Bound::Unbounded)) {
            if !key.same_port(local) {
                break;
            }

            if key.remote == *remote && (group || key.local_address == local.address) && socket.is_active() {
                return Some((Cursor::FullyBound(*key), Arc::clone(socket)));
            }
        }
    }

    let locally_start = match after {
        Cursor::Start | Cursor::FullyBound(_) => Some(Bound::Included(LocallyBoundKey::first(local))),
        Cursor::LocallyBound(key) => Some(Bound::Excluded(key)),
        Cursor::Unbound(_) => None,
    };

    if let Some(start) = locally_start {
        for (key, socket) in tables.locally_bound.range((start, Bound::Unbounded)) {
            if !key.same_port(local) {
                break;
            }

            if (group || key.local.same_address(local)) && socket.is_active() {
                return Some((Cursor::LocallyBound(*key), Arc::clone(socket)));
            }
        }
    }

    let unbound_start = match after {
        Cursor::Unbound(key) => Bound::Excluded(key),
        _ => Bound::Included(UnboundKey::first(local)),
    };

    for (key, socket) in tables.unbound.range((unbound_start, Bound::Unbounded)) {
        if !key.same_port(local) {
            break;
        }

        if socket.is_active() {
            return Some((Cursor::Unbound(*key), Arc::clone(socket)));
        }
    }

    None
}
