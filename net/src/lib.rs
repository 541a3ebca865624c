//! Network core: address management and socket binding.
//!
//! [`NetCore`] owns the link registry, the registered plugins (data links,
//! network layers, transport protocols), and the raw socket list.  On top of
//! those it provides:
//!
//! - link lifecycle and carrier state ([`registry`]);
//! - per-link address entries and device information ([`link`], [`device_info`]);
//! - network-to-physical address translation ([`translation`]);
//! - the socket binding state machine with its reuse rules ([`binding`]);
//! - inbound socket lookup, including multicast fan-out ([`lookup`]).
//!
//! Everything is reached through a `NetCore` value the embedder constructs
//! with a [`Platform`].  Several cores can coexist; they share only the
//! logger and the socket id counter, which are process-wide.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod binding;
pub mod config;
pub mod device_info;
pub mod link;
pub mod lookup;
pub mod plugin;
pub mod protocol;
pub mod raw;
pub mod registry;
pub mod socket;
pub mod translation;
pub mod types;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod binding_tests;

use alloc::sync::Arc;
use alloc::vec::Vec;

use netcore_abi::net::{NetDomain, NetworkAddress, SocketKind};
use netcore_lib::{Platform, klog_debug, klog_set_level};
use spin::RwLock;

pub use binding::{BindingFlags, can_reuse_any_address, can_reuse_exact_address, can_reuse_time_wait};
pub use config::NetCoreConfig;
pub use link::{Link, LinkAddressEntry, LinkAddressId, LinkProperties};
pub use lookup::SocketLookup;
pub use plugin::{
    AddressConfigurator, AddressResolver, DataLinkHandler, LinkDriver, LinkInformationKind, NetDevice, NetworkLayer,
};
pub use protocol::{ProtocolEntry, ProtocolFlags, ProtocolProperties};
pub use socket::{BindingType, LinkLocalAddress, Socket, SocketFlags, SocketId, SocketLinkOverride};
pub use types::{AddressType, NetError, PacketSizeInformation};

use plugin::PluginLists;

/// The network core.
///
/// Lock order, outermost first: link registry, plugin lists, protocol
/// table (or raw list), socket binding, link.  Plugins and collaborators
/// are never called with any of these held; packet sizes and address
/// types are worked out before a bind takes its locks.
pub struct NetCore {
    pub(crate) config: NetCoreConfig,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) links: RwLock<Vec<Arc<Link>>>,
    pub(crate) plugins: RwLock<PluginLists>,
    pub(crate) raw_sockets: RwLock<Vec<Arc<Socket>>>,
    pub(crate) resolver: RwLock<Option<Arc<dyn AddressResolver>>>,
    pub(crate) configurator: RwLock<Option<Arc<dyn AddressConfigurator>>>,
}

impl NetCore {
    pub fn new(config: NetCoreConfig, platform: Arc<dyn Platform>) -> Result<Self, NetError> {
        if !config.ephemeral_range_valid() {
            return Err(NetError::InvalidConfiguration);
        }

        if let Some(level) = config.log_level {
            klog_set_level(level);
        }
        Ok(Self {
            config,
            platform,
            links: RwLock::new(Vec::new()),
            plugins: RwLock::new(PluginLists::new()),
            raw_sockets: RwLock::new(Vec::new()),
            resolver: RwLock::new(None),
            configurator: RwLock::new(None),
        })
    }

    #[inline]
    pub fn config(&self) -> &NetCoreConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Plugin registration
    // -------------------------------------------------------------------------

    pub fn register_data_link(&self, handler: Arc<dyn DataLinkHandler>) -> Result<(), NetError> {
        let mut plugins = self.plugins.write();
        if plugins.data_links.iter().any(|existing| existing.domain() == handler.domain()) {
            return Err(NetError::DuplicateEntry);
        }

        klog_debug!("net: data link {} registered", handler.domain().name());
        plugins.data_links.push(handler);
        Ok(())
    }

    pub fn unregister_data_link(&self, domain: NetDomain) -> Result<(), NetError> {
        let mut plugins = self.plugins.write();
        let index = plugins
            .data_links
            .iter()
            .position(|handler| handler.domain() == domain)
            .ok_or(NetError::NotFound)?;
        plugins.data_links.remove(index);
        Ok(())
    }

    /// Register a network layer. Links added from now on get its per-link
    /// state; existing links do not.
    pub fn register_network_layer(&self, layer: Arc<dyn NetworkLayer>) -> Result<(), NetError> {
        let mut plugins = self.plugins.write();
        if plugins.network_layers.iter().any(|existing| existing.domain() == layer.domain()) {
            return Err(NetError::DuplicateEntry);
        }

        klog_debug!("net: network layer {} registered", layer.domain().name());
        plugins.network_layers.push(layer);
        Ok(())
    }

    pub fn unregister_network_layer(&self, domain: NetDomain) -> Result<(), NetError> {
        let mut plugins = self.plugins.write();
        let index = plugins
            .network_layers
            .iter()
            .position(|layer| layer.domain() == domain)
            .ok_or(NetError::NotFound)?;
        plugins.network_layers.remove(index);
        Ok(())
    }

    pub fn register_protocol(&self, properties: ProtocolProperties) -> Result<Arc<ProtocolEntry>, NetError> {
        let mut plugins = self.plugins.write();
        let duplicate = plugins.protocols.iter().any(|existing| {
            let existing = existing.properties();
            existing.kind == properties.kind && existing.protocol_number == properties.protocol_number
        });

        if duplicate {
            return Err(NetError::DuplicateEntry);
        }

        let entry = Arc::new(ProtocolEntry::new(properties));
        plugins.protocols.push(Arc::clone(&entry));
        klog_debug!(
            "net: protocol {} ({:?}) registered",
            properties.protocol_number,
            properties.kind
        );
        Ok(entry)
    }

    /// Remove a protocol. Sockets still in its tables are dropped from them.
    pub fn unregister_protocol(&self, kind: SocketKind, protocol_number: u32) -> Result<(), NetError> {
        let entry = {
            let mut plugins = self.plugins.write();
            let index = plugins
                .protocols
                .iter()
                .position(|entry| {
                    entry.properties().kind == kind && entry.properties().protocol_number == protocol_number
                })
                .ok_or(NetError::NotFound)?;
            plugins.protocols.remove(index)
        };

        entry.tables.write().clear();
        Ok(())
    }

    pub fn protocol(&self, kind: SocketKind, protocol_number: u32) -> Option<Arc<ProtocolEntry>> {
        self.plugins
            .read()
            .protocols
            .iter()
            .find(|entry| entry.properties().kind == kind && entry.properties().protocol_number == protocol_number)
            .cloned()
    }

    pub fn network_layer(&self, domain: NetDomain) -> Option<Arc<dyn NetworkLayer>> {
        self.plugins
            .read()
            .network_layers
            .iter()
            .find(|layer| layer.domain() == domain)
            .cloned()
    }

    pub fn set_resolver(&self, resolver: Option<Arc<dyn AddressResolver>>) {
        *self.resolver.write() = resolver;
    }

    pub fn set_configurator(&self, configurator: Option<Arc<dyn AddressConfigurator>>) {
        *self.configurator.write() = configurator;
    }

    // -------------------------------------------------------------------------
    // Sockets
    // -------------------------------------------------------------------------

    /// Create an unbound socket.
    ///
    /// A raw socket is served by whichever raw protocol is registered and
    /// carries `protocol_number` as its network protocol.  Any other kind
    /// needs a protocol registered for exactly (`kind`, `protocol_number`);
    /// 0 picks the first protocol of that kind.
    pub fn create_socket(
        &self,
        domain: NetDomain,
        kind: SocketKind,
        protocol_number: u32,
    ) -> Result<Arc<Socket>, NetError> {
        let (protocol, network) = {
            let plugins = self.plugins.read();
            let protocol = plugins
                .protocols
                .iter()
                .find(|entry| {
                    let properties = entry.properties();
                    properties.kind == kind
                        && (kind == SocketKind::Raw
                            || protocol_number == 0
                            || properties.protocol_number == protocol_number)
                })
                .cloned();
            let network = plugins
                .network_layers
                .iter()
                .find(|layer| layer.domain() == domain)
                .cloned();
            (protocol, network)
        };

        let (Some(protocol), Some(network)) = (protocol, network) else {
            return Err(NetError::NotSupported);
        };

        let network_protocol = if kind == SocketKind::Raw {
            protocol_number
        } else {
            protocol.properties().protocol_number
        };

        let unbound = network.packet_size_information().stack(&protocol.properties().packet_size);
        Ok(Arc::new(Socket::new(protocol, domain, network_protocol, unbound)))
    }

    /// Classify `address` through the network layer of its domain.
    pub fn address_type(&self, link: Option<&Link>, address: &NetworkAddress) -> AddressType {
        match self.network_layer(address.domain) {
            Some(layer) => layer.address_type(link, address),
            None => AddressType::Unknown,
        }
    }
}

impl Drop for NetCore {
    fn drop(&mut self) {
        // Sockets in the tables hold their protocol entry; break the cycle.
        for protocol in self.plugins.get_mut().protocols.drain(..) {
            protocol.tables.write().clear();
        }

        self.raw_sockets.get_mut().clear();
    }
}
