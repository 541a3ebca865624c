//! Interfaces between the network core and the code plugged into it.
//!
//! Drivers supply a [`NetDevice`] and a [`LinkDriver`] per link.  Data-link
//! handlers (Ethernet, 802.11) and network layers (IPv4, IPv6) register with
//! the core and get a per-link initialize/destroy pair.  The resolution and
//! dynamic-configuration protocols sit behind [`AddressResolver`] and
//! [`AddressConfigurator`].
//!
//! The core never calls into any of these with one of its own locks held.

use alloc::sync::Arc;
use alloc::vec::Vec;

use netcore_abi::net::{NetDomain, NetworkAddress};

use crate::link::{Link, LinkAddressEntry, LinkAddressId};
use crate::protocol::ProtocolEntry;
use crate::types::{AddressType, NetError, PacketSizeInformation};

/// The driver-side device behind a link.
pub trait NetDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Called when the core starts (`true`) or stops (`false`) answering
    /// device-information requests for this device.
    fn set_information_registered(&self, registered: bool) -> Result<(), NetError> {
        let _ = registered;
        Ok(())
    }
}

/// Driver-level information a link can query or change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkInformationKind {
    ChecksumOffload,
    PromiscuousMode,
}

/// The driver entry points a link forwards to.
pub trait LinkDriver: Send + Sync {
    fn send(&self, link: &Link, frame: &[u8]) -> Result<(), NetError>;

    fn get_set_information(
        &self,
        link: &Link,
        kind: LinkInformationKind,
        value: &mut u32,
        set: bool,
    ) -> Result<(), NetError>;
}

/// A data-link layer (framing over the physical medium).
pub trait DataLinkHandler: Send + Sync {
    fn domain(&self) -> NetDomain;

    fn initialize_link(&self, link: &Link) -> Result<(), NetError>;

    fn destroy_link(&self, link: &Link);

    fn packet_size_information(&self, link: &Link) -> PacketSizeInformation;
}

/// A network layer (addressing above the data link).
pub trait NetworkLayer: Send + Sync {
    fn domain(&self) -> NetDomain;

    /// Set up per-link state, typically by creating the link's first
    /// address entry.
    fn initialize_link(&self, link: &Link) -> Result<(), NetError>;

    fn destroy_link(&self, link: &Link);

    /// Classify `address`, optionally in the context of a link (subnet
    /// broadcast needs one).
    fn address_type(&self, link: Option<&Link>, address: &NetworkAddress) -> AddressType;

    /// Header and size requirements this layer adds to every socket.
    fn packet_size_information(&self) -> PacketSizeInformation;
}

/// The address resolution protocol (ARP or an equivalent).
///
/// A resolver answers asynchronously by calling
/// [`NetCore::add_translation`](crate::NetCore::add_translation) or
/// [`Link::add_translation`].
pub trait AddressResolver: Send + Sync {
    fn send_request(
        &self,
        link: &Arc<Link>,
        source: &LinkAddressEntry,
        target: &NetworkAddress,
    ) -> Result<(), NetError>;
}

/// The dynamic address configuration protocol (DHCP or an equivalent).
pub trait AddressConfigurator: Send + Sync {
    /// Start acquiring an address for `entry`.
    fn begin_assignment(&self, link: &Arc<Link>, entry: LinkAddressId) -> Result<(), NetError>;

    /// Release the lease held by `entry`. The entry is a snapshot taken
    /// before its address was cleared.
    fn cancel_lease(&self, link: &Arc<Link>, entry: &LinkAddressEntry) -> Result<(), NetError>;
}

/// Registered plugins. One lock in `NetCore` guards all three lists.
pub(crate) struct PluginLists {
    pub(crate) data_links: Vec<Arc<dyn DataLinkHandler>>,
    pub(crate) network_layers: Vec<Arc<dyn NetworkLayer>>,
    pub(crate) protocols: Vec<Arc<ProtocolEntry>>,
}

impl PluginLists {
    pub(crate) const fn new() -> Self {
        Self {
            data_links: Vec::new(),
            network_layers: Vec::new(),
            protocols: Vec::new(),
        }
    }
}
