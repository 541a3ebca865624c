//! Links: one per physical network interface.
//!
//! A [`Link`] owns the logical addresses assigned to its interface
//! ([`LinkAddressEntry`]) and the cache translating network addresses to
//! physical ones.  Both live under one short-held lock; nothing that can
//! block or call out of the core runs with it held.
//!
//! Links are shared as `Arc<Link>`.  The registry holds one reference, every
//! socket bound to the link holds another.  When the last reference goes,
//! `Drop` tears down the per-link state of every plugin that initialized
//! successfully, in reverse order, and releases the device.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use netcore_abi::device::NETWORK_DEVICE_MAX_DNS_SERVERS;
use netcore_abi::net::{NetDomain, NetworkAddress};
use netcore_lib::{Event, Platform, SignalOption, klog_debug};
use spin::{Mutex, MutexGuard, Once};

use crate::config::NET_LINK_PROPERTIES_VERSION;
use crate::plugin::{DataLinkHandler, LinkDriver, LinkInformationKind, NetDevice, NetworkLayer};
use crate::translation::TranslationCache;
use crate::types::{NetError, PacketSizeInformation};

// =============================================================================
// Link properties
// =============================================================================

/// What a driver declares about its interface when creating a link.
#[derive(Clone)]
pub struct LinkProperties {
    pub version: u32,
    /// Required buffer alignment for transmit. 0 means "none" and becomes 1.
    pub transmit_alignment: u32,
    pub device: Arc<dyn NetDevice>,
    pub driver: Option<Arc<dyn LinkDriver>>,
    /// Framing the device itself adds, outside the data link. Unbounded
    /// (no framing, `u32::MAX` maximum) unless the driver says otherwise.
    pub packet_size: PacketSizeInformation,
    /// Highest physical address the device can DMA to.
    pub max_physical_address: u64,
    pub physical_address: NetworkAddress,
    pub data_link_type: NetDomain,
}

impl LinkProperties {
    pub fn new(device: Arc<dyn NetDevice>, driver: Arc<dyn LinkDriver>, physical_address: NetworkAddress) -> Self {
        Self {
            version: NET_LINK_PROPERTIES_VERSION,
            transmit_alignment: 1,
            device,
            driver: Some(driver),
            packet_size: PacketSizeInformation::new(0, 0, u32::MAX, 0),
            max_physical_address: u64::MAX,
            physical_address,
            data_link_type: physical_address.domain,
        }
    }

    pub(crate) fn validate(&mut self) -> Result<(), NetError> {
        if self.version < NET_LINK_PROPERTIES_VERSION {
            return Err(NetError::VersionMismatch);
        }

        if self.transmit_alignment == 0 {
            self.transmit_alignment = 1;
        }

        if !self.transmit_alignment.is_power_of_two()
            || !self.physical_address.domain.is_physical()
            || self.max_physical_address == 0
            || self.driver.is_none()
        {
            return Err(NetError::InvalidParameter);
        }

        Ok(())
    }
}

// =============================================================================
// Link address entries
// =============================================================================

/// Handle to one address entry of a link. Only meaningful for that link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkAddressId(u32);

impl LinkAddressId {
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// One logical address assigned to a link, plus its configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkAddressEntry {
    pub id: LinkAddressId,
    pub address: NetworkAddress,
    pub subnet: NetworkAddress,
    pub default_gateway: NetworkAddress,
    pub dns_servers: Vec<NetworkAddress>,
    pub physical_address: NetworkAddress,
    pub configured: bool,
    /// Assigned by an administrator rather than leased.
    pub static_address: bool,
    pub lease_server: NetworkAddress,
    pub lease_start_time: u64,
    pub lease_end_time: u64,
}

impl LinkAddressEntry {
    /// Replace the DNS server list, keeping at most
    /// [`NETWORK_DEVICE_MAX_DNS_SERVERS`] entries.
    pub fn set_dns_servers(&mut self, servers: &[NetworkAddress]) {
        let count = servers.len().min(NETWORK_DEVICE_MAX_DNS_SERVERS);
        self.dns_servers.clear();
        self.dns_servers.extend(servers[..count].iter().map(NetworkAddress::without_port));
    }

    /// Drop the address but keep its domain, and forget any lease.
    pub(crate) fn clear_dynamic_address(&mut self) {
        self.address = self.address.domain_only();
        self.lease_server = NetworkAddress::ZERO;
        self.lease_start_time = 0;
        self.lease_end_time = 0;
    }
}

// =============================================================================
// Link
// =============================================================================

pub(crate) struct LinkInner {
    /// Newest entry first.
    pub(crate) addresses: Vec<LinkAddressEntry>,
    pub(crate) next_address_id: u32,
    pub(crate) translations: TranslationCache,
}

pub struct Link {
    properties: LinkProperties,
    up: AtomicBool,
    speed: AtomicU64,
    inner: Mutex<LinkInner>,
    /// Pulsed on every new translation, signaled while the link is down.
    pub(crate) translation_event: Event,
    platform: Arc<dyn Platform>,
    data_link: Once<Arc<dyn DataLinkHandler>>,
    /// Network layers whose `initialize_link` succeeded, in call order.
    network_layers: Mutex<Vec<Arc<dyn NetworkLayer>>>,
    information_registered: AtomicBool,
}

impl Link {
    pub(crate) fn new(properties: LinkProperties, platform: Arc<dyn Platform>) -> Self {
        Self {
            properties,
            up: AtomicBool::new(false),
            speed: AtomicU64::new(0),
            inner: Mutex::new(LinkInner {
                addresses: Vec::new(),
                next_address_id: 1,
                translations: TranslationCache::new(),
            }),
            translation_event: Event::new(),
            platform,
            data_link: Once::new(),
            network_layers: Mutex::new(Vec::new()),
            information_registered: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn properties(&self) -> &LinkProperties {
        &self.properties
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn NetDevice> {
        &self.properties.device
    }

    #[inline]
    pub fn physical_address(&self) -> NetworkAddress {
        self.properties.physical_address
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// Current `(up, speed)` pair. Speed is in bits per second.
    pub fn state(&self) -> (bool, u64) {
        (self.is_up(), self.speed.load(Ordering::Relaxed))
    }

    /// Flip the up flag. Returns `false` if the link was already in `up`.
    pub(crate) fn set_state(&self, up: bool, speed: u64) -> bool {
        self.speed.store(speed, Ordering::Relaxed);
        self.up.swap(up, Ordering::AcqRel) != up
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock()
    }

    // -------------------------------------------------------------------------
    // Plugins
    // -------------------------------------------------------------------------

    pub fn data_link(&self) -> Option<&Arc<dyn DataLinkHandler>> {
        self.data_link.get()
    }

    pub(crate) fn attach_data_link(&self, handler: Arc<dyn DataLinkHandler>) -> Result<(), NetError> {
        handler.initialize_link(self)?;
        self.data_link.call_once(|| handler);
        Ok(())
    }

    pub(crate) fn attach_network_layer(&self, layer: Arc<dyn NetworkLayer>) -> Result<(), NetError> {
        layer.initialize_link(self)?;
        self.network_layers.lock().push(layer);
        Ok(())
    }

    pub(crate) fn set_information_registered(&self, registered: bool) {
        self.information_registered.store(registered, Ordering::Release);
    }

    #[inline]
    pub fn information_registered(&self) -> bool {
        self.information_registered.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------------
    // Driver entry points
    // -------------------------------------------------------------------------

    pub fn send(&self, frame: &[u8]) -> Result<(), NetError> {
        match &self.properties.driver {
            Some(driver) => driver.send(self, frame),
            None => Err(NetError::NotSupported),
        }
    }

    pub fn get_set_information(&self, kind: LinkInformationKind, value: &mut u32, set: bool) -> Result<(), NetError> {
        match &self.properties.driver {
            Some(driver) => driver.get_set_information(self, kind, value, set),
            None => Err(NetError::NotSupported),
        }
    }

    /// Sizes for a socket over this link: the socket's own stack wrapped in
    /// the data link, then in the device framing.
    pub fn packet_size_for(&self, socket: &PacketSizeInformation) -> PacketSizeInformation {
        let mut size = *socket;
        if let Some(data_link) = self.data_link() {
            size = data_link.packet_size_information(self).stack(&size);
        }

        self.properties.packet_size.stack(&size)
    }

    // -------------------------------------------------------------------------
    // Address entries
    // -------------------------------------------------------------------------

    /// Add an address entry at the head of the list.
    ///
    /// The entry is configured only when address, subnet and gateway are all
    /// supplied; otherwise it waits for static or dynamic configuration.
    pub fn create_address_entry(
        &self,
        address: Option<&NetworkAddress>,
        subnet: Option<&NetworkAddress>,
        default_gateway: Option<&NetworkAddress>,
        static_address: bool,
    ) -> LinkAddressId {
        let configured = address.is_some() && subnet.is_some() && default_gateway.is_some();
        let mut inner = self.inner.lock();
        let id = LinkAddressId(inner.next_address_id);
        inner.next_address_id = inner.next_address_id.wrapping_add(1);
        let entry = LinkAddressEntry {
            id,
            address: address.copied().unwrap_or(NetworkAddress::ZERO),
            subnet: subnet.copied().unwrap_or(NetworkAddress::ZERO),
            default_gateway: default_gateway.copied().unwrap_or(NetworkAddress::ZERO),
            dns_servers: Vec::new(),
            physical_address: self.properties.physical_address,
            configured,
            static_address: configured && static_address,
            lease_server: NetworkAddress::ZERO,
            lease_start_time: 0,
            lease_end_time: 0,
        };
        inner.addresses.insert(0, entry);
        id
    }

    pub fn destroy_address_entry(&self, id: LinkAddressId) -> Result<(), NetError> {
        let mut inner = self.inner.lock();
        let index = inner
            .addresses
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(NetError::NotFound)?;
        inner.addresses.remove(index);
        Ok(())
    }

    pub fn address_entry(&self, id: LinkAddressId) -> Option<LinkAddressEntry> {
        self.inner.lock().addresses.iter().find(|entry| entry.id == id).cloned()
    }

    pub fn address_entries(&self) -> Vec<LinkAddressEntry> {
        self.inner.lock().addresses.clone()
    }

    /// The head of the address list, the entry dynamic configuration and
    /// implicit binds use.
    pub fn first_address_entry(&self) -> Option<LinkAddressEntry> {
        self.inner.lock().addresses.first().cloned()
    }

    /// Run `f` on an entry under the link lock.
    pub fn update_address_entry<R>(
        &self,
        id: LinkAddressId,
        f: impl FnOnce(&mut LinkAddressEntry) -> R,
    ) -> Result<R, NetError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .addresses
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(NetError::NotFound)?;
        Ok(f(entry))
    }

    /// Find the entry owning `address`. The port is ignored.
    ///
    /// With `any` set, `address` is the network's unspecified address and
    /// any entry of the same domain matches, configured or not.
    pub fn find_entry_for_address(&self, address: &NetworkAddress, any: bool) -> Result<LinkAddressId, NetError> {
        let target = address.without_port();
        let inner = self.inner.lock();
        inner
            .addresses
            .iter()
            .find(|entry| {
                if any {
                    entry.address.port == target.port && entry.address.domain == target.domain
                } else {
                    entry.configured && entry.address == target
                }
            })
            .map(|entry| entry.id)
            .ok_or(NetError::InvalidAddress)
    }

    // -------------------------------------------------------------------------
    // Translation cache
    // -------------------------------------------------------------------------

    /// Record that `network` lives at `physical`. Wakes translation waiters
    /// when the fact is new.
    pub fn add_translation(&self, network: &NetworkAddress, physical: &NetworkAddress) {
        let inserted = self.inner.lock().translations.insert(network, physical);
        if inserted {
            self.signal_translation(SignalOption::Pulse);
        }
    }

    /// Signal the translation event, waking parked translators.
    pub(crate) fn signal_translation(&self, option: SignalOption) {
        self.translation_event.signal(option, self.platform.as_ref());
    }

    pub fn lookup_translation(&self, network: &NetworkAddress) -> Option<NetworkAddress> {
        self.inner.lock().translations.lookup(network)
    }

    pub fn translation_count(&self) -> usize {
        self.inner.lock().translations.len()
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (up, speed) = self.state();
        f.debug_struct("Link")
            .field("device", &self.properties.device.name())
            .field("physical_address", &self.properties.physical_address)
            .field("up", &up)
            .field("speed", &speed)
            .finish()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        let layers = core::mem::take(self.network_layers.get_mut());
        for layer in layers.iter().rev() {
            layer.destroy_link(self);
        }

        if let Some(data_link) = self.data_link.get() {
            data_link.destroy_link(self);
        }

        klog_debug!("net: link on {} destroyed", self.properties.device.name());
    }
}
