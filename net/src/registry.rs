//! The link registry.
//!
//! Links are kept in creation order under one reader/writer lock.  Adding,
//! removing and flipping a link's state take it exclusively; every search
//! takes it shared.  Plugins and collaborators are called only after the
//! lock is released.

use alloc::sync::Arc;
use alloc::vec::Vec;

use netcore_abi::net::NetworkAddress;
use netcore_lib::{SignalOption, klog_debug, klog_error, klog_info, klog_trace, klog_warn};

use crate::NetCore;
use crate::link::{Link, LinkAddressEntry, LinkProperties};
use crate::plugin::NetDevice;
use crate::socket::LinkLocalAddress;
use crate::types::NetError;

impl NetCore {
    /// Create a link for a newly arrived interface and publish it.
    ///
    /// The data link and every network layer set up their per-link state
    /// first; if any of them fails, the ones that succeeded are torn down
    /// again in reverse order and the link never becomes visible.
    pub fn add_link(&self, properties: LinkProperties) -> Result<Arc<Link>, NetError> {
        let mut properties = properties;
        properties.validate()?;

        let (data_link, network_layers) = {
            let plugins = self.plugins.read();
            let data_link = plugins
                .data_links
                .iter()
                .find(|handler| handler.domain() == properties.data_link_type)
                .cloned()
                .ok_or(NetError::NotSupported)?;
            (data_link, plugins.network_layers.clone())
        };

        // Dropping `link` on any early return runs the teardown of whatever
        // was attached so far.
        let link = Arc::new(Link::new(properties, Arc::clone(&self.platform)));
        link.attach_data_link(data_link)?;
        for layer in network_layers {
            link.attach_network_layer(layer)?;
        }

        let device = Arc::clone(link.device());
        if let Err(err) = device.set_information_registered(true) {
            let _ = device.set_information_registered(false);
            return Err(err);
        }

        link.set_information_registered(true);
        self.links.write().push(Arc::clone(&link));

        klog_info!("net: link added on {} ({})", device.name(), link.physical_address());
        Ok(link)
    }

    /// Take a link out of service after its device went away.
    ///
    /// Sockets still holding the link keep it alive; the plugins' per-link
    /// state goes with the last reference.
    pub fn remove_link(&self, link: &Arc<Link>) {
        if link.information_registered() {
            link.set_information_registered(false);
            let _ = link.device().set_information_registered(false).inspect_err(|err| {
                klog_warn!("net: {}: failed to unregister device information: {}", link.device().name(), err);
            });
        }

        if link.is_up() {
            let _ = self.set_link_state(link, false, 0);
        }

        self.links.write().retain(|member| !Arc::ptr_eq(member, link));
        klog_debug!("net: link on {} removed", link.device().name());
    }

    /// Record a carrier change.  Speed is in bits per second.
    ///
    /// Going up starts dynamic configuration of the first address entry; a
    /// failure there is returned but leaves the link up.  Going down empties
    /// the translation cache, detaches every socket using the link and
    /// unconfigures its addresses.
    pub fn set_link_state(&self, link: &Arc<Link>, up: bool, speed: u64) -> Result<(), NetError> {
        let changed = {
            let _links = self.links.write();
            link.set_state(up, speed)
        };

        if up {
            klog_info!("net: {} up, speed {} mbps", link.physical_address(), speed / 1_000_000);
        } else {
            klog_info!("net: {} down", link.physical_address());
        }

        if !changed {
            return Ok(());
        }

        if up {
            self.link_up(link)
        } else {
            self.link_down(link);
            Ok(())
        }
    }

    fn link_up(&self, link: &Arc<Link>) -> Result<(), NetError> {
        // Left signaled by the last down transition.
        link.signal_translation(SignalOption::Unsignal);

        let Some(entry) = link.first_address_entry() else {
            return Ok(());
        };

        let Some(configurator) = self.configurator.read().clone() else {
            return Ok(());
        };

        configurator.begin_assignment(link, entry.id).inspect_err(|err| {
            klog_error!(
                "net: {}: address assignment failed to start: {}",
                link.device().name(),
                err
            );
        })
    }

    fn link_down(&self, link: &Arc<Link>) {
        let flushed = link.lock_inner().translations.flush();
        link.signal_translation(SignalOption::SignalAll);

        self.detach_sockets(link, None);

        let mut cancelled: Vec<LinkAddressEntry> = Vec::new();
        {
            let mut inner = link.lock_inner();
            for entry in inner.addresses.iter_mut().filter(|entry| entry.configured) {
                if !entry.static_address {
                    cancelled.push(entry.clone());
                    entry.clear_dynamic_address();
                }

                entry.configured = false;
            }
        }

        if !cancelled.is_empty() {
            let configurator = self.configurator.read().clone();
            if let Some(configurator) = configurator {
                for entry in &cancelled {
                    let _ = configurator.cancel_lease(link, entry).inspect_err(|err| {
                        klog_warn!("net: lease cancel for {} failed: {}", entry.address, err);
                    });
                }
            }
        }

        klog_debug!(
            "net: {} down, {} translation(s) flushed, {} lease(s) released",
            link.device().name(),
            flushed,
            cancelled.len()
        );
    }

    pub fn lookup_link_by_device(&self, device: &Arc<dyn NetDevice>) -> Result<Arc<Link>, NetError> {
        self.links
            .read()
            .iter()
            .find(|link| Arc::ptr_eq(link.device(), device))
            .cloned()
            .ok_or(NetError::NotFound)
    }

    /// Snapshot of the registry, in creation order.
    pub fn links(&self) -> Vec<Arc<Link>> {
        self.links.read().clone()
    }

    /// Find the link and address entry owning `address`.
    ///
    /// With `hint`, only that link is searched.  With `any`, `address` is
    /// the unspecified address and any entry of its domain will do.
    pub fn find_link_for_local_address(
        &self,
        address: &NetworkAddress,
        any: bool,
        hint: Option<&Arc<Link>>,
    ) -> Result<LinkLocalAddress, NetError> {
        let links = self.links.read();
        if links.is_empty() {
            return Err(NetError::NoNetworkConnection);
        }

        let found = match hint {
            Some(link) => {
                if !link.is_up() {
                    return Err(NetError::NoNetworkConnection);
                }

                link.find_entry_for_address(address, any)
                    .map(|entry| (Arc::clone(link), entry))
            }
            None => links
                .iter()
                .filter(|link| link.is_up())
                .find_map(|link| {
                    link.find_entry_for_address(address, any)
                        .ok()
                        .map(|entry| (Arc::clone(link), entry))
                })
                .ok_or(NetError::InvalidAddress),
        };

        let (link, entry) = found?;
        Ok(LinkLocalAddress {
            link: Some(link),
            link_address: Some(entry),
            local_address: *address,
        })
    }

    /// Pick a link that can reach `remote`: the first up link whose first
    /// address entry is configured.
    pub fn find_link_for_remote_address(&self, remote: &NetworkAddress) -> Result<LinkLocalAddress, NetError> {
        // TODO: route by destination once a routing table exists.
        klog_trace!("net: choosing a link for {}", remote);
        let links = self.links.read();
        links
            .iter()
            .filter(|link| link.is_up())
            .find_map(|link| {
                let entry = link.first_address_entry().filter(|entry| entry.configured)?;
                Some(LinkLocalAddress {
                    link: Some(Arc::clone(link)),
                    link_address: Some(entry.id),
                    local_address: entry.address.without_port(),
                })
            })
            .ok_or(NetError::NoNetworkConnection)
    }
}
