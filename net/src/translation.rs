//! Network-to-physical address translation.
//!
//! Every link carries a [`TranslationCache`] filled by the resolution
//! protocol.  [`NetCore::translate_address`] consults it and, on a miss,
//! drives a request/wait/retry cycle until the answer arrives or the
//! deadline passes:
//!
//! ```text
//! Lookup ──hit────────────────────────────────▶ Resolved
//!   │ miss
//!   ├──past deadline──────────────────────────▶ TimedOut
//!   ├──first miss──▶ RequestSent ──▶ Waiting
//!   └──later miss─────────────────────▶ Waiting
//!
//! Waiting ──signaled──────────────────────────▶ Lookup
//!    └──retry interval elapsed──▶ Retry ──────▶ Lookup
//! ```
//!
//! The wait ticket is taken before each cache check, so an answer that
//! lands between the check and the wait still wakes the caller.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use netcore_abi::net::NetworkAddress;
use netcore_lib::{WaitResult, WaitTicket, klog_debug, klog_warn};

use crate::NetCore;
use crate::config::{ADDRESS_TRANSLATION_RETRY_INTERVAL_MS, ADDRESS_TRANSLATION_TIMEOUT_MS};
use crate::link::Link;
use crate::types::NetError;

/// Per-link map from network address (port stripped) to physical address.
pub(crate) struct TranslationCache {
    entries: BTreeMap<NetworkAddress, NetworkAddress>,
}

impl TranslationCache {
    pub(crate) const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert or refresh a translation. Returns `true` if the key is new.
    pub(crate) fn insert(&mut self, network: &NetworkAddress, physical: &NetworkAddress) -> bool {
        self.entries.insert(network.without_port(), *physical).is_none()
    }

    pub(crate) fn lookup(&self, network: &NetworkAddress) -> Option<NetworkAddress> {
        self.entries.get(&network.without_port()).copied()
    }

    /// Drop every translation, returning how many there were.
    pub(crate) fn flush(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

enum TranslationState {
    Lookup,
    RequestSent(WaitTicket),
    Waiting(WaitTicket),
    Retry,
    Resolved(NetworkAddress),
    TimedOut,
}

impl NetCore {
    /// Translate `address` to a physical address on `link`, asking the
    /// resolver and waiting if the answer is not cached.
    ///
    /// Fails with `TimedOut` after [`ADDRESS_TRANSLATION_TIMEOUT_MS`], with
    /// `NoNetworkConnection` if the link goes down, and with whatever the
    /// resolver returns if a request cannot be sent.
    pub fn translate_address(&self, link: &Arc<Link>, address: &NetworkAddress) -> Result<NetworkAddress, NetError> {
        let key = address.without_port();
        let event = &link.translation_event;
        let mut deadline: Option<u64> = None;
        let mut state = TranslationState::Lookup;

        loop {
            state = match state {
                TranslationState::Lookup => {
                    let ticket = event.ticket();
                    if let Some(physical) = link.lookup_translation(&key) {
                        TranslationState::Resolved(physical)
                    } else if !link.is_up() {
                        return Err(NetError::NoNetworkConnection);
                    } else {
                        let now = self.platform.monotonic_ms();
                        match deadline {
                            None => {
                                deadline = Some(now.saturating_add(ADDRESS_TRANSLATION_TIMEOUT_MS));
                                TranslationState::RequestSent(ticket)
                            }
                            Some(end) if now >= end => TranslationState::TimedOut,
                            Some(_) => TranslationState::Waiting(ticket),
                        }
                    }
                }

                TranslationState::RequestSent(ticket) => {
                    self.send_translation_request(link, &key)?;
                    TranslationState::Waiting(ticket)
                }

                TranslationState::Waiting(ticket) => {
                    match event.wait(ticket, ADDRESS_TRANSLATION_RETRY_INTERVAL_MS, self.platform.as_ref()) {
                        WaitResult::Signaled => TranslationState::Lookup,
                        WaitResult::TimedOut => TranslationState::Retry,
                    }
                }

                TranslationState::Retry => {
                    self.send_translation_request(link, &key)?;
                    TranslationState::Lookup
                }

                TranslationState::Resolved(physical) => return Ok(physical),

                TranslationState::TimedOut => {
                    klog_debug!("net: translation of {} timed out", key);
                    return Err(NetError::TimedOut);
                }
            };
        }
    }

    /// Record a translation on `link` and wake anyone waiting for it.
    pub fn add_translation(&self, link: &Link, network: &NetworkAddress, physical: &NetworkAddress) {
        link.add_translation(network, physical);
    }

    fn send_translation_request(&self, link: &Arc<Link>, target: &NetworkAddress) -> Result<(), NetError> {
        let resolver = self.resolver.read().clone().ok_or(NetError::NotSupported)?;

        let source = link
            .address_entries()
            .into_iter()
            .find(|entry| entry.address.domain == target.domain)
            .ok_or(NetError::InvalidAddress)?;

        resolver.send_request(link, &source, target).inspect_err(|err| {
            klog_warn!("net: resolution request for {} failed: {}", target, err);
        })
    }
}
