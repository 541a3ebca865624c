//! Mocks and fixtures shared by the netcore test suites.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use core::time::Duration;
use std::sync::{Condvar, Mutex as StdMutex, PoisonError};

use netcore_abi::net::{IPPROTO_RAW, IPPROTO_TCP, IPPROTO_UDP, NET_SPEED_1000_MBPS, NetDomain, NetworkAddress, SocketKind};
use netcore_lib::{KlogLevel, Platform, klog_register_backend};
use spin::Mutex;

use crate::config::NetCoreConfig;
use crate::link::{Link, LinkAddressEntry, LinkAddressId, LinkProperties};
use crate::plugin::{
    AddressConfigurator, AddressResolver, DataLinkHandler, LinkDriver, LinkInformationKind, NetDevice, NetworkLayer,
};
use crate::protocol::{ProtocolEntry, ProtocolFlags, ProtocolProperties};
use crate::socket::{LinkLocalAddress, Socket};
use crate::types::{AddressType, NetError, PacketSizeInformation};
use crate::NetCore;

fn test_backend(level: KlogLevel, args: fmt::Arguments<'_>) {
    std::eprintln!("[{:?}] {}", level, args);
}

// =============================================================================
// Platform
// =============================================================================

/// Clock that moves forward `step` ms on every read, with a settable
/// ephemeral seed.
///
/// A plain clock treats every park as running out: the time jumps to the
/// deadline.  A parking clock stands still and really parks the thread on
/// a condvar; only a park nobody wakes moves the time to its deadline.
pub struct FakePlatform {
    now: AtomicU64,
    step: u64,
    counter: AtomicU64,
    parking: bool,
    woken: StdMutex<bool>,
    parked: Condvar,
    pub blocks: AtomicUsize,
    pub wakes: AtomicUsize,
}

const PARK_LIMIT: Duration = Duration::from_secs(5);

impl FakePlatform {
    pub fn new(step: u64) -> Self {
        Self::build(step, false)
    }

    pub fn parking() -> Self {
        Self::build(0, true)
    }

    fn build(step: u64, parking: bool) -> Self {
        Self {
            now: AtomicU64::new(0),
            step,
            counter: AtomicU64::new(0),
            parking,
            woken: StdMutex::new(false),
            parked: Condvar::new(),
            blocks: AtomicUsize::new(0),
            wakes: AtomicUsize::new(0),
        }
    }

    pub fn set_counter(&self, value: u64) {
        self.counter.store(value, Ordering::Relaxed);
    }

    pub fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl Platform for FakePlatform {
    fn monotonic_ms(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }

    fn time_counter(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    fn block_until(&self, deadline_ms: u64) {
        self.blocks.fetch_add(1, Ordering::SeqCst);
        if !self.parking {
            self.now.fetch_max(deadline_ms, Ordering::SeqCst);
            return;
        }

        let woken = self.woken.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut woken, timeout) = self
            .parked
            .wait_timeout_while(woken, PARK_LIMIT, |woken| !*woken)
            .unwrap_or_else(PoisonError::into_inner);
        if timeout.timed_out() {
            self.now.fetch_max(deadline_ms, Ordering::SeqCst);
        }
        *woken = false;
    }

    fn wake_waiters(&self) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
        *self.woken.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.parked.notify_all();
    }
}

// =============================================================================
// Device and driver
// =============================================================================

pub struct MockDevice {
    name: String,
    pub registered: AtomicBool,
    pub fail_register: AtomicBool,
}

impl MockDevice {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            registered: AtomicBool::new(false),
            fail_register: AtomicBool::new(false),
        }
    }
}

impl NetDevice for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_information_registered(&self, registered: bool) -> Result<(), NetError> {
        if registered && self.fail_register.load(Ordering::Relaxed) {
            return Err(NetError::InsufficientResources);
        }

        self.registered.store(registered, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDriver {
    pub frames_sent: AtomicUsize,
}

impl LinkDriver for MockDriver {
    fn send(&self, _link: &Link, _frame: &[u8]) -> Result<(), NetError> {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get_set_information(
        &self,
        _link: &Link,
        _kind: LinkInformationKind,
        _value: &mut u32,
        _set: bool,
    ) -> Result<(), NetError> {
        Ok(())
    }
}

// =============================================================================
// Plugins
// =============================================================================

pub const ETHERNET_FRAMING: PacketSizeInformation = PacketSizeInformation::new(14, 0, 1514, 60);
pub const IP4_FRAMING: PacketSizeInformation = PacketSizeInformation::new(20, 0, 65535, 0);
pub const UDP_FRAMING: PacketSizeInformation = PacketSizeInformation::new(8, 0, 65515, 0);

/// Ethernet framing.  When `watched` is set, each size query also records
/// whether that protocol's table lock was held by the caller.
#[derive(Default)]
pub struct MockDataLink {
    pub initialized: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub size_queries: AtomicUsize,
    pub queried_under_table_lock: AtomicBool,
    pub watched: Mutex<Option<Arc<ProtocolEntry>>>,
}

impl DataLinkHandler for MockDataLink {
    fn domain(&self) -> NetDomain {
        NetDomain::Ethernet
    }

    fn initialize_link(&self, _link: &Link) -> Result<(), NetError> {
        self.initialized.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn destroy_link(&self, _link: &Link) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn packet_size_information(&self, _link: &Link) -> PacketSizeInformation {
        self.size_queries.fetch_add(1, Ordering::Relaxed);
        let watched = self.watched.lock().clone();
        if let Some(protocol) = watched {
            if protocol.tables.try_write().is_none() {
                self.queried_under_table_lock.store(true, Ordering::Relaxed);
            }
        }

        ETHERNET_FRAMING
    }
}

/// IPv4-style network layer.  Each link gets one unconfigured entry;
/// 224.0.0.0/4 is multicast and 255.255.255.255 is broadcast.
pub struct MockNetworkLayer {
    domain: NetDomain,
    pub fail_initialize: AtomicBool,
    pub initialized: AtomicUsize,
    pub destroyed: AtomicUsize,
}

impl MockNetworkLayer {
    pub fn new(domain: NetDomain) -> Self {
        Self {
            domain,
            fail_initialize: AtomicBool::new(false),
            initialized: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        }
    }
}

impl NetworkLayer for MockNetworkLayer {
    fn domain(&self) -> NetDomain {
        self.domain
    }

    fn initialize_link(&self, link: &Link) -> Result<(), NetError> {
        if self.fail_initialize.load(Ordering::Relaxed) {
            return Err(NetError::InsufficientResources);
        }

        link.create_address_entry(Some(&NetworkAddress::any(self.domain, 0)), None, None, false);
        self.initialized.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn destroy_link(&self, _link: &Link) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn address_type(&self, _link: Option<&Link>, address: &NetworkAddress) -> AddressType {
        let octets = address.ipv4_octets();
        if address.is_unspecified() {
            AddressType::Any
        } else if octets == [255, 255, 255, 255] {
            AddressType::Broadcast
        } else if (224..=239).contains(&octets[0]) {
            AddressType::Multicast
        } else {
            AddressType::Unicast
        }
    }

    fn packet_size_information(&self) -> PacketSizeInformation {
        IP4_FRAMING
    }
}

/// Resolver that counts requests and, when given an answer, publishes it
/// before returning.  With `answer_on` set to N, only the Nth request is
/// answered.
#[derive(Default)]
pub struct ScriptedResolver {
    pub requests: AtomicUsize,
    pub answer: Mutex<Option<NetworkAddress>>,
    pub answer_on: AtomicUsize,
    pub sources: Mutex<Vec<NetworkAddress>>,
}

impl AddressResolver for ScriptedResolver {
    fn send_request(&self, link: &Arc<Link>, source: &LinkAddressEntry, target: &NetworkAddress) -> Result<(), NetError> {
        let sent = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        self.sources.lock().push(source.address);
        let answer_on = self.answer_on.load(Ordering::Relaxed);
        let answer = *self.answer.lock();
        if let Some(physical) = answer.filter(|_| answer_on == 0 || answer_on == sent) {
            link.add_translation(target, &physical);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedConfigurator {
    pub fail_begin: AtomicBool,
    pub begun: Mutex<Vec<LinkAddressId>>,
    pub cancelled: Mutex<Vec<LinkAddressEntry>>,
}

impl AddressConfigurator for ScriptedConfigurator {
    fn begin_assignment(&self, _link: &Arc<Link>, entry: LinkAddressId) -> Result<(), NetError> {
        self.begun.lock().push(entry);
        if self.fail_begin.load(Ordering::Relaxed) {
            return Err(NetError::InsufficientResources);
        }
        Ok(())
    }

    fn cancel_lease(&self, _link: &Arc<Link>, entry: &LinkAddressEntry) -> Result<(), NetError> {
        self.cancelled.lock().push(entry.clone());
        Ok(())
    }
}

// =============================================================================
// Fixture
// =============================================================================

pub fn ip(a: u8, b: u8, c: u8, d: u8, port: u16) -> NetworkAddress {
    NetworkAddress::ipv4([a, b, c, d], port)
}

pub fn test_config() -> NetCoreConfig {
    NetCoreConfig {
        debug: true,
        ..NetCoreConfig::new()
    }
}

/// A core with Ethernet, IPv4, UDP, TCP and raw IP registered.
pub struct TestNet {
    pub core: NetCore,
    pub platform: Arc<FakePlatform>,
    pub data_link: Arc<MockDataLink>,
    pub ipv4: Arc<MockNetworkLayer>,
    pub udp: Arc<ProtocolEntry>,
    pub tcp: Arc<ProtocolEntry>,
    pub raw: Arc<ProtocolEntry>,
    pub resolver: Arc<ScriptedResolver>,
    pub configurator: Arc<ScriptedConfigurator>,
}

impl TestNet {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: NetCoreConfig) -> Self {
        Self::with_platform(config, Arc::new(FakePlatform::new(10)))
    }

    pub fn with_platform(config: NetCoreConfig, platform: Arc<FakePlatform>) -> Self {
        klog_register_backend(test_backend);

        let core = NetCore::new(config, platform.clone()).expect("valid test config");

        let data_link = Arc::new(MockDataLink::default());
        let ipv4 = Arc::new(MockNetworkLayer::new(NetDomain::Ip4));
        core.register_data_link(data_link.clone()).expect("register ethernet");
        core.register_network_layer(ipv4.clone()).expect("register ipv4");

        let udp = core
            .register_protocol(ProtocolProperties {
                kind: SocketKind::Datagram,
                protocol_number: IPPROTO_UDP,
                flags: ProtocolFlags::empty(),
                packet_size: UDP_FRAMING,
            })
            .expect("register udp");
        let tcp = core
            .register_protocol(ProtocolProperties {
                kind: SocketKind::Stream,
                protocol_number: IPPROTO_TCP,
                flags: ProtocolFlags::CONNECTION_BASED,
                packet_size: PacketSizeInformation::new(20, 0, 65515, 0),
            })
            .expect("register tcp");
        let raw = core
            .register_protocol(ProtocolProperties {
                kind: SocketKind::Raw,
                protocol_number: IPPROTO_RAW,
                flags: ProtocolFlags::NO_PORTS | ProtocolFlags::ALWAYS_FAN_OUT,
                packet_size: PacketSizeInformation::new(0, 0, 65535, 0),
            })
            .expect("register raw");

        let resolver = Arc::new(ScriptedResolver::default());
        let configurator = Arc::new(ScriptedConfigurator::default());
        core.set_resolver(Some(resolver.clone()));
        core.set_configurator(Some(configurator.clone()));

        Self {
            core,
            platform,
            data_link,
            ipv4,
            udp,
            tcp,
            raw,
            resolver,
            configurator,
        }
    }

    pub fn properties(name: &str, last_octet: u8) -> LinkProperties {
        LinkProperties::new(
            Arc::new(MockDevice::new(name)),
            Arc::new(MockDriver::default()),
            NetworkAddress::ethernet([0x02, 0, 0, 0, 0, last_octet]),
        )
    }

    /// A registered link, still down.
    pub fn add_link(&self, name: &str, last_octet: u8) -> Arc<Link> {
        self.core
            .add_link(Self::properties(name, last_octet))
            .expect("add link")
    }

    /// A link that is up with its first entry statically configured as
    /// `address`/24.
    pub fn up_link(&self, name: &str, address: NetworkAddress) -> Arc<Link> {
        let link = self.add_link(name, address.address[3]);
        self.core
            .set_link_state(&link, true, NET_SPEED_1000_MBPS)
            .expect("link up");
        self.configure(&link, address);
        link
    }

    /// Statically configure `link`'s first entry as `address`/24.
    pub fn configure(&self, link: &Link, address: NetworkAddress) {
        let octets = address.ipv4_octets();
        let entry = link.first_address_entry().expect("link has an entry");
        link.update_address_entry(entry.id, |entry| {
            entry.address = address.without_port();
            entry.subnet = ip(255, 255, 255, 0, 0);
            entry.default_gateway = ip(octets[0], octets[1], octets[2], 254, 0);
            entry.configured = true;
            entry.static_address = true;
        })
        .expect("entry exists");
    }

    pub fn udp_socket(&self) -> Arc<Socket> {
        self.core
            .create_socket(NetDomain::Ip4, SocketKind::Datagram, IPPROTO_UDP)
            .expect("create udp socket")
    }

    pub fn tcp_socket(&self) -> Arc<Socket> {
        self.core
            .create_socket(NetDomain::Ip4, SocketKind::Stream, IPPROTO_TCP)
            .expect("create tcp socket")
    }

    pub fn raw_socket(&self, network_protocol: u32) -> Arc<Socket> {
        self.core
            .create_socket(NetDomain::Ip4, SocketKind::Raw, network_protocol)
            .expect("create raw socket")
    }

    /// Local information for `address` on `link`.
    pub fn local(&self, link: &Arc<Link>, address: NetworkAddress) -> Result<LinkLocalAddress, NetError> {
        self.core
            .find_link_for_local_address(&address, address.is_unspecified(), Some(link))
    }
}
