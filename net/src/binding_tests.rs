use core::sync::atomic::Ordering;

use netcore_abi::net::{NetDomain, NetworkAddress};
use netcore_lib::testing::TestResult;
use netcore_lib::{assert_eq_test, assert_err, assert_ok, assert_test, define_test_suite, pass};

use crate::binding::{BindingFlags, can_reuse_any_address, can_reuse_exact_address, can_reuse_time_wait};
use crate::config::{EPHEMERAL_PORT_END, EPHEMERAL_PORT_START, NetCoreConfig};
use crate::socket::{BindingType, LinkLocalAddress, SocketFlags};
use crate::test_support::{TestNet, ip, test_config};
use crate::types::{NetError, PacketSizeInformation};

const ANY: BindingFlags = BindingFlags::empty();

pub fn test_reuse_predicates() -> TestResult {
    let any = SocketFlags::REUSE_ANY_ADDRESS;
    let exact = SocketFlags::REUSE_EXACT_ADDRESS;
    let time_wait = SocketFlags::REUSE_TIME_WAIT;

    assert_test!(can_reuse_any_address(any, any | exact));
    assert_test!(!can_reuse_any_address(any, exact), "existing socket did not opt in");
    assert_test!(can_reuse_exact_address(exact, exact | any));
    assert_test!(!can_reuse_exact_address(any, exact));

    assert_test!(can_reuse_time_wait(time_wait, time_wait | SocketFlags::TIME_WAIT));
    assert_test!(!can_reuse_time_wait(time_wait, time_wait), "existing socket not in time-wait");
    assert_test!(
        !can_reuse_time_wait(SocketFlags::empty(), time_wait | SocketFlags::TIME_WAIT),
        "candidate did not opt in"
    );

    pass!()
}

pub fn test_any_and_concrete_share_port_with_reuse() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));

    let a = net.udp_socket();
    a.set_flags(SocketFlags::REUSE_ANY_ADDRESS | SocketFlags::REUSE_EXACT_ADDRESS);
    let local = assert_ok!(net.local(&link, ip(0, 0, 0, 0, 5000)));
    assert_ok!(net.core.bind_socket(&a, BindingType::LocallyBound, Some(local), None, BindingFlags::ACTIVATE));
    assert_eq_test!(a.local_address(), ip(0, 0, 0, 0, 5000));
    assert_eq_test!(a.local_send_address(), ip(10, 0, 0, 1, 5000), "sends from the entry address");

    let b = net.udp_socket();
    b.set_flags(SocketFlags::REUSE_ANY_ADDRESS);
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 5000)));
    assert_ok!(net.core.bind_socket(&b, BindingType::LocallyBound, Some(local), None, BindingFlags::ACTIVATE));

    let c = net.udp_socket();
    c.set_flags(SocketFlags::REUSE_ANY_ADDRESS);
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 5000)));
    assert_err!(
        net.core.bind_socket(&c, BindingType::LocallyBound, Some(local), None, BindingFlags::ACTIVATE),
        NetError::AddressInUse,
        "identical address without exact reuse"
    );
    assert_eq_test!(c.binding_type(), BindingType::Invalid);
    assert_test!(!c.is_active());
    assert_eq_test!(net.udp.socket_count(BindingType::LocallyBound), 2);

    pass!()
}

pub fn test_any_address_needs_reuse_from_everyone() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));

    let holder = net.udp_socket();
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 5001)));
    assert_ok!(net.core.bind_socket(&holder, BindingType::LocallyBound, Some(local), None, ANY));

    let wildcard = net.udp_socket();
    wildcard.set_flags(SocketFlags::REUSE_ANY_ADDRESS);
    let local = assert_ok!(net.local(&link, ip(0, 0, 0, 0, 5001)));
    assert_err!(
        net.core.bind_socket(&wildcard, BindingType::LocallyBound, Some(local), None, ANY),
        NetError::AddressInUse
    );

    let unbound = net.udp_socket();
    let unlinked = LinkLocalAddress::unlinked(NetworkAddress::any(NetDomain::Ip4, 5001));
    assert_err!(
        net.core.bind_socket(&unbound, BindingType::Unbound, Some(unlinked), None, ANY),
        NetError::AddressInUse,
        "unbound on a held port"
    );

    pass!()
}

pub fn test_time_wait_tuple_is_reclaimed() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));
    let remote = ip(10, 0, 0, 2, 80);

    let d = net.tcp_socket();
    d.set_flags(SocketFlags::REUSE_TIME_WAIT);
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 4000)));
    assert_ok!(net.core.bind_socket(&d, BindingType::FullyBound, Some(local), Some(&remote), BindingFlags::ACTIVATE));
    d.set_flags(SocketFlags::TIME_WAIT);

    let e = net.tcp_socket();
    e.set_flags(SocketFlags::REUSE_TIME_WAIT);
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 4000)));
    assert_ok!(net.core.bind_socket(&e, BindingType::FullyBound, Some(local), Some(&remote), BindingFlags::ACTIVATE));

    assert_test!(!d.is_active(), "time-wait holder deactivated");
    assert_eq_test!(d.binding_type(), BindingType::Invalid);
    assert_test!(e.is_active());
    assert_eq_test!(net.tcp.socket_count(BindingType::FullyBound), 1);

    pass!()
}

pub fn test_live_tuple_is_unique() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));
    let remote = ip(10, 0, 0, 2, 80);

    let first = net.tcp_socket();
    first.set_flags(SocketFlags::REUSE_EXACT_ADDRESS);
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 4001)));
    assert_ok!(net.core.bind_socket(&first, BindingType::FullyBound, Some(local), Some(&remote), BindingFlags::ACTIVATE));

    let second = net.tcp_socket();
    second.set_flags(SocketFlags::REUSE_EXACT_ADDRESS);
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 4001)));
    assert_err!(
        net.core.bind_socket(&second, BindingType::FullyBound, Some(local.clone()), Some(&remote), ANY),
        NetError::AddressInUse,
        "exact reuse does not share a tuple"
    );

    let other_remote = ip(10, 0, 0, 3, 80);
    assert_ok!(net.core.bind_socket(&second, BindingType::FullyBound, Some(local), Some(&other_remote), ANY));
    assert_eq_test!(net.tcp.socket_count(BindingType::FullyBound), 2);

    pass!()
}

pub fn test_forked_listener_skips_validation() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));

    let listener = net.tcp_socket();
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 80)));
    assert_ok!(net.core.bind_socket(&listener, BindingType::LocallyBound, Some(local), None, BindingFlags::ACTIVATE));

    let peer = ip(10, 0, 0, 9, 40000);
    let plain = net.tcp_socket();
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 80)));
    assert_err!(
        net.core.bind_socket(&plain, BindingType::FullyBound, Some(local.clone()), Some(&peer), ANY),
        NetError::AddressInUse
    );

    let forked = net.tcp_socket();
    forked.set_flags(SocketFlags::FORKED_LISTENER);
    assert_ok!(net.core.bind_socket(&forked, BindingType::FullyBound, Some(local), Some(&peer), BindingFlags::ACTIVATE));
    assert_eq_test!(forked.remote_address(), peer);

    pass!()
}

pub fn test_active_socket_stays_active_across_disconnect() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));
    let socket = net.udp_socket();

    let unlinked = LinkLocalAddress::unlinked(NetworkAddress::any(NetDomain::Ip4, 0));
    assert_ok!(net.core.bind_socket(&socket, BindingType::Unbound, Some(unlinked), None, ANY));
    let port = socket.local_address().port;
    assert_test!(
        u32::from(port) >= EPHEMERAL_PORT_START && u32::from(port) < EPHEMERAL_PORT_END,
        "ephemeral port {} in range",
        port
    );
    assert_test!(!socket.is_active());
    assert_eq_test!(net.udp.socket_count(BindingType::Unbound), 1);

    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 0)));
    assert_ok!(net.core.bind_socket(&socket, BindingType::LocallyBound, Some(local), None, BindingFlags::ACTIVATE));
    assert_eq_test!(socket.local_address(), ip(10, 0, 0, 1, port), "port carried over");
    assert_test!(socket.is_active());
    assert_eq_test!(net.udp.socket_count(BindingType::Unbound), 0);

    let remote = ip(10, 0, 0, 2, 53);
    assert_ok!(net.core.bind_socket(&socket, BindingType::FullyBound, None, Some(&remote), BindingFlags::ACTIVATE));
    assert_eq_test!(socket.binding_type(), BindingType::FullyBound);
    assert_eq_test!(socket.remote_address(), remote);
    assert_eq_test!(socket.local_address(), ip(10, 0, 0, 1, port));
    assert_test!(socket.flags().contains(SocketFlags::PREVIOUSLY_ACTIVE));

    assert_ok!(net.core.disconnect_socket(&socket));
    assert_eq_test!(socket.binding_type(), BindingType::LocallyBound);
    assert_eq_test!(socket.remote_address(), NetworkAddress::ZERO);
    assert_test!(socket.is_active(), "was active before the connect");
    assert_test!(!socket.flags().contains(SocketFlags::PREVIOUSLY_ACTIVE));
    assert_eq_test!(net.udp.socket_count(BindingType::LocallyBound), 1);
    assert_eq_test!(net.udp.socket_count(BindingType::FullyBound), 0);

    pass!()
}

pub fn test_connect_activated_socket_goes_inactive_on_disconnect() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));
    let socket = net.udp_socket();

    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 6000)));
    assert_ok!(net.core.bind_socket(&socket, BindingType::LocallyBound, Some(local), None, ANY));
    assert_test!(!socket.is_active());

    let remote = ip(10, 0, 0, 2, 53);
    assert_ok!(net.core.bind_socket(&socket, BindingType::FullyBound, None, Some(&remote), BindingFlags::ACTIVATE));
    assert_test!(socket.is_active());
    assert_test!(!socket.flags().contains(SocketFlags::PREVIOUSLY_ACTIVE));

    assert_ok!(net.core.disconnect_socket(&socket));
    assert_test!(!socket.is_active());
    assert_err!(net.core.disconnect_socket(&socket), NetError::InvalidParameter, "no longer fully bound");

    pass!()
}

pub fn test_ephemeral_ports_wrap_then_run_out() -> TestResult {
    let net = TestNet::with_config(NetCoreConfig {
        ephemeral_port_start: 50000,
        ephemeral_port_count: 3,
        ..test_config()
    });
    net.platform.set_counter(2);

    let mut ports = [0u16; 3];
    for port in ports.iter_mut() {
        let socket = net.udp_socket();
        let unlinked = LinkLocalAddress::unlinked(NetworkAddress::any(NetDomain::Ip4, 0));
        assert_ok!(net.core.bind_socket(&socket, BindingType::Unbound, Some(unlinked), None, ANY));
        *port = socket.local_address().port;
    }
    assert_eq_test!(ports, [50002, 50000, 50001], "starts at the counter offset and wraps");

    let socket = net.udp_socket();
    let unlinked = LinkLocalAddress::unlinked(NetworkAddress::any(NetDomain::Ip4, 0));
    assert_err!(
        net.core.bind_socket(&socket, BindingType::Unbound, Some(unlinked), None, ANY),
        NetError::ResourceInUse
    );
    assert_eq_test!(socket.binding_type(), BindingType::Invalid);
    assert_eq_test!(net.udp.socket_count(BindingType::Unbound), 3);

    pass!()
}

pub fn test_no_port_assignment_keeps_zero_port() -> TestResult {
    let net = TestNet::new();
    let socket = net.udp_socket();

    let unlinked = LinkLocalAddress::unlinked(NetworkAddress::any(NetDomain::Ip4, 0));
    assert_ok!(net.core.bind_socket(
        &socket,
        BindingType::Unbound,
        Some(unlinked),
        None,
        BindingFlags::NO_PORT_ASSIGNMENT
    ));
    assert_eq_test!(socket.local_address().port, 0);

    pass!()
}

pub fn test_connection_based_rejects_group_addresses() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));

    let socket = net.tcp_socket();
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 0)));
    assert_err!(
        net.core.bind_socket(&socket, BindingType::FullyBound, Some(local.clone()), Some(&ip(224, 0, 0, 1, 80)), ANY),
        NetError::DestinationUnreachable
    );
    assert_err!(
        net.core.bind_socket(&socket, BindingType::FullyBound, Some(local), Some(&ip(255, 255, 255, 255, 80)), ANY),
        NetError::DestinationUnreachable
    );

    let group = LinkLocalAddress::unlinked(ip(224, 0, 0, 251, 5353));
    assert_err!(
        net.core.bind_socket(&socket, BindingType::LocallyBound, Some(group.clone()), None, ANY),
        NetError::InvalidAddress
    );
    assert_eq_test!(socket.binding_type(), BindingType::Invalid);

    let datagram = net.udp_socket();
    assert_ok!(
        net.core.bind_socket(&datagram, BindingType::LocallyBound, Some(group), None, ANY),
        "datagram sockets may listen on a group"
    );

    pass!()
}

pub fn test_packet_size_and_link_override() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));
    let socket = net.udp_socket();
    let over_ethernet = PacketSizeInformation::new(42, 0, 1514, 60);

    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 0)));
    let link_override = assert_ok!(net.core.initialize_socket_link_override(&socket, local.clone()));
    assert_eq_test!(link_override.packet_size, over_ethernet);
    assert_test!(socket.link().is_none(), "override does not bind");

    assert_err!(
        net.core.initialize_socket_link_override(&socket, LinkLocalAddress::unlinked(ip(10, 0, 0, 1, 0))),
        NetError::InvalidParameter
    );

    assert_ok!(net.core.bind_socket(&socket, BindingType::LocallyBound, Some(local.clone()), None, ANY));
    assert_eq_test!(socket.packet_size(), over_ethernet);
    assert_err!(
        net.core.initialize_socket_link_override(&socket, local),
        NetError::ConnectionExists
    );

    pass!()
}

pub fn test_link_down_detaches_bound_sockets() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));
    let socket = net.udp_socket();
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 7000)));
    assert_ok!(net.core.bind_socket(&socket, BindingType::LocallyBound, Some(local), None, BindingFlags::ACTIVATE));

    let unbound = net.udp_socket();
    let unlinked = LinkLocalAddress::unlinked(NetworkAddress::any(NetDomain::Ip4, 7001));
    assert_ok!(net.core.bind_socket(&unbound, BindingType::Unbound, Some(unlinked), None, BindingFlags::ACTIVATE));

    assert_ok!(net.core.set_link_state(&link, false, 0));
    assert_eq_test!(socket.binding_type(), BindingType::Invalid);
    assert_test!(!socket.is_active());
    assert_test!(socket.is_disconnected());
    assert_eq_test!(socket.last_error(), Some(NetError::NoNetworkConnection));
    assert_eq_test!(net.udp.socket_count(BindingType::LocallyBound), 0);

    assert_test!(unbound.is_active(), "sockets without a link are untouched");
    assert_test!(!unbound.is_disconnected());

    pass!()
}

pub fn test_bind_to_down_link_detaches() -> TestResult {
    let net = TestNet::new();
    let link = net.add_link("eth0", 1);
    let socket = net.udp_socket();

    let local = LinkLocalAddress {
        link: Some(link.clone()),
        link_address: link.first_address_entry().map(|entry| entry.id),
        local_address: ip(10, 0, 0, 1, 7000),
    };
    assert_err!(
        net.core.bind_socket(&socket, BindingType::LocallyBound, Some(local), None, ANY),
        NetError::NoNetworkConnection
    );
    assert_test!(socket.is_disconnected());
    assert_eq_test!(socket.binding_type(), BindingType::Invalid);

    pass!()
}

pub fn test_invalid_transitions() -> TestResult {
    let net = TestNet::new();
    let eth0 = net.up_link("eth0", ip(10, 0, 0, 1, 0));
    let eth1 = net.up_link("eth1", ip(10, 0, 1, 1, 0));
    let socket = net.udp_socket();

    assert_err!(
        net.core.bind_socket(&socket, BindingType::Invalid, None, None, ANY),
        NetError::InvalidParameter
    );
    assert_err!(
        net.core.bind_socket(&socket, BindingType::FullyBound, None, None, ANY),
        NetError::InvalidParameter,
        "fully bound needs a remote"
    );

    let local = assert_ok!(net.local(&eth0, ip(10, 0, 0, 1, 6000)));
    assert_ok!(net.core.bind_socket(&socket, BindingType::LocallyBound, Some(local.clone()), None, ANY));

    let unlinked = LinkLocalAddress::unlinked(NetworkAddress::any(NetDomain::Ip4, 6000));
    assert_err!(
        net.core.bind_socket(&socket, BindingType::Unbound, Some(unlinked), None, ANY),
        NetError::InvalidParameter,
        "less bound"
    );
    assert_err!(
        net.core.bind_socket(&socket, BindingType::LocallyBound, Some(local), None, ANY),
        NetError::InvalidParameter,
        "same level"
    );

    let remote = ip(10, 0, 0, 2, 53);
    let other_port = assert_ok!(net.local(&eth0, ip(10, 0, 0, 1, 6001)));
    assert_err!(
        net.core.bind_socket(&socket, BindingType::FullyBound, Some(other_port), Some(&remote), ANY),
        NetError::InvalidParameter,
        "port change"
    );

    let other_link = assert_ok!(net.local(&eth1, ip(10, 0, 1, 1, 0)));
    assert_err!(
        net.core.bind_socket(&socket, BindingType::FullyBound, Some(other_link), Some(&remote), ANY),
        NetError::InvalidParameter,
        "link hop"
    );

    assert_eq_test!(socket.binding_type(), BindingType::LocallyBound, "failed binds change nothing");
    assert_eq_test!(socket.local_address(), ip(10, 0, 0, 1, 6000));
    assert_eq_test!(net.udp.socket_count(BindingType::LocallyBound), 1);

    pass!()
}

pub fn test_allow_rebind_replaces_local_information() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));
    let socket = net.udp_socket();

    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 6000)));
    assert_ok!(net.core.bind_socket(&socket, BindingType::LocallyBound, Some(local), None, ANY));

    let wildcard = assert_ok!(net.local(&link, ip(0, 0, 0, 0, 6000)));
    assert_ok!(net.core.bind_socket(
        &socket,
        BindingType::LocallyBound,
        Some(wildcard),
        None,
        BindingFlags::ALLOW_REBIND
    ));
    assert_eq_test!(socket.local_address(), ip(0, 0, 0, 0, 6000));
    assert_eq_test!(net.udp.socket_count(BindingType::LocallyBound), 1);

    pass!()
}

pub fn test_activate_and_deactivate() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));
    let socket = net.udp_socket();

    assert_err!(net.core.activate_socket(&socket), NetError::NotConfigured);
    net.core.deactivate_socket(&socket);
    assert_eq_test!(socket.binding_type(), BindingType::Invalid, "no-op when never bound");

    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 6000)));
    assert_ok!(net.core.bind_socket(&socket, BindingType::LocallyBound, Some(local), None, ANY));
    assert_ok!(net.core.activate_socket(&socket));
    assert_test!(socket.is_active());

    net.core.deactivate_socket(&socket);
    assert_test!(!socket.is_active());
    assert_eq_test!(socket.binding_type(), BindingType::Invalid);
    assert_eq_test!(net.udp.socket_count(BindingType::LocallyBound), 0);
    assert_eq_test!(socket.local_address(), ip(10, 0, 0, 1, 6000), "addresses kept until rebound");

    pass!()
}

pub fn test_packet_size_worked_out_before_locking() -> TestResult {
    let net = TestNet::new();
    let link = net.up_link("eth0", ip(10, 0, 0, 1, 0));
    *net.data_link.watched.lock() = Some(net.udp.clone());
    let queries = net.data_link.size_queries.load(Ordering::Relaxed);

    let socket = net.udp_socket();
    let local = assert_ok!(net.local(&link, ip(10, 0, 0, 1, 6000)));
    assert_ok!(net.core.bind_socket(&socket, BindingType::LocallyBound, Some(local), None, ANY));
    assert_ok!(net.core.bind_socket(&socket, BindingType::FullyBound, None, Some(&ip(10, 0, 0, 2, 80)), ANY));

    assert_test!(net.data_link.size_queries.load(Ordering::Relaxed) > queries, "data link consulted");
    assert_test!(
        !net.data_link.queried_under_table_lock.load(Ordering::Relaxed),
        "data link called with the table lock held"
    );
    assert_eq_test!(socket.packet_size(), PacketSizeInformation::new(42, 0, 1514, 60));

    pass!()
}

define_test_suite!(
    binding,
    [
        test_reuse_predicates,
        test_any_and_concrete_share_port_with_reuse,
        test_any_address_needs_reuse_from_everyone,
        test_time_wait_tuple_is_reclaimed,
        test_live_tuple_is_unique,
        test_forked_listener_skips_validation,
        test_active_socket_stays_active_across_disconnect,
        test_connect_activated_socket_goes_inactive_on_disconnect,
        test_ephemeral_ports_wrap_then_run_out,
        test_no_port_assignment_keeps_zero_port,
        test_connection_based_rejects_group_addresses,
        test_packet_size_and_link_override,
        test_packet_size_worked_out_before_locking,
        test_link_down_detaches_bound_sockets,
        test_bind_to_down_link_detaches,
        test_invalid_transitions,
        test_allow_rebind_replaces_local_information,
        test_activate_and_deactivate,
    ]
);
