//! Integration tests for IPVS operations.
//!
//! These tests require:
//! - Root privileges (CAP_NET_ADMIN)
//! - IPVS kernel module loaded (modprobe ip_vs)
//! - Set IPVS_TEST_ENABLED=1 environment variable to run
//!
//! Run with: sudo -E cargo test --test integration_test -- --nocapture

use ipvs::{
    Destination, DestinationCounters, ForwardingMethod, IpvsClient, Protocol, Scheduler, Service,
    ServiceFlags,
};
use std::net::{IpAddr, Ipv4Addr};

fn should_run_tests() -> bool {
    std::env::var("IPVS_TEST_ENABLED").is_ok()
}

macro_rules! skip_unless_enabled {
    () => {
        if !should_run_tests() {
            eprintln!("Skipping test (set IPVS_TEST_ENABLED=1 to enable)");
            return;
        }
        common::logging::init_for_tests();
    };
}

fn test_service(addr: [u8; 4], port: u16, protocol: Protocol) -> Service {
    Service {
        address: IpAddr::V4(Ipv4Addr::from(addr)),
        protocol,
        port,
        fwmark: 0,
        scheduler: Scheduler::WeightedLeastConnection,
        flags: ServiceFlags::default(),
        timeout: 0,
        netmask: u32::MAX,
    }
}

fn test_destination(addr: [u8; 4], port: u16, weight: i32) -> Destination {
    Destination {
        address: IpAddr::V4(Ipv4Addr::from(addr)),
        port,
        forward: ForwardingMethod::Masq,
        weight,
        upper_threshold: 0,
        lower_threshold: 0,
        counters: DestinationCounters::default(),
    }
}

#[test]
fn test_client_creation() {
    skip_unless_enabled!();

    let client = IpvsClient::open().expect("failed to open IPVS client");
    assert!(client.family_id() > 0);
}

#[test]
fn test_get_info() {
    skip_unless_enabled!();

    let mut client = IpvsClient::open().expect("failed to open IPVS client");
    let info = client.get_info().expect("failed to get IPVS info");
    assert!(info.version.major >= 1, "unexpected version: {}", info.version);
    assert!(info.conn_table_size > 0);
}

#[test]
fn test_service_lifecycle() {
    skip_unless_enabled!();

    let mut client = IpvsClient::open().expect("failed to open IPVS client");
    client.flush().expect("failed to flush");

    let service = test_service([10, 0, 0, 1], 80, Protocol::Tcp);
    client.add_service(&service).expect("failed to add service");

    // Parameters may change under the same identity.
    let mut updated = service.clone();
    updated.scheduler = Scheduler::WeightedRoundRobin;
    client
        .update_service(&updated)
        .expect("failed to update service");

    let listed = client.get_services().expect("failed to list services");
    assert!(
        listed.iter().any(|s| s.key() == service.key()),
        "service not found in dump"
    );

    let dest = test_destination([192, 168, 1, 10], 8080, 100);
    client
        .add_destination(&updated, &dest)
        .expect("failed to add destination");

    let mut heavier = dest.clone();
    heavier.weight = 200;
    client
        .update_destination(&updated, &heavier)
        .expect("failed to update destination");

    let dests = client
        .get_destinations(&updated)
        .expect("failed to list destinations");
    assert_eq!(dests.len(), 1);
    assert_eq!(dests[0].key(), dest.key());
    assert_eq!(dests[0].weight, 200);

    client
        .delete_destination(&updated, &heavier)
        .expect("failed to delete destination");
    client
        .delete_service(&updated)
        .expect("failed to delete service");

    let listed = client.get_services().expect("failed to list services");
    assert!(!listed.iter().any(|s| s.key() == service.key()));
}

#[test]
fn test_udp_service() {
    skip_unless_enabled!();

    let mut client = IpvsClient::open().expect("failed to open IPVS client");
    client.flush().expect("failed to flush");

    let service = test_service([10, 0, 0, 2], 53, Protocol::Udp);
    client
        .add_service(&service)
        .expect("failed to add UDP service");
    client
        .delete_service(&service)
        .expect("failed to delete service");
}

#[test]
fn test_multiple_destinations_dump() {
    skip_unless_enabled!();

    let mut client = IpvsClient::open().expect("failed to open IPVS client");
    client.flush().expect("failed to flush");

    let service = test_service([10, 0, 0, 3], 443, Protocol::Tcp);
    client.add_service(&service).expect("failed to add service");

    for i in 1..=3u8 {
        let dest = test_destination([192, 168, 1, 10 + i], 8443, 100 * i as i32);
        client
            .add_destination(&service, &dest)
            .expect("failed to add destination");
    }

    let dests = client
        .get_destinations(&service)
        .expect("failed to list destinations");
    assert_eq!(dests.len(), 3);

    // Deleting the service implicitly drops its destinations.
    client
        .delete_service(&service)
        .expect("failed to delete service");
}
