//! Translation from declarative configuration to kernel-shaped state.
//!
//! Each configured service expands into up to four IPVS services, one
//! per (address family x protocol) pair the frontend provides an address
//! and port for. Backends expand the same way under each service, then
//! pass through the route policy.

use crate::config::{Backend, Config, Frontend, ServiceConfig};
use crate::engine::Options;
use crate::routes::RouteTable;
use common::{Error, Result};
use ipvs::{
    AddressFamily, DestKey, Destination, DestinationCounters, ForwardingMethod, Protocol,
    Scheduler, Service, ServiceFlags, ServiceKey,
};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// One kernel service together with its desired destinations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceState {
    pub service: Service,
    /// Keyed for diffing; serialized as a list since the key is
    /// recoverable from each destination.
    #[serde(serialize_with = "destinations_as_seq")]
    pub destinations: BTreeMap<DestKey, Destination>,
}

fn destinations_as_seq<S: Serializer>(
    map: &BTreeMap<DestKey, Destination>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(map.values())
}

/// The full desired state, keyed by kernel service identity.
pub type DesiredState = BTreeMap<ServiceKey, ServiceState>;

const EXPANSIONS: [(AddressFamily, Protocol); 4] = [
    (AddressFamily::V4, Protocol::Tcp),
    (AddressFamily::V4, Protocol::Udp),
    (AddressFamily::V6, Protocol::Tcp),
    (AddressFamily::V6, Protocol::Udp),
];

/// Expand a configuration snapshot into desired kernel state.
///
/// Translation is all-or-nothing: any malformed address aborts the whole
/// expansion, so a bad config never yields a partial desired state.
pub fn expand(config: &Config, options: &Options) -> Result<DesiredState> {
    let routes = RouteTable::from_config(&config.routes)?;
    let mut desired = DesiredState::new();

    for (name, svc_config) in &config.services {
        for (family, protocol) in EXPANSIONS {
            let Some(state) = expand_one(name, svc_config, family, protocol, &routes, options)?
            else {
                continue;
            };
            desired.insert(state.service.key(), state);
        }
    }
    Ok(desired)
}

fn expand_one(
    name: &str,
    config: &ServiceConfig,
    family: AddressFamily,
    protocol: Protocol,
    routes: &RouteTable,
    options: &Options,
) -> Result<Option<ServiceState>> {
    // Both halves of the identity must be configured for this pair.
    let Some(address) = frontend_address(name, &config.frontend, family)? else {
        return Ok(None);
    };
    let Some(port) = port_for(&config.frontend.tcp_port, &config.frontend.udp_port, protocol)
    else {
        return Ok(None);
    };

    let scheduler = config
        .frontend
        .scheduler
        .as_deref()
        .map(Scheduler::parse)
        .unwrap_or_default();

    let (flags, timeout) = match config.frontend.persistence_timeout {
        Some(timeout) => (ServiceFlags::new(ServiceFlags::PERSISTENT), timeout),
        None => (ServiceFlags::default(), 0),
    };

    let netmask = match family {
        AddressFamily::V4 => u32::MAX,
        AddressFamily::V6 => 128,
    };

    let service = Service {
        address,
        protocol,
        port,
        fwmark: 0,
        scheduler,
        flags,
        timeout,
        netmask,
    };

    let mut destinations = BTreeMap::new();
    for (backend_name, backend) in &config.backends {
        let Some(dest) =
            expand_backend(name, backend_name, backend, family, protocol, options)?
        else {
            continue;
        };
        // Route policy may rewrite or suppress the destination.
        let Some(dest) = routes.steer(dest, &service) else {
            continue;
        };
        destinations.insert(dest.key(), dest);
    }

    Ok(Some(ServiceState {
        service,
        destinations,
    }))
}

fn expand_backend(
    service: &str,
    name: &str,
    backend: &Backend,
    family: AddressFamily,
    protocol: Protocol,
    options: &Options,
) -> Result<Option<Destination>> {
    let address = match family {
        AddressFamily::V4 => parse_v4(backend.ipv4_address.as_deref(), || {
            format!("service {}, backend {}", service, name)
        })?,
        AddressFamily::V6 => parse_v6(backend.ipv6_address.as_deref(), || {
            format!("service {}, backend {}", service, name)
        })?,
    };
    let Some(address) = address else {
        return Ok(None);
    };
    let Some(port) = port_for(&backend.tcp_port, &backend.udp_port, protocol) else {
        return Ok(None);
    };

    Ok(Some(Destination {
        address,
        port,
        forward: ForwardingMethod::Masq,
        weight: backend.weight.unwrap_or(options.default_weight),
        upper_threshold: 0,
        lower_threshold: 0,
        counters: DestinationCounters::default(),
    }))
}

fn frontend_address(
    name: &str,
    frontend: &Frontend,
    family: AddressFamily,
) -> Result<Option<IpAddr>> {
    match family {
        AddressFamily::V4 => {
            parse_v4(frontend.ipv4_address.as_deref(), || format!("service {}", name))
        }
        AddressFamily::V6 => {
            parse_v6(frontend.ipv6_address.as_deref(), || format!("service {}", name))
        }
    }
}

fn parse_v4(addr: Option<&str>, context: impl Fn() -> String) -> Result<Option<IpAddr>> {
    addr.map(|a| {
        a.parse::<Ipv4Addr>()
            .map(IpAddr::V4)
            .map_err(|_| Error::config(format!("{}: invalid IPv4 address '{}'", context(), a)))
    })
    .transpose()
}

fn parse_v6(addr: Option<&str>, context: impl Fn() -> String) -> Result<Option<IpAddr>> {
    addr.map(|a| {
        a.parse::<Ipv6Addr>()
            .map(IpAddr::V6)
            .map_err(|_| Error::config(format!("{}: invalid IPv6 address '{}'", context(), a)))
    })
    .transpose()
}

fn port_for(tcp: &Option<u16>, udp: &Option<u16>, protocol: Protocol) -> Option<u16> {
    match protocol {
        Protocol::Tcp => *tcp,
        Protocol::Udp => *udp,
        Protocol::Other(_) => None,
    }
}
