//! Route policy: longest-prefix-match overrides for destinations.
//!
//! A route either rewrites a matched destination's gateway (funneling
//! traffic through a secondary balancer), overrides its forwarding
//! method, or filters it out entirely.

use crate::config::RouteConfig;
use common::{Error, Result};
use ipnet::Ipv4Net;
use ipvs::{AddressFamily, Destination, ForwardingMethod, Service};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

/// A compiled route policy entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub name: String,
    /// None is the default/catch-all route (match length 0).
    pub prefix: Option<Ipv4Net>,
    pub gateway: Option<Ipv4Addr>,
    pub method: Option<ForwardingMethod>,
    pub filter: bool,
}

impl Route {
    fn from_config(name: &str, config: &RouteConfig) -> Result<Route> {
        let prefix = if config.prefix == "default" {
            None
        } else {
            let net: Ipv4Net = config.prefix.parse().map_err(|_| {
                Error::config(format!("route {}: invalid prefix '{}'", name, config.prefix))
            })?;
            Some(net)
        };

        let gateway = config
            .gateway
            .as_deref()
            .map(|gw| {
                gw.parse::<Ipv4Addr>().map_err(|_| {
                    Error::config(format!("route {}: invalid gateway '{}'", name, gw))
                })
            })
            .transpose()?;

        let method = config
            .method
            .as_deref()
            .map(|m| {
                ForwardingMethod::parse(m).ok_or_else(|| {
                    Error::config(format!("route {}: unknown forwarding method '{}'", name, m))
                })
            })
            .transpose()?;

        Ok(Route {
            name: name.to_string(),
            prefix,
            gateway,
            method,
            filter: config.filter,
        })
    }

    /// Prefix bit length if this route matches the address, None otherwise.
    /// The default route matches everything at length 0 and so never
    /// outranks a specific prefix.
    fn match_len(&self, address: &IpAddr) -> Option<u8> {
        match self.prefix {
            None => Some(0),
            Some(net) => match address {
                IpAddr::V4(v4) if net.contains(v4) => Some(net.prefix_len()),
                _ => None,
            },
        }
    }

    /// Apply this route's policy to a destination. Returns None if the
    /// destination is suppressed.
    ///
    /// Deterministic order when several fields are set: filter, then
    /// method, then gateway.
    pub fn apply(&self, mut dest: Destination, service: &Service) -> Option<Destination> {
        if self.filter {
            return None;
        }
        if let Some(method) = self.method {
            dest.forward = method;
            return Some(dest);
        }
        if let Some(gateway) = self.gateway {
            if service.family() == AddressFamily::V4 {
                // Chain through a secondary balancer: the destination
                // becomes the gateway, listening on the service's port.
                dest.address = IpAddr::V4(gateway);
                dest.port = service.port;
            }
            return Some(dest);
        }
        Some(dest)
    }
}

/// An immutable route set. Swapped wholesale on configuration change,
/// never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(routes: &BTreeMap<String, RouteConfig>) -> Result<RouteTable> {
        let routes = routes
            .iter()
            .map(|(name, config)| Route::from_config(name, config))
            .collect::<Result<Vec<_>>>()?;
        Ok(RouteTable { routes })
    }

    /// Longest-prefix-match lookup.
    pub fn lookup(&self, address: &IpAddr) -> Option<&Route> {
        self.routes
            .iter()
            .filter_map(|route| route.match_len(address).map(|len| (len, route)))
            .max_by_key(|(len, _)| *len)
            .map(|(_, route)| route)
    }

    /// Route a destination through the policy, keyed on its address.
    /// Unmatched destinations pass through unmodified.
    pub fn steer(&self, dest: Destination, service: &Service) -> Option<Destination> {
        match self.lookup(&dest.address) {
            Some(route) => route.apply(dest, service),
            None => Some(dest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipvs::{DestinationCounters, Protocol, Scheduler, ServiceFlags};

    fn table(entries: &[(&str, &str, Option<&str>, Option<&str>, bool)]) -> RouteTable {
        let mut map = BTreeMap::new();
        for (name, prefix, gateway, method, filter) in entries {
            map.insert(
                name.to_string(),
                RouteConfig {
                    prefix: prefix.to_string(),
                    gateway: gateway.map(str::to_string),
                    method: method.map(str::to_string),
                    filter: *filter,
                },
            );
        }
        RouteTable::from_config(&map).unwrap()
    }

    fn service(addr: &str, port: u16) -> Service {
        Service {
            address: addr.parse().unwrap(),
            protocol: Protocol::Tcp,
            port,
            fwmark: 0,
            scheduler: Scheduler::default(),
            flags: ServiceFlags::default(),
            timeout: 0,
            netmask: u32::MAX,
        }
    }

    fn destination(addr: &str, port: u16) -> Destination {
        Destination {
            address: addr.parse().unwrap(),
            port,
            forward: ForwardingMethod::Masq,
            weight: 10,
            upper_threshold: 0,
            lower_threshold: 0,
            counters: DestinationCounters::default(),
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let table = table(&[
            ("lan", "10.0.0.0/24", None, Some("route"), false),
            ("default", "default", None, Some("masq"), false),
        ]);

        let hit = table.lookup(&"10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(hit.name, "lan");

        let miss = table.lookup(&"192.0.2.1".parse().unwrap()).unwrap();
        assert_eq!(miss.name, "default");
    }

    #[test]
    fn no_routes_means_no_match() {
        let table = RouteTable::default();
        assert!(table.lookup(&"10.0.0.5".parse().unwrap()).is_none());

        // Unmatched destinations pass through unchanged.
        let dest = destination("10.1.0.1", 80);
        let out = table.steer(dest.clone(), &service("10.0.1.1", 80)).unwrap();
        assert_eq!(out, dest);
    }

    #[test]
    fn gateway_chaining_rewrites_address_and_port() {
        let table = table(&[("chain", "10.1.0.0/16", Some("10.9.9.9"), None, false)]);
        let svc = service("10.0.1.1", 80);
        let out = table.steer(destination("10.1.0.1", 8080), &svc).unwrap();
        assert_eq!(out.address, "10.9.9.9".parse::<IpAddr>().unwrap());
        // The service's port, not the backend's.
        assert_eq!(out.port, 80);
    }

    #[test]
    fn gateway_is_ignored_for_ipv6_services() {
        let table = table(&[("chain", "default", Some("10.9.9.9"), None, false)]);
        let svc = service("2001:db8::1", 80);
        let dest = destination("2001:db8::2", 8080);
        let out = table.steer(dest.clone(), &svc).unwrap();
        assert_eq!(out, dest);
    }

    #[test]
    fn method_override() {
        let table = table(&[("dsr", "10.1.0.0/16", None, Some("route"), false)]);
        let out = table
            .steer(destination("10.1.0.1", 8080), &service("10.0.1.1", 80))
            .unwrap();
        assert_eq!(out.forward, ForwardingMethod::Route);
    }

    #[test]
    fn filter_suppresses_destination() {
        let table = table(&[("drop", "10.66.0.0/16", None, None, true)]);
        assert!(
            table
                .steer(destination("10.66.1.1", 8080), &service("10.0.1.1", 80))
                .is_none()
        );
    }

    #[test]
    fn invalid_prefix_is_a_config_error() {
        let mut map = BTreeMap::new();
        map.insert(
            "bad".to_string(),
            RouteConfig {
                prefix: "not-a-prefix".to_string(),
                ..RouteConfig::default()
            },
        );
        let err = RouteTable::from_config(&map).unwrap_err();
        assert!(err.to_string().contains("bad"));
    }
}
