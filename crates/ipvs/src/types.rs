//! IPVS data types and structures.

use crate::commands::{
    IPVS_FWD_BYPASS, IPVS_FWD_DROUTE, IPVS_FWD_LOCALNODE, IPVS_FWD_MASQ, IPVS_FWD_TUNNEL,
};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// IPVS version information, unpacked from the kernel's u32 encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IpvsVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl IpvsVersion {
    /// Unpack a version from the kernel's one-byte-per-component encoding.
    pub fn from_raw(v: u32) -> Self {
        Self {
            major: (v >> 16) & 0xff,
            minor: (v >> 8) & 0xff,
            patch: v & 0xff,
        }
    }
}

impl fmt::Display for IpvsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Kernel IPVS information returned by GET_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IpvsInfo {
    pub version: IpvsVersion,
    pub conn_table_size: u32,
}

/// Address family of a virtual or real server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn raw(self) -> u16 {
        match self {
            AddressFamily::V4 => libc::AF_INET as u16,
            AddressFamily::V6 => libc::AF_INET6 as u16,
        }
    }

    pub fn from_raw(af: u16) -> Option<Self> {
        match af as i32 {
            libc::AF_INET => Some(AddressFamily::V4),
            libc::AF_INET6 => Some(AddressFamily::V6),
            _ => None,
        }
    }

    /// Stored byte width of an address in this family.
    pub fn addr_len(self) -> usize {
        match self {
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 16,
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// Transport protocol for IPVS services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Other(u16),
}

impl Protocol {
    pub fn raw(self) -> u16 {
        match self {
            Protocol::Tcp => libc::IPPROTO_TCP as u16,
            Protocol::Udp => libc::IPPROTO_UDP as u16,
            Protocol::Other(n) => n,
        }
    }

    pub fn from_raw(proto: u16) -> Self {
        match proto as i32 {
            libc::IPPROTO_TCP => Protocol::Tcp,
            libc::IPPROTO_UDP => Protocol::Udp,
            _ => Protocol::Other(proto),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Other(n) => write!(f, "IP({})", n),
        }
    }
}

/// IPVS scheduling algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Scheduler {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnection,
    WeightedLeastConnection,
    SourceHashing,
    MaglevHashing,
    Other(String),
}

impl Scheduler {
    /// Parse a kernel scheduler name. Unknown names are carried verbatim.
    pub fn parse(name: &str) -> Self {
        match name {
            "rr" => Scheduler::RoundRobin,
            "wrr" => Scheduler::WeightedRoundRobin,
            "lc" => Scheduler::LeastConnection,
            "wlc" => Scheduler::WeightedLeastConnection,
            "sh" => Scheduler::SourceHashing,
            "mh" => Scheduler::MaglevHashing,
            other => Scheduler::Other(other.to_string()),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::WeightedLeastConnection
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheduler::RoundRobin => write!(f, "rr"),
            Scheduler::WeightedRoundRobin => write!(f, "wrr"),
            Scheduler::LeastConnection => write!(f, "lc"),
            Scheduler::WeightedLeastConnection => write!(f, "wlc"),
            Scheduler::SourceHashing => write!(f, "sh"),
            Scheduler::MaglevHashing => write!(f, "mh"),
            Scheduler::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Service flags plus the mask of flag bits the kernel should honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ServiceFlags {
    pub flags: u32,
    pub mask: u32,
}

impl ServiceFlags {
    pub const PERSISTENT: u32 = 0x1;
    pub const HASHED: u32 = 0x2;
    pub const ONE_PACKET: u32 = 0x4;

    pub fn new(flags: u32) -> Self {
        Self {
            flags,
            mask: u32::MAX,
        }
    }
}

/// How matched traffic is delivered to a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ForwardingMethod {
    /// NAT (masquerading)
    Masq,
    /// Local delivery
    LocalNode,
    /// IP-in-IP tunnel
    Tunnel,
    /// Direct routing (DSR)
    Route,
    /// Bypass
    Bypass,
}

impl ForwardingMethod {
    pub fn raw(self) -> u32 {
        match self {
            ForwardingMethod::Masq => IPVS_FWD_MASQ,
            ForwardingMethod::LocalNode => IPVS_FWD_LOCALNODE,
            ForwardingMethod::Tunnel => IPVS_FWD_TUNNEL,
            ForwardingMethod::Route => IPVS_FWD_DROUTE,
            ForwardingMethod::Bypass => IPVS_FWD_BYPASS,
        }
    }

    pub fn from_raw(method: u32) -> Option<Self> {
        Some(match method {
            IPVS_FWD_MASQ => ForwardingMethod::Masq,
            IPVS_FWD_LOCALNODE => ForwardingMethod::LocalNode,
            IPVS_FWD_TUNNEL => ForwardingMethod::Tunnel,
            IPVS_FWD_DROUTE => ForwardingMethod::Route,
            IPVS_FWD_BYPASS => ForwardingMethod::Bypass,
            _ => return None,
        })
    }

    /// Parse a method name as used in route configuration.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "masq" | "nat" => ForwardingMethod::Masq,
            "local" => ForwardingMethod::LocalNode,
            "tunnel" | "ipip" => ForwardingMethod::Tunnel,
            "route" | "droute" => ForwardingMethod::Route,
            "bypass" => ForwardingMethod::Bypass,
            _ => return None,
        })
    }
}

impl fmt::Display for ForwardingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardingMethod::Masq => write!(f, "masq"),
            ForwardingMethod::LocalNode => write!(f, "local"),
            ForwardingMethod::Tunnel => write!(f, "tunnel"),
            ForwardingMethod::Route => write!(f, "route"),
            ForwardingMethod::Bypass => write!(f, "bypass"),
        }
    }
}

/// An IPVS service (virtual server).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub address: IpAddr,
    pub protocol: Protocol,
    pub port: u16,
    /// Nonzero selects firewall-mark identity; address and port are then
    /// not part of the service key.
    pub fwmark: u32,
    pub scheduler: Scheduler,
    pub flags: ServiceFlags,
    /// Persistence timeout in seconds (0 = none).
    pub timeout: u32,
    /// Persistence netmask (host-order IPv4 mask, or prefix length for IPv6).
    pub netmask: u32,
}

/// Identity of a service. Identity fields are immutable once created;
/// changing any of them is a delete+recreate, never an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ServiceKey {
    Address {
        family: AddressFamily,
        protocol: Protocol,
        address: IpAddr,
        port: u16,
    },
    FirewallMark(u32),
}

impl Service {
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.address)
    }

    pub fn key(&self) -> ServiceKey {
        if self.fwmark != 0 {
            ServiceKey::FirewallMark(self.fwmark)
        } else {
            ServiceKey::Address {
                family: self.family(),
                protocol: self.protocol,
                address: self.address,
                port: self.port,
            }
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fwmark > 0 {
            write!(f, "FWM {} ({})", self.fwmark, self.scheduler)
        } else {
            write!(
                f,
                "{} {}:{} ({})",
                self.protocol, self.address, self.port, self.scheduler
            )
        }
    }
}

/// Read-only connection counters, populated only from kernel reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DestinationCounters {
    pub active: u32,
    pub inactive: u32,
    pub persistent: u32,
}

/// An IPVS destination (real server). The address family is inherited
/// from the owning service.
#[derive(Debug, Clone, Eq, Serialize)]
pub struct Destination {
    pub address: IpAddr,
    pub port: u16,
    pub forward: ForwardingMethod,
    pub weight: i32,
    pub upper_threshold: u32,
    pub lower_threshold: u32,
    pub counters: DestinationCounters,
}

/// Identity of a destination within its owning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DestKey {
    pub address: IpAddr,
    pub port: u16,
}

impl Destination {
    pub fn key(&self) -> DestKey {
        DestKey {
            address: self.address,
            port: self.port,
        }
    }
}

// Counters are kernel-maintained state, not parameters; they do not
// participate in equality.
impl PartialEq for Destination {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.port == other.port
            && self.forward == other.forward
            && self.weight == other.weight
            && self.upper_threshold == other.upper_threshold
            && self.lower_threshold == other.lower_threshold
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({}, w={})", self.address, self.port, self.forward, self.weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn service(addr: [u8; 4], port: u16) -> Service {
        Service {
            address: IpAddr::V4(Ipv4Addr::from(addr)),
            protocol: Protocol::Tcp,
            port,
            fwmark: 0,
            scheduler: Scheduler::WeightedLeastConnection,
            flags: ServiceFlags::default(),
            timeout: 0,
            netmask: u32::MAX,
        }
    }

    #[test]
    fn service_key_ignores_parameters() {
        let a = service([10, 0, 0, 1], 80);
        let mut b = a.clone();
        b.scheduler = Scheduler::RoundRobin;
        b.timeout = 300;
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn fwmark_selects_mark_identity() {
        let mut svc = service([10, 0, 0, 1], 80);
        svc.fwmark = 42;
        assert_eq!(svc.key(), ServiceKey::FirewallMark(42));
    }

    #[test]
    fn destination_equality_ignores_counters() {
        let a = Destination {
            address: IpAddr::V4(Ipv4Addr::new(10, 1, 0, 1)),
            port: 8080,
            forward: ForwardingMethod::Masq,
            weight: 10,
            upper_threshold: 0,
            lower_threshold: 0,
            counters: DestinationCounters::default(),
        };
        let mut b = a.clone();
        b.counters.active = 99;
        assert_eq!(a, b);
    }

    #[test]
    fn version_unpacks_bytes() {
        let v = IpvsVersion::from_raw(0x0001_0203);
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn scheduler_name_round_trip() {
        for name in ["rr", "wrr", "lc", "wlc", "sh", "mh", "sed"] {
            assert_eq!(Scheduler::parse(name).to_string(), name);
        }
    }
}
