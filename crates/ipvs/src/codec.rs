//! IPVS netlink attribute encoding and decoding.
//!
//! Maps the typed Service/Destination/Info records onto the generic
//! netlink attribute wire format (length-prefixed, 4-byte aligned, with
//! nested attribute lists for the service and destination wrappers).
//!
//! Two encode modes exist per record kind: identity-only (the minimal
//! attribute set that uniquely names an object, used for deletes and as
//! the service designator on destination commands) and full (identity
//! plus all mutable parameters, used for create/update).

use crate::commands::{
    DestAttrType, IPVS_CMD_ATTR_DEST, IPVS_CMD_ATTR_SERVICE, InfoAttrType, IpvsCommand,
    SvcAttrType,
};
use crate::types::{
    AddressFamily, Destination, DestinationCounters, ForwardingMethod, Protocol, Scheduler,
    Service, ServiceFlags,
};
use common::{Error, Result};
use netlink_packet_core::{DecodeError, ParseableParametrized};
use netlink_packet_generic::{GenlFamily, GenlHeader};
use netlink_packet_utils::{
    Parseable,
    nla::{Nla, NlaBuffer, NlasIterator},
    parsers::{parse_u16, parse_u32},
};
use std::convert::TryInto;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use netlink_packet_utils::Emitable as UtilsEmitable;

/// IPVS generic netlink message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpvsCtrl {
    pub cmd: IpvsCommand,
    pub nlas: Vec<IpvsAttr>,
}

impl IpvsCtrl {
    pub fn new(cmd: IpvsCommand) -> Self {
        Self {
            cmd,
            nlas: Vec::new(),
        }
    }

    pub fn with_nlas(cmd: IpvsCommand, nlas: Vec<IpvsAttr>) -> Self {
        Self { cmd, nlas }
    }
}

/// Top-level IPVS netlink attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpvsAttr {
    /// Service record (nested attribute list)
    Service(Vec<SvcAttr>),
    /// Destination record (nested attribute list)
    Dest(Vec<DestAttr>),
    /// Info attribute (top-level in GET_INFO replies)
    Info(InfoAttr),
    /// Unknown/unsupported attribute
    Other(u16, Vec<u8>),
}

/// Service attributes, nested under IPVS_CMD_ATTR_SERVICE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SvcAttr {
    /// Address family (AF_INET / AF_INET6)
    AddressFamily(u16),
    /// Transport protocol (IPPROTO_TCP / IPPROTO_UDP)
    Protocol(u16),
    /// Raw address bytes, 4 or 16 by family
    Address(Vec<u8>),
    /// Port, big-endian on the wire
    Port(u16),
    /// Firewall mark
    FirewallMark(u32),
    /// Scheduler name, NUL-terminated
    Scheduler(String),
    /// Flags and mask, two native-order u32 values
    Flags(u32, u32),
    /// Persistence timeout in seconds
    Timeout(u32),
    /// Persistence netmask (network-order bytes on the wire)
    Netmask(u32),
    /// Unknown/unsupported attribute
    Other(u16, Vec<u8>),
}

/// Destination attributes, nested under IPVS_CMD_ATTR_DEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestAttr {
    /// Raw address bytes, 4 or 16 by family
    Address(Vec<u8>),
    /// Port, big-endian on the wire
    Port(u16),
    /// Forwarding method code
    ForwardingMethod(u32),
    /// Weight
    Weight(i32),
    /// Upper connection threshold
    UpperThreshold(u32),
    /// Lower connection threshold
    LowerThreshold(u32),
    /// Active connections (read-only)
    ActiveConns(u32),
    /// Inactive connections (read-only)
    InactiveConns(u32),
    /// Persistent connections (read-only)
    PersistConns(u32),
    /// Destination address family (newer kernels)
    AddressFamily(u16),
    /// Unknown/unsupported attribute
    Other(u16, Vec<u8>),
}

/// Info attributes, top-level in GET_INFO replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoAttr {
    /// IPVS version, packed u32
    Version(u32),
    /// Connection table size
    ConnTableSize(u32),
    /// Unknown/unsupported attribute
    Other(u16, Vec<u8>),
}

impl Nla for IpvsAttr {
    fn value_len(&self) -> usize {
        match self {
            Self::Service(nlas) => nlas.iter().map(|nla| nla.buffer_len()).sum(),
            Self::Dest(nlas) => nlas.iter().map(|nla| nla.buffer_len()).sum(),
            Self::Info(nla) => nla.value_len(),
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Service(_) => IPVS_CMD_ATTR_SERVICE,
            Self::Dest(_) => IPVS_CMD_ATTR_DEST,
            Self::Info(nla) => nla.kind(),
            Self::Other(kind, _) => *kind,
        }
    }

    fn is_nested(&self) -> bool {
        matches!(self, Self::Service(_) | Self::Dest(_))
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Service(nlas) => emit_nested(nlas, buffer),
            Self::Dest(nlas) => emit_nested(nlas, buffer),
            Self::Info(nla) => nla.emit_value(buffer),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

fn emit_nested<T: Nla>(nlas: &[T], buffer: &mut [u8]) {
    let mut offset = 0;
    for nla in nlas {
        let len = nla.buffer_len();
        nla.emit(&mut buffer[offset..offset + len]);
        offset += len;
    }
}

impl Nla for SvcAttr {
    fn value_len(&self) -> usize {
        match self {
            Self::AddressFamily(_) | Self::Protocol(_) | Self::Port(_) => 2,
            Self::Address(bytes) => bytes.len(),
            Self::FirewallMark(_) | Self::Timeout(_) | Self::Netmask(_) => 4,
            Self::Scheduler(s) => s.len() + 1, // NUL terminator
            Self::Flags(_, _) => 8,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::AddressFamily(_) => SvcAttrType::AddressFamily as u16,
            Self::Protocol(_) => SvcAttrType::Protocol as u16,
            Self::Address(_) => SvcAttrType::Address as u16,
            Self::Port(_) => SvcAttrType::Port as u16,
            Self::FirewallMark(_) => SvcAttrType::FirewallMark as u16,
            Self::Scheduler(_) => SvcAttrType::Scheduler as u16,
            Self::Flags(_, _) => SvcAttrType::Flags as u16,
            Self::Timeout(_) => SvcAttrType::Timeout as u16,
            Self::Netmask(_) => SvcAttrType::Netmask as u16,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::AddressFamily(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Protocol(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Address(bytes) => buffer.copy_from_slice(bytes),
            Self::Port(v) => buffer.copy_from_slice(&v.to_be_bytes()),
            Self::FirewallMark(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Scheduler(s) => {
                buffer[..s.len()].copy_from_slice(s.as_bytes());
                buffer[s.len()] = 0;
            }
            Self::Flags(flags, mask) => {
                buffer[..4].copy_from_slice(&flags.to_ne_bytes());
                buffer[4..8].copy_from_slice(&mask.to_ne_bytes());
            }
            Self::Timeout(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Netmask(v) => buffer.copy_from_slice(&v.to_be_bytes()),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

impl Nla for DestAttr {
    fn value_len(&self) -> usize {
        match self {
            Self::Address(bytes) => bytes.len(),
            Self::Port(_) | Self::AddressFamily(_) => 2,
            Self::ForwardingMethod(_)
            | Self::Weight(_)
            | Self::UpperThreshold(_)
            | Self::LowerThreshold(_)
            | Self::ActiveConns(_)
            | Self::InactiveConns(_)
            | Self::PersistConns(_) => 4,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Address(_) => DestAttrType::Address as u16,
            Self::Port(_) => DestAttrType::Port as u16,
            Self::ForwardingMethod(_) => DestAttrType::ForwardingMethod as u16,
            Self::Weight(_) => DestAttrType::Weight as u16,
            Self::UpperThreshold(_) => DestAttrType::UpperThreshold as u16,
            Self::LowerThreshold(_) => DestAttrType::LowerThreshold as u16,
            Self::ActiveConns(_) => DestAttrType::ActiveConns as u16,
            Self::InactiveConns(_) => DestAttrType::InactiveConns as u16,
            Self::PersistConns(_) => DestAttrType::PersistConns as u16,
            Self::AddressFamily(_) => DestAttrType::AddressFamily as u16,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Address(bytes) => buffer.copy_from_slice(bytes),
            Self::Port(v) => buffer.copy_from_slice(&v.to_be_bytes()),
            Self::ForwardingMethod(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Weight(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::UpperThreshold(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::LowerThreshold(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::ActiveConns(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::InactiveConns(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::PersistConns(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::AddressFamily(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

impl Nla for InfoAttr {
    fn value_len(&self) -> usize {
        match self {
            Self::Version(_) | Self::ConnTableSize(_) => 4,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Version(_) => InfoAttrType::Version as u16,
            Self::ConnTableSize(_) => InfoAttrType::ConnTableSize as u16,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Version(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::ConnTableSize(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for SvcAttr {
    type Error = DecodeError;

    fn parse(buf: &NlaBuffer<&'a T>) -> std::result::Result<Self, Self::Error> {
        let payload = buf.value();
        Ok(match buf.kind() {
            x if x == SvcAttrType::AddressFamily as u16 => Self::AddressFamily(
                parse_u16(payload).map_err(|_| DecodeError::from("invalid address family"))?,
            ),
            x if x == SvcAttrType::Protocol as u16 => Self::Protocol(
                parse_u16(payload).map_err(|_| DecodeError::from("invalid protocol"))?,
            ),
            x if x == SvcAttrType::Address as u16 => Self::Address(payload.to_vec()),
            x if x == SvcAttrType::Port as u16 => Self::Port(u16::from_be_bytes(
                payload
                    .try_into()
                    .map_err(|_| DecodeError::from("invalid service port length"))?,
            )),
            x if x == SvcAttrType::FirewallMark as u16 => Self::FirewallMark(
                parse_u32(payload).map_err(|_| DecodeError::from("invalid firewall mark"))?,
            ),
            x if x == SvcAttrType::Scheduler as u16 => {
                let s = std::str::from_utf8(payload)
                    .map_err(|_| DecodeError::from("invalid scheduler name"))?
                    .trim_end_matches('\0')
                    .to_string();
                Self::Scheduler(s)
            }
            x if x == SvcAttrType::Flags as u16 => {
                if payload.len() != 8 {
                    return Err(DecodeError::from("invalid flags length"));
                }
                let flags = u32::from_ne_bytes(payload[..4].try_into().unwrap());
                let mask = u32::from_ne_bytes(payload[4..8].try_into().unwrap());
                Self::Flags(flags, mask)
            }
            x if x == SvcAttrType::Timeout as u16 => Self::Timeout(
                parse_u32(payload).map_err(|_| DecodeError::from("invalid timeout"))?,
            ),
            x if x == SvcAttrType::Netmask as u16 => Self::Netmask(u32::from_be_bytes(
                payload
                    .try_into()
                    .map_err(|_| DecodeError::from("invalid netmask length"))?,
            )),
            kind => Self::Other(kind, payload.to_vec()),
        })
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for DestAttr {
    type Error = DecodeError;

    fn parse(buf: &NlaBuffer<&'a T>) -> std::result::Result<Self, Self::Error> {
        let payload = buf.value();
        let invalid = |what: &'static str| move |_| DecodeError::from(what);
        Ok(match buf.kind() {
            x if x == DestAttrType::Address as u16 => Self::Address(payload.to_vec()),
            x if x == DestAttrType::Port as u16 => Self::Port(u16::from_be_bytes(
                payload
                    .try_into()
                    .map_err(|_| DecodeError::from("invalid destination port length"))?,
            )),
            x if x == DestAttrType::ForwardingMethod as u16 => Self::ForwardingMethod(
                parse_u32(payload).map_err(invalid("invalid forwarding method"))?,
            ),
            x if x == DestAttrType::Weight as u16 => {
                Self::Weight(parse_u32(payload).map_err(invalid("invalid weight"))? as i32)
            }
            x if x == DestAttrType::UpperThreshold as u16 => Self::UpperThreshold(
                parse_u32(payload).map_err(invalid("invalid upper threshold"))?,
            ),
            x if x == DestAttrType::LowerThreshold as u16 => Self::LowerThreshold(
                parse_u32(payload).map_err(invalid("invalid lower threshold"))?,
            ),
            x if x == DestAttrType::ActiveConns as u16 => Self::ActiveConns(
                parse_u32(payload).map_err(invalid("invalid active connection count"))?,
            ),
            x if x == DestAttrType::InactiveConns as u16 => Self::InactiveConns(
                parse_u32(payload).map_err(invalid("invalid inactive connection count"))?,
            ),
            x if x == DestAttrType::PersistConns as u16 => Self::PersistConns(
                parse_u32(payload).map_err(invalid("invalid persistent connection count"))?,
            ),
            x if x == DestAttrType::AddressFamily as u16 => Self::AddressFamily(
                parse_u16(payload).map_err(invalid("invalid destination address family"))?,
            ),
            kind => Self::Other(kind, payload.to_vec()),
        })
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for InfoAttr {
    type Error = DecodeError;

    fn parse(buf: &NlaBuffer<&'a T>) -> std::result::Result<Self, Self::Error> {
        let payload = buf.value();
        Ok(match buf.kind() {
            x if x == InfoAttrType::Version as u16 => {
                Self::Version(parse_u32(payload).map_err(|_| DecodeError::from("invalid version"))?)
            }
            x if x == InfoAttrType::ConnTableSize as u16 => Self::ConnTableSize(
                parse_u32(payload).map_err(|_| DecodeError::from("invalid conn table size"))?,
            ),
            kind => Self::Other(kind, payload.to_vec()),
        })
    }
}

impl netlink_packet_core::Emitable for IpvsCtrl {
    fn buffer_len(&self) -> usize {
        self.nlas.iter().map(UtilsEmitable::buffer_len).sum()
    }

    fn emit(&self, buffer: &mut [u8]) {
        let mut offset = 0;
        for nla in &self.nlas {
            let len = UtilsEmitable::buffer_len(nla);
            UtilsEmitable::emit(nla, &mut buffer[offset..offset + len]);
            offset += len;
        }
    }
}

impl GenlFamily for IpvsCtrl {
    fn family_name() -> &'static str {
        "IPVS"
    }

    fn version(&self) -> u8 {
        1
    }

    fn command(&self) -> u8 {
        self.cmd as u8
    }
}

impl ParseableParametrized<[u8], GenlHeader> for IpvsCtrl {
    fn parse_with_param(buf: &[u8], header: GenlHeader) -> std::result::Result<Self, DecodeError> {
        let cmd = IpvsCommand::from_raw(header.cmd)
            .ok_or_else(|| DecodeError::from(format!("unknown IPVS command: {}", header.cmd)))?;

        // GET_INFO replies carry top-level info attributes whose type codes
        // collide with the service/dest wrapper codes; disambiguate by
        // command.
        let info_reply = matches!(cmd, IpvsCommand::SetInfo | IpvsCommand::GetInfo);

        let mut nlas = Vec::new();
        for nla in NlasIterator::new(buf) {
            let nla = nla.map_err(|e| DecodeError::from(e.to_string()))?;
            if info_reply {
                nlas.push(IpvsAttr::Info(InfoAttr::parse(&nla)?));
                continue;
            }
            match nla.kind() {
                IPVS_CMD_ATTR_SERVICE => {
                    let mut svc = Vec::new();
                    for child in NlasIterator::new(nla.value()) {
                        let child = child.map_err(|e| DecodeError::from(e.to_string()))?;
                        svc.push(SvcAttr::parse(&child)?);
                    }
                    nlas.push(IpvsAttr::Service(svc));
                }
                IPVS_CMD_ATTR_DEST => {
                    let mut dest = Vec::new();
                    for child in NlasIterator::new(nla.value()) {
                        let child = child.map_err(|e| DecodeError::from(e.to_string()))?;
                        dest.push(DestAttr::parse(&child)?);
                    }
                    nlas.push(IpvsAttr::Dest(dest));
                }
                kind => nlas.push(IpvsAttr::Other(kind, nla.value().to_vec())),
            }
        }

        Ok(Self { cmd, nlas })
    }
}

/// Pack an address as raw bytes of the given family's width. A family
/// mismatch is an error, never a silent truncation.
fn pack_address(address: &IpAddr, family: AddressFamily) -> Result<Vec<u8>> {
    match (address, family) {
        (IpAddr::V4(ip), AddressFamily::V4) => Ok(ip.octets().to_vec()),
        (IpAddr::V6(ip), AddressFamily::V6) => Ok(ip.octets().to_vec()),
        _ => Err(Error::protocol(format!(
            "address {} is not representable in family {}",
            address, family
        ))),
    }
}

/// Resolve raw address bytes against the address family. The kernel pads
/// IPv4 addresses to 16 bytes on dumps; the address occupies the leading 4.
fn unpack_address(payload: &[u8], family: AddressFamily) -> Result<IpAddr> {
    match family {
        AddressFamily::V4 if payload.len() == 4 || payload.len() == 16 => {
            let octets: [u8; 4] = payload[..4].try_into().unwrap();
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        AddressFamily::V6 if payload.len() == 16 => {
            let octets: [u8; 16] = payload.try_into().unwrap();
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => Err(Error::protocol(format!(
            "address length {} does not match family {}",
            payload.len(),
            family
        ))),
    }
}

impl Service {
    /// The minimal attribute set that uniquely names this service; used
    /// for DelService and as the service designator on destination
    /// commands.
    pub fn identity_nlas(&self) -> Result<Vec<SvcAttr>> {
        let family = self.family();
        let mut nlas = vec![SvcAttr::AddressFamily(family.raw())];
        if self.fwmark != 0 {
            nlas.push(SvcAttr::FirewallMark(self.fwmark));
        } else {
            nlas.push(SvcAttr::Protocol(self.protocol.raw()));
            nlas.push(SvcAttr::Address(pack_address(&self.address, family)?));
            nlas.push(SvcAttr::Port(self.port));
        }
        Ok(nlas)
    }

    /// Identity plus all mutable parameters; used for NewService and
    /// SetService.
    pub fn full_nlas(&self) -> Result<Vec<SvcAttr>> {
        let mut nlas = self.identity_nlas()?;
        nlas.push(SvcAttr::Scheduler(self.scheduler.to_string()));
        nlas.push(SvcAttr::Flags(self.flags.flags, self.flags.mask));
        nlas.push(SvcAttr::Timeout(self.timeout));
        nlas.push(SvcAttr::Netmask(self.netmask));
        Ok(nlas)
    }

    /// Decode a service from a parsed attribute list.
    pub fn from_nlas(nlas: &[SvcAttr]) -> Result<Service> {
        let mut family = None;
        let mut protocol = Protocol::Tcp;
        let mut addr_bytes: Option<&[u8]> = None;
        let mut port = 0;
        let mut fwmark = 0;
        let mut scheduler = Scheduler::default();
        let mut flags = ServiceFlags::default();
        let mut timeout = 0;
        let mut netmask = 0;

        for nla in nlas {
            match nla {
                SvcAttr::AddressFamily(af) => {
                    family = Some(AddressFamily::from_raw(*af).ok_or_else(|| {
                        Error::protocol(format!("unknown address family: {}", af))
                    })?);
                }
                SvcAttr::Protocol(proto) => protocol = Protocol::from_raw(*proto),
                SvcAttr::Address(bytes) => addr_bytes = Some(bytes),
                SvcAttr::Port(p) => port = *p,
                SvcAttr::FirewallMark(mark) => fwmark = *mark,
                SvcAttr::Scheduler(name) => scheduler = Scheduler::parse(name),
                SvcAttr::Flags(f, m) => {
                    flags = ServiceFlags {
                        flags: *f,
                        mask: *m,
                    }
                }
                SvcAttr::Timeout(t) => timeout = *t,
                SvcAttr::Netmask(n) => netmask = *n,
                SvcAttr::Other(..) => {}
            }
        }

        let family = family.ok_or_else(|| Error::protocol("service missing address family"))?;
        let address = match addr_bytes {
            Some(bytes) => unpack_address(bytes, family)?,
            None if fwmark != 0 => match family {
                AddressFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                AddressFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            },
            None => return Err(Error::protocol("service missing address")),
        };

        Ok(Service {
            address,
            protocol,
            port,
            fwmark,
            scheduler,
            flags,
            timeout,
            netmask,
        })
    }
}

impl Destination {
    /// The minimal attribute set that uniquely names this destination
    /// within its service; used for DelDest.
    pub fn identity_nlas(&self, service_family: AddressFamily) -> Result<Vec<DestAttr>> {
        Ok(vec![
            DestAttr::Address(pack_address(&self.address, service_family)?),
            DestAttr::Port(self.port),
        ])
    }

    /// Identity plus all mutable parameters; used for NewDest and SetDest.
    pub fn full_nlas(&self, service_family: AddressFamily) -> Result<Vec<DestAttr>> {
        let mut nlas = self.identity_nlas(service_family)?;
        nlas.push(DestAttr::ForwardingMethod(self.forward.raw()));
        nlas.push(DestAttr::Weight(self.weight));
        nlas.push(DestAttr::UpperThreshold(self.upper_threshold));
        nlas.push(DestAttr::LowerThreshold(self.lower_threshold));
        Ok(nlas)
    }

    /// Decode a destination from a parsed attribute list. The address
    /// family is inherited from the owning service unless the kernel
    /// supplied one explicitly.
    pub fn from_nlas(service_family: AddressFamily, nlas: &[DestAttr]) -> Result<Destination> {
        let mut family = service_family;
        let mut addr_bytes: Option<&[u8]> = None;
        let mut port = 0;
        let mut forward = ForwardingMethod::Masq;
        let mut weight = 0;
        let mut upper_threshold = 0;
        let mut lower_threshold = 0;
        let mut counters = DestinationCounters::default();

        for nla in nlas {
            match nla {
                DestAttr::Address(bytes) => addr_bytes = Some(bytes),
                DestAttr::Port(p) => port = *p,
                DestAttr::ForwardingMethod(method) => {
                    forward = ForwardingMethod::from_raw(*method).ok_or_else(|| {
                        Error::protocol(format!("unknown forwarding method: {}", method))
                    })?;
                }
                DestAttr::Weight(w) => weight = *w,
                DestAttr::UpperThreshold(t) => upper_threshold = *t,
                DestAttr::LowerThreshold(t) => lower_threshold = *t,
                DestAttr::ActiveConns(n) => counters.active = *n,
                DestAttr::InactiveConns(n) => counters.inactive = *n,
                DestAttr::PersistConns(n) => counters.persistent = *n,
                DestAttr::AddressFamily(af) => {
                    family = AddressFamily::from_raw(*af).ok_or_else(|| {
                        Error::protocol(format!("unknown destination address family: {}", af))
                    })?;
                }
                DestAttr::Other(..) => {}
            }
        }

        let addr_bytes =
            addr_bytes.ok_or_else(|| Error::protocol("destination missing address"))?;
        Ok(Destination {
            address: unpack_address(addr_bytes, family)?,
            port,
            forward,
            weight,
            upper_threshold,
            lower_threshold,
            counters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netlink_packet_utils::nla::NLA_F_NESTED;

    fn emit<T: Nla>(attr: &T) -> Vec<u8> {
        let mut buf = vec![0u8; attr.buffer_len()];
        attr.emit(&mut buf);
        buf
    }

    fn reparse_svc(attr: &SvcAttr) -> SvcAttr {
        let buf = emit(attr);
        SvcAttr::parse(&NlaBuffer::new_checked(&buf[..]).unwrap()).unwrap()
    }

    fn reparse_dest(attr: &DestAttr) -> DestAttr {
        let buf = emit(attr);
        DestAttr::parse(&NlaBuffer::new_checked(&buf[..]).unwrap()).unwrap()
    }

    fn sample_service() -> Service {
        Service {
            address: "10.0.1.1".parse().unwrap(),
            protocol: Protocol::Tcp,
            port: 80,
            fwmark: 0,
            scheduler: Scheduler::WeightedLeastConnection,
            flags: ServiceFlags::new(ServiceFlags::PERSISTENT),
            timeout: 300,
            netmask: u32::MAX,
        }
    }

    fn sample_destination() -> Destination {
        Destination {
            address: "10.1.0.1".parse().unwrap(),
            port: 8080,
            forward: ForwardingMethod::Route,
            weight: 10,
            upper_threshold: 1000,
            lower_threshold: 100,
            counters: DestinationCounters::default(),
        }
    }

    #[test]
    fn port_attr_is_big_endian_and_aligned() {
        // Matches the ipvsadm capture: 06 00 04 00 27 0f 00 00 for port 9999.
        let buf = emit(&SvcAttr::Port(9999));
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[..2], &6u16.to_ne_bytes());
        assert_eq!(&buf[2..4], &4u16.to_ne_bytes());
        assert_eq!(&buf[4..6], [0x27, 0x0f]);
        assert_eq!(&buf[6..8], [0x00, 0x00]);
    }

    #[test]
    fn scheduler_attr_is_nul_terminated() {
        let buf = emit(&SvcAttr::Scheduler("wlc".to_string()));
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[4..8], b"wlc\0");
    }

    #[test]
    fn service_wrapper_sets_nested_bit() {
        let svc = sample_service();
        let attr = IpvsAttr::Service(svc.full_nlas().unwrap());
        let buf = emit(&attr);
        let kind = u16::from_ne_bytes(buf[2..4].try_into().unwrap());
        assert_eq!(kind, IPVS_CMD_ATTR_SERVICE | NLA_F_NESTED);
    }

    #[test]
    fn svc_attr_round_trips() {
        let attrs = [
            SvcAttr::AddressFamily(libc::AF_INET as u16),
            SvcAttr::Protocol(libc::IPPROTO_TCP as u16),
            SvcAttr::Address(vec![10, 0, 0, 1]),
            SvcAttr::Port(0),
            SvcAttr::Port(65535),
            SvcAttr::FirewallMark(0xdead_beef),
            SvcAttr::Scheduler("wrr".to_string()),
            SvcAttr::Flags(0, 0),
            SvcAttr::Flags(ServiceFlags::PERSISTENT, u32::MAX),
            SvcAttr::Timeout(300),
            SvcAttr::Netmask(0xffff_0000),
        ];
        for attr in &attrs {
            assert_eq!(&reparse_svc(attr), attr);
        }
    }

    #[test]
    fn dest_attr_round_trips() {
        let attrs = [
            DestAttr::Address(vec![192, 0, 2, 7]),
            DestAttr::Port(65535),
            DestAttr::ForwardingMethod(crate::commands::IPVS_FWD_TUNNEL),
            DestAttr::Weight(0),
            DestAttr::Weight(65535),
            DestAttr::UpperThreshold(1000),
            DestAttr::LowerThreshold(10),
            DestAttr::ActiveConns(3),
            DestAttr::AddressFamily(libc::AF_INET6 as u16),
        ];
        for attr in &attrs {
            assert_eq!(&reparse_dest(attr), attr);
        }
    }

    #[test]
    fn short_port_payload_is_rejected() {
        // length 7 = 4-byte header + 3-byte payload
        let raw = [0x07, 0x00, 0x04, 0x00, 0x01, 0x02, 0x03, 0x00];
        let buf = NlaBuffer::new_checked(&raw[..]).unwrap();
        assert!(SvcAttr::parse(&buf).is_err());
    }

    #[test]
    fn service_round_trips_through_nlas() {
        let svc = sample_service();
        let decoded = Service::from_nlas(&svc.full_nlas().unwrap()).unwrap();
        assert_eq!(decoded, svc);
    }

    #[test]
    fn ipv6_service_round_trips_through_nlas() {
        let mut svc = sample_service();
        svc.address = "2001:db8::1".parse().unwrap();
        svc.netmask = 128;
        let decoded = Service::from_nlas(&svc.full_nlas().unwrap()).unwrap();
        assert_eq!(decoded, svc);
    }

    #[test]
    fn destination_round_trips_through_nlas() {
        let dest = sample_destination();
        let nlas = dest.full_nlas(AddressFamily::V4).unwrap();
        let decoded = Destination::from_nlas(AddressFamily::V4, &nlas).unwrap();
        assert_eq!(decoded, dest);
    }

    #[test]
    fn identity_encoding_omits_parameters() {
        let a = sample_service();
        let mut b = a.clone();
        b.scheduler = Scheduler::RoundRobin;
        b.timeout = 0;
        b.flags = ServiceFlags::default();
        assert_eq!(a.identity_nlas().unwrap(), b.identity_nlas().unwrap());

        // Identity fields decoded from full and identity encodings agree.
        let full = Service::from_nlas(&a.full_nlas().unwrap()).unwrap();
        let identity = Service::from_nlas(&a.identity_nlas().unwrap()).unwrap();
        assert_eq!(full.key(), identity.key());
    }

    #[test]
    fn fwmark_identity_has_no_address() {
        let mut svc = sample_service();
        svc.fwmark = 7;
        let nlas = svc.identity_nlas().unwrap();
        assert!(
            !nlas
                .iter()
                .any(|nla| matches!(nla, SvcAttr::Address(_) | SvcAttr::Port(_)))
        );
        assert!(nlas.contains(&SvcAttr::FirewallMark(7)));
    }

    #[test]
    fn family_mismatch_is_an_error() {
        let mut dest = sample_destination();
        dest.address = "2001:db8::7".parse().unwrap();
        assert!(dest.full_nlas(AddressFamily::V4).is_err());
    }

    #[test]
    fn kernel_padded_v4_address_resolves() {
        let mut padded = vec![10, 0, 0, 9];
        padded.extend_from_slice(&[0u8; 12]);
        let addr = unpack_address(&padded, AddressFamily::V4).unwrap();
        assert_eq!(addr, "10.0.0.9".parse::<IpAddr>().unwrap());

        assert!(unpack_address(&[1, 2, 3], AddressFamily::V4).is_err());
        assert!(unpack_address(&[0u8; 4], AddressFamily::V6).is_err());
    }

    #[test]
    fn counters_are_decoded_from_kernel_reads() {
        let mut nlas = sample_destination().full_nlas(AddressFamily::V4).unwrap();
        nlas.push(DestAttr::ActiveConns(12));
        nlas.push(DestAttr::InactiveConns(34));
        nlas.push(DestAttr::PersistConns(56));
        let decoded = Destination::from_nlas(AddressFamily::V4, &nlas).unwrap();
        assert_eq!(decoded.counters.active, 12);
        assert_eq!(decoded.counters.inactive, 34);
        assert_eq!(decoded.counters.persistent, 56);
    }
}
