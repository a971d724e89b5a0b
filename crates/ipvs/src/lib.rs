//! IPVS (IP Virtual Server) kernel driver via generic netlink.
//!
//! This crate provides a safe interface to the Linux IPVS load-balancing
//! tables through direct netlink syscalls: a verb-level client, the
//! attribute codec, and the domain model used by the reconciliation
//! engine.
//!
//! # Example
//!
//! ```no_run
//! use ipvs::IpvsClient;
//!
//! # fn main() -> common::Result<()> {
//! let mut client = IpvsClient::open()?;
//!
//! let info = client.get_info()?;
//! println!("IPVS version: {}", info.version);
//!
//! for service in client.get_services()? {
//!     println!("Service: {}", service);
//!     for dest in client.get_destinations(&service)? {
//!         println!("  -> {}", dest);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod codec;
pub mod commands;
mod netlink;
mod types;

pub use codec::{DestAttr, InfoAttr, IpvsAttr, IpvsCtrl, SvcAttr};
pub use commands::IpvsCommand;
pub use types::{
    AddressFamily, DestKey, Destination, DestinationCounters, ForwardingMethod, IpvsInfo,
    IpvsVersion, Protocol, Scheduler, Service, ServiceFlags, ServiceKey,
};

use common::{Error, Result};
use netlink::NetlinkSocket;
use netlink_packet_core::NLM_F_DUMP;
use std::fmt;

/// Verb-level IPVS client. One method per kernel command; no retries, and
/// kernel rejections are surfaced to the caller unchanged (with the
/// failing command and object identity in the context).
pub struct IpvsClient {
    socket: NetlinkSocket,
}

/// Attach command and object identity to a kernel rejection.
fn annotate(err: Error, what: impl fmt::Display) -> Error {
    match err {
        Error::Kernel { code, .. } => Error::kernel(code, what),
        other => other,
    }
}

impl IpvsClient {
    /// Open the netlink socket and resolve the IPVS generic netlink
    /// family.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The netlink socket cannot be created
    /// - The IPVS kernel module is not loaded
    /// - Insufficient permissions (requires CAP_NET_ADMIN)
    pub fn open() -> Result<Self> {
        let socket = NetlinkSocket::open()?;
        Ok(Self { socket })
    }

    /// Get the resolved IPVS family ID.
    pub fn family_id(&self) -> u16 {
        self.socket.family_id()
    }

    /// Get the IPVS version and connection table size from the kernel.
    pub fn get_info(&mut self) -> Result<IpvsInfo> {
        let mut version = None;
        let mut conn_table_size = 0;
        self.socket
            .request(IpvsCtrl::new(IpvsCommand::GetInfo), 0, |payload| {
                for nla in payload.nlas {
                    match nla {
                        IpvsAttr::Info(InfoAttr::Version(v)) => {
                            version = Some(IpvsVersion::from_raw(v))
                        }
                        IpvsAttr::Info(InfoAttr::ConnTableSize(n)) => conn_table_size = n,
                        _ => {}
                    }
                }
                Ok(())
            })?;
        let version = version.ok_or_else(|| Error::protocol("info reply missing version"))?;
        Ok(IpvsInfo {
            version,
            conn_table_size,
        })
    }

    /// Flush all services and destinations from the kernel tables.
    pub fn flush(&mut self) -> Result<()> {
        self.socket
            .request(IpvsCtrl::new(IpvsCommand::Flush), 0, |_| Ok(()))
            .map_err(|e| annotate(e, "Flush"))
    }

    /// List every service, accumulating all fragments of the dump.
    pub fn get_services(&mut self) -> Result<Vec<Service>> {
        let mut services = Vec::new();
        self.socket.request(
            IpvsCtrl::new(IpvsCommand::GetService),
            NLM_F_DUMP,
            |payload| {
                for nla in &payload.nlas {
                    if let IpvsAttr::Service(nlas) = nla {
                        services.push(Service::from_nlas(nlas)?);
                    }
                }
                Ok(())
            },
        )?;
        Ok(services)
    }

    /// List every destination of a service, accumulating all fragments of
    /// the dump.
    pub fn get_destinations(&mut self, service: &Service) -> Result<Vec<Destination>> {
        let family = service.family();
        let request = IpvsCtrl::with_nlas(
            IpvsCommand::GetDest,
            vec![IpvsAttr::Service(service.identity_nlas()?)],
        );
        let mut destinations = Vec::new();
        self.socket
            .request(request, NLM_F_DUMP, |payload| {
                for nla in &payload.nlas {
                    if let IpvsAttr::Dest(nlas) = nla {
                        destinations.push(Destination::from_nlas(family, nlas)?);
                    }
                }
                Ok(())
            })
            .map_err(|e| annotate(e, format!("GetDest {}", service)))?;
        Ok(destinations)
    }

    /// Add a new service.
    pub fn add_service(&mut self, service: &Service) -> Result<()> {
        self.service_command(IpvsCommand::NewService, service)
    }

    /// Update an existing service's parameters. Identity fields cannot be
    /// changed by an update.
    pub fn update_service(&mut self, service: &Service) -> Result<()> {
        self.service_command(IpvsCommand::SetService, service)
    }

    /// Delete a service. The kernel implicitly drops all of the service's
    /// destinations.
    pub fn delete_service(&mut self, service: &Service) -> Result<()> {
        let request = IpvsCtrl::with_nlas(
            IpvsCommand::DelService,
            vec![IpvsAttr::Service(service.identity_nlas()?)],
        );
        self.socket
            .request(request, 0, |_| Ok(()))
            .map_err(|e| annotate(e, format!("DelService {}", service)))
    }

    /// Add a destination to a service.
    pub fn add_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        self.dest_command(IpvsCommand::NewDest, service, dest, true)
    }

    /// Update a destination's parameters.
    pub fn update_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        self.dest_command(IpvsCommand::SetDest, service, dest, true)
    }

    /// Delete a destination from a service.
    pub fn delete_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        self.dest_command(IpvsCommand::DelDest, service, dest, false)
    }

    fn service_command(&mut self, cmd: IpvsCommand, service: &Service) -> Result<()> {
        let request = IpvsCtrl::with_nlas(cmd, vec![IpvsAttr::Service(service.full_nlas()?)]);
        self.socket
            .request(request, 0, |_| Ok(()))
            .map_err(|e| annotate(e, format!("{:?} {}", cmd, service)))
    }

    fn dest_command(
        &mut self,
        cmd: IpvsCommand,
        service: &Service,
        dest: &Destination,
        full: bool,
    ) -> Result<()> {
        let family = service.family();
        let dest_nlas = if full {
            dest.full_nlas(family)?
        } else {
            dest.identity_nlas(family)?
        };
        let request = IpvsCtrl::with_nlas(
            cmd,
            vec![
                IpvsAttr::Service(service.identity_nlas()?),
                IpvsAttr::Dest(dest_nlas),
            ],
        );
        self.socket
            .request(request, 0, |_| Ok(()))
            .map_err(|e| annotate(e, format!("{:?} {} on {}", cmd, dest, service)))
    }
}
