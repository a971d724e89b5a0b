//! Reconciliation of desired state against the kernel IPVS tables.

use crate::config::Config;
use crate::translate::{self, DesiredState, ServiceState};
use common::Result;
use ipvs::{Destination, IpvsClient, Service};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Engine tunables. Explicit rather than ambient; callers construct one
/// and hand it to the engine.
#[derive(Debug, Clone)]
pub struct Options {
    /// Weight assigned to backends that do not set one.
    pub default_weight: i32,
}

impl Default for Options {
    fn default() -> Self {
        Self { default_weight: 10 }
    }
}

/// The kernel operations the engine performs, as a seam for testing.
/// [`IpvsClient`] is the production implementation.
pub trait IpvsDriver {
    fn get_services(&mut self) -> Result<Vec<Service>>;
    fn get_destinations(&mut self, service: &Service) -> Result<Vec<Destination>>;
    fn add_service(&mut self, service: &Service) -> Result<()>;
    fn update_service(&mut self, service: &Service) -> Result<()>;
    fn delete_service(&mut self, service: &Service) -> Result<()>;
    fn add_destination(&mut self, service: &Service, dest: &Destination) -> Result<()>;
    fn update_destination(&mut self, service: &Service, dest: &Destination) -> Result<()>;
    fn delete_destination(&mut self, service: &Service, dest: &Destination) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

impl IpvsDriver for IpvsClient {
    fn get_services(&mut self) -> Result<Vec<Service>> {
        IpvsClient::get_services(self)
    }
    fn get_destinations(&mut self, service: &Service) -> Result<Vec<Destination>> {
        IpvsClient::get_destinations(self, service)
    }
    fn add_service(&mut self, service: &Service) -> Result<()> {
        IpvsClient::add_service(self, service)
    }
    fn update_service(&mut self, service: &Service) -> Result<()> {
        IpvsClient::update_service(self, service)
    }
    fn delete_service(&mut self, service: &Service) -> Result<()> {
        IpvsClient::delete_service(self, service)
    }
    fn add_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        IpvsClient::add_destination(self, service, dest)
    }
    fn update_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        IpvsClient::update_destination(self, service, dest)
    }
    fn delete_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        IpvsClient::delete_destination(self, service, dest)
    }
    fn flush(&mut self) -> Result<()> {
        IpvsClient::flush(self)
    }
}

/// A serializable view of what the engine believes the kernel holds.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub services: Vec<ServiceState>,
}

/// Single-writer reconciliation engine.
///
/// Holds a mirror of the kernel state as of the last successful apply
/// and computes minimal add/update/delete sequences against it. All
/// access goes through `&mut self`; there is exactly one engine per
/// kernel table.
pub struct Engine<D> {
    driver: D,
    options: Options,
    current: DesiredState,
}

impl Engine<IpvsClient> {
    /// Open the kernel driver and seed the mirror from a kernel dump.
    pub fn open(options: Options) -> Result<Self> {
        let driver = IpvsClient::open()?;
        let mut engine = Engine::with_driver(driver, options);
        engine.resync()?;
        Ok(engine)
    }
}

impl<D: IpvsDriver> Engine<D> {
    pub fn with_driver(driver: D, options: Options) -> Self {
        Self {
            driver,
            options,
            current: DesiredState::new(),
        }
    }

    /// Reconcile the kernel tables to match the given configuration.
    ///
    /// Apply order: services are created and updated before their
    /// destinations change, destinations are removed before stale
    /// services, and stale services go last (deleting a service drops
    /// its remaining destinations in the kernel). The first kernel
    /// rejection aborts the pass; the mirror keeps its pre-apply
    /// contents so the next pass re-derives the remaining work.
    pub fn apply(&mut self, config: &Config) -> Result<()> {
        let desired = translate::expand(config, &self.options)?;
        self.converge(desired)
    }

    fn converge(&mut self, desired: DesiredState) -> Result<()> {
        let mut added = 0usize;
        let mut updated = 0usize;

        // Phase 1: create or update services.
        for (key, state) in &desired {
            match self.current.get(key) {
                None => {
                    debug!(service = %state.service, "adding service");
                    self.driver.add_service(&state.service)?;
                    added += 1;
                }
                Some(have) if have.service != state.service => {
                    debug!(service = %state.service, "updating service");
                    self.driver.update_service(&state.service)?;
                    updated += 1;
                }
                Some(_) => {}
            }
        }

        // Phase 2: create or update destinations.
        for (key, state) in &desired {
            let have = self.current.get(key);
            for (dest_key, dest) in &state.destinations {
                match have.and_then(|h| h.destinations.get(dest_key)) {
                    None => {
                        debug!(service = %state.service, dest = %dest, "adding destination");
                        self.driver.add_destination(&state.service, dest)?;
                    }
                    Some(existing) if existing != dest => {
                        debug!(service = %state.service, dest = %dest, "updating destination");
                        self.driver.update_destination(&state.service, dest)?;
                    }
                    Some(_) => {}
                }
            }
        }

        // Phase 3: drop destinations that are no longer wanted, but only
        // for services that survive; deleted services take their
        // destinations with them.
        for (key, have) in &self.current {
            let Some(want) = desired.get(key) else {
                continue;
            };
            for (dest_key, dest) in &have.destinations {
                if !want.destinations.contains_key(dest_key) {
                    debug!(service = %have.service, dest = %dest, "removing destination");
                    self.driver.delete_destination(&have.service, dest)?;
                }
            }
        }

        // Phase 4: drop stale services.
        let mut removed = 0usize;
        for (key, have) in &self.current {
            if !desired.contains_key(key) {
                debug!(service = %have.service, "removing service");
                self.driver.delete_service(&have.service)?;
                removed += 1;
            }
        }

        info!(
            services = desired.len(),
            added, updated, removed, "reconciliation complete"
        );
        self.current = desired;
        Ok(())
    }

    /// Rebuild the mirror from a kernel dump, discarding whatever the
    /// engine believed before. Run this at startup and after any
    /// suspicion of out-of-band changes.
    pub fn resync(&mut self) -> Result<()> {
        let mut current = DesiredState::new();
        for service in self.driver.get_services()? {
            let dests = self.driver.get_destinations(&service)?;
            let destinations: BTreeMap<_, _> =
                dests.into_iter().map(|d| (d.key(), d)).collect();
            current.insert(
                service.key(),
                ServiceState {
                    service,
                    destinations,
                },
            );
        }
        info!(services = current.len(), "resynced from kernel");
        self.current = current;
        Ok(())
    }

    /// Flush the kernel tables and the mirror.
    pub fn flush(&mut self) -> Result<()> {
        self.driver.flush()?;
        self.current.clear();
        info!("flushed all services");
        Ok(())
    }

    /// What the engine believes the kernel currently holds.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            services: self.current.values().cloned().collect(),
        }
    }
}
