//! Declarative service configuration.
//!
//! The configuration is a protocol-agnostic description of load-balanced
//! services (frontends with named backends) plus a prefix-keyed route
//! policy. It is delivered by an external collaborator as an initial full
//! snapshot followed by incremental change events; updates rebuild whole
//! maps, so a snapshot handed to the engine is never mutated in place.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Full configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub routes: BTreeMap<String, RouteConfig>,

    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

/// One named service: a frontend and its named backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub frontend: Frontend,

    #[serde(default)]
    pub backends: BTreeMap<String, Backend>,
}

/// Protocol-agnostic virtual-server description. Each optional field the
/// frontend leaves out simply skips the corresponding
/// (address family x protocol) expansion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontend {
    pub ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
    pub tcp_port: Option<u16>,
    pub udp_port: Option<u16>,

    /// Kernel scheduler name (defaults to wlc).
    pub scheduler: Option<String>,

    /// Persistence timeout in seconds; presence turns persistence on.
    pub persistence_timeout: Option<u32>,
}

/// Protocol-agnostic real-server description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    pub ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
    pub tcp_port: Option<u16>,
    pub udp_port: Option<u16>,

    /// Scheduling weight; falls back to the engine's configured default.
    pub weight: Option<i32>,
}

/// Prefix-keyed policy entry: gateway rewrite, forwarding-method
/// override, or filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// "default" or an IPv4 CIDR prefix such as "10.0.0.0/24".
    pub prefix: String,

    /// Gateway address; matched destinations are rewritten to it.
    pub gateway: Option<String>,

    /// Forwarding method override ("masq", "tunnel", "route", ...).
    pub method: Option<String>,

    /// Suppress matched destinations entirely.
    #[serde(default)]
    pub filter: bool,
}

/// One incremental configuration change, addressed by name.
///
/// A closed sum over the four changeable entities; consumers match it
/// exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    Service(String, Change<ServiceConfig>),
    Frontend(String, Change<Frontend>),
    Backend {
        service: String,
        name: String,
        change: Change<Backend>,
    },
    Route(String, Change<RouteConfig>),
}

/// Payload of a change event.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Added(T),
    Updated(T),
    Removed,
}

impl Config {
    /// Produce a new snapshot with one change applied. The receiver is
    /// left untouched; readers of the old snapshot never observe a
    /// partial update.
    pub fn apply_change(&self, change: ConfigChange) -> Result<Config> {
        let mut next = self.clone();
        match change {
            ConfigChange::Service(name, Change::Added(svc))
            | ConfigChange::Service(name, Change::Updated(svc)) => {
                next.services.insert(name, svc);
            }
            ConfigChange::Service(name, Change::Removed) => {
                next.services.remove(&name);
            }
            ConfigChange::Frontend(name, Change::Added(fe))
            | ConfigChange::Frontend(name, Change::Updated(fe)) => {
                next.service_mut(&name)?.frontend = fe;
            }
            ConfigChange::Frontend(name, Change::Removed) => {
                return Err(Error::config(format!(
                    "service {}: a frontend cannot be removed independently of its service",
                    name
                )));
            }
            ConfigChange::Backend {
                service,
                name,
                change: Change::Added(be),
            }
            | ConfigChange::Backend {
                service,
                name,
                change: Change::Updated(be),
            } => {
                next.service_mut(&service)?.backends.insert(name, be);
            }
            ConfigChange::Backend {
                service,
                name,
                change: Change::Removed,
            } => {
                next.service_mut(&service)?.backends.remove(&name);
            }
            ConfigChange::Route(name, Change::Added(route))
            | ConfigChange::Route(name, Change::Updated(route)) => {
                next.routes.insert(name, route);
            }
            ConfigChange::Route(name, Change::Removed) => {
                next.routes.remove(&name);
            }
        }
        Ok(next)
    }

    fn service_mut(&mut self, name: &str) -> Result<&mut ServiceConfig> {
        self.services
            .get_mut(name)
            .ok_or_else(|| Error::config(format!("unknown service: {}", name)))
    }
}

/// Where configuration is read from. Ingestion itself (tree walking,
/// watches) lives outside this crate; only the URL scheme is interpreted
/// here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A filesystem tree, e.g. file:///etc/lb/services
    File(PathBuf),
    /// A distributed key-value store, e.g. etcd://host:2379/lb
    Etcd(String),
}

impl ConfigSource {
    pub fn parse(url: &str) -> Result<ConfigSource> {
        if let Some(path) = url.strip_prefix("file://") {
            Ok(ConfigSource::File(PathBuf::from(path)))
        } else if let Some(rest) = url.strip_prefix("etcd://") {
            Ok(ConfigSource::Etcd(rest.to_string()))
        } else {
            Err(Error::UnsupportedScheme(url.to_string()))
        }
    }
}
