//! Reconciliation engine for kernel IPVS load-balancing state.
//!
//! The engine consumes a declarative configuration (services with
//! frontends and backends, plus a route policy), translates it into
//! kernel-shaped desired state, and converges the kernel tables toward
//! it with minimal add/update/delete operations.

mod config;
mod engine;
mod routes;
mod translate;

pub use config::{
    Backend, Change, Config, ConfigChange, ConfigSource, Frontend, RouteConfig, ServiceConfig,
};
pub use engine::{Engine, IpvsDriver, Options, Snapshot};
pub use routes::{Route, RouteTable};
pub use translate::{expand, DesiredState, ServiceState};
