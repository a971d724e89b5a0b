//! Common utilities and types shared across ipvsctl components.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
