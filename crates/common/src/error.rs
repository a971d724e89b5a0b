//! Common error types for ipvsctl components.

use std::fmt;

/// A specialized Result type for ipvsctl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for ipvsctl operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or out-of-bound netlink/attribute bytes. Always fatal to
    /// the current call, never silently ignored.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The kernel rejected a command. Carries the raw errno-style code
    /// reported in the netlink error frame.
    #[error("Kernel error (errno {code}): {context}")]
    Kernel { code: i32, context: String },

    /// Configuration fields that fail to parse or fail family-width
    /// validation during translation. Aborts the whole translation batch.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported config source scheme: {0}")]
    UnsupportedScheme(String),
}

impl Error {
    /// Create a new protocol error.
    pub fn protocol(msg: impl fmt::Display) -> Self {
        Error::Protocol(msg.to_string())
    }

    /// Create a new kernel error with the raw errno-style code.
    pub fn kernel(code: i32, context: impl fmt::Display) -> Self {
        Error::Kernel {
            code,
            context: context.to_string(),
        }
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Returns the kernel errno code, if this is a kernel error.
    pub fn kernel_code(&self) -> Option<i32> {
        match self {
            Error::Kernel { code, .. } => Some(*code),
            _ => None,
        }
    }
}
