//! # Error Types
//!
//! Error handling for the remote invocation server.
//!
//! Two families of failure exist and they never mix:
//! - [`RemoteError`] is raised locally: bind failures, broken frames, codec
//!   errors, duplicate registrations, lifecycle misuse. It travels through
//!   `Result` and never reaches the wire.
//! - [`Fault`](crate::protocol::message::Fault) is carried inside a response
//!   payload back to the caller of a remote method.
//!
//! ## Example Usage
//! ```rust
//! use remote_space::error::{RemoteError, Result};
//! use tracing::error;
//!
//! fn parse_port(raw: &str) -> Result<u16> {
//!     raw.parse::<u16>()
//!         .map_err(|e| RemoteError::ConfigError(format!("bad port {raw}: {e}")))
//! }
//!
//! if let Err(e) = parse_port("http") {
//!     error!(error = %e, "Refusing to start");
//! }
//! ```

use crate::protocol::message::ObjectId;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry lock errors
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on object registry";
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on object registry";
    pub const ERR_BINDINGS_LOCK: &str = "Failed to acquire lock on connection bindings";
    pub const ERR_CONNECTIONS_LOCK: &str = "Failed to acquire lock on server connections";

    /// Lifecycle errors
    pub const ERR_NOT_STARTED: &str = "Server has not been started";
    pub const ERR_ALREADY_BOUND: &str = "Server is already bound";
    pub const ERR_STOPPED: &str = "Server has been stopped";

    /// Codec errors
    pub const ERR_EMPTY_PAYLOAD: &str = "Empty payload";
    pub const ERR_FORMAT_MISMATCH: &str = "Serialization format mismatch";

    /// Invocation fault messages
    pub const ERR_METHOD_PANICKED: &str = "Remote method panicked";
    pub const ERR_WORKER_FAILED: &str = "Worker failed to complete invocation";
    pub const ERR_RESULT_TOO_DEEP: &str = "Return value is nested too deeply to send";

    /// Executor errors
    pub const ERR_POOL_CLOSED: &str = "Worker pool has been shut down";
}

/// Primary error type for all local operations.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Could not bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Object already registered: {0}")]
    DuplicateRegistration(ObjectId),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid protocol header")]
    InvalidHeader,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl RemoteError {
    /// Whether this error means the peer's bytes could not be understood.
    /// Such errors close the offending connection only.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            RemoteError::Serialization(_)
                | RemoteError::InvalidHeader
                | RemoteError::UnsupportedVersion(_)
                | RemoteError::OversizedPacket(_)
                | RemoteError::DecompressionFailure
        )
    }
}

impl From<bincode::Error> for RemoteError {
    fn from(e: bincode::Error) -> Self {
        RemoteError::Serialization(e.to_string())
    }
}

/// Type alias for Results using RemoteError
pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_names_address() {
        let err = RemoteError::Bind {
            address: "0.0.0.0:9001".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("0.0.0.0:9001"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_protocol_violation_classification() {
        assert!(RemoteError::InvalidHeader.is_protocol_violation());
        assert!(RemoteError::Serialization("x".into()).is_protocol_violation());
        assert!(!RemoteError::ConnectionClosed.is_protocol_violation());
        assert!(!RemoteError::Timeout.is_protocol_violation());
    }
}
