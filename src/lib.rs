//! # remote-space
//!
//! A TCP server that exposes in-process objects to remote callers.
//!
//! Clients send invocation requests naming an object id, a method and
//! arguments; the server resolves the object in its
//! [`ObjectSpace`](service::object_space::ObjectSpace), runs the method
//! (inline or on a bounded worker pool) and writes one response back on the
//! same connection. Failures to resolve or run a method come back as
//! [`Fault`](protocol::message::Fault)s, never as dropped connections.
//!
//! ## Layers
//! - **core**: frame format, frame codec, pluggable serialization
//! - **protocol**: messages, dynamic values, envelope (message <-> packet)
//! - **transport**: server lifecycle, connections, observers, stream providers
//! - **service**: remote objects, object space, worker pool, client
//! - **config** / **bootstrap**: configuration file and environment wiring
//!
//! ## Wire Format
//! ```text
//! [Magic "RSPC"(4)] [Version(1)] [Flags(1)] [Length(4, BE)] [Payload(N)]
//! ```
//! The payload is one serialized message prefixed by a format byte, after
//! optional LZ4/Zstd decompression announced in the flags.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod bootstrap;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

/// Commonly used types
pub mod prelude {
    pub use crate::config::{RemoteConfig, ServerConfig};
    pub use crate::core::serialization::{FormatSerialization, Serialization, SerializationFormat};
    pub use crate::error::{RemoteError, Result};
    pub use crate::protocol::message::{
        Fault, InvocationRequest, InvocationResponse, Message, MethodSignature, ObjectId,
    };
    pub use crate::protocol::value::Value;
    pub use crate::service::client::{CallResult, Client};
    pub use crate::service::executor::WorkerPool;
    pub use crate::service::object::{Args, InvocationError, MethodTable, RemoteObject};
    pub use crate::service::object_space::ObjectSpace;
    pub use crate::transport::connection::{Connection, ConnectionId};
    pub use crate::transport::observer::ConnectionObserver;
    pub use crate::transport::server::Server;
    pub use crate::transport::stream::{CompressedStreams, PlainStreams, StreamProvider};
    pub use crate::utils::compression::CompressionKind;
}
