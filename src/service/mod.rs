//! # Invocation Service
//!
//! - **object**: the [`RemoteObject`](object::RemoteObject) capability and closure tables
//! - **object_space**: registry and request router, attached to a server as an observer
//! - **executor**: bounded worker pool for invocations
//! - **client**: calling peer with request/response correlation

pub mod client;
pub mod executor;
pub mod object;
pub mod object_space;
