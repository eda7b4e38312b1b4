//! # Transport
//!
//! Sockets and sessions.
//!
//! - **server**: lifecycle (`start` / `bind` / `stop`), accept loop, read loops
//! - **connection**: one client session with an atomic send path
//! - **observer**: connection lifecycle hook
//! - **stream**: socket preparation and payload compression

pub mod connection;
pub mod observer;
pub mod server;
pub mod stream;
