//! # Utility Modules
//!
//! Supporting pieces shared by the transport and the object space.
//!
//! ## Components
//! - **Compression**: LZ4 and Zstd with size limits and an entropy check
//! - **Logging**: `tracing-subscriber` setup driven by [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: per-instance atomic counters
//! - **Timeout**: default durations and an async deadline helper

pub mod compression;
pub mod logging;
pub mod metrics;
pub mod timeout;
