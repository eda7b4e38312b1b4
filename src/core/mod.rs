//! # Core Protocol Components
//!
//! Framing and serialization, independent of any socket.
//!
//! ## Components
//! - **Packet**: one frame with magic bytes, version, flags and length
//! - **Codec**: Tokio codec for framing over byte streams
//! - **Serialization**: the pluggable [`Serialization`](serialization::Serialization) capability
//!
//! ## Wire Format
//! ```text
//! [Magic(4)] [Version(1)] [Flags(1)] [Length(4)] [Payload(N)]
//! ```
//!
//! Length is checked against the configured maximum before any payload
//! buffer is reserved.

pub mod codec;
pub mod packet;
pub mod serialization;
