//! # Invocation Protocol
//!
//! What travels inside a frame.
//!
//! - **Message**: requests, responses, keep-alive pings and disconnect notices
//! - **Value**: dynamic arguments and return values
//! - **Envelope**: message <-> packet, through the codec and the stream provider
//!
//! Faults ([`message::Fault`]) are ordinary response payloads, never
//! transport errors.

pub mod envelope;
pub mod message;
pub mod value;
