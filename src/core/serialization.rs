//! # Serialization Formats
//!
//! The pluggable codec behind every connection.
//!
//! [`Serialization`] is the capability the server is built with: it turns a
//! protocol [`Message`] into bytes and back. It is injected once and shared
//! by all connections, so implementations must be thread-safe.
//! [`FormatSerialization`] is the built-in implementation over three serde
//! formats:
//!
//! - **Bincode**: binary, fastest (default)
//! - **JSON**: human-readable, useful when debugging traffic
//! - **MessagePack**: compact binary
//!
//! Every payload starts with a one-byte format identifier. A peer speaking a
//! different format is rejected with a serialization error on its first
//! frame, which closes only that peer's connection.
//!
//! ## Usage
//! ```rust
//! use remote_space::core::serialization::{FormatSerialization, Serialization, SerializationFormat};
//! use remote_space::protocol::message::Message;
//!
//! let codec = FormatSerialization::new(SerializationFormat::MessagePack);
//! let bytes = codec.serialize(&Message::Ping { id: 7 }).unwrap();
//! assert_eq!(codec.deserialize(&bytes).unwrap(), Message::Ping { id: 7 });
//! ```

use crate::error::constants::{ERR_EMPTY_PAYLOAD, ERR_FORMAT_MISMATCH};
use crate::error::{RemoteError, Result};
use crate::protocol::message::Message;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SerializationFormat {
    #[default]
    Bincode,
    Json,
    MessagePack,
}

impl SerializationFormat {
    /// Identifier byte written in front of every payload
    pub fn format_byte(self) -> u8 {
        match self {
            SerializationFormat::Bincode => 0x01,
            SerializationFormat::Json => 0x02,
            SerializationFormat::MessagePack => 0x03,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(SerializationFormat::Bincode),
            0x02 => Some(SerializationFormat::Json),
            0x03 => Some(SerializationFormat::MessagePack),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::Json => "JSON",
            SerializationFormat::MessagePack => "MessagePack",
        }
    }
}

/// Types that can be written in any [`SerializationFormat`]
pub trait MultiFormat: Serialize + for<'de> Deserialize<'de> + Sized {
    fn serialize_format(&self, format: SerializationFormat) -> Result<Vec<u8>> {
        match format {
            SerializationFormat::Bincode => {
                bincode::serialize(self).map_err(|e| RemoteError::Serialization(e.to_string()))
            }
            SerializationFormat::Json => {
                serde_json::to_vec(self).map_err(|e| RemoteError::Serialization(e.to_string()))
            }
            SerializationFormat::MessagePack => {
                rmp_serde::to_vec(self).map_err(|e| RemoteError::Serialization(e.to_string()))
            }
        }
    }

    /// Serialize with the format byte prepended
    fn serialize_with_header(&self, format: SerializationFormat) -> Result<Vec<u8>> {
        let mut data = vec![format.format_byte()];
        data.append(&mut self.serialize_format(format)?);
        Ok(data)
    }

    fn deserialize_format(data: &[u8], format: SerializationFormat) -> Result<Self> {
        match format {
            SerializationFormat::Bincode => {
                bincode::deserialize(data).map_err(|e| RemoteError::Serialization(e.to_string()))
            }
            SerializationFormat::Json => {
                serde_json::from_slice(data).map_err(|e| RemoteError::Serialization(e.to_string()))
            }
            SerializationFormat::MessagePack => {
                rmp_serde::from_slice(data).map_err(|e| RemoteError::Serialization(e.to_string()))
            }
        }
    }

    /// Deserialize, reading the format from the leading byte
    fn deserialize_with_header(data: &[u8]) -> Result<(Self, SerializationFormat)> {
        let (&first, rest) = data
            .split_first()
            .ok_or_else(|| RemoteError::Serialization(ERR_EMPTY_PAYLOAD.to_string()))?;

        let format = SerializationFormat::from_byte(first).ok_or_else(|| {
            RemoteError::Serialization(format!("Unknown format byte: {first:#04x}"))
        })?;

        Ok((Self::deserialize_format(rest, format)?, format))
    }
}

impl MultiFormat for Message {}

/// The codec capability injected into the server.
pub trait Serialization: Send + Sync + 'static {
    fn format(&self) -> SerializationFormat;

    fn serialize(&self, message: &Message) -> Result<Vec<u8>>;

    /// Fails with `RemoteError::Serialization` on malformed input or a
    /// format the codec does not speak.
    fn deserialize(&self, bytes: &[u8]) -> Result<Message>;
}

/// [`Serialization`] over one of the built-in serde formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatSerialization {
    format: SerializationFormat,
}

impl FormatSerialization {
    pub fn new(format: SerializationFormat) -> Self {
        Self { format }
    }
}

impl Serialization for FormatSerialization {
    fn format(&self) -> SerializationFormat {
        self.format
    }

    fn serialize(&self, message: &Message) -> Result<Vec<u8>> {
        message.serialize_with_header(self.format)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message> {
        let (message, format) = Message::deserialize_with_header(bytes)?;
        if format != self.format {
            return Err(RemoteError::Serialization(format!(
                "{ERR_FORMAT_MISMATCH}: expected {}, got {}",
                self.format.name(),
                format.name()
            )));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{InvocationRequest, InvocationResponse};
    use crate::protocol::value::Value;

    fn sample_request() -> Message {
        Message::Request(InvocationRequest::new(
            11,
            "echo",
            "concat",
            vec![Value::from("foo"), Value::from("bar")],
        ))
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_format_byte_roundtrip() {
        for format in [
            SerializationFormat::Bincode,
            SerializationFormat::Json,
            SerializationFormat::MessagePack,
        ] {
            let recovered =
                SerializationFormat::from_byte(format.format_byte()).expect("valid format byte");
            assert_eq!(format, recovered);
        }
        assert_eq!(SerializationFormat::from_byte(0x7F), None);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_every_format_carries_a_request() {
        let message = sample_request();
        for format in [
            SerializationFormat::Bincode,
            SerializationFormat::Json,
            SerializationFormat::MessagePack,
        ] {
            let codec = FormatSerialization::new(format);
            let bytes = codec.serialize(&message).expect("serialize");
            assert_eq!(bytes[0], format.format_byte());
            assert_eq!(codec.deserialize(&bytes).expect("deserialize"), message);
        }
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_format_mismatch_rejected() {
        let json = FormatSerialization::new(SerializationFormat::Json);
        let bincode = FormatSerialization::new(SerializationFormat::Bincode);
        let bytes = json
            .serialize(&Message::Response(InvocationResponse::ok(1, Value::Unit)))
            .expect("serialize");
        let err = bincode.deserialize(&bytes).expect_err("must reject");
        assert!(err.to_string().contains(ERR_FORMAT_MISMATCH));
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let codec = FormatSerialization::default();
        assert!(matches!(
            codec.deserialize(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
            Err(RemoteError::Serialization(_))
        ));
        assert!(matches!(
            codec.deserialize(&[]),
            Err(RemoteError::Serialization(_))
        ));
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_messagepack_smaller_than_json() {
        let message = sample_request();
        let json = message
            .serialize_format(SerializationFormat::Json)
            .expect("json");
        let msgpack = message
            .serialize_format(SerializationFormat::MessagePack)
            .expect("msgpack");
        assert!(msgpack.len() < json.len());
    }
}
