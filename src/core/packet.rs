use crate::config::{MAGIC_BYTES, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use crate::error::{RemoteError, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Magic(4) + Version(1) + Flags(1) + Length(4)
pub const HEADER_SIZE: usize = 10;

/// One self-delimiting frame on the wire.
///
/// The payload is opaque at this layer; [`Envelope`](crate::protocol::envelope::Envelope)
/// gives it meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    /// Payload treatment bits, see [`compression`](crate::utils::compression)
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: 0,
            payload,
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Total encoded length
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&MAGIC_BYTES);
        dst.put_u8(self.version);
        dst.put_u8(self.flags);
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.to_vec()
    }

    /// Validate a header and return `(version, flags, payload_len)`.
    ///
    /// Rejects oversized claims before any payload allocation happens.
    pub fn parse_header(header: &[u8], max_payload: usize) -> Result<(u8, u8, usize)> {
        if header.len() < HEADER_SIZE {
            return Err(RemoteError::InvalidHeader);
        }
        if header[0..4] != MAGIC_BYTES {
            return Err(RemoteError::InvalidHeader);
        }
        let version = header[4];
        if version != PROTOCOL_VERSION {
            return Err(RemoteError::UnsupportedVersion(version));
        }
        let flags = header[5];
        let len = u32::from_be_bytes([header[6], header[7], header[8], header[9]]) as usize;
        if len > max_payload {
            return Err(RemoteError::OversizedPacket(len));
        }
        Ok((version, flags, len))
    }

    /// Parse exactly one complete frame from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (version, flags, len) = Self::parse_header(bytes, MAX_PAYLOAD_SIZE)?;
        let mut body = &bytes[HEADER_SIZE..];
        if body.remaining() < len {
            return Err(RemoteError::InvalidHeader);
        }
        let payload = body.copy_to_bytes(len).to_vec();
        Ok(Self {
            version,
            flags,
            payload,
        })
    }
}
