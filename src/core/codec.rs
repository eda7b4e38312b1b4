use crate::config::MAX_PAYLOAD_SIZE;
use crate::core::packet::{Packet, HEADER_SIZE};
use crate::error::{RemoteError, Result};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Frames [`Packet`]s over a byte stream.
///
/// Decoding never consumes a partial frame: the buffer is left untouched
/// until a full header and payload are available.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_payload: usize,
}

impl PacketCodec {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(MAX_PAYLOAD_SIZE),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = RemoteError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let (version, flags, len) = Packet::parse_header(&src[..HEADER_SIZE], self.max_payload)?;

        if src.len() < HEADER_SIZE + len {
            src.reserve(HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(len).to_vec();

        Ok(Some(Packet {
            version,
            flags,
            payload,
        }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = RemoteError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > self.max_payload {
            return Err(RemoteError::OversizedPacket(item.payload.len()));
        }
        item.write_to(dst);
        Ok(())
    }
}
