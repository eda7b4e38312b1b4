use crate::core::packet::Packet;
use crate::core::serialization::Serialization;
use crate::error::Result;
use crate::protocol::message::Message;
use crate::transport::stream::StreamProvider;
use std::sync::Arc;

/// Turns messages into packets and back using the shared codec and stream
/// provider. Cheap to clone.
#[derive(Clone)]
pub struct Envelope {
    serialization: Arc<dyn Serialization>,
    streams: Arc<dyn StreamProvider>,
}

impl Envelope {
    pub fn new(serialization: Arc<dyn Serialization>, streams: Arc<dyn StreamProvider>) -> Self {
        Self {
            serialization,
            streams,
        }
    }

    pub fn serialization(&self) -> &Arc<dyn Serialization> {
        &self.serialization
    }

    pub fn streams(&self) -> &Arc<dyn StreamProvider> {
        &self.streams
    }

    pub fn seal(&self, message: &Message) -> Result<Packet> {
        let bytes = self.serialization.serialize(message)?;
        let (payload, flags) = self.streams.outbound(bytes)?;
        Ok(Packet::new(payload).with_flags(flags))
    }

    /// Restore and decode a packet. Decompressed payloads longer than
    /// `max_len` are rejected.
    pub fn open(&self, packet: Packet, max_len: usize) -> Result<Message> {
        let bytes = self.streams.inbound(packet.payload, packet.flags, max_len)?;
        self.serialization.deserialize(&bytes)
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("format", &self.serialization.format().name())
            .field("streams", &self.streams.name())
            .finish()
    }
}
