//! Stream providers: what happens to a socket and its payload bytes
//! between the serialization codec and the frame codec.

use crate::config::{ServerConfig, TransportConfig};
use crate::error::Result;
use crate::utils::compression::{self, CompressionKind};
use std::sync::Arc;
use tokio::net::TcpStream;

/// Byte-level treatment applied to every connection.
///
/// Inbound frames describe their own treatment through packet flags, so a
/// provider can always read what any other provider wrote.
pub trait StreamProvider: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Apply socket options to a freshly accepted or connected stream.
    fn prepare(&self, stream: &TcpStream) -> Result<()>;

    /// Transform an outbound payload, returning it with the flags to set.
    fn outbound(&self, payload: Vec<u8>) -> Result<(Vec<u8>, u8)>;

    /// Undo whatever the sender applied, as announced by `flags`. The
    /// restored payload may not exceed `max_len` bytes.
    fn inbound(&self, payload: Vec<u8>, flags: u8, max_len: usize) -> Result<Vec<u8>> {
        match CompressionKind::from_flags(flags)? {
            Some(kind) => compression::decompress_within(&payload, kind, max_len),
            None => Ok(payload),
        }
    }
}

/// Raw sockets, payloads untouched.
#[derive(Debug, Clone, Copy)]
pub struct PlainStreams {
    nodelay: bool,
}

impl PlainStreams {
    pub fn new(nodelay: bool) -> Self {
        Self { nodelay }
    }
}

impl Default for PlainStreams {
    fn default() -> Self {
        Self::new(true)
    }
}

impl StreamProvider for PlainStreams {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn prepare(&self, stream: &TcpStream) -> Result<()> {
        stream.set_nodelay(self.nodelay)?;
        Ok(())
    }

    fn outbound(&self, payload: Vec<u8>) -> Result<(Vec<u8>, u8)> {
        Ok((payload, 0))
    }
}

/// Compresses payloads at or above a size threshold.
#[derive(Debug, Clone, Copy)]
pub struct CompressedStreams {
    kind: CompressionKind,
    level: i32,
    threshold_bytes: usize,
    nodelay: bool,
}

impl CompressedStreams {
    pub fn new(kind: CompressionKind) -> Self {
        Self {
            kind,
            level: 3,
            threshold_bytes: 512,
            nodelay: true,
        }
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_threshold(mut self, threshold_bytes: usize) -> Self {
        self.threshold_bytes = threshold_bytes;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl StreamProvider for CompressedStreams {
    fn name(&self) -> &'static str {
        match self.kind {
            CompressionKind::Lz4 => "lz4",
            CompressionKind::Zstd => "zstd",
        }
    }

    fn prepare(&self, stream: &TcpStream) -> Result<()> {
        stream.set_nodelay(self.nodelay)?;
        Ok(())
    }

    fn outbound(&self, payload: Vec<u8>) -> Result<(Vec<u8>, u8)> {
        let (bytes, compressed) =
            compression::maybe_compress(payload, self.kind, self.level, self.threshold_bytes)?;
        Ok((bytes, if compressed { self.kind.flag() } else { 0 }))
    }
}

/// Build the provider described by configuration.
pub fn from_config(server: &ServerConfig, transport: &TransportConfig) -> Arc<dyn StreamProvider> {
    match transport.compression {
        Some(kind) => Arc::new(
            CompressedStreams::new(kind)
                .with_level(transport.compression_level)
                .with_threshold(transport.compression_threshold_bytes)
                .with_nodelay(server.tcp_nodelay),
        ),
        None => Arc::new(PlainStreams::new(server.tcp_nodelay)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::utils::compression::FLAG_ZSTD;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_plain_passthrough() {
        let streams = PlainStreams::default();
        let (out, flags) = streams.outbound(vec![1, 2, 3]).unwrap();
        assert_eq!(flags, 0);
        assert_eq!(streams.inbound(out, flags, 1024).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_plain_reads_compressed_frames() {
        let zstd = CompressedStreams::new(CompressionKind::Zstd).with_threshold(16);
        let payload = vec![b'a'; 2048];
        let (out, flags) = zstd.outbound(payload.clone()).unwrap();
        assert_eq!(flags, FLAG_ZSTD);
        assert!(out.len() < payload.len());
        assert_eq!(PlainStreams::default().inbound(out.clone(), flags, 4096).unwrap(), payload);
        assert!(matches!(
            PlainStreams::default().inbound(out, flags, 1024),
            Err(RemoteError::DecompressionFailure)
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_below_threshold_not_flagged() {
        let lz4 = CompressedStreams::new(CompressionKind::Lz4);
        let (_, flags) = lz4.outbound(vec![0; 10]).unwrap();
        assert_eq!(flags, 0);
    }
}
