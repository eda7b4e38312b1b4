//! Payload compression used by [`CompressedStreams`](crate::transport::stream::CompressedStreams).
//!
//! Decompression is bounded by `MAX_PAYLOAD_SIZE` so a hostile peer cannot
//! make the server allocate more than a single frame's worth of memory.

use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::{RemoteError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Packet flag marking an LZ4-compressed payload
pub const FLAG_LZ4: u8 = 0x01;
/// Packet flag marking a Zstd-compressed payload
pub const FLAG_ZSTD: u8 = 0x02;

const MAX_DECOMPRESSION_SIZE: usize = MAX_PAYLOAD_SIZE;

/// Samples above this many bits per byte are treated as incompressible
const MIN_ENTROPY_THRESHOLD: f64 = 4.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    Lz4,
    Zstd,
}

impl CompressionKind {
    /// Packet flag announcing this algorithm
    pub fn flag(self) -> u8 {
        match self {
            CompressionKind::Lz4 => FLAG_LZ4,
            CompressionKind::Zstd => FLAG_ZSTD,
        }
    }

    /// Recover the algorithm from packet flags. `None` means uncompressed.
    pub fn from_flags(flags: u8) -> Result<Option<Self>> {
        match flags & (FLAG_LZ4 | FLAG_ZSTD) {
            0 => Ok(None),
            FLAG_LZ4 => Ok(Some(CompressionKind::Lz4)),
            FLAG_ZSTD => Ok(Some(CompressionKind::Zstd)),
            _ => Err(RemoteError::InvalidHeader),
        }
    }
}

/// Shannon entropy of `data` in bits per byte (0.0 ..= 8.0)
fn calculate_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0u32; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let len = data.len() as f64;
    freq.iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn worth_compressing(data: &[u8], threshold_bytes: usize) -> bool {
    if data.len() < threshold_bytes {
        return false;
    }
    if data.len() < 1024 {
        return true;
    }
    let sample = &data[..data.len().min(512)];
    calculate_entropy(sample) < MIN_ENTROPY_THRESHOLD
}

pub fn compress(data: &[u8], kind: CompressionKind, level: i32) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, level)
                .map_err(|_| RemoteError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Decompress a payload, refusing anything that would exceed one frame.
pub fn decompress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    decompress_within(data, kind, MAX_DECOMPRESSION_SIZE)
}

/// Decompress a payload, refusing output longer than `limit` bytes (never
/// more than one maximum-size frame).
pub fn decompress_within(data: &[u8], kind: CompressionKind, limit: usize) -> Result<Vec<u8>> {
    let limit = limit.min(MAX_DECOMPRESSION_SIZE);
    match kind {
        CompressionKind::Lz4 => {
            if data.len() < 4 {
                return Err(RemoteError::DecompressionFailure);
            }
            // lz4_flex prepends the decoded size as little-endian u32
            let claimed = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed > limit {
                return Err(RemoteError::DecompressionFailure);
            }
            lz4_flex::decompress_size_prepended(data).map_err(|_| RemoteError::DecompressionFailure)
        }
        CompressionKind::Zstd => {
            let mut reader =
                zstd::stream::Decoder::new(data).map_err(|_| RemoteError::DecompressionFailure)?;
            let mut out = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                let n = reader
                    .read(&mut chunk)
                    .map_err(|_| RemoteError::DecompressionFailure)?;
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&chunk[..n]);
                if out.len() > limit {
                    return Err(RemoteError::DecompressionFailure);
                }
            }
            Ok(out)
        }
    }
}

/// Compress when the payload is large and low-entropy enough to benefit.
/// Returns the bytes to send and whether compression was applied.
pub fn maybe_compress(
    data: Vec<u8>,
    kind: CompressionKind,
    level: i32,
    threshold_bytes: usize,
) -> Result<(Vec<u8>, bool)> {
    if !worth_compressing(&data, threshold_bytes) {
        return Ok((data, false));
    }
    let compressed = compress(&data, kind, level)?;
    if compressed.len() < data.len() {
        Ok((compressed, true))
    } else {
        Ok((data, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_zstd_roundtrip() {
        let original = b"remote invocation payload remote invocation payload";
        let packed = compress(original, CompressionKind::Zstd, 3).unwrap();
        let unpacked = decompress(&packed, CompressionKind::Zstd).unwrap();
        assert_eq!(original.as_slice(), unpacked.as_slice());
    }

    #[test]
    fn test_lz4_rejects_huge_size_claim() {
        let claimed = (MAX_DECOMPRESSION_SIZE + 1) as u32;
        let mut hostile = claimed.to_le_bytes().to_vec();
        hostile.extend_from_slice(&[0u8; 16]);
        assert!(decompress(&hostile, CompressionKind::Lz4).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_caller_limit_bounds_output() {
        let data = vec![b'a'; 64 * 1024];
        for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
            let packed = compress(&data, kind, 3).unwrap();
            assert!(packed.len() < 1024);
            assert!(decompress_within(&packed, kind, 1024).is_err());
            assert_eq!(decompress_within(&packed, kind, data.len()).unwrap(), data);
        }
    }

    #[test]
    fn test_lz4_rejects_short_input() {
        assert!(decompress(&[0x2b, 0x60], CompressionKind::Lz4).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_flags_roundtrip() {
        assert_eq!(CompressionKind::from_flags(0).unwrap(), None);
        assert_eq!(
            CompressionKind::from_flags(FLAG_LZ4).unwrap(),
            Some(CompressionKind::Lz4)
        );
        assert_eq!(
            CompressionKind::from_flags(FLAG_ZSTD).unwrap(),
            Some(CompressionKind::Zstd)
        );
        assert!(CompressionKind::from_flags(FLAG_LZ4 | FLAG_ZSTD).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_small_payload_left_alone() {
        let (out, compressed) =
            maybe_compress(b"tiny".to_vec(), CompressionKind::Lz4, 1, 512).unwrap();
        assert!(!compressed);
        assert_eq!(out, b"tiny");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_repetitive_payload_compressed() {
        let data = vec![7u8; 4096];
        let (out, compressed) = maybe_compress(data.clone(), CompressionKind::Lz4, 1, 512).unwrap();
        assert!(compressed);
        assert!(out.len() < data.len());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_high_entropy_payload_skipped() {
        let data: Vec<u8> = (0..=255).cycle().take(4096).collect();
        let (out, compressed) = maybe_compress(data.clone(), CompressionKind::Zstd, 3, 512).unwrap();
        assert!(!compressed);
        assert_eq!(out, data);
    }

    #[test]
    fn test_entropy_bounds() {
        assert!(calculate_entropy(&[0u8; 100]) < 0.1);
        let spread: Vec<u8> = (0..=255).cycle().take(1000).collect();
        assert!(calculate_entropy(&spread) > 7.0);
    }
}
