#![no_main]

use libfuzzer_sys::fuzz_target;
use remote_space::utils::compression::{decompress, CompressionKind};

fuzz_target!(|data: &[u8]| {
    let _ = decompress(data, CompressionKind::Lz4);
    let _ = decompress(data, CompressionKind::Zstd);
});
