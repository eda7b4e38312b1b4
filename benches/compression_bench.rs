#![allow(clippy::unwrap_used)]

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use remote_space::utils::compression::{compress, decompress, CompressionKind};

fn sample_data(size: usize) -> Vec<u8> {
    // repetitive text, close to what serialized requests look like
    b"remote-object-invocation "
        .iter()
        .copied()
        .cycle()
        .take(size)
        .collect()
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    let sizes = [512usize, 4096, 65536, 1024 * 1024];

    for &size in &sizes {
        let data = sample_data(size);
        group.throughput(Throughput::Bytes(size as u64));

        for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
            let label = format!("{kind:?}").to_lowercase();

            group.bench_function(format!("{label}_compress_{size}b"), |b| {
                b.iter(|| compress(&data, kind, 3).unwrap())
            });

            let compressed = compress(&data, kind, 3).unwrap();
            group.bench_function(format!("{label}_decompress_{size}b"), |b| {
                b.iter(|| {
                    let out = decompress(&compressed, kind).unwrap();
                    assert_eq!(out.len(), data.len());
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_compression);
criterion_main!(benches);
