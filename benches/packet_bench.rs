use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use remote_space::core::codec::PacketCodec;
use remote_space::core::packet::Packet;
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let payload_sizes = [64usize, 512, 4096, 65536, 1024 * 1024];

    for &size in &payload_sizes {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || vec![0u8; size],
                |payload| {
                    let mut buf = BytesMut::with_capacity(size + 32);
                    let mut codec = PacketCodec::default();
                    codec.encode(Packet::new(payload), &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });

        let mut encoded = BytesMut::new();
        PacketCodec::default()
            .encode(Packet::new(vec![0u8; size]), &mut encoded)
            .unwrap();
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter_batched(
                || encoded.clone(),
                |mut buf| {
                    let decoded = PacketCodec::default().decode(&mut buf).unwrap();
                    assert!(decoded.is_some());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_packet_encode_decode);
criterion_main!(benches);
