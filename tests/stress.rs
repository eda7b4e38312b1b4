#![allow(clippy::unwrap_used)]

mod common;

use bytes::BytesMut;
use common::{connect, echo_space, serve};
use remote_space::core::codec::PacketCodec;
use remote_space::core::packet::Packet;
use remote_space::protocol::value::Value;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn stress_packet_encode_decode_large_series() {
    // heavy burst of frames of every size class
    let mut codec = PacketCodec::default();
    let mut buf = BytesMut::new();

    for size in [0usize, 1, 64, 512, 4096, 65536, 1_048_576] {
        for _ in 0..20 {
            codec.encode(Packet::new(vec![0u8; size]), &mut buf).unwrap();
        }
        let mut decoded = 0;
        while let Some(packet) = codec.decode(&mut buf).unwrap() {
            assert_eq!(packet.payload.len(), size);
            decoded += 1;
        }
        assert_eq!(decoded, 20);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_many_short_lived_clients() {
    let space = echo_space();
    let (server, addr) = serve(&space).await;

    for round in 0..50 {
        let client = connect(addr).await;
        let out = client
            .invoke("echo", "concat", vec![format!("r{round}").into(), "!".into()])
            .await
            .unwrap();
        assert_eq!(out, Ok(Value::from(format!("r{round}!"))));
        client.close().await.unwrap();
    }

    assert_eq!(server.metrics().snapshot().connections_total, 50);
    server.stop().await.unwrap();
}
