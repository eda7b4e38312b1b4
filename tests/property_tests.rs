//! Property-based tests using proptest
//!
//! Frame, compression and message invariants across randomly generated
//! inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use proptest::prelude::*;
use remote_space::config::{MAGIC_BYTES, PROTOCOL_VERSION};
use remote_space::core::codec::PacketCodec;
use remote_space::core::packet::{Packet, HEADER_SIZE};
use remote_space::core::serialization::{FormatSerialization, Serialization, SerializationFormat};
use remote_space::protocol::message::{InvocationRequest, Message};
use remote_space::protocol::value::Value;
use remote_space::service::object::MethodTable;
use remote_space::service::object_space::ObjectSpace;
use remote_space::utils::compression::{compress, decompress, CompressionKind};
use std::collections::BTreeMap;
use tokio_util::codec::{Decoder, Encoder};

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Unit),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        // quarter steps stay exact through every text format
        (-1_000_000i32..1_000_000).prop_map(|i| Value::Float(f64::from(i) / 4.0)),
        ".{0,24}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::List),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|m: BTreeMap<String, Value>| Value::Map(m)),
        ]
    })
}

fn format_strategy() -> impl Strategy<Value = SerializationFormat> {
    prop_oneof![
        Just(SerializationFormat::Bincode),
        Just(SerializationFormat::Json),
        Just(SerializationFormat::MessagePack),
    ]
}

// Property: the header always carries magic, version and the payload length
proptest! {
    #[test]
    fn prop_packet_header_layout(payload in prop::collection::vec(any::<u8>(), 0..10000), flags in 0u8..3) {
        let packet = Packet::new(payload.clone()).with_flags(flags);
        let bytes = packet.to_bytes();

        prop_assert_eq!(&bytes[0..4], &MAGIC_BYTES[..]);
        prop_assert_eq!(bytes[4], PROTOCOL_VERSION);
        prop_assert_eq!(bytes[5], flags);
        let len = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        prop_assert_eq!(len, payload.len());
        prop_assert_eq!(bytes.len(), HEADER_SIZE + payload.len());
        prop_assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);
    }
}

// Property: a frame split at any point decodes once the rest arrives
proptest! {
    #[test]
    fn prop_decoder_handles_any_split(payload in prop::collection::vec(any::<u8>(), 0..2048), split in any::<prop::sample::Index>()) {
        let mut codec = PacketCodec::default();
        let mut encoded = BytesMut::new();
        codec.encode(Packet::new(payload.clone()), &mut encoded).unwrap();

        let at = split.index(encoded.len());
        let mut buf = BytesMut::from(&encoded[..at]);
        let early = codec.decode(&mut buf).unwrap();
        prop_assert!(early.is_none() || at == encoded.len());
        if early.is_none() {
            buf.extend_from_slice(&encoded[at..]);
            let packet = codec.decode(&mut buf).unwrap().expect("complete frame");
            prop_assert_eq!(packet.payload, payload);
        }
    }
}

// Property: the decoder never panics on arbitrary bytes
proptest! {
    #[test]
    fn prop_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut codec = PacketCodec::new(4096);
        let mut buf = BytesMut::from(&data[..]);
        let _ = codec.decode(&mut buf);
    }
}

// Property: compression roundtrip preserves data
proptest! {
    #[test]
    fn prop_compression_roundtrip(data in prop::collection::vec(any::<u8>(), 0..20000), zstd in any::<bool>()) {
        let kind = if zstd { CompressionKind::Zstd } else { CompressionKind::Lz4 };
        let compressed = compress(&data, kind, 3).expect("Compression should not fail");
        let decompressed = decompress(&compressed, kind).expect("Decompression should not fail");
        prop_assert_eq!(decompressed, data);
    }
}

// Property: decompressing arbitrary bytes returns, it never panics
proptest! {
    #[test]
    fn prop_decompression_of_garbage_returns(data in prop::collection::vec(any::<u8>(), 0..1000)) {
        let _ = decompress(&data, CompressionKind::Lz4);
        let _ = decompress(&data, CompressionKind::Zstd);
    }
}

// Property: every value survives every format inside a request
proptest! {
    #[test]
    fn prop_request_values_survive_formats(args in prop::collection::vec(value_strategy(), 0..4), format in format_strategy()) {
        let codec = FormatSerialization::new(format);
        let message = Message::Request(InvocationRequest::new(1, "obj", "method", args));
        let bytes = codec.serialize(&message).unwrap();
        prop_assert_eq!(bytes[0], format.format_byte());
        prop_assert_eq!(codec.deserialize(&bytes).unwrap(), message);
    }
}

// Property: concat returns exactly the joined arguments
proptest! {
    #[test]
    fn prop_concat_joins(left in ".{0,32}", right in ".{0,32}") {
        let space = ObjectSpace::new();
        space.register("echo", MethodTable::new("echo").method("concat", 2, |args| {
            Ok(format!("{}{}", args.str(0)?, args.str(1)?))
        })).unwrap();

        let request = InvocationRequest::new(1, "echo", "concat", vec![left.clone().into(), right.clone().into()]);
        prop_assert_eq!(space.invoke(&request).result, Ok(Value::from(format!("{left}{right}"))));
    }
}
