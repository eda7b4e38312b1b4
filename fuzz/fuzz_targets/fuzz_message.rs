#![no_main]

use libfuzzer_sys::fuzz_target;
use remote_space::core::serialization::MultiFormat;
use remote_space::protocol::message::Message;

fuzz_target!(|data: &[u8]| {
    if let Ok((message, format)) = Message::deserialize_with_header(data) {
        // anything that decodes must encode again in the same format
        let _ = message.serialize_with_header(format);
    }
});
