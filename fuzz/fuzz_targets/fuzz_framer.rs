#![no_main]

use bytes::BytesMut;
use game_proxy::core::codec::PacketFramer;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Split arbitrary bytes into frames until the framer needs more input or rejects it
    let mut framer = PacketFramer;
    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = framer.decode(&mut buf) {
        assert!(frame.len() >= 4);
        assert_eq!(
            u16::from_le_bytes([frame[0], frame[1]]) as usize,
            frame.len()
        );
    }
});
