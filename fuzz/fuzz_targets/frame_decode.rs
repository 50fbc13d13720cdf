//! Fuzz target for Frame::decode and Frame::decode_from
//!
//! This fuzzer feeds arbitrary byte sequences to both decoders to find:
//! - Parser crashes or panics
//! - Integer overflows in length calculations
//! - Disagreement between the one-shot and the streaming decoder
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use quietline_proto::Frame;

fuzz_target!(|data: &[u8]| {
    let one_shot = Frame::decode(data);

    let mut buf = BytesMut::from(data);
    let streamed = Frame::decode_from(&mut buf);

    // A complete frame must decode the same way through both paths
    if let Ok(Some(frame)) = streamed {
        let Ok(direct) = one_shot else {
            panic!("decode_from accepted a frame decode rejected");
        };
        assert_eq!(direct, frame);
        assert_eq!(buf.len(), data.len() - frame.wire_len());
    }
});
