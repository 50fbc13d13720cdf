//! Fuzz target for Payload::from_frame
//!
//! This fuzzer tests payload deserialization (CBOR decoding) with:
//! - Malformed CBOR data
//! - Type confusion attacks (wrong payload type for opcode)
//! - Oversized strings or collections
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.
//! Anything that does decode must re-encode to a frame that decodes to the
//! same payload.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use quietline_proto::{Frame, Opcode, Payload};

fuzz_target!(|data: &[u8]| {
    for value in 0..=u8::MAX {
        let Some(opcode) = Opcode::from_u8(value) else {
            continue;
        };

        let frame = Frame::new(opcode, Bytes::copy_from_slice(data));
        let Ok(payload) = Payload::from_frame(&frame) else {
            continue;
        };

        assert_eq!(payload.opcode(), opcode);
        let Ok(reencoded) = payload.clone().into_frame() else {
            continue;
        };
        assert_eq!(Payload::from_frame(&reencoded).ok(), Some(payload));
    }
});
