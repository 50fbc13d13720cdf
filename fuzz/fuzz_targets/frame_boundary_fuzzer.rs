//! Fuzz target for length prefix boundary conditions
//!
//! Prevent DoS attacks via malformed length prefixes (HIGH priority)
//!
//! # Strategy
//!
//! - Length: Zero, one, small, at-max, just-over-max, u32::MAX, random
//! - Opcode: every defined value plus random bytes
//! - Body: shorter than, equal to, or longer than the declared length
//!
//! # Invariants
//!
//! - `length > MAX_SIZE` (16 MiB) MUST return `ProtocolError::FrameTooLarge`
//!   before any allocation
//! - `length == 0` MUST be rejected (no room for the opcode)
//! - A body shorter than `length` MUST return `FrameTruncated` or wait for
//!   more input, never panic
//! - Encoded size MUST equal 4 + length

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use quietline_proto::{Frame, ProtocolError};

const MAX_SIZE: u32 = Frame::MAX_SIZE as u32;

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryFrame {
    length: Length,
    opcode: u8,
    body: Vec<u8>,
    streamed: bool,
}

#[derive(Debug, Clone, Arbitrary)]
enum Length {
    Zero,
    One,
    Small(u8),
    AtMax,
    JustOverMax,
    MaxU32,
    MatchBody,
    Random(u32),
}

impl BoundaryFrame {
    fn declared_length(&self) -> u32 {
        match self.length {
            Length::Zero => 0,
            Length::One => 1,
            Length::Small(n) => u32::from(n),
            Length::AtMax => MAX_SIZE,
            Length::JustOverMax => MAX_SIZE + 1,
            Length::MaxU32 => u32::MAX,
            Length::MatchBody => 1 + self.body.len() as u32,
            Length::Random(n) => n,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(5 + self.body.len());
        bytes.extend_from_slice(&self.declared_length().to_be_bytes());
        bytes.push(self.opcode);
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

fuzz_target!(|input: BoundaryFrame| {
    let declared = input.declared_length();
    let bytes = input.to_bytes();

    let result = if input.streamed {
        let mut buf = BytesMut::from(bytes.as_slice());
        match Frame::decode_from(&mut buf) {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => {
                // Waiting for more input is only legal for an in-range length
                assert!(declared <= MAX_SIZE && bytes.len() < 4 + declared as usize);
                return;
            },
            Err(e) => Err(e),
        }
    } else {
        Frame::decode(&bytes)
    };

    match result {
        Ok(frame) => {
            assert!(declared >= 1 && declared <= MAX_SIZE);
            assert_eq!(frame.wire_len(), 4 + declared as usize);
        },
        Err(ProtocolError::FrameTooLarge { .. }) => assert!(declared > MAX_SIZE),
        Err(_) => {},
    }
});
