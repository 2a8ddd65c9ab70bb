//! Property tests for the framing engine
//!
//! These verify that no byte is lost or reordered across arbitrary
//! feed/drain sequences, for both framing policies.

use proptest::prelude::*;
use usbser_framing::{Framer, FramingPolicy};

fn chunks() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..20)
}

/// Chunks drawn from a small alphabet so delimiters show up often
fn texty_chunks() -> impl Strategy<Value = Vec<Vec<u8>>> {
    let byte = prop_oneof![Just(b'a'), Just(b'b'), Just(b'\r'), Just(b'\n')];
    prop::collection::vec(prop::collection::vec(byte, 1..16), 1..20)
}

proptest! {
    #[test]
    fn passthrough_returns_each_chunk_unchanged(input in chunks()) {
        let mut framer = Framer::new(FramingPolicy::Passthrough).unwrap();

        for chunk in &input {
            prop_assert_eq!(framer.feed(chunk), chunk.len());
            let out: Vec<_> = framer.drain().collect();
            prop_assert_eq!(out.len(), 1);
            prop_assert_eq!(&out[0].bytes, chunk);
        }
        prop_assert!(framer.pending().is_empty());
    }

    #[test]
    fn delimiter_framing_loses_no_bytes(input in texty_chunks()) {
        let policy = FramingPolicy::Delimiter {
            delimiter: b"\r\n".to_vec(),
            include_delimiter: true,
            max_frame_len: None,
        };
        let mut framer = Framer::new(policy).unwrap();
        let mut output = Vec::new();

        for chunk in &input {
            framer.feed(chunk);
            for frame in framer.drain() {
                prop_assert!(frame.bytes.ends_with(b"\r\n"));
                output.extend_from_slice(&frame.bytes);
            }
        }
        output.extend_from_slice(framer.pending());

        prop_assert_eq!(output, input.concat());
    }

    #[test]
    fn stripped_frames_never_contain_the_delimiter(input in texty_chunks()) {
        let mut framer = Framer::new(FramingPolicy::delimited(b"\r\n")).unwrap();

        for chunk in &input {
            framer.feed(chunk);
            for frame in framer.drain() {
                prop_assert!(!frame.bytes.windows(2).any(|w| w == b"\r\n"));
            }
        }
    }

    #[test]
    fn forced_splits_respect_the_limit(input in texty_chunks(), max in 2usize..8) {
        let policy = FramingPolicy::Delimiter {
            delimiter: b"\r\n".to_vec(),
            include_delimiter: true,
            max_frame_len: Some(max),
        };
        let mut framer = Framer::new(policy).unwrap();
        let stream = input.concat();
        let mut consumed = 0;

        for chunk in &input {
            framer.feed(chunk);
            let out: Vec<_> = framer.drain().collect();
            for frame in out {
                consumed += frame.len();
                if frame.complete {
                    prop_assert!(frame.len() <= max + 2);
                } else {
                    prop_assert!(frame.len() <= max);
                    // A forced split never ends halfway through "\r\n"
                    if frame.bytes.ends_with(b"\r") {
                        prop_assert_ne!(stream.get(consumed), Some(&b'\n'));
                    }
                }
            }
        }
        prop_assert_eq!(&stream[consumed..], framer.pending());
    }

    #[test]
    fn small_buffers_never_wedge(input in texty_chunks(), capacity in 2usize..8) {
        let policy = FramingPolicy::Delimiter {
            delimiter: b"\r\n".to_vec(),
            include_delimiter: true,
            max_frame_len: None,
        };
        let mut framer = Framer::with_capacity(policy, capacity).unwrap();
        let mut output = Vec::new();

        for chunk in &input {
            let mut rest = &chunk[..];
            while !rest.is_empty() {
                let accepted = framer.feed(rest);
                rest = &rest[accepted..];
                let mut drained = 0;
                for frame in framer.drain() {
                    prop_assert!(frame.len() <= capacity);
                    output.extend_from_slice(&frame.bytes);
                    drained += 1;
                }
                prop_assert!(accepted > 0 || drained > 0);
            }
        }
        output.extend_from_slice(framer.pending());

        prop_assert_eq!(output, input.concat());
    }
}
