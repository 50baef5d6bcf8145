//! Property-based tests for the ZMTP frame codec.
//!
//! A stream of encoded frames must decode to the same frames no matter how
//! the bytes are chunked on arrival.

use bytes::{BufMut, BytesMut};
use dabmod_control::protocol::Command;
use dabmod_control::wire::{Frame, FrameDecoder};
use proptest::prelude::*;

fn frame() -> impl Strategy<Value = Frame> {
    (prop::collection::vec(any::<u8>(), 0..600), any::<bool>())
        .prop_map(|(body, more)| Frame::message(body, more))
}

proptest! {
    #[test]
    fn chunked_stream_decodes_identically(
        frames in prop::collection::vec(frame(), 1..8),
        chunk in 1usize..64,
    ) {
        let mut wire = BytesMut::new();
        for f in &frames {
            f.encode(&mut wire);
        }

        let decoder = FrameDecoder::default();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.put_slice(piece);
            while let Some(f) = decoder.decode(&mut buf).unwrap() {
                decoded.push(f);
            }
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, frames);
    }

    #[test]
    fn command_frames_match_tokens(tokens in prop::collection::vec("[a-z0-9._/-]{1,12}", 1..8)) {
        let cmd = Command::new(tokens.clone()).unwrap();
        let frames = cmd.to_frames();

        prop_assert_eq!(frames.len(), tokens.len());
        for (i, (f, t)) in frames.iter().zip(&tokens).enumerate() {
            prop_assert_eq!(&f.body()[..], t.as_bytes());
            prop_assert_eq!(f.is_more(), i + 1 < tokens.len());
        }
        prop_assert_eq!(Command::parse(&cmd.to_string()), cmd);
    }
}
