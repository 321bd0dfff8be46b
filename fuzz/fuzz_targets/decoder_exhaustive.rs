//! Fuzz the inbound decoder with arbitrary byte streams.
//!
//! Invariants under test:
//! - the decoder never panics, whatever bytes arrive;
//! - `Ok(None)` never consumes input (partial frames wait intact);
//! - the same bytes fed whole or split at every position yield the same
//!   result sequence (incremental parsing is chunking-independent).

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tether_proto::Decoder;

fuzz_target!(|data: &[u8]| {
    // Whole-buffer pass.
    let mut decoder = Decoder::new();
    let mut buf = BytesMut::from(data);
    let mut whole = Vec::new();
    loop {
        let before = buf.len();
        match decoder.decode(&mut buf) {
            Ok(Some(op)) => whole.push(format!("{op:?}")),
            Ok(None) => {
                assert_eq!(buf.len(), before, "Ok(None) must not consume");
                break;
            },
            Err(_) => break,
        }
    }

    // Split pass: feed in two chunks at a position derived from the input.
    if data.len() < 2 {
        return;
    }
    let cut = (data[0] as usize) % data.len();
    let mut decoder = Decoder::new();
    let mut buf = BytesMut::from(&data[..cut]);
    let mut split = Vec::new();
    let mut errored = false;
    loop {
        match decoder.decode(&mut buf) {
            Ok(Some(op)) => split.push(format!("{op:?}")),
            Ok(None) => break,
            Err(_) => {
                errored = true;
                break;
            },
        }
    }
    if !errored {
        buf.extend_from_slice(&data[cut..]);
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(op)) => split.push(format!("{op:?}")),
                Ok(None) | Err(_) => break,
            }
        }
        // Same bytes, same ops, regardless of chunking - up to the point
        // where either pass stopped on an error.
        let common = whole.len().min(split.len());
        assert_eq!(whole[..common], split[..common]);
    }
});
