//! Fuzz target for response buffer decoding
//!
//! The first byte picks how many responses the decoder expects.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ropwire_core::DecodedResponses;

fuzz_target!(|data: &[u8]| {
    let Some((&expected, rest)) = data.split_first() else {
        return;
    };
    if let Ok(decoded) = DecodedResponses::decode(rest, usize::from(expected)) {
        assert_eq!(decoded.count_mismatch().is_none(), decoded.responses.len() == usize::from(expected));
    }
});
