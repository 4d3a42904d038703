//! Fuzz target for request buffer parsing
//!
//! Tests that the RPC_HEADER_EXT and ROP decoders handle arbitrary input
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ropwire_core::RequestBuffer;

fuzz_target!(|data: &[u8]| {
    let Ok(buffer) = RequestBuffer::parse(data) else {
        return;
    };
    // Walk every request until the first one that fails to decode
    for item in buffer.requests() {
        let Ok((request, offset)) = item else {
            break;
        };
        assert!(offset < buffer.rop_bytes.len());
        let _ = request.to_bytes();
    }
});
