//! Fuzz target for the in-memory server
//!
//! Arbitrary request buffers must be answered or rejected, never panic.
//! Every input runs against a session that already holds a logon.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ropwire_core::buffer::encode_requests;
use ropwire_core::rop::{HandleIndices, RequestPayload};
use ropwire_core::{DEFAULT_MAX_BUFFER_SIZE, RopRequest};
use ropwire_server::{Server, ServerConfig};

fuzz_target!(|data: &[u8]| {
    let config = ServerConfig {
        replica_seed: Some(1),
        ..ServerConfig::default()
    };
    let Ok(server) = Server::new(config) else {
        return;
    };
    let mut session = server.session();

    let logon = RopRequest::new(0, HandleIndices::Output(0), RequestPayload::Logon {
        logon_flags: 0x01,
        open_flags: 0,
        store_state: 0,
        essdn: "/o=Fuzz/cn=Recipients/cn=fuzz".into(),
    });
    let Ok(request) = encode_requests(&[logon], &[u32::MAX], DEFAULT_MAX_BUFFER_SIZE, false) else {
        return;
    };
    if session.process(&request, DEFAULT_MAX_BUFFER_SIZE).is_err() {
        return;
    }

    let _ = session.process(data, DEFAULT_MAX_BUFFER_SIZE);
    // The session stays usable after whatever the input did
    let _ = session.process(&request, DEFAULT_MAX_BUFFER_SIZE);
});
