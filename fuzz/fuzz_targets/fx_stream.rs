//! Fuzz target for FastTransfer stream parsing
//!
//! Feeds the same bytes to a one-shot parse and to a destination context
//! in fuzzer-chosen chunks; neither may panic, and both must agree on
//! whether the stream is valid.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ropwire_fxics::content::assemble_all;
use ropwire_fxics::{DestinationContext, ObjectKind, SourceOperation};

#[derive(Debug, Arbitrary)]
struct Input {
    kind: u8,
    splits: Vec<u8>,
    stream: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let kind = match input.kind % 6 {
        0 => ObjectKind::Folder,
        1 => ObjectKind::TopFolder,
        2 => ObjectKind::Message,
        3 => ObjectKind::Attachment,
        4 => ObjectKind::MessageList,
        _ => ObjectKind::PropertyList,
    };
    let whole = assemble_all(kind, &input.stream);

    let mut destination = DestinationContext::new(SourceOperation::CopyTo, kind);
    let mut items = Vec::new();
    let mut failed = false;
    let mut rest = input.stream.as_slice();
    let mut sizes = input.splits.iter().map(|&s| usize::from(s).max(1)).chain(std::iter::repeat(64));
    while !rest.is_empty() {
        let take = sizes.next().unwrap_or(64).min(rest.len());
        let (piece, tail) = rest.split_at(take);
        match destination.put_buffer(piece) {
            Ok(done) => items.extend(done),
            Err(_) => {
                failed = true;
                break;
            }
        }
        rest = tail;
    }

    if let Ok(whole) = whole {
        assert!(!failed);
        assert_eq!(items, whole);
    }
});
