//! Fuzz target for ICS state and IDSET parsing

#![no_main]

use libfuzzer_sys::fuzz_target;
use ropwire_fxics::{IcsDownload, IdSet, PredecessorChangeList, SyncKind, SyncState};

fuzz_target!(|data: &[u8]| {
    let _ = SyncState::from_stream(data);
    let _ = IcsDownload::decode(SyncKind::Contents, data);
    let _ = IcsDownload::decode(SyncKind::Hierarchy, data);
    let _ = PredecessorChangeList::from_bytes(data);

    // A parsed IDSET re-encodes to something that parses to the same set
    if let Ok(set) = IdSet::from_bytes(data) {
        let again = IdSet::from_bytes(&set.to_bytes()).expect("re-encoded IDSET parses");
        assert_eq!(again, set);
    }
});
