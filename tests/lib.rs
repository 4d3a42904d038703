//! Shared fixtures for the ropwire integration and property tests.
//!
//! Builders for the requests most scenarios start with, plus helpers that
//! drive FastTransfer and ICS streams to completion over a client.

use ropwire_core::property::tags;
use ropwire_core::rop::{HandleIndices, LOGON_FOLDER_COUNT, RequestPayload, ResponseBody, TransferStatus};
use ropwire_core::{
    Client, GlobalCounter, LongTermId, PropertyValue, ReplicaGuid, RopRequest, ShortTermId, TaggedValue, Xid,
};
use ropwire_fxics::PredecessorChangeList;
use ropwire_server::{LoopbackTransport, Server, ServerConfig};

/// Mailbox every fixture logs on to
pub const ESSDN: &str = "/o=Example/ou=Site/cn=Recipients/cn=alice";

/// Replica the simulated client mints ids under
pub const CLIENT_REPLICA: ReplicaGuid = ReplicaGuid([0xC1; 16]);

/// OpenStream mode that creates the property
pub const STREAM_CREATE: u8 = 0x02;

/// SaveChangesMessage: keep the message open for writing
pub const KEEP_OPEN_READ_WRITE: u8 = 0x02;

/// MaximumBufferSize sent with a server-chosen GetBuffer size
pub const MAX_SERVER_CHOICE: u16 = 0x1000;

/// Client connected to a loopback session
pub type TestClient = Client<LoopbackTransport>;

/// Server with a fixed replica seed
pub fn server() -> Server {
    server_with(ServerConfig::default())
}

/// Server from `config`, seeded unless the config already is
///
/// # Panics
///
/// Panics when the configuration is invalid.
pub fn server_with(config: ServerConfig) -> Server {
    let config = ServerConfig {
        replica_seed: config.replica_seed.or(Some(0x5EED)),
        ..config
    };
    Server::new(config).expect("valid server configuration")
}

/// Private logon binding slot `output`
pub fn logon(logon_id: u8, output: u8) -> RopRequest {
    RopRequest::new(logon_id, HandleIndices::Output(output), RequestPayload::Logon {
        logon_flags: 0x01,
        open_flags: 0,
        store_state: 0,
        essdn: ESSDN.into(),
    })
}

/// New normal message in `folder_id`
pub fn create_message(logon_id: u8, input: u8, output: u8, folder_id: ShortTermId) -> RopRequest {
    RopRequest::new(logon_id, HandleIndices::InputOutput { input, output }, RequestPayload::CreateMessage {
        code_page: 0x0FFF,
        folder_id,
        associated: false,
    })
}

/// Open `folder_id` into slot `output`
pub fn open_folder(input: u8, output: u8, folder_id: ShortTermId) -> RopRequest {
    RopRequest::new(0, HandleIndices::InputOutput { input, output }, RequestPayload::OpenFolder {
        folder_id,
        open_mode: 0,
    })
}

/// Release slot `input`
pub fn release(logon_id: u8, input: u8) -> RopRequest {
    RopRequest::new(logon_id, HandleIndices::Input(input), RequestPayload::Release)
}

/// SetProperties on slot `input`
pub fn set_properties(input: u8, values: Vec<TaggedValue>) -> RopRequest {
    RopRequest::new(0, HandleIndices::Input(input), RequestPayload::SetProperties { values })
}

/// SaveChangesMessage on slot `input`, keeping it open
pub fn save(input: u8) -> RopRequest {
    RopRequest::new(0, HandleIndices::ResponseInput { response: input, input }, RequestPayload::SaveChangesMessage {
        save_flags: KEEP_OPEN_READ_WRITE,
    })
}

/// GetPropertiesAll on slot `input`
pub fn get_properties(input: u8) -> RopRequest {
    RopRequest::new(0, HandleIndices::Input(input), RequestPayload::GetPropertiesAll {
        size_limit: 0,
        want_unicode: true,
    })
}

/// FastTransferSourceGetBuffer on slot `input`; a server-chosen size is
/// capped at [`MAX_SERVER_CHOICE`]
pub fn get_buffer(input: u8, buffer_size: u16) -> RopRequest {
    RopRequest::new(0, HandleIndices::Input(input), RequestPayload::FastTransferSourceGetBuffer {
        buffer_size,
        maximum_buffer_size: MAX_SERVER_CHOICE,
    })
}

/// Subject property value
pub fn subject(text: &str) -> TaggedValue {
    TaggedValue::new(tags::SUBJECT, PropertyValue::Unicode(text.into()))
}

/// Log on at slot 0 and return the special folder ids
///
/// # Panics
///
/// Panics when the logon fails.
pub fn log_on(client: &mut TestClient) -> [ShortTermId; LOGON_FOLDER_COUNT] {
    let outcome = client.execute(&[logon(0, 0)]).expect("logon exchange");
    match &outcome.responses[0].body {
        ResponseBody::Logon(response) => response.folder_ids,
        other => panic!("logon failed: {} {other:?}", outcome.responses[0].return_value),
    }
}

/// Inbox id from a logon's folder ids
pub fn inbox(folder_ids: &[ShortTermId; LOGON_FOLDER_COUNT]) -> ShortTermId {
    folder_ids[4]
}

/// Create, fill and save a message in `folder`, leaving it open at `slot`
///
/// # Panics
///
/// Panics when any ROP fails.
pub fn saved_message(client: &mut TestClient, folder: ShortTermId, slot: u8, values: Vec<TaggedValue>) -> ShortTermId {
    let outcome = client
        .execute(&[create_message(0, 0, slot, folder), set_properties(slot, values), save(slot)])
        .expect("save exchange");
    assert!(
        outcome.responses.iter().all(|r| r.return_value.is_success()),
        "save failed: {:?}",
        outcome.responses
    );
    match outcome.responses[2].body {
        ResponseBody::SaveChangesMessage { message_id, .. } => message_id,
        ref other => panic!("unexpected save body {other:?}"),
    }
}

/// Pull a FastTransfer or ICS download stream from `slot` until Done,
/// returning every chunk
///
/// # Panics
///
/// Panics when a GetBuffer fails or the stream reports an error.
pub fn drain(client: &mut TestClient, slot: u8, buffer_size: u16) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    loop {
        let outcome = client.execute(&[get_buffer(slot, buffer_size)]).expect("GetBuffer exchange");
        let response = &outcome.responses[0];
        let ResponseBody::GetBuffer { status, data, .. } = &response.body else {
            panic!("GetBuffer failed: {}", response.return_value);
        };
        chunks.push(data.clone());
        match status {
            TransferStatus::Done => return chunks,
            TransferStatus::Partial | TransferStatus::NoRoom => {}
            TransferStatus::Error => panic!("source stream failed"),
        }
    }
}

/// Long-term id minted by the simulated client
pub fn client_id(counter: u64) -> LongTermId {
    LongTermId::new(CLIENT_REPLICA, GlobalCounter::truncating(counter))
}

/// Change key minted by the simulated client
pub fn client_xid(counter: u64) -> Xid {
    Xid::new(CLIENT_REPLICA, GlobalCounter::truncating(counter))
}

/// Identity properties for an uploaded message change
pub fn client_change(object: u64, version: u64, history: &[Xid], text: &str) -> Vec<TaggedValue> {
    vec![
        TaggedValue::new(tags::SOURCE_KEY, PropertyValue::Binary(client_id(object).to_gid().to_vec())),
        TaggedValue::new(tags::CHANGE_KEY, PropertyValue::Binary(client_xid(version).to_bytes())),
        TaggedValue::new(
            tags::PREDECESSOR_CHANGE_LIST,
            PropertyValue::Binary(PredecessorChangeList::from_xids(history.iter().copied()).to_bytes()),
        ),
        subject(text),
    ]
}
