//! `ropwire demo`: representative exchanges against the in-memory server.

use clap::ValueEnum;
use ropwire_core::property::tags;
use ropwire_core::rop::{HandleIndices, RequestPayload, ResponseBody, TransferStatus};
use ropwire_core::{
    BUFFER_SIZE_SERVER_CHOICE, Client, ClientConfig, ExchangeOutcome, GlobalCounter, LongTermId, PropertyValue,
    ReplicaGuid, ReturnValue, RopRequest, ShortTermId, TaggedValue, Xid,
};
use ropwire_fxics::{PredecessorChangeList, SourceOperation, StateProperty, SyncKind, SyncState};
use ropwire_server::sync::{extra_flags, sync_flags};
use ropwire_server::{LoopbackTransport, Server, ServerConfig};
use serde::Serialize;

use crate::progress::{TransferProgress, format_bytes};

const ESSDN: &str = "/o=Example/ou=Site/cn=Recipients/cn=demo";
const LOGON_PRIVATE: u8 = 0x01;
const OPEN_CREATE: u8 = 0x02;
const KEEP_OPEN_READ_WRITE: u8 = 0x02;
const CLIENT_REPLICA: ReplicaGuid = ReplicaGuid([0xC1; 16]);

type DemoClient = Client<LoopbackTransport>;

/// Selectable scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
pub enum Scenario {
    /// ICS upload then GetTransferState
    A,
    /// Release leaves other slots intact
    B,
    /// CopyTo with a missing destination
    C,
    /// Cross-logon and unassigned handles
    D,
    /// FastTransfer copy of a message through GetBuffer/PutBuffer
    Transfer,
}

impl Scenario {
    /// Every scenario in run order
    pub const ALL: [Scenario; 5] = [Scenario::A, Scenario::B, Scenario::C, Scenario::D, Scenario::Transfer];

    fn title(self) -> &'static str {
        match self {
            Self::A => "Scenario A: collector import is reported by GetTransferState",
            Self::B => "Scenario B: releasing a slot leaves later slots bound",
            Self::C => "Scenario C: CopyTo without a destination handle",
            Self::D => "Scenario D: foreign and unassigned handle indices",
            Self::Transfer => "FastTransfer: copy a message in bounded chunks",
        }
    }
}

/// One ROP whose status the scenario checks
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    /// What the ROP does in this scenario
    pub label: String,
    /// Status the server returned
    pub observed: ReturnValue,
    /// Status the scenario expects
    pub expected: ReturnValue,
}

/// Outcome of one scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Which scenario ran
    pub scenario: Scenario,
    /// Human-readable title
    pub title: &'static str,
    /// Checked ROP statuses
    pub steps: Vec<Step>,
    /// Client- or stream-level checks
    pub checks: Vec<(String, bool)>,
}

impl ScenarioReport {
    fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            title: scenario.title(),
            steps: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Every step and check matched
    #[must_use]
    pub fn passed(&self) -> bool {
        self.steps.iter().all(|s| s.observed == s.expected) && self.checks.iter().all(|(_, ok)| *ok)
    }

    fn step(&mut self, label: impl Into<String>, observed: ReturnValue, expected: ReturnValue) {
        self.steps.push(Step {
            label: label.into(),
            observed,
            expected,
        });
    }

    fn succeeded(&mut self, outcome: &ExchangeOutcome, labels: &[&str]) {
        for (response, label) in outcome.responses.iter().zip(labels) {
            self.step(*label, response.return_value, ReturnValue::SUCCESS);
        }
    }

    fn check(&mut self, label: impl Into<String>, ok: bool) {
        self.checks.push((label.into(), ok));
    }
}

/// Run `scenario` on a fresh session of a server built from `server`
///
/// # Errors
///
/// Fails when the server cannot start or an exchange cannot complete.
pub fn run(
    scenario: Scenario,
    server: &ServerConfig,
    client: &ClientConfig,
    show_progress: bool,
) -> anyhow::Result<ScenarioReport> {
    let server = Server::new(server.clone())?;
    let mut client = server.connect_with(client.clone());
    let mut report = ScenarioReport::new(scenario);
    tracing::info!("Running {:?}", scenario);
    match scenario {
        Scenario::A => scenario_a(&mut client, &mut report)?,
        Scenario::B => scenario_b(&mut client, &mut report)?,
        Scenario::C => scenario_c(&mut client, &mut report)?,
        Scenario::D => scenario_d(&mut client, &mut report)?,
        Scenario::Transfer => fast_transfer_copy(&mut client, &mut report, show_progress)?,
    }
    Ok(report)
}

fn logon(logon_id: u8, output: u8) -> RopRequest {
    RopRequest::new(logon_id, HandleIndices::Output(output), RequestPayload::Logon {
        logon_flags: LOGON_PRIVATE,
        open_flags: 0,
        store_state: 0,
        essdn: ESSDN.into(),
    })
}

fn create_message(logon_id: u8, input: u8, output: u8, folder_id: ShortTermId) -> RopRequest {
    RopRequest::new(logon_id, HandleIndices::InputOutput { input, output }, RequestPayload::CreateMessage {
        code_page: 0x0FFF,
        folder_id,
        associated: false,
    })
}

fn get_properties(input: u8) -> RopRequest {
    RopRequest::new(0, HandleIndices::Input(input), RequestPayload::GetPropertiesAll {
        size_limit: 0,
        want_unicode: true,
    })
}

fn get_buffer(input: u8, buffer_size: u16, maximum_buffer_size: u16) -> RopRequest {
    RopRequest::new(0, HandleIndices::Input(input), RequestPayload::FastTransferSourceGetBuffer {
        buffer_size,
        maximum_buffer_size,
    })
}

/// Log on at slot 0 and return the inbox id
fn log_on(client: &mut DemoClient, report: &mut ScenarioReport) -> anyhow::Result<ShortTermId> {
    let outcome = client.execute(&[logon(0, 0)])?;
    outcome.require_complete()?;
    report.succeeded(&outcome, &["Logon"]);
    match &outcome.responses[0].body {
        ResponseBody::Logon(response) => Ok(response.folder_ids[4]),
        _ => anyhow::bail!("logon failed with {}", outcome.responses[0].return_value),
    }
}

fn subject_of(body: &ResponseBody) -> Option<&str> {
    let ResponseBody::GetPropertiesAll { values } = body else {
        return None;
    };
    match ropwire_core::property::find(values, tags::SUBJECT) {
        Some(PropertyValue::Unicode(subject)) => Some(subject),
        _ => None,
    }
}

fn scenario_a(client: &mut DemoClient, report: &mut ScenarioReport) -> anyhow::Result<()> {
    let inbox = log_on(client, report)?;
    let source_key = LongTermId::new(CLIENT_REPLICA, GlobalCounter::truncating(0x42));
    let change_key = Xid::new(CLIENT_REPLICA, GlobalCounter::truncating(0x07));
    let values = vec![
        TaggedValue::new(tags::SOURCE_KEY, PropertyValue::Binary(source_key.to_gid().to_vec())),
        TaggedValue::new(tags::CHANGE_KEY, PropertyValue::Binary(change_key.to_bytes())),
        TaggedValue::new(
            tags::PREDECESSOR_CHANGE_LIST,
            PropertyValue::Binary(PredecessorChangeList::from_xids([change_key]).to_bytes()),
        ),
        TaggedValue::new(tags::SUBJECT, PropertyValue::Unicode("uploaded by the client".into())),
    ];
    let requests = [
        RopRequest::new(0, HandleIndices::InputOutput { input: 0, output: 1 }, RequestPayload::OpenFolder {
            folder_id: inbox,
            open_mode: 0,
        }),
        RopRequest::new(0, HandleIndices::InputOutput { input: 1, output: 2 }, RequestPayload::SynchronizationConfigure {
            sync_type: SyncKind::Contents as u8,
            send_options: 0,
            sync_flags: sync_flags::UNICODE | sync_flags::NORMAL,
            restriction: Vec::new(),
            extra_flags: extra_flags::EID,
            tags: Vec::new(),
        }),
        RopRequest::new(0, HandleIndices::InputOutput { input: 1, output: 3 }, RequestPayload::SynchronizationOpenCollector {
            is_contents_collector: true,
        }),
        RopRequest::new(0, HandleIndices::InputOutput { input: 3, output: 4 }, RequestPayload::SynchronizationImportMessageChange {
            import_flag: 0,
            values,
        }),
        RopRequest::new(0, HandleIndices::InputOutput { input: 3, output: 5 }, RequestPayload::SynchronizationGetTransferState),
    ];
    let outcome = client.execute(&requests)?;
    report.succeeded(&outcome, &[
        "OpenFolder",
        "SynchronizationConfigure",
        "SynchronizationOpenCollector",
        "SynchronizationImportMessageChange",
        "SynchronizationGetTransferState",
    ]);
    outcome.require_complete()?;

    let mut stream = Vec::new();
    loop {
        let outcome = client.execute(&[get_buffer(5, BUFFER_SIZE_SERVER_CHOICE, 0x1000)])?;
        outcome.require_complete()?;
        let response = &outcome.responses[0];
        let ResponseBody::GetBuffer { status, data, .. } = &response.body else {
            report.step("FastTransferSourceGetBuffer", response.return_value, ReturnValue::SUCCESS);
            return Ok(());
        };
        stream.extend_from_slice(data);
        match status {
            TransferStatus::Done => break,
            TransferStatus::Partial | TransferStatus::NoRoom => {}
            TransferStatus::Error => anyhow::bail!("state download failed"),
        }
    }
    report.step("FastTransferSourceGetBuffer", ReturnValue::SUCCESS, ReturnValue::SUCCESS);

    let state = SyncState::from_stream(&stream)?;
    report.check(
        format!("state stream ({}) lists the imported message", format_bytes(stream.len() as u64)),
        state.get(StateProperty::IdsetGiven).contains_long_term(source_key),
    );
    report.check(
        "seen change numbers are not empty",
        !state.get(StateProperty::CnsetSeen).is_empty(),
    );
    Ok(())
}

fn scenario_b(client: &mut DemoClient, report: &mut ScenarioReport) -> anyhow::Result<()> {
    let inbox = log_on(client, report)?;
    let open_stream = RopRequest::new(0, HandleIndices::InputOutput { input: 1, output: 2 }, RequestPayload::OpenStream {
        tag: tags::BODY,
        open_mode: OPEN_CREATE,
    });
    let outcome = client.execute(&[create_message(0, 0, 1, inbox), open_stream])?;
    report.succeeded(&outcome, &["CreateMessage into slot 1", "OpenStream into slot 2"]);

    client.execute(&[RopRequest::new(0, HandleIndices::Input(1), RequestPayload::Release)])?;
    report.check("slot 1 no longer resolves", client.handles().resolve(1).is_err());
    report.check("slot 2 still resolves", client.handles().resolve(2).is_ok());

    let write = RopRequest::new(0, HandleIndices::Input(2), RequestPayload::WriteStream {
        data: b"stream outlives its message handle".to_vec(),
    });
    let outcome = client.execute(&[get_properties(1), write])?;
    if let [released, stream] = outcome.responses.as_slice() {
        report.step("GetPropertiesAll on released slot 1", released.return_value, ReturnValue::NULL_OBJECT);
        report.step("WriteStream on slot 2", stream.return_value, ReturnValue::SUCCESS);
    }
    Ok(())
}

fn scenario_c(client: &mut DemoClient, report: &mut ScenarioReport) -> anyhow::Result<()> {
    let inbox = log_on(client, report)?;
    let outcome = client.execute(&[create_message(0, 0, 1, inbox)])?;
    report.succeeded(&outcome, &["CreateMessage into slot 1"]);

    let copy_to = |source: u8| {
        RopRequest::new(0, HandleIndices::SourceDest { source, dest: 5 }, RequestPayload::CopyTo {
            want_asynchronous: false,
            want_sub_objects: false,
            copy_flags: 0,
            excluded_tags: Vec::new(),
        })
    };
    let outcome = client.execute(&[copy_to(1), copy_to(6)])?;
    if let [missing_dest, bad_source] = outcome.responses.as_slice() {
        report.step(
            "CopyTo with destination slot 5 unassigned",
            missing_dest.return_value,
            ReturnValue::NULL_DESTINATION_OBJECT,
        );
        report.check(
            "null-destination response names slot 5",
            missing_dest.body == ResponseBody::NullDestination { dest_handle_index: 5 },
        );
        report.step("CopyTo with source slot 6 unassigned", bad_source.return_value, ReturnValue::NULL_OBJECT);
    }
    Ok(())
}

fn scenario_d(client: &mut DemoClient, report: &mut ScenarioReport) -> anyhow::Result<()> {
    let inbox = log_on(client, report)?;
    let outcome = client.execute(&[logon(1, 1), create_message(1, 1, 2, inbox)])?;
    report.succeeded(&outcome, &["Logon 1 into slot 1", "CreateMessage under logon 1"]);

    let transport_send = |input: u8| RopRequest::new(0, HandleIndices::Input(input), RequestPayload::TransportSend);
    let outcome = client.execute(&[transport_send(2), transport_send(7)])?;
    if let [foreign, unassigned] = outcome.responses.as_slice() {
        report.step("TransportSend on logon 1's message", foreign.return_value, ReturnValue::ACCESS_DENIED);
        report.step("TransportSend on unassigned slot 7", unassigned.return_value, ReturnValue::NULL_OBJECT);
    }
    Ok(())
}

fn fast_transfer_copy(client: &mut DemoClient, report: &mut ScenarioReport, show_progress: bool) -> anyhow::Result<()> {
    const SUBJECT: &str = "quarterly numbers";
    let inbox = log_on(client, report)?;
    let body: String = "All figures are preliminary. ".repeat(24);
    let values = vec![
        TaggedValue::new(tags::SUBJECT, PropertyValue::Unicode(SUBJECT.into())),
        TaggedValue::new(tags::BODY, PropertyValue::Unicode(body)),
    ];
    let requests = [
        create_message(0, 0, 1, inbox),
        RopRequest::new(0, HandleIndices::Input(1), RequestPayload::SetProperties { values }),
        RopRequest::new(0, HandleIndices::ResponseInput { response: 1, input: 1 }, RequestPayload::SaveChangesMessage {
            save_flags: KEEP_OPEN_READ_WRITE,
        }),
        RopRequest::new(0, HandleIndices::InputOutput { input: 1, output: 2 }, RequestPayload::FastTransferSourceCopyTo {
            level: 0,
            copy_flags: 0,
            send_options: 0,
            excluded_tags: Vec::new(),
        }),
        create_message(0, 0, 3, inbox),
        RopRequest::new(0, HandleIndices::InputOutput { input: 3, output: 4 }, RequestPayload::FastTransferDestinationConfigure {
            source_operation: SourceOperation::CopyTo as u8,
            copy_flags: 0,
        }),
    ];
    let outcome = client.execute(&requests)?;
    report.succeeded(&outcome, &[
        "CreateMessage (source)",
        "SetProperties",
        "SaveChangesMessage",
        "FastTransferSourceCopyTo",
        "CreateMessage (target)",
        "FastTransferDestinationConfigure",
    ]);
    outcome.require_complete()?;

    let progress = TransferProgress::new("Copying message", !show_progress);
    let mut chunks = 0usize;
    let mut largest = 0usize;
    loop {
        let outcome = client.execute(&[get_buffer(2, 256, 0)])?;
        outcome.require_complete()?;
        let response = &outcome.responses[0];
        let ResponseBody::GetBuffer {
            status,
            in_progress_count,
            total_step_count,
            data,
        } = &response.body
        else {
            report.step("FastTransferSourceGetBuffer", response.return_value, ReturnValue::SUCCESS);
            return Ok(());
        };
        progress.update(*in_progress_count, *total_step_count);
        chunks += 1;
        largest = largest.max(data.len());

        let put = client.execute(&[RopRequest::new(0, HandleIndices::Input(4), RequestPayload::FastTransferDestinationPutBuffer {
            data: data.clone(),
        })])?;
        put.require_complete()?;
        if !put.responses[0].return_value.is_success() {
            report.step("FastTransferDestinationPutBuffer", put.responses[0].return_value, ReturnValue::SUCCESS);
            return Ok(());
        }
        match status {
            TransferStatus::Done => break,
            TransferStatus::Partial | TransferStatus::NoRoom => {}
            TransferStatus::Error => anyhow::bail!("source stream failed"),
        }
    }
    progress.finish_with_message(format!("Copied in {chunks} chunk(s)"));
    report.step("GetBuffer/PutBuffer loop", ReturnValue::SUCCESS, ReturnValue::SUCCESS);
    report.check(format!("every chunk within 256 bytes (largest {largest})"), largest <= 256);

    let save = RopRequest::new(0, HandleIndices::ResponseInput { response: 3, input: 3 }, RequestPayload::SaveChangesMessage {
        save_flags: KEEP_OPEN_READ_WRITE,
    });
    let outcome = client.execute(&[save, get_properties(3)])?;
    report.succeeded(&outcome, &["SaveChangesMessage (target)", "GetPropertiesAll (target)"]);
    let copied = outcome.responses.get(1).and_then(|r| subject_of(&r.body));
    report.check("target carries the source subject", copied == Some(SUBJECT));
    Ok(())
}
