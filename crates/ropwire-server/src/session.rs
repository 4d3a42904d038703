//! One client connection: logons, objects and ordered ROP execution.
//!
//! A [`Session`] answers whole request buffers. ROPs run strictly in the
//! order they appear, so a ROP may name a handle slot an earlier ROP of
//! the same buffer just filled. A failing ROP is answered in-band and
//! processing continues; only a ROP that cannot be decoded halts the
//! buffer, since nothing after it can be delimited.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Timelike, Utc};
use ropwire_core::buffer::{Backoff, BufferTooSmall, HeaderFlags, RequestBuffer, frame};
use ropwire_core::rop::{LogonResponse, LogonTime, TransferStatus};
use ropwire_core::wire::Writer;
use ropwire_core::{
    NULL_HANDLE, RPC_HEADER_EXT_SIZE, ROP_SIZE_FIELD, RequestPayload, ResponseBody, RopId,
    RopRequest, RopResponse, ServerObjectHandle,
};

use crate::dispatch::{Failure, Outcome, Reply, RopCall};
use crate::error::{Result, ServerError};
use crate::objects::{ObjectRegistry, ServerObject};
use crate::server::{Server, lock};
use crate::store::Store;

/// Private mailbox logon flag
const LOGON_PRIVATE: u8 = 0x01;

/// Reserved | OwnerRight | SendAsRight
const LOGON_RESPONSE_FLAGS: u8 = 0x07;

/// Smallest possible response: RopId, handle index, return value
const MIN_RESPONSE_SIZE: usize = 6;

/// Scope created by a Logon ROP
#[derive(Debug)]
pub(crate) struct LogonContext {
    /// Mailbox ESSDN as given at logon
    pub(crate) mailbox: String,
    /// Mailbox store
    pub(crate) store: Arc<Mutex<Store>>,
    /// Handle of the logon object
    pub(crate) handle: ServerObjectHandle,
}

/// Server side of one client connection
pub struct Session {
    pub(crate) server: Server,
    pub(crate) logons: BTreeMap<u8, LogonContext>,
    pub(crate) objects: ObjectRegistry,
    exchanges: u64,
    /// Response bytes still free while the current ROP runs
    pub(crate) room: usize,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("logons", &self.logons.keys().collect::<Vec<_>>())
            .field("objects", &self.objects.len())
            .field("exchanges", &self.exchanges)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(server: Server) -> Self {
        let limit = server.config().max_open_objects;
        Self {
            server,
            logons: BTreeMap::new(),
            objects: ObjectRegistry::new(limit),
            exchanges: 0,
            room: 0,
        }
    }

    /// Logon ids currently open
    #[must_use]
    pub fn logon_ids(&self) -> Vec<u8> {
        self.logons.keys().copied().collect()
    }

    /// Number of live server objects
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Mailbox ESSDN of a logon
    #[must_use]
    pub fn mailbox_of(&self, logon_id: u8) -> Option<&str> {
        self.logons.get(&logon_id).map(|l| l.mailbox.as_str())
    }

    /// Answer one request buffer
    ///
    /// `max_response` is the caller's response buffer size; the server's
    /// own limit applies when it is smaller.
    ///
    /// # Errors
    ///
    /// Fails only when the buffer itself cannot be framed or its handle
    /// table is oversized. Failing ROPs are answered in-band.
    pub fn process(&mut self, request: &[u8], max_response: usize) -> Result<Vec<u8>> {
        let buffer = RequestBuffer::parse(request)?;
        let config = self.server.config().clone();
        if buffer.handles.len() > config.max_handle_slots {
            return Err(ServerError::InvalidParameter("ServerObjectHandleTable"));
        }
        let mut flags = HeaderFlags::last();
        if buffer.obfuscated {
            flags = flags.with_xor_magic();
        }
        self.exchanges += 1;

        if self.exchanges <= u64::from(config.busy_exchanges) {
            let requests: Vec<RopRequest> = buffer.requests().filter_map(|r| r.ok()).map(|(r, _)| r).collect();
            let backoff = Backoff {
                logon_id: requests.first().map_or(0, |r| r.logon_id),
                duration_ms: config.backoff_ms,
                rops: requests.iter().map(|r| (r.rop_id().as_u8(), config.backoff_ms)).collect(),
                additional_data: Vec::new(),
            };
            tracing::debug!("Exchange {} answered with backoff", self.exchanges);
            let mut w = Writer::new();
            backoff.encode(&mut w)?;
            return Ok(frame(&w.into_bytes(), &buffer.handles, flags)?);
        }

        let budget = max_response.min(config.max_response_size);
        let fixed = RPC_HEADER_EXT_SIZE + ROP_SIZE_FIELD + buffer.handles.len() * 4;
        let rop_budget = budget.saturating_sub(fixed);
        let mut handles = buffer.handles.clone();
        let mut out = Writer::new();

        for item in buffer.requests() {
            let (request, offset) = match item {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!("Halting buffer at undecodable ROP: {}", e);
                    break;
                }
            };
            self.room = rop_budget.saturating_sub(out.len());
            if self.room < MIN_RESPONSE_SIZE && request.rop_id() != RopId::Release {
                let size_needed = fixed + out.len() + MIN_RESPONSE_SIZE;
                too_small(&mut out, size_needed, &buffer.rop_bytes[offset..]);
                break;
            }
            let output = request.handles.output().map(usize::from);
            let previous = output.and_then(|o| handles.get(o).copied());
            let Some(response) = self.execute(&request, &mut handles) else {
                continue;
            };
            let bytes = match response.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("{} response could not be encoded: {}", request.rop_id().name(), e);
                    RopResponse::failure(response.rop_id, response.handle_index, ServerError::from(e).return_value())
                        .to_bytes()?
                }
            };
            if bytes.len() > self.room {
                tracing::debug!(
                    "{} response of {} bytes does not fit in {}",
                    request.rop_id().name(),
                    bytes.len(),
                    self.room
                );
                if let (Some(o), Some(previous)) = (output, previous) {
                    self.unbind(request.logon_id, &mut handles, o, previous);
                }
                let size_needed = fixed + out.len() + bytes.len();
                too_small(&mut out, size_needed, &buffer.rop_bytes[offset..]);
                break;
            }
            out.bytes(&bytes);
        }
        Ok(frame(&out.into_bytes(), &handles, flags)?)
    }

    /// Drop an object whose response could not be delivered
    fn unbind(&mut self, logon_id: u8, handles: &mut [u32], output: usize, previous: u32) {
        let bound = handles[output];
        if bound == previous {
            return;
        }
        handles[output] = previous;
        if let Some(entry) = self.objects.remove(ServerObjectHandle(bound)) {
            if matches!(entry.object, ServerObject::Logon) {
                self.end_logon(logon_id);
            }
        }
    }

    /// Run one ROP; `None` for ROPs without a response
    fn execute(&mut self, request: &RopRequest, handles: &mut [u32]) -> Option<RopResponse> {
        let rop_id = request.rop_id();
        if rop_id == RopId::Release {
            self.release(request, handles);
            return None;
        }
        let response_index = request.handles.response_index();
        tracing::debug!("{} logon={} handles={:?}", rop_id.name(), request.logon_id, request.handles);

        let outcome = self.prepare(request, handles).and_then(|call| {
            let reply = self.dispatch(&call, &request.payload)?;
            if let (Some(handle), Some(output)) = (reply.created, call.output) {
                handles[usize::from(output)] = handle.as_u32();
            }
            Ok(reply)
        });
        Some(match outcome {
            Ok(reply) => RopResponse::success(rop_id, response_index, reply.body),
            Err(failure) => {
                tracing::debug!("{} failed with {}", rop_id.name(), failure.return_value);
                let body = match failure.body {
                    // PutBuffer carries its counters even on failure
                    ResponseBody::Empty if rop_id == RopId::FastTransferDestinationPutBuffer => {
                        ResponseBody::PutBuffer {
                            status: TransferStatus::Error,
                            in_progress_count: 0,
                            total_step_count: 0,
                            buffer_used_size: 0,
                        }
                    }
                    body => body,
                };
                RopResponse {
                    rop_id,
                    handle_index: response_index,
                    return_value: failure.return_value,
                    body,
                    bound_handle: None,
                }
            }
        })
    }

    /// Resolve the handle indices of a request
    fn prepare(&self, request: &RopRequest, handles: &[u32]) -> std::result::Result<RopCall, Failure> {
        let indices = request.handles;
        if let Some(output) = indices.output() {
            if usize::from(output) >= handles.len() {
                return Err(ServerError::InvalidParameter("OutputHandleIndex").into());
            }
        }
        let input = match indices.input() {
            Some(index) => Some(self.resolve(request.logon_id, index, handles)?),
            None => None,
        };
        let dest = indices.dest().map(|index| self.resolve(request.logon_id, index, handles));
        Ok(RopCall {
            logon_id: request.logon_id,
            rop_id: request.rop_id(),
            input_index: indices.input(),
            input,
            dest_index: indices.dest(),
            dest,
            output: indices.output(),
        })
    }

    /// Handle in slot `index`, checked against the registry and logon
    pub(crate) fn resolve(&self, logon_id: u8, index: u8, handles: &[u32]) -> Result<ServerObjectHandle> {
        let raw = handles
            .get(usize::from(index))
            .copied()
            .filter(|&h| h != NULL_HANDLE)
            .ok_or(ServerError::NullObject(index))?;
        let handle = ServerObjectHandle(raw);
        let entry = self.objects.get(handle).ok_or(ServerError::NullObject(index))?;
        if entry.logon_id != logon_id {
            return Err(ServerError::AccessDenied(index));
        }
        Ok(handle)
    }

    fn release(&mut self, request: &RopRequest, handles: &mut [u32]) {
        let Some(index) = request.handles.input() else {
            return;
        };
        let handle = match self.resolve(request.logon_id, index, handles) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Ignoring release of slot {}: {}", index, e);
                return;
            }
        };
        if let Err(e) = self.commit_stream_on_release(request.logon_id, handle) {
            tracing::warn!("Stream commit on release failed: {}", e);
        }
        if let Some(entry) = self.objects.remove(handle) {
            tracing::debug!("Released {} {:#X}", entry.object.type_name(), handle.as_u32());
            if matches!(entry.object, ServerObject::Logon) {
                self.end_logon(entry.logon_id);
            }
        }
        handles[usize::from(index)] = NULL_HANDLE;
    }

    fn commit_stream_on_release(&mut self, logon_id: u8, handle: ServerObjectHandle) -> Result<()> {
        let dirty = matches!(
            self.objects.get(handle).map(|e| &e.object),
            Some(ServerObject::Stream(stream)) if stream.dirty
        );
        if dirty {
            self.commit_stream(logon_id, handle)?;
        }
        Ok(())
    }

    /// End a logon and drop every object it owns
    pub(crate) fn end_logon(&mut self, logon_id: u8) {
        let released = self.objects.release_logon(logon_id);
        if let Some(logon) = self.logons.remove(&logon_id) {
            tracing::info!(
                "Logon {} ({:#X}) to {} ended, {} more handles released",
                logon_id,
                logon.handle.as_u32(),
                logon.mailbox,
                released.len()
            );
        }
    }

    /// Store behind a logon
    pub(crate) fn store(&self, logon_id: u8) -> Result<Arc<Mutex<Store>>> {
        self.logons
            .get(&logon_id)
            .map(|l| Arc::clone(&l.store))
            .ok_or(ServerError::InvalidState("no logon with this LogonId"))
    }

    fn dispatch(&mut self, call: &RopCall, payload: &RequestPayload) -> Outcome {
        match payload {
            RequestPayload::Logon {
                logon_flags,
                open_flags,
                store_state,
                essdn,
            } => self.logon(call, *logon_flags, *open_flags, *store_state, essdn),
            RequestPayload::OpenFolder { folder_id, .. } => self.open_folder(call, *folder_id),
            RequestPayload::CreateFolder {
                folder_type,
                open_existing,
                display_name,
                comment,
                ..
            } => self.create_folder(call, *folder_type, *open_existing, display_name, comment),
            RequestPayload::DeleteFolder { flags, folder_id } => {
                self.delete_folder(call, *flags, *folder_id)
            }
            RequestPayload::CreateMessage {
                folder_id, associated, ..
            } => self.create_message(call, *folder_id, *associated),
            RequestPayload::OpenMessage {
                folder_id,
                message_id,
                ..
            } => self.open_message(call, *folder_id, *message_id),
            RequestPayload::GetPropertiesAll {
                size_limit,
                want_unicode,
            } => self.get_properties_all(call, *size_limit, *want_unicode),
            RequestPayload::SetProperties { values } => self.set_properties(call, values),
            RequestPayload::SaveChangesMessage { save_flags } => {
                self.save_changes_message(call, *save_flags)
            }
            RequestPayload::HardDeleteMessages { message_ids, .. } => {
                self.hard_delete_messages(call, message_ids)
            }
            RequestPayload::EmptyFolder {
                want_asynchronous,
                want_delete_associated,
            } => self.empty_folder(call, *want_asynchronous, *want_delete_associated),
            RequestPayload::Progress { want_cancel } => self.progress(call, *want_cancel),
            RequestPayload::OpenStream { tag, open_mode } => self.open_stream(call, *tag, *open_mode),
            RequestPayload::ReadStream {
                byte_count,
                maximum_byte_count,
            } => self.read_stream(call, *byte_count, *maximum_byte_count),
            RequestPayload::WriteStream { data } => self.write_stream(call, data),
            RequestPayload::CommitStream => {
                let handle = call.input()?;
                self.commit_stream(call.logon_id, handle)?;
                Ok(Reply::empty())
            }
            RequestPayload::CopyTo {
                want_sub_objects,
                copy_flags,
                excluded_tags,
                ..
            } => self.copy_to(call, *want_sub_objects, *copy_flags, excluded_tags),
            RequestPayload::CopyProperties { copy_flags, tags, .. } => {
                self.copy_properties(call, *copy_flags, tags)
            }
            RequestPayload::CopyToStream { byte_count } => self.copy_to_stream(call, *byte_count),
            RequestPayload::SubmitMessage { .. } => self.submit_message(call),
            RequestPayload::AbortSubmit {
                folder_id,
                message_id,
            } => self.abort_submit(call, *folder_id, *message_id),
            RequestPayload::TransportSend => self.transport_send(call),
            RequestPayload::LongTermIdFromId { object_id } => self.long_term_id_from_id(call, *object_id),
            RequestPayload::IdFromLongTermId { long_term_id } => {
                self.id_from_long_term_id(call, *long_term_id)
            }
            RequestPayload::GetLocalReplicaIds { id_count } => self.get_local_replica_ids(call, *id_count),
            RequestPayload::FastTransferSourceCopyTo {
                level,
                excluded_tags,
                ..
            } => self.fast_transfer_copy_to(call, *level, excluded_tags),
            RequestPayload::FastTransferSourceCopyProperties { level, tags, .. } => {
                self.fast_transfer_copy_properties(call, *level, tags)
            }
            RequestPayload::FastTransferSourceCopyMessages { message_ids, .. } => {
                self.fast_transfer_copy_messages(call, message_ids)
            }
            RequestPayload::FastTransferSourceCopyFolder { copy_flags, .. } => {
                self.fast_transfer_copy_folder(call, *copy_flags)
            }
            RequestPayload::FastTransferSourceGetBuffer {
                buffer_size,
                maximum_buffer_size,
            } => self.get_buffer(call, *buffer_size, *maximum_buffer_size),
            RequestPayload::FastTransferDestinationConfigure {
                source_operation,
                copy_flags,
            } => self.destination_configure(call, *source_operation, *copy_flags),
            RequestPayload::FastTransferDestinationPutBuffer { data } => self.put_buffer(call, data),
            RequestPayload::TellVersion { version } => self.tell_version(call, *version),
            RequestPayload::SynchronizationConfigure {
                sync_type,
                sync_flags,
                restriction,
                extra_flags,
                tags,
                ..
            } => self.sync_configure(call, *sync_type, *sync_flags, restriction, *extra_flags, tags),
            RequestPayload::SynchronizationOpenCollector {
                is_contents_collector,
            } => self.open_collector(call, *is_contents_collector),
            RequestPayload::SynchronizationImportMessageChange { import_flag, values } => {
                self.import_message_change(call, *import_flag, values)
            }
            RequestPayload::SynchronizationImportHierarchyChange {
                hierarchy_values,
                values,
            } => self.import_hierarchy_change(call, hierarchy_values, values),
            RequestPayload::SynchronizationImportDeletes { flags, values } => {
                self.import_deletes(call, *flags, values)
            }
            RequestPayload::SynchronizationImportMessageMove {
                source_folder_id,
                source_message_id,
                predecessor_change_list,
                destination_message_id,
                change_number,
            } => self.import_message_move(
                call,
                source_folder_id,
                source_message_id,
                predecessor_change_list,
                destination_message_id,
                change_number,
            ),
            RequestPayload::SynchronizationImportReadStateChanges { states } => {
                self.import_read_state_changes(call, states)
            }
            RequestPayload::SynchronizationGetTransferState => self.get_transfer_state(call),
            RequestPayload::SynchronizationUploadStateStreamBegin {
                state_property,
                buffer_size,
            } => self.upload_state_begin(call, *state_property, *buffer_size),
            RequestPayload::SynchronizationUploadStateStreamContinue { data } => {
                self.upload_state_continue(call, data)
            }
            RequestPayload::SynchronizationUploadStateStreamEnd => self.upload_state_end(call),
            RequestPayload::Release => Ok(Reply::empty()),
            RequestPayload::Raw { rop_id, .. } => {
                tracing::debug!("No handler for {}", rop_id.name());
                Err(ServerError::WrongObject(rop_id.name()).into())
            }
        }
    }

    fn logon(
        &mut self,
        call: &RopCall,
        logon_flags: u8,
        open_flags: u32,
        store_state: u32,
        essdn: &str,
    ) -> Outcome {
        if logon_flags & LOGON_PRIVATE == 0 {
            return Err(ServerError::WrongObject("public folder logon").into());
        }
        if self.logons.contains_key(&call.logon_id) {
            tracing::warn!("LogonId {} reused; ending the previous logon", call.logon_id);
            self.end_logon(call.logon_id);
        }
        let store = self.server.mailbox(essdn)?;
        let handle = self.objects.insert(call.logon_id, ServerObject::Logon)?;
        let response = {
            let store = lock(&store);
            LogonResponse {
                logon_flags,
                folder_ids: store.special_folders(),
                response_flags: LOGON_RESPONSE_FLAGS,
                mailbox_guid: store.mailbox_guid(),
                replica_id: store.replica_id(),
                replica_guid: store.replica_guid(),
                logon_time: logon_time(Utc::now()),
                gwart_time: 0,
                store_state,
            }
        };
        tracing::info!(
            "Logon {} to {} (open flags {:#010X})",
            call.logon_id,
            essdn,
            open_flags
        );
        self.logons.insert(
            call.logon_id,
            LogonContext {
                mailbox: essdn.to_string(),
                store,
                handle,
            },
        );
        Ok(Reply::created(ResponseBody::Logon(Box::new(response)), handle))
    }
}

fn too_small(out: &mut Writer, size_needed: usize, unprocessed: &[u8]) {
    BufferTooSmall {
        size_needed: u16::try_from(size_needed).unwrap_or(u16::MAX),
        request_buffers: unprocessed.to_vec(),
    }
    .encode(out);
}

/// Wall-clock fields of a logon response, in UTC
fn logon_time(now: DateTime<Utc>) -> LogonTime {
    LogonTime {
        seconds: now.second() as u8,
        minutes: now.minute() as u8,
        hour: now.hour() as u8,
        day_of_week: now.weekday().num_days_from_sunday() as u8,
        day: now.day() as u8,
        month: now.month() as u8,
        year: u16::try_from(now.year()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::loopback::LoopbackTransport;
    use ropwire_core::property::tags;
    use ropwire_core::rop::HandleIndices;
    use ropwire_core::{Client, ClientConfig, PropertyValue, ReturnValue, ShortTermId, TaggedValue};
    use chrono::TimeZone;

    const ESSDN: &str = "/o=Example/ou=Site/cn=Recipients/cn=alice";

    fn server() -> Server {
        Server::new(ServerConfig {
            replica_seed: Some(11),
            ..ServerConfig::default()
        })
        .unwrap()
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

    fn release(logon_id: u8, input: u8) -> RopRequest {
        RopRequest::new(logon_id, HandleIndices::Input(input), RequestPayload::Release)
    }

    /// Log on at slot 0 and return the inbox id
    fn log_on(client: &mut Client<LoopbackTransport>) -> ShortTermId {
        let outcome = client.execute(&[logon(0, 0)]).unwrap();
        match &outcome.responses[0].body {
            ResponseBody::Logon(response) => response.folder_ids[4],
            other => panic!("unexpected logon body {other:?}"),
        }
    }

    #[test]
    fn test_release_invalidates_only_that_slot() {
        let server = server();
        let mut client = server.connect();
        let inbox = log_on(&mut client);
        let open_stream = RopRequest::new(0, HandleIndices::InputOutput { input: 1, output: 2 }, RequestPayload::OpenStream {
            tag: tags::BODY,
            open_mode: 0x02,
        });
        let outcome = client.execute(&[create_message(0, 0, 1, inbox), open_stream]).unwrap();
        assert!(outcome.responses.iter().all(|r| r.return_value.is_success()));
        assert!(client.handles().resolve(1).is_ok());

        client.execute(&[release(0, 1)]).unwrap();
        assert!(client.handles().resolve(1).is_err());
        assert!(client.handles().resolve(2).is_ok());

        let get = RopRequest::new(0, HandleIndices::Input(1), RequestPayload::GetPropertiesAll {
            size_limit: 0,
            want_unicode: true,
        });
        let write = RopRequest::new(0, HandleIndices::Input(2), RequestPayload::WriteStream {
            data: b"still open".to_vec(),
        });
        let outcome = client.execute(&[get, write]).unwrap();
        assert_eq!(outcome.responses[0].return_value, ReturnValue::NULL_OBJECT);
        assert_eq!(
            outcome.responses[1].body,
            ResponseBody::WriteStream { written_size: 10 }
        );
    }

    #[test]
    fn test_cross_logon_and_unassigned_handles() {
        let server = server();
        let mut client = server.connect();
        let inbox = log_on(&mut client);
        let outcome = client
            .execute(&[logon(1, 1), create_message(1, 1, 2, inbox)])
            .unwrap();
        assert!(outcome.responses[1].return_value.is_success());

        let foreign = RopRequest::new(0, HandleIndices::Input(2), RequestPayload::TransportSend);
        let unassigned = RopRequest::new(0, HandleIndices::Input(7), RequestPayload::TransportSend);
        let outcome = client.execute(&[foreign, unassigned]).unwrap();
        assert_eq!(outcome.responses[0].return_value, ReturnValue::ACCESS_DENIED);
        assert_eq!(outcome.responses[1].return_value, ReturnValue::NULL_OBJECT);
    }

    #[test]
    fn test_missing_copy_destination() {
        let server = server();
        let mut client = server.connect();
        let inbox = log_on(&mut client);
        client.execute(&[create_message(0, 0, 1, inbox)]).unwrap();
        let copy = |source: u8| {
            RopRequest::new(0, HandleIndices::SourceDest { source, dest: 5 }, RequestPayload::CopyTo {
                want_asynchronous: false,
                want_sub_objects: false,
                copy_flags: 0,
                excluded_tags: Vec::new(),
            })
        };
        let outcome = client.execute(&[copy(1), copy(6)]).unwrap();
        assert_eq!(outcome.responses[0].return_value, ReturnValue::NULL_DESTINATION_OBJECT);
        assert_eq!(
            outcome.responses[0].body,
            ResponseBody::NullDestination { dest_handle_index: 5 }
        );
        assert_eq!(outcome.responses[1].return_value, ReturnValue::NULL_OBJECT);
    }

    #[test]
    fn test_foreign_copy_destination_is_denied() {
        let server = server();
        let mut client = server.connect();
        let inbox = log_on(&mut client);
        let outcome = client
            .execute(&[logon(1, 1), create_message(1, 1, 2, inbox), create_message(0, 0, 3, inbox)])
            .unwrap();
        assert!(outcome.responses.iter().all(|r| r.return_value.is_success()));

        let copy = RopRequest::new(0, HandleIndices::SourceDest { source: 3, dest: 2 }, RequestPayload::CopyTo {
            want_asynchronous: false,
            want_sub_objects: false,
            copy_flags: 0,
            excluded_tags: Vec::new(),
        });
        let outcome = client.execute(&[copy]).unwrap();
        assert_eq!(outcome.responses[0].return_value, ReturnValue::ACCESS_DENIED);
        assert_eq!(outcome.responses[0].body, ResponseBody::Empty);
    }

    #[test]
    fn test_releasing_logon_ends_its_objects() {
        let server = server();
        let mut client = Client::new(LoopbackTransport::new(&server));
        let inbox = log_on(&mut client);
        client.execute(&[create_message(0, 0, 1, inbox)]).unwrap();
        assert_eq!(client.transport_mut().session().object_count(), 2);
        client.execute(&[release(0, 0)]).unwrap();
        assert_eq!(client.transport_mut().session().object_count(), 0);
        assert!(client.transport_mut().session().logon_ids().is_empty());
        assert!(client.handles().resolve(1).is_err());
    }

    #[test]
    fn test_unframed_buffer_is_rejected() {
        let mut session = server().session();
        assert!(session.process(&[0x00, 0x00], 0x1000).is_err());
        assert_eq!(session.object_count(), 0);
    }

    #[test]
    fn test_busy_server_answers_with_backoff() {
        let server = Server::new(ServerConfig {
            busy_exchanges: 1,
            backoff_ms: 1,
            ..ServerConfig::default()
        })
        .unwrap();
        let mut client = server.connect();
        let outcome = client.execute(&[logon(0, 0)]).unwrap();
        assert_eq!(outcome.backoff_retries, 1);
        assert!(outcome.responses[0].return_value.is_success());
    }

    #[test]
    fn test_small_response_budget_stops_with_buffer_too_small() {
        let server = server();
        let mut client = server.connect_with(ClientConfig {
            max_response_size: 64,
            ..ClientConfig::default()
        });
        let outcome = client.execute(&[logon(0, 0)]).unwrap();
        assert!(outcome.responses.is_empty());
        let too_small = outcome.buffer_too_small.expect("BufferTooSmall response");
        assert!(usize::from(too_small.size_needed) > 64);
        assert!(!too_small.request_buffers.is_empty());
        assert_eq!(client.transport_mut().session().object_count(), 0);
        assert!(client.transport_mut().session().logon_ids().is_empty());
    }

    #[test]
    fn test_no_room_for_any_response() {
        let server = server();
        let mut client = server.connect_with(ClientConfig {
            // header, RopSize and one handle slot leave two bytes
            max_response_size: RPC_HEADER_EXT_SIZE + ROP_SIZE_FIELD + 4 + 2,
            ..ClientConfig::default()
        });
        let outcome = client.execute(&[logon(0, 0)]).unwrap();
        assert!(outcome.responses.is_empty());
        let too_small = outcome.buffer_too_small.expect("BufferTooSmall response");
        assert_eq!(
            usize::from(too_small.size_needed),
            RPC_HEADER_EXT_SIZE + ROP_SIZE_FIELD + 4 + MIN_RESPONSE_SIZE
        );
        assert!(client.transport_mut().session().logon_ids().is_empty());
    }

    #[test]
    fn test_saved_message_round_trips_properties() {
        let server = server();
        let mut client = server.connect();
        let inbox = log_on(&mut client);
        let subject = TaggedValue::new(tags::SUBJECT, PropertyValue::Unicode("hello".into()));
        let set = RopRequest::new(0, HandleIndices::Input(1), RequestPayload::SetProperties {
            values: vec![subject.clone()],
        });
        let save = RopRequest::new(0, HandleIndices::ResponseInput { response: 1, input: 1 }, RequestPayload::SaveChangesMessage {
            save_flags: 0x0C,
        });
        let get = RopRequest::new(0, HandleIndices::Input(1), RequestPayload::GetPropertiesAll {
            size_limit: 0,
            want_unicode: true,
        });
        let outcome = client
            .execute(&[create_message(0, 0, 1, inbox), set, save, get])
            .unwrap();
        assert!(outcome.responses.iter().all(|r| r.return_value.is_success()));
        let ResponseBody::GetPropertiesAll { values } = &outcome.responses[3].body else {
            panic!("unexpected body");
        };
        assert!(values.contains(&subject));
        assert!(values.iter().any(|v| v.tag == tags::CHANGE_KEY));
    }

    #[test]
    fn test_logon_time_fields() {
        // 2024-01-01 12:34:56 UTC, a Monday
        let t = logon_time(Utc.with_ymd_and_hms(2024, 1, 1, 12, 34, 56).unwrap());
        assert_eq!((t.year, t.month, t.day), (2024, 1, 1));
        assert_eq!((t.hour, t.minutes, t.seconds), (12, 34, 56));
        assert_eq!(t.day_of_week, 1);
    }
}
