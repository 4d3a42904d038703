//! Folder, message, spooler and id ROPs

use ropwire_core::property::{MSGFLAG_UNSENT, tags};
use ropwire_core::rop::PropertyProblem;
use ropwire_core::wire::Writer;
use ropwire_core::{
    LongTermId, PropertyValue, ResponseBody, ReturnValue, ServerObjectHandle, ShortTermId, TaggedValue,
};

use super::{Outcome, Reply, RopCall};
use crate::error::ServerError;
use crate::objects::{EmptyJob, FolderObject, MessageObject, ServerObject};
use crate::server::lock;
use crate::session::Session;
use crate::store::{DeleteTarget, MessageDraft, Store, is_computed};

/// SaveChangesMessage: save even if the stored message changed
const FORCE_SAVE: u8 = 0x04;

/// CreateFolder: search folder type
const FOLDER_SEARCH: u8 = 0x02;

/// Error code substituted for values over a GetPropertiesAll size limit
const NOT_ENOUGH_MEMORY: u32 = 0x8007_000E;

impl Session {
    pub(crate) fn open_folder(&mut self, call: &RopCall, folder_id: ShortTermId) -> Outcome {
        let input = call.input()?;
        self.require_logon_or_folder(input, "OpenFolder")?;
        let mailbox = self.store(call.logon_id)?;
        lock(&mailbox).folder(folder_id)?;
        let handle = self.bind(call, ServerObject::Folder(FolderObject { id: folder_id, job: None }))?;
        Ok(Reply::created(
            ResponseBody::OpenFolder {
                has_rules: false,
                is_ghosted: false,
            },
            handle,
        ))
    }

    pub(crate) fn create_folder(
        &mut self,
        call: &RopCall,
        folder_type: u8,
        open_existing: bool,
        display_name: &str,
        comment: &str,
    ) -> Outcome {
        let parent = self.folder_of(call.input()?, "CreateFolder")?;
        if folder_type == FOLDER_SEARCH {
            return Err(ServerError::WrongObject("search folder").into());
        }
        if display_name.is_empty() {
            return Err(ServerError::InvalidParameter("DisplayName").into());
        }
        let mailbox = self.store(call.logon_id)?;
        let (folder_id, is_existing) = lock(&mailbox).create_folder(parent, display_name, comment, open_existing)?;
        let handle = self.bind(call, ServerObject::Folder(FolderObject { id: folder_id, job: None }))?;
        Ok(Reply::created(
            ResponseBody::CreateFolder {
                folder_id,
                is_existing,
                has_rules: false,
                is_ghosted: false,
            },
            handle,
        ))
    }

    pub(crate) fn delete_folder(&mut self, call: &RopCall, flags: u8, folder_id: ShortTermId) -> Outcome {
        let parent = self.folder_of(call.input()?, "DeleteFolder")?;
        let mailbox = self.store(call.logon_id)?;
        let mut store = lock(&mailbox);
        if store.folder(folder_id)?.parent != Some(parent) {
            return Err(ServerError::NotFound(folder_id).into());
        }
        let partial = store.delete_folder(folder_id, flags)?;
        Ok(Reply::new(ResponseBody::PartialCompletion { partial }))
    }

    pub(crate) fn create_message(&mut self, call: &RopCall, folder_id: ShortTermId, associated: bool) -> Outcome {
        let input = call.input()?;
        self.require_logon_or_folder(input, "CreateMessage")?;
        let mailbox = self.store(call.logon_id)?;
        let id = {
            let mut store = lock(&mailbox);
            store.folder(folder_id)?;
            store.allocate_id()?
        };
        let mut draft = MessageDraft::default();
        if !associated {
            draft.set(&[TaggedValue::new(
                tags::MESSAGE_FLAGS,
                PropertyValue::Integer32(MSGFLAG_UNSENT),
            )]);
        }
        let message = MessageObject {
            folder: folder_id,
            id,
            associated,
            draft,
            is_new: true,
            imported: None,
            base: None,
        };
        let handle = self.bind(call, ServerObject::Message(Box::new(message)))?;
        Ok(Reply::created(ResponseBody::CreateMessage { message_id: Some(id) }, handle))
    }

    pub(crate) fn open_message(&mut self, call: &RopCall, folder_id: ShortTermId, message_id: ShortTermId) -> Outcome {
        let input = call.input()?;
        self.require_logon_or_folder(input, "OpenMessage")?;
        let mailbox = self.store(call.logon_id)?;
        let message = {
            let store = lock(&mailbox);
            let record = store.message_in(folder_id, message_id)?;
            MessageObject {
                folder: folder_id,
                id: message_id,
                associated: record.associated,
                draft: record.draft.clone(),
                is_new: false,
                imported: None,
                base: Some(record.stamp.change_number),
            }
        };
        let body = ResponseBody::OpenMessage {
            has_named_properties: false,
            subject_prefix: None,
            normalized_subject: message.draft.subject().map(str::to_string),
            recipient_count: u16::try_from(message.draft.recipients.len()).unwrap_or(u16::MAX),
        };
        let handle = self.bind(call, ServerObject::Message(Box::new(message)))?;
        Ok(Reply::created(body, handle))
    }

    pub(crate) fn get_properties_all(&mut self, call: &RopCall, size_limit: u16, want_unicode: bool) -> Outcome {
        let input = call.input()?;
        let mailbox = self.store(call.logon_id)?;
        let store = lock(&mailbox);
        let values = match self.object(input)? {
            ServerObject::Logon => {
                let owner = self.mailbox_of(call.logon_id).unwrap_or_default().to_string();
                vec![TaggedValue::new(tags::MAILBOX_OWNER_NAME, PropertyValue::Unicode(owner))]
            }
            ServerObject::Folder(folder) => store.folder_properties(folder.id)?,
            ServerObject::Message(message) => message_values(&store, message)?,
            _ => return Err(ServerError::WrongObject("GetPropertiesAll").into()),
        };
        let values = values
            .into_iter()
            .map(|tv| limit_value(tv, size_limit, want_unicode))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Reply::new(ResponseBody::GetPropertiesAll { values }))
    }

    pub(crate) fn set_properties(&mut self, call: &RopCall, values: &[TaggedValue]) -> Outcome {
        let input = call.input()?;
        let mut problems = Vec::new();
        let mut accepted = Vec::with_capacity(values.len());
        for (index, tv) in values.iter().enumerate() {
            if is_computed(tv.tag) {
                problems.push(PropertyProblem {
                    index: u16::try_from(index).unwrap_or(u16::MAX),
                    tag: tv.tag,
                    error: ReturnValue::ACCESS_DENIED,
                });
            } else {
                accepted.push(tv.clone());
            }
        }
        let mailbox = self.store(call.logon_id)?;
        match self.object_mut(input)? {
            ServerObject::Message(message) => message.draft.set(&accepted),
            ServerObject::Folder(folder) => {
                let id = folder.id;
                lock(&mailbox).set_folder_properties(id, &accepted)?;
            }
            _ => return Err(ServerError::WrongObject("SetProperties").into()),
        }
        Ok(Reply::new(ResponseBody::PropertyProblems { problems }))
    }

    pub(crate) fn save_changes_message(&mut self, call: &RopCall, save_flags: u8) -> Outcome {
        let input = call.input()?;
        let message_id = self.save_message_object(call, input, save_flags & FORCE_SAVE != 0)?;
        Ok(Reply::new(ResponseBody::SaveChangesMessage {
            input_handle_index: call.input_index.unwrap_or(0),
            message_id,
        }))
    }

    /// Commit an open message's draft to the store
    fn save_message_object(
        &mut self,
        call: &RopCall,
        input: ServerObjectHandle,
        force: bool,
    ) -> Result<ShortTermId, ServerError> {
        let mailbox = self.store(call.logon_id)?;
        let message = self.message_mut(input, "SaveChangesMessage")?;
        let mut store = lock(&mailbox);
        if let (false, Some(base)) = (force, message.base) {
            if let Ok(stored) = store.message(message.id) {
                if stored.stamp.change_number != base {
                    return Err(ServerError::ObjectChanged(message.id));
                }
            }
        }
        let stamp = store.save_message(
            message.folder,
            message.id,
            message.associated,
            message.draft.clone(),
            message.imported.take(),
        )?;
        message.is_new = false;
        message.base = Some(stamp.change_number);
        Ok(message.id)
    }

    pub(crate) fn hard_delete_messages(&mut self, call: &RopCall, message_ids: &[ShortTermId]) -> Outcome {
        let folder = self.folder_of(call.input()?, "HardDeleteMessages")?;
        let mailbox = self.store(call.logon_id)?;
        let partial = lock(&mailbox).hard_delete_messages(folder, message_ids)?;
        Ok(Reply::new(ResponseBody::PartialCompletion { partial }))
    }

    pub(crate) fn empty_folder(&mut self, call: &RopCall, asynchronous: bool, delete_associated: bool) -> Outcome {
        let input = call.input()?;
        let folder = self.folder_of(input, "EmptyFolder")?;
        let mailbox = self.store(call.logon_id)?;
        let mut store = lock(&mailbox);
        let targets = store.empty_folder_targets(folder, delete_associated);
        if asynchronous {
            let total = u32::try_from(targets.len()).unwrap_or(u32::MAX);
            tracing::debug!("EmptyFolder on {:?} queued {} objects", folder, total);
            if let ServerObject::Folder(open) = self.object_mut(input)? {
                open.job = Some(EmptyJob {
                    pending: targets.into(),
                    total,
                    completed: 0,
                });
            }
            return Ok(Reply::new(ResponseBody::PartialCompletion { partial: false }));
        }
        let mut partial = false;
        for target in targets {
            if deletable(&store, target) {
                store.delete_target(target);
            } else {
                partial = true;
            }
        }
        Ok(Reply::new(ResponseBody::PartialCompletion { partial }))
    }

    pub(crate) fn progress(&mut self, call: &RopCall, want_cancel: bool) -> Outcome {
        let input = call.input()?;
        let batch = self.server.config().empty_folder_batch;
        let mailbox = self.store(call.logon_id)?;
        let ServerObject::Folder(open) = self.object_mut(input)? else {
            return Err(ServerError::WrongObject("Progress").into());
        };
        let job = open
            .job
            .as_mut()
            .ok_or(ServerError::InvalidState("no asynchronous operation"))?;
        if !want_cancel {
            let mut store = lock(&mailbox);
            for _ in 0..batch {
                let Some(target) = job.pending.pop_front() else {
                    break;
                };
                if deletable(&store, target) {
                    store.delete_target(target);
                }
                job.completed += 1;
            }
        }
        let (completed, total, finished) = (job.completed, job.total, job.pending.is_empty());
        if want_cancel || finished {
            tracing::debug!("EmptyFolder on {:?} ended at {}/{}", open.id, completed, total);
            open.job = None;
        }
        Ok(Reply::new(ResponseBody::Progress {
            logon_id: call.logon_id,
            completed,
            total,
        }))
    }

    pub(crate) fn submit_message(&mut self, call: &RopCall) -> Outcome {
        let message = self.message_of(call.input()?, "SubmitMessage")?;
        if message.is_new {
            return Err(ServerError::InvalidState("message was never saved").into());
        }
        let id = message.id;
        let mailbox = self.store(call.logon_id)?;
        lock(&mailbox).submit(id)?;
        Ok(Reply::empty())
    }

    pub(crate) fn abort_submit(&mut self, call: &RopCall, folder_id: ShortTermId, message_id: ShortTermId) -> Outcome {
        self.require_logon_or_folder(call.input()?, "AbortSubmit")?;
        let mailbox = self.store(call.logon_id)?;
        lock(&mailbox).abort_submit(folder_id, message_id)?;
        Ok(Reply::empty())
    }

    pub(crate) fn transport_send(&mut self, call: &RopCall) -> Outcome {
        let input = call.input()?;
        let id = self.save_message_object(call, input, true)?;
        let mailbox = self.store(call.logon_id)?;
        lock(&mailbox).transport_send(id)?;
        Ok(Reply::new(ResponseBody::TransportSend { values: None }))
    }

    pub(crate) fn long_term_id_from_id(&mut self, call: &RopCall, object_id: ShortTermId) -> Outcome {
        let mailbox = self.store(call.logon_id)?;
        let store = lock(&mailbox);
        if store.tombstone(object_id).is_some() {
            return Err(ServerError::ObjectDeleted(object_id).into());
        }
        let long_term_id = store.translator().to_long_term(object_id)?;
        Ok(Reply::new(ResponseBody::LongTermIdFromId { long_term_id }))
    }

    pub(crate) fn id_from_long_term_id(&mut self, call: &RopCall, long_term_id: LongTermId) -> Outcome {
        let mailbox = self.store(call.logon_id)?;
        let store = lock(&mailbox);
        let object_id = store.translator().to_short_term(long_term_id)?;
        if store.tombstone(object_id).is_some() {
            return Err(ServerError::ObjectDeleted(object_id).into());
        }
        Ok(Reply::new(ResponseBody::IdFromLongTermId { object_id }))
    }

    pub(crate) fn get_local_replica_ids(&mut self, call: &RopCall, id_count: u32) -> Outcome {
        if id_count == 0 {
            return Err(ServerError::InvalidParameter("IdCount").into());
        }
        let mailbox = self.store(call.logon_id)?;
        let (replica_guid, global_count) = lock(&mailbox).reserve_local_ids(id_count)?;
        Ok(Reply::new(ResponseBody::GetLocalReplicaIds {
            replica_guid,
            global_count,
        }))
    }
}

/// Properties of an open message: stored identity plus the draft
fn message_values(store: &Store, message: &MessageObject) -> Result<Vec<TaggedValue>, ServerError> {
    let mut values: Vec<TaggedValue> = if message.is_new {
        vec![
            TaggedValue::new(tags::MID, PropertyValue::Integer64(message.id.as_u64() as i64)),
            TaggedValue::new(
                tags::PARENT_FOLDER_ID,
                PropertyValue::Integer64(message.folder.as_u64() as i64),
            ),
            TaggedValue::new(tags::ASSOCIATED, PropertyValue::Boolean(message.associated)),
        ]
    } else {
        store
            .message_properties(message.id)?
            .into_iter()
            .filter(|tv| is_computed(tv.tag))
            .collect()
    };
    values.extend(crate::store::to_values(&message.draft.properties));
    Ok(values)
}

/// Apply GetPropertiesAll's size limit and string flavour to one value
fn limit_value(tv: TaggedValue, size_limit: u16, want_unicode: bool) -> Result<TaggedValue, ServerError> {
    if size_limit != 0 {
        let mut w = Writer::new();
        tv.value.write(&mut w)?;
        if w.len() > usize::from(size_limit) {
            return Ok(TaggedValue::new(tv.tag, PropertyValue::Error(NOT_ENOUGH_MEMORY)));
        }
    }
    Ok(match tv.value {
        PropertyValue::Unicode(text) if !want_unicode => TaggedValue::new(tv.tag, PropertyValue::String8(text)),
        value => TaggedValue { tag: tv.tag, value },
    })
}

/// Special folders survive EmptyFolder
fn deletable(store: &Store, target: DeleteTarget) -> bool {
    match target {
        DeleteTarget::Message(_) => true,
        DeleteTarget::Folder(id) => store.folder(id).is_ok_and(|f| f.special.is_none()),
    }
}
