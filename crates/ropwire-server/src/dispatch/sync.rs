//! ICS synchronization ROPs

use ropwire_core::rop::MessageReadState;
use ropwire_core::{PropertyTag, ResponseBody, ServerObjectHandle, TaggedValue};
use ropwire_fxics::SyncKind;

use super::{Outcome, Reply, RopCall};
use crate::error::ServerError;
use crate::objects::{MessageObject, ServerObject};
use crate::server::lock;
use crate::session::Session;
use crate::sync::{DownloadOptions, SyncContext, import_flags};

impl Session {
    fn sync_mut(&mut self, handle: ServerObjectHandle, rop: &'static str) -> Result<&mut SyncContext, ServerError> {
        match self.object_mut(handle)? {
            ServerObject::Sync(sync) => Ok(sync),
            _ => Err(ServerError::WrongObject(rop)),
        }
    }

    pub(crate) fn sync_configure(
        &mut self,
        call: &RopCall,
        sync_type: u8,
        sync_flags: u16,
        restriction: &[u8],
        extra_flags: u32,
        tags: &[PropertyTag],
    ) -> Outcome {
        let folder = self.folder_of(call.input()?, "SynchronizationConfigure")?;
        let kind = SyncKind::try_from(sync_type).map_err(|_| ServerError::InvalidParameter("SynchronizationType"))?;
        if !restriction.is_empty() {
            tracing::debug!("Ignoring {}-byte restriction on {:?}", restriction.len(), folder);
        }
        let options = DownloadOptions {
            sync_flags,
            extra_flags,
            tags: tags.to_vec(),
        };
        let context = SyncContext::download(folder, kind, options);
        let handle = self.bind(call, ServerObject::Sync(Box::new(context)))?;
        Ok(Reply::created(ResponseBody::Empty, handle))
    }

    pub(crate) fn open_collector(&mut self, call: &RopCall, is_contents_collector: bool) -> Outcome {
        let folder = self.folder_of(call.input()?, "SynchronizationOpenCollector")?;
        let kind = if is_contents_collector {
            SyncKind::Contents
        } else {
            SyncKind::Hierarchy
        };
        let handle = self.bind(call, ServerObject::Sync(Box::new(SyncContext::collector(folder, kind))))?;
        Ok(Reply::created(ResponseBody::Empty, handle))
    }

    pub(crate) fn import_message_change(&mut self, call: &RopCall, import_flag: u8, values: &[TaggedValue]) -> Outcome {
        let input = call.input()?;
        let mailbox = self.store(call.logon_id)?;
        let sync = self.sync_mut(input, "SynchronizationImportMessageChange")?;
        let folder = sync.folder();
        let (id, stamp, draft) = sync.import_message_change(&mut lock(&mailbox), import_flag, values)?;
        let message = MessageObject {
            folder,
            id,
            associated: import_flag & import_flags::ASSOCIATED != 0,
            draft,
            is_new: false,
            base: Some(stamp.change_number),
            imported: Some(stamp),
        };
        let handle = self.bind(call, ServerObject::Message(Box::new(message)))?;
        Ok(Reply::created(ResponseBody::ImportedId { id: id.as_u64() }, handle))
    }

    pub(crate) fn import_hierarchy_change(
        &mut self,
        call: &RopCall,
        hierarchy_values: &[TaggedValue],
        values: &[TaggedValue],
    ) -> Outcome {
        let mailbox = self.store(call.logon_id)?;
        let sync = self.sync_mut(call.input()?, "SynchronizationImportHierarchyChange")?;
        let id = sync.import_hierarchy_change(&mut lock(&mailbox), hierarchy_values, values)?;
        Ok(Reply::new(ResponseBody::ImportedId { id: id.as_u64() }))
    }

    pub(crate) fn import_deletes(&mut self, call: &RopCall, flags: u8, values: &[TaggedValue]) -> Outcome {
        let mailbox = self.store(call.logon_id)?;
        let sync = self.sync_mut(call.input()?, "SynchronizationImportDeletes")?;
        sync.import_deletes(&mut lock(&mailbox), flags, values)?;
        Ok(Reply::empty())
    }

    pub(crate) fn import_message_move(
        &mut self,
        call: &RopCall,
        source_folder: &[u8],
        source_message: &[u8],
        predecessor_change_list: &[u8],
        destination_message: &[u8],
        change_key: &[u8],
    ) -> Outcome {
        let mailbox = self.store(call.logon_id)?;
        let sync = self.sync_mut(call.input()?, "SynchronizationImportMessageMove")?;
        let id = sync.import_message_move(
            &mut lock(&mailbox),
            source_folder,
            source_message,
            predecessor_change_list,
            destination_message,
            change_key,
        )?;
        Ok(Reply::new(ResponseBody::ImportedId { id: id.as_u64() }))
    }

    pub(crate) fn import_read_state_changes(&mut self, call: &RopCall, states: &[MessageReadState]) -> Outcome {
        let mailbox = self.store(call.logon_id)?;
        let sync = self.sync_mut(call.input()?, "SynchronizationImportReadStateChanges")?;
        sync.import_read_state_changes(&mut lock(&mailbox), states)?;
        Ok(Reply::empty())
    }

    pub(crate) fn get_transfer_state(&mut self, call: &RopCall) -> Outcome {
        let sync = self.sync_mut(call.input()?, "SynchronizationGetTransferState")?;
        let source = sync.transfer_state()?;
        let handle = self.bind(call, ServerObject::FastTransferSource(Box::new(source)))?;
        Ok(Reply::created(ResponseBody::Empty, handle))
    }

    pub(crate) fn upload_state_begin(&mut self, call: &RopCall, state_property: PropertyTag, buffer_size: u32) -> Outcome {
        self.sync_mut(call.input()?, "SynchronizationUploadStateStreamBegin")?
            .begin_state_upload(state_property, buffer_size)?;
        Ok(Reply::empty())
    }

    pub(crate) fn upload_state_continue(&mut self, call: &RopCall, data: &[u8]) -> Outcome {
        self.sync_mut(call.input()?, "SynchronizationUploadStateStreamContinue")?
            .continue_state_upload(data)?;
        Ok(Reply::empty())
    }

    pub(crate) fn upload_state_end(&mut self, call: &RopCall) -> Outcome {
        self.sync_mut(call.input()?, "SynchronizationUploadStateStreamEnd")?
            .end_state_upload()?;
        Ok(Reply::empty())
    }
}
