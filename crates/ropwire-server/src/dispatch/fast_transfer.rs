//! FastTransfer sources and destinations

use ropwire_core::property::tags;
use ropwire_core::rop::TransferStatus;
use ropwire_core::{BUFFER_SIZE_SERVER_CHOICE, PropertyTag, ResponseBody, ShortTermId, TaggedValue};
use ropwire_fxics::{
    DestinationContext, FolderContent, FxItem, FxObject, MessageContent, ObjectKind, SourceContext, SourceOperation,
    TransferChunk,
};

use super::{Outcome, Reply, RopCall};
use crate::error::ServerError;
use crate::objects::{DestinationObject, DestinationTarget, ServerObject};
use crate::server::lock;
use crate::session::Session;
use crate::store::{MessageDraft, Store};

/// CopyFolder flag: include subfolders
const COPY_SUBFOLDERS: u8 = 0x10;

/// Envelope plus status, counts, reserved byte and size of a GetBuffer response
const GET_BUFFER_OVERHEAD: usize = 15;

impl Session {
    pub(crate) fn fast_transfer_copy_to(&mut self, call: &RopCall, level: u8, excluded_tags: &[PropertyTag]) -> Outcome {
        let keep = |tag: PropertyTag| !excluded_tags.iter().any(|t| t.id() == tag.id());
        let object = self.source_object(call, level, &keep, level == 0)?;
        self.bind_source(call, &object)
    }

    pub(crate) fn fast_transfer_copy_properties(&mut self, call: &RopCall, level: u8, tags: &[PropertyTag]) -> Outcome {
        let keep = |tag: PropertyTag| tags.iter().any(|t| t.id() == tag.id());
        let object = self.source_object(call, level, &keep, false)?;
        self.bind_source(call, &object)
    }

    pub(crate) fn fast_transfer_copy_messages(&mut self, call: &RopCall, message_ids: &[ShortTermId]) -> Outcome {
        let folder = self.folder_of(call.input()?, "FastTransferSourceCopyMessages")?;
        let mailbox = self.store(call.logon_id)?;
        let messages = {
            let store = lock(&mailbox);
            message_ids
                .iter()
                .map(|&id| {
                    let record = store.message_in(folder, id)?;
                    Ok((record.associated, record.draft.to_content()))
                })
                .collect::<Result<Vec<_>, ServerError>>()?
        };
        self.bind_source(call, &FxObject::MessageList(messages))
    }

    pub(crate) fn fast_transfer_copy_folder(&mut self, call: &RopCall, copy_flags: u8) -> Outcome {
        let folder = self.folder_of(call.input()?, "FastTransferSourceCopyFolder")?;
        let mailbox = self.store(call.logon_id)?;
        let content = lock(&mailbox).folder_content(folder, true, copy_flags & COPY_SUBFOLDERS != 0)?;
        self.bind_source(call, &FxObject::TopFolder(content))
    }

    /// Content of the input object for CopyTo and CopyProperties
    fn source_object(
        &self,
        call: &RopCall,
        level: u8,
        keep: &dyn Fn(PropertyTag) -> bool,
        with_children: bool,
    ) -> Result<FxObject, ServerError> {
        let input = call.input.ok_or(ServerError::InvalidParameter("InputHandleIndex"))?;
        match self.object(input)? {
            ServerObject::Message(message) => {
                let mut content = message.draft.to_content();
                content.properties.retain(|tv| keep(tv.tag));
                if level > 0 {
                    content.recipients.clear();
                    content.attachments.clear();
                }
                Ok(FxObject::Message(content))
            }
            ServerObject::Folder(folder) => {
                let mailbox = self.store(call.logon_id)?;
                let mut content = lock(&mailbox).folder_content(folder.id, with_children, with_children)?;
                content.properties.retain(|tv| keep(tv.tag));
                Ok(FxObject::Folder(content))
            }
            _ => Err(ServerError::WrongObject(call.rop_id.name())),
        }
    }

    fn bind_source(&mut self, call: &RopCall, object: &FxObject) -> Outcome {
        let source = SourceContext::new(object)?;
        tracing::debug!("{} prepared {} bytes", call.rop_id.name(), source.total_size());
        let handle = self.bind(call, ServerObject::FastTransferSource(Box::new(source)))?;
        Ok(Reply::created(ResponseBody::Empty, handle))
    }

    pub(crate) fn get_buffer(&mut self, call: &RopCall, buffer_size: u16, maximum_buffer_size: u16) -> Outcome {
        let input = call.input()?;
        let cap = self.room.saturating_sub(GET_BUFFER_OVERHEAD).min(usize::from(u16::MAX));
        if cap == 0 {
            return Ok(Reply::new(chunk_body(TransferChunk {
                status: TransferStatus::NoRoom,
                in_progress_count: 0,
                total_step_count: 0,
                data: Vec::new(),
            })));
        }
        let cap16 = u16::try_from(cap).unwrap_or(u16::MAX);
        let (buffer_size, maximum_buffer_size) = if buffer_size == BUFFER_SIZE_SERVER_CHOICE {
            (buffer_size, maximum_buffer_size.min(cap16))
        } else {
            (buffer_size.min(cap16), maximum_buffer_size)
        };
        let default_chunk = self.server.config().fast_transfer_chunk.min(cap);
        let mailbox = self.store(call.logon_id)?;
        let chunk = match self.object_mut(input)? {
            ServerObject::FastTransferSource(source) => {
                source.get_buffer(buffer_size, maximum_buffer_size, default_chunk)
            }
            ServerObject::Sync(sync) => {
                let store = lock(&mailbox);
                sync.get_buffer(&store, buffer_size, maximum_buffer_size, default_chunk)?
            }
            _ => return Err(ServerError::WrongObject("FastTransferSourceGetBuffer").into()),
        };
        Ok(Reply::new(chunk_body(chunk)))
    }

    pub(crate) fn destination_configure(&mut self, call: &RopCall, source_operation: u8, copy_flags: u8) -> Outcome {
        let input = call.input()?;
        let operation = SourceOperation::try_from(source_operation)
            .map_err(|_| ServerError::InvalidParameter("SourceOperation"))?;
        let (target, is_folder) = match self.object(input)? {
            ServerObject::Folder(folder) => (DestinationTarget::Folder(folder.id), true),
            ServerObject::Message(_) => (DestinationTarget::Message(input), false),
            _ => return Err(ServerError::WrongObject("FastTransferDestinationConfigure").into()),
        };
        let kind = match (operation, is_folder) {
            (SourceOperation::CopyTo | SourceOperation::CopyProperties, true) => ObjectKind::Folder,
            (SourceOperation::CopyTo | SourceOperation::CopyProperties, false) => ObjectKind::Message,
            (SourceOperation::CopyMessages, true) => ObjectKind::MessageList,
            (SourceOperation::CopyFolder, true) => ObjectKind::TopFolder,
            _ => return Err(ServerError::WrongObject("message list upload into a message").into()),
        };
        tracing::debug!(
            "FastTransfer destination {:?} as {:?}, copy flags {:#04X}",
            operation,
            kind,
            copy_flags
        );
        let destination = DestinationObject {
            context: DestinationContext::new(operation, kind),
            target,
        };
        let handle = self.bind(call, ServerObject::FastTransferDestination(Box::new(destination)))?;
        Ok(Reply::created(ResponseBody::Empty, handle))
    }

    pub(crate) fn put_buffer(&mut self, call: &RopCall, data: &[u8]) -> Outcome {
        let input = call.input()?;
        let ServerObject::FastTransferDestination(destination) = self.object_mut(input)? else {
            return Err(ServerError::WrongObject("FastTransferDestinationPutBuffer").into());
        };
        let target = destination.target;
        let items = destination.context.put_buffer(data)?;
        let complete = destination.context.is_complete();
        let count = u16::try_from(destination.context.items_completed()).unwrap_or(u16::MAX);
        self.apply_items(call, target, items)?;
        Ok(Reply::new(ResponseBody::PutBuffer {
            status: if complete {
                TransferStatus::Done
            } else {
                TransferStatus::Partial
            },
            in_progress_count: count,
            total_step_count: count,
            buffer_used_size: u16::try_from(data.len()).unwrap_or(u16::MAX),
        }))
    }

    fn apply_items(&mut self, call: &RopCall, target: DestinationTarget, items: Vec<FxItem>) -> Result<(), ServerError> {
        match target {
            DestinationTarget::Folder(folder) => {
                let mailbox = self.store(call.logon_id)?;
                let mut store = lock(&mailbox);
                let mut properties = Vec::new();
                for item in items {
                    match item {
                        FxItem::Property(tv) => properties.push(tv),
                        FxItem::Message { associated, content } => {
                            save_imported(&mut store, folder, associated, content)?;
                        }
                        FxItem::Folder(content) => {
                            import_folder_content(&mut store, folder, content)?;
                        }
                        FxItem::Recipient(_) | FxItem::Attachment(_) | FxItem::Embedded(_) => {
                            return Err(ServerError::WrongObject("message content into a folder"));
                        }
                    }
                }
                if !properties.is_empty() {
                    store.set_folder_properties(folder, &properties)?;
                }
            }
            DestinationTarget::Message(handle) => {
                let message = self
                    .message_mut(handle, "FastTransferDestinationPutBuffer")
                    .map_err(|_| ServerError::InvalidState("upload target was released"))?;
                for item in items {
                    match item {
                        FxItem::Property(tv) => message.draft.set(&[tv]),
                        FxItem::Recipient(row) => message.draft.recipients.push(row),
                        FxItem::Attachment(attachment) => message.draft.attachments.push(attachment),
                        FxItem::Message { .. } | FxItem::Folder(_) | FxItem::Embedded(_) => {
                            return Err(ServerError::WrongObject("folder content into a message"));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn tell_version(&mut self, call: &RopCall, version: [u16; 3]) -> Outcome {
        match self.object(call.input()?)? {
            ServerObject::FastTransferSource(_) | ServerObject::FastTransferDestination(_) => {
                tracing::debug!("Peer server version {}.{}.{}", version[0], version[1], version[2]);
                Ok(Reply::empty())
            }
            _ => Err(ServerError::WrongObject("TellVersion").into()),
        }
    }
}

fn chunk_body(chunk: TransferChunk) -> ResponseBody {
    ResponseBody::GetBuffer {
        status: chunk.status,
        in_progress_count: chunk.in_progress_count,
        total_step_count: chunk.total_step_count,
        data: chunk.data,
    }
}

fn save_imported(store: &mut Store, folder: ShortTermId, associated: bool, content: MessageContent) -> Result<ShortTermId, ServerError> {
    let id = store.allocate_id()?;
    store.save_message(folder, id, associated, MessageDraft::from_content(content), None)?;
    Ok(id)
}

/// Messages and subfolders of `content`, recreated under `parent`
pub(super) fn import_folder_children(store: &mut Store, parent: ShortTermId, content: FolderContent) -> Result<(), ServerError> {
    for message in content.messages {
        save_imported(store, parent, false, message)?;
    }
    for message in content.associated_messages {
        save_imported(store, parent, true, message)?;
    }
    for subfolder in content.subfolders {
        import_folder_content(store, parent, subfolder)?;
    }
    Ok(())
}

/// Recreate a streamed folder under `parent`, merging into a same-named one
fn import_folder_content(store: &mut Store, parent: ShortTermId, content: FolderContent) -> Result<ShortTermId, ServerError> {
    let name = display_name(&content.properties)
        .ok_or(ServerError::InvalidParameter("PidTagDisplayName"))?
        .to_string();
    let (id, existed) = store.create_folder(parent, &name, "", true)?;
    store.set_folder_properties(id, &content.properties)?;
    tracing::debug!("Imported folder {:?} under {:?} (merged: {})", name, parent, existed);
    import_folder_children(store, id, content)?;
    Ok(id)
}

fn display_name(values: &[TaggedValue]) -> Option<&str> {
    values
        .iter()
        .find(|tv| tv.tag.id() == tags::DISPLAY_NAME.id())
        .and_then(|tv| tv.value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SpecialFolder;
    use ropwire_core::{PropertyValue, ReplicaGuid};

    fn named(name: &str) -> Vec<TaggedValue> {
        vec![TaggedValue::new(tags::DISPLAY_NAME, PropertyValue::Unicode(name.into()))]
    }

    #[test]
    fn test_imported_folder_tree_merges_by_name() {
        let mut store = Store::new(ReplicaGuid([3; 16]), ReplicaGuid([4; 16])).unwrap();
        let root = store.special_folder(SpecialFolder::Inbox);
        let tree = FolderContent {
            properties: named("Projects"),
            messages: vec![MessageContent::default()],
            subfolders: vec![FolderContent {
                properties: named("Archive"),
                ..FolderContent::default()
            }],
            ..FolderContent::default()
        };
        let first = import_folder_content(&mut store, root, tree.clone()).unwrap();
        let second = import_folder_content(&mut store, root, tree).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.messages_in(first, None).len(), 2);
        assert_eq!(store.subfolders(first).len(), 1);
    }

    #[test]
    fn test_nameless_folder_rejected() {
        let mut store = Store::new(ReplicaGuid([3; 16]), ReplicaGuid([4; 16])).unwrap();
        let root = store.special_folder(SpecialFolder::Inbox);
        let err = import_folder_content(&mut store, root, FolderContent::default()).unwrap_err();
        assert_eq!(err, ServerError::InvalidParameter("PidTagDisplayName"));
    }
}
