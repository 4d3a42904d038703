//! ROP request payloads.

use serde::Serialize;

use super::HandleIndices;
use crate::BUFFER_SIZE_SERVER_CHOICE;
use crate::error::CodecError;
use crate::ids::{LongTermId, ShortTermId, Xid};
use crate::property::{
    PropertyTag, TaggedValue, read_tagged_values, read_tags, write_tagged_values, write_tags,
};
use crate::rop_id::RopId;
use crate::wire::{Reader, Writer};

/// One entry of `RopSynchronizationImportReadStateChanges`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReadState {
    /// Source key of the message
    pub message_id: Vec<u8>,
    /// New read state
    pub mark_as_read: bool,
}

/// Type-specific request fields, one variant per supported RopId
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RequestPayload {
    Logon {
        logon_flags: u8,
        open_flags: u32,
        store_state: u32,
        essdn: String,
    },
    Release,
    OpenFolder {
        folder_id: ShortTermId,
        open_mode: u8,
    },
    OpenMessage {
        code_page: u16,
        folder_id: ShortTermId,
        open_mode: u8,
        message_id: ShortTermId,
    },
    CreateMessage {
        code_page: u16,
        folder_id: ShortTermId,
        associated: bool,
    },
    GetPropertiesAll {
        size_limit: u16,
        want_unicode: bool,
    },
    SetProperties {
        values: Vec<TaggedValue>,
    },
    SaveChangesMessage {
        save_flags: u8,
    },
    CreateFolder {
        folder_type: u8,
        use_unicode: bool,
        open_existing: bool,
        display_name: String,
        comment: String,
    },
    DeleteFolder {
        flags: u8,
        folder_id: ShortTermId,
    },
    HardDeleteMessages {
        want_asynchronous: bool,
        notify_non_read: bool,
        message_ids: Vec<ShortTermId>,
    },
    EmptyFolder {
        want_asynchronous: bool,
        want_delete_associated: bool,
    },
    Progress {
        want_cancel: bool,
    },
    OpenStream {
        tag: PropertyTag,
        open_mode: u8,
    },
    /// `maximum_byte_count` is only carried when `byte_count` is 0xBABE
    ReadStream {
        byte_count: u16,
        maximum_byte_count: u32,
    },
    WriteStream {
        data: Vec<u8>,
    },
    CommitStream,
    CopyTo {
        want_asynchronous: bool,
        want_sub_objects: bool,
        copy_flags: u8,
        excluded_tags: Vec<PropertyTag>,
    },
    CopyProperties {
        want_asynchronous: bool,
        copy_flags: u8,
        tags: Vec<PropertyTag>,
    },
    CopyToStream {
        byte_count: u64,
    },
    SubmitMessage {
        submit_flags: u8,
    },
    AbortSubmit {
        folder_id: ShortTermId,
        message_id: ShortTermId,
    },
    TransportSend,
    LongTermIdFromId {
        object_id: ShortTermId,
    },
    IdFromLongTermId {
        long_term_id: LongTermId,
    },
    GetLocalReplicaIds {
        id_count: u32,
    },
    FastTransferSourceCopyTo {
        level: u8,
        copy_flags: u32,
        send_options: u8,
        excluded_tags: Vec<PropertyTag>,
    },
    FastTransferSourceCopyProperties {
        level: u8,
        copy_flags: u8,
        send_options: u8,
        tags: Vec<PropertyTag>,
    },
    FastTransferSourceCopyMessages {
        message_ids: Vec<ShortTermId>,
        copy_flags: u8,
        send_options: u8,
    },
    FastTransferSourceCopyFolder {
        copy_flags: u8,
        send_options: u8,
    },
    /// `maximum_buffer_size` is only carried when `buffer_size` is 0xBABE
    FastTransferSourceGetBuffer {
        buffer_size: u16,
        maximum_buffer_size: u16,
    },
    FastTransferDestinationConfigure {
        source_operation: u8,
        copy_flags: u8,
    },
    FastTransferDestinationPutBuffer {
        data: Vec<u8>,
    },
    TellVersion {
        version: [u16; 3],
    },
    SynchronizationConfigure {
        sync_type: u8,
        send_options: u8,
        sync_flags: u16,
        restriction: Vec<u8>,
        extra_flags: u32,
        tags: Vec<PropertyTag>,
    },
    SynchronizationOpenCollector {
        is_contents_collector: bool,
    },
    SynchronizationImportMessageChange {
        import_flag: u8,
        values: Vec<TaggedValue>,
    },
    SynchronizationImportHierarchyChange {
        hierarchy_values: Vec<TaggedValue>,
        values: Vec<TaggedValue>,
    },
    SynchronizationImportDeletes {
        flags: u8,
        values: Vec<TaggedValue>,
    },
    SynchronizationImportMessageMove {
        source_folder_id: Vec<u8>,
        source_message_id: Vec<u8>,
        predecessor_change_list: Vec<u8>,
        destination_message_id: Vec<u8>,
        change_number: Vec<u8>,
    },
    SynchronizationImportReadStateChanges {
        states: Vec<MessageReadState>,
    },
    SynchronizationGetTransferState,
    SynchronizationUploadStateStreamBegin {
        state_property: PropertyTag,
        buffer_size: u32,
    },
    SynchronizationUploadStateStreamContinue {
        data: Vec<u8>,
    },
    SynchronizationUploadStateStreamEnd,
    /// Pre-encoded payload for a RopId this codec has no schema for
    Raw {
        rop_id: RopId,
        body: Vec<u8>,
    },
}

impl RequestPayload {
    /// RopId this payload belongs to
    #[must_use]
    pub fn rop_id(&self) -> RopId {
        match self {
            Self::Logon { .. } => RopId::Logon,
            Self::Release => RopId::Release,
            Self::OpenFolder { .. } => RopId::OpenFolder,
            Self::OpenMessage { .. } => RopId::OpenMessage,
            Self::CreateMessage { .. } => RopId::CreateMessage,
            Self::GetPropertiesAll { .. } => RopId::GetPropertiesAll,
            Self::SetProperties { .. } => RopId::SetProperties,
            Self::SaveChangesMessage { .. } => RopId::SaveChangesMessage,
            Self::CreateFolder { .. } => RopId::CreateFolder,
            Self::DeleteFolder { .. } => RopId::DeleteFolder,
            Self::HardDeleteMessages { .. } => RopId::HardDeleteMessages,
            Self::EmptyFolder { .. } => RopId::EmptyFolder,
            Self::Progress { .. } => RopId::Progress,
            Self::OpenStream { .. } => RopId::OpenStream,
            Self::ReadStream { .. } => RopId::ReadStream,
            Self::WriteStream { .. } => RopId::WriteStream,
            Self::CommitStream => RopId::CommitStream,
            Self::CopyTo { .. } => RopId::CopyTo,
            Self::CopyProperties { .. } => RopId::CopyProperties,
            Self::CopyToStream { .. } => RopId::CopyToStream,
            Self::SubmitMessage { .. } => RopId::SubmitMessage,
            Self::AbortSubmit { .. } => RopId::AbortSubmit,
            Self::TransportSend => RopId::TransportSend,
            Self::LongTermIdFromId { .. } => RopId::LongTermIdFromId,
            Self::IdFromLongTermId { .. } => RopId::IdFromLongTermId,
            Self::GetLocalReplicaIds { .. } => RopId::GetLocalReplicaIds,
            Self::FastTransferSourceCopyTo { .. } => RopId::FastTransferSourceCopyTo,
            Self::FastTransferSourceCopyProperties { .. } => {
                RopId::FastTransferSourceCopyProperties
            }
            Self::FastTransferSourceCopyMessages { .. } => RopId::FastTransferSourceCopyMessages,
            Self::FastTransferSourceCopyFolder { .. } => RopId::FastTransferSourceCopyFolder,
            Self::FastTransferSourceGetBuffer { .. } => RopId::FastTransferSourceGetBuffer,
            Self::FastTransferDestinationConfigure { .. } => {
                RopId::FastTransferDestinationConfigure
            }
            Self::FastTransferDestinationPutBuffer { .. } => {
                RopId::FastTransferDestinationPutBuffer
            }
            Self::TellVersion { .. } => RopId::TellVersion,
            Self::SynchronizationConfigure { .. } => RopId::SynchronizationConfigure,
            Self::SynchronizationOpenCollector { .. } => RopId::SynchronizationOpenCollector,
            Self::SynchronizationImportMessageChange { .. } => {
                RopId::SynchronizationImportMessageChange
            }
            Self::SynchronizationImportHierarchyChange { .. } => {
                RopId::SynchronizationImportHierarchyChange
            }
            Self::SynchronizationImportDeletes { .. } => RopId::SynchronizationImportDeletes,
            Self::SynchronizationImportMessageMove { .. } => {
                RopId::SynchronizationImportMessageMove
            }
            Self::SynchronizationImportReadStateChanges { .. } => {
                RopId::SynchronizationImportReadStateChanges
            }
            Self::SynchronizationGetTransferState => RopId::SynchronizationGetTransferState,
            Self::SynchronizationUploadStateStreamBegin { .. } => {
                RopId::SynchronizationUploadStateStreamBegin
            }
            Self::SynchronizationUploadStateStreamContinue { .. } => {
                RopId::SynchronizationUploadStateStreamContinue
            }
            Self::SynchronizationUploadStateStreamEnd => RopId::SynchronizationUploadStateStreamEnd,
            Self::Raw { rop_id, .. } => *rop_id,
        }
    }

    /// Build an ImportMessageMove payload from typed identities
    #[must_use]
    pub fn import_message_move(
        source_folder: LongTermId,
        source_message: LongTermId,
        destination_message: LongTermId,
        change_key: Xid,
        predecessor_change_list: Vec<u8>,
    ) -> Self {
        Self::SynchronizationImportMessageMove {
            source_folder_id: source_folder.to_gid().to_vec(),
            source_message_id: source_message.to_gid().to_vec(),
            predecessor_change_list,
            destination_message_id: destination_message.to_gid().to_vec(),
            change_number: change_key.to_bytes(),
        }
    }

    fn write(&self, w: &mut Writer) -> Result<(), CodecError> {
        match self {
            Self::Logon {
                logon_flags,
                open_flags,
                store_state,
                essdn,
            } => {
                w.u8(*logon_flags).u32(*open_flags).u32(*store_state);
                if essdn.is_empty() {
                    w.u16(0);
                } else {
                    let mut text = Writer::new();
                    text.string8(essdn);
                    w.sized_bytes16(&text.into_bytes())?;
                }
            }
            Self::Release
            | Self::CommitStream
            | Self::TransportSend
            | Self::SynchronizationGetTransferState
            | Self::SynchronizationUploadStateStreamEnd => {}
            Self::OpenFolder {
                folder_id,
                open_mode,
            } => {
                folder_id.write(w);
                w.u8(*open_mode);
            }
            Self::OpenMessage {
                code_page,
                folder_id,
                open_mode,
                message_id,
            } => {
                w.u16(*code_page);
                folder_id.write(w);
                w.u8(*open_mode);
                message_id.write(w);
            }
            Self::CreateMessage {
                code_page,
                folder_id,
                associated,
            } => {
                w.u16(*code_page);
                folder_id.write(w);
                w.bool8(*associated);
            }
            Self::GetPropertiesAll {
                size_limit,
                want_unicode,
            } => {
                w.u16(*size_limit).u16(u16::from(*want_unicode));
            }
            Self::SetProperties { values } => {
                let mut inner = Writer::new();
                write_tagged_values(&mut inner, values)?;
                w.sized_bytes16(&inner.into_bytes())?;
            }
            Self::SaveChangesMessage { save_flags } => {
                w.u8(*save_flags);
            }
            Self::CreateFolder {
                folder_type,
                use_unicode,
                open_existing,
                display_name,
                comment,
            } => {
                w.u8(*folder_type)
                    .bool8(*use_unicode)
                    .bool8(*open_existing)
                    .u8(0);
                if *use_unicode {
                    w.unicode(display_name).unicode(comment);
                } else {
                    w.string8(display_name).string8(comment);
                }
            }
            Self::DeleteFolder { flags, folder_id } => {
                w.u8(*flags);
                folder_id.write(w);
            }
            Self::HardDeleteMessages {
                want_asynchronous,
                notify_non_read,
                message_ids,
            } => {
                w.bool8(*want_asynchronous).bool8(*notify_non_read);
                write_ids(w, message_ids)?;
            }
            Self::EmptyFolder {
                want_asynchronous,
                want_delete_associated,
            } => {
                w.bool8(*want_asynchronous).bool8(*want_delete_associated);
            }
            Self::Progress { want_cancel } => {
                w.bool8(*want_cancel);
            }
            Self::OpenStream { tag, open_mode } => {
                w.u32(tag.0).u8(*open_mode);
            }
            Self::ReadStream {
                byte_count,
                maximum_byte_count,
            } => {
                w.u16(*byte_count);
                if *byte_count == BUFFER_SIZE_SERVER_CHOICE {
                    w.u32(*maximum_byte_count);
                }
            }
            Self::WriteStream { data } | Self::FastTransferDestinationPutBuffer { data } => {
                w.sized_bytes16(data)?;
            }
            Self::CopyTo {
                want_asynchronous,
                want_sub_objects,
                copy_flags,
                excluded_tags,
            } => {
                w.bool8(*want_asynchronous)
                    .bool8(*want_sub_objects)
                    .u8(*copy_flags);
                write_tags(w, excluded_tags);
            }
            Self::CopyProperties {
                want_asynchronous,
                copy_flags,
                tags,
            } => {
                w.bool8(*want_asynchronous).u8(*copy_flags);
                write_tags(w, tags);
            }
            Self::CopyToStream { byte_count } => {
                w.u64(*byte_count);
            }
            Self::SubmitMessage { submit_flags } => {
                w.u8(*submit_flags);
            }
            Self::AbortSubmit {
                folder_id,
                message_id,
            } => {
                folder_id.write(w);
                message_id.write(w);
            }
            Self::LongTermIdFromId { object_id } => object_id.write(w),
            Self::IdFromLongTermId { long_term_id } => long_term_id.write(w),
            Self::GetLocalReplicaIds { id_count } => {
                w.u32(*id_count);
            }
            Self::FastTransferSourceCopyTo {
                level,
                copy_flags,
                send_options,
                excluded_tags,
            } => {
                w.u8(*level).u32(*copy_flags).u8(*send_options);
                write_tags(w, excluded_tags);
            }
            Self::FastTransferSourceCopyProperties {
                level,
                copy_flags,
                send_options,
                tags,
            } => {
                w.u8(*level).u8(*copy_flags).u8(*send_options);
                write_tags(w, tags);
            }
            Self::FastTransferSourceCopyMessages {
                message_ids,
                copy_flags,
                send_options,
            } => {
                write_ids(w, message_ids)?;
                w.u8(*copy_flags).u8(*send_options);
            }
            Self::FastTransferSourceCopyFolder {
                copy_flags,
                send_options,
            } => {
                w.u8(*copy_flags).u8(*send_options);
            }
            Self::FastTransferSourceGetBuffer {
                buffer_size,
                maximum_buffer_size,
            } => {
                w.u16(*buffer_size);
                if *buffer_size == BUFFER_SIZE_SERVER_CHOICE {
                    w.u16(*maximum_buffer_size);
                }
            }
            Self::FastTransferDestinationConfigure {
                source_operation,
                copy_flags,
            } => {
                w.u8(*source_operation).u8(*copy_flags);
            }
            Self::TellVersion { version } => {
                for part in version {
                    w.u16(*part);
                }
            }
            Self::SynchronizationConfigure {
                sync_type,
                send_options,
                sync_flags,
                restriction,
                extra_flags,
                tags,
            } => {
                w.u8(*sync_type).u8(*send_options).u16(*sync_flags);
                w.sized_bytes16(restriction)?;
                w.u32(*extra_flags);
                write_tags(w, tags);
            }
            Self::SynchronizationOpenCollector {
                is_contents_collector,
            } => {
                w.bool8(*is_contents_collector);
            }
            Self::SynchronizationImportMessageChange {
                import_flag,
                values,
            } => {
                w.u8(*import_flag);
                write_tagged_values(w, values)?;
            }
            Self::SynchronizationImportHierarchyChange {
                hierarchy_values,
                values,
            } => {
                write_tagged_values(w, hierarchy_values)?;
                write_tagged_values(w, values)?;
            }
            Self::SynchronizationImportDeletes { flags, values } => {
                w.u8(*flags);
                write_tagged_values(w, values)?;
            }
            Self::SynchronizationImportMessageMove {
                source_folder_id,
                source_message_id,
                predecessor_change_list,
                destination_message_id,
                change_number,
            } => {
                w.sized_bytes32(source_folder_id)?;
                w.sized_bytes32(source_message_id)?;
                w.sized_bytes32(predecessor_change_list)?;
                w.sized_bytes32(destination_message_id)?;
                w.sized_bytes32(change_number)?;
            }
            Self::SynchronizationImportReadStateChanges { states } => {
                let mut inner = Writer::new();
                for state in states {
                    inner.sized_bytes16(&state.message_id)?;
                    inner.bool8(state.mark_as_read);
                }
                w.sized_bytes16(&inner.into_bytes())?;
            }
            Self::SynchronizationUploadStateStreamBegin {
                state_property,
                buffer_size,
            } => {
                w.u32(state_property.0).u32(*buffer_size);
            }
            Self::SynchronizationUploadStateStreamContinue { data } => {
                w.sized_bytes32(data)?;
            }
            Self::Raw { body, .. } => {
                w.bytes(body);
            }
        }
        Ok(())
    }

    fn read(r: &mut Reader<'_>, rop_id: RopId) -> Result<Self, CodecError> {
        Ok(match rop_id {
            RopId::Logon => {
                let logon_flags = r.u8()?;
                let open_flags = r.u32()?;
                let store_state = r.u32()?;
                let raw = r.sized_bytes16()?;
                let essdn = if raw.is_empty() {
                    String::new()
                } else {
                    Reader::new(raw).string8()?
                };
                Self::Logon {
                    logon_flags,
                    open_flags,
                    store_state,
                    essdn,
                }
            }
            RopId::Release => Self::Release,
            RopId::CommitStream => Self::CommitStream,
            RopId::TransportSend => Self::TransportSend,
            RopId::SynchronizationGetTransferState => Self::SynchronizationGetTransferState,
            RopId::SynchronizationUploadStateStreamEnd => Self::SynchronizationUploadStateStreamEnd,
            RopId::OpenFolder => Self::OpenFolder {
                folder_id: ShortTermId::read(r)?,
                open_mode: r.u8()?,
            },
            RopId::OpenMessage => Self::OpenMessage {
                code_page: r.u16()?,
                folder_id: ShortTermId::read(r)?,
                open_mode: r.u8()?,
                message_id: ShortTermId::read(r)?,
            },
            RopId::CreateMessage => Self::CreateMessage {
                code_page: r.u16()?,
                folder_id: ShortTermId::read(r)?,
                associated: r.bool8()?,
            },
            RopId::GetPropertiesAll => Self::GetPropertiesAll {
                size_limit: r.u16()?,
                want_unicode: r.u16()? != 0,
            },
            RopId::SetProperties => {
                let inner = r.sized_bytes16()?;
                let mut inner = Reader::new(inner);
                let values = read_tagged_values(&mut inner)?;
                expect_consumed(&inner, "PropertyValueSize")?;
                Self::SetProperties { values }
            }
            RopId::SaveChangesMessage => Self::SaveChangesMessage {
                save_flags: r.u8()?,
            },
            RopId::CreateFolder => {
                let folder_type = r.u8()?;
                let use_unicode = r.bool8()?;
                let open_existing = r.bool8()?;
                r.u8()?;
                let (display_name, comment) = if use_unicode {
                    (r.unicode()?, r.unicode()?)
                } else {
                    (r.string8()?, r.string8()?)
                };
                Self::CreateFolder {
                    folder_type,
                    use_unicode,
                    open_existing,
                    display_name,
                    comment,
                }
            }
            RopId::DeleteFolder => Self::DeleteFolder {
                flags: r.u8()?,
                folder_id: ShortTermId::read(r)?,
            },
            RopId::HardDeleteMessages => Self::HardDeleteMessages {
                want_asynchronous: r.bool8()?,
                notify_non_read: r.bool8()?,
                message_ids: read_ids(r)?,
            },
            RopId::EmptyFolder => Self::EmptyFolder {
                want_asynchronous: r.bool8()?,
                want_delete_associated: r.bool8()?,
            },
            RopId::Progress => Self::Progress {
                want_cancel: r.bool8()?,
            },
            RopId::OpenStream => Self::OpenStream {
                tag: PropertyTag(r.u32()?),
                open_mode: r.u8()?,
            },
            RopId::ReadStream => {
                let byte_count = r.u16()?;
                let maximum_byte_count = if byte_count == BUFFER_SIZE_SERVER_CHOICE {
                    r.u32()?
                } else {
                    0
                };
                Self::ReadStream {
                    byte_count,
                    maximum_byte_count,
                }
            }
            RopId::WriteStream => Self::WriteStream {
                data: r.sized_bytes16()?.to_vec(),
            },
            RopId::CopyTo => Self::CopyTo {
                want_asynchronous: r.bool8()?,
                want_sub_objects: r.bool8()?,
                copy_flags: r.u8()?,
                excluded_tags: read_tags(r)?,
            },
            RopId::CopyProperties => Self::CopyProperties {
                want_asynchronous: r.bool8()?,
                copy_flags: r.u8()?,
                tags: read_tags(r)?,
            },
            RopId::CopyToStream => Self::CopyToStream {
                byte_count: r.u64()?,
            },
            RopId::SubmitMessage => Self::SubmitMessage {
                submit_flags: r.u8()?,
            },
            RopId::AbortSubmit => Self::AbortSubmit {
                folder_id: ShortTermId::read(r)?,
                message_id: ShortTermId::read(r)?,
            },
            RopId::LongTermIdFromId => Self::LongTermIdFromId {
                object_id: ShortTermId::read(r)?,
            },
            RopId::IdFromLongTermId => Self::IdFromLongTermId {
                long_term_id: LongTermId::read(r)?,
            },
            RopId::GetLocalReplicaIds => Self::GetLocalReplicaIds {
                id_count: r.u32()?,
            },
            RopId::FastTransferSourceCopyTo => Self::FastTransferSourceCopyTo {
                level: r.u8()?,
                copy_flags: r.u32()?,
                send_options: r.u8()?,
                excluded_tags: read_tags(r)?,
            },
            RopId::FastTransferSourceCopyProperties => Self::FastTransferSourceCopyProperties {
                level: r.u8()?,
                copy_flags: r.u8()?,
                send_options: r.u8()?,
                tags: read_tags(r)?,
            },
            RopId::FastTransferSourceCopyMessages => Self::FastTransferSourceCopyMessages {
                message_ids: read_ids(r)?,
                copy_flags: r.u8()?,
                send_options: r.u8()?,
            },
            RopId::FastTransferSourceCopyFolder => Self::FastTransferSourceCopyFolder {
                copy_flags: r.u8()?,
                send_options: r.u8()?,
            },
            RopId::FastTransferSourceGetBuffer => {
                let buffer_size = r.u16()?;
                let maximum_buffer_size = if buffer_size == BUFFER_SIZE_SERVER_CHOICE {
                    r.u16()?
                } else {
                    0
                };
                Self::FastTransferSourceGetBuffer {
                    buffer_size,
                    maximum_buffer_size,
                }
            }
            RopId::FastTransferDestinationConfigure => Self::FastTransferDestinationConfigure {
                source_operation: r.u8()?,
                copy_flags: r.u8()?,
            },
            RopId::FastTransferDestinationPutBuffer => Self::FastTransferDestinationPutBuffer {
                data: r.sized_bytes16()?.to_vec(),
            },
            RopId::TellVersion => Self::TellVersion {
                version: [r.u16()?, r.u16()?, r.u16()?],
            },
            RopId::SynchronizationConfigure => Self::SynchronizationConfigure {
                sync_type: r.u8()?,
                send_options: r.u8()?,
                sync_flags: r.u16()?,
                restriction: r.sized_bytes16()?.to_vec(),
                extra_flags: r.u32()?,
                tags: read_tags(r)?,
            },
            RopId::SynchronizationOpenCollector => Self::SynchronizationOpenCollector {
                is_contents_collector: r.bool8()?,
            },
            RopId::SynchronizationImportMessageChange => {
                Self::SynchronizationImportMessageChange {
                    import_flag: r.u8()?,
                    values: read_tagged_values(r)?,
                }
            }
            RopId::SynchronizationImportHierarchyChange => {
                Self::SynchronizationImportHierarchyChange {
                    hierarchy_values: read_tagged_values(r)?,
                    values: read_tagged_values(r)?,
                }
            }
            RopId::SynchronizationImportDeletes => Self::SynchronizationImportDeletes {
                flags: r.u8()?,
                values: read_tagged_values(r)?,
            },
            RopId::SynchronizationImportMessageMove => Self::SynchronizationImportMessageMove {
                source_folder_id: r.sized_bytes32()?.to_vec(),
                source_message_id: r.sized_bytes32()?.to_vec(),
                predecessor_change_list: r.sized_bytes32()?.to_vec(),
                destination_message_id: r.sized_bytes32()?.to_vec(),
                change_number: r.sized_bytes32()?.to_vec(),
            },
            RopId::SynchronizationImportReadStateChanges => {
                let inner = r.sized_bytes16()?;
                let mut inner = Reader::new(inner);
                let mut states = Vec::new();
                while !inner.is_empty() {
                    states.push(MessageReadState {
                        message_id: inner.sized_bytes16()?.to_vec(),
                        mark_as_read: inner.bool8()?,
                    });
                }
                Self::SynchronizationImportReadStateChanges { states }
            }
            RopId::SynchronizationUploadStateStreamBegin => {
                Self::SynchronizationUploadStateStreamBegin {
                    state_property: PropertyTag(r.u32()?),
                    buffer_size: r.u32()?,
                }
            }
            RopId::SynchronizationUploadStateStreamContinue => {
                Self::SynchronizationUploadStateStreamContinue {
                    data: r.sized_bytes32()?.to_vec(),
                }
            }
            other => return Err(CodecError::UnsupportedRopId(other.as_u8())),
        })
    }
}

/// A request: shared envelope plus type-specific payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RopRequest {
    /// Logon the ROP acts under
    pub logon_id: u8,
    /// Handle index fields
    pub handles: HandleIndices,
    /// Type-specific fields
    pub payload: RequestPayload,
}

impl RopRequest {
    /// Assemble a request
    #[must_use]
    pub fn new(logon_id: u8, handles: HandleIndices, payload: RequestPayload) -> Self {
        Self {
            logon_id,
            handles,
            payload,
        }
    }

    /// RopId of the payload
    #[must_use]
    pub fn rop_id(&self) -> RopId {
        self.payload.rop_id()
    }

    /// Encode the request
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::HandleShapeMismatch`] when the handle indices
    /// do not match the RopId's layout, or a length error from the payload.
    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        let rop_id = self.rop_id();
        if let Some(shape) = rop_id.handle_shape() {
            if shape != self.handles.shape() {
                return Err(CodecError::HandleShapeMismatch(rop_id.as_u8()));
            }
        }
        w.u8(rop_id.as_u8()).u8(self.logon_id);
        self.handles.write(w);
        self.payload.write(w)
    }

    /// Encode to a fresh vector
    ///
    /// # Errors
    ///
    /// See [`Self::encode`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = Writer::new();
        self.encode(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Decode one request
    ///
    /// # Errors
    ///
    /// Fails for reserved RopIds, RopIds without a payload schema, and
    /// truncated payloads.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let rop_id = RopId::try_from(r.u8()?)?;
        let shape = rop_id
            .handle_shape()
            .ok_or(CodecError::UnsupportedRopId(rop_id.as_u8()))?;
        let logon_id = r.u8()?;
        let handles = HandleIndices::read(r, shape)?;
        let payload = RequestPayload::read(r, rop_id)?;
        Ok(Self {
            logon_id,
            handles,
            payload,
        })
    }
}

fn write_ids(w: &mut Writer, ids: &[ShortTermId]) -> Result<(), CodecError> {
    let count = u16::try_from(ids.len()).map_err(|_| CodecError::InvalidValue {
        field: "id count",
        value: ids.len() as u64,
    })?;
    w.u16(count);
    for id in ids {
        id.write(w);
    }
    Ok(())
}

fn read_ids(r: &mut Reader<'_>) -> Result<Vec<ShortTermId>, CodecError> {
    let count = r.u16()?;
    (0..count).map(|_| ShortTermId::read(r)).collect()
}

fn expect_consumed(r: &Reader<'_>, field: &'static str) -> Result<(), CodecError> {
    if r.is_empty() {
        Ok(())
    } else {
        Err(CodecError::SizeMismatch {
            field,
            declared: r.position(),
            available: r.position() + r.remaining(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::GlobalCounter;
    use crate::property::{PropertyValue, tags};

    fn roundtrip(request: &RopRequest) -> RopRequest {
        let bytes = request.to_bytes().unwrap();
        let mut r = Reader::new(&bytes);
        let decoded = RopRequest::decode(&mut r).unwrap();
        assert!(r.is_empty(), "trailing bytes after {:?}", request.rop_id());
        decoded
    }

    fn fid(counter: u64) -> ShortTermId {
        ShortTermId::new(1, GlobalCounter::truncating(counter))
    }

    #[test]
    fn test_envelope_layout() {
        let request = RopRequest::new(
            3,
            HandleIndices::InputOutput {
                input: 0,
                output: 1,
            },
            RequestPayload::OpenFolder {
                folder_id: fid(5),
                open_mode: 0,
            },
        );
        let bytes = request.to_bytes().unwrap();
        assert_eq!(&bytes[..4], &[0x02, 3, 0, 1]);
        assert_eq!(bytes.len(), 4 + 8 + 1);
        assert_eq!(roundtrip(&request), request);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let request = RopRequest::new(0, HandleIndices::Input(0), RequestPayload::CopyToStream {
            byte_count: 1,
        });
        assert_eq!(
            request.to_bytes(),
            Err(CodecError::HandleShapeMismatch(0x3A))
        );
    }

    #[test]
    fn test_logon_and_release() {
        let logon = RopRequest::new(0, HandleIndices::Output(0), RequestPayload::Logon {
            logon_flags: 0x01,
            open_flags: 0x0100_0000,
            store_state: 0,
            essdn: "/o=Org/cn=User".into(),
        });
        assert_eq!(roundtrip(&logon), logon);

        let release = RopRequest::new(0, HandleIndices::Input(2), RequestPayload::Release);
        assert_eq!(release.to_bytes().unwrap(), vec![0x01, 0, 2]);
    }

    #[test]
    fn test_copy_to_dual_handles() {
        let request = RopRequest::new(
            0,
            HandleIndices::SourceDest { source: 1, dest: 2 },
            RequestPayload::CopyTo {
                want_asynchronous: false,
                want_sub_objects: true,
                copy_flags: 0,
                excluded_tags: vec![tags::SUBJECT],
            },
        );
        let bytes = request.to_bytes().unwrap();
        assert_eq!(&bytes[..4], &[0x39, 0, 1, 2]);
        assert_eq!(roundtrip(&request), request);
    }

    #[test]
    fn test_sync_payloads() {
        let requests = vec![
            RopRequest::new(
                0,
                HandleIndices::InputOutput {
                    input: 1,
                    output: 2,
                },
                RequestPayload::SynchronizationConfigure {
                    sync_type: 1,
                    send_options: 0,
                    sync_flags: 0x0030,
                    restriction: vec![],
                    extra_flags: 0x01,
                    tags: vec![],
                },
            ),
            RopRequest::new(
                0,
                HandleIndices::InputOutput {
                    input: 2,
                    output: 3,
                },
                RequestPayload::SynchronizationImportMessageChange {
                    import_flag: 0x40,
                    values: vec![TaggedValue::new(
                        tags::SOURCE_KEY,
                        PropertyValue::Binary(vec![1; 22]),
                    )],
                },
            ),
            RopRequest::new(
                0,
                HandleIndices::Input(2),
                RequestPayload::SynchronizationImportReadStateChanges {
                    states: vec![MessageReadState {
                        message_id: vec![9; 22],
                        mark_as_read: true,
                    }],
                },
            ),
            RopRequest::new(
                0,
                HandleIndices::Input(2),
                RequestPayload::SynchronizationUploadStateStreamContinue {
                    data: vec![0xAA; 40],
                },
            ),
        ];
        for request in &requests {
            assert_eq!(&roundtrip(request), request);
        }
    }

    #[test]
    fn test_get_buffer_server_choice() {
        let request = RopRequest::new(0, HandleIndices::Input(1), RequestPayload::FastTransferSourceGetBuffer {
            buffer_size: BUFFER_SIZE_SERVER_CHOICE,
            maximum_buffer_size: 0x4000,
        });
        let bytes = request.to_bytes().unwrap();
        assert_eq!(bytes.len(), 3 + 2 + 2);
        assert_eq!(roundtrip(&request), request);

        let plain = RopRequest::new(0, HandleIndices::Input(1), RequestPayload::FastTransferSourceGetBuffer {
            buffer_size: 100,
            maximum_buffer_size: 0,
        });
        assert_eq!(plain.to_bytes().unwrap().len(), 3 + 2);
    }

    #[test]
    fn test_unsupported_rop_rejected() {
        // RopGetHierarchyTable has no payload schema here
        let mut r = Reader::new(&[0x04, 0, 0, 1, 0]);
        assert_eq!(
            RopRequest::decode(&mut r),
            Err(CodecError::UnsupportedRopId(0x04))
        );
        let mut r = Reader::new(&[0x00, 0, 0]);
        assert_eq!(RopRequest::decode(&mut r), Err(CodecError::ReservedRopId(0)));
    }

    #[test]
    fn test_raw_payload_encodes_verbatim() {
        let request = RopRequest::new(0, HandleIndices::InputOutput { input: 0, output: 1 }, RequestPayload::Raw {
            rop_id: RopId::GetHierarchyTable,
            body: vec![0x04],
        });
        assert_eq!(request.to_bytes().unwrap(), vec![0x04, 0, 0, 1, 0x04]);
    }
}
