//! ROP response bodies.

use serde::Serialize;

use crate::error::CodecError;
use crate::handle::ServerObjectHandle;
use crate::ids::{GlobalCounter, LongTermId, ReplicaGuid, ShortTermId};
use crate::property::{PropertyTag, TaggedValue, read_tagged_values, write_tagged_values};
use crate::return_value::ReturnValue;
use crate::rop_id::RopId;
use crate::wire::{Reader, Writer};

/// Number of special folder ids in a private-mailbox logon response
pub const LOGON_FOLDER_COUNT: usize = 13;

/// Progress of a FastTransfer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u16)]
pub enum TransferStatus {
    /// Stream failed
    Error = 0x0000,
    /// More data follows
    Partial = 0x0001,
    /// Buffer had no room for the next element
    NoRoom = 0x0002,
    /// Stream complete
    Done = 0x0003,
}

impl TryFrom<u16> for TransferStatus {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, CodecError> {
        match value {
            0x0000 => Ok(TransferStatus::Error),
            0x0001 => Ok(TransferStatus::Partial),
            0x0002 => Ok(TransferStatus::NoRoom),
            0x0003 => Ok(TransferStatus::Done),
            other => Err(CodecError::InvalidValue {
                field: "TransferStatus",
                value: u64::from(other),
            }),
        }
    }
}

/// Per-property failure reported by SetProperties and the copy ROPs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PropertyProblem {
    /// Position of the property in the request
    pub index: u16,
    /// Property that failed
    pub tag: PropertyTag,
    /// Failure code
    pub error: ReturnValue,
}

/// Wall-clock time of a logon
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LogonTime {
    pub seconds: u8,
    pub minutes: u8,
    pub hour: u8,
    pub day_of_week: u8,
    pub day: u8,
    pub month: u8,
    pub year: u16,
}

/// Successful private-mailbox logon
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogonResponse {
    /// Echo of the request flags
    pub logon_flags: u8,
    /// Root, spooler queue, IPM subtree, inbox and the other special folders
    pub folder_ids: [ShortTermId; LOGON_FOLDER_COUNT],
    /// Ownership flags
    pub response_flags: u8,
    /// Mailbox identity
    pub mailbox_guid: ReplicaGuid,
    /// Replica id used in short-term ids of this store
    pub replica_id: u16,
    /// Replica GUID paired with `replica_id`
    pub replica_guid: ReplicaGuid,
    /// Logon time
    pub logon_time: LogonTime,
    /// Address-book GWART time
    pub gwart_time: u64,
    /// Store state flags
    pub store_state: u32,
}

/// Type-specific response fields
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ResponseBody {
    /// No body: failures and ROPs without success fields
    Empty,
    Logon(Box<LogonResponse>),
    OpenFolder {
        has_rules: bool,
        is_ghosted: bool,
    },
    OpenMessage {
        has_named_properties: bool,
        subject_prefix: Option<String>,
        normalized_subject: Option<String>,
        recipient_count: u16,
    },
    CreateMessage {
        message_id: Option<ShortTermId>,
    },
    GetPropertiesAll {
        values: Vec<TaggedValue>,
    },
    /// SetProperties, CopyTo and CopyProperties
    PropertyProblems {
        problems: Vec<PropertyProblem>,
    },
    SaveChangesMessage {
        input_handle_index: u8,
        message_id: ShortTermId,
    },
    CreateFolder {
        folder_id: ShortTermId,
        is_existing: bool,
        has_rules: bool,
        is_ghosted: bool,
    },
    /// DeleteFolder, HardDeleteMessages and EmptyFolder
    PartialCompletion {
        partial: bool,
    },
    Progress {
        logon_id: u8,
        completed: u32,
        total: u32,
    },
    OpenStream {
        stream_size: u32,
    },
    ReadStream {
        data: Vec<u8>,
    },
    WriteStream {
        written_size: u16,
    },
    /// Dual-handle failure with `ecDstNullObject`
    NullDestination {
        dest_handle_index: u32,
    },
    CopyToStream {
        read_byte_count: u64,
        written_byte_count: u64,
    },
    /// CopyToStream failure with `ecDstNullObject`
    NullDestinationStream {
        dest_handle_index: u32,
        read_byte_count: u64,
        written_byte_count: u64,
    },
    TransportSend {
        values: Option<Vec<TaggedValue>>,
    },
    LongTermIdFromId {
        long_term_id: LongTermId,
    },
    IdFromLongTermId {
        object_id: ShortTermId,
    },
    GetLocalReplicaIds {
        replica_guid: ReplicaGuid,
        global_count: GlobalCounter,
    },
    GetBuffer {
        status: TransferStatus,
        in_progress_count: u16,
        total_step_count: u16,
        data: Vec<u8>,
    },
    PutBuffer {
        status: TransferStatus,
        in_progress_count: u16,
        total_step_count: u16,
        buffer_used_size: u16,
    },
    /// ImportMessageChange, ImportHierarchyChange and ImportMessageMove
    ImportedId {
        id: u64,
    },
}

impl ResponseBody {
    fn write(&self, w: &mut Writer) -> Result<(), CodecError> {
        match self {
            Self::Empty => {}
            Self::Logon(logon) => {
                w.u8(logon.logon_flags);
                for id in &logon.folder_ids {
                    id.write(w);
                }
                w.u8(logon.response_flags)
                    .bytes(logon.mailbox_guid.as_bytes())
                    .u16(logon.replica_id)
                    .bytes(logon.replica_guid.as_bytes());
                let t = &logon.logon_time;
                w.u8(t.seconds)
                    .u8(t.minutes)
                    .u8(t.hour)
                    .u8(t.day_of_week)
                    .u8(t.day)
                    .u8(t.month)
                    .u16(t.year);
                w.u64(logon.gwart_time).u32(logon.store_state);
            }
            Self::OpenFolder {
                has_rules,
                is_ghosted,
            } => {
                w.bool8(*has_rules).bool8(*is_ghosted);
            }
            Self::OpenMessage {
                has_named_properties,
                subject_prefix,
                normalized_subject,
                recipient_count,
            } => {
                w.bool8(*has_named_properties);
                write_typed_string(w, subject_prefix.as_deref());
                write_typed_string(w, normalized_subject.as_deref());
                // RecipientCount, ColumnCount, RowCount
                w.u16(*recipient_count).u16(0).u8(0);
            }
            Self::CreateMessage { message_id } => match message_id {
                Some(id) => {
                    w.u8(1);
                    id.write(w);
                }
                None => {
                    w.u8(0);
                }
            },
            Self::GetPropertiesAll { values } => write_tagged_values(w, values)?,
            Self::PropertyProblems { problems } => {
                w.u16(problems.len() as u16);
                for p in problems {
                    w.u16(p.index).u32(p.tag.0).u32(p.error.0);
                }
            }
            Self::SaveChangesMessage {
                input_handle_index,
                message_id,
            } => {
                w.u8(*input_handle_index);
                message_id.write(w);
            }
            Self::CreateFolder {
                folder_id,
                is_existing,
                has_rules,
                is_ghosted,
            } => {
                folder_id.write(w);
                w.bool8(*is_existing);
                if *is_existing {
                    w.bool8(*has_rules).bool8(*is_ghosted);
                }
            }
            Self::PartialCompletion { partial } => {
                w.bool8(*partial);
            }
            Self::Progress {
                logon_id,
                completed,
                total,
            } => {
                w.u8(*logon_id).u32(*completed).u32(*total);
            }
            Self::OpenStream { stream_size } => {
                w.u32(*stream_size);
            }
            Self::ReadStream { data } => {
                w.sized_bytes16(data)?;
            }
            Self::WriteStream { written_size } => {
                w.u16(*written_size);
            }
            Self::NullDestination { dest_handle_index } => {
                w.u32(*dest_handle_index);
            }
            Self::CopyToStream {
                read_byte_count,
                written_byte_count,
            } => {
                w.u64(*read_byte_count).u64(*written_byte_count);
            }
            Self::NullDestinationStream {
                dest_handle_index,
                read_byte_count,
                written_byte_count,
            } => {
                w.u32(*dest_handle_index)
                    .u64(*read_byte_count)
                    .u64(*written_byte_count);
            }
            Self::TransportSend { values } => match values {
                Some(values) => {
                    w.u8(0);
                    write_tagged_values(w, values)?;
                }
                None => {
                    w.u8(1);
                }
            },
            Self::LongTermIdFromId { long_term_id } => long_term_id.write(w),
            Self::IdFromLongTermId { object_id } => object_id.write(w),
            Self::GetLocalReplicaIds {
                replica_guid,
                global_count,
            } => {
                w.bytes(replica_guid.as_bytes()).bytes(&global_count.to_bytes());
            }
            Self::GetBuffer {
                status,
                in_progress_count,
                total_step_count,
                data,
            } => {
                w.u16(*status as u16)
                    .u16(*in_progress_count)
                    .u16(*total_step_count)
                    .u8(0);
                w.sized_bytes16(data)?;
            }
            Self::PutBuffer {
                status,
                in_progress_count,
                total_step_count,
                buffer_used_size,
            } => {
                w.u16(*status as u16)
                    .u16(*in_progress_count)
                    .u16(*total_step_count)
                    .u8(0)
                    .u16(*buffer_used_size);
            }
            Self::ImportedId { id } => {
                w.u64(*id);
            }
        }
        Ok(())
    }

    fn read(r: &mut Reader<'_>, rop_id: RopId, rv: ReturnValue) -> Result<Self, CodecError> {
        if rv == ReturnValue::NULL_DESTINATION_OBJECT {
            match rop_id {
                RopId::CopyTo | RopId::CopyProperties => {
                    return Ok(Self::NullDestination {
                        dest_handle_index: r.u32()?,
                    });
                }
                RopId::CopyToStream => {
                    return Ok(Self::NullDestinationStream {
                        dest_handle_index: r.u32()?,
                        read_byte_count: r.u64()?,
                        written_byte_count: r.u64()?,
                    });
                }
                _ => {}
            }
        }
        if rop_id == RopId::FastTransferDestinationPutBuffer {
            return Ok(Self::PutBuffer {
                status: TransferStatus::try_from(r.u16()?)?,
                in_progress_count: r.u16()?,
                total_step_count: r.u16()?,
                buffer_used_size: {
                    r.u8()?;
                    r.u16()?
                },
            });
        }
        if !rv.is_success() {
            return Ok(Self::Empty);
        }
        Ok(match rop_id {
            RopId::Logon => {
                let logon_flags = r.u8()?;
                let mut folder_ids = [ShortTermId::NONE; LOGON_FOLDER_COUNT];
                for id in &mut folder_ids {
                    *id = ShortTermId::read(r)?;
                }
                let response_flags = r.u8()?;
                let mailbox_guid = ReplicaGuid(r.array()?);
                let replica_id = r.u16()?;
                let replica_guid = ReplicaGuid(r.array()?);
                let logon_time = LogonTime {
                    seconds: r.u8()?,
                    minutes: r.u8()?,
                    hour: r.u8()?,
                    day_of_week: r.u8()?,
                    day: r.u8()?,
                    month: r.u8()?,
                    year: r.u16()?,
                };
                Self::Logon(Box::new(LogonResponse {
                    logon_flags,
                    folder_ids,
                    response_flags,
                    mailbox_guid,
                    replica_id,
                    replica_guid,
                    logon_time,
                    gwart_time: r.u64()?,
                    store_state: r.u32()?,
                }))
            }
            RopId::OpenFolder => Self::OpenFolder {
                has_rules: r.bool8()?,
                is_ghosted: r.bool8()?,
            },
            RopId::OpenMessage => {
                let has_named_properties = r.bool8()?;
                let subject_prefix = read_typed_string(r)?;
                let normalized_subject = read_typed_string(r)?;
                let recipient_count = r.u16()?;
                let column_count = r.u16()?;
                let row_count = r.u8()?;
                if column_count != 0 || row_count != 0 {
                    return Err(CodecError::InvalidValue {
                        field: "OpenMessage recipient rows",
                        value: u64::from(row_count),
                    });
                }
                Self::OpenMessage {
                    has_named_properties,
                    subject_prefix,
                    normalized_subject,
                    recipient_count,
                }
            }
            RopId::CreateMessage => {
                let has_id = r.bool8()?;
                Self::CreateMessage {
                    message_id: if has_id {
                        Some(ShortTermId::read(r)?)
                    } else {
                        None
                    },
                }
            }
            RopId::GetPropertiesAll => Self::GetPropertiesAll {
                values: read_tagged_values(r)?,
            },
            RopId::SetProperties | RopId::CopyTo | RopId::CopyProperties => {
                let count = r.u16()?;
                let problems = (0..count)
                    .map(|_| {
                        Ok(PropertyProblem {
                            index: r.u16()?,
                            tag: PropertyTag(r.u32()?),
                            error: ReturnValue(r.u32()?),
                        })
                    })
                    .collect::<Result<_, CodecError>>()?;
                Self::PropertyProblems { problems }
            }
            RopId::SaveChangesMessage => Self::SaveChangesMessage {
                input_handle_index: r.u8()?,
                message_id: ShortTermId::read(r)?,
            },
            RopId::CreateFolder => {
                let folder_id = ShortTermId::read(r)?;
                let is_existing = r.bool8()?;
                let (has_rules, is_ghosted) = if is_existing {
                    (r.bool8()?, r.bool8()?)
                } else {
                    (false, false)
                };
                Self::CreateFolder {
                    folder_id,
                    is_existing,
                    has_rules,
                    is_ghosted,
                }
            }
            RopId::DeleteFolder | RopId::HardDeleteMessages | RopId::EmptyFolder => {
                Self::PartialCompletion {
                    partial: r.bool8()?,
                }
            }
            RopId::Progress => Self::Progress {
                logon_id: r.u8()?,
                completed: r.u32()?,
                total: r.u32()?,
            },
            RopId::OpenStream => Self::OpenStream {
                stream_size: r.u32()?,
            },
            RopId::ReadStream => Self::ReadStream {
                data: r.sized_bytes16()?.to_vec(),
            },
            RopId::WriteStream => Self::WriteStream {
                written_size: r.u16()?,
            },
            RopId::CopyToStream => Self::CopyToStream {
                read_byte_count: r.u64()?,
                written_byte_count: r.u64()?,
            },
            RopId::TransportSend => {
                let none_returned = r.bool8()?;
                Self::TransportSend {
                    values: if none_returned {
                        None
                    } else {
                        Some(read_tagged_values(r)?)
                    },
                }
            }
            RopId::LongTermIdFromId => Self::LongTermIdFromId {
                long_term_id: LongTermId::read(r)?,
            },
            RopId::IdFromLongTermId => Self::IdFromLongTermId {
                object_id: ShortTermId::read(r)?,
            },
            RopId::GetLocalReplicaIds => Self::GetLocalReplicaIds {
                replica_guid: ReplicaGuid(r.array()?),
                global_count: GlobalCounter::from_bytes(r.array()?),
            },
            RopId::FastTransferSourceGetBuffer => {
                let status = TransferStatus::try_from(r.u16()?)?;
                let in_progress_count = r.u16()?;
                let total_step_count = r.u16()?;
                r.u8()?;
                Self::GetBuffer {
                    status,
                    in_progress_count,
                    total_step_count,
                    data: r.sized_bytes16()?.to_vec(),
                }
            }
            RopId::SynchronizationImportMessageChange
            | RopId::SynchronizationImportHierarchyChange
            | RopId::SynchronizationImportMessageMove => Self::ImportedId { id: r.u64()? },
            RopId::SaveChangesAttachment
            | RopId::SubmitMessage
            | RopId::AbortSubmit
            | RopId::CommitStream
            | RopId::TellVersion
            | RopId::FastTransferSourceCopyTo
            | RopId::FastTransferSourceCopyProperties
            | RopId::FastTransferSourceCopyMessages
            | RopId::FastTransferSourceCopyFolder
            | RopId::FastTransferDestinationConfigure
            | RopId::SynchronizationConfigure
            | RopId::SynchronizationOpenCollector
            | RopId::SynchronizationImportDeletes
            | RopId::SynchronizationImportReadStateChanges
            | RopId::SynchronizationGetTransferState
            | RopId::SynchronizationUploadStateStreamBegin
            | RopId::SynchronizationUploadStateStreamContinue
            | RopId::SynchronizationUploadStateStreamEnd => Self::Empty,
            other => return Err(CodecError::UnsupportedRopId(other.as_u8())),
        })
    }
}

/// A response: shared envelope plus type-specific body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RopResponse {
    /// Echo of the request's RopId
    pub rop_id: RopId,
    /// Output index for handle-creating ROPs, otherwise the input index
    pub handle_index: u8,
    /// Status of this ROP
    pub return_value: ReturnValue,
    /// Type-specific body
    pub body: ResponseBody,
    /// Handle the server bound at `handle_index`, filled in after decoding
    /// the buffer's handle table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_handle: Option<ServerObjectHandle>,
}

impl RopResponse {
    /// Successful response
    #[must_use]
    pub fn success(rop_id: RopId, handle_index: u8, body: ResponseBody) -> Self {
        Self {
            rop_id,
            handle_index,
            return_value: ReturnValue::SUCCESS,
            body,
            bound_handle: None,
        }
    }

    /// Failed response with no body
    #[must_use]
    pub fn failure(rop_id: RopId, handle_index: u8, return_value: ReturnValue) -> Self {
        Self {
            rop_id,
            handle_index,
            return_value,
            body: ResponseBody::Empty,
            bound_handle: None,
        }
    }

    /// Encode the response
    ///
    /// # Errors
    ///
    /// Fails when a variable-length field exceeds its length prefix.
    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.u8(self.rop_id.as_u8())
            .u8(self.handle_index)
            .u32(self.return_value.0);
        self.body.write(w)
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

    /// Decode one response whose RopId has already been read
    ///
    /// # Errors
    ///
    /// Fails on truncated bodies or RopIds without a body schema.
    pub fn decode_after_id(r: &mut Reader<'_>, rop_id: RopId) -> Result<Self, CodecError> {
        let handle_index = r.u8()?;
        let return_value = ReturnValue(r.u32()?);
        let body = ResponseBody::read(r, rop_id, return_value)?;
        Ok(Self {
            rop_id,
            handle_index,
            return_value,
            body,
            bound_handle: None,
        })
    }

    /// Decode one response
    ///
    /// # Errors
    ///
    /// Fails on reserved RopIds, truncated bodies or RopIds without a body
    /// schema.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let rop_id = RopId::try_from(r.u8()?)?;
        Self::decode_after_id(r, rop_id)
    }
}

fn write_typed_string(w: &mut Writer, value: Option<&str>) {
    match value {
        None => {
            w.u8(0x00);
        }
        Some("") => {
            w.u8(0x01);
        }
        Some(text) => {
            w.u8(0x04).unicode(text);
        }
    }
}

fn read_typed_string(r: &mut Reader<'_>) -> Result<Option<String>, CodecError> {
    Ok(match r.u8()? {
        0x00 => None,
        0x01 => Some(String::new()),
        0x02 | 0x03 => Some(r.string8()?),
        0x04 => Some(r.unicode()?),
        other => {
            return Err(CodecError::InvalidValue {
                field: "StringType",
                value: u64::from(other),
            });
        }
    })
}
