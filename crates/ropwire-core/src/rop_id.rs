//! ROP identifiers.
//!
//! Every ROP request and response begins with a one-byte RopId. The set
//! of assigned values is sparse; any unassigned value is reserved and is
//! rejected by [`RopId::try_from`].

use serde::Serialize;

use crate::error::CodecError;

/// How a ROP lays out its handle index fields after the LogonId byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleShape {
    /// A single OutputHandleIndex (Logon)
    Output,
    /// A single InputHandleIndex
    Input,
    /// InputHandleIndex then OutputHandleIndex
    InputOutput,
    /// SourceHandleIndex then DestHandleIndex
    SourceDest,
    /// ResponseHandleIndex then InputHandleIndex (SaveChangesMessage)
    ResponseInput,
}

macro_rules! rop_ids {
    ($( $(#[$doc:meta])* $variant:ident = $value:literal, )+) => {
        /// Assigned ROP identifiers
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[repr(u8)]
        pub enum RopId {
            $( $(#[$doc])* $variant = $value, )+
        }

        impl TryFrom<u8> for RopId {
            type Error = CodecError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok(Self::$variant), )+
                    _ => Err(CodecError::ReservedRopId(value)),
                }
            }
        }

        impl RopId {
            /// Protocol name of the ROP, e.g. `RopOpenFolder`
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => concat!("Rop", stringify!($variant)), )+
                }
            }
        }
    };
}

rop_ids! {
    /// Release a server object
    Release = 0x01,
    /// Open a folder
    OpenFolder = 0x02,
    /// Open a message
    OpenMessage = 0x03,
    /// Open a folder's hierarchy table
    GetHierarchyTable = 0x04,
    /// Open a folder's contents table
    GetContentsTable = 0x05,
    /// Create a message
    CreateMessage = 0x06,
    /// Read selected properties
    GetPropertiesSpecific = 0x07,
    /// Read all properties
    GetPropertiesAll = 0x08,
    /// List property tags
    GetPropertiesList = 0x09,
    /// Write properties
    SetProperties = 0x0A,
    /// Delete properties
    DeleteProperties = 0x0B,
    /// Commit a message
    SaveChangesMessage = 0x0C,
    /// Remove all recipients
    RemoveAllRecipients = 0x0D,
    /// Modify recipients
    ModifyRecipients = 0x0E,
    /// Read recipients
    ReadRecipients = 0x0F,
    /// Reload cached message information
    ReloadCachedInformation = 0x10,
    /// Set the read flag of one message
    SetMessageReadFlag = 0x11,
    /// Set table columns
    SetColumns = 0x12,
    /// Sort a table
    SortTable = 0x13,
    /// Restrict a table
    Restrict = 0x14,
    /// Query table rows
    QueryRows = 0x15,
    /// Table status
    GetStatus = 0x16,
    /// Table position
    QueryPosition = 0x17,
    /// Seek in a table
    SeekRow = 0x18,
    /// Seek to a bookmark
    SeekRowBookmark = 0x19,
    /// Seek to a fraction
    SeekRowFractional = 0x1A,
    /// Create a table bookmark
    CreateBookmark = 0x1B,
    /// Create a folder
    CreateFolder = 0x1C,
    /// Delete a folder
    DeleteFolder = 0x1D,
    /// Delete messages
    DeleteMessages = 0x1E,
    /// Get message status
    GetMessageStatus = 0x1F,
    /// Set message status
    SetMessageStatus = 0x20,
    /// Open the attachment table
    GetAttachmentTable = 0x21,
    /// Open an attachment
    OpenAttachment = 0x22,
    /// Create an attachment
    CreateAttachment = 0x23,
    /// Delete an attachment
    DeleteAttachment = 0x24,
    /// Commit an attachment
    SaveChangesAttachment = 0x25,
    /// Set a receive folder
    SetReceiveFolder = 0x26,
    /// Get a receive folder
    GetReceiveFolder = 0x27,
    /// Register for notifications
    RegisterNotification = 0x29,
    /// Notification delivery
    Notify = 0x2A,
    /// Open a property as a stream
    OpenStream = 0x2B,
    /// Read from a stream
    ReadStream = 0x2C,
    /// Write to a stream
    WriteStream = 0x2D,
    /// Seek in a stream
    SeekStream = 0x2E,
    /// Resize a stream
    SetStreamSize = 0x2F,
    /// Set search criteria
    SetSearchCriteria = 0x30,
    /// Get search criteria
    GetSearchCriteria = 0x31,
    /// Submit a message for delivery
    SubmitMessage = 0x32,
    /// Move or copy messages
    MoveCopyMessages = 0x33,
    /// Abort a submitted message
    AbortSubmit = 0x34,
    /// Move a folder
    MoveFolder = 0x35,
    /// Copy a folder
    CopyFolder = 0x36,
    /// Query all table columns
    QueryColumnsAll = 0x37,
    /// Abort a table operation
    Abort = 0x38,
    /// Copy all properties between objects
    CopyTo = 0x39,
    /// Copy stream content between streams
    CopyToStream = 0x3A,
    /// Clone a stream
    CloneStream = 0x3B,
    /// Open the permissions table
    GetPermissionsTable = 0x3E,
    /// Open the rules table
    GetRulesTable = 0x3F,
    /// Modify permissions
    ModifyPermissions = 0x40,
    /// Modify rules
    ModifyRules = 0x41,
    /// Get owning servers
    GetOwningServers = 0x42,
    /// Short-term to long-term id
    LongTermIdFromId = 0x43,
    /// Long-term to short-term id
    IdFromLongTermId = 0x44,
    /// Public folder ghosting state
    PublicFolderIsGhosted = 0x45,
    /// Open an embedded message
    OpenEmbeddedMessage = 0x46,
    /// Become the spooler
    SetSpooler = 0x47,
    /// Lock a message for the spooler
    SpoolerLockMessage = 0x48,
    /// Get address types
    GetAddressTypes = 0x49,
    /// Send a message immediately
    TransportSend = 0x4A,
    /// FastTransfer download of messages
    FastTransferSourceCopyMessages = 0x4B,
    /// FastTransfer download of a folder
    FastTransferSourceCopyFolder = 0x4C,
    /// FastTransfer download of an object
    FastTransferSourceCopyTo = 0x4D,
    /// Pull a FastTransfer chunk
    FastTransferSourceGetBuffer = 0x4E,
    /// Find a table row
    FindRow = 0x4F,
    /// Progress of an asynchronous operation
    Progress = 0x50,
    /// New mail notification for the transport
    TransportNewMail = 0x51,
    /// Valid attachment numbers
    GetValidAttachments = 0x52,
    /// Configure a FastTransfer upload
    FastTransferDestinationConfigure = 0x53,
    /// Push a FastTransfer chunk
    FastTransferDestinationPutBuffer = 0x54,
    /// Named property names
    GetNamesFromPropertyIds = 0x55,
    /// Named property ids
    GetPropertyIdsFromNames = 0x56,
    /// Deferred action messages
    UpdateDeferredActionMessages = 0x57,
    /// Delete folder contents
    EmptyFolder = 0x58,
    /// Expand a category row
    ExpandRow = 0x59,
    /// Collapse a category row
    CollapseRow = 0x5A,
    /// Lock a stream region
    LockRegionStream = 0x5B,
    /// Unlock a stream region
    UnlockRegionStream = 0x5C,
    /// Commit a stream
    CommitStream = 0x5D,
    /// Stream size
    GetStreamSize = 0x5E,
    /// Query named properties
    QueryNamedProperties = 0x5F,
    /// Per-user long-term ids
    GetPerUserLongTermIds = 0x60,
    /// Per-user guid
    GetPerUserGuid = 0x61,
    /// Read per-user information
    ReadPerUserInformation = 0x63,
    /// Write per-user information
    WritePerUserInformation = 0x64,
    /// Set read flags on many messages
    SetReadFlags = 0x66,
    /// Copy selected properties between objects
    CopyProperties = 0x67,
    /// Receive folder table
    GetReceiveFolderTable = 0x68,
    /// FastTransfer download of selected properties
    FastTransferSourceCopyProperties = 0x69,
    /// Get table collapse state
    GetCollapseState = 0x6B,
    /// Set table collapse state
    SetCollapseState = 0x6C,
    /// Transport folder
    GetTransportFolder = 0x6D,
    /// Pending notification marker
    Pending = 0x6E,
    /// Options data
    OptionsData = 0x6F,
    /// Configure an ICS download
    SynchronizationConfigure = 0x70,
    /// Import a message change
    SynchronizationImportMessageChange = 0x72,
    /// Import a folder change
    SynchronizationImportHierarchyChange = 0x73,
    /// Import deletions
    SynchronizationImportDeletes = 0x74,
    /// Begin a state upload
    SynchronizationUploadStateStreamBegin = 0x75,
    /// Continue a state upload
    SynchronizationUploadStateStreamContinue = 0x76,
    /// End a state upload
    SynchronizationUploadStateStreamEnd = 0x77,
    /// Import a message move
    SynchronizationImportMessageMove = 0x78,
    /// Set properties without replication
    SetPropertiesNoReplicate = 0x79,
    /// Delete properties without replication
    DeletePropertiesNoReplicate = 0x7A,
    /// Store state
    GetStoreState = 0x7B,
    /// Open an ICS upload collector
    SynchronizationOpenCollector = 0x7E,
    /// Reserve local replica ids
    GetLocalReplicaIds = 0x7F,
    /// Import read state changes
    SynchronizationImportReadStateChanges = 0x80,
    /// Reset a table
    ResetTable = 0x81,
    /// Checkpoint ICS state
    SynchronizationGetTransferState = 0x82,
    /// Announce the peer's FastTransfer version
    TellVersion = 0x86,
    /// Free a table bookmark
    FreeBookmark = 0x89,
    /// Write and commit a stream
    WriteAndCommitStream = 0x90,
    /// Permanently delete messages
    HardDeleteMessages = 0x91,
    /// Permanently delete messages and subfolders
    HardDeleteMessagesAndSubfolders = 0x92,
    /// Mark a local replica midset deleted
    SetLocalReplicaMidsetDeleted = 0x93,
    /// Server asks the client to back off
    Backoff = 0xF9,
    /// Open a mailbox or public folder store
    Logon = 0xFE,
    /// Response buffer could not hold the next response
    BufferTooSmall = 0xFF,
}

impl RopId {
    /// Raw byte value
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the server emits a response slot for this ROP
    #[must_use]
    pub fn has_response(self) -> bool {
        !matches!(self, Self::Release)
    }

    /// Whether a successful response binds a new handle at the output index
    #[must_use]
    pub fn creates_handle(self) -> bool {
        matches!(self.handle_shape(), Some(HandleShape::Output | HandleShape::InputOutput))
    }

    /// Operations that name a source and destination object
    #[must_use]
    pub fn is_dual_handle(self) -> bool {
        matches!(self.handle_shape(), Some(HandleShape::SourceDest))
    }

    /// Handle index layout, when known to this codec
    #[must_use]
    pub fn handle_shape(self) -> Option<HandleShape> {
        use HandleShape::{Input, InputOutput, Output, ResponseInput, SourceDest};
        let shape = match self {
            Self::Logon => Output,
            Self::OpenFolder
            | Self::OpenMessage
            | Self::CreateMessage
            | Self::CreateFolder
            | Self::OpenStream
            | Self::GetHierarchyTable
            | Self::GetContentsTable
            | Self::GetAttachmentTable
            | Self::OpenAttachment
            | Self::CreateAttachment
            | Self::OpenEmbeddedMessage
            | Self::FastTransferSourceCopyTo
            | Self::FastTransferSourceCopyProperties
            | Self::FastTransferSourceCopyMessages
            | Self::FastTransferSourceCopyFolder
            | Self::FastTransferDestinationConfigure
            | Self::SynchronizationConfigure
            | Self::SynchronizationOpenCollector
            | Self::SynchronizationImportMessageChange
            | Self::SynchronizationGetTransferState => InputOutput,
            Self::CopyTo
            | Self::CopyProperties
            | Self::CopyToStream
            | Self::MoveCopyMessages
            | Self::MoveFolder
            | Self::CopyFolder => SourceDest,
            Self::SaveChangesMessage | Self::SaveChangesAttachment => ResponseInput,
            Self::Backoff | Self::BufferTooSmall => return None,
            _ => Input,
        };
        Some(shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_from_assigned() {
        assert_eq!(RopId::try_from(0x39).unwrap(), RopId::CopyTo);
        assert_eq!(RopId::try_from(0xFE).unwrap(), RopId::Logon);
        assert_eq!(RopId::try_from(0x52).unwrap(), RopId::GetValidAttachments);
    }

    #[test]
    fn test_try_from_reserved() {
        for reserved in [0x00, 0x28, 0x3C, 0x3D, 0x62, 0x65, 0x6A, 0x71, 0x7C, 0x7D, 0x85, 0xFA] {
            assert_eq!(
                RopId::try_from(reserved),
                Err(CodecError::ReservedRopId(reserved))
            );
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(RopId::OpenFolder.name(), "RopOpenFolder");
        assert_eq!(
            RopId::SynchronizationImportMessageMove.name(),
            "RopSynchronizationImportMessageMove"
        );
    }

    #[test]
    fn test_shapes() {
        assert!(!RopId::Release.has_response());
        assert!(RopId::Logon.creates_handle());
        assert!(RopId::OpenStream.creates_handle());
        assert!(!RopId::SetProperties.creates_handle());
        assert!(RopId::CopyTo.is_dual_handle());
        assert!(RopId::CopyToStream.is_dual_handle());
        assert_eq!(
            RopId::SaveChangesMessage.handle_shape(),
            Some(HandleShape::ResponseInput)
        );
        assert_eq!(RopId::Backoff.handle_shape(), None);
    }
}
