//! Server-side objects named by handles

use std::collections::{HashMap, VecDeque};

use ropwire_core::{GlobalCounter, NULL_HANDLE, PropertyTag, ServerObjectHandle, ShortTermId};
use ropwire_fxics::{DestinationContext, SourceContext};

use crate::error::{Result, ServerError};
use crate::store::{ChangeStamp, DeleteTarget, MessageDraft};
use crate::sync::SyncContext;

/// Asynchronous EmptyFolder still in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyJob {
    /// Objects left to delete
    pub pending: VecDeque<DeleteTarget>,
    /// Objects the job started with
    pub total: u32,
    /// Objects deleted so far
    pub completed: u32,
}

/// An open folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderObject {
    /// Folder id
    pub id: ShortTermId,
    /// Pending asynchronous empty
    pub job: Option<EmptyJob>,
}

/// An open or new message; edits stay here until SaveChangesMessage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageObject {
    /// Containing folder
    pub folder: ShortTermId,
    /// Message id, allocated at creation
    pub id: ShortTermId,
    /// Folder-associated information
    pub associated: bool,
    /// Uncommitted content
    pub draft: MessageDraft,
    /// Never saved
    pub is_new: bool,
    /// Version to save with instead of a local one
    pub imported: Option<ChangeStamp>,
    /// Change number of the stored version this object was opened at
    pub base: Option<GlobalCounter>,
}

/// Owner of a stream's property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamParent {
    /// Property of an open message, written back to its draft
    Message(ServerObjectHandle),
    /// Property of a folder, written straight to the store
    Folder(ShortTermId),
}

/// An open property stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamObject {
    /// Where CommitStream writes
    pub parent: StreamParent,
    /// Streamed property
    pub tag: PropertyTag,
    /// Current value bytes
    pub data: Vec<u8>,
    /// Seek position
    pub position: usize,
    /// Opened for writing
    pub writable: bool,
    /// Written since the last commit
    pub dirty: bool,
}

impl StreamObject {
    /// Read up to `count` bytes from the current position
    pub fn read(&mut self, count: usize) -> Vec<u8> {
        let end = self.position.saturating_add(count).min(self.data.len());
        let start = self.position.min(end);
        self.position = end;
        self.data[start..end].to_vec()
    }

    /// Write at the current position, growing the value as needed
    ///
    /// # Errors
    ///
    /// [`ServerError::StreamReadOnly`] for a read-only stream.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(ServerError::StreamReadOnly);
        }
        let end = self.position + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        self.dirty = true;
        Ok(bytes.len())
    }

    /// Bytes after the current position
    #[must_use]
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.position.min(self.data.len())..]
    }
}

/// Where a FastTransfer upload lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationTarget {
    /// Folder contents go to the store directly
    Folder(ShortTermId),
    /// Message contents go into an open message's draft
    Message(ServerObjectHandle),
}

/// FastTransfer upload context
#[derive(Debug)]
pub struct DestinationObject {
    /// Stream state
    pub context: DestinationContext,
    /// Object receiving the items
    pub target: DestinationTarget,
}

/// Every kind of object a handle can name
#[derive(Debug)]
pub enum ServerObject {
    /// Mailbox logon
    Logon,
    /// Open folder
    Folder(FolderObject),
    /// Open message
    Message(Box<MessageObject>),
    /// Open property stream
    Stream(StreamObject),
    /// FastTransfer download
    FastTransferSource(Box<SourceContext>),
    /// FastTransfer upload
    FastTransferDestination(Box<DestinationObject>),
    /// ICS download or collector
    Sync(Box<SyncContext>),
}

impl ServerObject {
    /// Name for logs
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Logon => "logon",
            Self::Folder(_) => "folder",
            Self::Message(_) => "message",
            Self::Stream(_) => "stream",
            Self::FastTransferSource(_) => "fast transfer source",
            Self::FastTransferDestination(_) => "fast transfer destination",
            Self::Sync(_) => "synchronization context",
        }
    }
}

/// An object and the logon that owns it
#[derive(Debug)]
pub struct ObjectEntry {
    /// Owning logon
    pub logon_id: u8,
    /// The object
    pub object: ServerObject,
}

/// Objects of one session by server handle
///
/// Handles count up from 1 and are never reused within a session, so a
/// stale handle can never reach a newer object.
#[derive(Debug)]
pub struct ObjectRegistry {
    entries: HashMap<u32, ObjectEntry>,
    next: u32,
    limit: usize,
}

impl ObjectRegistry {
    /// Registry holding at most `limit` objects
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            next: 1,
            limit,
        }
    }

    /// Number of live objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no object is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register an object
    ///
    /// # Errors
    ///
    /// [`ServerError::TooManyHandles`] when the limit is reached or the
    /// handle space is spent.
    pub fn insert(&mut self, logon_id: u8, object: ServerObject) -> Result<ServerObjectHandle> {
        if self.entries.len() >= self.limit || self.next == NULL_HANDLE {
            return Err(ServerError::TooManyHandles);
        }
        let handle = self.next;
        self.next += 1;
        tracing::trace!("Handle {:#X}: {} for logon {}", handle, object.type_name(), logon_id);
        self.entries.insert(handle, ObjectEntry { logon_id, object });
        Ok(ServerObjectHandle(handle))
    }

    /// Entry for `handle`
    #[must_use]
    pub fn get(&self, handle: ServerObjectHandle) -> Option<&ObjectEntry> {
        self.entries.get(&handle.as_u32())
    }

    /// Mutable entry for `handle`
    pub fn get_mut(&mut self, handle: ServerObjectHandle) -> Option<&mut ObjectEntry> {
        self.entries.get_mut(&handle.as_u32())
    }

    /// Remove one object
    pub fn remove(&mut self, handle: ServerObjectHandle) -> Option<ObjectEntry> {
        self.entries.remove(&handle.as_u32())
    }

    /// Drop every object of a logon, returning their handles
    pub fn release_logon(&mut self, logon_id: u8) -> Vec<u32> {
        let mut handles: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| e.logon_id == logon_id)
            .map(|(&h, _)| h)
            .collect();
        handles.sort_unstable();
        for handle in &handles {
            self.entries.remove(handle);
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(counter: u64) -> ServerObject {
        ServerObject::Folder(FolderObject {
            id: ShortTermId::new(1, GlobalCounter::truncating(counter)),
            job: None,
        })
    }

    #[test]
    fn test_handles_are_not_reused() {
        let mut registry = ObjectRegistry::new(8);
        let a = registry.insert(0, ServerObject::Logon).unwrap();
        registry.remove(a);
        let b = registry.insert(0, folder(1)).unwrap();
        assert_ne!(a, b);
        assert!(registry.get(a).is_none());
    }

    #[test]
    fn test_limit() {
        let mut registry = ObjectRegistry::new(2);
        registry.insert(0, ServerObject::Logon).unwrap();
        registry.insert(0, folder(1)).unwrap();
        assert_eq!(registry.insert(0, folder(2)).unwrap_err(), ServerError::TooManyHandles);
    }

    #[test]
    fn test_release_logon_only_drops_its_objects() {
        let mut registry = ObjectRegistry::new(8);
        let keep = registry.insert(1, ServerObject::Logon).unwrap();
        let a = registry.insert(0, ServerObject::Logon).unwrap();
        let b = registry.insert(0, folder(3)).unwrap();
        assert_eq!(registry.release_logon(0), vec![a.as_u32(), b.as_u32()]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(keep).is_some());
    }

    #[test]
    fn test_stream_write_extends_and_read_clamps() {
        let mut stream = StreamObject {
            parent: StreamParent::Folder(ShortTermId::NONE),
            tag: PropertyTag(0x1000_0102),
            data: b"abc".to_vec(),
            position: 2,
            writable: true,
            dirty: false,
        };
        assert_eq!(stream.write(b"XYZ").unwrap(), 3);
        assert_eq!(stream.data, b"abXYZ");
        stream.position = 3;
        assert_eq!(stream.read(10), b"YZ");
        assert!(stream.read(1).is_empty());
        stream.writable = false;
        assert_eq!(stream.write(b"q"), Err(ServerError::StreamReadOnly));
    }
}
