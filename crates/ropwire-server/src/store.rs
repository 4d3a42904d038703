//! In-memory mailbox store.
//!
//! One [`Store`] holds one private mailbox: the special folder tree, user
//! folders and messages, tombstones of deleted objects, and the spooler
//! queue. Every change to a folder or message takes a fresh change
//! number from the store's counter and extends the object's
//! predecessor change list with the new change key.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use ropwire_core::ids::GID_SIZE;
use ropwire_core::property::{MSGFLAG_READ, MSGFLAG_UNSENT, tags};
use ropwire_core::{
    GlobalCounter, LongTermId, PropertyTag, PropertyValue, ReplicaGuid, ShortTermId, TaggedValue,
    Xid,
};
use ropwire_fxics::{AttachmentContent, FolderContent, MessageContent, PredecessorChangeList};
use serde::Serialize;

use crate::error::{Result, ServerError};
use crate::translate::{IdTranslator, LOCAL_REPLICA_ID};

/// Properties keyed by tag
pub type PropertyBag = BTreeMap<PropertyTag, PropertyValue>;

/// DeleteFolder flag: delete contained messages
pub const DEL_MESSAGES: u8 = 0x01;
/// DeleteFolder flag: delete contained folders
pub const DEL_FOLDERS: u8 = 0x04;

/// Generic folder type
const FOLDER_GENERIC: i32 = 1;

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;

/// Current time as a FILETIME
#[must_use]
pub fn filetime_now() -> u64 {
    filetime(Utc::now())
}

/// 100ns ticks since 1601-01-01; instants before 1601 clamp to zero
fn filetime(t: DateTime<Utc>) -> u64 {
    let secs = u64::try_from(t.timestamp() + FILETIME_UNIX_OFFSET).unwrap_or_default();
    secs * 10_000_000 + u64::from(t.timestamp_subsec_nanos() / 100)
}

/// Tags the store derives from object identity; never stored in a bag
const COMPUTED_TAGS: [PropertyTag; 12] = [
    tags::FOLDER_ID,
    tags::PARENT_FOLDER_ID,
    tags::MID,
    tags::SOURCE_KEY,
    tags::PARENT_SOURCE_KEY,
    tags::CHANGE_KEY,
    tags::PREDECESSOR_CHANGE_LIST,
    tags::CHANGE_NUMBER,
    tags::CONTENT_COUNT,
    tags::LAST_MODIFICATION_TIME,
    tags::ASSOCIATED,
    tags::RECORD_KEY,
];

/// True for tags the store computes
#[must_use]
pub fn is_computed(tag: PropertyTag) -> bool {
    COMPUTED_TAGS.iter().any(|t| t.id() == tag.id())
}

/// Build a bag, dropping computed tags
#[must_use]
pub fn to_bag(values: &[TaggedValue]) -> PropertyBag {
    values
        .iter()
        .filter(|v| !is_computed(v.tag))
        .map(|v| (v.tag, v.value.clone()))
        .collect()
}

/// Values of a bag in tag order
#[must_use]
pub fn to_values(bag: &PropertyBag) -> Vec<TaggedValue> {
    bag.iter()
        .map(|(tag, value)| TaggedValue {
            tag: *tag,
            value: value.clone(),
        })
        .collect()
}

/// The thirteen folders returned by a private logon, in response order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpecialFolder {
    /// Mailbox root
    Root,
    /// Deferred action messages
    DeferredAction,
    /// Spooler queue
    SpoolerQueue,
    /// Top of the user-visible tree
    IpmSubtree,
    /// Inbox
    Inbox,
    /// Outbox
    Outbox,
    /// Sent items
    SentItems,
    /// Deleted items
    DeletedItems,
    /// Common views
    CommonViews,
    /// Schedule
    Schedule,
    /// Search folders
    Finder,
    /// Personal views
    Views,
    /// Shortcuts
    Shortcuts,
}

impl SpecialFolder {
    /// Every special folder in logon response order
    pub const ALL: [SpecialFolder; 13] = [
        Self::Root,
        Self::DeferredAction,
        Self::SpoolerQueue,
        Self::IpmSubtree,
        Self::Inbox,
        Self::Outbox,
        Self::SentItems,
        Self::DeletedItems,
        Self::CommonViews,
        Self::Schedule,
        Self::Finder,
        Self::Views,
        Self::Shortcuts,
    ];

    /// Display name
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Root => "Root",
            Self::DeferredAction => "Deferred Action",
            Self::SpoolerQueue => "Spooler Queue",
            Self::IpmSubtree => "Top of Information Store",
            Self::Inbox => "Inbox",
            Self::Outbox => "Outbox",
            Self::SentItems => "Sent Items",
            Self::DeletedItems => "Deleted Items",
            Self::CommonViews => "Common Views",
            Self::Schedule => "Schedule",
            Self::Finder => "Finder",
            Self::Views => "Views",
            Self::Shortcuts => "Shortcuts",
        }
    }

    /// Parent folder, `None` for the root
    #[must_use]
    pub fn parent(self) -> Option<SpecialFolder> {
        match self {
            Self::Root => None,
            Self::Inbox | Self::Outbox | Self::SentItems | Self::DeletedItems => {
                Some(Self::IpmSubtree)
            }
            _ => Some(Self::Root),
        }
    }
}

/// Version information of a folder or message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeStamp {
    /// Store-local change number
    pub change_number: GlobalCounter,
    /// Key of the latest change
    pub change_key: Xid,
    /// Every change that contributed to this version
    pub predecessors: PredecessorChangeList,
    /// Time of the latest change, as a FILETIME
    pub last_modified: u64,
}

/// Message contents, before or after saving
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageDraft {
    /// Properties other than computed identity
    pub properties: PropertyBag,
    /// Recipient rows
    pub recipients: Vec<Vec<TaggedValue>>,
    /// Attachments
    pub attachments: Vec<AttachmentContent>,
}

impl MessageDraft {
    /// Draft from streamed content, dropping computed properties
    #[must_use]
    pub fn from_content(content: MessageContent) -> Self {
        Self {
            properties: to_bag(&content.properties),
            recipients: content.recipients,
            attachments: content.attachments,
        }
    }

    /// Content ready to stream
    #[must_use]
    pub fn to_content(&self) -> MessageContent {
        MessageContent {
            properties: to_values(&self.properties),
            recipients: self.recipients.clone(),
            attachments: self.attachments.clone(),
        }
    }

    /// Set or replace properties
    pub fn set(&mut self, values: &[TaggedValue]) {
        self.properties.extend(to_bag(values));
    }

    /// Subject, if set
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.properties.get(&tags::SUBJECT).and_then(PropertyValue::as_str)
    }
}

/// A stored folder
#[derive(Debug, Clone, Serialize)]
pub struct FolderRecord {
    /// Folder id
    pub id: ShortTermId,
    /// Parent folder, `None` for the root
    pub parent: Option<ShortTermId>,
    /// Stored properties
    pub properties: PropertyBag,
    /// Current version
    pub stamp: ChangeStamp,
    /// Which special folder this is, if any
    pub special: Option<SpecialFolder>,
}

impl FolderRecord {
    /// Display name, empty when unset
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.properties
            .get(&tags::DISPLAY_NAME)
            .and_then(PropertyValue::as_str)
            .unwrap_or("")
    }
}

/// A stored message
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    /// Message id
    pub id: ShortTermId,
    /// Containing folder
    pub folder: ShortTermId,
    /// Folder-associated information
    pub associated: bool,
    /// Saved content
    pub draft: MessageDraft,
    /// Current version
    pub stamp: ChangeStamp,
    /// Read flag
    pub read: bool,
    /// Change number of the last read-state change
    pub read_change: Option<GlobalCounter>,
}

/// Record of a deleted object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tombstone {
    /// Folder the object was in
    pub parent: ShortTermId,
    /// Object was a folder
    pub is_folder: bool,
    /// Object was a folder-associated message
    pub associated: bool,
}

/// Something an EmptyFolder job removes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTarget {
    /// A message
    Message(ShortTermId),
    /// A subfolder and everything below it
    Folder(ShortTermId),
}

/// One private mailbox
#[derive(Debug, Clone)]
pub struct Store {
    translator: IdTranslator,
    mailbox_guid: ReplicaGuid,
    special: Vec<ShortTermId>,
    folders: BTreeMap<ShortTermId, FolderRecord>,
    messages: BTreeMap<ShortTermId, MessageRecord>,
    tombstones: BTreeMap<ShortTermId, Tombstone>,
    spooler: VecDeque<ShortTermId>,
    sent: Vec<ShortTermId>,
}

impl Store {
    /// Empty mailbox with its special folder tree
    ///
    /// # Errors
    ///
    /// Fails only if the counter space cannot hold the special folders.
    pub fn new(replica_guid: ReplicaGuid, mailbox_guid: ReplicaGuid) -> Result<Self> {
        let mut store = Self {
            translator: IdTranslator::new(replica_guid),
            mailbox_guid,
            special: Vec::with_capacity(SpecialFolder::ALL.len()),
            folders: BTreeMap::new(),
            messages: BTreeMap::new(),
            tombstones: BTreeMap::new(),
            spooler: VecDeque::new(),
            sent: Vec::new(),
        };
        for which in SpecialFolder::ALL {
            let id = store.translator.allocate_id()?;
            let parent = which.parent().map(|p| store.special_folder(p));
            let stamp = store.next_stamp(None)?;
            let mut properties = PropertyBag::new();
            properties.insert(
                tags::DISPLAY_NAME,
                PropertyValue::Unicode(which.display_name().to_string()),
            );
            properties.insert(tags::FOLDER_TYPE, PropertyValue::Integer32(FOLDER_GENERIC));
            store.folders.insert(
                id,
                FolderRecord {
                    id,
                    parent,
                    properties,
                    stamp,
                    special: Some(which),
                },
            );
            store.special.push(id);
        }
        tracing::info!(
            "Created mailbox {} on replica {}",
            mailbox_guid,
            replica_guid
        );
        Ok(store)
    }

    /// The store's replica GUID
    #[must_use]
    pub fn replica_guid(&self) -> ReplicaGuid {
        self.translator.local_guid()
    }

    /// The mailbox GUID
    #[must_use]
    pub fn mailbox_guid(&self) -> ReplicaGuid {
        self.mailbox_guid
    }

    /// Replica id of the store's own replica
    #[must_use]
    pub fn replica_id(&self) -> u16 {
        LOCAL_REPLICA_ID
    }

    /// Identifier translator
    #[must_use]
    pub fn translator(&self) -> &IdTranslator {
        &self.translator
    }

    /// Id of a special folder
    #[must_use]
    pub fn special_folder(&self, which: SpecialFolder) -> ShortTermId {
        let index = SpecialFolder::ALL
            .iter()
            .position(|&w| w == which)
            .unwrap_or(0);
        self.special.get(index).copied().unwrap_or(ShortTermId::NONE)
    }

    /// Special folder ids in logon response order
    #[must_use]
    pub fn special_folders(&self) -> [ShortTermId; 13] {
        let mut ids = [ShortTermId::NONE; 13];
        for (slot, id) in ids.iter_mut().zip(&self.special) {
            *slot = *id;
        }
        ids
    }

    // ============ Identifiers ============

    /// New object id
    ///
    /// # Errors
    ///
    /// Fails when the counter space is exhausted.
    pub fn allocate_id(&mut self) -> Result<ShortTermId> {
        self.translator.allocate_id()
    }

    /// Reserve a contiguous counter range for the client
    ///
    /// # Errors
    ///
    /// See [`IdTranslator::reserve_local_ids`].
    pub fn reserve_local_ids(&mut self, count: u32) -> Result<(ReplicaGuid, GlobalCounter)> {
        let reserved = self.translator.reserve_local_ids(count)?;
        tracing::debug!("Reserved {} ids starting at {}", count, reserved.1.value());
        Ok(reserved)
    }

    /// Succeeds when `id` names a live folder or message
    ///
    /// # Errors
    ///
    /// [`ServerError::ObjectDeleted`] for a tombstoned id,
    /// [`ServerError::NotFound`] otherwise.
    pub fn check_live(&self, id: ShortTermId) -> Result<()> {
        if self.folders.contains_key(&id) || self.messages.contains_key(&id) {
            Ok(())
        } else if self.tombstones.contains_key(&id) {
            Err(ServerError::ObjectDeleted(id))
        } else {
            Err(ServerError::NotFound(id))
        }
    }

    /// Long-term id of a live object
    ///
    /// # Errors
    ///
    /// See [`Self::check_live`].
    pub fn long_term_id(&self, id: ShortTermId) -> Result<LongTermId> {
        self.check_live(id)?;
        self.translator.to_long_term(id)
    }

    /// Short-term id of a live object
    ///
    /// # Errors
    ///
    /// Fails for an unknown replica or an object that is not live.
    pub fn short_term_id(&self, id: LongTermId) -> Result<ShortTermId> {
        let short = self.translator.to_short_term(id)?;
        self.check_live(short)?;
        Ok(short)
    }

    /// Source key (GID) of an object id, live or not
    ///
    /// # Errors
    ///
    /// Fails when the id's replica is unknown.
    pub fn source_key(&self, id: ShortTermId) -> Result<Vec<u8>> {
        Ok(self.translator.to_long_term(id)?.to_gid().to_vec())
    }

    /// Object id for a source key, registering a foreign replica
    ///
    /// # Errors
    ///
    /// Fails when `key` is not a 22-byte GID.
    pub fn import_source_key(&mut self, key: &[u8]) -> Result<ShortTermId> {
        if key.len() != GID_SIZE {
            return Err(ServerError::InvalidParameter("SourceKey"));
        }
        let long = LongTermId::from_gid(key)?;
        self.translator.import(long)
    }

    /// Stamp for a local change on top of `previous`
    ///
    /// # Errors
    ///
    /// Fails when the counter space is exhausted.
    pub fn next_stamp(&mut self, previous: Option<&ChangeStamp>) -> Result<ChangeStamp> {
        let change_number = self.translator.allocate()?;
        let change_key = Xid::new(self.replica_guid(), change_number);
        let mut predecessors = previous.map(|p| p.predecessors.clone()).unwrap_or_default();
        predecessors.add(change_key);
        Ok(ChangeStamp {
            change_number,
            change_key,
            predecessors,
            last_modified: filetime_now(),
        })
    }

    /// Stamp for an imported change: a local change number that keeps
    /// the client's change key and history
    ///
    /// # Errors
    ///
    /// Fails when the counter space is exhausted.
    pub fn imported_stamp(
        &mut self,
        change_key: Xid,
        mut predecessors: PredecessorChangeList,
        last_modified: Option<u64>,
    ) -> Result<ChangeStamp> {
        let change_number = self.translator.allocate()?;
        predecessors.add(change_key);
        Ok(ChangeStamp {
            change_number,
            change_key,
            predecessors,
            last_modified: last_modified.unwrap_or_else(filetime_now),
        })
    }

    // ============ Folders ============

    /// A live folder
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a live folder.
    pub fn folder(&self, id: ShortTermId) -> Result<&FolderRecord> {
        self.folders.get(&id).ok_or_else(|| self.missing(id))
    }

    /// True when `id` is a live folder
    #[must_use]
    pub fn is_folder(&self, id: ShortTermId) -> bool {
        self.folders.contains_key(&id)
    }

    /// Every live folder
    pub fn folders(&self) -> impl Iterator<Item = &FolderRecord> {
        self.folders.values()
    }

    fn missing(&self, id: ShortTermId) -> ServerError {
        if self.tombstones.contains_key(&id) {
            ServerError::ObjectDeleted(id)
        } else {
            ServerError::NotFound(id)
        }
    }

    /// Child of `parent` named `name`
    #[must_use]
    pub fn find_child(&self, parent: ShortTermId, name: &str) -> Option<ShortTermId> {
        self.folders
            .values()
            .find(|f| f.parent == Some(parent) && f.display_name().eq_ignore_ascii_case(name))
            .map(|f| f.id)
    }

    /// Create a subfolder; returns its id and whether it already existed
    ///
    /// # Errors
    ///
    /// Fails for an unknown parent, or a duplicate name unless
    /// `open_existing` is set.
    pub fn create_folder(
        &mut self,
        parent: ShortTermId,
        name: &str,
        comment: &str,
        open_existing: bool,
    ) -> Result<(ShortTermId, bool)> {
        self.folder(parent)?;
        if let Some(existing) = self.find_child(parent, name) {
            if open_existing {
                return Ok((existing, true));
            }
            return Err(ServerError::DuplicateName(name.to_string()));
        }
        let id = self.allocate_id()?;
        let mut properties = PropertyBag::new();
        properties.insert(tags::DISPLAY_NAME, PropertyValue::Unicode(name.to_string()));
        if !comment.is_empty() {
            properties.insert(tags::COMMENT, PropertyValue::Unicode(comment.to_string()));
        }
        properties.insert(tags::FOLDER_TYPE, PropertyValue::Integer32(FOLDER_GENERIC));
        let stamp = self.next_stamp(None)?;
        self.insert_folder(id, parent, properties, stamp)?;
        tracing::debug!("Created folder {:?} {:?} under {:?}", id, name, parent);
        Ok((id, false))
    }

    /// Insert or replace a folder with explicit identity and version
    ///
    /// # Errors
    ///
    /// Fails for an unknown parent or an attempt to reparent the root.
    pub fn insert_folder(
        &mut self,
        id: ShortTermId,
        parent: ShortTermId,
        properties: PropertyBag,
        stamp: ChangeStamp,
    ) -> Result<()> {
        self.folder(parent)?;
        if let Some(existing) = self.folders.get_mut(&id) {
            if existing.special == Some(SpecialFolder::Root) {
                return Err(ServerError::ProtectedFolder(id));
            }
            existing.parent = Some(parent);
            existing.properties = properties;
            existing.stamp = stamp;
        } else {
            self.tombstones.remove(&id);
            self.folders.insert(
                id,
                FolderRecord {
                    id,
                    parent: Some(parent),
                    properties,
                    stamp,
                    special: None,
                },
            );
        }
        Ok(())
    }

    /// Set folder properties as one change
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a live folder.
    pub fn set_folder_properties(&mut self, id: ShortTermId, values: &[TaggedValue]) -> Result<()> {
        let previous = self.folder(id)?.stamp.clone();
        let stamp = self.next_stamp(Some(&previous))?;
        if let Some(folder) = self.folders.get_mut(&id) {
            folder.properties.extend(to_bag(values));
            folder.stamp = stamp;
        }
        Ok(())
    }

    /// Stored plus computed folder properties
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a live folder.
    pub fn folder_properties(&self, id: ShortTermId) -> Result<Vec<TaggedValue>> {
        let folder = self.folder(id)?;
        let mut values = vec![TaggedValue::new(
            tags::FOLDER_ID,
            PropertyValue::Integer64(id.as_u64() as i64),
        )];
        if let Some(parent) = folder.parent {
            values.push(TaggedValue::new(
                tags::PARENT_FOLDER_ID,
                PropertyValue::Integer64(parent.as_u64() as i64),
            ));
            values.push(TaggedValue::new(
                tags::PARENT_SOURCE_KEY,
                PropertyValue::Binary(self.source_key(parent)?),
            ));
        }
        let count = self.messages_in(id, Some(false)).len();
        values.push(TaggedValue::new(
            tags::CONTENT_COUNT,
            PropertyValue::Integer32(i32::try_from(count).unwrap_or(i32::MAX)),
        ));
        values.extend(self.stamp_values(id, &folder.stamp)?);
        values.extend(to_values(&folder.properties));
        Ok(values)
    }

    fn stamp_values(&self, id: ShortTermId, stamp: &ChangeStamp) -> Result<Vec<TaggedValue>> {
        let cn = ShortTermId::new(LOCAL_REPLICA_ID, stamp.change_number);
        Ok(vec![
            TaggedValue::new(tags::SOURCE_KEY, PropertyValue::Binary(self.source_key(id)?)),
            TaggedValue::new(
                tags::CHANGE_KEY,
                PropertyValue::Binary(stamp.change_key.to_bytes()),
            ),
            TaggedValue::new(
                tags::PREDECESSOR_CHANGE_LIST,
                PropertyValue::Binary(stamp.predecessors.to_bytes()),
            ),
            TaggedValue::new(tags::CHANGE_NUMBER, PropertyValue::Integer64(cn.as_u64() as i64)),
            TaggedValue::new(
                tags::LAST_MODIFICATION_TIME,
                PropertyValue::SysTime(stamp.last_modified),
            ),
        ])
    }

    /// Direct subfolders of `id`
    #[must_use]
    pub fn subfolders(&self, id: ShortTermId) -> Vec<ShortTermId> {
        self.folders
            .values()
            .filter(|f| f.parent == Some(id))
            .map(|f| f.id)
            .collect()
    }

    /// Every folder below `id`, parents before children
    #[must_use]
    pub fn descendants(&self, id: ShortTermId) -> Vec<ShortTermId> {
        let mut out = Vec::new();
        let mut queue: VecDeque<ShortTermId> = self.subfolders(id).into();
        while let Some(next) = queue.pop_front() {
            out.push(next);
            queue.extend(self.subfolders(next));
        }
        out
    }

    /// Messages of a folder; `associated` filters by FAI flag
    #[must_use]
    pub fn messages_in(&self, folder: ShortTermId, associated: Option<bool>) -> Vec<ShortTermId> {
        self.messages
            .values()
            .filter(|m| m.folder == folder && associated.is_none_or(|a| m.associated == a))
            .map(|m| m.id)
            .collect()
    }

    /// Tombstones whose parent is `folder`
    pub fn tombstones_in(
        &self,
        folder: ShortTermId,
    ) -> impl Iterator<Item = (&ShortTermId, &Tombstone)> {
        self.tombstones.iter().filter(move |(_, t)| t.parent == folder)
    }

    /// Tombstone of `id`, if it was deleted
    #[must_use]
    pub fn tombstone(&self, id: ShortTermId) -> Option<&Tombstone> {
        self.tombstones.get(&id)
    }

    /// Delete a folder; returns true when the delete was partial
    ///
    /// Without [`DEL_MESSAGES`] a folder holding messages is left alone,
    /// and likewise without [`DEL_FOLDERS`] for subfolders.
    ///
    /// # Errors
    ///
    /// Fails for special folders and ids that are not live folders.
    pub fn delete_folder(&mut self, id: ShortTermId, flags: u8) -> Result<bool> {
        let folder = self.folder(id)?;
        if folder.special.is_some() {
            return Err(ServerError::ProtectedFolder(id));
        }
        let has_messages = !self.messages_in(id, None).is_empty();
        let has_folders = !self.subfolders(id).is_empty();
        if (has_messages && flags & DEL_MESSAGES == 0) || (has_folders && flags & DEL_FOLDERS == 0)
        {
            tracing::debug!("Folder {:?} not empty, delete flags {:#04X}", id, flags);
            return Ok(true);
        }
        self.remove_folder_tree(id);
        Ok(false)
    }

    fn remove_folder_tree(&mut self, id: ShortTermId) {
        for child in self.subfolders(id) {
            self.remove_folder_tree(child);
        }
        for message in self.messages_in(id, None) {
            self.remove_message(message);
        }
        if let Some(folder) = self.folders.remove(&id) {
            self.tombstones.insert(
                id,
                Tombstone {
                    parent: folder.parent.unwrap_or(ShortTermId::NONE),
                    is_folder: true,
                    associated: false,
                },
            );
        }
    }

    /// What an EmptyFolder on `id` removes, in order
    #[must_use]
    pub fn empty_folder_targets(&self, id: ShortTermId, include_associated: bool) -> Vec<DeleteTarget> {
        let messages = self
            .messages_in(id, if include_associated { None } else { Some(false) })
            .into_iter()
            .map(DeleteTarget::Message);
        let folders = self.subfolders(id).into_iter().map(DeleteTarget::Folder);
        messages.chain(folders).collect()
    }

    /// Remove one EmptyFolder target; gone targets are skipped
    pub fn delete_target(&mut self, target: DeleteTarget) {
        match target {
            DeleteTarget::Message(id) => self.remove_message(id),
            DeleteTarget::Folder(id) => self.remove_folder_tree(id),
        }
    }

    // ============ Messages ============

    /// A live message
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a live message.
    pub fn message(&self, id: ShortTermId) -> Result<&MessageRecord> {
        self.messages.get(&id).ok_or_else(|| self.missing(id))
    }

    /// A live message that must be in `folder`
    ///
    /// # Errors
    ///
    /// Fails when the message is missing or lives elsewhere.
    pub fn message_in(&self, folder: ShortTermId, id: ShortTermId) -> Result<&MessageRecord> {
        let message = self.message(id)?;
        if message.folder == folder {
            Ok(message)
        } else {
            Err(ServerError::NotFound(id))
        }
    }

    /// Save a message; `stamp` overrides the automatic local stamp
    ///
    /// # Errors
    ///
    /// Fails for an unknown folder or an exhausted counter.
    pub fn save_message(
        &mut self,
        folder: ShortTermId,
        id: ShortTermId,
        associated: bool,
        draft: MessageDraft,
        stamp: Option<ChangeStamp>,
    ) -> Result<ChangeStamp> {
        self.folder(folder)?;
        let stamp = match stamp {
            Some(stamp) => stamp,
            None => {
                let previous = self.messages.get(&id).map(|m| m.stamp.clone());
                self.next_stamp(previous.as_ref())?
            }
        };
        let read = draft
            .properties
            .get(&tags::MESSAGE_FLAGS)
            .and_then(PropertyValue::as_i64)
            .is_some_and(|f| f & i64::from(MSGFLAG_READ) != 0);
        self.tombstones.remove(&id);
        match self.messages.get_mut(&id) {
            Some(existing) => {
                existing.folder = folder;
                existing.draft = draft;
                existing.stamp = stamp.clone();
            }
            None => {
                self.messages.insert(
                    id,
                    MessageRecord {
                        id,
                        folder,
                        associated,
                        draft,
                        stamp: stamp.clone(),
                        read,
                        read_change: None,
                    },
                );
            }
        }
        tracing::debug!(
            "Saved message {:?} in {:?} at change {}",
            id,
            folder,
            stamp.change_number.value()
        );
        Ok(stamp)
    }

    /// Stored plus computed message properties
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a live message.
    pub fn message_properties(&self, id: ShortTermId) -> Result<Vec<TaggedValue>> {
        let message = self.message(id)?;
        let mut values = vec![
            TaggedValue::new(tags::MID, PropertyValue::Integer64(id.as_u64() as i64)),
            TaggedValue::new(
                tags::PARENT_FOLDER_ID,
                PropertyValue::Integer64(message.folder.as_u64() as i64),
            ),
            TaggedValue::new(tags::ASSOCIATED, PropertyValue::Boolean(message.associated)),
        ];
        values.extend(self.stamp_values(id, &message.stamp)?);
        let mut bag = message.draft.properties.clone();
        let flags = bag
            .get(&tags::MESSAGE_FLAGS)
            .and_then(PropertyValue::as_i64)
            .unwrap_or(0) as i32;
        let flags = if message.read {
            flags | MSGFLAG_READ
        } else {
            flags & !MSGFLAG_READ
        };
        bag.insert(tags::MESSAGE_FLAGS, PropertyValue::Integer32(flags));
        values.extend(to_values(&bag));
        Ok(values)
    }

    fn remove_message(&mut self, id: ShortTermId) {
        if let Some(message) = self.messages.remove(&id) {
            self.spooler.retain(|&queued| queued != id);
            self.tombstones.insert(
                id,
                Tombstone {
                    parent: message.folder,
                    is_folder: false,
                    associated: message.associated,
                },
            );
        }
    }

    /// Delete one message
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a live message.
    pub fn delete_message(&mut self, id: ShortTermId) -> Result<()> {
        self.message(id)?;
        self.remove_message(id);
        Ok(())
    }

    /// Delete messages of `folder`; returns true when some were missing
    ///
    /// # Errors
    ///
    /// Fails when `folder` is not a live folder.
    pub fn hard_delete_messages(&mut self, folder: ShortTermId, ids: &[ShortTermId]) -> Result<bool> {
        self.folder(folder)?;
        let mut partial = false;
        for &id in ids {
            if self.message_in(folder, id).is_ok() {
                self.remove_message(id);
            } else {
                partial = true;
            }
        }
        Ok(partial)
    }

    /// Move a message to a new folder and id under a new version
    ///
    /// # Errors
    ///
    /// Fails when the source is not live or the target folder is missing.
    pub fn move_message(
        &mut self,
        from: ShortTermId,
        to_folder: ShortTermId,
        to_id: ShortTermId,
        stamp: ChangeStamp,
    ) -> Result<()> {
        self.folder(to_folder)?;
        let mut message = self.messages.remove(&from).ok_or_else(|| self.missing(from))?;
        self.tombstones.insert(
            from,
            Tombstone {
                parent: message.folder,
                is_folder: false,
                associated: message.associated,
            },
        );
        self.tombstones.remove(&to_id);
        message.id = to_id;
        message.folder = to_folder;
        message.stamp = stamp;
        self.messages.insert(to_id, message);
        tracing::debug!("Moved message {:?} to {:?} in {:?}", from, to_id, to_folder);
        Ok(())
    }

    /// Change the read flag; returns the read-state change number
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a live message.
    pub fn set_read(&mut self, id: ShortTermId, read: bool) -> Result<GlobalCounter> {
        self.message(id)?;
        let cn = self.translator.allocate()?;
        if let Some(message) = self.messages.get_mut(&id) {
            message.read = read;
            message.read_change = Some(cn);
        }
        Ok(cn)
    }

    // ============ Spooler ============

    /// Queue a saved message for sending
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a live message.
    pub fn submit(&mut self, id: ShortTermId) -> Result<()> {
        self.message(id)?;
        if !self.spooler.contains(&id) {
            self.spooler.push_back(id);
        }
        tracing::info!("Submitted message {:?}", id);
        Ok(())
    }

    /// Take a message of `folder` back out of the spooler queue
    ///
    /// # Errors
    ///
    /// [`ServerError::NotInQueue`] when the message is not queued.
    pub fn abort_submit(&mut self, folder: ShortTermId, id: ShortTermId) -> Result<()> {
        let queued = self
            .spooler
            .iter()
            .position(|&q| q == id && self.messages.get(&q).is_some_and(|m| m.folder == folder))
            .ok_or(ServerError::NotInQueue(id))?;
        self.spooler.remove(queued);
        tracing::info!("Aborted submission of {:?}", id);
        Ok(())
    }

    /// True when `id` waits in the spooler queue
    #[must_use]
    pub fn is_queued(&self, id: ShortTermId) -> bool {
        self.spooler.contains(&id)
    }

    /// Send a message immediately, bypassing the queue
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a live message.
    pub fn transport_send(&mut self, id: ShortTermId) -> Result<()> {
        self.message(id)?;
        self.spooler.retain(|&q| q != id);
        if let Some(message) = self.messages.get_mut(&id) {
            let flags = message
                .draft
                .properties
                .get(&tags::MESSAGE_FLAGS)
                .and_then(PropertyValue::as_i64)
                .unwrap_or(0) as i32;
            message.draft.properties.insert(
                tags::MESSAGE_FLAGS,
                PropertyValue::Integer32(flags & !MSGFLAG_UNSENT),
            );
        }
        self.sent.push(id);
        tracing::info!("Sent message {:?}", id);
        Ok(())
    }

    /// Messages sent so far
    #[must_use]
    pub fn sent(&self) -> &[ShortTermId] {
        &self.sent
    }

    // ============ FastTransfer content ============

    /// Streamable content of a message
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a live message.
    pub fn message_content(&self, id: ShortTermId) -> Result<MessageContent> {
        Ok(self.message(id)?.draft.to_content())
    }

    /// Streamable content of a folder
    ///
    /// `include_messages` adds normal and associated messages;
    /// `recursive` adds subfolders with their messages.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not a live folder.
    pub fn folder_content(
        &self,
        id: ShortTermId,
        include_messages: bool,
        recursive: bool,
    ) -> Result<FolderContent> {
        let folder = self.folder(id)?;
        let mut content = FolderContent {
            properties: to_values(&folder.properties),
            ..FolderContent::default()
        };
        if include_messages {
            for message in self.messages_in(id, None) {
                let record = self.message(message)?;
                let body = record.draft.to_content();
                if record.associated {
                    content.associated_messages.push(body);
                } else {
                    content.messages.push(body);
                }
            }
        }
        if recursive {
            for child in self.subfolders(id) {
                content
                    .subfolders
                    .push(self.folder_content(child, include_messages, true)?);
            }
        }
        Ok(content)
    }
}
