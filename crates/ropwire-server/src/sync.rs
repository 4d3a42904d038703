//! Incremental Change Synchronization against a [`Store`].
//!
//! A [`SyncContext`] is either a download (created by Configure) or a
//! collector (created by OpenCollector). Both carry a [`SyncState`] the
//! client can upload in chunks before starting. A download generates its
//! whole stream on the first GetBuffer and replaces its state with the
//! state the stream ends with; a collector folds every import into its
//! state so GetTransferState reports what the client now has.

use ropwire_core::property::{find, tags};
use ropwire_core::rop::MessageReadState;
use ropwire_core::{LongTermId, PropertyTag, PropertyValue, ShortTermId, TaggedValue, Xid};
use ropwire_fxics::{
    FolderChange, IcsDownload, MessageChange, PredecessorChangeList, SourceContext, StateUpload,
    SyncKind, SyncState, TransferChunk,
};

use crate::error::{Result, ServerError};
use crate::store::{
    ChangeStamp, DEL_FOLDERS, DEL_MESSAGES, MessageDraft, PropertyBag, Store, is_computed, to_bag,
};

/// SynchronizationFlags
pub mod sync_flags {
    /// Strings as Unicode
    pub const UNICODE: u16 = 0x0001;
    /// Leave deletions out
    pub const NO_DELETIONS: u16 = 0x0002;
    /// Leave out objects that fell out of scope
    pub const IGNORE_NO_LONGER_IN_SCOPE: u16 = 0x0004;
    /// Report read-state changes
    pub const READ_STATE: u16 = 0x0008;
    /// Include folder-associated messages
    pub const FAI: u16 = 0x0010;
    /// Include normal messages
    pub const NORMAL: u16 = 0x0020;
    /// Tag list names the properties to send rather than to leave out
    pub const ONLY_SPECIFIED_PROPERTIES: u16 = 0x0080;
    /// Progress information requested
    pub const PROGRESS: u16 = 0x8000;
}

/// SynchronizationExtraFlags
pub mod extra_flags {
    /// Add the object id to each change header
    pub const EID: u32 = 0x0000_0001;
    /// Add the message size
    pub const MESSAGE_SIZE: u32 = 0x0000_0002;
    /// Add the change number
    pub const CN: u32 = 0x0000_0004;
}

/// ImportFlag of ImportMessageChange
pub mod import_flags {
    /// Message is folder-associated
    pub const ASSOCIATED: u8 = 0x10;
}

/// ImportDeleteFlags: identities name folders
pub const IMPORT_DELETE_HIERARCHY: u8 = 0x01;

/// What a download sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// SynchronizationFlags
    pub sync_flags: u16,
    /// SynchronizationExtraFlags
    pub extra_flags: u32,
    /// Property filter
    pub tags: Vec<PropertyTag>,
}

impl DownloadOptions {
    fn has(&self, flag: u16) -> bool {
        self.sync_flags & flag != 0
    }

    fn has_extra(&self, flag: u32) -> bool {
        self.extra_flags & flag != 0
    }

    /// Whether normal messages are sent; the default when neither kind
    /// is selected
    #[must_use]
    pub fn wants_normal(&self) -> bool {
        self.has(sync_flags::NORMAL) || !self.has(sync_flags::FAI)
    }

    /// Whether folder-associated messages are sent
    #[must_use]
    pub fn wants_associated(&self) -> bool {
        self.has(sync_flags::FAI)
    }

    /// Whether the filter lets `tag` through
    #[must_use]
    pub fn passes(&self, tag: PropertyTag) -> bool {
        let listed = self.tags.iter().any(|t| t.id() == tag.id());
        if self.has(sync_flags::ONLY_SPECIFIED_PROPERTIES) {
            listed
        } else {
            !listed
        }
    }
}

/// Direction of a context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRole {
    /// Server to client
    Download(DownloadOptions),
    /// Client to server
    Collector,
}

/// Lifecycle of a context; Closed is the object being released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Created, nothing exchanged yet
    Configured,
    /// Imports applied or download stream generated
    Collecting,
    /// A state property upload is open
    StreamingState,
}

/// One ICS download or collector
#[derive(Debug)]
pub struct SyncContext {
    folder: ShortTermId,
    kind: SyncKind,
    role: SyncRole,
    state: SyncState,
    phase: SyncPhase,
    resume: SyncPhase,
    upload: Option<StateUpload>,
    download: Option<SourceContext>,
}

impl SyncContext {
    /// Download context for `folder`
    #[must_use]
    pub fn download(folder: ShortTermId, kind: SyncKind, options: DownloadOptions) -> Self {
        Self::new(folder, kind, SyncRole::Download(options))
    }

    /// Upload context for `folder`
    #[must_use]
    pub fn collector(folder: ShortTermId, kind: SyncKind) -> Self {
        Self::new(folder, kind, SyncRole::Collector)
    }

    fn new(folder: ShortTermId, kind: SyncKind, role: SyncRole) -> Self {
        Self {
            folder,
            kind,
            role,
            state: SyncState::new(),
            phase: SyncPhase::Configured,
            resume: SyncPhase::Configured,
            upload: None,
            download: None,
        }
    }

    /// Synchronized folder
    #[must_use]
    pub fn folder(&self) -> ShortTermId {
        self.folder
    }

    /// Contents or hierarchy
    #[must_use]
    pub fn kind(&self) -> SyncKind {
        self.kind
    }

    /// Download or collector
    #[must_use]
    pub fn role(&self) -> &SyncRole {
        &self.role
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    fn enter(&mut self, phase: SyncPhase) {
        if self.phase != phase {
            tracing::debug!("Sync context on {:?}: {:?} -> {:?}", self.folder, self.phase, phase);
            self.phase = phase;
        }
    }

    /// Start uploading one state property
    ///
    /// # Errors
    ///
    /// [`ServerError::InvalidParameter`] for a tag that is not a state
    /// property, [`ServerError::InvalidState`] when an upload is already
    /// open or the download stream was generated.
    pub fn begin_state_upload(&mut self, tag: PropertyTag, declared_size: u32) -> Result<()> {
        if self.phase == SyncPhase::StreamingState {
            return Err(ServerError::InvalidState("state upload already open"));
        }
        if self.download.is_some() {
            return Err(ServerError::InvalidState("download already started"));
        }
        let upload = StateUpload::begin(tag.0, declared_size)
            .map_err(|_| ServerError::InvalidParameter("StateProperty"))?;
        self.upload = Some(upload);
        self.resume = self.phase;
        self.enter(SyncPhase::StreamingState);
        Ok(())
    }

    /// Append a chunk to the open upload
    ///
    /// # Errors
    ///
    /// [`ServerError::InvalidState`] without a preceding Begin.
    pub fn continue_state_upload(&mut self, chunk: &[u8]) -> Result<()> {
        let upload = self
            .upload
            .as_mut()
            .ok_or(ServerError::InvalidState("UploadStateStreamContinue without Begin"))?;
        upload.append(chunk);
        Ok(())
    }

    /// Finish the open upload and install the property
    ///
    /// # Errors
    ///
    /// [`ServerError::InvalidState`] without a preceding Begin, or a
    /// stream error when the uploaded bytes are not an IDSET.
    pub fn end_state_upload(&mut self) -> Result<()> {
        let upload = self
            .upload
            .take()
            .ok_or(ServerError::InvalidState("UploadStateStreamEnd without Begin"))?;
        let resume = self.resume;
        self.enter(resume);
        let (property, set) = upload.end()?;
        tracing::debug!("Installed {:?} with {} ids", property, set.len());
        *self.state.get_mut(property) = set;
        Ok(())
    }

    /// State stream for GetTransferState
    ///
    /// # Errors
    ///
    /// Fails only if the state cannot be serialized.
    pub fn transfer_state(&self) -> Result<SourceContext> {
        let data = self.state.to_stream(self.kind == SyncKind::Contents)?;
        let end = data.len();
        Ok(SourceContext::from_stream(data, vec![end]))
    }

    /// Next chunk of the download stream, generating it on first use
    ///
    /// # Errors
    ///
    /// Fails for collectors, during a state upload, or when the stream
    /// cannot be built.
    pub fn get_buffer(
        &mut self,
        store: &Store,
        buffer_size: u16,
        maximum_buffer_size: u16,
        default_chunk: usize,
    ) -> Result<TransferChunk> {
        if self.phase == SyncPhase::StreamingState {
            return Err(ServerError::InvalidState("state upload open"));
        }
        let SyncRole::Download(options) = &self.role else {
            return Err(ServerError::WrongObject("FastTransferSourceGetBuffer on a collector"));
        };
        if self.download.is_none() {
            let download = build_download(store, self.folder, self.kind, options, &self.state)?;
            let (data, units) = download.encode(self.kind)?;
            tracing::info!(
                "ICS download on {:?}: {} message changes, {} folder changes, {} bytes",
                self.folder,
                download.message_changes.len(),
                download.folder_changes.len(),
                data.len()
            );
            self.state = download.state;
            self.download = Some(SourceContext::from_stream(data, units));
            self.enter(SyncPhase::Collecting);
        }
        match self.download.as_mut() {
            Some(source) => Ok(source.get_buffer(buffer_size, maximum_buffer_size, default_chunk)),
            None => Err(ServerError::InvalidState("download stream missing")),
        }
    }

    fn collector_for(&mut self, kind: SyncKind, rop: &'static str) -> Result<&mut SyncState> {
        if self.role != SyncRole::Collector || self.kind != kind {
            return Err(ServerError::WrongObject(rop));
        }
        if self.phase == SyncPhase::StreamingState {
            return Err(ServerError::InvalidState("state upload open"));
        }
        self.enter(SyncPhase::Collecting);
        Ok(&mut self.state)
    }

    /// ImportMessageChange: create or replace a message and commit it
    ///
    /// Returns the message id, the stored version and the saved draft.
    ///
    /// # Errors
    ///
    /// Fails on missing identity properties, [`ServerError::SyncIgnore`]
    /// when the stored version already includes the change, and
    /// [`ServerError::SyncConflict`] when neither version includes the
    /// other.
    pub fn import_message_change(
        &mut self,
        store: &mut Store,
        import_flag: u8,
        values: &[TaggedValue],
    ) -> Result<(ShortTermId, ChangeStamp, MessageDraft)> {
        let folder = self.folder;
        let state = self.collector_for(SyncKind::Contents, "SynchronizationImportMessageChange")?;
        let identity = ImportedIdentity::read(values)?;
        let associated = import_flag & import_flags::ASSOCIATED != 0;
        let id = store.import_source_key(&identity.source_key)?;

        let existing = store.message(id).ok().map(|m| (m.stamp.predecessors.clone(), m.draft.clone()));
        let mut draft = MessageDraft::default();
        if let Some((stored, stored_draft)) = existing {
            match verdict(&identity.incoming(), &stored) {
                Verdict::Apply => {}
                Verdict::Ignore => return Err(ServerError::SyncIgnore),
                Verdict::Conflict => {
                    tracing::debug!("Change to {:?} conflicts with the stored version", id);
                    return Err(ServerError::SyncConflict);
                }
            }
            draft = stored_draft;
        }
        draft.set(values);
        let stamp = store.imported_stamp(identity.change_key, identity.predecessors, identity.last_modified)?;
        store.save_message(folder, id, associated, draft.clone(), Some(stamp.clone()))?;

        let long = store.long_term_id(id)?;
        state.idset_given.insert_long_term(long);
        let seen = if associated {
            &mut state.cnset_seen_fai
        } else {
            &mut state.cnset_seen
        };
        seen.insert(store.replica_guid(), stamp.change_number.value());
        Ok((id, stamp, draft))
    }

    /// ImportHierarchyChange: create or update a folder
    ///
    /// # Errors
    ///
    /// [`ServerError::SyncNoParent`] for an unknown parent,
    /// [`ServerError::SyncIgnore`] or [`ServerError::SyncConflict`] when
    /// the incoming version does not dominate the stored one.
    pub fn import_hierarchy_change(
        &mut self,
        store: &mut Store,
        hierarchy_values: &[TaggedValue],
        values: &[TaggedValue],
    ) -> Result<ShortTermId> {
        let root = self.folder;
        let state = self.collector_for(SyncKind::Hierarchy, "SynchronizationImportHierarchyChange")?;
        let identity = ImportedIdentity::read(hierarchy_values)?;
        let parent = match find(hierarchy_values, tags::PARENT_SOURCE_KEY).and_then(PropertyValue::as_binary) {
            None | Some([]) => root,
            Some(key) => {
                let parent = store
                    .import_source_key(key)
                    .map_err(|_| ServerError::SyncNoParent)?;
                if !store.is_folder(parent) {
                    return Err(ServerError::SyncNoParent);
                }
                parent
            }
        };
        let name = find(hierarchy_values, tags::DISPLAY_NAME)
            .and_then(PropertyValue::as_str)
            .ok_or(ServerError::InvalidParameter("DisplayName"))?
            .to_string();
        let id = store.import_source_key(&identity.source_key)?;

        if let Ok(folder) = store.folder(id) {
            match verdict(&identity.incoming(), &folder.stamp.predecessors) {
                Verdict::Apply => {}
                Verdict::Ignore => return Err(ServerError::SyncIgnore),
                Verdict::Conflict => return Err(ServerError::SyncConflict),
            }
        }
        if store.find_child(parent, &name).is_some_and(|other| other != id) {
            return Err(ServerError::DuplicateName(name));
        }

        let mut properties: PropertyBag = store.folder(id).map(|f| f.properties.clone()).unwrap_or_default();
        properties.extend(to_bag(values));
        properties.insert(tags::DISPLAY_NAME, PropertyValue::Unicode(name));
        let stamp = store.imported_stamp(identity.change_key, identity.predecessors, identity.last_modified)?;
        let cn = stamp.change_number.value();
        store.insert_folder(id, parent, properties, stamp)?;

        state.idset_given.insert_long_term(store.long_term_id(id)?);
        state.cnset_seen.insert(store.replica_guid(), cn);
        tracing::debug!("Imported folder {:?} under {:?}", id, parent);
        Ok(id)
    }

    /// ImportDeletes: tombstone the objects named by source keys
    ///
    /// Keys of objects the store does not have are skipped.
    ///
    /// # Errors
    ///
    /// Fails for a malformed source key or a protected folder.
    pub fn import_deletes(&mut self, store: &mut Store, flags: u8, values: &[TaggedValue]) -> Result<()> {
        let hierarchy = flags & IMPORT_DELETE_HIERARCHY != 0;
        let kind = if hierarchy {
            SyncKind::Hierarchy
        } else {
            SyncKind::Contents
        };
        let state = self.collector_for(kind, "SynchronizationImportDeletes")?;
        let mut keys: Vec<&[u8]> = Vec::new();
        for value in values {
            match &value.value {
                PropertyValue::MultipleBinary(list) => keys.extend(list.iter().map(Vec::as_slice)),
                PropertyValue::Binary(key) => keys.push(key),
                _ => return Err(ServerError::InvalidParameter("PropertyValues")),
            }
        }
        for key in keys {
            let long = LongTermId::from_gid(key)?;
            state.idset_given.remove(long.guid, long.counter.value());
            let Ok(id) = store.translator().to_short_term(long) else {
                continue;
            };
            let deleted = if hierarchy {
                store.is_folder(id) && !store.delete_folder(id, DEL_MESSAGES | DEL_FOLDERS)?
            } else {
                store.delete_message(id).is_ok()
            };
            tracing::debug!("Import delete of {:?}: deleted={}", id, deleted);
        }
        Ok(())
    }

    /// ImportMessageMove: move a message into this collector's folder
    ///
    /// # Errors
    ///
    /// [`ServerError::SyncObjectDeleted`] when the source is gone and
    /// [`ServerError::SyncConflict`] when the incoming history does not
    /// strictly dominate the source's.
    #[allow(clippy::too_many_arguments)]
    pub fn import_message_move(
        &mut self,
        store: &mut Store,
        source_folder: &[u8],
        source_message: &[u8],
        predecessor_change_list: &[u8],
        destination_message: &[u8],
        change_key: &[u8],
    ) -> Result<ShortTermId> {
        let folder = self.folder;
        let state = self.collector_for(SyncKind::Contents, "SynchronizationImportMessageMove")?;
        let source_folder = store
            .translator()
            .to_short_term(LongTermId::from_gid(source_folder)?)
            .map_err(|_| ServerError::SyncObjectDeleted)?;
        let source = store
            .translator()
            .to_short_term(LongTermId::from_gid(source_message)?)
            .map_err(|_| ServerError::SyncObjectDeleted)?;
        let record = store
            .message_in(source_folder, source)
            .map_err(|_| ServerError::SyncObjectDeleted)?;
        let associated = record.associated;

        let change_key = Xid::from_bytes(change_key)?;
        let predecessors = PredecessorChangeList::from_bytes(predecessor_change_list)?;
        let mut incoming = predecessors.clone();
        incoming.add(change_key);
        if !incoming.strictly_dominates(&record.stamp.predecessors) {
            return Err(ServerError::SyncConflict);
        }

        if destination_message.is_empty() {
            return Err(ServerError::InvalidParameter("DestinationMessageId"));
        }
        let destination = store.import_source_key(destination_message)?;
        let stamp = store.imported_stamp(change_key, predecessors, None)?;
        let cn = stamp.change_number.value();
        store.move_message(source, folder, destination, stamp)?;

        state.idset_given.insert_long_term(store.long_term_id(destination)?);
        let seen = if associated {
            &mut state.cnset_seen_fai
        } else {
            &mut state.cnset_seen
        };
        seen.insert(store.replica_guid(), cn);
        Ok(destination)
    }

    /// ImportReadStateChanges: flip read flags without a full change
    ///
    /// Unknown messages are skipped.
    ///
    /// # Errors
    ///
    /// Fails for a malformed source key.
    pub fn import_read_state_changes(&mut self, store: &mut Store, states: &[MessageReadState]) -> Result<()> {
        let state = self.collector_for(SyncKind::Contents, "SynchronizationImportReadStateChanges")?;
        for entry in states {
            let long = LongTermId::from_gid(&entry.message_id)?;
            let Ok(id) = store.short_term_id(long) else {
                tracing::debug!("Read state for unknown message {}", long.guid);
                continue;
            };
            let cn = store.set_read(id, entry.mark_as_read)?;
            state.cnset_read.insert(store.replica_guid(), cn.value());
        }
        Ok(())
    }
}

/// Outcome of comparing an incoming version with the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Apply,
    Ignore,
    Conflict,
}

fn verdict(incoming: &PredecessorChangeList, stored: &PredecessorChangeList) -> Verdict {
    if stored.dominates(incoming) {
        Verdict::Ignore
    } else if incoming.dominates(stored) {
        Verdict::Apply
    } else {
        Verdict::Conflict
    }
}

/// Identity properties every imported change carries
struct ImportedIdentity {
    source_key: Vec<u8>,
    change_key: Xid,
    predecessors: PredecessorChangeList,
    last_modified: Option<u64>,
}

impl ImportedIdentity {
    fn read(values: &[TaggedValue]) -> Result<Self> {
        let source_key = find(values, tags::SOURCE_KEY)
            .and_then(PropertyValue::as_binary)
            .ok_or(ServerError::InvalidParameter("SourceKey"))?
            .to_vec();
        let change_key = find(values, tags::CHANGE_KEY)
            .and_then(PropertyValue::as_binary)
            .ok_or(ServerError::InvalidParameter("ChangeKey"))?;
        let change_key = Xid::from_bytes(change_key)?;
        let predecessors = match find(values, tags::PREDECESSOR_CHANGE_LIST).and_then(PropertyValue::as_binary) {
            Some(bytes) => PredecessorChangeList::from_bytes(bytes)?,
            None => PredecessorChangeList::new(),
        };
        let last_modified = match find(values, tags::LAST_MODIFICATION_TIME) {
            Some(PropertyValue::SysTime(t)) => Some(*t),
            _ => None,
        };
        Ok(Self {
            source_key,
            change_key,
            predecessors,
            last_modified,
        })
    }

    fn incoming(&self) -> PredecessorChangeList {
        let mut pcl = self.predecessors.clone();
        pcl.add(self.change_key);
        pcl
    }
}

/// Everything a download of `folder` sends to a client holding `state`
///
/// # Errors
///
/// Fails when an object's identity cannot be translated.
pub fn build_download(
    store: &Store,
    folder: ShortTermId,
    kind: SyncKind,
    options: &DownloadOptions,
    state: &SyncState,
) -> Result<IcsDownload> {
    store.folder(folder)?;
    let mut download = IcsDownload {
        state: state.clone(),
        ..IcsDownload::default()
    };
    download.state.idset_given = Default::default();
    match kind {
        SyncKind::Contents => contents_changes(store, folder, options, state, &mut download)?,
        SyncKind::Hierarchy => hierarchy_changes(store, folder, options, state, &mut download)?,
    }
    if !options.has(sync_flags::NO_DELETIONS) {
        for (id, tombstone) in deletion_candidates(store, folder, kind) {
            let wanted = match kind {
                SyncKind::Contents => {
                    !tombstone.is_folder
                        && if tombstone.associated {
                            options.wants_associated()
                        } else {
                            options.wants_normal()
                        }
                }
                SyncKind::Hierarchy => tombstone.is_folder,
            };
            let long = store.translator().to_long_term(id)?;
            if wanted && state.idset_given.contains_long_term(long) {
                download.deleted.insert_long_term(long);
            }
        }
    }
    Ok(download)
}

fn deletion_candidates(
    store: &Store,
    folder: ShortTermId,
    kind: SyncKind,
) -> Vec<(ShortTermId, crate::store::Tombstone)> {
    let mut parents = vec![folder];
    if kind == SyncKind::Hierarchy {
        parents.extend(store.descendants(folder));
    }
    let mut out: Vec<_> = parents
        .iter()
        .flat_map(|&p| store.tombstones_in(p).map(|(id, t)| (*id, *t)))
        .collect();
    if kind == SyncKind::Hierarchy {
        // Folders deleted with their parent have a tombstoned parent
        let mut frontier: Vec<ShortTermId> = out.iter().map(|(id, _)| *id).collect();
        while let Some(parent) = frontier.pop() {
            for (id, t) in store.tombstones_in(parent) {
                if t.is_folder && !out.iter().any(|(seen, _)| seen == id) {
                    out.push((*id, *t));
                    frontier.push(*id);
                }
            }
        }
    }
    out
}

fn filtered(options: &DownloadOptions, values: Vec<TaggedValue>) -> Vec<TaggedValue> {
    values
        .into_iter()
        .filter(|v| !is_computed(v.tag) && options.passes(v.tag))
        .collect()
}

fn contents_changes(
    store: &Store,
    folder: ShortTermId,
    options: &DownloadOptions,
    state: &SyncState,
    download: &mut IcsDownload,
) -> Result<()> {
    let local = store.replica_guid();
    let read_state = options.has(sync_flags::READ_STATE);
    for id in store.messages_in(folder, None) {
        let record = store.message(id)?;
        if !(if record.associated {
            options.wants_associated()
        } else {
            options.wants_normal()
        }) {
            continue;
        }
        let long = store.long_term_id(id)?;
        let cn = record.stamp.change_number.value();
        download.state.idset_given.insert_long_term(long);
        let (seen, next_seen) = if record.associated {
            (&state.cnset_seen_fai, &mut download.state.cnset_seen_fai)
        } else {
            (&state.cnset_seen, &mut download.state.cnset_seen)
        };
        next_seen.insert(local, cn);
        let changed = !seen.contains(local, cn);

        if changed {
            let mut header = vec![
                TaggedValue::new(tags::SOURCE_KEY, PropertyValue::Binary(long.to_gid().to_vec())),
                TaggedValue::new(
                    tags::LAST_MODIFICATION_TIME,
                    PropertyValue::SysTime(record.stamp.last_modified),
                ),
                TaggedValue::new(tags::CHANGE_KEY, PropertyValue::Binary(record.stamp.change_key.to_bytes())),
                TaggedValue::new(
                    tags::PREDECESSOR_CHANGE_LIST,
                    PropertyValue::Binary(record.stamp.predecessors.to_bytes()),
                ),
                TaggedValue::new(tags::ASSOCIATED, PropertyValue::Boolean(record.associated)),
            ];
            if options.has_extra(extra_flags::EID) {
                header.push(TaggedValue::new(tags::MID, PropertyValue::Integer64(id.as_u64() as i64)));
                header.push(TaggedValue::new(
                    tags::PARENT_FOLDER_ID,
                    PropertyValue::Integer64(folder.as_u64() as i64),
                ));
            }
            if options.has_extra(extra_flags::CN) {
                let cn_id = ShortTermId::new(store.replica_id(), record.stamp.change_number);
                header.push(TaggedValue::new(
                    tags::CHANGE_NUMBER,
                    PropertyValue::Integer64(cn_id.as_u64() as i64),
                ));
            }
            let mut content = record.draft.to_content();
            content.properties = filtered(options, store.message_properties(id)?);
            if options.has_extra(extra_flags::MESSAGE_SIZE) {
                let size = content
                    .properties
                    .iter()
                    .map(|v| v.value.as_binary().map_or(8, <[u8]>::len))
                    .sum::<usize>();
                header.push(TaggedValue::new(
                    tags::MESSAGE_SIZE,
                    PropertyValue::Integer32(i32::try_from(size).unwrap_or(i32::MAX)),
                ));
            }
            download.message_changes.push(MessageChange { header, content });
        }

        if let Some(read_cn) = record.read_change {
            download.state.cnset_read.insert(local, read_cn.value());
            if read_state && !changed && !state.cnset_read.contains(local, read_cn.value()) {
                if record.read {
                    download.read.insert_long_term(long);
                } else {
                    download.unread.insert_long_term(long);
                }
            }
        }
    }
    Ok(())
}

fn hierarchy_changes(
    store: &Store,
    root: ShortTermId,
    options: &DownloadOptions,
    state: &SyncState,
    download: &mut IcsDownload,
) -> Result<()> {
    let local = store.replica_guid();
    for id in store.descendants(root) {
        let record = store.folder(id)?;
        let long = store.long_term_id(id)?;
        let cn = record.stamp.change_number.value();
        download.state.idset_given.insert_long_term(long);
        download.state.cnset_seen.insert(local, cn);
        if state.cnset_seen.contains(local, cn) {
            continue;
        }
        let parent_key = match record.parent {
            Some(parent) if parent != root => store.source_key(parent)?,
            _ => Vec::new(),
        };
        let mut properties = vec![
            TaggedValue::new(tags::PARENT_SOURCE_KEY, PropertyValue::Binary(parent_key)),
            TaggedValue::new(tags::SOURCE_KEY, PropertyValue::Binary(long.to_gid().to_vec())),
            TaggedValue::new(
                tags::LAST_MODIFICATION_TIME,
                PropertyValue::SysTime(record.stamp.last_modified),
            ),
            TaggedValue::new(tags::CHANGE_KEY, PropertyValue::Binary(record.stamp.change_key.to_bytes())),
            TaggedValue::new(
                tags::PREDECESSOR_CHANGE_LIST,
                PropertyValue::Binary(record.stamp.predecessors.to_bytes()),
            ),
            TaggedValue::new(
                tags::DISPLAY_NAME,
                PropertyValue::Unicode(record.display_name().to_string()),
            ),
        ];
        if options.has_extra(extra_flags::EID) {
            properties.push(TaggedValue::new(
                tags::FOLDER_ID,
                PropertyValue::Integer64(id.as_u64() as i64),
            ));
        }
        properties.extend(
            filtered(options, store.folder_properties(id)?)
                .into_iter()
                .filter(|v| v.tag.id() != tags::DISPLAY_NAME.id()),
        );
        download.folder_changes.push(FolderChange { properties });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ropwire_core::{GlobalCounter, ReplicaGuid};
    use ropwire_fxics::{IdSet, StateProperty};
    use crate::store::SpecialFolder;

    const CLIENT: ReplicaGuid = ReplicaGuid([0xC1; 16]);

    fn store() -> Store {
        Store::new(ReplicaGuid([1; 16]), ReplicaGuid([2; 16])).unwrap()
    }

    fn contents_options() -> DownloadOptions {
        DownloadOptions {
            sync_flags: sync_flags::NORMAL | sync_flags::READ_STATE,
            extra_flags: extra_flags::EID,
            tags: Vec::new(),
        }
    }

    fn xid(counter: u64) -> Xid {
        Xid::new(CLIENT, GlobalCounter::truncating(counter))
    }

    fn client_key(counter: u64) -> Vec<u8> {
        LongTermId::new(CLIENT, GlobalCounter::truncating(counter)).to_gid().to_vec()
    }

    fn change(counter: u64, version: u64, pcl: &[Xid], subject: &str) -> Vec<TaggedValue> {
        vec![
            TaggedValue::new(tags::SOURCE_KEY, PropertyValue::Binary(client_key(counter))),
            TaggedValue::new(tags::CHANGE_KEY, PropertyValue::Binary(xid(version).to_bytes())),
            TaggedValue::new(
                tags::PREDECESSOR_CHANGE_LIST,
                PropertyValue::Binary(PredecessorChangeList::from_xids(pcl.iter().copied()).to_bytes()),
            ),
            TaggedValue::new(tags::SUBJECT, PropertyValue::Unicode(subject.into())),
        ]
    }

    fn save(store: &mut Store, folder: ShortTermId, subject: &str) -> ShortTermId {
        let id = store.allocate_id().unwrap();
        let mut draft = MessageDraft::default();
        draft.set(&[TaggedValue::new(tags::SUBJECT, PropertyValue::Unicode(subject.into()))]);
        store.save_message(folder, id, false, draft, None).unwrap();
        id
    }

    fn drain(ctx: &mut SyncContext, store: &Store) -> Vec<u8> {
        let mut bytes = Vec::new();
        loop {
            let chunk = ctx.get_buffer(store, 64, 0, 4096).unwrap();
            bytes.extend(chunk.data);
            if chunk.status == ropwire_core::rop::TransferStatus::Done {
                return bytes;
            }
        }
    }

    #[test]
    fn test_collector_import_joins_state() {
        let mut store = store();
        let inbox = store.special_folder(SpecialFolder::Inbox);
        let mut ctx = SyncContext::collector(inbox, SyncKind::Contents);
        let (id, stamp, draft) = ctx
            .import_message_change(&mut store, 0, &change(100, 5, &[], "hello"))
            .unwrap();
        assert_eq!(draft.subject(), Some("hello"));
        assert_eq!(ctx.phase(), SyncPhase::Collecting);
        let state = ctx.state();
        assert!(state.idset_given.contains(CLIENT, 100));
        assert!(state.cnset_seen.contains(store.replica_guid(), stamp.change_number.value()));
        assert_eq!(store.message(id).unwrap().stamp.change_key, xid(5));
    }

    #[test]
    fn test_import_verdicts() {
        let mut store = store();
        let inbox = store.special_folder(SpecialFolder::Inbox);
        let mut ctx = SyncContext::collector(inbox, SyncKind::Contents);
        ctx.import_message_change(&mut store, 0, &change(100, 5, &[], "v1")).unwrap();
        assert_eq!(
            ctx.import_message_change(&mut store, 0, &change(100, 4, &[], "old")),
            Err(ServerError::SyncIgnore)
        );
        let (id, _, _) = ctx
            .import_message_change(&mut store, 0, &change(100, 6, &[xid(5)], "v2"))
            .unwrap();

        let other = Xid::new(ReplicaGuid([0xD2; 16]), GlobalCounter::truncating(1));
        let mut fork = change(100, 1, &[], "fork");
        fork[1] = TaggedValue::new(tags::CHANGE_KEY, PropertyValue::Binary(other.to_bytes()));
        assert_eq!(
            ctx.import_message_change(&mut store, 0, &fork),
            Err(ServerError::SyncConflict)
        );
        assert_eq!(
            ctx.import_message_change(&mut store, import_flags::ASSOCIATED, &fork),
            Err(ServerError::SyncConflict)
        );
        let stored = store.message(id).unwrap();
        assert_eq!(stored.stamp.change_key, xid(6));
        assert!(!stored.stamp.predecessors.includes(&other));
        assert_eq!(stored.draft.subject(), Some("v2"));
    }

    #[test]
    fn test_download_then_incremental() {
        let mut store = store();
        let inbox = store.special_folder(SpecialFolder::Inbox);
        let first = save(&mut store, inbox, "one");
        save(&mut store, inbox, "two");

        let mut ctx = SyncContext::download(inbox, SyncKind::Contents, contents_options());
        let bytes = drain(&mut ctx, &store);
        let download = IcsDownload::decode(SyncKind::Contents, &bytes).unwrap();
        assert_eq!(download.message_changes.len(), 2);
        let state = ctx.state().clone();

        store.delete_message(first).unwrap();
        let third = save(&mut store, inbox, "three");
        store.set_read(third, true).unwrap();

        let download = build_download(&store, inbox, SyncKind::Contents, &contents_options(), &state).unwrap();
        assert_eq!(download.message_changes.len(), 1);
        let first_long = store.translator().to_long_term(first).unwrap();
        assert!(download.deleted.contains_long_term(first_long));
        assert!(!download.state.idset_given.contains_long_term(first_long));
    }

    #[test]
    fn test_read_state_only_change() {
        let mut store = store();
        let inbox = store.special_folder(SpecialFolder::Inbox);
        let id = save(&mut store, inbox, "one");
        let empty = SyncState::new();
        let state = build_download(&store, inbox, SyncKind::Contents, &contents_options(), &empty)
            .unwrap()
            .state;
        store.set_read(id, true).unwrap();
        let download = build_download(&store, inbox, SyncKind::Contents, &contents_options(), &state).unwrap();
        assert!(download.message_changes.is_empty());
        assert!(download.read.contains_long_term(store.long_term_id(id).unwrap()));
    }

    #[test]
    fn test_hierarchy_download_parents_first() {
        let mut store = store();
        let inbox = store.special_folder(SpecialFolder::Inbox);
        let (a, _) = store.create_folder(inbox, "A", "", false).unwrap();
        store.create_folder(a, "B", "", false).unwrap();
        let options = DownloadOptions {
            sync_flags: 0,
            extra_flags: 0,
            tags: Vec::new(),
        };
        let download = build_download(&store, inbox, SyncKind::Hierarchy, &options, &SyncState::new()).unwrap();
        let names: Vec<_> = download.folder_changes.iter().filter_map(FolderChange::display_name).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(download.folder_changes[0].parent_source_key(), Some(&[][..]));
    }

    #[test]
    fn test_message_move_requires_dominating_history() {
        let mut store = store();
        let inbox = store.special_folder(SpecialFolder::Inbox);
        let archive = store.create_folder(inbox, "Archive", "", false).unwrap().0;
        let id = save(&mut store, inbox, "moving");
        let recorded = store.message(id).unwrap().stamp.predecessors.clone();
        let inbox_gid = store.long_term_id(inbox).unwrap().to_gid();
        let message_gid = store.long_term_id(id).unwrap().to_gid();
        let (_, base) = store.reserve_local_ids(1).unwrap();
        let target = LongTermId::new(store.replica_guid(), base).to_gid();

        let mut ctx = SyncContext::collector(archive, SyncKind::Contents);
        let stale = PredecessorChangeList::from_xids([xid(1)]);
        assert_eq!(
            ctx.import_message_move(&mut store, &inbox_gid, &message_gid, &stale.to_bytes(), &target, &xid(2).to_bytes()),
            Err(ServerError::SyncConflict)
        );
        let moved = ctx
            .import_message_move(&mut store, &inbox_gid, &message_gid, &recorded.to_bytes(), &target, &xid(2).to_bytes())
            .unwrap();
        assert_eq!(store.message(moved).unwrap().folder, archive);
        assert_eq!(
            ctx.import_message_move(&mut store, &inbox_gid, &message_gid, &recorded.to_bytes(), &target, &xid(3).to_bytes()),
            Err(ServerError::SyncObjectDeleted)
        );
    }

    #[test]
    fn test_hierarchy_import_needs_parent() {
        let mut store = store();
        let inbox = store.special_folder(SpecialFolder::Inbox);
        let mut ctx = SyncContext::collector(inbox, SyncKind::Hierarchy);
        let mut hierarchy = change(200, 1, &[], "ignored");
        hierarchy.push(TaggedValue::new(tags::DISPLAY_NAME, PropertyValue::Unicode("Imported".into())));
        let mut orphan = hierarchy.clone();
        orphan.push(TaggedValue::new(tags::PARENT_SOURCE_KEY, PropertyValue::Binary(client_key(999))));
        assert_eq!(
            ctx.import_hierarchy_change(&mut store, &orphan, &[]),
            Err(ServerError::SyncNoParent)
        );
        let id = ctx.import_hierarchy_change(&mut store, &hierarchy, &[]).unwrap();
        assert_eq!(store.folder(id).unwrap().display_name(), "Imported");
        assert_eq!(store.folder(id).unwrap().parent, Some(inbox));

        ctx.import_deletes(&mut store, IMPORT_DELETE_HIERARCHY, &[TaggedValue::new(
            tags::SOURCE_KEY.with_type(0x1102),
            PropertyValue::MultipleBinary(vec![client_key(200)]),
        )])
        .unwrap();
        assert!(!store.is_folder(id));
        assert!(!ctx.state().idset_given.contains(CLIENT, 200));
    }

    #[test]
    fn test_state_upload_rules() {
        let mut ctx = SyncContext::download(ShortTermId::NONE, SyncKind::Contents, contents_options());
        assert_eq!(
            ctx.continue_state_upload(&[1]),
            Err(ServerError::InvalidState("UploadStateStreamContinue without Begin"))
        );
        assert_eq!(
            ctx.begin_state_upload(PropertyTag(0x0037_001F), 0),
            Err(ServerError::InvalidParameter("StateProperty"))
        );
        let mut seen = IdSet::new();
        seen.insert(CLIENT, 42);
        let bytes = seen.to_bytes();
        ctx.begin_state_upload(StateProperty::CnsetSeen.tag(), bytes.len() as u32).unwrap();
        assert_eq!(ctx.phase(), SyncPhase::StreamingState);
        for chunk in bytes.chunks(3) {
            ctx.continue_state_upload(chunk).unwrap();
        }
        ctx.end_state_upload().unwrap();
        assert_eq!(ctx.phase(), SyncPhase::Configured);
        assert_eq!(ctx.state().cnset_seen, seen);
        assert!(ctx.end_state_upload().is_err());
    }
}
