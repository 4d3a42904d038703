//! ICS download streams.
//!
//! ```text
//! contentsSync   = *messageChange [deletions] [readStateChanges] state IncrSyncEnd
//! hierarchySync  = *folderChange [deletions] state IncrSyncEnd
//! messageChange  = IncrSyncChg propList IncrSyncMessage messageContent
//! folderChange   = IncrSyncChg propList
//! deletions      = IncrSyncDel propList
//! readStateChanges = IncrSyncRead propList
//! state          = IncrSyncStateBegin propList IncrSyncStateEnd
//! ```
//!
//! A message body has no end marker; the next ICS marker closes it.

use ropwire_core::property::{find, tags};
use ropwire_core::{CodecError, TaggedValue};
use serde::Serialize;

use crate::content::{MessageContent, ObjectAssembler, ObjectKind};
use crate::error::FxError;
use crate::idset::IdSet;
use crate::marker::{Marker, meta};
use crate::pcl::PredecessorChangeList;
use crate::state::SyncState;
use crate::stream::{FxElement, FxWriter, parse_all};

/// What a synchronization context exports or imports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum SyncKind {
    /// Messages of one folder
    Contents = 0x01,
    /// Subfolders of one folder
    Hierarchy = 0x02,
}

impl TryFrom<u8> for SyncKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0x01 => Ok(Self::Contents),
            0x02 => Ok(Self::Hierarchy),
            other => Err(CodecError::InvalidValue {
                field: "SynchronizationType",
                value: u64::from(other),
            }),
        }
    }
}

/// One changed message: identity header plus full content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageChange {
    /// SourceKey, LastModificationTime, ChangeKey, PredecessorChangeList,
    /// Associated and optional extra identity
    pub header: Vec<TaggedValue>,
    /// Message content
    pub content: MessageContent,
}

impl MessageChange {
    /// Source key from the header
    #[must_use]
    pub fn source_key(&self) -> Option<&[u8]> {
        find(&self.header, tags::SOURCE_KEY).and_then(|v| v.as_binary())
    }

    /// Change key from the header
    #[must_use]
    pub fn change_key(&self) -> Option<&[u8]> {
        find(&self.header, tags::CHANGE_KEY).and_then(|v| v.as_binary())
    }

    /// True for a folder-associated message
    #[must_use]
    pub fn is_associated(&self) -> bool {
        find(&self.header, tags::ASSOCIATED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Decoded predecessor change list, empty when absent
    ///
    /// # Errors
    ///
    /// Fails when the header carries a malformed list.
    pub fn predecessor_change_list(&self) -> Result<PredecessorChangeList, FxError> {
        match find(&self.header, tags::PREDECESSOR_CHANGE_LIST).and_then(|v| v.as_binary()) {
            Some(bytes) => PredecessorChangeList::from_bytes(bytes),
            None => Ok(PredecessorChangeList::new()),
        }
    }
}

/// One changed folder: identity header and folder properties in one list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderChange {
    /// ParentSourceKey, SourceKey, LastModificationTime, ChangeKey,
    /// PredecessorChangeList, DisplayName and the folder's properties
    pub properties: Vec<TaggedValue>,
}

impl FolderChange {
    /// Source key of the folder
    #[must_use]
    pub fn source_key(&self) -> Option<&[u8]> {
        find(&self.properties, tags::SOURCE_KEY).and_then(|v| v.as_binary())
    }

    /// Source key of the parent folder
    #[must_use]
    pub fn parent_source_key(&self) -> Option<&[u8]> {
        find(&self.properties, tags::PARENT_SOURCE_KEY).and_then(|v| v.as_binary())
    }

    /// Folder name
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        find(&self.properties, tags::DISPLAY_NAME).and_then(|v| v.as_str())
    }
}

/// Everything one ICS download carries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IcsDownload {
    /// Changed messages, contents sync only
    pub message_changes: Vec<MessageChange>,
    /// Changed folders, hierarchy sync only
    pub folder_changes: Vec<FolderChange>,
    /// Objects deleted, expired or no longer in scope
    pub deleted: IdSet,
    /// Messages that became read
    pub read: IdSet,
    /// Messages that became unread
    pub unread: IdSet,
    /// State the client keeps for the next sync
    pub state: SyncState,
}

impl IcsDownload {
    /// Serialize for `kind`, also returning the offset at which each
    /// change and section ends
    ///
    /// # Errors
    ///
    /// Fails when a property cannot be written to a stream.
    pub fn encode(&self, kind: SyncKind) -> Result<(Vec<u8>, Vec<usize>), FxError> {
        let mut w = FxWriter::new();
        let mut units = Vec::new();
        match kind {
            SyncKind::Contents => {
                for change in &self.message_changes {
                    w.marker(Marker::IncrSyncChg).properties(&change.header)?;
                    w.marker(Marker::IncrSyncMessage);
                    change.content.encode(&mut w)?;
                    units.push(w.len());
                }
            }
            SyncKind::Hierarchy => {
                for change in &self.folder_changes {
                    w.marker(Marker::IncrSyncChg).properties(&change.properties)?;
                    units.push(w.len());
                }
            }
        }
        if !self.deleted.is_empty() {
            w.marker(Marker::IncrSyncDel)
                .meta_binary(meta::IDSET_DELETED, &self.deleted.to_bytes());
            units.push(w.len());
        }
        if kind == SyncKind::Contents && !(self.read.is_empty() && self.unread.is_empty()) {
            w.marker(Marker::IncrSyncRead);
            if !self.read.is_empty() {
                w.meta_binary(meta::IDSET_READ, &self.read.to_bytes());
            }
            if !self.unread.is_empty() {
                w.meta_binary(meta::IDSET_UNREAD, &self.unread.to_bytes());
            }
            units.push(w.len());
        }
        self.state.write(&mut w, kind == SyncKind::Contents)?;
        w.marker(Marker::IncrSyncEnd);
        units.push(w.len());
        Ok((w.into_bytes(), units))
    }

    /// Parse a complete download stream
    ///
    /// # Errors
    ///
    /// Fails on a grammar violation or a stream that stops early.
    pub fn decode(kind: SyncKind, bytes: &[u8]) -> Result<Self, FxError> {
        let mut reader = IcsReader::new(kind);
        for element in parse_all(bytes)? {
            reader.push(element)?;
        }
        reader.finish()
    }
}

/// Position in the stream, in the order sections may appear
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Changes,
    Deletions,
    ReadState,
    State,
    StateDone,
    Ended,
}

#[derive(Debug)]
enum Open {
    MessageHeader(MessageChange),
    MessageBody(MessageChange, ObjectAssembler),
    Folder(FolderChange),
}

/// Incremental reader for ICS download streams
#[derive(Debug)]
pub struct IcsReader {
    kind: SyncKind,
    stage: Stage,
    open: Option<Open>,
    out: IcsDownload,
}

impl IcsReader {
    /// Reader for a stream of `kind`
    #[must_use]
    pub fn new(kind: SyncKind) -> Self {
        Self {
            kind,
            stage: Stage::Changes,
            open: None,
            out: IcsDownload::default(),
        }
    }

    /// Consume one element
    ///
    /// # Errors
    ///
    /// Fails when the element is not allowed at this point.
    pub fn push(&mut self, element: FxElement) -> Result<(), FxError> {
        match element {
            FxElement::Property(value) => self.push_property(value),
            FxElement::Marker(marker) => self.push_marker(marker),
        }
    }

    /// Complete the download
    ///
    /// # Errors
    ///
    /// Returns [`FxError::Incomplete`] unless IncrSyncEnd was seen.
    pub fn finish(self) -> Result<IcsDownload, FxError> {
        if self.stage != Stage::Ended {
            return Err(FxError::Incomplete("ICS stream"));
        }
        Ok(self.out)
    }

    fn push_property(&mut self, value: TaggedValue) -> Result<(), FxError> {
        let tag = value.tag.0;
        let unexpected = move |context| FxError::UnexpectedProperty { tag, context };
        match (&mut self.open, self.stage) {
            (Some(Open::MessageHeader(change)), _) => change.header.push(value),
            (Some(Open::MessageBody(change, assembler)), _) => {
                if let Some(item) = assembler.push(FxElement::Property(value))? {
                    change.content.absorb(item);
                }
            }
            (Some(Open::Folder(change)), _) => change.properties.push(value),
            (None, Stage::Deletions) => {
                let deleted_tags = [meta::IDSET_DELETED, meta::IDSET_NO_LONGER_IN_SCOPE, meta::IDSET_EXPIRED];
                if !deleted_tags.contains(&value.tag) {
                    return Err(unexpected("deletions"));
                }
                let bytes = value.value.as_binary().ok_or_else(|| unexpected("deletions"))?;
                self.out.deleted.union(&IdSet::from_bytes(bytes)?);
            }
            (None, Stage::ReadState) => {
                let bytes = value.value.as_binary().ok_or_else(|| unexpected("read state"))?;
                let set = IdSet::from_bytes(bytes)?;
                if value.tag == meta::IDSET_READ {
                    self.out.read.union(&set);
                } else if value.tag == meta::IDSET_UNREAD {
                    self.out.unread.union(&set);
                } else {
                    return Err(unexpected("read state"));
                }
            }
            (None, Stage::State) => self.out.state.apply_property(&value)?,
            (None, _) => return Err(unexpected("ICS stream")),
        }
        Ok(())
    }

    fn push_marker(&mut self, marker: Marker) -> Result<(), FxError> {
        if let Some(Open::MessageBody(change, assembler)) = &mut self.open {
            if assembler.depth() > 0 || !is_ics_marker(marker) {
                if let Some(item) = assembler.push(FxElement::Marker(marker))? {
                    change.content.absorb(item);
                }
                return Ok(());
            }
        }
        let unexpected = FxError::UnexpectedMarker {
            marker: marker.as_u32(),
            context: "ICS stream",
        };

        if marker == Marker::IncrSyncMessage {
            return match self.open.take() {
                Some(Open::MessageHeader(change)) => {
                    self.open = Some(Open::MessageBody(change, ObjectAssembler::new(ObjectKind::Message)));
                    Ok(())
                }
                _ => Err(unexpected),
            };
        }

        self.close_open()?;
        let next = match marker {
            Marker::IncrSyncChg if self.stage == Stage::Changes => {
                self.open = Some(match self.kind {
                    SyncKind::Contents => Open::MessageHeader(MessageChange::default()),
                    SyncKind::Hierarchy => Open::Folder(FolderChange::default()),
                });
                Stage::Changes
            }
            Marker::IncrSyncDel => Stage::Deletions,
            Marker::IncrSyncRead if self.kind == SyncKind::Contents => Stage::ReadState,
            Marker::IncrSyncStateBegin => Stage::State,
            Marker::IncrSyncStateEnd if self.stage == Stage::State => Stage::StateDone,
            Marker::IncrSyncEnd if self.stage == Stage::StateDone => Stage::Ended,
            _ => return Err(unexpected),
        };
        if next < self.stage || (next == self.stage && next != Stage::Changes) {
            return Err(unexpected);
        }
        self.stage = next;
        Ok(())
    }

    fn close_open(&mut self) -> Result<(), FxError> {
        match self.open.take() {
            None => {}
            Some(Open::MessageHeader(_)) => return Err(FxError::Incomplete("message change header")),
            Some(Open::MessageBody(change, assembler)) => {
                assembler.finish()?;
                self.out.message_changes.push(change);
            }
            Some(Open::Folder(change)) => self.out.folder_changes.push(change),
        }
        Ok(())
    }
}

fn is_ics_marker(marker: Marker) -> bool {
    matches!(
        marker,
        Marker::IncrSyncChg
            | Marker::IncrSyncChgPartial
            | Marker::IncrSyncDel
            | Marker::IncrSyncEnd
            | Marker::IncrSyncMessage
            | Marker::IncrSyncRead
            | Marker::IncrSyncStateBegin
            | Marker::IncrSyncStateEnd
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::AttachmentContent;
    use ropwire_core::ids::ReplicaGuid;
    use ropwire_core::{PropertyTag, PropertyValue};

    fn binary(tag: PropertyTag, bytes: &[u8]) -> TaggedValue {
        TaggedValue::new(tag, PropertyValue::Binary(bytes.to_vec()))
    }

    fn text(tag: PropertyTag, s: &str) -> TaggedValue {
        TaggedValue::new(tag, PropertyValue::Unicode(s.into()))
    }

    fn contents() -> IcsDownload {
        let guid = ReplicaGuid([4; 16]);
        let mut download = IcsDownload::default();
        download.message_changes.push(MessageChange {
            header: vec![
                binary(tags::SOURCE_KEY, &[1; 22]),
                TaggedValue::new(tags::ASSOCIATED, PropertyValue::Boolean(true)),
            ],
            content: MessageContent {
                properties: vec![text(tags::SUBJECT, "first")],
                recipients: vec![vec![text(tags::EMAIL_ADDRESS, "r@example.com")]],
                attachments: vec![AttachmentContent {
                    properties: vec![text(tags::ATTACH_LONG_FILENAME, "x.bin")],
                    embedded: None,
                }],
            },
        });
        download.message_changes.push(MessageChange {
            header: vec![binary(tags::SOURCE_KEY, &[2; 22])],
            content: MessageContent {
                properties: vec![text(tags::SUBJECT, "second")],
                ..MessageContent::default()
            },
        });
        download.deleted.insert(guid, 30);
        download.read.insert(guid, 31);
        download.state.idset_given.insert(guid, 32);
        download.state.cnset_seen.insert(guid, 33);
        download
    }

    #[test]
    fn test_contents_stream_roundtrip() {
        let download = contents();
        let (bytes, units) = download.encode(SyncKind::Contents).unwrap();
        assert_eq!(units.last(), Some(&bytes.len()));
        let decoded = IcsDownload::decode(SyncKind::Contents, &bytes).unwrap();
        assert_eq!(decoded, download);
        assert!(decoded.message_changes[0].is_associated());
        assert_eq!(decoded.message_changes[1].source_key(), Some(&[2u8; 22][..]));
    }

    #[test]
    fn test_hierarchy_stream_roundtrip() {
        let mut download = IcsDownload::default();
        download.folder_changes.push(FolderChange {
            properties: vec![
                binary(tags::PARENT_SOURCE_KEY, &[7; 22]),
                binary(tags::SOURCE_KEY, &[8; 22]),
                text(tags::DISPLAY_NAME, "Projects"),
            ],
        });
        download.state.cnset_seen.insert(ReplicaGuid([4; 16]), 2);
        let (bytes, _) = download.encode(SyncKind::Hierarchy).unwrap();
        let decoded = IcsDownload::decode(SyncKind::Hierarchy, &bytes).unwrap();
        assert_eq!(decoded.folder_changes[0].display_name(), Some("Projects"));
        assert_eq!(decoded, download);
    }

    #[test]
    fn test_empty_download_is_state_only() {
        let (bytes, units) = IcsDownload::default().encode(SyncKind::Contents).unwrap();
        assert_eq!(units.len(), 1);
        let elements = parse_all(&bytes).unwrap();
        assert_eq!(elements.first(), Some(&FxElement::Marker(Marker::IncrSyncStateBegin)));
        assert_eq!(elements.last(), Some(&FxElement::Marker(Marker::IncrSyncEnd)));
    }

    #[test]
    fn test_read_state_rejected_in_hierarchy() {
        let mut w = FxWriter::new();
        w.marker(Marker::IncrSyncRead);
        let mut reader = IcsReader::new(SyncKind::Hierarchy);
        let element = parse_all(&w.into_bytes()).unwrap().remove(0);
        assert!(matches!(reader.push(element), Err(FxError::UnexpectedMarker { .. })));
    }

    #[test]
    fn test_sections_out_of_order_rejected() {
        let mut w = FxWriter::new();
        w.marker(Marker::IncrSyncStateBegin)
            .marker(Marker::IncrSyncStateEnd)
            .marker(Marker::IncrSyncChg);
        assert!(IcsDownload::decode(SyncKind::Contents, &w.into_bytes()).is_err());
    }

    #[test]
    fn test_message_header_without_body_rejected() {
        let mut w = FxWriter::new();
        w.marker(Marker::IncrSyncChg).marker(Marker::IncrSyncDel);
        assert_eq!(
            IcsDownload::decode(SyncKind::Contents, &w.into_bytes()),
            Err(FxError::Incomplete("message change header"))
        );
    }

    #[test]
    fn test_missing_end_is_incomplete() {
        let (bytes, _) = contents().encode(SyncKind::Contents).unwrap();
        let cut = &bytes[..bytes.len() - 4];
        assert_eq!(
            IcsDownload::decode(SyncKind::Contents, cut),
            Err(FxError::Incomplete("ICS stream"))
        );
    }
}
