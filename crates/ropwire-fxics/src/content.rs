//! Object content carried by FastTransfer streams.
//!
//! ```text
//! topFolder      = StartTopFld folderContent EndFolder
//! folderContent  = propList *message *(StartSubFld folderContent EndFolder)
//! message        = (StartMessage / StartFAIMsg) messageContent EndMessage
//! messageContent = propList *recipient *attachment
//! recipient      = StartRecip propList EndToRecip
//! attachment     = NewAttach propList [StartEmbed messageContent EndEmbed] EndAttach
//! ```
//!
//! [`ObjectAssembler`] consumes elements one at a time and yields an
//! [`FxItem`] each time a top-level piece of the target object is
//! complete, so a destination can apply a stream while it is still
//! arriving.

use ropwire_core::TaggedValue;
use serde::Serialize;

use crate::error::FxError;
use crate::marker::{Marker, meta};
use crate::stream::{FxElement, FxWriter};

/// Deepest nesting of folders, messages and attachments accepted
pub const MAX_NESTING: usize = 64;

/// Message properties, recipients and attachments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageContent {
    /// Message properties
    pub properties: Vec<TaggedValue>,
    /// Recipient rows
    pub recipients: Vec<Vec<TaggedValue>>,
    /// Attachments
    pub attachments: Vec<AttachmentContent>,
}

/// Attachment properties and an optional embedded message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachmentContent {
    /// Attachment properties
    pub properties: Vec<TaggedValue>,
    /// Embedded message, for attach-by-message attachments
    pub embedded: Option<Box<MessageContent>>,
}

/// Folder properties, messages and subfolders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderContent {
    /// Folder properties
    pub properties: Vec<TaggedValue>,
    /// Normal messages
    pub messages: Vec<MessageContent>,
    /// Folder-associated messages
    pub associated_messages: Vec<MessageContent>,
    /// Subfolders
    pub subfolders: Vec<FolderContent>,
}

/// Shape of a transferred object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectKind {
    /// Folder content without enclosing markers (CopyTo on a folder)
    Folder,
    /// Folder wrapped in StartTopFld/EndFolder (CopyFolder)
    TopFolder,
    /// Message content without enclosing markers (CopyTo on a message)
    Message,
    /// Attachment content without enclosing markers
    Attachment,
    /// Sequence of messages (CopyMessages)
    MessageList,
    /// Bare property list (CopyProperties)
    PropertyList,
}

/// A complete object ready to stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FxObject {
    /// See [`ObjectKind::Folder`]
    Folder(FolderContent),
    /// See [`ObjectKind::TopFolder`]
    TopFolder(FolderContent),
    /// See [`ObjectKind::Message`]
    Message(MessageContent),
    /// See [`ObjectKind::Attachment`]
    Attachment(AttachmentContent),
    /// See [`ObjectKind::MessageList`]; the flag marks associated messages
    MessageList(Vec<(bool, MessageContent)>),
    /// See [`ObjectKind::PropertyList`]
    PropertyList(Vec<TaggedValue>),
}

/// A completed top-level piece of the target object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FxItem {
    /// Property of the target object
    Property(TaggedValue),
    /// Recipient of the target message
    Recipient(Vec<TaggedValue>),
    /// Attachment of the target message
    Attachment(AttachmentContent),
    /// Embedded message of the target attachment
    Embedded(MessageContent),
    /// Message inside the target folder, or one entry of a message list
    Message {
        /// Folder-associated message
        associated: bool,
        /// Message content
        content: MessageContent,
    },
    /// Subfolder of the target folder, or the whole top folder
    Folder(FolderContent),
}

impl MessageContent {
    /// Fold an item produced by an assembler of kind [`ObjectKind::Message`]
    pub fn absorb(&mut self, item: FxItem) {
        match item {
            FxItem::Property(tv) => self.properties.push(tv),
            FxItem::Recipient(row) => self.recipients.push(row),
            FxItem::Attachment(attachment) => self.attachments.push(attachment),
            other => tracing::debug!("Ignoring {:?} for message content", other),
        }
    }

    /// Append `messageContent` without enclosing markers
    pub(crate) fn encode(&self, w: &mut FxWriter) -> Result<(), FxError> {
        w.properties(&self.properties)?;
        for row in &self.recipients {
            w.marker(Marker::StartRecip).properties(row)?;
            w.marker(Marker::EndToRecip);
        }
        for attachment in &self.attachments {
            w.marker(Marker::NewAttach);
            attachment.encode(w)?;
            w.marker(Marker::EndAttach);
        }
        Ok(())
    }
}

impl AttachmentContent {
    fn encode(&self, w: &mut FxWriter) -> Result<(), FxError> {
        w.properties(&self.properties)?;
        if let Some(embedded) = &self.embedded {
            w.marker(Marker::StartEmbed);
            embedded.encode(w)?;
            w.marker(Marker::EndEmbed);
        }
        Ok(())
    }
}

fn encode_message(w: &mut FxWriter, associated: bool, message: &MessageContent) -> Result<(), FxError> {
    w.marker(if associated {
        Marker::StartFaiMsg
    } else {
        Marker::StartMessage
    });
    message.encode(w)?;
    w.marker(Marker::EndMessage);
    Ok(())
}

impl FolderContent {
    /// Total messages in this folder and every subfolder
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
            + self.associated_messages.len()
            + self.subfolders.iter().map(FolderContent::message_count).sum::<usize>()
    }

    fn encode(&self, w: &mut FxWriter, units: &mut Vec<usize>) -> Result<(), FxError> {
        for value in &self.properties {
            w.property(value)?;
            units.push(w.len());
        }
        for message in &self.messages {
            encode_message(w, false, message)?;
            units.push(w.len());
        }
        for message in &self.associated_messages {
            encode_message(w, true, message)?;
            units.push(w.len());
        }
        for folder in &self.subfolders {
            w.marker(Marker::StartSubFld);
            folder.encode(w, &mut Vec::new())?;
            w.marker(Marker::EndFolder);
            units.push(w.len());
        }
        Ok(())
    }
}

impl FxObject {
    /// Shape of this object
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Folder(_) => ObjectKind::Folder,
            Self::TopFolder(_) => ObjectKind::TopFolder,
            Self::Message(_) => ObjectKind::Message,
            Self::Attachment(_) => ObjectKind::Attachment,
            Self::MessageList(_) => ObjectKind::MessageList,
            Self::PropertyList(_) => ObjectKind::PropertyList,
        }
    }

    /// Serialize, also returning the stream offset at which each
    /// top-level piece ends
    ///
    /// # Errors
    ///
    /// Fails when a property cannot be written to a stream.
    pub fn encode(&self) -> Result<(Vec<u8>, Vec<usize>), FxError> {
        let mut w = FxWriter::new();
        let mut units = Vec::new();
        match self {
            Self::Folder(folder) => folder.encode(&mut w, &mut units)?,
            Self::TopFolder(folder) => {
                w.marker(Marker::StartTopFld);
                folder.encode(&mut w, &mut units)?;
                w.marker(Marker::EndFolder);
                units.push(w.len());
            }
            Self::Message(message) => {
                w.properties(&message.properties)?;
                units.push(w.len());
                let rest = MessageContent {
                    properties: Vec::new(),
                    recipients: message.recipients.clone(),
                    attachments: message.attachments.clone(),
                };
                rest.encode(&mut w)?;
                units.push(w.len());
            }
            Self::Attachment(attachment) => {
                attachment.encode(&mut w)?;
                units.push(w.len());
            }
            Self::MessageList(messages) => {
                for (associated, message) in messages {
                    encode_message(&mut w, *associated, message)?;
                    units.push(w.len());
                }
            }
            Self::PropertyList(values) => {
                for value in values {
                    w.property(value)?;
                    units.push(w.len());
                }
            }
        }
        units.dedup();
        units.retain(|&end| end > 0);
        Ok((w.into_bytes(), units))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Properties,
    Recipients,
    Attachments,
    Messages,
    Subfolders,
    Closed,
}

#[derive(Debug)]
enum Frame {
    Message {
        associated: bool,
        embedded: bool,
        content: MessageContent,
        phase: Phase,
    },
    Recipient(Vec<TaggedValue>),
    Attachment {
        content: AttachmentContent,
        phase: Phase,
    },
    Folder {
        content: FolderContent,
        phase: Phase,
        top: bool,
    },
}

impl Frame {
    fn name(&self) -> &'static str {
        match self {
            Self::Message { embedded: true, .. } => "embedded message",
            Self::Message { .. } => "message",
            Self::Recipient(_) => "recipient",
            Self::Attachment { .. } => "attachment",
            Self::Folder { .. } => "folder",
        }
    }
}

fn message_frame(associated: bool, embedded: bool) -> Frame {
    Frame::Message {
        associated,
        embedded,
        content: MessageContent::default(),
        phase: Phase::Properties,
    }
}

fn folder_frame(top: bool) -> Frame {
    Frame::Folder {
        content: FolderContent::default(),
        phase: Phase::Properties,
        top,
    }
}

/// Advance `phase` to `next` unless that would move backwards
fn advance(phase: &mut Phase, next: Phase, marker: Marker, context: &'static str) -> Result<(), FxError> {
    if *phase > next {
        return Err(FxError::UnexpectedMarker {
            marker: marker.as_u32(),
            context,
        });
    }
    *phase = next;
    Ok(())
}

/// Incremental grammar checker and builder for one object kind
#[derive(Debug)]
pub struct ObjectAssembler {
    kind: ObjectKind,
    root_phase: Phase,
    stack: Vec<Frame>,
}

impl ObjectAssembler {
    /// Assembler expecting an object of `kind`
    #[must_use]
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            root_phase: Phase::Properties,
            stack: Vec::new(),
        }
    }

    /// Kind being assembled
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Number of open nested elements
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// True when the stream may end here
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stack.is_empty() && (self.kind != ObjectKind::TopFolder || self.root_phase == Phase::Closed)
    }

    /// Fail unless the stream may end here
    ///
    /// # Errors
    ///
    /// Returns [`FxError::Incomplete`] naming the innermost open element.
    pub fn finish(&self) -> Result<(), FxError> {
        if let Some(frame) = self.stack.last() {
            return Err(FxError::Incomplete(frame.name()));
        }
        if !self.is_complete() {
            return Err(FxError::Incomplete("top folder"));
        }
        Ok(())
    }

    /// Consume one element
    ///
    /// # Errors
    ///
    /// Fails when the element is not allowed at this point.
    pub fn push(&mut self, element: FxElement) -> Result<Option<FxItem>, FxError> {
        if self.stack.is_empty() {
            return self.push_root(element);
        }
        match element {
            FxElement::Property(value) => {
                self.push_property(value)?;
                Ok(None)
            }
            FxElement::Marker(marker) => self.push_marker(marker),
        }
    }

    fn open(&mut self, frame: Frame) -> Result<(), FxError> {
        if self.stack.len() >= MAX_NESTING {
            return Err(FxError::Incomplete("nesting limit"));
        }
        self.stack.push(frame);
        Ok(())
    }

    fn push_root(&mut self, element: FxElement) -> Result<Option<FxItem>, FxError> {
        let context = "object root";
        let marker = match element {
            FxElement::Property(value) => {
                let allowed = match self.kind {
                    ObjectKind::PropertyList => true,
                    ObjectKind::Folder | ObjectKind::Message | ObjectKind::Attachment => {
                        self.root_phase == Phase::Properties
                    }
                    ObjectKind::MessageList => value.tag == meta::EC_WARNING,
                    ObjectKind::TopFolder => false,
                };
                if !allowed {
                    return Err(FxError::UnexpectedProperty {
                        tag: value.tag.0,
                        context,
                    });
                }
                if value.tag == meta::EC_WARNING || value.tag == meta::NEW_FX_FOLDER {
                    return Ok(None);
                }
                return Ok(Some(FxItem::Property(value)));
            }
            FxElement::Marker(marker) => marker,
        };
        let unexpected = FxError::UnexpectedMarker {
            marker: marker.as_u32(),
            context,
        };
        match (self.kind, marker) {
            (ObjectKind::Message, Marker::StartRecip) => {
                advance(&mut self.root_phase, Phase::Recipients, marker, context)?;
                self.open(Frame::Recipient(Vec::new()))?;
            }
            (ObjectKind::Message, Marker::NewAttach) => {
                advance(&mut self.root_phase, Phase::Attachments, marker, context)?;
                self.open(Frame::Attachment {
                    content: AttachmentContent::default(),
                    phase: Phase::Properties,
                })?;
            }
            (ObjectKind::Attachment, Marker::StartEmbed) if self.root_phase == Phase::Properties => {
                self.root_phase = Phase::Closed;
                self.open(message_frame(false, true))?;
            }
            (ObjectKind::Folder, Marker::StartMessage | Marker::StartFaiMsg) => {
                advance(&mut self.root_phase, Phase::Messages, marker, context)?;
                self.open(message_frame(marker == Marker::StartFaiMsg, false))?;
            }
            (ObjectKind::Folder, Marker::StartSubFld) => {
                advance(&mut self.root_phase, Phase::Subfolders, marker, context)?;
                self.open(folder_frame(false))?;
            }
            (ObjectKind::TopFolder, Marker::StartTopFld) if self.root_phase == Phase::Properties => {
                self.root_phase = Phase::Closed;
                self.open(folder_frame(true))?;
            }
            (ObjectKind::MessageList, Marker::StartMessage | Marker::StartFaiMsg) => {
                self.open(message_frame(marker == Marker::StartFaiMsg, false))?;
            }
            _ => return Err(unexpected),
        }
        Ok(None)
    }

    fn push_property(&mut self, value: TaggedValue) -> Result<(), FxError> {
        let Some(frame) = self.stack.last_mut() else {
            return Ok(());
        };
        let context = frame.name();
        let target = match frame {
            Frame::Message {
                content,
                phase: Phase::Properties,
                ..
            } => &mut content.properties,
            Frame::Recipient(row) => row,
            Frame::Attachment {
                content,
                phase: Phase::Properties,
            } => &mut content.properties,
            Frame::Folder {
                content,
                phase: Phase::Properties,
                ..
            } => &mut content.properties,
            _ => {
                return Err(FxError::UnexpectedProperty {
                    tag: value.tag.0,
                    context,
                });
            }
        };
        if value.tag != meta::NEW_FX_FOLDER && value.tag != meta::EC_WARNING {
            target.push(value);
        }
        Ok(())
    }

    fn push_marker(&mut self, marker: Marker) -> Result<Option<FxItem>, FxError> {
        let Some(frame) = self.stack.last_mut() else {
            return Ok(None);
        };
        let context = frame.name();
        let unexpected = FxError::UnexpectedMarker {
            marker: marker.as_u32(),
            context,
        };
        let closes = match (&mut *frame, marker) {
            (Frame::Message { embedded: false, .. }, Marker::EndMessage)
            | (Frame::Message { embedded: true, .. }, Marker::EndEmbed)
            | (Frame::Recipient(_), Marker::EndToRecip)
            | (Frame::Attachment { .. }, Marker::EndAttach)
            | (Frame::Folder { .. }, Marker::EndFolder) => true,
            (Frame::Message { phase, .. }, Marker::StartRecip) => {
                advance(phase, Phase::Recipients, marker, context)?;
                self.open(Frame::Recipient(Vec::new()))?;
                false
            }
            (Frame::Message { phase, .. }, Marker::NewAttach) => {
                advance(phase, Phase::Attachments, marker, context)?;
                self.open(Frame::Attachment {
                    content: AttachmentContent::default(),
                    phase: Phase::Properties,
                })?;
                false
            }
            (Frame::Attachment { phase, .. }, Marker::StartEmbed) if *phase == Phase::Properties => {
                *phase = Phase::Closed;
                self.open(message_frame(false, true))?;
                false
            }
            (Frame::Folder { phase, .. }, Marker::StartMessage | Marker::StartFaiMsg) => {
                advance(phase, Phase::Messages, marker, context)?;
                self.open(message_frame(marker == Marker::StartFaiMsg, false))?;
                false
            }
            (Frame::Folder { phase, .. }, Marker::StartSubFld) => {
                advance(phase, Phase::Subfolders, marker, context)?;
                self.open(folder_frame(false))?;
                false
            }
            _ => return Err(unexpected),
        };
        if !closes {
            return Ok(None);
        }
        let Some(closed) = self.stack.pop() else {
            return Ok(None);
        };
        Ok(self.attach(closed))
    }

    /// Hand a closed frame to its parent, or surface it as an item
    fn attach(&mut self, closed: Frame) -> Option<FxItem> {
        let parent = self.stack.last_mut();
        match (closed, parent) {
            (Frame::Recipient(row), Some(Frame::Message { content, .. })) => {
                content.recipients.push(row);
                None
            }
            (Frame::Recipient(row), _) => Some(FxItem::Recipient(row)),
            (Frame::Attachment { content: attachment, .. }, Some(Frame::Message { content, .. })) => {
                content.attachments.push(attachment);
                None
            }
            (Frame::Attachment { content, .. }, _) => Some(FxItem::Attachment(content)),
            (
                Frame::Message {
                    embedded: true,
                    content: message,
                    ..
                },
                Some(Frame::Attachment { content, .. }),
            ) => {
                content.embedded = Some(Box::new(message));
                None
            }
            (
                Frame::Message {
                    embedded: true,
                    content,
                    ..
                },
                _,
            ) => Some(FxItem::Embedded(content)),
            (
                Frame::Message {
                    associated,
                    content: message,
                    ..
                },
                Some(Frame::Folder { content, .. }),
            ) => {
                if associated {
                    content.associated_messages.push(message);
                } else {
                    content.messages.push(message);
                }
                None
            }
            (Frame::Message { associated, content, .. }, _) => Some(FxItem::Message { associated, content }),
            (Frame::Folder { content: folder, .. }, Some(Frame::Folder { content, .. })) => {
                content.subfolders.push(folder);
                None
            }
            (Frame::Folder { content, .. }, _) => Some(FxItem::Folder(content)),
        }
    }
}

/// Parse a complete stream of `kind` into items
///
/// # Errors
///
/// Fails on a malformed stream or one that ends inside an element.
pub fn assemble_all(kind: ObjectKind, bytes: &[u8]) -> Result<Vec<FxItem>, FxError> {
    let mut assembler = ObjectAssembler::new(kind);
    let mut items = Vec::new();
    for element in crate::stream::parse_all(bytes)? {
        if let Some(item) = assembler.push(element)? {
            items.push(item);
        }
    }
    assembler.finish()?;
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ropwire_core::property::tags;
    use ropwire_core::PropertyValue;

    fn text(tag: ropwire_core::PropertyTag, s: &str) -> TaggedValue {
        TaggedValue::new(tag, PropertyValue::Unicode(s.into()))
    }

    fn sample_message() -> MessageContent {
        MessageContent {
            properties: vec![text(tags::SUBJECT, "hello")],
            recipients: vec![vec![text(tags::EMAIL_ADDRESS, "a@example.com")]],
            attachments: vec![AttachmentContent {
                properties: vec![text(tags::ATTACH_LONG_FILENAME, "a.txt")],
                embedded: Some(Box::new(MessageContent {
                    properties: vec![text(tags::SUBJECT, "inner")],
                    ..MessageContent::default()
                })),
            }],
        }
    }

    #[test]
    fn test_message_items() {
        let (bytes, units) = FxObject::Message(sample_message()).encode().unwrap();
        assert_eq!(units.last(), Some(&bytes.len()));
        let items = assemble_all(ObjectKind::Message, &bytes).unwrap();
        let mut rebuilt = MessageContent::default();
        for item in items {
            rebuilt.absorb(item);
        }
        assert_eq!(rebuilt, sample_message());
    }

    #[test]
    fn test_top_folder_yields_one_item() {
        let folder = FolderContent {
            properties: vec![text(tags::DISPLAY_NAME, "Top")],
            messages: vec![sample_message()],
            associated_messages: vec![MessageContent::default()],
            subfolders: vec![FolderContent {
                properties: vec![text(tags::DISPLAY_NAME, "Child")],
                ..FolderContent::default()
            }],
        };
        let (bytes, _) = FxObject::TopFolder(folder.clone()).encode().unwrap();
        let items = assemble_all(ObjectKind::TopFolder, &bytes).unwrap();
        assert_eq!(items, vec![FxItem::Folder(folder.clone())]);
        assert_eq!(folder.message_count(), 2);
    }

    #[test]
    fn test_message_list_items() {
        let list = vec![(false, sample_message()), (true, MessageContent::default())];
        let (bytes, units) = FxObject::MessageList(list).encode().unwrap();
        assert_eq!(units.len(), 2);
        let items = assemble_all(ObjectKind::MessageList, &bytes).unwrap();
        assert!(matches!(items[1], FxItem::Message { associated: true, .. }));
    }

    #[test]
    fn test_property_after_recipient_rejected() {
        let mut w = FxWriter::new();
        w.marker(Marker::StartRecip).marker(Marker::EndToRecip);
        w.property(&text(tags::SUBJECT, "late")).unwrap();
        let err = assemble_all(ObjectKind::Message, &w.into_bytes()).unwrap_err();
        assert!(matches!(err, FxError::UnexpectedProperty { .. }));
    }

    #[test]
    fn test_mismatched_end_marker_rejected() {
        let mut w = FxWriter::new();
        w.marker(Marker::StartTopFld).marker(Marker::EndMessage);
        let err = assemble_all(ObjectKind::TopFolder, &w.into_bytes()).unwrap_err();
        assert_eq!(
            err,
            FxError::UnexpectedMarker {
                marker: Marker::EndMessage.as_u32(),
                context: "folder",
            }
        );
    }

    #[test]
    fn test_unterminated_folder_is_incomplete() {
        let mut w = FxWriter::new();
        w.marker(Marker::StartTopFld).marker(Marker::StartMessage);
        assert_eq!(
            assemble_all(ObjectKind::TopFolder, &w.into_bytes()),
            Err(FxError::Incomplete("message"))
        );
    }
}
