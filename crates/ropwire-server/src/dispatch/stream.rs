//! Property streams and object-to-object copies

use ropwire_core::rop::PropertyProblem;
use ropwire_core::{
    BUFFER_SIZE_SERVER_CHOICE, PropertyTag, PropertyType, PropertyValue, ResponseBody, ReturnValue,
    ServerObjectHandle, TaggedValue,
};

use super::fast_transfer::import_folder_children;
use super::{Outcome, Reply, RopCall};
use crate::error::ServerError;
use crate::objects::{ServerObject, StreamObject, StreamParent};
use crate::server::lock;
use crate::session::Session;
use crate::store::{PropertyBag, is_computed, to_values};

/// OpenStream modes
const STREAM_READ_ONLY: u8 = 0x00;
const STREAM_READ_WRITE: u8 = 0x01;
const STREAM_CREATE: u8 = 0x02;

/// CopyFlags: keep properties the destination already has
const COPY_NO_OVERWRITE: u8 = 0x02;

/// RopId, handle index, return value and the 16-bit data size
const READ_STREAM_OVERHEAD: usize = 8;

impl Session {
    pub(crate) fn open_stream(&mut self, call: &RopCall, tag: PropertyTag, open_mode: u8) -> Outcome {
        let input = call.input()?;
        if !matches!(open_mode, STREAM_READ_ONLY | STREAM_READ_WRITE | STREAM_CREATE) {
            return Err(ServerError::InvalidParameter("OpenModeFlags").into());
        }
        streamable(tag)?;
        let mailbox = self.store(call.logon_id)?;
        let (parent, current) = match self.object(input)? {
            ServerObject::Message(message) => (
                StreamParent::Message(input),
                message.draft.properties.get(&tag).cloned(),
            ),
            ServerObject::Folder(folder) => (
                StreamParent::Folder(folder.id),
                lock(&mailbox).folder(folder.id)?.properties.get(&tag).cloned(),
            ),
            _ => return Err(ServerError::WrongObject("OpenStream").into()),
        };
        let data = match (open_mode, current) {
            (STREAM_CREATE, _) => Vec::new(),
            (_, Some(value)) => value_bytes(&value)?,
            (_, None) => return Err(ServerError::PropertyNotFound(tag.0).into()),
        };
        let stream_size = u32::try_from(data.len()).unwrap_or(u32::MAX);
        let stream = StreamObject {
            parent,
            tag,
            data,
            position: 0,
            writable: open_mode != STREAM_READ_ONLY,
            dirty: open_mode == STREAM_CREATE,
        };
        let handle = self.bind(call, ServerObject::Stream(stream))?;
        Ok(Reply::created(ResponseBody::OpenStream { stream_size }, handle))
    }

    pub(crate) fn read_stream(&mut self, call: &RopCall, byte_count: u16, maximum_byte_count: u32) -> Outcome {
        let requested = if byte_count == BUFFER_SIZE_SERVER_CHOICE {
            usize::try_from(maximum_byte_count).unwrap_or(usize::MAX)
        } else {
            usize::from(byte_count)
        };
        let count = requested
            .min(self.room.saturating_sub(READ_STREAM_OVERHEAD))
            .min(usize::from(u16::MAX));
        let ServerObject::Stream(stream) = self.object_mut(call.input()?)? else {
            return Err(ServerError::WrongObject("ReadStream").into());
        };
        let data = stream.read(count);
        Ok(Reply::new(ResponseBody::ReadStream { data }))
    }

    pub(crate) fn write_stream(&mut self, call: &RopCall, data: &[u8]) -> Outcome {
        let ServerObject::Stream(stream) = self.object_mut(call.input()?)? else {
            return Err(ServerError::WrongObject("WriteStream").into());
        };
        let written = stream.write(data)?;
        Ok(Reply::new(ResponseBody::WriteStream {
            written_size: u16::try_from(written).unwrap_or(u16::MAX),
        }))
    }

    /// Write a stream's bytes back to its property
    pub(crate) fn commit_stream(&mut self, logon_id: u8, handle: ServerObjectHandle) -> Result<(), ServerError> {
        let ServerObject::Stream(stream) = self.object_mut(handle)? else {
            return Err(ServerError::WrongObject("CommitStream"));
        };
        if !stream.dirty {
            return Ok(());
        }
        let value = TaggedValue {
            tag: stream.tag,
            value: bytes_value(stream.tag, &stream.data)?,
        };
        stream.dirty = false;
        let parent = stream.parent;
        match parent {
            StreamParent::Message(owner) => {
                let message = self
                    .message_mut(owner, "CommitStream")
                    .map_err(|_| ServerError::InvalidState("stream owner was released"))?;
                message.draft.set(&[value]);
            }
            StreamParent::Folder(id) => {
                let mailbox = self.store(logon_id)?;
                lock(&mailbox).set_folder_properties(id, &[value])?;
            }
        }
        Ok(())
    }

    pub(crate) fn copy_to(
        &mut self,
        call: &RopCall,
        want_sub_objects: bool,
        copy_flags: u8,
        excluded_tags: &[PropertyTag],
    ) -> Outcome {
        let source = call.input()?;
        let dest = call.destination()?;
        let selection = |tag: PropertyTag| !excluded_tags.iter().any(|t| t.id() == tag.id());
        let (values, _) = self.copyable(call, source, &selection)?;
        self.copy_values(call, dest, values, copy_flags)?;
        if want_sub_objects {
            self.copy_sub_objects(call, source, dest)?;
        }
        Ok(Reply::new(ResponseBody::PropertyProblems { problems: Vec::new() }))
    }

    pub(crate) fn copy_properties(&mut self, call: &RopCall, copy_flags: u8, tags: &[PropertyTag]) -> Outcome {
        let source = call.input()?;
        let dest = call.destination()?;
        let selection = |tag: PropertyTag| tags.iter().any(|t| t.id() == tag.id());
        let (values, bag) = self.copyable(call, source, &selection)?;
        let problems = tags
            .iter()
            .enumerate()
            .filter(|(_, tag)| !bag.keys().any(|t| t.id() == tag.id()))
            .map(|(index, tag)| PropertyProblem {
                index: u16::try_from(index).unwrap_or(u16::MAX),
                tag: *tag,
                error: ReturnValue::NOT_FOUND,
            })
            .collect();
        self.copy_values(call, dest, values, copy_flags)?;
        Ok(Reply::new(ResponseBody::PropertyProblems { problems }))
    }

    /// Source properties passing `selection`, with the full source bag
    fn copyable(
        &self,
        call: &RopCall,
        source: ServerObjectHandle,
        selection: &dyn Fn(PropertyTag) -> bool,
    ) -> Result<(Vec<TaggedValue>, PropertyBag), ServerError> {
        let bag = match self.object(source)? {
            ServerObject::Message(message) => message.draft.properties.clone(),
            ServerObject::Folder(folder) => {
                let mailbox = self.store(call.logon_id)?;
                let store = lock(&mailbox);
                store.folder(folder.id)?.properties.clone()
            }
            _ => return Err(ServerError::WrongObject(call.rop_id.name())),
        };
        let values = to_values(&bag)
            .into_iter()
            .filter(|tv| !is_computed(tv.tag) && selection(tv.tag))
            .collect();
        Ok((values, bag))
    }

    fn copy_values(
        &mut self,
        call: &RopCall,
        dest: ServerObjectHandle,
        values: Vec<TaggedValue>,
        copy_flags: u8,
    ) -> Result<(), ServerError> {
        let source_kind = call.input.map(|h| self.object(h).map(ServerObject::type_name)).transpose()?;
        let mailbox = self.store(call.logon_id)?;
        let dest_object = self.object_mut(dest)?;
        if source_kind != Some(dest_object.type_name()) {
            return Err(ServerError::WrongObject("copy between different object types"));
        }
        let keep_existing = copy_flags & COPY_NO_OVERWRITE != 0;
        match dest_object {
            ServerObject::Message(message) => {
                let values: Vec<TaggedValue> = values
                    .into_iter()
                    .filter(|tv| !(keep_existing && message.draft.properties.contains_key(&tv.tag)))
                    .collect();
                message.draft.set(&values);
            }
            ServerObject::Folder(folder) => {
                let mut store = lock(&mailbox);
                let existing = &store.folder(folder.id)?.properties;
                let values: Vec<TaggedValue> = values
                    .into_iter()
                    .filter(|tv| !(keep_existing && existing.contains_key(&tv.tag)))
                    .collect();
                store.set_folder_properties(folder.id, &values)?;
            }
            _ => return Err(ServerError::WrongObject(call.rop_id.name())),
        }
        Ok(())
    }

    fn copy_sub_objects(
        &mut self,
        call: &RopCall,
        source: ServerObjectHandle,
        dest: ServerObjectHandle,
    ) -> Result<(), ServerError> {
        match self.object(source)? {
            ServerObject::Message(message) => {
                let recipients = message.draft.recipients.clone();
                let attachments = message.draft.attachments.clone();
                let target = self.message_mut(dest, "CopyTo")?;
                target.draft.recipients = recipients;
                target.draft.attachments = attachments;
            }
            ServerObject::Folder(folder) => {
                let source_id = folder.id;
                let dest_id = self.folder_of(dest, "CopyTo")?;
                let mailbox = self.store(call.logon_id)?;
                let mut store = lock(&mailbox);
                let content = store.folder_content(source_id, true, true)?;
                import_folder_children(&mut store, dest_id, content)?;
            }
            _ => return Err(ServerError::WrongObject("CopyTo")),
        }
        Ok(())
    }

    pub(crate) fn copy_to_stream(&mut self, call: &RopCall, byte_count: u64) -> Outcome {
        let source = call.input()?;
        let dest = call.destination()?;
        match self.object(dest)? {
            ServerObject::Stream(stream) if stream.writable => {}
            ServerObject::Stream(_) => return Err(ServerError::StreamReadOnly.into()),
            _ => return Err(ServerError::WrongObject("CopyToStream destination").into()),
        }
        let ServerObject::Stream(stream) = self.object_mut(source)? else {
            return Err(ServerError::WrongObject("CopyToStream").into());
        };
        let data = stream.read(usize::try_from(byte_count).unwrap_or(usize::MAX));
        let ServerObject::Stream(target) = self.object_mut(dest)? else {
            return Err(ServerError::WrongObject("CopyToStream destination").into());
        };
        let written = target.write(&data)?;
        Ok(Reply::new(ResponseBody::CopyToStream {
            read_byte_count: data.len() as u64,
            written_byte_count: written as u64,
        }))
    }
}

/// Only binary and string properties open as streams
fn streamable(tag: PropertyTag) -> Result<(), ServerError> {
    match tag.prop_type() {
        Ok(PropertyType::Binary | PropertyType::Unicode | PropertyType::String8) => Ok(()),
        _ => Err(ServerError::InvalidParameter("PropertyTag")),
    }
}

/// Stream bytes of a value; strings carry no terminator
fn value_bytes(value: &PropertyValue) -> Result<Vec<u8>, ServerError> {
    match value {
        PropertyValue::Binary(bytes) => Ok(bytes.clone()),
        PropertyValue::Unicode(text) => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
        PropertyValue::String8(text) => Ok(text.as_bytes().to_vec()),
        _ => Err(ServerError::InvalidParameter("PropertyTag")),
    }
}

/// Value of a stream's bytes for its tag's type
fn bytes_value(tag: PropertyTag, data: &[u8]) -> Result<PropertyValue, ServerError> {
    match tag.prop_type()? {
        PropertyType::Binary => Ok(PropertyValue::Binary(data.to_vec())),
        PropertyType::Unicode => {
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .take_while(|&unit| unit != 0)
                .collect();
            Ok(PropertyValue::Unicode(String::from_utf16_lossy(&units)))
        }
        PropertyType::String8 => {
            let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
            Ok(PropertyValue::String8(String::from_utf8_lossy(&data[..end]).into_owned()))
        }
        _ => Err(ServerError::InvalidParameter("PropertyTag")),
    }
}
