//! Property tags and values as carried in ROP payloads.
//!
//! A property tag packs a 16-bit property id (high word) and a 16-bit
//! property type (low word). Values use the ROP encoding here: fixed
//! widths for scalars, a one-byte boolean, null-terminated strings and
//! `u16`-counted binaries. The FastTransfer encoding of the same values
//! lives in the `ropwire-fxics` crate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::wire::{Reader, Writer};

/// Property value types understood by this codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum PropertyType {
    /// 16-bit integer
    Integer16 = 0x0002,
    /// 32-bit integer
    Integer32 = 0x0003,
    /// 32-bit error code
    Error = 0x000A,
    /// Boolean
    Boolean = 0x000B,
    /// 64-bit integer
    Integer64 = 0x0014,
    /// 8-bit string
    String8 = 0x001E,
    /// UTF-16 string
    Unicode = 0x001F,
    /// FILETIME
    SysTime = 0x0040,
    /// GUID
    Guid = 0x0048,
    /// Binary blob
    Binary = 0x0102,
    /// Array of 32-bit integers
    MultipleInteger32 = 0x1003,
    /// Array of UTF-16 strings
    MultipleUnicode = 0x101F,
    /// Array of binary blobs
    MultipleBinary = 0x1102,
}

impl TryFrom<u16> for PropertyType {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, CodecError> {
        Ok(match value {
            0x0002 => PropertyType::Integer16,
            0x0003 => PropertyType::Integer32,
            0x000A => PropertyType::Error,
            0x000B => PropertyType::Boolean,
            0x0014 => PropertyType::Integer64,
            0x001E => PropertyType::String8,
            0x001F => PropertyType::Unicode,
            0x0040 => PropertyType::SysTime,
            0x0048 => PropertyType::Guid,
            0x0102 => PropertyType::Binary,
            0x1003 => PropertyType::MultipleInteger32,
            0x101F => PropertyType::MultipleUnicode,
            0x1102 => PropertyType::MultipleBinary,
            other => return Err(CodecError::UnsupportedPropertyType(other)),
        })
    }
}

/// Property id plus type
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyTag(pub u32);

impl PropertyTag {
    /// Compose from id and type
    #[must_use]
    pub const fn new(id: u16, prop_type: u16) -> Self {
        Self(((id as u32) << 16) | prop_type as u32)
    }

    /// High word
    #[must_use]
    pub const fn id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Low word
    #[must_use]
    pub const fn type_code(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Decoded type
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedPropertyType`] for types this codec
    /// does not carry.
    pub fn prop_type(self) -> Result<PropertyType, CodecError> {
        PropertyType::try_from(self.type_code())
    }

    /// Same id with a different type
    #[must_use]
    pub const fn with_type(self, prop_type: u16) -> Self {
        Self::new(self.id(), prop_type)
    }

    /// Named properties occupy ids 0x8000 and above
    #[must_use]
    pub const fn is_named(self) -> bool {
        self.id() >= 0x8000
    }
}

impl fmt::Debug for PropertyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyTag(0x{:08X})", self.0)
    }
}

impl fmt::Display for PropertyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Well-known property tags
pub mod tags {
    use super::PropertyTag;

    /// PidTagSubject
    pub const SUBJECT: PropertyTag = PropertyTag(0x0037_001F);
    /// PidTagMessageClass
    pub const MESSAGE_CLASS: PropertyTag = PropertyTag(0x001A_001F);
    /// PidTagImportance
    pub const IMPORTANCE: PropertyTag = PropertyTag(0x0017_0003);
    /// PidTagMessageFlags
    pub const MESSAGE_FLAGS: PropertyTag = PropertyTag(0x0E07_0003);
    /// PidTagMessageSize
    pub const MESSAGE_SIZE: PropertyTag = PropertyTag(0x0E08_0003);
    /// PidTagBody
    pub const BODY: PropertyTag = PropertyTag(0x1000_001F);
    /// PidTagDisplayName
    pub const DISPLAY_NAME: PropertyTag = PropertyTag(0x3001_001F);
    /// PidTagComment
    pub const COMMENT: PropertyTag = PropertyTag(0x3004_001F);
    /// PidTagCreationTime
    pub const CREATION_TIME: PropertyTag = PropertyTag(0x3007_0040);
    /// PidTagLastModificationTime
    pub const LAST_MODIFICATION_TIME: PropertyTag = PropertyTag(0x3008_0040);
    /// PidTagEmailAddress
    pub const EMAIL_ADDRESS: PropertyTag = PropertyTag(0x3003_001F);
    /// PidTagRecipientType
    pub const RECIPIENT_TYPE: PropertyTag = PropertyTag(0x0C15_0003);
    /// PidTagAttachNumber
    pub const ATTACH_NUMBER: PropertyTag = PropertyTag(0x0E21_0003);
    /// PidTagAttachDataBinary
    pub const ATTACH_DATA_BINARY: PropertyTag = PropertyTag(0x3701_0102);
    /// PidTagAttachLongFilename
    pub const ATTACH_LONG_FILENAME: PropertyTag = PropertyTag(0x3707_001F);
    /// PidTagContentCount
    pub const CONTENT_COUNT: PropertyTag = PropertyTag(0x3602_0003);
    /// PidTagFolderType
    pub const FOLDER_TYPE: PropertyTag = PropertyTag(0x3601_0003);
    /// PidTagSourceKey
    pub const SOURCE_KEY: PropertyTag = PropertyTag(0x65E0_0102);
    /// PidTagParentSourceKey
    pub const PARENT_SOURCE_KEY: PropertyTag = PropertyTag(0x65E1_0102);
    /// PidTagChangeKey
    pub const CHANGE_KEY: PropertyTag = PropertyTag(0x65E2_0102);
    /// PidTagPredecessorChangeList
    pub const PREDECESSOR_CHANGE_LIST: PropertyTag = PropertyTag(0x65E3_0102);
    /// PidTagFolderId
    pub const FOLDER_ID: PropertyTag = PropertyTag(0x6748_0014);
    /// PidTagParentFolderId
    pub const PARENT_FOLDER_ID: PropertyTag = PropertyTag(0x6749_0014);
    /// PidTagMid
    pub const MID: PropertyTag = PropertyTag(0x674A_0014);
    /// PidTagChangeNumber
    pub const CHANGE_NUMBER: PropertyTag = PropertyTag(0x67A4_0014);
    /// PidTagAssociated
    pub const ASSOCIATED: PropertyTag = PropertyTag(0x67AA_000B);
    /// PidTagRecordKey
    pub const RECORD_KEY: PropertyTag = PropertyTag(0x0FF9_0102);
    /// PidTagMailboxOwnerName
    pub const MAILBOX_OWNER_NAME: PropertyTag = PropertyTag(0x661C_001F);
}

/// Bit in PidTagMessageFlags marking a message as read
pub const MSGFLAG_READ: i32 = 0x0000_0001;

/// Bit in PidTagMessageFlags marking a message as not yet sent
pub const MSGFLAG_UNSENT: i32 = 0x0000_0008;

/// A single property value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// 16-bit integer
    Integer16(i16),
    /// 32-bit integer
    Integer32(i32),
    /// Error code standing in for a value
    Error(u32),
    /// Boolean
    Boolean(bool),
    /// 64-bit integer
    Integer64(i64),
    /// 8-bit string
    String8(String),
    /// UTF-16 string
    Unicode(String),
    /// FILETIME, 100ns ticks since 1601
    SysTime(u64),
    /// GUID
    Guid([u8; 16]),
    /// Binary blob
    Binary(Vec<u8>),
    /// Array of 32-bit integers
    MultipleInteger32(Vec<i32>),
    /// Array of UTF-16 strings
    MultipleUnicode(Vec<String>),
    /// Array of binary blobs
    MultipleBinary(Vec<Vec<u8>>),
}

impl PropertyValue {
    /// Type of this value
    #[must_use]
    pub fn prop_type(&self) -> PropertyType {
        match self {
            Self::Integer16(_) => PropertyType::Integer16,
            Self::Integer32(_) => PropertyType::Integer32,
            Self::Error(_) => PropertyType::Error,
            Self::Boolean(_) => PropertyType::Boolean,
            Self::Integer64(_) => PropertyType::Integer64,
            Self::String8(_) => PropertyType::String8,
            Self::Unicode(_) => PropertyType::Unicode,
            Self::SysTime(_) => PropertyType::SysTime,
            Self::Guid(_) => PropertyType::Guid,
            Self::Binary(_) => PropertyType::Binary,
            Self::MultipleInteger32(_) => PropertyType::MultipleInteger32,
            Self::MultipleUnicode(_) => PropertyType::MultipleUnicode,
            Self::MultipleBinary(_) => PropertyType::MultipleBinary,
        }
    }

    /// Binary payload, if this is a binary value
    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// String payload of either string type
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Unicode(s) | Self::String8(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload widened to `i64`
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Integer16(v) => Some(i64::from(v)),
            Self::Integer32(v) => Some(i64::from(v)),
            Self::Integer64(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean payload
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// Read a value of `prop_type` in ROP encoding
    ///
    /// # Errors
    ///
    /// Fails on truncated input or invalid strings.
    pub fn read(r: &mut Reader<'_>, prop_type: PropertyType) -> Result<Self, CodecError> {
        Ok(match prop_type {
            PropertyType::Integer16 => Self::Integer16(r.u16()? as i16),
            PropertyType::Integer32 => Self::Integer32(r.u32()? as i32),
            PropertyType::Error => Self::Error(r.u32()?),
            PropertyType::Boolean => Self::Boolean(r.bool8()?),
            PropertyType::Integer64 => Self::Integer64(r.u64()? as i64),
            PropertyType::String8 => Self::String8(r.string8()?),
            PropertyType::Unicode => Self::Unicode(r.unicode()?),
            PropertyType::SysTime => Self::SysTime(r.u64()?),
            PropertyType::Guid => Self::Guid(r.array()?),
            PropertyType::Binary => Self::Binary(r.sized_bytes16()?.to_vec()),
            PropertyType::MultipleInteger32 => {
                let count = r.u32()?;
                let values = (0..count)
                    .map(|_| r.u32().map(|v| v as i32))
                    .collect::<Result<_, _>>()?;
                Self::MultipleInteger32(values)
            }
            PropertyType::MultipleUnicode => {
                let count = r.u32()?;
                let values = (0..count).map(|_| r.unicode()).collect::<Result<_, _>>()?;
                Self::MultipleUnicode(values)
            }
            PropertyType::MultipleBinary => {
                let count = r.u32()?;
                let values = (0..count)
                    .map(|_| r.sized_bytes16().map(<[u8]>::to_vec))
                    .collect::<Result<_, _>>()?;
                Self::MultipleBinary(values)
            }
        })
    }

    /// Write the value in ROP encoding
    ///
    /// # Errors
    ///
    /// Fails when a binary exceeds its 16-bit length prefix.
    pub fn write(&self, w: &mut Writer) -> Result<(), CodecError> {
        match self {
            Self::Integer16(v) => {
                w.u16(*v as u16);
            }
            Self::Integer32(v) => {
                w.u32(*v as u32);
            }
            Self::Error(v) => {
                w.u32(*v);
            }
            Self::Boolean(v) => {
                w.bool8(*v);
            }
            Self::Integer64(v) => {
                w.u64(*v as u64);
            }
            Self::String8(s) => {
                w.string8(s);
            }
            Self::Unicode(s) => {
                w.unicode(s);
            }
            Self::SysTime(v) => {
                w.u64(*v);
            }
            Self::Guid(g) => {
                w.bytes(g);
            }
            Self::Binary(b) => {
                w.sized_bytes16(b)?;
            }
            Self::MultipleInteger32(values) => {
                w.u32(values.len() as u32);
                for v in values {
                    w.u32(*v as u32);
                }
            }
            Self::MultipleUnicode(values) => {
                w.u32(values.len() as u32);
                for v in values {
                    w.unicode(v);
                }
            }
            Self::MultipleBinary(values) => {
                w.u32(values.len() as u32);
                for v in values {
                    w.sized_bytes16(v)?;
                }
            }
        }
        Ok(())
    }
}

/// A property tag paired with its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedValue {
    /// Property tag; its type matches the value
    pub tag: PropertyTag,
    /// Property value
    pub value: PropertyValue,
}

impl TaggedValue {
    /// Pair a value with a property id, deriving the type from the value
    #[must_use]
    pub fn new(tag: PropertyTag, value: PropertyValue) -> Self {
        let tag = tag.with_type(value.prop_type() as u16);
        Self { tag, value }
    }

    /// Read a tag and its ROP-encoded value
    ///
    /// # Errors
    ///
    /// Fails on truncated input or an unsupported property type.
    pub fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let tag = PropertyTag(r.u32()?);
        let value = PropertyValue::read(r, tag.prop_type()?)?;
        Ok(Self { tag, value })
    }

    /// Write the tag and its ROP-encoded value
    ///
    /// # Errors
    ///
    /// Fails when a binary exceeds its 16-bit length prefix.
    pub fn write(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.u32(self.tag.0);
        self.value.write(w)
    }
}

/// Read a `u16` count followed by that many tagged values
///
/// # Errors
///
/// Fails on truncated input or an unsupported property type.
pub fn read_tagged_values(r: &mut Reader<'_>) -> Result<Vec<TaggedValue>, CodecError> {
    let count = r.u16()?;
    (0..count).map(|_| TaggedValue::read(r)).collect()
}

/// Write a `u16` count followed by the tagged values
///
/// # Errors
///
/// Fails when there are more than `u16::MAX` values or a binary is too long.
pub fn write_tagged_values(w: &mut Writer, values: &[TaggedValue]) -> Result<(), CodecError> {
    let count = u16::try_from(values.len()).map_err(|_| CodecError::InvalidValue {
        field: "property value count",
        value: values.len() as u64,
    })?;
    w.u16(count);
    for value in values {
        value.write(w)?;
    }
    Ok(())
}

/// Read a `u16` count followed by that many property tags
///
/// # Errors
///
/// Returns [`CodecError::TooShort`] on truncated input.
pub fn read_tags(r: &mut Reader<'_>) -> Result<Vec<PropertyTag>, CodecError> {
    let count = r.u16()?;
    (0..count).map(|_| r.u32().map(PropertyTag)).collect()
}

/// Write a `u16` count followed by the property tags
pub fn write_tags(w: &mut Writer, tags: &[PropertyTag]) {
    let count = tags.len().min(usize::from(u16::MAX));
    w.u16(count as u16);
    for tag in &tags[..count] {
        w.u32(tag.0);
    }
}

/// Find a property by tag
#[must_use]
pub fn find<'a>(values: &'a [TaggedValue], tag: PropertyTag) -> Option<&'a PropertyValue> {
    values.iter().find(|v| v.tag == tag).map(|v| &v.value)
}
