//! Object identifiers.
//!
//! A store names folders and messages two ways:
//! - a **short-term id** (8 bytes: a 16-bit replica id plus a 48-bit global
//!   counter) that is only meaningful inside the logon that produced it;
//! - a **long-term id** (replica GUID plus global counter) that is durable
//!   and portable across sessions.
//!
//! The same GUID plus counter pair doubles as a source key (GID) and, with a
//! change number in place of the object counter, as a change key (XID).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CodecError;
use crate::wire::{Reader, Writer};

/// Largest value representable in a 48-bit global counter
pub const GLOBAL_COUNTER_MAX: u64 = 0xFFFF_FFFF_FFFF;

/// Size of a serialized GID (replica GUID + 6-byte counter)
pub const GID_SIZE: usize = 22;

/// Size of a long-term id as carried by `RopLongTermIdFromId`
pub const LONG_TERM_ID_WIRE_SIZE: usize = 24;

/// 16-byte replica identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ReplicaGuid(pub [u8; 16]);

impl ReplicaGuid {
    /// All-zero GUID
    pub const NIL: Self = Self([0; 16]);

    /// Fresh random GUID
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for ReplicaGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicaGuid({})", hex::encode(self.0))
    }
}

impl fmt::Display for ReplicaGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for ReplicaGuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ReplicaGuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let mut out = [0u8; 16];
        hex::decode_to_slice(&text, &mut out).map_err(serde::de::Error::custom)?;
        Ok(Self(out))
    }
}

/// 48-bit counter, serialized big-endian in 6 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalCounter(u64);

impl GlobalCounter {
    /// Create from a value, rejecting anything wider than 48 bits
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidValue`] when `value` exceeds 48 bits.
    pub fn new(value: u64) -> Result<Self, CodecError> {
        if value > GLOBAL_COUNTER_MAX {
            return Err(CodecError::InvalidValue {
                field: "global counter",
                value,
            });
        }
        Ok(Self(value))
    }

    /// Create from a value, keeping the low 48 bits
    #[must_use]
    pub const fn truncating(value: u64) -> Self {
        Self(value & GLOBAL_COUNTER_MAX)
    }

    /// Numeric value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Big-endian 6-byte form
    #[must_use]
    pub fn to_bytes(self) -> [u8; 6] {
        let full = self.0.to_be_bytes();
        let mut out = [0u8; 6];
        out.copy_from_slice(&full[2..]);
        out
    }

    /// Parse the big-endian 6-byte form
    #[must_use]
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        let mut full = [0u8; 8];
        full[2..].copy_from_slice(&bytes);
        Self(u64::from_be_bytes(full))
    }
}

/// Session-scoped folder or message id
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ShortTermId {
    replica_id: u16,
    counter: GlobalCounter,
}

impl ShortTermId {
    /// Zero id, used where a field is present but names nothing
    pub const NONE: Self = Self {
        replica_id: 0,
        counter: GlobalCounter(0),
    };

    /// Compose from a replica id and counter
    #[must_use]
    pub const fn new(replica_id: u16, counter: GlobalCounter) -> Self {
        Self {
            replica_id,
            counter,
        }
    }

    /// Replica id half
    #[must_use]
    pub const fn replica_id(self) -> u16 {
        self.replica_id
    }

    /// Counter half
    #[must_use]
    pub const fn counter(self) -> GlobalCounter {
        self.counter
    }

    /// True for the zero id
    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Wire bytes: replica id little-endian then counter big-endian
    #[must_use]
    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..2].copy_from_slice(&self.replica_id.to_le_bytes());
        out[2..].copy_from_slice(&self.counter.to_bytes());
        out
    }

    /// Parse wire bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        let replica_id = u16::from_le_bytes([bytes[0], bytes[1]]);
        let mut counter = [0u8; 6];
        counter.copy_from_slice(&bytes[2..]);
        Self {
            replica_id,
            counter: GlobalCounter::from_bytes(counter),
        }
    }

    /// The id as the little-endian `u64` carried in ROP payloads
    #[must_use]
    pub fn as_u64(self) -> u64 {
        u64::from_le_bytes(self.to_bytes())
    }

    /// Inverse of [`Self::as_u64`]
    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self::from_bytes(value.to_le_bytes())
    }

    /// Read an 8-byte id
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] if the input is cut short.
    pub fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self::from_bytes(r.array()?))
    }

    /// Write an 8-byte id
    pub fn write(self, w: &mut Writer) {
        w.bytes(&self.to_bytes());
    }
}

impl fmt::Debug for ShortTermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:X}", self.replica_id, self.counter.value())
    }
}

/// Durable identity of a folder or message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LongTermId {
    /// Replica that minted the id
    pub guid: ReplicaGuid,
    /// Counter within that replica
    pub counter: GlobalCounter,
}

impl LongTermId {
    /// Compose from parts
    #[must_use]
    pub const fn new(guid: ReplicaGuid, counter: GlobalCounter) -> Self {
        Self { guid, counter }
    }

    /// 22-byte GID form used as a source key
    #[must_use]
    pub fn to_gid(self) -> [u8; GID_SIZE] {
        let mut out = [0u8; GID_SIZE];
        out[..16].copy_from_slice(&self.guid.0);
        out[16..].copy_from_slice(&self.counter.to_bytes());
        out
    }

    /// Parse a 22-byte GID
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SizeMismatch`] if `bytes` is not 22 bytes long.
    pub fn from_gid(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != GID_SIZE {
            return Err(CodecError::SizeMismatch {
                field: "GID",
                declared: GID_SIZE,
                available: bytes.len(),
            });
        }
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&bytes[..16]);
        let mut counter = [0u8; 6];
        counter.copy_from_slice(&bytes[16..]);
        Ok(Self {
            guid: ReplicaGuid(guid),
            counter: GlobalCounter::from_bytes(counter),
        })
    }

    /// Read the 24-byte padded wire form
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] if the input is cut short.
    pub fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let gid = r.bytes(GID_SIZE)?;
        let id = Self::from_gid(gid)?;
        r.u16()?;
        Ok(id)
    }

    /// Write the 24-byte padded wire form
    pub fn write(self, w: &mut Writer) {
        w.bytes(&self.to_gid()).u16(0);
    }
}

/// Replica GUID plus a variable-length local id; used for change keys and
/// predecessor change list entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Xid {
    /// Replica that made the change
    pub guid: ReplicaGuid,
    /// Change counter within that replica
    pub counter: u64,
    /// Serialized width of the counter, 1 to 8 bytes
    pub width: u8,
}

impl Xid {
    /// Six-byte change key, the common case
    #[must_use]
    pub const fn new(guid: ReplicaGuid, counter: GlobalCounter) -> Self {
        Self {
            guid,
            counter: counter.value(),
            width: 6,
        }
    }

    /// Serialized size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        16 + usize::from(self.width)
    }

    /// Serialize as GUID followed by the big-endian counter
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        out.extend_from_slice(&self.guid.0);
        let counter = self.counter.to_be_bytes();
        out.extend_from_slice(&counter[8 - usize::from(self.width)..]);
        out
    }

    /// Parse from 17 to 24 bytes
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SizeMismatch`] for any other length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if !(17..=24).contains(&bytes.len()) {
            return Err(CodecError::SizeMismatch {
                field: "XID",
                declared: bytes.len(),
                available: 24,
            });
        }
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&bytes[..16]);
        let counter = bytes[16..]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        Ok(Self {
            guid: ReplicaGuid(guid),
            counter,
            // 17..=24 bytes leaves a 1..=8 byte counter
            width: (bytes.len() - 16) as u8,
        })
    }
}
