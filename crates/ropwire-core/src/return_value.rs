//! ROP return values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Four-byte status carried by every ROP response; zero is success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReturnValue(pub u32);

impl ReturnValue {
    /// Success
    pub const SUCCESS: Self = Self(0x0000_0000);
    /// Generic failure (ecError)
    pub const ERROR: Self = Self(0x8000_4005);
    /// Handle index never assigned or released (ecNullObject)
    pub const NULL_OBJECT: Self = Self(0x0000_04B9);
    /// Dual-handle operation missing its destination
    pub const NULL_DESTINATION_OBJECT: Self = Self(0x0000_0503);
    /// Handle belongs to another logon
    pub const ACCESS_DENIED: Self = Self(0x8007_0005);
    /// Malformed request or stream (ecRpcFormat)
    pub const RPC_FORMAT: Self = Self(0x0000_04B6);
    /// Invalid parameter
    pub const INVALID_PARAMETER: Self = Self(0x8007_0057);
    /// Object not found
    pub const NOT_FOUND: Self = Self(0x8004_010F);
    /// Operation not supported on this object
    pub const NOT_SUPPORTED: Self = Self(0x8004_0102);
    /// Object has been deleted
    pub const OBJECT_DELETED: Self = Self(0x8004_010A);
    /// Message is no longer in the spooler queue
    pub const NOT_IN_QUEUE: Self = Self(0x8004_0601);
    /// Retryable timeout-class condition
    pub const TIMEOUT: Self = Self(0x8004_0401);
    /// Server is busy
    pub const SERVER_BUSY: Self = Self(0x0000_0480);
    /// Predecessor change list does not dominate recorded history
    pub const SYNC_CONFLICT: Self = Self(0x8004_0802);
    /// Object referenced by a synchronization import was deleted
    pub const SYNC_OBJECT_DELETED: Self = Self(0x8004_0800);
    /// Parent of an imported folder does not exist
    pub const SYNC_NO_PARENT: Self = Self(0x8004_0803);
    /// Change was ignored because the server version is newer
    pub const SYNC_IGNORE: Self = Self(0x0004_0820);
    /// Message has unsaved changes or cannot be saved
    pub const OBJECT_CHANGED: Self = Self(0x8004_0109);
    /// Stream access denied by open mode
    pub const STREAM_ACCESS_DENIED: Self = Self(0x8003_0005);
    /// Too many handles in use
    pub const TOO_MANY_HANDLES: Self = Self(0x8004_0127);
    /// A sibling folder already has this name
    pub const DUPLICATE_NAME: Self = Self(0x8004_0604);

    /// Create from a raw value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw value
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Zero means success
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Warning-class values have the high bit clear but are non-zero
    #[must_use]
    pub fn is_warning(self) -> bool {
        self.0 != 0 && self.0 & 0x8000_0000 == 0 && self.0 >= 0x0004_0000
    }

    /// Failure caused by resolving a handle index
    #[must_use]
    pub fn is_handle_failure(self) -> bool {
        matches!(
            self,
            Self::NULL_OBJECT | Self::NULL_DESTINATION_OBJECT | Self::ACCESS_DENIED
        )
    }

    /// Conditions the caller should retry after a pause
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TIMEOUT | Self::SERVER_BUSY)
    }

    /// Synchronization conflict
    #[must_use]
    pub fn is_conflict(self) -> bool {
        self == Self::SYNC_CONFLICT
    }

    /// Symbolic name for known values
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SUCCESS => "Success",
            Self::ERROR => "ecError",
            Self::NULL_OBJECT => "ecNullObject",
            Self::NULL_DESTINATION_OBJECT => "ecDstNullObject",
            Self::ACCESS_DENIED => "ecAccessDenied",
            Self::RPC_FORMAT => "ecRpcFormat",
            Self::INVALID_PARAMETER => "ecInvalidParam",
            Self::NOT_FOUND => "ecNotFound",
            Self::NOT_SUPPORTED => "ecNotSupported",
            Self::OBJECT_DELETED => "ecObjectDeleted",
            Self::NOT_IN_QUEUE => "ecNotInQueue",
            Self::TIMEOUT => "ecTimeout",
            Self::SERVER_BUSY => "ecServerBusy",
            Self::SYNC_CONFLICT => "SyncConflict",
            Self::SYNC_OBJECT_DELETED => "SyncObjectDeleted",
            Self::SYNC_NO_PARENT => "SyncNoParent",
            Self::SYNC_IGNORE => "SyncIgnore",
            Self::OBJECT_CHANGED => "ecObjectModified",
            Self::STREAM_ACCESS_DENIED => "StreamAccessDenied",
            Self::TOO_MANY_HANDLES => "ecTooManyHandles",
            Self::DUPLICATE_NAME => "ecDuplicateName",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ReturnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "0x{:08X} ({name})", self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

impl From<u32> for ReturnValue {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ReturnValue::SUCCESS.is_success());
        assert!(ReturnValue::NULL_OBJECT.is_handle_failure());
        assert!(ReturnValue::ACCESS_DENIED.is_handle_failure());
        assert!(ReturnValue::NULL_DESTINATION_OBJECT.is_handle_failure());
        assert!(!ReturnValue::ERROR.is_handle_failure());
        assert!(ReturnValue::TIMEOUT.is_retryable());
        assert!(!ReturnValue::NOT_IN_QUEUE.is_retryable());
        assert!(ReturnValue::SYNC_CONFLICT.is_conflict());
        assert!(ReturnValue::SYNC_IGNORE.is_warning());
        assert!(!ReturnValue::NULL_OBJECT.is_warning());
    }

    #[test]
    fn test_display() {
        assert_eq!(ReturnValue::NULL_OBJECT.to_string(), "0x000004B9 (ecNullObject)");
        assert_eq!(ReturnValue(0x1234).to_string(), "0x00001234");
    }
}
