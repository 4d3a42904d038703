//! Error types for the reference server
//!
//! Most of these never leave the server as Rust errors: a ROP handler
//! that fails is answered in-band with the [`ReturnValue`] from
//! [`ServerError::return_value`]. Only buffer-level failures (a request
//! that cannot be framed) end an exchange.

use ropwire_core::{CodecError, ReturnValue, ShortTermId};
use ropwire_fxics::FxError;
use thiserror::Error;

/// Errors raised while serving ROPs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    // ============ Format Errors ============
    /// Request bytes were malformed
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// FastTransfer or ICS stream was malformed
    #[error("stream error: {0}")]
    Fx(#[from] FxError),

    // ============ Handle Errors ============
    /// Handle index does not name a live object
    #[error("no object at handle index {0}")]
    NullObject(u8),

    /// Handle belongs to another logon
    #[error("handle index {0} belongs to another logon")]
    AccessDenied(u8),

    /// Object at the handle has the wrong type for this ROP
    #[error("{0} not supported on this object")]
    WrongObject(&'static str),

    /// Session handle budget is spent
    #[error("too many open handles")]
    TooManyHandles,

    // ============ Store Errors ============
    /// Object id is unknown to the store
    #[error("object {0:?} not found")]
    NotFound(ShortTermId),

    /// Object id names a deleted object
    #[error("object {0:?} was deleted")]
    ObjectDeleted(ShortTermId),

    /// Long-term id names a replica the store never saw
    #[error("unknown replica")]
    UnknownReplica,

    /// A sibling folder already has this name
    #[error("folder name {0:?} already used")]
    DuplicateName(String),

    /// Special folders cannot be deleted
    #[error("folder {0:?} is protected")]
    ProtectedFolder(ShortTermId),

    /// Message is not in the spooler queue
    #[error("message {0:?} is not queued")]
    NotInQueue(ShortTermId),

    /// Global counter space is exhausted
    #[error("identifier space exhausted")]
    CountersExhausted,

    /// Message changed since it was opened
    #[error("object {0:?} changed since it was opened")]
    ObjectChanged(ShortTermId),

    /// Property is missing
    #[error("property {0:#010X} not found")]
    PropertyNotFound(u32),

    /// Stream was opened read-only
    #[error("stream is read-only")]
    StreamReadOnly,

    // ============ Synchronization Errors ============
    /// Incoming change conflicts with the stored version
    #[error("change conflicts with stored version")]
    SyncConflict,

    /// Stored version already includes the incoming change
    #[error("change already applied")]
    SyncIgnore,

    /// Parent of an imported folder is unknown
    #[error("parent folder not found")]
    SyncNoParent,

    /// Source of an imported move no longer exists
    #[error("moved object no longer exists")]
    SyncObjectDeleted,

    // ============ Request Errors ============
    /// Request field out of range
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// ROP arrived in a state that does not allow it
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServerError {
    /// In-band code reported for this error
    #[must_use]
    pub fn return_value(&self) -> ReturnValue {
        match self {
            Self::Codec(_) => ReturnValue::RPC_FORMAT,
            Self::Fx(e) => e.return_value(),
            Self::NullObject(_) => ReturnValue::NULL_OBJECT,
            Self::AccessDenied(_) | Self::ProtectedFolder(_) => ReturnValue::ACCESS_DENIED,
            Self::WrongObject(_) => ReturnValue::NOT_SUPPORTED,
            Self::TooManyHandles => ReturnValue::TOO_MANY_HANDLES,
            Self::NotFound(_) | Self::UnknownReplica | Self::PropertyNotFound(_) => {
                ReturnValue::NOT_FOUND
            }
            Self::ObjectDeleted(_) => ReturnValue::OBJECT_DELETED,
            Self::ObjectChanged(_) => ReturnValue::OBJECT_CHANGED,
            Self::DuplicateName(_) => ReturnValue::DUPLICATE_NAME,
            Self::NotInQueue(_) => ReturnValue::NOT_IN_QUEUE,
            Self::StreamReadOnly => ReturnValue::STREAM_ACCESS_DENIED,
            Self::SyncConflict => ReturnValue::SYNC_CONFLICT,
            Self::SyncIgnore => ReturnValue::SYNC_IGNORE,
            Self::SyncNoParent => ReturnValue::SYNC_NO_PARENT,
            Self::SyncObjectDeleted => ReturnValue::SYNC_OBJECT_DELETED,
            Self::InvalidParameter(_) => ReturnValue::INVALID_PARAMETER,
            Self::CountersExhausted | Self::InvalidState(_) | Self::InvalidConfig(_) => {
                ReturnValue::ERROR
            }
        }
    }
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_errors_map_to_handle_codes() {
        assert_eq!(ServerError::NullObject(3).return_value(), ReturnValue::NULL_OBJECT);
        assert_eq!(ServerError::AccessDenied(0).return_value(), ReturnValue::ACCESS_DENIED);
    }

    #[test]
    fn test_stream_errors_keep_their_code() {
        let err = ServerError::from(FxError::UnknownStateProperty(1));
        assert_eq!(err.return_value(), ReturnValue::INVALID_PARAMETER);
        let err = ServerError::from(FxError::ContextFailed);
        assert_eq!(err.return_value(), ReturnValue::RPC_FORMAT);
    }
}
