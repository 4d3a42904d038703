//! Error types for FastTransfer and ICS streams.

use ropwire_core::{CodecError, ReturnValue};
use thiserror::Error;

/// Stream and state errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FxError {
    /// Underlying value encoding failed
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Marker that the grammar does not allow at this point
    #[error("unexpected marker {marker:#010X} in {context}")]
    UnexpectedMarker {
        /// Raw marker value
        marker: u32,
        /// Grammar position
        context: &'static str,
    },

    /// Property where the grammar expects a marker
    #[error("unexpected property {tag:#010X} in {context}")]
    UnexpectedProperty {
        /// Raw tag
        tag: u32,
        /// Grammar position
        context: &'static str,
    },

    /// Stream ended inside an open element
    #[error("stream ended inside {0}")]
    Incomplete(&'static str),

    /// Bytes followed a completed object
    #[error("{0} trailing bytes after object end")]
    TrailingData(usize),

    /// Named properties carry a name block this codec does not model
    #[error("named property {0:#010X} not supported in streams")]
    NamedProperty(u32),

    /// GLOBSET command stream is malformed
    #[error("invalid GLOBSET: {0}")]
    InvalidGlobSet(&'static str),

    /// Unknown ICS state property
    #[error("unknown state property {0:#010X}")]
    UnknownStateProperty(u32),

    /// Context already failed on an earlier chunk
    #[error("transfer context failed earlier")]
    ContextFailed,
}

impl FxError {
    /// In-band code a server reports for this error
    #[must_use]
    pub fn return_value(&self) -> ReturnValue {
        match self {
            Self::UnknownStateProperty(_) => ReturnValue::INVALID_PARAMETER,
            _ => ReturnValue::RPC_FORMAT,
        }
    }
}
