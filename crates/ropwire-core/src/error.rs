//! Error types for the ropwire wire layer.
//!
//! A ROP that fails on the server is not an error here: it decodes into a
//! normal [`RopResponse`](crate::RopResponse) whose return value is
//! non-zero. The types below cover malformed bytes, misuse of the handle
//! table, and failures of a whole exchange.

use thiserror::Error;

use crate::ReturnValue;

/// Malformed or unsupported wire data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input ended before a field could be read
    #[error("buffer too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Bytes required by the field being read
        expected: usize,
        /// Bytes remaining in the input
        actual: usize,
    },

    /// RopId is reserved and never valid on the wire
    #[error("reserved rop id: 0x{0:02X}")]
    ReservedRopId(u8),

    /// RopId is valid but this codec has no payload schema for it
    #[error("unsupported rop id: 0x{0:02X}")]
    UnsupportedRopId(u8),

    /// Header announced compressed content
    #[error("compressed buffers are not supported")]
    Compressed,

    /// Header version was not zero
    #[error("unsupported header version: {0}")]
    UnsupportedVersion(u16),

    /// No header carried the Last flag
    #[error("missing final header")]
    MissingLastFlag,

    /// A size field disagrees with the data present
    #[error("size mismatch in {field}: declared {declared}, available {available}")]
    SizeMismatch {
        /// Name of the size field
        field: &'static str,
        /// Value of the size field
        declared: usize,
        /// Bytes actually available
        available: usize,
    },

    /// Encoded buffer exceeds the negotiated maximum
    #[error("buffer of {size} bytes exceeds maximum of {max}")]
    BufferTooLarge {
        /// Encoded size
        size: usize,
        /// Negotiated maximum
        max: usize,
    },

    /// Handle indices do not match the shape the RopId requires
    #[error("handle indices do not match rop 0x{0:02X}")]
    HandleShapeMismatch(u8),

    /// String was not valid for its declared encoding
    #[error("invalid string encoding")]
    InvalidString,

    /// Property type is not representable in this codec
    #[error("unsupported property type: 0x{0:04X}")]
    UnsupportedPropertyType(u16),

    /// A field carried a value outside its domain
    #[error("invalid value for {field}: {value}")]
    InvalidValue {
        /// Name of the field
        field: &'static str,
        /// Offending value
        value: u64,
    },

    /// Handle table byte count is not a multiple of four
    #[error("handle table length {0} is not a multiple of 4")]
    MisalignedHandleTable(usize),
}

/// Handle-table misuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// Index lies beyond the table
    #[error("handle index {0} out of range")]
    OutOfRange(u8),

    /// Slot holds no handle
    #[error("handle index {0} is not assigned")]
    Unassigned(u8),

    /// Slot was already released
    #[error("handle index {0} released twice")]
    DoubleRelease(u8),

    /// Every slot is occupied
    #[error("handle table is full")]
    TableFull,
}

impl HandleError {
    /// Return value a server reports when resolution fails this way
    #[must_use]
    pub fn return_value(self) -> ReturnValue {
        ReturnValue::NULL_OBJECT
    }
}

/// Failure of the underlying transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Peer is unreachable or the session ended
    #[error("transport closed: {0}")]
    Closed(String),

    /// Peer rejected the request buffer as a whole
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Failure of a whole client exchange
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request or response bytes were malformed
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local handle table misuse
    #[error("handle error: {0}")]
    Handle(#[from] HandleError),

    /// Server kept answering with backoff after all retries
    #[error("server busy after {attempts} attempts")]
    Busy {
        /// Exchanges attempted
        attempts: u32,
    },

    /// Fewer responses arrived than response-producing requests were sent
    #[error("truncated response: expected {expected}, received {received}")]
    Truncated {
        /// Responses expected
        expected: usize,
        /// Responses decoded
        received: usize,
    },

    /// A single request does not fit in the negotiated buffer
    #[error("request of {size} bytes cannot fit in {max}-byte buffer")]
    RequestTooLarge {
        /// Encoded request size
        size: usize,
        /// Negotiated maximum
        max: usize,
    },
}
