//! # ropwire Core
//!
//! Wire layer for the Remote Operations (ROP) protocol used by MAPI
//! clients to talk to a mailbox store.
//!
//! This crate provides:
//! - Multiplexed request/response buffer encoding and decoding
//! - ROP envelopes as tagged unions keyed by [`RopId`]
//! - The per-session [`HandleTable`] of server object handles
//! - Short-term and long-term identifier formats
//! - Property tags and values as carried in ROP payloads
//! - A blocking [`Client`] that drives exchanges with bounded backoff
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Client                                 │
//! │   (handle table, batching, backoff retry over a Transport)      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                      Request/Response buffer                    │
//! │   (RPC_HEADER_EXT | RopSize | ROPs | server object handles)     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                            ROPs                                 │
//! │   (RopId | LogonId | handle indices | payload)                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod client;
pub mod error;
pub mod handle;
pub mod ids;
pub mod property;
pub mod return_value;
pub mod rop;
pub mod rop_id;
pub mod wire;

pub use buffer::{DecodedResponses, HeaderFlags, RequestBuffer};
pub use client::{Client, ClientConfig, ExchangeOutcome, Transport};
pub use error::{ClientError, CodecError, HandleError, TransportError};
pub use handle::{HandleTable, ServerObjectHandle};
pub use ids::{GlobalCounter, LongTermId, ReplicaGuid, ShortTermId, Xid};
pub use property::{PropertyTag, PropertyType, PropertyValue, TaggedValue};
pub use return_value::ReturnValue;
pub use rop::{HandleIndices, RequestPayload, ResponseBody, RopRequest, RopResponse};
pub use rop_id::RopId;

/// Size of an `RPC_HEADER_EXT` structure in bytes
pub const RPC_HEADER_EXT_SIZE: usize = 8;

/// Size of the `RopSize` field that precedes the ROP stream
pub const ROP_SIZE_FIELD: usize = 2;

/// Default negotiated buffer budget for one exchange
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 0x8000;

/// Largest response buffer a client may request
pub const MAX_RESPONSE_BUFFER_SIZE: usize = 0x10008;

/// Maximum number of handle slots addressable by a one-byte index
pub const MAX_HANDLE_SLOTS: usize = 255;

/// Value of an unused slot in the wire handle table
pub const NULL_HANDLE: u32 = 0xFFFF_FFFF;

/// Sentinel asking the server to choose a buffer size bounded by a
/// separate maximum field
pub const BUFFER_SIZE_SERVER_CHOICE: u16 = 0xBABE;
