//! # ropwire FastTransfer and ICS
//!
//! Stream formats shared by FastTransfer copy operations and Incremental
//! Change Synchronization.
//!
//! This crate provides:
//! - The marker and meta-property vocabulary of FastTransfer streams
//! - A stream writer and an incremental parser that accepts arbitrary
//!   chunk boundaries
//! - GLOBSET and IDSET codecs and predecessor change lists
//! - Message, attachment and folder content builders and assemblers
//! - Chunked source and destination transfer contexts
//! - ICS state properties, the state upload accumulator, and the ICS
//!   download stream format

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod content;
pub mod error;
pub mod globset;
pub mod ics;
pub mod idset;
pub mod marker;
pub mod pcl;
pub mod state;
pub mod stream;
pub mod transfer;

pub use content::{AttachmentContent, FolderContent, FxItem, FxObject, MessageContent, ObjectAssembler, ObjectKind};
pub use error::FxError;
pub use globset::GlobSet;
pub use ics::{FolderChange, IcsDownload, IcsReader, MessageChange, SyncKind};
pub use idset::IdSet;
pub use marker::Marker;
pub use pcl::PredecessorChangeList;
pub use state::{StateProperty, StateUpload, SyncState};
pub use stream::{FxElement, FxParser, FxWriter};
pub use transfer::{DestinationContext, SourceContext, SourceOperation, TransferChunk};

/// Default FastTransfer chunk size when the client lets the server choose
pub const DEFAULT_CHUNK_SIZE: usize = 0x3C00;
