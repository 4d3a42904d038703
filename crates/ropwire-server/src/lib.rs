//! # ropwire Server
//!
//! In-memory reference server for the ropwire ROP engine.
//!
//! This crate provides:
//! - A [`Server`] holding one [`Store`] per private mailbox
//! - Per-connection [`Session`]s that answer multiplexed request buffers,
//!   applying ROPs strictly in order and resolving handle indices
//!   against a session-owned object registry
//! - Folder, message, stream, spooler and identifier ROPs
//! - FastTransfer sources and destinations
//! - ICS downloads, collectors and state upload
//! - A [`LoopbackTransport`] that connects a [`ropwire_core::Client`]
//!   to a session in-process
//!
//! ## Example
//!
//! ```
//! use ropwire_core::rop::{HandleIndices, RequestPayload};
//! use ropwire_core::RopRequest;
//! use ropwire_server::{Server, ServerConfig};
//!
//! let server = Server::new(ServerConfig::default()).unwrap();
//! let mut client = server.connect();
//! let logon = RopRequest::new(0, HandleIndices::Output(0), RequestPayload::Logon {
//!     logon_flags: 0x01,
//!     open_flags: 0,
//!     store_state: 0,
//!     essdn: "/o=Example/cn=alice".into(),
//! });
//! let outcome = client.execute(&[logon]).unwrap();
//! assert!(outcome.responses[0].return_value.is_success());
//! assert_eq!(client.handles().bound_count(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod dispatch;
pub mod error;
pub mod loopback;
mod objects;
pub mod server;
pub mod session;
pub mod store;
pub mod sync;
pub mod translate;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use loopback::LoopbackTransport;
pub use server::Server;
pub use session::Session;
pub use store::{SpecialFolder, Store};
pub use sync::{DownloadOptions, SyncContext};
pub use translate::IdTranslator;
