//! ROP handlers
//!
//! Each submodule adds handlers to [`Session`] for one area. Handlers
//! receive a [`RopCall`] whose handle indices the session has already
//! resolved, and answer with a [`Reply`] or a [`Failure`].

mod fast_transfer;
mod messaging;
mod stream;
mod sync;

use ropwire_core::{CodecError, ResponseBody, ReturnValue, RopId, ServerObjectHandle, ShortTermId};
use ropwire_fxics::FxError;

use crate::error::ServerError;
use crate::objects::{MessageObject, ServerObject};
use crate::session::Session;

/// A request with its handle indices resolved
#[derive(Debug)]
pub(crate) struct RopCall {
    pub(crate) logon_id: u8,
    pub(crate) rop_id: RopId,
    pub(crate) input_index: Option<u8>,
    pub(crate) input: Option<ServerObjectHandle>,
    pub(crate) dest_index: Option<u8>,
    /// Destination, resolved without failing the call yet
    pub(crate) dest: Option<Result<ServerObjectHandle, ServerError>>,
    pub(crate) output: Option<u8>,
}

impl RopCall {
    /// Input handle
    pub(crate) fn input(&self) -> Result<ServerObjectHandle, Failure> {
        self.input
            .ok_or_else(|| ServerError::InvalidParameter("InputHandleIndex").into())
    }

    /// Destination handle, failing with the copy ROPs' null-destination body.
    /// A destination owned by another logon is denied instead.
    pub(crate) fn destination(&self) -> Result<ServerObjectHandle, Failure> {
        match &self.dest {
            Some(Ok(handle)) => Ok(*handle),
            Some(Err(ServerError::AccessDenied(index))) => Err(ServerError::AccessDenied(*index).into()),
            Some(Err(e)) => {
                tracing::debug!("{} destination unusable: {}", self.rop_id.name(), e);
                let dest_handle_index = u32::from(self.dest_index.unwrap_or(0));
                let body = if self.rop_id == RopId::CopyToStream {
                    ResponseBody::NullDestinationStream {
                        dest_handle_index,
                        read_byte_count: 0,
                        written_byte_count: 0,
                    }
                } else {
                    ResponseBody::NullDestination { dest_handle_index }
                };
                Err(Failure {
                    return_value: ReturnValue::NULL_DESTINATION_OBJECT,
                    body,
                })
            }
            None => Err(ServerError::InvalidParameter("DestHandleIndex").into()),
        }
    }
}

/// Successful handler result
#[derive(Debug)]
pub(crate) struct Reply {
    pub(crate) body: ResponseBody,
    /// Object to bind at the output index
    pub(crate) created: Option<ServerObjectHandle>,
}

impl Reply {
    pub(crate) fn empty() -> Self {
        Self::new(ResponseBody::Empty)
    }

    pub(crate) fn new(body: ResponseBody) -> Self {
        Self { body, created: None }
    }

    pub(crate) fn created(body: ResponseBody, handle: ServerObjectHandle) -> Self {
        Self {
            body,
            created: Some(handle),
        }
    }
}

/// Failed handler result, answered in-band
#[derive(Debug)]
pub(crate) struct Failure {
    pub(crate) return_value: ReturnValue,
    pub(crate) body: ResponseBody,
}

impl From<ServerError> for Failure {
    fn from(e: ServerError) -> Self {
        tracing::debug!("ROP failed: {}", e);
        Self {
            return_value: e.return_value(),
            body: ResponseBody::Empty,
        }
    }
}

impl From<FxError> for Failure {
    fn from(e: FxError) -> Self {
        ServerError::from(e).into()
    }
}

impl From<CodecError> for Failure {
    fn from(e: CodecError) -> Self {
        ServerError::from(e).into()
    }
}

pub(crate) type Outcome = Result<Reply, Failure>;

impl Session {
    /// Object behind a resolved handle
    pub(crate) fn object(&self, handle: ServerObjectHandle) -> Result<&ServerObject, ServerError> {
        self.objects
            .get(handle)
            .map(|e| &e.object)
            .ok_or(ServerError::InvalidState("object vanished"))
    }

    pub(crate) fn object_mut(&mut self, handle: ServerObjectHandle) -> Result<&mut ServerObject, ServerError> {
        self.objects
            .get_mut(handle)
            .map(|e| &mut e.object)
            .ok_or(ServerError::InvalidState("object vanished"))
    }

    /// Folder id of an open folder
    pub(crate) fn folder_of(&self, handle: ServerObjectHandle, rop: &'static str) -> Result<ShortTermId, ServerError> {
        match self.object(handle)? {
            ServerObject::Folder(folder) => Ok(folder.id),
            _ => Err(ServerError::WrongObject(rop)),
        }
    }

    pub(crate) fn message_of(&self, handle: ServerObjectHandle, rop: &'static str) -> Result<&MessageObject, ServerError> {
        match self.object(handle)? {
            ServerObject::Message(message) => Ok(message),
            _ => Err(ServerError::WrongObject(rop)),
        }
    }

    pub(crate) fn message_mut(
        &mut self,
        handle: ServerObjectHandle,
        rop: &'static str,
    ) -> Result<&mut MessageObject, ServerError> {
        match self.object_mut(handle)? {
            ServerObject::Message(message) => Ok(message),
            _ => Err(ServerError::WrongObject(rop)),
        }
    }

    /// Input must be a logon or a folder
    pub(crate) fn require_logon_or_folder(&self, handle: ServerObjectHandle, rop: &'static str) -> Result<(), ServerError> {
        match self.object(handle)? {
            ServerObject::Logon | ServerObject::Folder(_) => Ok(()),
            _ => Err(ServerError::WrongObject(rop)),
        }
    }

    /// Register a new object under the call's logon
    pub(crate) fn bind(&mut self, call: &RopCall, object: ServerObject) -> Result<ServerObjectHandle, ServerError> {
        self.objects.insert(call.logon_id, object)
    }
}
