//! ROP envelopes.
//!
//! Every request shares one envelope: `RopId | LogonId | handle indices |
//! payload`. Responses share `RopId | handle index | ReturnValue | body`.
//! The payload and body are tagged unions keyed by RopId; the handle
//! index layout is fixed per RopId (see [`HandleShape`]).

mod request;
mod response;

pub use request::{MessageReadState, RequestPayload, RopRequest};
pub use response::{
    LOGON_FOLDER_COUNT, LogonResponse, LogonTime, PropertyProblem, ResponseBody, RopResponse, TransferStatus,
};

use serde::Serialize;

use crate::error::CodecError;
use crate::rop_id::HandleShape;
use crate::wire::{Reader, Writer};

/// Handle index fields of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandleIndices {
    /// Only an output slot (Logon)
    Output(u8),
    /// One input object
    Input(u8),
    /// Input object and the slot the new object will occupy
    InputOutput {
        /// Input slot
        input: u8,
        /// Output slot
        output: u8,
    },
    /// Source and destination objects of a copy
    SourceDest {
        /// Source slot
        source: u8,
        /// Destination slot
        dest: u8,
    },
    /// Slot echoed in the response, then the input object
    ResponseInput {
        /// Slot echoed in the response envelope
        response: u8,
        /// Input slot
        input: u8,
    },
}

impl HandleIndices {
    /// Layout of these indices
    #[must_use]
    pub fn shape(&self) -> HandleShape {
        match self {
            Self::Output(_) => HandleShape::Output,
            Self::Input(_) => HandleShape::Input,
            Self::InputOutput { .. } => HandleShape::InputOutput,
            Self::SourceDest { .. } => HandleShape::SourceDest,
            Self::ResponseInput { .. } => HandleShape::ResponseInput,
        }
    }

    /// Primary input (or source) slot
    #[must_use]
    pub fn input(&self) -> Option<u8> {
        match *self {
            Self::Output(_) => None,
            Self::Input(input)
            | Self::InputOutput { input, .. }
            | Self::ResponseInput { input, .. } => Some(input),
            Self::SourceDest { source, .. } => Some(source),
        }
    }

    /// Slot a successful response binds
    #[must_use]
    pub fn output(&self) -> Option<u8> {
        match *self {
            Self::Output(output) | Self::InputOutput { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Destination slot of a dual-handle operation
    #[must_use]
    pub fn dest(&self) -> Option<u8> {
        match *self {
            Self::SourceDest { dest, .. } => Some(dest),
            _ => None,
        }
    }

    /// Index echoed in the response envelope
    #[must_use]
    pub fn response_index(&self) -> u8 {
        match *self {
            Self::Output(output) | Self::InputOutput { output, .. } => output,
            Self::Input(input) => input,
            Self::SourceDest { source, .. } => source,
            Self::ResponseInput { response, .. } => response,
        }
    }

    /// Highest slot referenced
    #[must_use]
    pub fn max_index(&self) -> u8 {
        match *self {
            Self::Output(a) | Self::Input(a) => a,
            Self::InputOutput { input, output } => input.max(output),
            Self::SourceDest { source, dest } => source.max(dest),
            Self::ResponseInput { response, input } => response.max(input),
        }
    }

    pub(crate) fn read(r: &mut Reader<'_>, shape: HandleShape) -> Result<Self, CodecError> {
        Ok(match shape {
            HandleShape::Output => Self::Output(r.u8()?),
            HandleShape::Input => Self::Input(r.u8()?),
            HandleShape::InputOutput => Self::InputOutput {
                input: r.u8()?,
                output: r.u8()?,
            },
            HandleShape::SourceDest => Self::SourceDest {
                source: r.u8()?,
                dest: r.u8()?,
            },
            HandleShape::ResponseInput => Self::ResponseInput {
                response: r.u8()?,
                input: r.u8()?,
            },
        })
    }

    pub(crate) fn write(&self, w: &mut Writer) {
        match *self {
            Self::Output(a) | Self::Input(a) => {
                w.u8(a);
            }
            Self::InputOutput { input, output } => {
                w.u8(input).u8(output);
            }
            Self::SourceDest { source, dest } => {
                w.u8(source).u8(dest);
            }
            Self::ResponseInput { response, input } => {
                w.u8(response).u8(input);
            }
        }
    }
}
