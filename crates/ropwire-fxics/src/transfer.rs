//! Chunked FastTransfer contexts.
//!
//! A source context holds a fully serialized stream and hands it out in
//! bounded chunks. A destination context accepts chunks cut at any
//! byte, parses them incrementally and yields completed items. Once a
//! destination sees a grammar violation it stays failed.

use ropwire_core::rop::TransferStatus;
use ropwire_core::{BUFFER_SIZE_SERVER_CHOICE, CodecError};
use serde::Serialize;

use crate::content::{FxItem, FxObject, ObjectAssembler, ObjectKind};
use crate::error::FxError;
use crate::stream::FxParser;

/// Copy operation a FastTransfer stream was produced by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum SourceOperation {
    /// RopFastTransferSourceCopyTo
    CopyTo = 0x01,
    /// RopFastTransferSourceCopyProperties
    CopyProperties = 0x02,
    /// RopFastTransferSourceCopyMessages
    CopyMessages = 0x03,
    /// RopFastTransferSourceCopyFolder
    CopyFolder = 0x04,
}

impl TryFrom<u8> for SourceOperation {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0x01 => Ok(Self::CopyTo),
            0x02 => Ok(Self::CopyProperties),
            0x03 => Ok(Self::CopyMessages),
            0x04 => Ok(Self::CopyFolder),
            other => Err(CodecError::InvalidValue {
                field: "SourceOperation",
                value: u64::from(other),
            }),
        }
    }
}

/// One GetBuffer result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferChunk {
    /// Partial while bytes remain, Done on the last chunk
    pub status: TransferStatus,
    /// Top-level pieces fully delivered so far
    pub in_progress_count: u16,
    /// Top-level pieces in the whole stream
    pub total_step_count: u16,
    /// Stream bytes
    pub data: Vec<u8>,
}

/// Server side of a download
#[derive(Debug, Clone)]
pub struct SourceContext {
    data: Vec<u8>,
    units: Vec<usize>,
    position: usize,
}

impl SourceContext {
    /// Serialize `object` into a new context
    ///
    /// # Errors
    ///
    /// Fails when the object cannot be written as a stream.
    pub fn new(object: &FxObject) -> Result<Self, FxError> {
        let (data, units) = object.encode()?;
        Ok(Self::from_stream(data, units))
    }

    /// Context over an already serialized stream whose top-level pieces
    /// end at `units`
    #[must_use]
    pub fn from_stream(data: Vec<u8>, units: Vec<usize>) -> Self {
        tracing::debug!("FastTransfer source: {} bytes, {} steps", data.len(), units.len());
        Self {
            data,
            units,
            position: 0,
        }
    }

    /// Stream length
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.data.len()
    }

    /// Bytes not yet handed out
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// True once the last chunk was handed out
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.position == self.data.len()
    }

    /// Next chunk
    ///
    /// `buffer_size` bounds the chunk, except that the sentinel `0xBABE`
    /// lets the context pick up to `default_chunk` bytes, still bounded
    /// by `maximum_buffer_size`.
    pub fn get_buffer(&mut self, buffer_size: u16, maximum_buffer_size: u16, default_chunk: usize) -> TransferChunk {
        let limit = if buffer_size == BUFFER_SIZE_SERVER_CHOICE {
            default_chunk.min(usize::from(maximum_buffer_size))
        } else {
            usize::from(buffer_size)
        }
        .max(1);
        let take = limit.min(self.remaining());
        let data = self.data[self.position..self.position + take].to_vec();
        self.position += take;

        let delivered = self.units.iter().filter(|&&end| end <= self.position).count();
        TransferChunk {
            status: if self.is_done() {
                TransferStatus::Done
            } else {
                TransferStatus::Partial
            },
            in_progress_count: u16::try_from(delivered).unwrap_or(u16::MAX),
            total_step_count: u16::try_from(self.units.len()).unwrap_or(u16::MAX),
            data,
        }
    }
}

/// Server side of an upload
#[derive(Debug)]
pub struct DestinationContext {
    operation: SourceOperation,
    parser: FxParser,
    assembler: ObjectAssembler,
    failed: bool,
    items: u32,
}

impl DestinationContext {
    /// Context expecting a stream of `kind` produced by `operation`
    #[must_use]
    pub fn new(operation: SourceOperation, kind: ObjectKind) -> Self {
        Self {
            operation,
            parser: FxParser::new(),
            assembler: ObjectAssembler::new(kind),
            failed: false,
            items: 0,
        }
    }

    /// Operation the stream came from
    #[must_use]
    pub fn operation(&self) -> SourceOperation {
        self.operation
    }

    /// Kind being assembled
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.assembler.kind()
    }

    /// Items completed so far
    #[must_use]
    pub fn items_completed(&self) -> u32 {
        self.items
    }

    /// True when a grammar violation was seen
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// True when the stream could end here
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.failed && self.parser.pending() == 0 && self.assembler.is_complete()
    }

    /// Apply one chunk and return the items it completed
    ///
    /// # Errors
    ///
    /// Returns the grammar error that failed the context, and
    /// [`FxError::ContextFailed`] on every later call.
    pub fn put_buffer(&mut self, chunk: &[u8]) -> Result<Vec<FxItem>, FxError> {
        if self.failed {
            return Err(FxError::ContextFailed);
        }
        self.parser.feed(chunk);
        let mut completed = Vec::new();
        loop {
            let step = self
                .parser
                .next_element()
                .and_then(|element| match element {
                    Some(element) => self.assembler.push(element).map(Some),
                    None => Ok(None),
                });
            match step {
                Ok(Some(Some(item))) => {
                    self.items = self.items.saturating_add(1);
                    completed.push(item);
                }
                Ok(Some(None)) => {}
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("FastTransfer destination failed: {}", e);
                    self.failed = true;
                    return Err(e);
                }
            }
        }
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{FolderContent, MessageContent};
    use crate::marker::Marker;
    use crate::stream::FxWriter;
    use ropwire_core::property::tags;
    use ropwire_core::{PropertyValue, TaggedValue};

    fn folder() -> FxObject {
        let message = |s: &str| MessageContent {
            properties: vec![TaggedValue::new(tags::SUBJECT, PropertyValue::Unicode(s.into()))],
            ..MessageContent::default()
        };
        FxObject::TopFolder(FolderContent {
            properties: vec![TaggedValue::new(tags::DISPLAY_NAME, PropertyValue::Unicode("F".into()))],
            messages: (0..20).map(|i| message(&format!("message {i}"))).collect(),
            ..FolderContent::default()
        })
    }

    #[test]
    fn test_chunks_respect_bounds() {
        let mut source = SourceContext::new(&folder()).unwrap();
        let total = source.total_size();
        let mut received = Vec::new();
        loop {
            let chunk = source.get_buffer(BUFFER_SIZE_SERVER_CHOICE, 100, 4096);
            assert!(chunk.data.len() <= 100);
            received.extend_from_slice(&chunk.data);
            if chunk.status == TransferStatus::Done {
                assert_eq!(chunk.in_progress_count, chunk.total_step_count);
                break;
            }
        }
        assert_eq!(received.len(), total);
    }

    #[test]
    fn test_explicit_buffer_size() {
        let mut source = SourceContext::new(&folder()).unwrap();
        let chunk = source.get_buffer(7, 0, 4096);
        assert_eq!(chunk.data.len(), 7);
        assert_eq!(chunk.status, TransferStatus::Partial);
    }

    #[test]
    fn test_destination_accepts_any_rechunking() {
        let (bytes, _) = folder().encode().unwrap();
        for size in [1, 3, 17, 256, bytes.len()] {
            let mut dest = DestinationContext::new(SourceOperation::CopyFolder, ObjectKind::TopFolder);
            let mut items = Vec::new();
            for chunk in bytes.chunks(size) {
                items.extend(dest.put_buffer(chunk).unwrap());
            }
            assert!(dest.is_complete());
            assert_eq!(items.len(), 1);
            match &items[0] {
                FxItem::Folder(f) => assert_eq!(f.messages.len(), 20),
                other => panic!("unexpected item {other:?}"),
            }
        }
    }

    #[test]
    fn test_grammar_violation_is_sticky() {
        let mut w = FxWriter::new();
        w.marker(Marker::EndAttach);
        let mut dest = DestinationContext::new(SourceOperation::CopyTo, ObjectKind::Message);
        assert!(matches!(
            dest.put_buffer(&w.into_bytes()),
            Err(FxError::UnexpectedMarker { .. })
        ));
        assert!(dest.is_failed());
        assert_eq!(dest.put_buffer(&[]), Err(FxError::ContextFailed));
    }

    #[test]
    fn test_source_operation_codes() {
        assert_eq!(SourceOperation::try_from(3), Ok(SourceOperation::CopyMessages));
        assert!(SourceOperation::try_from(9).is_err());
    }
}
