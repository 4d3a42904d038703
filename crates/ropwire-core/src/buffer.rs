//! Multiplexed request and response buffers.
//!
//! Layout of one buffer (all fields little-endian):
//!
//! ```text
//! ┌──────────────── RPC_HEADER_EXT (8) ────────────────┐
//! │ Version u16 │ Flags u16 │ Size u16 │ SizeActual u16 │
//! ├────────────────────────────────────────────────────┤
//! │ RopSize u16 (counts itself) │ ROP bytes ...        │
//! ├────────────────────────────────────────────────────┤
//! │ ServerObjectHandleTable: u32 × n                   │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! A response may chain several header/payload pairs; the final header
//! carries the `Last` flag. Each payload has its own handle table.

use std::ops::Range;

use serde::Serialize;

use crate::error::CodecError;
use crate::handle::ServerObjectHandle;
use crate::rop::{RopRequest, RopResponse};
use crate::rop_id::RopId;
use crate::wire::{Reader, Writer};
use crate::{NULL_HANDLE, ROP_SIZE_FIELD, RPC_HEADER_EXT_SIZE};

/// Byte every payload byte is XORed with under [`HeaderFlags::XOR_MAGIC`]
const XOR_MAGIC_BYTE: u8 = 0xA5;

/// `RPC_HEADER_EXT` flag bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderFlags(u16);

impl HeaderFlags {
    /// Payload is compressed
    pub const COMPRESSED: u16 = 0x0001;
    /// Payload is XOR-obfuscated
    pub const XOR_MAGIC: u16 = 0x0002;
    /// Final header in the buffer
    pub const LAST: u16 = 0x0004;

    /// Flags for a single final header
    #[must_use]
    pub fn last() -> Self {
        Self(Self::LAST)
    }

    /// Add obfuscation
    #[must_use]
    pub fn with_xor_magic(mut self) -> Self {
        self.0 |= Self::XOR_MAGIC;
        self
    }

    /// Check the Last flag
    #[must_use]
    pub fn is_last(self) -> bool {
        self.0 & Self::LAST != 0
    }

    /// Check the XorMagic flag
    #[must_use]
    pub fn is_obfuscated(self) -> bool {
        self.0 & Self::XOR_MAGIC != 0
    }

    /// Check the Compressed flag
    #[must_use]
    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    /// Raw value
    #[must_use]
    pub fn as_u16(self) -> u16 {
        self.0
    }
}

/// Wrap ROP bytes and a handle table in one `RPC_HEADER_EXT` chunk
///
/// # Errors
///
/// Returns [`CodecError::BufferTooLarge`] when the payload does not fit the
/// header's 16-bit size fields.
pub fn frame(rop_bytes: &[u8], handles: &[u32], flags: HeaderFlags) -> Result<Vec<u8>, CodecError> {
    let rop_size = ROP_SIZE_FIELD + rop_bytes.len();
    let payload_size = rop_size + handles.len() * 4;
    let size = u16::try_from(payload_size).map_err(|_| CodecError::BufferTooLarge {
        size: payload_size,
        max: usize::from(u16::MAX),
    })?;

    let mut payload = Writer::with_capacity(payload_size);
    // rop_size <= payload_size, which fit in a u16 above
    payload.u16(rop_size as u16).bytes(rop_bytes);
    for handle in handles {
        payload.u32(*handle);
    }
    let mut payload = payload.into_bytes();
    if flags.is_obfuscated() {
        xor_in_place(&mut payload);
    }

    let mut out = Writer::with_capacity(RPC_HEADER_EXT_SIZE + payload.len());
    out.u16(0).u16(flags.0).u16(size).u16(size).bytes(&payload);
    Ok(out.into_bytes())
}

/// One decoded chunk: ROP bytes and its handle table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// ROP stream with the RopSize prefix removed
    pub rop_bytes: Vec<u8>,
    /// Server object handle table
    pub handles: Vec<u32>,
    /// Flags of the chunk's header
    pub flags: HeaderFlags,
}

/// Split a buffer into its header chunks
///
/// # Errors
///
/// Fails on short input, non-zero version, compressed payloads, size
/// fields that disagree with the data, a missing final header, or bytes
/// after the final header.
pub fn unframe(bytes: &[u8]) -> Result<Vec<Chunk>, CodecError> {
    let mut r = Reader::new(bytes);
    let mut chunks = Vec::new();
    loop {
        let version = r.u16()?;
        if version != 0 {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let flags = HeaderFlags(r.u16()?);
        let size = usize::from(r.u16()?);
        let size_actual = usize::from(r.u16()?);
        if flags.is_compressed() {
            return Err(CodecError::Compressed);
        }
        if size != size_actual {
            return Err(CodecError::SizeMismatch {
                field: "SizeActual",
                declared: size_actual,
                available: size,
            });
        }
        if r.remaining() < size {
            return Err(CodecError::SizeMismatch {
                field: "Size",
                declared: size,
                available: r.remaining(),
            });
        }
        let mut payload = r.bytes(size)?.to_vec();
        if flags.is_obfuscated() {
            xor_in_place(&mut payload);
        }
        chunks.push(split_payload(&payload, flags)?);
        if flags.is_last() {
            if !r.is_empty() {
                return Err(CodecError::SizeMismatch {
                    field: "Size",
                    declared: bytes.len() - r.remaining(),
                    available: bytes.len(),
                });
            }
            break;
        }
        if r.is_empty() {
            return Err(CodecError::MissingLastFlag);
        }
    }
    Ok(chunks)
}

fn split_payload(payload: &[u8], flags: HeaderFlags) -> Result<Chunk, CodecError> {
    let mut r = Reader::new(payload);
    let rop_size = usize::from(r.u16()?);
    if rop_size < ROP_SIZE_FIELD || rop_size > payload.len() {
        return Err(CodecError::SizeMismatch {
            field: "RopSize",
            declared: rop_size,
            available: payload.len(),
        });
    }
    let rop_bytes = r.bytes(rop_size - ROP_SIZE_FIELD)?.to_vec();
    let table = r.rest();
    if table.len() % 4 != 0 {
        return Err(CodecError::MisalignedHandleTable(table.len()));
    }
    let handles = table
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Chunk {
        rop_bytes,
        handles,
        flags,
    })
}

fn xor_in_place(data: &mut [u8]) {
    for byte in data {
        *byte ^= XOR_MAGIC_BYTE;
    }
}

/// Encode requests into one buffer
///
/// # Errors
///
/// Fails when a request cannot be encoded or the result exceeds `max_size`.
pub fn encode_requests(
    requests: &[RopRequest],
    handles: &[u32],
    max_size: usize,
    obfuscate: bool,
) -> Result<Vec<u8>, CodecError> {
    let mut w = Writer::new();
    for request in requests {
        request.encode(&mut w)?;
    }
    let mut flags = HeaderFlags::last();
    if obfuscate {
        flags = flags.with_xor_magic();
    }
    let bytes = frame(&w.into_bytes(), handles, flags)?;
    if bytes.len() > max_size {
        return Err(CodecError::BufferTooLarge {
            size: bytes.len(),
            max: max_size,
        });
    }
    Ok(bytes)
}

/// Group requests into consecutive batches whose encoded buffers each fit
/// in `max_size`, given a handle table of `handle_slots` entries
///
/// # Errors
///
/// Returns [`CodecError::BufferTooLarge`] when a single request cannot fit
/// on its own.
pub fn plan_batches(
    requests: &[RopRequest],
    handle_slots: usize,
    max_size: usize,
) -> Result<Vec<Range<usize>>, CodecError> {
    let overhead = RPC_HEADER_EXT_SIZE + ROP_SIZE_FIELD + handle_slots * 4;
    let mut batches = Vec::new();
    let mut start = 0;
    let mut used = overhead;
    for (i, request) in requests.iter().enumerate() {
        let len = request.to_bytes()?.len();
        if overhead + len > max_size {
            return Err(CodecError::BufferTooLarge {
                size: overhead + len,
                max: max_size,
            });
        }
        if used + len > max_size {
            batches.push(start..i);
            start = i;
            used = overhead;
        }
        used += len;
    }
    if start < requests.len() {
        batches.push(start..requests.len());
    }
    Ok(batches)
}

/// A request buffer as received by a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBuffer {
    /// ROP stream
    pub rop_bytes: Vec<u8>,
    /// Client-supplied handle table
    pub handles: Vec<u32>,
    /// Whether the request was obfuscated; responses mirror it
    pub obfuscated: bool,
}

impl RequestBuffer {
    /// Parse the framing of a request buffer; ROPs are decoded lazily
    ///
    /// # Errors
    ///
    /// Fails on framing errors or a request split across several headers.
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut chunks = unframe(bytes)?;
        if chunks.len() != 1 {
            return Err(CodecError::InvalidValue {
                field: "request header count",
                value: chunks.len() as u64,
            });
        }
        let chunk = chunks.remove(0);
        Ok(Self {
            rop_bytes: chunk.rop_bytes,
            handles: chunk.handles,
            obfuscated: chunk.flags.is_obfuscated(),
        })
    }

    /// Iterate the requests in declaration order, with the byte offset
    /// each one starts at. Iteration stops after the first error.
    pub fn requests(&self) -> RequestIter<'_> {
        RequestIter {
            reader: Reader::new(&self.rop_bytes),
            failed: false,
        }
    }

    /// Decode every request
    ///
    /// # Errors
    ///
    /// Fails on the first request that cannot be decoded.
    pub fn decode_all(&self) -> Result<Vec<RopRequest>, CodecError> {
        self.requests().map(|r| r.map(|(request, _)| request)).collect()
    }
}

/// Iterator over the requests of a [`RequestBuffer`]
#[derive(Debug)]
pub struct RequestIter<'a> {
    reader: Reader<'a>,
    failed: bool,
}

impl Iterator for RequestIter<'_> {
    type Item = Result<(RopRequest, usize), CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.is_empty() {
            return None;
        }
        let offset = self.reader.position();
        match RopRequest::decode(&mut self.reader) {
            Ok(request) => Some(Ok((request, offset))),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Server request to pause before retrying the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backoff {
    /// Logon the backoff applies to
    pub logon_id: u8,
    /// Pause for the whole logon, in milliseconds
    pub duration_ms: u32,
    /// Per-ROP pauses
    pub rops: Vec<(u8, u32)>,
    /// Opaque additional data
    pub additional_data: Vec<u8>,
}

impl Backoff {
    /// Encode including the leading RopId
    ///
    /// # Errors
    ///
    /// Fails when the additional data exceeds its 16-bit length prefix.
    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.u8(RopId::Backoff.as_u8())
            .u8(self.logon_id)
            .u32(self.duration_ms)
            .u8(self.rops.len().min(usize::from(u8::MAX)) as u8);
        for (rop_id, duration) in self.rops.iter().take(usize::from(u8::MAX)) {
            w.u8(*rop_id).u32(*duration);
        }
        w.sized_bytes16(&self.additional_data)?;
        Ok(())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let logon_id = r.u8()?;
        let duration_ms = r.u32()?;
        let count = r.u8()?;
        let rops = (0..count)
            .map(|_| Ok((r.u8()?, r.u32()?)))
            .collect::<Result<_, CodecError>>()?;
        Ok(Self {
            logon_id,
            duration_ms,
            rops,
            additional_data: r.sized_bytes16()?.to_vec(),
        })
    }
}

/// Server could not fit the next response; processing stopped there
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferTooSmall {
    /// Response buffer size the server needed
    pub size_needed: u16,
    /// Request bytes that were not processed
    pub request_buffers: Vec<u8>,
}

impl BufferTooSmall {
    /// Encode including the leading RopId
    pub fn encode(&self, w: &mut Writer) {
        w.u8(RopId::BufferTooSmall.as_u8())
            .u16(self.size_needed)
            .bytes(&self.request_buffers);
    }
}

/// Decoded response buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedResponses {
    /// Responses physically present, in order
    pub responses: Vec<RopResponse>,
    /// Number of responses the caller expected
    pub expected: usize,
    /// Handle table of the last chunk
    pub handles: Vec<u32>,
    /// Present when the server asked the client to back off
    pub backoff: Option<Backoff>,
    /// Present when the server ran out of response space
    pub buffer_too_small: Option<BufferTooSmall>,
    /// Why decoding stopped before the end of the ROP stream
    #[serde(skip)]
    pub format_error: Option<CodecError>,
}

impl DecodedResponses {
    /// Decode a response buffer, binding each handle-creating response to
    /// the handle at its output index
    ///
    /// A stream that ends early is not an error: fewer responses than
    /// `expected` are returned and [`Self::is_truncated`] reports it. A
    /// response that cannot be decoded stops decoding there; the responses
    /// before it are kept and [`Self::format_error`] holds the reason.
    ///
    /// # Errors
    ///
    /// Fails when the buffer cannot be framed.
    pub fn decode(bytes: &[u8], expected: usize) -> Result<Self, CodecError> {
        let mut out = Self {
            responses: Vec::new(),
            expected,
            handles: Vec::new(),
            backoff: None,
            buffer_too_small: None,
            format_error: None,
        };
        for chunk in unframe(bytes)? {
            let decoded = out.decode_chunk(&chunk);
            out.handles = chunk.handles;
            if let Err(e) = decoded {
                tracing::debug!("Response {} undecodable: {}", out.responses.len(), e);
                out.format_error = Some(e);
                break;
            }
        }
        if out.responses.len() != expected {
            tracing::debug!(
                "Response count mismatch: expected {}, decoded {}",
                expected,
                out.responses.len()
            );
        }
        Ok(out)
    }

    fn decode_chunk(&mut self, chunk: &Chunk) -> Result<(), CodecError> {
        let mut r = Reader::new(&chunk.rop_bytes);
        while !r.is_empty() {
            let rop_id = RopId::try_from(r.u8()?)?;
            match rop_id {
                RopId::Backoff => self.backoff = Some(Backoff::decode(&mut r)?),
                RopId::BufferTooSmall => {
                    let size_needed = r.u16()?;
                    self.buffer_too_small = Some(BufferTooSmall {
                        size_needed,
                        request_buffers: r.rest().to_vec(),
                    });
                    break;
                }
                _ => {
                    let mut response = RopResponse::decode_after_id(&mut r, rop_id)?;
                    if rop_id.creates_handle() && response.return_value.is_success() {
                        response.bound_handle = chunk
                            .handles
                            .get(usize::from(response.handle_index))
                            .filter(|&&h| h != NULL_HANDLE)
                            .map(|&h| ServerObjectHandle(h));
                    }
                    self.responses.push(response);
                }
            }
        }
        Ok(())
    }

    /// Fewer responses than expected were present
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.responses.len() < self.expected
    }

    /// `(expected, received)` when the counts differ
    #[must_use]
    pub fn count_mismatch(&self) -> Option<(usize, usize)> {
        (self.responses.len() != self.expected).then_some((self.expected, self.responses.len()))
    }
}

/// Encode responses into one response buffer
///
/// # Errors
///
/// Fails when a response cannot be encoded or the payload overflows the
/// header's size fields.
pub fn encode_responses(
    responses: &[RopResponse],
    handles: &[u32],
    obfuscate: bool,
) -> Result<Vec<u8>, CodecError> {
    let mut w = Writer::new();
    for response in responses {
        response.encode(&mut w)?;
    }
    let mut flags = HeaderFlags::last();
    if obfuscate {
        flags = flags.with_xor_magic();
    }
    frame(&w.into_bytes(), handles, flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ShortTermId;
    use crate::return_value::ReturnValue;
    use crate::rop::{HandleIndices, RequestPayload, ResponseBody};

    fn open_folder(input: u8, output: u8) -> RopRequest {
        RopRequest::new(0, HandleIndices::InputOutput { input, output }, RequestPayload::OpenFolder {
            folder_id: ShortTermId::from_u64(0x0100_0000_0000_0001),
            open_mode: 0,
        })
    }

    #[test]
    fn test_frame_layout() {
        let bytes = frame(&[0xAA, 0xBB], &[7], HeaderFlags::last()).unwrap();
        assert_eq!(
            bytes,
            vec![0, 0, 4, 0, 8, 0, 8, 0, 4, 0, 0xAA, 0xBB, 7, 0, 0, 0]
        );
        let chunks = unframe(&bytes).unwrap();
        assert_eq!(chunks[0].rop_bytes, vec![0xAA, 0xBB]);
        assert_eq!(chunks[0].handles, vec![7]);
    }

    #[test]
    fn test_xor_magic_roundtrip() {
        let plain = frame(&[1, 2, 3], &[NULL_HANDLE], HeaderFlags::last()).unwrap();
        let masked = frame(&[1, 2, 3], &[NULL_HANDLE], HeaderFlags::last().with_xor_magic()).unwrap();
        assert_ne!(plain[8..], masked[8..]);
        assert_eq!(unframe(&masked).unwrap()[0].rop_bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_unframe_rejects_bad_headers() {
        let mut bytes = frame(&[1], &[], HeaderFlags::last()).unwrap();
        bytes[2] |= 0x01;
        assert_eq!(unframe(&bytes), Err(CodecError::Compressed));

        let no_last = frame(&[1], &[], HeaderFlags::default()).unwrap();
        assert_eq!(unframe(&no_last), Err(CodecError::MissingLastFlag));

        let mut misaligned = frame(&[1], &[], HeaderFlags::last()).unwrap();
        misaligned.push(0);
        misaligned[4] += 1;
        misaligned[6] += 1;
        assert_eq!(unframe(&misaligned), Err(CodecError::MisalignedHandleTable(1)));
    }

    #[test]
    fn test_request_buffer_roundtrip() {
        let requests = vec![open_folder(0, 1), open_folder(1, 2)];
        let bytes = encode_requests(&requests, &[5, NULL_HANDLE, NULL_HANDLE], 0x8000, false).unwrap();
        let parsed = RequestBuffer::parse(&bytes).unwrap();
        assert_eq!(parsed.handles, vec![5, NULL_HANDLE, NULL_HANDLE]);
        assert_eq!(parsed.decode_all().unwrap(), requests);
        let offsets: Vec<usize> = parsed.requests().map(|r| r.unwrap().1).collect();
        assert_eq!(offsets, vec![0, 13]);
    }

    #[test]
    fn test_encode_respects_max_size() {
        let requests = vec![open_folder(0, 1); 10];
        assert!(matches!(
            encode_requests(&requests, &[], 64, false),
            Err(CodecError::BufferTooLarge { .. })
        ));
    }

    #[test]
    fn test_plan_batches() {
        let requests = vec![open_folder(0, 1); 10];
        // 13 bytes per request, 8 + 2 + 8 bytes of overhead
        let batches = plan_batches(&requests, 2, 18 + 13 * 4).unwrap();
        assert_eq!(batches, vec![0..4, 4..8, 8..10]);
        assert!(plan_batches(&requests, 2, 20).is_err());
    }

    #[test]
    fn test_decode_binds_output_handles() {
        let responses = vec![
            RopResponse::success(RopId::OpenFolder, 1, ResponseBody::OpenFolder {
                has_rules: false,
                is_ghosted: false,
            }),
            RopResponse::failure(RopId::OpenFolder, 2, ReturnValue::NOT_FOUND),
        ];
        let bytes = encode_responses(&responses, &[5, 9, NULL_HANDLE], false).unwrap();
        let decoded = DecodedResponses::decode(&bytes, 2).unwrap();
        assert_eq!(decoded.responses.len(), 2);
        assert_eq!(decoded.responses[0].bound_handle, Some(ServerObjectHandle(9)));
        assert_eq!(decoded.responses[1].bound_handle, None);
        assert!(!decoded.is_truncated());
        assert_eq!(decoded.count_mismatch(), None);
    }

    #[test]
    fn test_decode_truncated_stream() {
        let responses = vec![RopResponse::failure(RopId::OpenFolder, 1, ReturnValue::NULL_OBJECT)];
        let bytes = encode_responses(&responses, &[], false).unwrap();
        let decoded = DecodedResponses::decode(&bytes, 3).unwrap();
        assert!(decoded.is_truncated());
        assert_eq!(decoded.count_mismatch(), Some((3, 1)));
        assert_eq!(decoded.responses[0].return_value, ReturnValue::NULL_OBJECT);
    }

    #[test]
    fn test_decode_backoff_and_buffer_too_small() {
        let mut w = Writer::new();
        Backoff {
            logon_id: 0,
            duration_ms: 50,
            rops: vec![(0x02, 10)],
            additional_data: vec![],
        }
        .encode(&mut w)
        .unwrap();
        let bytes = frame(&w.into_bytes(), &[], HeaderFlags::last()).unwrap();
        let decoded = DecodedResponses::decode(&bytes, 1).unwrap();
        assert_eq!(decoded.backoff.as_ref().map(|b| b.duration_ms), Some(50));
        assert!(decoded.responses.is_empty());

        let mut w = Writer::new();
        RopResponse::success(RopId::SubmitMessage, 0, ResponseBody::Empty)
            .encode(&mut w)
            .unwrap();
        BufferTooSmall {
            size_needed: 0x200,
            request_buffers: vec![0x32, 0, 0, 0],
        }
        .encode(&mut w);
        let bytes = frame(&w.into_bytes(), &[], HeaderFlags::last()).unwrap();
        let decoded = DecodedResponses::decode(&bytes, 2).unwrap();
        assert_eq!(decoded.responses.len(), 1);
        let too_small = decoded.buffer_too_small.unwrap();
        assert_eq!(too_small.size_needed, 0x200);
        assert_eq!(too_small.request_buffers, vec![0x32, 0, 0, 0]);
    }

    #[test]
    fn test_decode_keeps_responses_before_a_cut_off_slot() {
        let mut w = Writer::new();
        RopResponse::success(RopId::SubmitMessage, 0, ResponseBody::Empty)
            .encode(&mut w)
            .unwrap();
        w.u8(RopId::OpenFolder.as_u8());
        let bytes = frame(&w.into_bytes(), &[], HeaderFlags::last()).unwrap();

        let decoded = DecodedResponses::decode(&bytes, 2).unwrap();
        assert_eq!(decoded.responses.len(), 1);
        assert_eq!(decoded.responses[0].rop_id, RopId::SubmitMessage);
        assert!(decoded.is_truncated());
        assert_eq!(decoded.count_mismatch(), Some((2, 1)));
        assert!(decoded.format_error.is_some());
    }

    #[test]
    fn test_bytes_after_last_header_are_rejected() {
        let mut bytes = encode_responses(
            &[RopResponse::success(RopId::SubmitMessage, 0, ResponseBody::Empty)],
            &[],
            false,
        )
        .unwrap();
        assert!(unframe(&bytes).is_ok());
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        assert!(matches!(
            unframe(&bytes),
            Err(CodecError::SizeMismatch { field: "Size", .. })
        ));
        assert!(DecodedResponses::decode(&bytes, 1).is_err());
    }

    #[test]
    fn test_chained_response_headers() {
        let first = encode_responses(
            &[RopResponse::success(RopId::SubmitMessage, 0, ResponseBody::Empty)],
            &[],
            false,
        )
        .unwrap();
        let mut first = first;
        // Clear the Last flag on the first header
        first[2] = 0;
        let second = encode_responses(
            &[RopResponse::success(RopId::AbortSubmit, 0, ResponseBody::Empty)],
            &[],
            true,
        )
        .unwrap();
        let bytes = [first, second].concat();
        let decoded = DecodedResponses::decode(&bytes, 2).unwrap();
        assert_eq!(decoded.responses.len(), 2);
        assert_eq!(decoded.responses[1].rop_id, RopId::AbortSubmit);
    }
}
