//! `ropwire decode`: dump a hex-encoded request or response buffer.

use console::style;
use ropwire_core::buffer::{Backoff, BufferTooSmall};
use ropwire_core::{DecodedResponses, RequestBuffer, RopRequest, RopResponse};
use serde::Serialize;

/// Decoded request buffer
#[derive(Debug, Serialize)]
pub struct RequestDump {
    /// Payload was XorMagic-obfuscated
    pub obfuscated: bool,
    /// Server object handle table
    pub handles: Vec<u32>,
    /// Requests decoded before the first error, with their byte offsets
    pub requests: Vec<(usize, RopRequest)>,
    /// Why decoding stopped early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

/// Decoded response buffer
#[derive(Debug, Serialize)]
pub struct ResponseDump {
    /// Responses physically present
    pub responses: Vec<RopResponse>,
    /// Server object handle table of the last chunk
    pub handles: Vec<u32>,
    /// `(expected, received)` when `--count` disagreed with the buffer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_mismatch: Option<(usize, usize)>,
    /// RopBackoff, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
    /// RopBufferTooSmall, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_too_small: Option<BufferTooSmall>,
    /// Why decoding stopped early, when a response was malformed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

/// Parse hex input, ignoring whitespace and an optional `0x` prefix
///
/// # Errors
///
/// Returns an error when the input is not valid hex.
pub fn parse_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let cleaned = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .unwrap_or(&cleaned);
    Ok(hex::decode(cleaned)?)
}

/// Decode a request buffer; ROPs after an undecodable one are not shown
///
/// # Errors
///
/// Returns an error when the buffer framing is invalid.
pub fn decode_request(bytes: &[u8]) -> anyhow::Result<RequestDump> {
    let buffer = RequestBuffer::parse(bytes)?;
    let mut requests = Vec::new();
    let mut halted = None;
    for item in buffer.requests() {
        match item {
            Ok((request, offset)) => requests.push((offset, request)),
            Err(e) => halted = Some(e.to_string()),
        }
    }
    Ok(RequestDump {
        obfuscated: buffer.obfuscated,
        handles: buffer.handles,
        requests,
        halted,
    })
}

/// Decode a response buffer, comparing against `count` when given
///
/// # Errors
///
/// Returns an error on framing errors or a cut-off response body.
pub fn decode_response(bytes: &[u8], count: Option<usize>) -> anyhow::Result<ResponseDump> {
    let decoded = DecodedResponses::decode(bytes, count.unwrap_or(0))?;
    let count_mismatch = count.and_then(|_| decoded.count_mismatch());
    Ok(ResponseDump {
        count_mismatch,
        responses: decoded.responses,
        handles: decoded.handles,
        backoff: decoded.backoff,
        buffer_too_small: decoded.buffer_too_small,
        halted: decoded.format_error.map(|e| e.to_string()),
    })
}

/// Print a request dump as text
pub fn print_request(dump: &RequestDump) {
    println!(
        "Request buffer: {} ROP(s), {} handle slot(s){}",
        dump.requests.len(),
        dump.handles.len(),
        if dump.obfuscated { ", obfuscated" } else { "" }
    );
    for (i, (offset, request)) in dump.requests.iter().enumerate() {
        println!(
            "  [{i}] @{offset:<4} {} logon={} {:?}",
            style(request.payload.rop_id().name()).cyan(),
            request.logon_id,
            request.handles
        );
        println!("        {:?}", request.payload);
    }
    if let Some(reason) = &dump.halted {
        println!("  {} {}", style("halted:").red(), reason);
    }
    print_handles(&dump.handles);
}

/// Print a response dump as text
pub fn print_response(dump: &ResponseDump) {
    println!("Response buffer: {} ROP(s)", dump.responses.len());
    for (i, response) in dump.responses.iter().enumerate() {
        let status = if response.return_value.is_success() {
            style(response.return_value.to_string()).green()
        } else {
            style(response.return_value.to_string()).red()
        };
        println!(
            "  [{i}] {} index={} {}",
            style(response.rop_id.name()).cyan(),
            response.handle_index,
            status
        );
        if let Some(handle) = response.bound_handle {
            println!("        bound handle {:#010X}", handle.as_u32());
        }
        println!("        {:?}", response.body);
    }
    if let Some(backoff) = &dump.backoff {
        println!(
            "  {} logon={} {} ms",
            style("RopBackoff").yellow(),
            backoff.logon_id,
            backoff.duration_ms
        );
    }
    if let Some(too_small) = &dump.buffer_too_small {
        println!(
            "  {} needs {} bytes, {} request byte(s) unprocessed",
            style("RopBufferTooSmall").yellow(),
            too_small.size_needed,
            too_small.request_buffers.len()
        );
    }
    if let Some((expected, received)) = dump.count_mismatch {
        println!(
            "  {} expected {expected} response(s), received {received}",
            style("count mismatch:").red()
        );
    }
    if let Some(reason) = &dump.halted {
        println!("  {} {}", style("halted:").red(), reason);
    }
    print_handles(&dump.handles);
}

fn print_handles(handles: &[u32]) {
    let rendered: Vec<String> = handles.iter().map(|h| format!("{h:08X}")).collect();
    println!("  handles: [{}]", rendered.join(" "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ropwire_core::buffer::{HeaderFlags, encode_responses, frame};
    use ropwire_core::rop::{HandleIndices, RequestPayload, ResponseBody};
    use ropwire_core::wire::Writer;
    use ropwire_core::{ReturnValue, RopId, ShortTermId};

    fn open_folder() -> RopRequest {
        RopRequest::new(0, HandleIndices::InputOutput { input: 0, output: 1 }, RequestPayload::OpenFolder {
            folder_id: ShortTermId::from_u64(0x0100_0000_0000_0001),
            open_mode: 0,
        })
    }

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(parse_hex("0x00ff").unwrap(), vec![0x00, 0xFF]);
        assert_eq!(parse_hex("de ad\nbe ef").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(parse_hex("abc").is_err());
    }

    #[test]
    fn test_request_dump_stops_at_reserved_rop() {
        let mut w = Writer::new();
        open_folder().encode(&mut w).unwrap();
        w.u8(0x00);
        let bytes = frame(&w.into_bytes(), &[0x11, 0xFFFF_FFFF], HeaderFlags::last()).unwrap();

        let dump = decode_request(&bytes).unwrap();
        assert_eq!(dump.requests.len(), 1);
        assert_eq!(dump.requests[0].0, 0);
        assert_eq!(dump.handles, vec![0x11, 0xFFFF_FFFF]);
        assert!(dump.halted.is_some());
    }

    #[test]
    fn test_response_dump_reports_count_mismatch() {
        let response = RopResponse {
            rop_id: RopId::OpenFolder,
            handle_index: 1,
            return_value: ReturnValue::SUCCESS,
            body: ResponseBody::OpenFolder {
                has_rules: false,
                is_ghosted: false,
            },
            bound_handle: None,
        };
        let bytes = encode_responses(&[response], &[0x10, 0x20], false).unwrap();

        let dump = decode_response(&bytes, Some(2)).unwrap();
        assert_eq!(dump.responses.len(), 1);
        assert_eq!(dump.count_mismatch, Some((2, 1)));
        assert_eq!(dump.responses[0].bound_handle.map(|h| h.as_u32()), Some(0x20));

        let json = serde_json::to_value(&dump).unwrap();
        assert_eq!(json["responses"].as_array().map(Vec::len), Some(1));

        assert_eq!(decode_response(&bytes, None).unwrap().count_mismatch, None);
    }

    #[test]
    fn test_response_dump_halts_at_cut_off_response() {
        let mut w = Writer::new();
        RopResponse::success(RopId::SubmitMessage, 0, ResponseBody::Empty)
            .encode(&mut w)
            .unwrap();
        w.u8(RopId::OpenFolder.as_u8());
        let bytes = frame(&w.into_bytes(), &[], HeaderFlags::last()).unwrap();

        let dump = decode_response(&bytes, Some(2)).unwrap();
        assert_eq!(dump.responses.len(), 1);
        assert_eq!(dump.count_mismatch, Some((2, 1)));
        assert!(dump.halted.is_some());
    }
}
