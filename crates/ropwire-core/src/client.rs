//! Blocking exchange driver.
//!
//! The [`Client`] owns the session's [`HandleTable`], encodes an ordered
//! list of requests into one buffer, hands it to a [`Transport`], and
//! applies the responses back to the table in declaration order.

use std::ops::Range;
use std::time::Duration;

use serde::Serialize;

use crate::buffer::{self, BufferTooSmall, DecodedResponses};
use crate::error::{ClientError, CodecError, TransportError};
use crate::handle::HandleTable;
use crate::rop::{RopRequest, RopResponse};
use crate::rop_id::RopId;
use crate::{DEFAULT_MAX_BUFFER_SIZE, MAX_HANDLE_SLOTS};

/// Carries one encoded request buffer to a server and returns its reply
pub trait Transport {
    /// Send `request` and return the response buffer, which must not
    /// exceed `max_response` bytes
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the exchange could not complete.
    fn exchange(&mut self, request: &[u8], max_response: usize) -> Result<Vec<u8>, TransportError>;
}

/// Client-side limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Largest request buffer the server accepts
    pub max_request_size: usize,
    /// Largest response buffer the client will accept
    pub max_response_size: usize,
    /// Retries after a Backoff response before giving up
    pub max_backoff_retries: u32,
    /// Upper bound on any single backoff pause
    pub backoff_cap: Duration,
    /// Obfuscate request payloads with XorMagic
    pub obfuscate: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_request_size: DEFAULT_MAX_BUFFER_SIZE,
            max_response_size: DEFAULT_MAX_BUFFER_SIZE,
            max_backoff_retries: 3,
            backoff_cap: Duration::from_millis(500),
            obfuscate: false,
        }
    }
}

/// Result of one exchange
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeOutcome {
    /// Responses in request order (Release has none)
    pub responses: Vec<RopResponse>,
    /// Responses that were expected
    pub expected: usize,
    /// Backoff responses absorbed before this outcome
    pub backoff_retries: u32,
    /// Set when the server stopped early for lack of response space
    pub buffer_too_small: Option<BufferTooSmall>,
    /// Set when a response could not be decoded; later ones are missing
    #[serde(skip)]
    pub format_error: Option<CodecError>,
}

impl ExchangeOutcome {
    /// Fewer responses than expected came back
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.responses.len() < self.expected
    }

    /// Error unless every expected response arrived
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Codec`] when a response could not be
    /// decoded, or [`ClientError::Truncated`] on a short response stream.
    pub fn require_complete(&self) -> Result<(), ClientError> {
        if let Some(e) = &self.format_error {
            return Err(ClientError::Codec(e.clone()));
        }
        if self.is_truncated() {
            return Err(ClientError::Truncated {
                expected: self.expected,
                received: self.responses.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotOwner {
    logon_id: u8,
    is_logon: bool,
}

/// Session client over a [`Transport`]
#[derive(Debug)]
pub struct Client<T> {
    transport: T,
    config: ClientConfig,
    handles: HandleTable,
    owners: Vec<Option<SlotOwner>>,
}

impl<T: Transport> Client<T> {
    /// Client with default limits
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Client with explicit limits
    pub fn with_config(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            handles: HandleTable::new(),
            owners: vec![None; MAX_HANDLE_SLOTS],
        }
    }

    /// Current handle table
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// Active configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the client, returning the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Execute `requests` as one multiplexed buffer
    ///
    /// A per-ROP failure is not an error: it is a response with a
    /// non-zero return value. Errors are reserved for malformed bytes,
    /// transport failures and exhausted backoff retries.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::RequestTooLarge`] when the encoded buffer
    /// exceeds the negotiated size and [`ClientError::Busy`] when the
    /// server is still backing off after the configured retries.
    pub fn execute(&mut self, requests: &[RopRequest]) -> Result<ExchangeOutcome, ClientError> {
        let min_len = requests
            .iter()
            .map(|r| usize::from(r.handles.max_index()) + 1)
            .max()
            .unwrap_or(0);
        let wire_table = self.handles.to_wire(min_len);
        let bytes = buffer::encode_requests(requests, &wire_table, usize::MAX, self.config.obfuscate)?;
        if bytes.len() > self.config.max_request_size {
            return Err(ClientError::RequestTooLarge {
                size: bytes.len(),
                max: self.config.max_request_size,
            });
        }
        let expected = requests.iter().filter(|r| r.rop_id().has_response()).count();

        let mut retries = 0;
        let decoded = loop {
            let reply = self.transport.exchange(&bytes, self.config.max_response_size)?;
            let decoded = DecodedResponses::decode(&reply, expected)?;
            match &decoded.backoff {
                Some(backoff) => {
                    retries += 1;
                    if retries > self.config.max_backoff_retries {
                        return Err(ClientError::Busy { attempts: retries });
                    }
                    let pause = Duration::from_millis(u64::from(backoff.duration_ms))
                        .min(self.config.backoff_cap);
                    tracing::debug!("Server busy, retry {} after {:?}", retries, pause);
                    std::thread::sleep(pause);
                }
                None => break decoded,
            }
        };

        self.apply(requests, &decoded);
        Ok(ExchangeOutcome {
            responses: decoded.responses,
            expected,
            backoff_retries: retries,
            buffer_too_small: decoded.buffer_too_small,
            format_error: decoded.format_error,
        })
    }

    /// Execute `requests` in as many buffers as the negotiated size needs,
    /// stopping at the first truncated exchange
    ///
    /// # Errors
    ///
    /// Fails as [`Client::execute`] does, or with
    /// [`ClientError::RequestTooLarge`] when one request alone cannot fit.
    pub fn execute_batched(
        &mut self,
        requests: &[RopRequest],
    ) -> Result<Vec<ExchangeOutcome>, ClientError> {
        let slots = requests
            .iter()
            .map(|r| usize::from(r.handles.max_index()) + 1)
            .max()
            .unwrap_or(0)
            .max(self.handles.len());
        let batches: Vec<Range<usize>> =
            buffer::plan_batches(requests, slots, self.config.max_request_size).map_err(|e| match e {
                CodecError::BufferTooLarge { size, max } => ClientError::RequestTooLarge { size, max },
                other => ClientError::Codec(other),
            })?;

        let mut outcomes = Vec::with_capacity(batches.len());
        for range in batches {
            let outcome = self.execute(&requests[range])?;
            let stop = outcome.is_truncated();
            outcomes.push(outcome);
            if stop {
                break;
            }
        }
        Ok(outcomes)
    }

    fn apply(&mut self, requests: &[RopRequest], decoded: &DecodedResponses) {
        let mut responses = decoded.responses.iter();
        for request in requests {
            let rop_id = request.rop_id();
            if rop_id == RopId::Release {
                if let Some(index) = request.handles.input() {
                    self.release_slot(index);
                }
                continue;
            }
            let Some(response) = responses.next() else {
                break;
            };
            if response.rop_id != rop_id {
                tracing::warn!(
                    "Response {} does not match request {}",
                    response.rop_id.name(),
                    rop_id.name()
                );
                break;
            }
            let (Some(output), Some(handle)) = (request.handles.output(), response.bound_handle)
            else {
                continue;
            };
            match self.handles.bind(output, handle) {
                Ok(()) => {
                    self.owners[usize::from(output)] = Some(SlotOwner {
                        logon_id: request.logon_id,
                        is_logon: rop_id == RopId::Logon,
                    });
                }
                Err(e) => tracing::warn!("Cannot bind {:?} at index {}: {}", handle, output, e),
            }
        }
    }

    fn release_slot(&mut self, index: u8) {
        if let Err(e) = self.handles.release(index) {
            tracing::warn!("Release of index {}: {}", index, e);
            return;
        }
        let Some(owner) = self.owners[usize::from(index)].take() else {
            return;
        };
        if !owner.is_logon {
            return;
        }
        // Every object opened under the logon dies with it
        for i in 0..self.owners.len() {
            if self.owners[i].is_some_and(|o| o.logon_id == owner.logon_id) {
                self.owners[i] = None;
                let _ = self.handles.release(i as u8);
            }
        }
        tracing::info!("Logon {} released", owner.logon_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Backoff, RequestBuffer, encode_responses, frame, HeaderFlags};
    use crate::handle::ServerObjectHandle;
    use crate::ids::ShortTermId;
    use crate::return_value::ReturnValue;
    use crate::rop::{HandleIndices, RequestPayload, ResponseBody};
    use crate::wire::Writer;
    use crate::NULL_HANDLE;

    /// Answers every request with canned buffers, recording what it saw
    struct Scripted {
        replies: Vec<Vec<u8>>,
        seen: Vec<Vec<u8>>,
    }

    impl Transport for Scripted {
        fn exchange(&mut self, request: &[u8], _max: usize) -> Result<Vec<u8>, TransportError> {
            self.seen.push(request.to_vec());
            if self.replies.is_empty() {
                return Err(TransportError::Closed("script exhausted".into()));
            }
            Ok(self.replies.remove(0))
        }
    }

    fn logon_request() -> RopRequest {
        RopRequest::new(0, HandleIndices::Output(0), RequestPayload::Logon {
            logon_flags: 1,
            open_flags: 0,
            store_state: 0,
            essdn: "/o=org/cn=user".into(),
        })
    }

    fn open_folder(input: u8, output: u8) -> RopRequest {
        RopRequest::new(0, HandleIndices::InputOutput { input, output }, RequestPayload::OpenFolder {
            folder_id: ShortTermId::from_u64(0x0100_0000_0000_0001),
            open_mode: 0,
        })
    }

    fn opened(index: u8) -> RopResponse {
        RopResponse::success(RopId::OpenFolder, index, ResponseBody::OpenFolder {
            has_rules: false,
            is_ghosted: false,
        })
    }

    fn backoff_reply() -> Vec<u8> {
        let mut w = Writer::new();
        Backoff {
            logon_id: 0,
            duration_ms: 1,
            rops: vec![],
            additional_data: vec![],
        }
        .encode(&mut w)
        .unwrap();
        frame(&w.into_bytes(), &[], HeaderFlags::last()).unwrap()
    }

    fn client_with_folder() -> Client<Scripted> {
        let reply = encode_responses(&[opened(1)], &[NULL_HANDLE, 0x20], false).unwrap();
        let mut client = Client::new(Scripted {
            replies: vec![reply],
            seen: vec![],
        });
        client.handles.bind(0, ServerObjectHandle(0x10)).unwrap();
        client.owners[0] = Some(SlotOwner {
            logon_id: 0,
            is_logon: true,
        });
        client.execute(&[open_folder(0, 1)]).unwrap();
        client
    }

    #[test]
    fn test_execute_binds_outputs_in_order() {
        let reply = encode_responses(&[opened(1), opened(2)], &[0x10, 0x20, 0x30], false).unwrap();
        let mut client = Client::new(Scripted {
            replies: vec![reply],
            seen: vec![],
        });
        client.handles.bind(0, ServerObjectHandle(0x10)).unwrap();

        let outcome = client.execute(&[open_folder(0, 1), open_folder(1, 2)]).unwrap();
        assert_eq!(outcome.responses.len(), 2);
        assert!(outcome.require_complete().is_ok());
        assert_eq!(client.handles().resolve(1), Ok(ServerObjectHandle(0x20)));
        assert_eq!(client.handles().resolve(2), Ok(ServerObjectHandle(0x30)));

        let sent = RequestBuffer::parse(&client.transport.seen[0]).unwrap();
        assert_eq!(sent.handles, vec![0x10, NULL_HANDLE, NULL_HANDLE]);
    }

    #[test]
    fn test_release_has_no_response_slot() {
        let mut client = client_with_folder();
        let reply = encode_responses(&[opened(2)], &[0x10, NULL_HANDLE, 0x30], false).unwrap();
        client.transport.replies.push(reply);
        let release = RopRequest::new(0, HandleIndices::Input(1), RequestPayload::Release);

        let outcome = client.execute(&[release, open_folder(0, 2)]).unwrap();
        assert_eq!(outcome.expected, 1);
        assert_eq!(client.handles().resolve(2), Ok(ServerObjectHandle(0x30)));
        assert!(client.handles().resolve(1).is_err());
    }

    #[test]
    fn test_release_logon_drops_owned_handles() {
        let mut client = client_with_folder();
        client
            .transport
            .replies
            .push(frame(&[], &[], HeaderFlags::last()).unwrap());
        let release = RopRequest::new(0, HandleIndices::Input(0), RequestPayload::Release);
        client.execute(&[release]).unwrap();
        assert_eq!(client.handles().bound_count(), 0);
    }

    #[test]
    fn test_failed_open_leaves_slot_unbound() {
        let reply = encode_responses(
            &[RopResponse::failure(RopId::OpenFolder, 1, ReturnValue::NULL_OBJECT)],
            &[NULL_HANDLE, NULL_HANDLE],
            false,
        )
        .unwrap();
        let mut client = Client::new(Scripted {
            replies: vec![reply],
            seen: vec![],
        });
        let outcome = client.execute(&[open_folder(0, 1)]).unwrap();
        assert_eq!(outcome.responses[0].return_value, ReturnValue::NULL_OBJECT);
        assert!(client.handles().resolve(1).is_err());
    }

    #[test]
    fn test_backoff_is_retried_then_succeeds() {
        let ok = encode_responses(&[opened(1)], &[0x10, 0x20], false).unwrap();
        let mut client = Client::new(Scripted {
            replies: vec![backoff_reply(), ok],
            seen: vec![],
        });
        let outcome = client.execute(&[open_folder(0, 1)]).unwrap();
        assert_eq!(outcome.backoff_retries, 1);
        assert_eq!(client.transport.seen.len(), 2);
        assert_eq!(client.transport.seen[0], client.transport.seen[1]);
    }

    #[test]
    fn test_backoff_exhaustion_is_busy() {
        let config = ClientConfig {
            max_backoff_retries: 2,
            ..ClientConfig::default()
        };
        let mut client = Client::with_config(
            Scripted {
                replies: vec![backoff_reply(), backoff_reply(), backoff_reply()],
                seen: vec![],
            },
            config,
        );
        let err = client.execute(&[open_folder(0, 1)]).unwrap_err();
        assert!(matches!(err, ClientError::Busy { attempts: 3 }));
    }

    #[test]
    fn test_truncated_outcome() {
        let reply = encode_responses(&[opened(1)], &[0x10, 0x20], false).unwrap();
        let mut client = Client::new(Scripted {
            replies: vec![reply],
            seen: vec![],
        });
        let outcome = client
            .execute(&[open_folder(0, 1), open_folder(1, 2), open_folder(2, 3)])
            .unwrap();
        assert!(outcome.is_truncated());
        assert!(matches!(
            outcome.require_complete(),
            Err(ClientError::Truncated {
                expected: 3,
                received: 1
            })
        ));
    }

    #[test]
    fn test_undecodable_response_keeps_earlier_ones() {
        let mut w = Writer::new();
        opened(1).encode(&mut w).unwrap();
        w.u8(RopId::OpenFolder.as_u8());
        let reply = frame(&w.into_bytes(), &[0x10, 0x20, NULL_HANDLE], HeaderFlags::last()).unwrap();
        let mut client = Client::new(Scripted {
            replies: vec![reply],
            seen: vec![],
        });
        let outcome = client.execute(&[open_folder(0, 1), open_folder(1, 2)]).unwrap();
        assert_eq!(outcome.responses.len(), 1);
        assert!(outcome.is_truncated());
        assert_eq!(client.handles().resolve(1), Ok(ServerObjectHandle(0x20)));
        assert!(matches!(outcome.require_complete(), Err(ClientError::Codec(_))));
    }

    #[test]
    fn test_request_too_large() {
        let config = ClientConfig {
            max_request_size: 32,
            ..ClientConfig::default()
        };
        let mut client = Client::with_config(
            Scripted {
                replies: vec![],
                seen: vec![],
            },
            config,
        );
        let err = client.execute(&[logon_request(), open_folder(0, 1)]).unwrap_err();
        assert!(matches!(err, ClientError::RequestTooLarge { max: 32, .. }));
    }

    #[test]
    fn test_execute_batched_splits() {
        let config = ClientConfig {
            max_request_size: 8 + 2 + 8 + 13 * 2,
            ..ClientConfig::default()
        };
        let reply = || encode_responses(&[opened(1), opened(1)], &[0x10, 0x20], false).unwrap();
        let mut client = Client::with_config(
            Scripted {
                replies: vec![reply(), reply()],
                seen: vec![],
            },
            config,
        );
        let requests = vec![open_folder(0, 1); 4];
        let outcomes = client.execute_batched(&requests).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(client.transport.seen.len(), 2);
    }
}
