//! Property-based tests for ropwire
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Handle Table Properties
// ============================================================================

mod handle_properties {
    use super::*;
    use ropwire_core::{HandleTable, ServerObjectHandle};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone)]
    enum Op {
        Allocate,
        Release(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Allocate), any::<usize>().prop_map(Op::Release)]
    }

    proptest! {
        /// Allocate returns a slot resolving to that handle; release ends it
        #[test]
        fn allocate_release_sequences(ops in prop::collection::vec(op(), 1..200)) {
            let mut table = HandleTable::new();
            let mut live: BTreeMap<u8, ServerObjectHandle> = BTreeMap::new();
            let mut released = Vec::new();
            let mut next = 1u32;

            for op in ops {
                match op {
                    Op::Allocate => {
                        let handle = ServerObjectHandle(next);
                        next += 1;
                        let index = table.allocate(handle).unwrap();
                        prop_assert_eq!(table.resolve(index), Ok(handle));
                        prop_assert!(live.insert(index, handle).is_none());
                        released.retain(|&r| r != index);
                    }
                    Op::Release(pick) if !live.is_empty() => {
                        let index = *live.keys().nth(pick % live.len()).unwrap();
                        let handle = live.remove(&index).unwrap();
                        prop_assert_eq!(table.release(index), Ok(handle));
                        prop_assert!(table.resolve(index).is_err());
                        prop_assert!(table.release(index).is_err());
                        released.push(index);
                    }
                    Op::Release(_) => {}
                }
            }

            prop_assert_eq!(table.bound_count(), live.len());
            for (&index, &handle) in &live {
                prop_assert_eq!(table.resolve(index), Ok(handle));
            }
            for &index in &released {
                prop_assert!(table.resolve(index).is_err());
            }
        }
    }
}

// ============================================================================
// Buffer Codec Properties
// ============================================================================

mod truncation_properties {
    use super::*;
    use ropwire_core::buffer::encode_responses;
    use ropwire_core::rop::{HandleIndices, RequestPayload, ResponseBody};
    use ropwire_core::{DecodedResponses, ReturnValue, RopId, RopRequest, RopResponse};
    use ropwire_integration_tests::{logon, server};

    fn reserve() -> RopRequest {
        RopRequest::new(0, HandleIndices::Input(0), RequestPayload::GetLocalReplicaIds { id_count: 1 })
    }

    fn undecodable() -> RopRequest {
        RopRequest::new(0, HandleIndices::InputOutput { input: 0, output: 1 }, RequestPayload::Raw {
            rop_id: RopId::GetHierarchyTable,
            body: vec![0x00],
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// A server that stops at ROP k answers exactly k responses
        #[test]
        fn server_halt_yields_k_responses(k in 1usize..12, after in 0usize..4) {
            let server = server();
            let mut client = server.connect();
            let mut requests = vec![logon(0, 0)];
            requests.extend((1..k).map(|_| reserve()));
            requests.push(undecodable());
            requests.extend((0..after).map(|_| reserve()));

            let outcome = client.execute(&requests).unwrap();
            prop_assert_eq!(outcome.responses.len(), k);
            prop_assert_eq!(outcome.expected, k + 1 + after);
            prop_assert!(outcome.is_truncated());
            prop_assert!(outcome.responses.iter().all(|r| r.return_value.is_success()));
        }

        /// Decoding never invents responses the buffer does not carry
        #[test]
        fn decode_counts_what_is_present(present in 0usize..20, missing in 0usize..5) {
            let responses: Vec<RopResponse> = (0..present)
                .map(|i| RopResponse::success(RopId::SetProperties, i as u8, ResponseBody::PropertyProblems {
                    problems: Vec::new(),
                }))
                .collect();
            let bytes = encode_responses(&responses, &[0x01], false).unwrap();

            let decoded = DecodedResponses::decode(&bytes, present + missing).unwrap();
            prop_assert_eq!(decoded.responses.len(), present);
            prop_assert_eq!(decoded.is_truncated(), missing > 0);
            let expected_mismatch = (missing > 0).then_some((present + missing, present));
            prop_assert_eq!(decoded.count_mismatch(), expected_mismatch);
            prop_assert!(decoded.responses.iter().all(|r| r.return_value == ReturnValue::SUCCESS));
        }
    }
}

// ============================================================================
// Identifier Properties
// ============================================================================

mod id_properties {
    use super::*;
    use ropwire_core::rop::{HandleIndices, RequestPayload, ResponseBody};
    use ropwire_core::{GlobalCounter, LongTermId, ReplicaGuid, RopRequest};
    use ropwire_integration_tests::{inbox, log_on, open_folder, saved_message, server, subject};
    use ropwire_server::IdTranslator;

    proptest! {
        /// Short-term ids survive a trip through their long-term form
        #[test]
        fn translation_round_trips(
            local in any::<[u8; 16]>(),
            foreign in prop::collection::vec(any::<[u8; 16]>(), 0..6),
            counters in prop::collection::vec(1u64..(1 << 48), 1..40),
            allocations in 1usize..40,
        ) {
            let mut translator = IdTranslator::new(ReplicaGuid(local));
            for _ in 0..allocations {
                let id = translator.allocate_id().unwrap();
                let long = translator.to_long_term(id).unwrap();
                prop_assert_eq!(long.guid, ReplicaGuid(local));
                prop_assert_eq!(translator.to_short_term(long).unwrap(), id);
            }
            for (i, counter) in counters.into_iter().enumerate() {
                let guid = foreign.get(i % foreign.len().max(1)).copied().unwrap_or(local);
                let long = LongTermId::new(ReplicaGuid(guid), GlobalCounter::truncating(counter));
                let short = translator.import(long).unwrap();
                prop_assert_eq!(translator.to_long_term(short).unwrap(), long);
                prop_assert_eq!(translator.to_short_term(long).unwrap(), short);
            }
        }

        /// Ids of deleted messages no longer translate; live ones still do
        #[test]
        fn tombstoned_ids_fail_translation(deleted in prop::collection::vec(any::<bool>(), 1..6)) {
            let server = server();
            let mut client = server.connect();
            let folders = log_on(&mut client);
            let ids: Vec<_> = deleted
                .iter()
                .enumerate()
                .map(|(i, _)| saved_message(&mut client, inbox(&folders), 1 + i as u8, vec![subject("x")]))
                .collect();
            let doomed: Vec<_> = ids.iter().zip(&deleted).filter(|(_, d)| **d).map(|(id, _)| *id).collect();

            let folder_slot = 1 + ids.len() as u8;
            let mut requests = vec![
                open_folder(0, folder_slot, inbox(&folders)),
                RopRequest::new(0, HandleIndices::Input(folder_slot), RequestPayload::HardDeleteMessages {
                    want_asynchronous: false,
                    notify_non_read: false,
                    message_ids: doomed,
                }),
            ];
            requests.extend(ids.iter().map(|&object_id| {
                RopRequest::new(0, HandleIndices::Input(0), RequestPayload::LongTermIdFromId { object_id })
            }));
            let outcome = client.execute(&requests).unwrap();
            prop_assert_eq!(outcome.responses.len(), requests.len());

            for (response, gone) in outcome.responses[2..].iter().zip(&deleted) {
                prop_assert_eq!(response.return_value.is_success(), !gone);
                prop_assert_eq!(matches!(response.body, ResponseBody::LongTermIdFromId { .. }), !gone);
            }
        }
    }
}

// ============================================================================
// FastTransfer Properties
// ============================================================================

mod fast_transfer_properties {
    use super::*;
    use ropwire_core::property::tags;
    use ropwire_core::rop::TransferStatus;
    use ropwire_core::{BUFFER_SIZE_SERVER_CHOICE, PropertyTag, PropertyValue, TaggedValue};
    use ropwire_fxics::content::assemble_all;
    use ropwire_fxics::{DestinationContext, FxObject, MessageContent, ObjectKind, SourceContext, SourceOperation};

    const ENTRY_ID: PropertyTag = PropertyTag(0x0FFF_0102);

    fn message() -> impl Strategy<Value = MessageContent> {
        (
            "[a-zA-Z0-9 ]{0,40}",
            "[a-zA-Z0-9 .,]{0,600}",
            prop::collection::vec(any::<u8>(), 0..300),
            any::<i32>(),
            prop::collection::vec("[a-z]{1,12}", 0..3),
        )
            .prop_map(|(subject, body, entry_id, importance, recipients)| MessageContent {
                properties: vec![
                    TaggedValue::new(tags::SUBJECT, PropertyValue::Unicode(subject)),
                    TaggedValue::new(tags::BODY, PropertyValue::Unicode(body)),
                    TaggedValue::new(ENTRY_ID, PropertyValue::Binary(entry_id)),
                    TaggedValue::new(tags::IMPORTANCE, PropertyValue::Integer32(importance)),
                ],
                recipients: recipients
                    .into_iter()
                    .map(|name| vec![TaggedValue::new(tags::DISPLAY_NAME, PropertyValue::Unicode(name))])
                    .collect(),
                ..MessageContent::default()
            })
    }

    /// Pull every chunk with a server-chosen size capped at `maximum`
    fn drain(source: &mut SourceContext, maximum: u16) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        loop {
            let chunk = source.get_buffer(BUFFER_SIZE_SERVER_CHOICE, maximum, 0x1000);
            chunks.push(chunk.data);
            if chunk.status == TransferStatus::Done {
                return chunks;
            }
        }
    }

    proptest! {
        /// No chunk exceeds MaximumBufferSize and the chunks rebuild the stream
        #[test]
        fn chunks_respect_maximum(content in message(), maximum in 1u16..512) {
            let object = FxObject::Message(content);
            let (stream, _) = object.encode().unwrap();
            let mut source = SourceContext::new(&object).unwrap();

            let chunks = drain(&mut source, maximum);
            prop_assert!(chunks.iter().all(|c| c.len() <= usize::from(maximum)));
            prop_assert_eq!(chunks.concat(), stream);
            prop_assert!(source.is_done());
        }

        /// A destination assembles the same items however the stream is split
        #[test]
        fn destination_accepts_any_rechunking(
            content in message(),
            splits in prop::collection::vec(1usize..97, 1..64),
        ) {
            let object = FxObject::Message(content);
            let (stream, _) = object.encode().unwrap();
            let whole = assemble_all(ObjectKind::Message, &stream).unwrap();

            let mut destination = DestinationContext::new(SourceOperation::CopyTo, ObjectKind::Message);
            let mut items = Vec::new();
            let mut rest = stream.as_slice();
            let mut sizes = splits.iter().cycle();
            while !rest.is_empty() {
                let take = sizes.next().copied().unwrap_or(1).min(rest.len());
                let (piece, tail) = rest.split_at(take);
                items.extend(destination.put_buffer(piece).unwrap());
                rest = tail;
            }

            prop_assert!(destination.is_complete());
            prop_assert_eq!(items, whole);
        }
    }
}

// ============================================================================
// Predecessor Change List Properties
// ============================================================================

mod pcl_properties {
    use super::*;
    use ropwire_core::{GlobalCounter, ReplicaGuid, Xid};
    use ropwire_fxics::PredecessorChangeList;

    fn xid() -> impl Strategy<Value = Xid> {
        (0u8..6, 1u64..1_000_000).prop_map(|(replica, counter)| {
            Xid::new(ReplicaGuid([replica; 16]), GlobalCounter::truncating(counter))
        })
    }

    proptest! {
        /// Extending recorded history with a newer change strictly dominates it
        #[test]
        fn extension_strictly_dominates(
            recorded in prop::collection::vec(xid(), 0..8),
            replica in 0u8..8,
            bump in 1u64..1000,
        ) {
            let recorded = PredecessorChangeList::from_xids(recorded);
            let guid = ReplicaGuid([replica; 16]);
            let counter = recorded.get(&guid).unwrap_or(0) + bump;

            let mut incoming = recorded.clone();
            incoming.add(Xid::new(guid, GlobalCounter::truncating(counter)));
            prop_assert!(incoming.strictly_dominates(&recorded));
            prop_assert!(incoming.dominates(&recorded));
            prop_assert!(!recorded.dominates(&incoming));
        }

        /// Dropping any recorded replica's entry loses domination
        #[test]
        fn missing_entry_does_not_dominate(
            recorded in prop::collection::vec(xid(), 1..8),
            newer in xid(),
            pick in any::<usize>(),
        ) {
            let recorded = PredecessorChangeList::from_xids(recorded);
            let entries: Vec<Xid> = recorded.iter().copied().collect();
            let dropped = entries[pick % entries.len()];

            let mut incoming = PredecessorChangeList::from_xids(
                entries.iter().copied().filter(|x| x.guid != dropped.guid),
            );
            if newer.guid != dropped.guid {
                incoming.add(newer);
            }
            prop_assert!(!incoming.dominates(&recorded));
            prop_assert!(!incoming.strictly_dominates(&recorded));
        }
    }
}
