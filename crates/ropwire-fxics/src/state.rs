//! ICS synchronization state.
//!
//! State is a handful of IDSETs the client hands back on the next sync
//! so the server only sends what changed. It travels as meta-properties
//! between IncrSyncStateBegin and IncrSyncStateEnd, and can be uploaded
//! in chunks with the UploadStateStream ROPs.

use ropwire_core::{PropertyTag, PropertyValue, TaggedValue};
use serde::Serialize;

use crate::error::FxError;
use crate::idset::IdSet;
use crate::marker::{Marker, meta};
use crate::stream::{FxElement, FxWriter};

/// Same property id as MetaTagIdsetGiven, typed as binary
const IDSET_GIVEN_BINARY: PropertyTag = PropertyTag(0x4017_0102);

/// One of the four state properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StateProperty {
    /// Object ids the client has
    IdsetGiven,
    /// Change numbers of normal content the client has seen
    CnsetSeen,
    /// Change numbers of associated content the client has seen
    CnsetSeenFai,
    /// Read-state change numbers the client has seen
    CnsetRead,
}

impl StateProperty {
    /// Every state property in stream order
    pub const ALL: [StateProperty; 4] = [
        StateProperty::IdsetGiven,
        StateProperty::CnsetSeen,
        StateProperty::CnsetSeenFai,
        StateProperty::CnsetRead,
    ];

    /// Tag written to streams
    #[must_use]
    pub fn tag(self) -> PropertyTag {
        match self {
            Self::IdsetGiven => meta::IDSET_GIVEN,
            Self::CnsetSeen => meta::CNSET_SEEN,
            Self::CnsetSeenFai => meta::CNSET_SEEN_FAI,
            Self::CnsetRead => meta::CNSET_READ,
        }
    }

    /// Look up a tag, accepting IdsetGiven with either type
    ///
    /// # Errors
    ///
    /// Returns [`FxError::UnknownStateProperty`] for any other tag.
    pub fn from_tag(tag: u32) -> Result<Self, FxError> {
        match PropertyTag(tag) {
            t if t == meta::IDSET_GIVEN || t == IDSET_GIVEN_BINARY => Ok(Self::IdsetGiven),
            t if t == meta::CNSET_SEEN => Ok(Self::CnsetSeen),
            t if t == meta::CNSET_SEEN_FAI => Ok(Self::CnsetSeenFai),
            t if t == meta::CNSET_READ => Ok(Self::CnsetRead),
            _ => Err(FxError::UnknownStateProperty(tag)),
        }
    }

    /// Whether hierarchy synchronization carries this property
    #[must_use]
    pub fn applies_to_hierarchy(self) -> bool {
        matches!(self, Self::IdsetGiven | Self::CnsetSeen)
    }
}

/// State of one synchronization context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncState {
    /// Object ids the client has
    pub idset_given: IdSet,
    /// Change numbers of normal content the client has seen
    pub cnset_seen: IdSet,
    /// Change numbers of associated content the client has seen
    pub cnset_seen_fai: IdSet,
    /// Read-state change numbers the client has seen
    pub cnset_read: IdSet,
}

impl SyncState {
    /// Empty state, meaning "send everything"
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One of the sets
    #[must_use]
    pub fn get(&self, property: StateProperty) -> &IdSet {
        match property {
            StateProperty::IdsetGiven => &self.idset_given,
            StateProperty::CnsetSeen => &self.cnset_seen,
            StateProperty::CnsetSeenFai => &self.cnset_seen_fai,
            StateProperty::CnsetRead => &self.cnset_read,
        }
    }

    /// One of the sets, mutably
    pub fn get_mut(&mut self, property: StateProperty) -> &mut IdSet {
        match property {
            StateProperty::IdsetGiven => &mut self.idset_given,
            StateProperty::CnsetSeen => &mut self.cnset_seen,
            StateProperty::CnsetSeenFai => &mut self.cnset_seen_fai,
            StateProperty::CnsetRead => &mut self.cnset_read,
        }
    }

    /// Properties carried for a contents or hierarchy context
    #[must_use]
    pub fn to_properties(&self, contents: bool) -> Vec<TaggedValue> {
        StateProperty::ALL
            .iter()
            .filter(|p| contents || p.applies_to_hierarchy())
            .map(|&p| TaggedValue {
                tag: p.tag(),
                value: PropertyValue::Binary(self.get(p).to_bytes()),
            })
            .collect()
    }

    /// Append `IncrSyncStateBegin props IncrSyncStateEnd`
    ///
    /// # Errors
    ///
    /// Fails only if a state property cannot be written.
    pub fn write(&self, w: &mut FxWriter, contents: bool) -> Result<(), FxError> {
        w.marker(Marker::IncrSyncStateBegin);
        w.properties(&self.to_properties(contents))?;
        w.marker(Marker::IncrSyncStateEnd);
        Ok(())
    }

    /// Standalone state stream, as returned by GetTransferState
    ///
    /// # Errors
    ///
    /// Fails only if a state property cannot be written.
    pub fn to_stream(&self, contents: bool) -> Result<Vec<u8>, FxError> {
        let mut w = FxWriter::new();
        self.write(&mut w, contents)?;
        Ok(w.into_bytes())
    }

    /// Apply one state property
    ///
    /// # Errors
    ///
    /// Fails for an unknown tag, a non-binary value, or a malformed IDSET.
    pub fn apply_property(&mut self, value: &TaggedValue) -> Result<(), FxError> {
        let property = StateProperty::from_tag(value.tag.0)?;
        let bytes = value.value.as_binary().ok_or(FxError::UnexpectedProperty {
            tag: value.tag.0,
            context: "state",
        })?;
        *self.get_mut(property) = IdSet::from_bytes(bytes)?;
        Ok(())
    }

    /// Parse a state stream
    ///
    /// # Errors
    ///
    /// Fails when the stream is not a single well-formed state block.
    pub fn from_stream(bytes: &[u8]) -> Result<Self, FxError> {
        let elements = crate::stream::parse_all(bytes)?;
        let mut iter = elements.into_iter();
        match iter.next() {
            Some(FxElement::Marker(Marker::IncrSyncStateBegin)) => {}
            Some(FxElement::Marker(m)) => {
                return Err(FxError::UnexpectedMarker {
                    marker: m.as_u32(),
                    context: "state",
                });
            }
            Some(FxElement::Property(tv)) => {
                return Err(FxError::UnexpectedProperty {
                    tag: tv.tag.0,
                    context: "state",
                });
            }
            None => return Err(FxError::Incomplete("state")),
        }
        let mut state = Self::new();
        for element in iter.by_ref() {
            match element {
                FxElement::Property(tv) => state.apply_property(&tv)?,
                FxElement::Marker(Marker::IncrSyncStateEnd) => {
                    if let Some(extra) = iter.next() {
                        return Err(match extra {
                            FxElement::Marker(m) => FxError::UnexpectedMarker {
                                marker: m.as_u32(),
                                context: "after state",
                            },
                            FxElement::Property(tv) => FxError::UnexpectedProperty {
                                tag: tv.tag.0,
                                context: "after state",
                            },
                        });
                    }
                    return Ok(state);
                }
                FxElement::Marker(m) => {
                    return Err(FxError::UnexpectedMarker {
                        marker: m.as_u32(),
                        context: "state",
                    });
                }
            }
        }
        Err(FxError::Incomplete("state"))
    }
}

/// Accumulates one state property uploaded in chunks
#[derive(Debug, Clone)]
pub struct StateUpload {
    property: StateProperty,
    declared_size: u32,
    data: Vec<u8>,
}

impl StateUpload {
    /// Start an upload of `tag`, announced as `declared_size` bytes
    ///
    /// # Errors
    ///
    /// Returns [`FxError::UnknownStateProperty`] for a tag that is not a
    /// state property.
    pub fn begin(tag: u32, declared_size: u32) -> Result<Self, FxError> {
        let property = StateProperty::from_tag(tag)?;
        Ok(Self {
            property,
            declared_size,
            data: Vec::new(),
        })
    }

    /// Property being uploaded
    #[must_use]
    pub fn property(&self) -> StateProperty {
        self.property
    }

    /// Bytes received so far
    #[must_use]
    pub fn received(&self) -> usize {
        self.data.len()
    }

    /// Append a chunk
    pub fn append(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
    }

    /// Decode the accumulated IDSET
    ///
    /// # Errors
    ///
    /// Fails when the bytes are not a well-formed IDSET.
    pub fn end(self) -> Result<(StateProperty, IdSet), FxError> {
        if self.data.len() != self.declared_size as usize {
            tracing::debug!(
                "State upload of {:?}: declared {} bytes, received {}",
                self.property,
                self.declared_size,
                self.data.len()
            );
        }
        let set = IdSet::from_bytes(&self.data)?;
        Ok((self.property, set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ropwire_core::ids::ReplicaGuid;

    fn sample() -> SyncState {
        let mut state = SyncState::new();
        state.idset_given.insert(ReplicaGuid([1; 16]), 5);
        state.cnset_seen.insert(ReplicaGuid([1; 16]), 9);
        state.cnset_read.insert(ReplicaGuid([1; 16]), 11);
        state
    }

    #[test]
    fn test_stream_roundtrip() {
        let state = sample();
        let bytes = state.to_stream(true).unwrap();
        assert_eq!(SyncState::from_stream(&bytes).unwrap(), state);
    }

    #[test]
    fn test_hierarchy_state_omits_content_sets() {
        let props = sample().to_properties(false);
        let tags: Vec<PropertyTag> = props.iter().map(|p| p.tag).collect();
        assert_eq!(tags, vec![meta::IDSET_GIVEN, meta::CNSET_SEEN]);
    }

    #[test]
    fn test_state_stream_requires_begin() {
        let mut w = FxWriter::new();
        w.marker(Marker::IncrSyncStateEnd);
        assert!(SyncState::from_stream(&w.into_bytes()).is_err());
        let mut w = FxWriter::new();
        w.marker(Marker::IncrSyncStateBegin);
        assert_eq!(
            SyncState::from_stream(&w.into_bytes()),
            Err(FxError::Incomplete("state"))
        );
    }

    #[test]
    fn test_upload_in_chunks() {
        let bytes = sample().cnset_seen.to_bytes();
        let mut upload = StateUpload::begin(meta::CNSET_SEEN.0, bytes.len() as u32).unwrap();
        for chunk in bytes.chunks(5) {
            upload.append(chunk);
        }
        assert_eq!(upload.received(), bytes.len());
        let (property, set) = upload.end().unwrap();
        assert_eq!(property, StateProperty::CnsetSeen);
        assert_eq!(set, sample().cnset_seen);
    }

    #[test]
    fn test_upload_unknown_property() {
        assert_eq!(
            StateUpload::begin(0x0037_001F, 0).unwrap_err(),
            FxError::UnknownStateProperty(0x0037_001F)
        );
        assert!(StateUpload::begin(0x4017_0102, 0).is_ok());
    }
}
