//! IDSET: global counters grouped by replica.

use std::collections::BTreeMap;

use ropwire_core::ids::{LongTermId, ReplicaGuid, ShortTermId, Xid};
use ropwire_core::wire::{Reader, Writer};
use serde::Serialize;

use crate::error::FxError;
use crate::globset::GlobSet;

/// Sequence of (replica GUID, GLOBSET) pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdSet {
    sets: BTreeMap<ReplicaGuid, GlobSet>,
}

impl IdSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no replica has any counter
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.values().all(GlobSet::is_empty)
    }

    /// Total number of counters across replicas
    #[must_use]
    pub fn len(&self) -> u64 {
        self.sets.values().map(GlobSet::len).sum()
    }

    /// Add a counter under `guid`
    pub fn insert(&mut self, guid: ReplicaGuid, counter: u64) {
        self.sets.entry(guid).or_default().insert(counter);
    }

    /// Add a long-term id
    pub fn insert_long_term(&mut self, id: LongTermId) {
        self.insert(id.guid, id.counter.value());
    }

    /// Add a change key
    pub fn insert_xid(&mut self, xid: Xid) {
        self.insert(xid.guid, xid.counter);
    }

    /// Remove a counter under `guid`
    pub fn remove(&mut self, guid: ReplicaGuid, counter: u64) {
        if let Some(set) = self.sets.get_mut(&guid) {
            set.remove(counter);
            if set.is_empty() {
                self.sets.remove(&guid);
            }
        }
    }

    /// Membership test
    #[must_use]
    pub fn contains(&self, guid: ReplicaGuid, counter: u64) -> bool {
        self.sets.get(&guid).is_some_and(|s| s.contains(counter))
    }

    /// Membership test for a long-term id
    #[must_use]
    pub fn contains_long_term(&self, id: LongTermId) -> bool {
        self.contains(id.guid, id.counter.value())
    }

    /// Membership test for a short-term id whose replica maps to `guid`
    #[must_use]
    pub fn contains_short_term(&self, guid: ReplicaGuid, id: ShortTermId) -> bool {
        self.contains(guid, id.counter().value())
    }

    /// Counters recorded for one replica
    #[must_use]
    pub fn get(&self, guid: &ReplicaGuid) -> Option<&GlobSet> {
        self.sets.get(guid)
    }

    /// Replicas and their counters
    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaGuid, &GlobSet)> {
        self.sets.iter()
    }

    /// Add everything in `other`
    pub fn union(&mut self, other: &IdSet) {
        for (guid, set) in &other.sets {
            self.sets.entry(*guid).or_default().union(set);
        }
    }

    /// Append the wire form
    pub fn encode(&self, w: &mut Writer) {
        for (guid, set) in &self.sets {
            if set.is_empty() {
                continue;
            }
            w.bytes(guid.as_bytes());
            set.encode(w);
        }
    }

    /// Wire form
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Decode a set that occupies the whole input
    ///
    /// # Errors
    ///
    /// Fails on a truncated GUID or a malformed GLOBSET.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FxError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::new();
        while !r.is_empty() {
            let guid = ReplicaGuid(r.array()?);
            let set = GlobSet::decode(&mut r)?;
            out.sets.entry(guid).or_default().union(&set);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ropwire_core::ids::GlobalCounter;

    fn guid(b: u8) -> ReplicaGuid {
        ReplicaGuid([b; 16])
    }

    #[test]
    fn test_insert_and_contains() {
        let mut set = IdSet::new();
        set.insert(guid(1), 10);
        set.insert_long_term(LongTermId::new(guid(2), GlobalCounter::truncating(7)));
        assert!(set.contains(guid(1), 10));
        assert!(set.contains(guid(2), 7));
        assert!(!set.contains(guid(2), 10));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_wire_form() {
        let mut set = IdSet::new();
        set.insert(guid(0xAB), 0x0102);
        let bytes = set.to_bytes();
        assert_eq!(&bytes[..16], &[0xAB; 16]);
        assert_eq!(&bytes[16..], &[0x06, 0, 0, 0, 0, 0x01, 0x02, 0x00]);
        assert_eq!(IdSet::from_bytes(&bytes).unwrap(), set);
    }

    #[test]
    fn test_remove_drops_empty_replica() {
        let mut set = IdSet::new();
        set.insert(guid(3), 1);
        set.remove(guid(3), 1);
        assert!(set.is_empty());
        assert!(set.to_bytes().is_empty());
    }

    #[test]
    fn test_truncated_guid_fails() {
        assert!(IdSet::from_bytes(&[1, 2, 3]).is_err());
    }
}
