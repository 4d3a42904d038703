//! Predecessor change lists.
//!
//! A PCL records, per replica, the newest change that contributed to an
//! object. It behaves like a version vector: one list dominates another
//! when it has seen every change the other has.

use std::collections::BTreeMap;

use ropwire_core::ids::{ReplicaGuid, Xid};
use ropwire_core::wire::{Reader, Writer};
use serde::Serialize;

use crate::error::FxError;

/// Newest change key per replica
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PredecessorChangeList {
    entries: BTreeMap<ReplicaGuid, Xid>,
}

impl PredecessorChangeList {
    /// Empty list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// List built from change keys, keeping the newest per replica
    pub fn from_xids(xids: impl IntoIterator<Item = Xid>) -> Self {
        let mut pcl = Self::new();
        for xid in xids {
            pcl.add(xid);
        }
        pcl
    }

    /// Number of replicas
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no change is recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a change; older changes from the same replica are subsumed
    pub fn add(&mut self, xid: Xid) {
        self.entries
            .entry(xid.guid)
            .and_modify(|e| {
                if xid.counter > e.counter {
                    *e = xid;
                }
            })
            .or_insert(xid);
    }

    /// Newest counter recorded for `guid`
    #[must_use]
    pub fn get(&self, guid: &ReplicaGuid) -> Option<u64> {
        self.entries.get(guid).map(|x| x.counter)
    }

    /// Entries in replica order
    pub fn iter(&self) -> impl Iterator<Item = &Xid> {
        self.entries.values()
    }

    /// True when `xid` is at or below what this list has seen
    #[must_use]
    pub fn includes(&self, xid: &Xid) -> bool {
        self.get(&xid.guid).is_some_and(|c| c >= xid.counter)
    }

    /// True when this list has seen every change `other` has
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        other.iter().all(|x| self.includes(x))
    }

    /// True when this list dominates `other` and has seen at least one
    /// change `other` has not
    #[must_use]
    pub fn strictly_dominates(&self, other: &Self) -> bool {
        self.dominates(other) && !other.dominates(self)
    }

    /// Wire form: each entry is a size byte followed by the XID
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        for xid in self.entries.values() {
            // XIDs are at most 24 bytes
            w.u8(xid.size() as u8).bytes(&xid.to_bytes());
        }
        w.into_bytes()
    }

    /// Parse the wire form
    ///
    /// # Errors
    ///
    /// Fails on a truncated entry or an XID of invalid size.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FxError> {
        let mut r = Reader::new(bytes);
        let mut pcl = Self::new();
        while !r.is_empty() {
            let size = usize::from(r.u8()?);
            pcl.add(Xid::from_bytes(r.bytes(size)?)?);
        }
        Ok(pcl)
    }
}
