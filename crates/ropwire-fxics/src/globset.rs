//! GLOBSET: compressed sets of 48-bit global counters.
//!
//! The wire form is a small command language over a byte stack. Push
//! commands (1 to 6 bytes) extend a shared big-endian prefix; a push
//! that completes six bytes names a single counter instead. Range
//! gives low and high suffixes under the current prefix, Bitmask names
//! up to nine counters sharing a five-byte prefix, Pop drops the last
//! push and End terminates the set.

use ropwire_core::ids::GLOBAL_COUNTER_MAX;
use ropwire_core::wire::{Reader, Writer};
use serde::Serialize;

use crate::error::FxError;

const CMD_END: u8 = 0x00;
const CMD_BITMASK: u8 = 0x42;
const CMD_POP: u8 = 0x50;
const CMD_RANGE: u8 = 0x52;

const COUNTER_BYTES: usize = 6;

/// Set of global counters held as sorted, disjoint, non-adjacent
/// inclusive ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct GlobSet {
    ranges: Vec<(u64, u64)>,
}

impl GlobSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set holding every value of an iterator
    pub fn from_values(values: impl IntoIterator<Item = u64>) -> Self {
        let mut set = Self::new();
        for value in values {
            set.insert(value);
        }
        set
    }

    /// True when nothing is in the set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of counters in the set
    #[must_use]
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|(lo, hi)| hi - lo + 1).sum()
    }

    /// Ranges in ascending order
    #[must_use]
    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }

    /// Every counter in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|&(lo, hi)| lo..=hi)
    }

    /// Largest counter
    #[must_use]
    pub fn max(&self) -> Option<u64> {
        self.ranges.last().map(|&(_, hi)| hi)
    }

    /// Membership test
    #[must_use]
    pub fn contains(&self, value: u64) -> bool {
        self.ranges
            .binary_search_by(|&(lo, hi)| {
                if hi < value {
                    std::cmp::Ordering::Less
                } else if lo > value {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Add one counter (its low 48 bits)
    pub fn insert(&mut self, value: u64) {
        self.insert_range(value, value);
    }

    /// Add an inclusive range of counters (their low 48 bits)
    pub fn insert_range(&mut self, lo: u64, hi: u64) {
        let (lo, hi) = (lo & GLOBAL_COUNTER_MAX, hi & GLOBAL_COUNTER_MAX);
        if lo > hi {
            return;
        }
        let start = self.ranges.partition_point(|&(_, h)| h.saturating_add(1) < lo);
        let mut end = start;
        let (mut new_lo, mut new_hi) = (lo, hi);
        while end < self.ranges.len() && self.ranges[end].0 <= hi.saturating_add(1) {
            new_lo = new_lo.min(self.ranges[end].0);
            new_hi = new_hi.max(self.ranges[end].1);
            end += 1;
        }
        self.ranges.splice(start..end, [(new_lo, new_hi)]);
    }

    /// Remove one counter
    pub fn remove(&mut self, value: u64) {
        let Some(i) = self.ranges.iter().position(|&(lo, hi)| lo <= value && value <= hi) else {
            return;
        };
        let (lo, hi) = self.ranges[i];
        let mut replacement = Vec::with_capacity(2);
        if lo < value {
            replacement.push((lo, value - 1));
        }
        if value < hi {
            replacement.push((value + 1, hi));
        }
        self.ranges.splice(i..=i, replacement);
    }

    /// Add every counter of `other`
    pub fn union(&mut self, other: &GlobSet) {
        for &(lo, hi) in &other.ranges {
            self.insert_range(lo, hi);
        }
    }

    /// True when every counter of `other` is in this set
    #[must_use]
    pub fn is_superset(&self, other: &GlobSet) -> bool {
        other.ranges.iter().all(|&(lo, hi)| {
            self.ranges
                .iter()
                .any(|&(slo, shi)| slo <= lo && hi <= shi)
        })
    }

    /// Append the command encoding
    pub fn encode(&self, w: &mut Writer) {
        let mut i = 0;
        while i < self.ranges.len() {
            let (lo, hi) = self.ranges[i];
            let prefix = lo >> 8;
            if hi >> 8 != prefix {
                w.u8(CMD_RANGE);
                write_suffix(w, lo, COUNTER_BYTES);
                write_suffix(w, hi, COUNTER_BYTES);
                i += 1;
                continue;
            }
            let mut j = i + 1;
            while j < self.ranges.len() && self.ranges[j].0 >> 8 == prefix && self.ranges[j].1 >> 8 == prefix {
                j += 1;
            }
            if j == i + 1 && lo == hi {
                w.u8(COUNTER_BYTES as u8);
                write_suffix(w, lo, COUNTER_BYTES);
            } else {
                w.u8(5);
                write_suffix(w, prefix, 5);
                encode_low_bytes(w, &self.ranges[i..j]);
                w.u8(CMD_POP);
            }
            i = j;
        }
        w.u8(CMD_END);
    }

    /// Encoded bytes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Decode one set, consuming its End command
    ///
    /// # Errors
    ///
    /// Fails on truncated input, an unknown command, or a command that
    /// does not fit the current stack depth.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, FxError> {
        let mut set = Self::new();
        let mut stack: Vec<Vec<u8>> = Vec::new();
        loop {
            let depth: usize = stack.iter().map(Vec::len).sum();
            match r.u8()? {
                CMD_END => break,
                n @ 1..=6 => {
                    let n = usize::from(n);
                    if depth + n > COUNTER_BYTES {
                        return Err(FxError::InvalidGlobSet("push exceeds six bytes"));
                    }
                    let bytes = r.bytes(n)?.to_vec();
                    if depth + n == COUNTER_BYTES {
                        set.insert(join(&stack, &bytes));
                    } else {
                        stack.push(bytes);
                    }
                }
                CMD_POP => {
                    stack
                        .pop()
                        .ok_or(FxError::InvalidGlobSet("pop on empty stack"))?;
                }
                CMD_BITMASK => {
                    if depth != COUNTER_BYTES - 1 {
                        return Err(FxError::InvalidGlobSet("bitmask needs a five-byte prefix"));
                    }
                    let start = r.u8()?;
                    let mask = r.u8()?;
                    let base = join(&stack, &[]) << 8;
                    set.insert(base | u64::from(start));
                    for bit in 0..8u8 {
                        if mask & (1 << bit) != 0 {
                            let low = u16::from(start) + u16::from(bit) + 1;
                            if low > 0xFF {
                                return Err(FxError::InvalidGlobSet("bitmask overflows its prefix"));
                            }
                            set.insert(base | u64::from(low));
                        }
                    }
                }
                CMD_RANGE => {
                    let n = COUNTER_BYTES - depth;
                    if n == 0 {
                        return Err(FxError::InvalidGlobSet("range with a full stack"));
                    }
                    let lo = join(&stack, r.bytes(n)?);
                    let hi = join(&stack, r.bytes(n)?);
                    if lo > hi {
                        return Err(FxError::InvalidGlobSet("range low above high"));
                    }
                    set.insert_range(lo, hi);
                }
                _ => return Err(FxError::InvalidGlobSet("unknown command")),
            }
        }
        Ok(set)
    }

    /// Decode a set that occupies the whole input
    ///
    /// # Errors
    ///
    /// Fails as [`GlobSet::decode`] does, or when bytes follow the End command.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FxError> {
        let mut r = Reader::new(bytes);
        let set = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(FxError::TrailingData(r.remaining()));
        }
        Ok(set)
    }
}

impl FromIterator<u64> for GlobSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self::from_values(iter)
    }
}

fn write_suffix(w: &mut Writer, value: u64, n: usize) {
    let bytes = value.to_be_bytes();
    w.bytes(&bytes[8 - n..]);
}

fn join(stack: &[Vec<u8>], tail: &[u8]) -> u64 {
    stack
        .iter()
        .flatten()
        .chain(tail)
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Ranges that all share one five-byte prefix, already pushed
fn encode_low_bytes(w: &mut Writer, group: &[(u64, u64)]) {
    let mut k = 0;
    while k < group.len() {
        let start = group[k].0 & 0xFF;
        let mut end = k;
        while end < group.len() && (group[end].1 & 0xFF) <= start + 8 {
            end += 1;
        }
        if end > k + 1 {
            let mut mask = 0u8;
            for &(lo, hi) in &group[k..end] {
                for v in (lo & 0xFF)..=(hi & 0xFF) {
                    if v > start {
                        mask |= 1 << (v - start - 1);
                    }
                }
            }
            w.u8(CMD_BITMASK).u8(start as u8).u8(mask);
            k = end;
            continue;
        }
        let (lo, hi) = group[k];
        if lo == hi {
            w.u8(1).u8(lo as u8);
        } else {
            w.u8(CMD_RANGE).u8(lo as u8).u8(hi as u8);
        }
        k += 1;
    }
}
