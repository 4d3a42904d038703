//! Server object handles and the per-session handle table.
//!
//! ROPs never carry server object handles directly. They carry one-byte
//! indices into a table that travels at the end of each request and
//! response buffer. The client owns the table for the lifetime of its
//! session; the server fills in output slots and returns it.

use serde::{Deserialize, Serialize};

use crate::error::HandleError;
use crate::{MAX_HANDLE_SLOTS, NULL_HANDLE};

/// Opaque server-side object reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerObjectHandle(pub u32);

impl ServerObjectHandle {
    /// Value of an unused wire slot
    pub const NULL: Self = Self(NULL_HANDLE);

    /// Raw value
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// True for the unused-slot sentinel
    #[must_use]
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

/// Slot arena mapping handle indices to server object handles
#[derive(Debug, Clone)]
pub struct HandleTable {
    slots: Vec<Slot>,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Bound(ServerObjectHandle),
    Released,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    /// Table with the protocol's 255 addressable slots
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_HANDLE_SLOTS)
    }

    /// Table limited to `capacity` slots (at most 255)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity: capacity.min(MAX_HANDLE_SLOTS),
        }
    }

    /// Number of slots currently materialized, bound or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no slot was ever materialized
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of bound slots
    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Bound(_)))
            .count()
    }

    /// Lowest index that holds no handle
    #[must_use]
    pub fn next_free(&self) -> Option<u8> {
        let index = self
            .slots
            .iter()
            .position(|s| !matches!(s, Slot::Bound(_)))
            .unwrap_or(self.slots.len());
        if index < self.capacity {
            u8::try_from(index).ok()
        } else {
            None
        }
    }

    /// Place `handle` in the lowest free slot and return its index
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::TableFull`] when every slot is bound.
    pub fn allocate(&mut self, handle: ServerObjectHandle) -> Result<u8, HandleError> {
        let index = self.next_free().ok_or(HandleError::TableFull)?;
        self.bind(index, handle)?;
        Ok(index)
    }

    /// Bind `handle` at a specific index, replacing whatever was there
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::OutOfRange`] when `index` exceeds the capacity.
    pub fn bind(&mut self, index: u8, handle: ServerObjectHandle) -> Result<(), HandleError> {
        let i = usize::from(index);
        if i >= self.capacity {
            return Err(HandleError::OutOfRange(index));
        }
        if self.slots.len() <= i {
            self.slots.resize(i + 1, Slot::Free);
        }
        if let Slot::Bound(previous) = self.slots[i] {
            tracing::debug!("Handle index {} rebound: {:?} -> {:?}", index, previous, handle);
        }
        self.slots[i] = Slot::Bound(handle);
        Ok(())
    }

    /// Look up the handle at `index`
    ///
    /// # Errors
    ///
    /// Fails when the index is beyond the table, was never assigned, or
    /// has been released.
    pub fn resolve(&self, index: u8) -> Result<ServerObjectHandle, HandleError> {
        match self.slots.get(usize::from(index)) {
            None if usize::from(index) >= self.capacity => Err(HandleError::OutOfRange(index)),
            Some(Slot::Bound(handle)) => Ok(*handle),
            _ => Err(HandleError::Unassigned(index)),
        }
    }

    /// Release the handle at `index`
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::DoubleRelease`] when the slot was already
    /// released, or [`HandleError::Unassigned`] when it never held a handle.
    pub fn release(&mut self, index: u8) -> Result<ServerObjectHandle, HandleError> {
        let slot = self
            .slots
            .get_mut(usize::from(index))
            .ok_or(HandleError::Unassigned(index))?;
        match *slot {
            Slot::Bound(handle) => {
                *slot = Slot::Released;
                Ok(handle)
            }
            Slot::Released => Err(HandleError::DoubleRelease(index)),
            Slot::Free => Err(HandleError::Unassigned(index)),
        }
    }

    /// Drop every binding
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Wire form covering at least `min_len` slots; unbound slots carry
    /// the null sentinel
    #[must_use]
    pub fn to_wire(&self, min_len: usize) -> Vec<u32> {
        let len = self.slots.len().max(min_len).min(self.capacity);
        (0..len)
            .map(|i| match self.slots.get(i) {
                Some(Slot::Bound(handle)) => handle.0,
                _ => NULL_HANDLE,
            })
            .collect()
    }

    /// Rebuild a table from its wire form
    #[must_use]
    pub fn from_wire(values: &[u32]) -> Self {
        let mut table = Self::new();
        table.slots = values
            .iter()
            .take(MAX_HANDLE_SLOTS)
            .map(|&v| {
                if v == NULL_HANDLE {
                    Slot::Free
                } else {
                    Slot::Bound(ServerObjectHandle(v))
                }
            })
            .collect();
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_lowest_free() {
        let mut table = HandleTable::new();
        assert_eq!(table.allocate(ServerObjectHandle(10)).unwrap(), 0);
        assert_eq!(table.allocate(ServerObjectHandle(11)).unwrap(), 1);
        assert_eq!(table.allocate(ServerObjectHandle(12)).unwrap(), 2);
        table.release(1).unwrap();
        assert_eq!(table.allocate(ServerObjectHandle(13)).unwrap(), 1);
        assert_eq!(table.resolve(1).unwrap(), ServerObjectHandle(13));
    }

    #[test]
    fn test_resolve_failures() {
        let mut table = HandleTable::with_capacity(4);
        assert_eq!(table.resolve(0), Err(HandleError::Unassigned(0)));
        assert_eq!(table.resolve(9), Err(HandleError::OutOfRange(9)));
        table.bind(2, ServerObjectHandle(5)).unwrap();
        assert_eq!(table.resolve(1), Err(HandleError::Unassigned(1)));
        table.release(2).unwrap();
        assert_eq!(table.resolve(2), Err(HandleError::Unassigned(2)));
    }

    #[test]
    fn test_double_release_is_error() {
        let mut table = HandleTable::new();
        let index = table.allocate(ServerObjectHandle(1)).unwrap();
        assert_eq!(table.release(index).unwrap(), ServerObjectHandle(1));
        assert_eq!(table.release(index), Err(HandleError::DoubleRelease(index)));
        assert_eq!(table.release(40), Err(HandleError::Unassigned(40)));
    }

    #[test]
    fn test_table_full() {
        let mut table = HandleTable::with_capacity(2);
        table.allocate(ServerObjectHandle(1)).unwrap();
        table.allocate(ServerObjectHandle(2)).unwrap();
        assert_eq!(
            table.allocate(ServerObjectHandle(3)),
            Err(HandleError::TableFull)
        );
        assert_eq!(
            table.bind(2, ServerObjectHandle(3)),
            Err(HandleError::OutOfRange(2))
        );
    }

    #[test]
    fn test_wire_form() {
        let mut table = HandleTable::new();
        table.bind(0, ServerObjectHandle(7)).unwrap();
        table.bind(2, ServerObjectHandle(9)).unwrap();
        assert_eq!(table.to_wire(0), vec![7, NULL_HANDLE, 9]);
        assert_eq!(table.to_wire(4), vec![7, NULL_HANDLE, 9, NULL_HANDLE]);

        let rebuilt = HandleTable::from_wire(&[7, NULL_HANDLE, 9]);
        assert_eq!(rebuilt.resolve(0).unwrap(), ServerObjectHandle(7));
        assert!(rebuilt.resolve(1).is_err());
        assert_eq!(rebuilt.resolve(2).unwrap(), ServerObjectHandle(9));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// The wire form carries every bound slot and nothing else
            #[test]
            fn wire_form_keeps_bindings(bound in prop::collection::btree_map(0u8..64, 1u32..0xFFFF_0000, 0..32)) {
                let mut table = HandleTable::new();
                for (&index, &handle) in &bound {
                    table.bind(index, ServerObjectHandle(handle)).unwrap();
                }
                let wire = table.to_wire(0);
                let rebuilt = HandleTable::from_wire(&wire);

                prop_assert_eq!(rebuilt.bound_count(), bound.len());
                for index in 0..wire.len() as u8 {
                    match bound.get(&index) {
                        Some(&handle) => prop_assert_eq!(rebuilt.resolve(index), Ok(ServerObjectHandle(handle))),
                        None => prop_assert!(rebuilt.resolve(index).is_err()),
                    }
                }
            }
        }
    }
}
