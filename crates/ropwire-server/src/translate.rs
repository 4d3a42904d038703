//! Short-term / long-term identifier translation.
//!
//! A store knows a small table of replicas. Its own replica is always
//! replica id 1; replicas first seen in imported long-term ids get the
//! next free replica id. One global counter mints both object ids and
//! change numbers, so a counter value is never handed out twice.

use ropwire_core::ids::GLOBAL_COUNTER_MAX;
use ropwire_core::{GlobalCounter, LongTermId, ReplicaGuid, ShortTermId};

use crate::error::{Result, ServerError};

/// Replica id of the store's own replica
pub const LOCAL_REPLICA_ID: u16 = 1;

/// First counter value handed out
const FIRST_COUNTER: u64 = 1;

/// Replica table plus the store's counter allocator
#[derive(Debug, Clone)]
pub struct IdTranslator {
    /// Replica GUIDs indexed by `replica_id - 1`
    replicas: Vec<ReplicaGuid>,
    next_counter: u64,
}

impl IdTranslator {
    /// Translator for a store whose own replica is `local`
    #[must_use]
    pub fn new(local: ReplicaGuid) -> Self {
        Self {
            replicas: vec![local],
            next_counter: FIRST_COUNTER,
        }
    }

    /// The store's own replica GUID
    #[must_use]
    pub fn local_guid(&self) -> ReplicaGuid {
        self.replicas[0]
    }

    /// Replica id of `guid`, if known
    #[must_use]
    pub fn replica_id(&self, guid: &ReplicaGuid) -> Option<u16> {
        self.replicas
            .iter()
            .position(|g| g == guid)
            .and_then(|i| u16::try_from(i + 1).ok())
    }

    /// Replica GUID of `replica_id`, if known
    #[must_use]
    pub fn replica_guid(&self, replica_id: u16) -> Option<ReplicaGuid> {
        usize::from(replica_id)
            .checked_sub(1)
            .and_then(|i| self.replicas.get(i).copied())
    }

    /// Replica id of `guid`, registering it when new
    ///
    /// # Errors
    ///
    /// Fails when the 16-bit replica id space is full.
    pub fn register(&mut self, guid: ReplicaGuid) -> Result<u16> {
        if let Some(id) = self.replica_id(&guid) {
            return Ok(id);
        }
        let id = u16::try_from(self.replicas.len() + 1).map_err(|_| ServerError::CountersExhausted)?;
        tracing::debug!("Registered replica {} as {}", guid, id);
        self.replicas.push(guid);
        Ok(id)
    }

    /// Next counter value, consumed
    ///
    /// # Errors
    ///
    /// Fails once the 48-bit counter space is exhausted.
    pub fn allocate(&mut self) -> Result<GlobalCounter> {
        let (_, base) = self.reserve(1)?;
        Ok(base)
    }

    /// New object id in the local replica
    ///
    /// # Errors
    ///
    /// See [`Self::allocate`].
    pub fn allocate_id(&mut self) -> Result<ShortTermId> {
        Ok(ShortTermId::new(LOCAL_REPLICA_ID, self.allocate()?))
    }

    /// Reserve `count` contiguous counters for the caller
    ///
    /// # Errors
    ///
    /// Fails for a zero count or when the range would run past the
    /// counter space.
    pub fn reserve_local_ids(&mut self, count: u32) -> Result<(ReplicaGuid, GlobalCounter)> {
        if count == 0 {
            return Err(ServerError::InvalidParameter("IdCount"));
        }
        self.reserve(u64::from(count))
    }

    fn reserve(&mut self, count: u64) -> Result<(ReplicaGuid, GlobalCounter)> {
        let end = self
            .next_counter
            .checked_add(count)
            .filter(|&end| end - 1 <= GLOBAL_COUNTER_MAX)
            .ok_or(ServerError::CountersExhausted)?;
        let base = GlobalCounter::truncating(self.next_counter);
        self.next_counter = end;
        Ok((self.local_guid(), base))
    }

    /// True when `counter` was handed out by this store
    #[must_use]
    pub fn is_allocated(&self, counter: GlobalCounter) -> bool {
        (FIRST_COUNTER..self.next_counter).contains(&counter.value())
    }

    /// Long-term form of `id`
    ///
    /// # Errors
    ///
    /// Fails when the replica id is unknown.
    pub fn to_long_term(&self, id: ShortTermId) -> Result<LongTermId> {
        let guid = self
            .replica_guid(id.replica_id())
            .ok_or(ServerError::UnknownReplica)?;
        Ok(LongTermId::new(guid, id.counter()))
    }

    /// Short-term form of `id` without registering new replicas
    ///
    /// # Errors
    ///
    /// Fails when the replica GUID is unknown.
    pub fn to_short_term(&self, id: LongTermId) -> Result<ShortTermId> {
        let replica_id = self.replica_id(&id.guid).ok_or(ServerError::UnknownReplica)?;
        Ok(ShortTermId::new(replica_id, id.counter))
    }

    /// Short-term form of `id`, registering a foreign replica
    ///
    /// # Errors
    ///
    /// See [`Self::register`].
    pub fn import(&mut self, id: LongTermId) -> Result<ShortTermId> {
        let replica_id = self.register(id.guid)?;
        Ok(ShortTermId::new(replica_id, id.counter))
    }
}
