use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::{IdMint, ReservationStore, StoreError};

/// Process-local store. Also the materialized state behind [`super::JournalStore`].
pub struct InMemoryStore {
    confirmed: DashMap<Ulid, Stay>,
    pending: DashMap<Ulid, Stay>,
    blocked: DashMap<Ulid, BlockedRange>,
    ids: IdMint,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            confirmed: DashMap::new(),
            pending: DashMap::new(),
            blocked: DashMap::new(),
            ids: IdMint::new(),
        }
    }

    // ── Snapshots (sorted by id, i.e. creation order) ──────────

    pub fn confirmed(&self) -> Vec<Stay> {
        sorted_values(&self.confirmed)
    }

    pub fn pending(&self) -> Vec<Stay> {
        sorted_values(&self.pending)
    }

    pub fn blocked(&self) -> Vec<BlockedRange> {
        sorted_values(&self.blocked)
    }

    pub fn contains_pending(&self, id: &Ulid) -> bool {
        self.pending.contains_key(id)
    }

    pub fn contains_confirmed(&self, id: &Ulid) -> bool {
        self.confirmed.contains_key(id)
    }

    pub fn contains_blocked(&self, id: &Ulid) -> bool {
        self.blocked.contains_key(id)
    }

    // ── Event application ──────────────────────────────────────

    /// Apply one journal record. Removals of unknown ids are no-ops.
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::RequestSubmitted { stay } => {
                self.pending.insert(stay.id, stay.clone());
            }
            Event::RequestRemoved { id } => {
                self.pending.remove(id);
            }
            Event::BookingConfirmed { stay } => {
                self.confirmed.insert(stay.id, stay.clone());
            }
            Event::BookingRemoved { id } => {
                self.confirmed.remove(id);
            }
            Event::RangeBlocked { range } => {
                self.blocked.insert(range.id, range.clone());
            }
            Event::RangeUnblocked { id } => {
                self.blocked.remove(id);
            }
        }
    }

    /// Minimal event list that recreates the current state.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.confirmed.len() + self.pending.len() + self.blocked.len(),
        );
        events.extend(self.confirmed().into_iter().map(|stay| Event::BookingConfirmed { stay }));
        events.extend(self.pending().into_iter().map(|stay| Event::RequestSubmitted { stay }));
        events.extend(self.blocked().into_iter().map(|range| Event::RangeBlocked { range }));
        events
    }
}

fn sorted_values<T: Clone>(map: &DashMap<Ulid, T>) -> Vec<T> {
    let mut entries: Vec<(Ulid, T)> = map
        .iter()
        .map(|e| (*e.key(), e.value().clone()))
        .collect();
    entries.sort_by_key(|(id, _)| *id);
    entries.into_iter().map(|(_, v)| v).collect()
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    fn next_id(&self) -> Ulid {
        self.ids.next()
    }

    async fn list_confirmed(&self) -> Result<Vec<Stay>, StoreError> {
        Ok(self.confirmed())
    }

    async fn list_pending(&self) -> Result<Vec<Stay>, StoreError> {
        Ok(self.pending())
    }

    async fn list_blocked(&self) -> Result<Vec<BlockedRange>, StoreError> {
        Ok(self.blocked())
    }

    async fn append_confirmed(&self, stay: Stay) -> Result<(), StoreError> {
        self.apply_event(&Event::BookingConfirmed { stay });
        Ok(())
    }

    async fn append_pending(&self, stay: Stay) -> Result<(), StoreError> {
        self.apply_event(&Event::RequestSubmitted { stay });
        Ok(())
    }

    async fn append_blocked(&self, range: BlockedRange) -> Result<(), StoreError> {
        self.apply_event(&Event::RangeBlocked { range });
        Ok(())
    }

    async fn remove_pending(&self, id: Ulid) -> Result<bool, StoreError> {
        Ok(self.pending.remove(&id).is_some())
    }

    async fn remove_confirmed(&self, id: Ulid) -> Result<bool, StoreError> {
        Ok(self.confirmed.remove(&id).is_some())
    }

    async fn remove_blocked(&self, id: Ulid) -> Result<bool, StoreError> {
        Ok(self.blocked.remove(&id).is_some())
    }
}
