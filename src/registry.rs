//! In-memory table of active alarms.
//!
//! Pure bookkeeping: tearing down what an entry owns (timer, playback,
//! deferred work) is up to whoever removes it. The number of entries is also
//! the keep-alive reference count.

use std::collections::{BTreeSet, HashMap};

use crate::alarm::{AlarmId, AlarmState};

#[derive(Debug, Default)]
pub struct AlarmRegistry {
    entries: HashMap<AlarmId, AlarmState>,
}

impl AlarmRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry previously stored under `id`, if any.
    pub fn insert(&mut self, id: AlarmId, state: AlarmState) -> Option<AlarmState> {
        self.entries.insert(id, state)
    }

    #[must_use]
    pub fn get(&self, id: AlarmId) -> Option<&AlarmState> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: AlarmId) -> Option<&mut AlarmState> {
        self.entries.get_mut(&id)
    }

    /// Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: AlarmId) -> Option<AlarmState> {
        self.entries.remove(&id)
    }

    #[must_use]
    pub fn contains(&self, id: AlarmId) -> bool {
        self.entries.contains_key(&id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn ids(&self) -> BTreeSet<AlarmId> {
        self.entries.keys().copied().collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &AlarmState> {
        self.entries.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut AlarmState> {
        self.entries.values_mut()
    }
}
