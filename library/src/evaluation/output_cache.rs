//! Cached node outputs and pinned (frozen) values.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::model::{PinId, PinValue, Timestamp};

#[derive(Clone, Debug, PartialEq)]
pub struct CachedOutput {
    pub value: PinValue,
    /// Dependency timestamp the value was computed against.
    pub produced_at: Timestamp,
}

/// Output values keyed by `(node, output)`.
#[derive(Default)]
pub(crate) struct OutputCache {
    entries: HashMap<PinId, CachedOutput>,
}

impl OutputCache {
    pub fn get(&self, pin: &PinId) -> Option<&CachedOutput> {
        self.entries.get(pin)
    }

    /// The cached value if it was produced against `stamp` or later.
    pub fn fresh(&self, pin: &PinId, stamp: Timestamp) -> Option<&PinValue> {
        self.entries
            .get(pin)
            .filter(|entry| !entry.produced_at.is_older_than(stamp))
            .map(|entry| &entry.value)
    }

    /// Store a value unless a newer one is already cached.
    pub fn store(&mut self, pin: PinId, value: PinValue, produced_at: Timestamp) {
        match self.entries.get(&pin) {
            Some(existing) if produced_at < existing.produced_at => {}
            _ => {
                self.entries.insert(pin, CachedOutput { value, produced_at });
            }
        }
    }

    pub fn remove_node(&mut self, node_id: Uuid) {
        self.entries.retain(|pin, _| pin.node_id != node_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Values pinned by a freeze.
#[derive(Clone, Debug)]
pub(crate) struct FrozenOutputs {
    pub values: BTreeMap<String, PinValue>,
    pub frozen_at: Timestamp,
}
