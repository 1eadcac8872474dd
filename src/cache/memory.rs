//! In-memory tier
//!
//! A map bounded by the estimated serialized size of its entries. When room is
//! needed the oldest fifth of the entries is dropped at a time, where "oldest"
//! is decided by the configured [`EvictionPolicy`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::entry::CacheEntry;

/// Fraction of entries dropped per eviction round
const EVICTION_FRACTION: f64 = 0.2;

/// How the memory tier picks victims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Oldest write timestamp first. Reads do not refresh an entry.
    #[default]
    WriteTime,
    /// Least recently read or written first
    LastAccess,
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry<JsonValue>,
    size: usize,
    /// Insertion order, breaks timestamp ties
    seq: u64,
    /// Logical clock of the last read or write
    touched: u64,
}

/// Outcome of a memory lookup
#[derive(Debug, PartialEq)]
pub enum Lookup {
    Hit(JsonValue),
    /// Found but past its TTL; already removed
    Expired,
    Missing,
}

/// Estimated footprint of an entry: serialized length at two bytes per char
pub fn estimate_size(entry: &CacheEntry<JsonValue>) -> usize {
    serde_json::to_string(entry)
        .map(|s| s.chars().count() * 2)
        .unwrap_or(0)
}

#[derive(Debug)]
pub struct MemoryTier {
    slots: HashMap<String, Slot>,
    total_size: usize,
    max_size: usize,
    clock: u64,
    policy: EvictionPolicy,
}

impl MemoryTier {
    pub fn new(max_size: usize, policy: EvictionPolicy) -> Self {
        Self {
            slots: HashMap::new(),
            total_size: 0,
            max_size,
            clock: 0,
            policy,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Estimated bytes held
    pub fn size(&self) -> usize {
        self.total_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn has_room(&self) -> bool {
        self.total_size < self.max_size
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn get(&mut self, key: &str, now: i64) -> Lookup {
        let valid = match self.slots.get(key) {
            Some(slot) => slot.entry.is_valid_at(now),
            None => return Lookup::Missing,
        };

        if !valid {
            self.remove(key);
            return Lookup::Expired;
        }

        let tick = self.tick();
        match self.slots.get_mut(key) {
            Some(slot) => {
                slot.touched = tick;
                Lookup::Hit(slot.entry.data.clone())
            }
            None => Lookup::Missing,
        }
    }

    /// Insert an entry, evicting until it fits.
    ///
    /// Returns false when the entry alone is larger than the tier; it is not
    /// stored in that case.
    pub fn insert(&mut self, key: &str, entry: CacheEntry<JsonValue>) -> bool {
        let size = estimate_size(&entry);
        if size > self.max_size {
            self.remove(key);
            return false;
        }

        // Replacing a key frees its old footprint first
        self.remove(key);
        while self.total_size + size > self.max_size && !self.slots.is_empty() {
            self.evict_oldest();
        }

        let tick = self.tick();
        self.total_size += size;
        self.slots.insert(
            key.to_string(),
            Slot {
                entry,
                size,
                seq: tick,
                touched: tick,
            },
        );
        true
    }

    /// Insert only if the tier is currently under its cap
    pub fn promote(&mut self, key: &str, entry: CacheEntry<JsonValue>) -> bool {
        if !self.has_room() {
            return false;
        }
        self.insert(key, entry)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                self.total_size = self.total_size.saturating_sub(slot.size);
                true
            }
            None => false,
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&mut self, now: i64) -> usize {
        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| !slot.entry.is_valid_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Drop the oldest 20% of entries (at least one), returning how many went
    pub fn evict_oldest(&mut self) -> usize {
        if self.slots.is_empty() {
            return 0;
        }

        let mut order: Vec<(&String, (i64, u64))> = self
            .slots
            .iter()
            .map(|(key, slot)| {
                let rank = match self.policy {
                    EvictionPolicy::WriteTime => (slot.entry.timestamp, slot.seq),
                    EvictionPolicy::LastAccess => (0, slot.touched),
                };
                (key, rank)
            })
            .collect();
        order.sort_by_key(|(_, rank)| *rank);

        let count = ((order.len() as f64 * EVICTION_FRACTION).floor() as usize).max(1);
        let victims: Vec<String> = order
            .into_iter()
            .take(count)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &victims {
            self.remove(key);
        }
        victims.len()
    }

    pub fn is_over_cap(&self) -> bool {
        self.total_size > self.max_size
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.total_size = 0;
    }
}
