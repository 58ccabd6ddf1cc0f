//! Short-lived lookup cache for neuron ids.
//!
//! Only positive hits are stored: a miss is always re-checked against the
//! store, so a neuron ingested after a failed lookup is found on the next
//! attempt. Entries expire after the configured TTL.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::TimedKey;

#[derive(Debug)]
pub struct LookupCache {
    entries: DashMap<TimedKey, (i64, Instant)>,
    ttl: Duration,
}

impl LookupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &TimedKey) -> Option<i64> {
        let hit = self.entries.get(key).map(|entry| *entry.value())?;
        let (id, stored_at) = hit;
        if stored_at.elapsed() < self.ttl {
            return Some(id);
        }
        self.entries.remove(key);
        None
    }

    pub fn insert(&self, key: TimedKey, id: i64) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(key, (id, Instant::now()));
    }

    pub fn invalidate(&self, key: &TimedKey) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
