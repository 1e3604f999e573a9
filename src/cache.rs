//! Bounded decision cache.
//!
//! Maps a request-tuple fingerprint to its boolean decision with LRU
//! eviction. The cache is owned by a single enforcer, never shared across
//! instances, and invalidated wholesale on any policy, grouping or model
//! mutation. Recency is tracked with a generation counter and a lazy
//! queue: stale queue entries are skipped during eviction instead of being
//! removed eagerly on every hit.

use std::collections::{HashMap, VecDeque};

use xxhash_rust::xxh3::Xxh3;

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct DecisionCache {
    capacity: usize,
    entries: HashMap<u64, (bool, u64)>,
    queue: VecDeque<(u64, u64)>,
    tick: u64,
}

impl DecisionCache {
    pub fn new(capacity: usize) -> Self {
        DecisionCache {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            queue: VecDeque::new(),
            tick: 0,
        }
    }

    /// Fingerprint of a request tuple. Field boundaries are kept distinct
    /// so `["ab","c"]` and `["a","bc"]` hash differently.
    pub fn fingerprint<S: AsRef<str>>(request: &[S]) -> u64 {
        use std::hash::Hasher;
        let mut h = Xxh3::new();
        for field in request {
            let bytes = field.as_ref().as_bytes();
            h.write(&(bytes.len() as u64).to_le_bytes());
            h.write(bytes);
        }
        h.finish()
    }

    pub fn get(&mut self, key: u64) -> Option<bool> {
        let (decision, gen) = self.entries.get_mut(&key)?;
        self.tick += 1;
        *gen = self.tick;
        let out = *decision;
        self.queue.push_back((key, self.tick));
        // repeated hits leave stale queue entries behind; rebuild once the
        // queue outgrows the live set by a wide margin
        if self.queue.len() > self.capacity.saturating_mul(8).max(64) {
            self.compact();
        }
        Some(out)
    }

    fn compact(&mut self) {
        let mut live: Vec<(u64, u64)> = self.entries.iter().map(|(k, (_, g))| (*k, *g)).collect();
        live.sort_by_key(|(_, g)| *g);
        self.queue = live.into_iter().collect();
    }

    pub fn insert(&mut self, key: u64, decision: bool) {
        self.tick += 1;
        self.entries.insert(key, (decision, self.tick));
        self.queue.push_back((key, self.tick));
        self.evict();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            let Some((key, gen)) = self.queue.pop_front() else { break };
            match self.entries.get(&key) {
                // only the newest queue entry for a key is live
                Some((_, live)) if *live == gen => {
                    self.entries.remove(&key);
                }
                _ => {}
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
