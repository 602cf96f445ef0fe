use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use vertex_core::Payload;

/// Identity of one memoized invocation: algorithm id plus the SHA-256 of
/// the serialized input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoKey {
    algorithm: String,
    digest: [u8; 32],
}

impl MemoKey {
    pub fn new(algorithm: &str, input: &Payload) -> Self {
        // serde_json writes object keys in map order, which is sorted, so
        // equal payloads always hash equally.
        let bytes = serde_json::to_vec(input).unwrap_or_default();
        Self {
            algorithm: algorithm.to_string(),
            digest: Sha256::digest(&bytes).into(),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }
}

/// Hit/miss counters of the result memo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoStats {
    pub capacity: usize,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Bounded map from invocation to output. When full, the oldest tenth of
/// the entries is dropped in insertion order.
#[derive(Debug)]
pub struct ResultMemo {
    capacity: usize,
    entries: HashMap<MemoKey, Payload>,
    order: VecDeque<MemoKey>,
    hits: u64,
    misses: u64,
}

impl ResultMemo {
    /// A capacity of zero disables memoization.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn get(&mut self, key: &MemoKey) -> Option<Payload> {
        match self.entries.get(key) {
            Some(output) => {
                self.hits += 1;
                Some(output.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: MemoKey, output: Payload) {
        if !self.is_enabled() {
            return;
        }
        if self.entries.contains_key(&key) {
            self.entries.insert(key, output);
            return;
        }
        if self.entries.len() >= self.capacity {
            let batch = (self.capacity / 10).max(1);
            for _ in 0..batch {
                match self.order.pop_front() {
                    Some(old) => {
                        self.entries.remove(&old);
                    }
                    None => break,
                }
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, output);
    }

    /// Drop every entry produced by `algorithm`.
    pub fn invalidate(&mut self, algorithm: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.algorithm != algorithm);
        self.order.retain(|k| k.algorithm != algorithm);
        before - self.entries.len()
    }

    pub fn stats(&self) -> MemoStats {
        let lookups = self.hits + self.misses;
        MemoStats {
            capacity: self.capacity,
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }
}
