//! Insert-once key/value store for the slice of the ring a node owns.
use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;

/// Maximum number of stored values before the least recently used are
/// evicted.
pub const MAX_VALUES: usize = 1000;

/// Bounded store mapping application keys to opaque values.
///
/// Ownership of a key follows the ring interval `(predecessor, node]`; the
/// store itself only enforces the insert-once semantics.
#[derive(Debug)]
pub struct Keystore {
    values: LruCache<String, Bytes>,
}

impl Keystore {
    pub fn new() -> Keystore {
        Keystore {
            values: LruCache::new(NonZeroUsize::new(MAX_VALUES).expect("MAX_VALUES is non-zero")),
        }
    }

    /// Stores `value` under `key` unless the key is already present.
    ///
    /// Returns false on duplicates, leaving the stored value untouched;
    /// inserts are idempotent, never updates.
    pub fn insert_new(&mut self, key: String, value: Bytes) -> bool {
        if self.values.contains(&key) {
            return false;
        }

        self.values.put(key, value);
        true
    }

    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        self.values.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for Keystore {
    fn default() -> Self {
        Self::new()
    }
}
