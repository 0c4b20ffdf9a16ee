//! Hardlink deduplication caches
//!
//! Files with more than one hard link must be counted exactly once per
//! scan even when several workers reach their links concurrently. The
//! cache records (device, inode) pairs; the first worker to record a pair
//! owns the bytes, later workers skip theirs.
//!
//! Two implementations share the [`DedupCache`] trait. [`BloomDedup`],
//! the default, is a sharded bloom filter that trades a tiny
//! false-positive rate (an occasional undercount) for bounded memory on
//! trees with tens of millions of inodes. [`ExactDedup`] keeps a precise
//! map for when zero false positives matter more than memory.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use ahash::RandomState;

use crate::config::DedupStrategy;

/// Shared seen-inode cache
pub trait DedupCache: Send + Sync {
    /// Record (dev, ino), returning true if it was already present
    fn seen_or_record(&self, dev: u64, ino: u64) -> bool;

    /// Like [`DedupCache::seen_or_record`], also refreshing the caller's
    /// local snapshot with everything recorded so far
    ///
    /// Workers consult a lock-free local set first and only fall through
    /// to the shared cache on a local miss; refreshing on that slow path
    /// keeps the local set warm without extra locking.
    fn seen_or_record_refresh(&self, dev: u64, ino: u64, local: &mut HashSet<(u64, u64)>) -> bool {
        let seen = self.seen_or_record(dev, ino);
        local.insert((dev, ino));
        seen
    }

    /// Forget everything, preparing for a new scan
    fn reset(&self);
}

/// Precise per-device inode sets behind a single lock
pub struct ExactDedup {
    seen: Mutex<HashMap<u64, HashSet<u64>>>,
}

impl ExactDedup {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Copy of the full (dev, ino) contents, for inspection in tests
    pub fn snapshot(&self) -> Vec<(u64, u64)> {
        let seen = lock(&self.seen);
        seen.iter()
            .flat_map(|(dev, inos)| inos.iter().map(move |ino| (*dev, *ino)))
            .collect()
    }
}

impl Default for ExactDedup {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupCache for ExactDedup {
    fn seen_or_record(&self, dev: u64, ino: u64) -> bool {
        let mut seen = lock(&self.seen);
        !seen.entry(dev).or_default().insert(ino)
    }

    fn seen_or_record_refresh(&self, dev: u64, ino: u64, local: &mut HashSet<(u64, u64)>) -> bool {
        let mut seen = lock(&self.seen);
        let present = !seen.entry(dev).or_default().insert(ino);
        for (dev, inos) in seen.iter() {
            for ino in inos {
                local.insert((*dev, *ino));
            }
        }
        present
    }

    fn reset(&self) {
        lock(&self.seen).clear();
    }
}

/// Flat bit array addressed by bit index
struct BitField {
    words: Vec<u64>,
}

impl BitField {
    fn new(bits: u64) -> Self {
        let words = (bits / 64 + 1) as usize;
        Self {
            words: vec![0; words],
        }
    }

    /// Set the bit, returning its previous value
    fn test_and_set(&mut self, index: u64) -> bool {
        let word = (index / 64) as usize;
        let mask = 1u64 << (index % 64);
        let was_set = self.words[word] & mask != 0;
        self.words[word] |= mask;
        was_set
    }
}

/// One bloom shard: a bit field probed at `salts` independent positions
struct BloomFilter {
    bits: u64,
    hashers: Vec<RandomState>,
    field: BitField,
}

impl BloomFilter {
    fn new(bits: u64, salts: u32) -> Self {
        // fixed seeds keep shard contents reproducible across runs
        let hashers = (0..salts as u64)
            .map(|salt| {
                RandomState::with_seeds(
                    0x243f_6a88_85a3_08d3 ^ salt,
                    0x1319_8a2e_0370_7344 ^ salt.rotate_left(17),
                    0xa409_3822_299f_31d0 ^ salt.rotate_left(31),
                    0x082e_fa98_ec4e_6c89 ^ salt.rotate_left(47),
                )
            })
            .collect();
        Self {
            bits,
            hashers,
            field: BitField::new(bits),
        }
    }

    /// Probe all salt positions for the key, setting each, and report
    /// whether every one was already set
    fn test_and_set(&mut self, key: &[u8; 16]) -> bool {
        let mut all_set = true;
        for hasher in &self.hashers {
            // modulo, not a mask: `bits` need not be of the form 2^n - 1
            let index = hasher.hash_one(key) % self.bits;
            if !self.field.test_and_set(index) {
                all_set = false;
            }
        }
        all_set
    }
}

/// Sharded bloom filter keyed by (device, inode)
///
/// Shard selection by `ino % shards` keeps each shard's lock contention
/// and bit density low. With the default geometry (9 shards, 24-bit
/// fields, 6 salts) the false-positive rate stays far below one in a
/// million through tens of millions of inodes.
pub struct BloomDedup {
    shards: Vec<Mutex<BloomFilter>>,
    bits: u64,
    salts: u32,
}

impl BloomDedup {
    pub fn new(shards: usize, salts: u32, bits: u64) -> Self {
        let shards = (0..shards)
            .map(|_| Mutex::new(BloomFilter::new(bits, salts)))
            .collect();
        Self {
            shards,
            bits,
            salts,
        }
    }

    fn shard_for(&self, ino: u64) -> &Mutex<BloomFilter> {
        &self.shards[(ino % self.shards.len() as u64) as usize]
    }

    /// Point-in-time copy of one shard's bit words, for inspection
    pub fn shard_words(&self, shard: usize) -> Vec<u64> {
        lock(&self.shards[shard]).field.words.clone()
    }

    fn key(dev: u64, ino: u64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&dev.to_le_bytes());
        key[8..].copy_from_slice(&ino.to_le_bytes());
        key
    }
}

impl DedupCache for BloomDedup {
    fn seen_or_record(&self, dev: u64, ino: u64) -> bool {
        let key = Self::key(dev, ino);
        lock(self.shard_for(ino)).test_and_set(&key)
    }

    fn reset(&self) {
        for shard in &self.shards {
            *lock(shard) = BloomFilter::new(self.bits, self.salts);
        }
    }
}

/// Build the cache the configured strategy calls for
pub fn build_cache(strategy: &DedupStrategy) -> Arc<dyn DedupCache> {
    match strategy {
        DedupStrategy::Exact => Arc::new(ExactDedup::new()),
        DedupStrategy::Bloom {
            shards,
            salts,
            bits,
        } => Arc::new(BloomDedup::new(*shards, *salts, *bits)),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
