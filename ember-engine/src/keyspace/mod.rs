//! # Keyspace Shards
//!
//! Purpose: The 16,384-slot sharded keyspace. Each slot owns a key map, an
//! expiry index, and a version counter behind its own lock; slots are
//! grouped into contiguous partitions, each served by one command loop.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Per-slot `RwLock`s keep command loops, the sweeper,
//!    and the eviction engine from contending on one table.
//! 2. **Lazy Expiry Everywhere**: Every access checks `expire_at` first and
//!    deletes in place, so an expired key is never observable.
//! 3. **Colocated Versions**: The per-key version lives in the entry header;
//!    WATCH checks cost one lookup, not two.
//! 4. **Approximate Accounting**: Size estimates are maintained on every
//!    mutation and recounted periodically; exactness is not a goal.
//!
//! ## Structure Overview
//!
//! ```text
//! Keyspace
//!   ├── shards: Vec<Shard>            (16,384 slots)
//!   │     └── RwLock<ShardInner>
//!   │           ├── map: HashMap<key, KeyEntry>
//!   │           ├── expires: HashMap<key, Instant>
//!   │           └── version_counter: u64
//!   ├── used_memory: AtomicUsize
//!   └── reclaimer: RwLock<Option<Arc<Reclaimer>>>
//! ```

pub mod slot;

pub use slot::{SLOT_COUNT, slot_of};

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use rand::{Rng, thread_rng};

use ember_common::glob_match;

use crate::lazyfree::Reclaimer;
use crate::value::Value;

/// Initial LFU counter for fresh entries; gives new keys a grace period
/// before looking cold.
const LFU_INIT_VAL: u8 = 5;
/// Shard key count above which a flush is destroyed in the background.
const FLUSH_LAZY_THRESHOLD: usize = 64;
/// 24-bit LRU clock mask, 1-second resolution.
const LRU_CLOCK_MASK: u32 = (1 << 24) - 1;

/// One stored key: the value plus expiry, access metadata, and version.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub value: Value,
    pub expire_at: Option<Instant>,
    /// 24-bit 1 s resolution access clock for LRU idle time.
    pub lru_clock: u32,
    /// Morris-style logarithmic access counter for LFU.
    pub lfu_counter: u8,
    /// Monotonically increasing per-shard version; 0 is reserved for
    /// "absent".
    pub version: u64,
}

impl KeyEntry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.expire_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// TTL state of a key, mirroring the TTL command's three outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    Missing,
    NoExpiry,
    ExpiresIn(Duration),
}

/// Metadata snapshot of one sampled key, used by the eviction engine.
#[derive(Debug, Clone)]
pub struct SampledKey {
    pub key: Vec<u8>,
    pub expire_at: Option<Instant>,
    pub lru_clock: u32,
    pub lfu_counter: u8,
}

#[derive(Debug)]
struct ShardInner {
    map: HashMap<Vec<u8>, KeyEntry, RandomState>,
    /// key -> absolute deadline; kept in sync with `map` on every mutation.
    expires: HashMap<Vec<u8>, Instant, RandomState>,
    version_counter: u64,
}

impl ShardInner {
    fn new() -> ShardInner {
        ShardInner {
            map: HashMap::default(),
            expires: HashMap::default(),
            version_counter: 0,
        }
    }

    fn next_version(&mut self) -> u64 {
        self.version_counter += 1;
        self.version_counter
    }
}

#[derive(Debug)]
struct Shard {
    inner: RwLock<ShardInner>,
}

/// The sharded keyspace.
pub struct Keyspace {
    shards: Vec<Shard>,
    partitions: usize,
    used_memory: AtomicUsize,
    reclaimer: RwLock<Option<Arc<Reclaimer>>>,
    start: Instant,
    lfu_log_factor: AtomicU32,
}

impl Keyspace {
    /// Creates a keyspace served by a single partition.
    pub fn new() -> Keyspace {
        Keyspace::with_partitions(1)
    }

    /// Creates a keyspace whose slots are split into `partitions` contiguous
    /// ranges, one command loop each.
    pub fn with_partitions(partitions: usize) -> Keyspace {
        let partitions = partitions.clamp(1, SLOT_COUNT);
        let mut shards = Vec::with_capacity(SLOT_COUNT);
        for _ in 0..SLOT_COUNT {
            shards.push(Shard {
                inner: RwLock::new(ShardInner::new()),
            });
        }
        Keyspace {
            shards,
            partitions,
            used_memory: AtomicUsize::new(0),
            reclaimer: RwLock::new(None),
            start: Instant::now(),
            lfu_log_factor: AtomicU32::new(10),
        }
    }

    /// Attaches the lazy-free reclaimer; deleted values above the effort
    /// threshold are destroyed on its workers from now on.
    pub fn attach_reclaimer(&self, reclaimer: Arc<Reclaimer>) {
        *self.reclaimer.write() = Some(reclaimer);
    }

    /// Updates the LFU log factor used by access-path counter increments.
    pub fn set_lfu_log_factor(&self, factor: u32) {
        self.lfu_log_factor.store(factor.max(1), Ordering::Relaxed);
    }

    /// Number of command-loop partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions
    }

    /// Partition owning a slot; slots map onto contiguous ranges.
    pub fn partition_of_slot(&self, slot: u16) -> usize {
        (slot as usize * self.partitions) / SLOT_COUNT
    }

    /// Partition owning a key.
    pub fn partition_of_key(&self, key: &[u8]) -> usize {
        self.partition_of_slot(slot_of(key))
    }

    /// Current 24-bit LRU clock value (1 s resolution, wraps).
    pub fn lru_clock(&self) -> u32 {
        (self.start.elapsed().as_secs() as u32) & LRU_CLOCK_MASK
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[slot_of(key) as usize]
    }

    fn entry_estimate(key: &[u8], value: &Value) -> usize {
        key.len() + value.size_estimate()
    }

    fn account_add(&self, amount: usize) {
        self.used_memory.fetch_add(amount, Ordering::Relaxed);
    }

    fn account_sub(&self, amount: usize) {
        self.used_memory.fetch_sub(amount, Ordering::Relaxed);
    }

    /// Hands a value to the reclaimer (or drops it inline below the effort
    /// threshold).
    fn route_free(&self, value: Value) {
        match self.reclaimer.read().as_ref() {
            Some(reclaimer) => reclaimer.queue_free(value),
            None => drop(value),
        }
    }

    /// Removes an entry under the shard lock, maintaining the expiry index
    /// and memory accounting. Returns the entry for routing.
    fn take_entry(&self, inner: &mut ShardInner, key: &[u8]) -> Option<KeyEntry> {
        let entry = inner.map.remove(key)?;
        inner.expires.remove(key);
        self.account_sub(Self::entry_estimate(key, &entry.value));
        Some(entry)
    }

    /// Deletes the key if its TTL has passed. Returns true when it did.
    fn expire_if_due(&self, inner: &mut ShardInner, key: &[u8], now: Instant) -> bool {
        let due = inner
            .map
            .get(key)
            .map(|entry| entry.is_expired(now))
            .unwrap_or(false);
        if due {
            if let Some(entry) = self.take_entry(inner, key) {
                self.route_free(entry.value);
            }
        }
        due
    }

    /// Stores a value, clearing any TTL and starting a fresh access history.
    /// Returns the new version.
    pub fn set(&self, key: &[u8], value: Value) -> u64 {
        self.set_inner(key, value, false)
    }

    /// Stores a value, preserving an existing TTL (SET KEEPTTL).
    pub fn set_keep_ttl(&self, key: &[u8], value: Value) -> u64 {
        self.set_inner(key, value, true)
    }

    fn set_inner(&self, key: &[u8], value: Value, keep_ttl: bool) -> u64 {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();
        self.expire_if_due(&mut inner, key, now);

        let version = inner.next_version();
        let new_estimate = Self::entry_estimate(key, &value);
        let entry = KeyEntry {
            value,
            expire_at: None,
            lru_clock: self.lru_clock(),
            lfu_counter: LFU_INIT_VAL,
            version,
        };

        let previous = inner.map.insert(key.to_vec(), entry);
        self.account_add(new_estimate);
        match previous {
            Some(old) => {
                self.account_sub(Self::entry_estimate(key, &old.value));
                if keep_ttl {
                    if let Some(deadline) = old.expire_at {
                        if let Some(entry) = inner.map.get_mut(key) {
                            entry.expire_at = Some(deadline);
                        }
                        // Deadline already indexed from the old entry.
                    }
                } else {
                    inner.expires.remove(key);
                }
                drop(inner);
                self.route_free(old.value);
            }
            None => {
                inner.expires.remove(key);
            }
        }
        version
    }

    /// Stores a value only when the key is absent; returns the new version
    /// or None when the key exists.
    pub fn set_if_absent(&self, key: &[u8], value: Value) -> Option<u64> {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();
        self.expire_if_due(&mut inner, key, now);
        if inner.map.contains_key(key) {
            return None;
        }
        let version = inner.next_version();
        self.account_add(Self::entry_estimate(key, &value));
        inner.map.insert(
            key.to_vec(),
            KeyEntry {
                value,
                expire_at: None,
                lru_clock: self.lru_clock(),
                lfu_counter: LFU_INIT_VAL,
                version,
            },
        );
        Some(version)
    }

    /// Deletes a key; returns true when a live entry was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();
        if self.expire_if_due(&mut inner, key, now) {
            return false;
        }
        match self.take_entry(&mut inner, key) {
            Some(entry) => {
                drop(inner);
                self.route_free(entry.value);
                true
            }
            None => false,
        }
    }

    /// Existence test with lazy expiry.
    pub fn exists(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();
        self.expire_if_due(&mut inner, key, now);
        inner.map.contains_key(key)
    }

    /// Runs a read closure against a live value. The closure may mutate the
    /// value for read-path housekeeping (hash field expiry); the key version
    /// is not bumped. Returns None when the key is absent or expired.
    pub fn view<R>(&self, key: &[u8], f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        self.access(key, false, f)
    }

    /// Runs a write closure against a live value, bumping the key version.
    /// Returns None when the key is absent or expired.
    pub fn update<R>(&self, key: &[u8], f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        self.access(key, true, f)
    }

    fn access<R>(&self, key: &[u8], bump: bool, f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();
        self.expire_if_due(&mut inner, key, now);
        if !inner.map.contains_key(key) {
            return None;
        }
        let version = if bump { Some(inner.next_version()) } else { None };
        let clock = self.lru_clock();
        let factor = self.lfu_log_factor.load(Ordering::Relaxed) as f64;
        let entry = inner.map.get_mut(key)?;

        entry.lru_clock = clock;
        if entry.lfu_counter < u8::MAX {
            let p = 1.0 / (entry.lfu_counter as f64 * factor + 1.0);
            if thread_rng().gen::<f64>() < p {
                entry.lfu_counter += 1;
            }
        }
        if let Some(version) = version {
            entry.version = version;
        }

        let before = Self::entry_estimate(key, &entry.value);
        let result = f(&mut entry.value);
        let after = Self::entry_estimate(key, &entry.value);
        if after > before {
            self.account_add(after - before);
        } else {
            self.account_sub(before - after);
        }
        Some(result)
    }

    /// Runs a write closure, inserting `init()` first when the key is
    /// absent. Bumps the key version either way.
    pub fn update_or_insert<R>(
        &self,
        key: &[u8],
        init: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> R,
    ) -> R {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();
        self.expire_if_due(&mut inner, key, now);

        let version = inner.next_version();
        let clock = self.lru_clock();
        if !inner.map.contains_key(key) {
            let value = init();
            self.account_add(Self::entry_estimate(key, &value));
            inner.map.insert(
                key.to_vec(),
                KeyEntry {
                    value,
                    expire_at: None,
                    lru_clock: clock,
                    lfu_counter: LFU_INIT_VAL,
                    version,
                },
            );
        }
        let entry = inner.map.get_mut(key).expect("entry just ensured");
        entry.lru_clock = clock;
        entry.version = version;

        let before = Self::entry_estimate(key, &entry.value);
        let result = f(&mut entry.value);
        let after = Self::entry_estimate(key, &entry.value);
        let empty = is_container_empty(&entry.value);
        if after > before {
            self.account_add(after - before);
        } else {
            self.account_sub(before - after);
        }
        // Container commands that drain the last element delete the key,
        // matching the Redis empty-container rule.
        if empty {
            if let Some(entry) = self.take_entry(&mut inner, key) {
                drop(inner);
                self.route_free(entry.value);
            }
        }
        result
    }

    /// Renames a key, carrying value, TTL, and a fresh version in the
    /// destination shard. Fails when the source is absent.
    pub fn rename(&self, old: &[u8], new: &[u8]) -> bool {
        if old == new {
            return self.exists(old);
        }
        let now = Instant::now();
        let old_slot = slot_of(old) as usize;
        let new_slot = slot_of(new) as usize;

        // Cross-shard: always lock in slot order to prevent deadlock.
        if old_slot == new_slot {
            let mut inner = self.shards[old_slot].inner.write();
            self.expire_if_due(&mut inner, old, now);
            let Some(mut entry) = self.take_entry(&mut inner, old) else {
                return false;
            };
            self.expire_if_due(&mut inner, new, now);
            let displaced = self.take_entry(&mut inner, new).map(|e| e.value);
            entry.version = inner.next_version();
            if let Some(deadline) = entry.expire_at {
                inner.expires.insert(new.to_vec(), deadline);
            }
            self.account_add(Self::entry_estimate(new, &entry.value));
            inner.map.insert(new.to_vec(), entry);
            drop(inner);
            if let Some(value) = displaced {
                self.route_free(value);
            }
            true
        } else {
            let (first, second) = if old_slot < new_slot {
                (old_slot, new_slot)
            } else {
                (new_slot, old_slot)
            };
            let mut first_guard = self.shards[first].inner.write();
            let mut second_guard = self.shards[second].inner.write();
            let (old_inner, new_inner) = if old_slot == first {
                (&mut *first_guard, &mut *second_guard)
            } else {
                (&mut *second_guard, &mut *first_guard)
            };

            self.expire_if_due(old_inner, old, now);
            let Some(mut entry) = self.take_entry(old_inner, old) else {
                return false;
            };
            self.expire_if_due(new_inner, new, now);
            let displaced = self.take_entry(new_inner, new).map(|e| e.value);
            entry.version = new_inner.next_version();
            if let Some(deadline) = entry.expire_at {
                new_inner.expires.insert(new.to_vec(), deadline);
            }
            self.account_add(Self::entry_estimate(new, &entry.value));
            new_inner.map.insert(new.to_vec(), entry);
            drop(second_guard);
            drop(first_guard);
            if let Some(value) = displaced {
                self.route_free(value);
            }
            true
        }
    }

    /// Returns a uniformly random live key, or None when the keyspace is
    /// empty.
    pub fn random_key(&self) -> Option<Vec<u8>> {
        let mut rng = thread_rng();
        let start = rng.gen_range(0..SLOT_COUNT);
        let now = Instant::now();
        for offset in 0..SLOT_COUNT {
            let slot = (start + offset) % SLOT_COUNT;
            let mut inner = self.shards[slot].inner.write();
            let due: Vec<Vec<u8>> = inner
                .map
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in due {
                self.expire_if_due(&mut inner, &key, now);
            }
            if let Some(key) = inner.map.keys().choose(&mut rng) {
                return Some(key.clone());
            }
        }
        None
    }

    /// Draws up to `n` distinct keys, near-uniformly, for eviction sampling.
    pub fn sample_keys(&self, n: usize) -> Vec<Vec<u8>> {
        self.sample_entries(n).into_iter().map(|s| s.key).collect()
    }

    /// Draws up to `n` distinct keys with their eviction metadata.
    pub fn sample_entries(&self, n: usize) -> Vec<SampledKey> {
        let mut rng = thread_rng();
        let mut sampled = Vec::with_capacity(n);
        if n == 0 {
            return sampled;
        }
        let start = rng.gen_range(0..SLOT_COUNT);
        // Walk shards from a random origin; each non-empty shard donates a
        // reservoir-style slice of its keys. One pass, no duplicates.
        for offset in 0..SLOT_COUNT {
            if sampled.len() >= n {
                break;
            }
            let slot = (start + offset) % SLOT_COUNT;
            let inner = self.shards[slot].inner.read();
            if inner.map.is_empty() {
                continue;
            }
            let want = (n - sampled.len()).min(inner.map.len());
            for (key, entry) in inner.map.iter().choose_multiple(&mut rng, want) {
                sampled.push(SampledKey {
                    key: key.clone(),
                    expire_at: entry.expire_at,
                    lru_clock: entry.lru_clock,
                    lfu_counter: entry.lfu_counter,
                });
            }
        }
        sampled
    }

    /// Sets an absolute expiration. Returns false when the key is absent.
    /// Re-setting the same deadline is a no-op on the version.
    pub fn set_expire(&self, key: &[u8], at: Instant) -> bool {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();
        self.expire_if_due(&mut inner, key, now);
        if !inner.map.contains_key(key) {
            return false;
        }
        let unchanged = inner.map.get(key).map(|e| e.expire_at) == Some(Some(at));
        if !unchanged {
            let version = inner.next_version();
            let entry = inner.map.get_mut(key).expect("checked above");
            entry.expire_at = Some(at);
            entry.version = version;
            inner.expires.insert(key.to_vec(), at);
        }
        true
    }

    /// Returns the absolute expiration of a live key.
    pub fn get_expire(&self, key: &[u8]) -> Option<Instant> {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();
        self.expire_if_due(&mut inner, key, now);
        inner.map.get(key).and_then(|e| e.expire_at)
    }

    /// Clears a key's TTL; returns true when there was one to clear.
    pub fn persist(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();
        self.expire_if_due(&mut inner, key, now);
        let had_ttl = inner
            .map
            .get(key)
            .map(|e| e.expire_at.is_some())
            .unwrap_or(false);
        if had_ttl {
            let version = inner.next_version();
            let entry = inner.map.get_mut(key).expect("checked above");
            entry.expire_at = None;
            entry.version = version;
            inner.expires.remove(key);
        }
        had_ttl
    }

    /// TTL state of a key.
    pub fn ttl(&self, key: &[u8]) -> TtlStatus {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let mut inner = shard.inner.write();
        self.expire_if_due(&mut inner, key, now);
        match inner.map.get(key) {
            None => TtlStatus::Missing,
            Some(entry) => match entry.expire_at {
                None => TtlStatus::NoExpiry,
                Some(deadline) => TtlStatus::ExpiresIn(deadline.saturating_duration_since(now)),
            },
        }
    }

    /// Returns true when the key exists but its deadline has passed. Does
    /// not delete; read paths use the lazy check instead.
    pub fn is_expired(&self, key: &[u8]) -> bool {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let inner = shard.inner.read();
        inner
            .map
            .get(key)
            .map(|e| e.is_expired(now))
            .unwrap_or(false)
    }

    /// Current version of a key; 0 when absent or expired.
    pub fn key_version(&self, key: &[u8]) -> u64 {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let inner = shard.inner.read();
        match inner.map.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.version,
            _ => 0,
        }
    }

    /// Optimistic-concurrency check: true when the key's version still
    /// equals `v0` (with 0 meaning "absent") and the key has not been
    /// deleted and recreated since.
    pub fn watch_check(&self, key: &[u8], v0: u64) -> bool {
        self.key_version(key) == v0
    }

    /// One pass of probabilistic active expiration with a 25 ms CPU cap.
    pub fn cleanup_expired(&self, sample_size: usize, max_iterations: usize) -> usize {
        self.cleanup_expired_with_budget(sample_size, max_iterations, Duration::from_millis(25))
    }

    /// Active expiration: per shard with TTLs, sample `sample_size` keys
    /// from the expiry index, delete the expired ones, and repeat (up to
    /// `max_iterations`) while more than 25% of a sample was expired.
    pub fn cleanup_expired_with_budget(
        &self,
        sample_size: usize,
        max_iterations: usize,
        budget: Duration,
    ) -> usize {
        if sample_size == 0 {
            return 0;
        }
        let started = Instant::now();
        let mut rng = thread_rng();
        let mut removed_total = 0;

        for shard in &self.shards {
            if started.elapsed() >= budget {
                break;
            }
            for _ in 0..max_iterations.max(1) {
                let now = Instant::now();
                let mut inner = shard.inner.write();
                if inner.expires.is_empty() {
                    break;
                }
                let sampled: Vec<Vec<u8>> = inner
                    .expires
                    .keys()
                    .cloned()
                    .choose_multiple(&mut rng, sample_size);
                let checked = sampled.len();
                let mut removed_here = 0;
                for key in sampled {
                    if self.expire_if_due(&mut inner, &key, now) {
                        removed_here += 1;
                    }
                }
                drop(inner);
                removed_total += removed_here;

                // Converged: the expired ratio in this shard is low enough.
                if checked == 0 || (removed_here * 4) <= checked {
                    break;
                }
                if started.elapsed() >= budget {
                    break;
                }
            }
        }
        removed_total
    }

    /// Clears every shard. Large shards are destroyed in the background.
    pub fn flush(&self) {
        let reclaimer = self.reclaimer.read().clone();
        for shard in &self.shards {
            let mut inner = shard.inner.write();
            if inner.map.is_empty() {
                continue;
            }
            let map = std::mem::take(&mut inner.map);
            inner.expires.clear();
            drop(inner);
            let freed: usize = map
                .iter()
                .map(|(k, e)| Self::entry_estimate(k, &e.value))
                .sum();
            self.account_sub(freed);
            match &reclaimer {
                Some(reclaimer) if map.len() > FLUSH_LAZY_THRESHOLD => {
                    reclaimer.queue_flush(map);
                }
                _ => drop(map),
            }
        }
    }

    /// Total number of stored keys (including not-yet-swept expired ones,
    /// which is the DBSIZE the outside world observes).
    pub fn dbsize(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.inner.read().map.len())
            .sum()
    }

    /// Total number of keys carrying a TTL.
    pub fn expires_size(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.inner.read().expires.len())
            .sum()
    }

    /// All live keys matching a glob pattern.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Vec<u8>> {
        let now = Instant::now();
        let mut matched = Vec::new();
        for shard in &self.shards {
            let inner = shard.inner.read();
            for (key, entry) in inner.map.iter() {
                if !entry.is_expired(now) && glob_match(pattern, key) {
                    matched.push(key.clone());
                }
            }
        }
        matched
    }

    /// TYPE name of a live key's value.
    pub fn type_of(&self, key: &[u8]) -> Option<&'static str> {
        self.view(key, |value| value.type_name())
    }

    /// Idle seconds and frequency counter of a live key (OBJECT
    /// IDLETIME/FREQ).
    pub fn object_metadata(&self, key: &[u8]) -> Option<(u32, u8)> {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let inner = shard.inner.read();
        let entry = inner.map.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        let idle = self.lru_clock().wrapping_sub(entry.lru_clock) & LRU_CLOCK_MASK;
        Some((idle, entry.lfu_counter))
    }

    /// Approximate used memory in bytes.
    pub fn used_memory(&self) -> usize {
        self.used_memory.load(Ordering::Relaxed)
    }

    /// Recomputes the size estimate from scratch, fixing accumulated drift.
    /// Called periodically from the maintenance thread.
    pub fn recount_memory(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            let inner = shard.inner.read();
            total += inner
                .map
                .iter()
                .map(|(k, e)| Self::entry_estimate(k, &e.value))
                .sum::<usize>();
        }
        self.used_memory.store(total, Ordering::Relaxed);
        total
    }

    /// Approximate memory charged to one key.
    pub fn memory_usage(&self, key: &[u8]) -> Option<usize> {
        let now = Instant::now();
        let shard = self.shard_for(key);
        let inner = shard.inner.read();
        let entry = inner.map.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        Some(Self::entry_estimate(key, &entry.value))
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Keyspace::new()
    }
}

/// True for container values whose last element was just removed; plain
/// strings and HLLs persist while empty.
fn is_container_empty(value: &Value) -> bool {
    match value {
        Value::List(l) => l.is_empty(),
        Value::Set(s) => s.is_empty(),
        Value::SortedSet(z) => z.is_empty(),
        Value::Hash(h) => h.encoding_len() == 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ListValue, StringValue};

    fn string_value(text: &[u8]) -> Value {
        Value::String(StringValue::from_bytes(text))
    }

    #[test]
    fn set_get_roundtrip() {
        let ks = Keyspace::new();
        ks.set(b"alpha", string_value(b"value"));
        let bytes = ks.view(b"alpha", |v| v.as_string().unwrap().bytes()).unwrap();
        assert_eq!(bytes, b"value");
        assert_eq!(ks.dbsize(), 1);
    }

    #[test]
    fn delete_removes_and_resets_version() {
        let ks = Keyspace::new();
        ks.set(b"alpha", string_value(b"value"));
        assert!(ks.key_version(b"alpha") > 0);
        assert!(ks.delete(b"alpha"));
        assert!(!ks.delete(b"alpha"));
        assert_eq!(ks.key_version(b"alpha"), 0);
        // A fresh chain starts at a non-zero version.
        ks.set(b"alpha", string_value(b"again"));
        assert!(ks.key_version(b"alpha") > 0);
    }

    #[test]
    fn versions_strictly_increase_on_writes() {
        let ks = Keyspace::new();
        let v1 = ks.set(b"k", string_value(b"1"));
        let v2 = ks.set(b"k", string_value(b"2"));
        assert!(v2 > v1);
        let v3 = ks.key_version(b"k");
        ks.update(b"k", |v| v.as_string_mut().unwrap().incr_by(1).unwrap());
        assert!(ks.key_version(b"k") > v3);
        // Read paths leave the version alone.
        ks.view(b"k", |_| ());
        assert_eq!(ks.key_version(b"k"), ks.key_version(b"k"));
    }

    #[test]
    fn watch_check_tracks_mutation_and_deletion() {
        let ks = Keyspace::new();
        ks.set(b"k", string_value(b"1"));
        let v0 = ks.key_version(b"k");
        assert!(ks.watch_check(b"k", v0));

        ks.set(b"k", string_value(b"2"));
        assert!(!ks.watch_check(b"k", v0));

        let v1 = ks.key_version(b"k");
        ks.delete(b"k");
        assert!(!ks.watch_check(b"k", v1));
        assert!(ks.watch_check(b"k", 0));
    }

    #[test]
    fn expired_key_is_never_visible() {
        let ks = Keyspace::new();
        ks.set(b"k", string_value(b"v"));
        ks.set_expire(b"k", Instant::now() + Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(15));
        assert!(!ks.exists(b"k"));
        assert!(ks.view(b"k", |_| ()).is_none());
        assert_eq!(ks.ttl(b"k"), TtlStatus::Missing);
        assert_eq!(ks.key_version(b"k"), 0);
        assert_eq!(ks.dbsize(), 0);
    }

    #[test]
    fn set_expire_same_deadline_is_version_noop() {
        let ks = Keyspace::new();
        ks.set(b"k", string_value(b"v"));
        let deadline = Instant::now() + Duration::from_secs(100);
        assert!(ks.set_expire(b"k", deadline));
        let v1 = ks.key_version(b"k");
        assert!(ks.set_expire(b"k", deadline));
        assert_eq!(ks.key_version(b"k"), v1);
        // A different deadline bumps again.
        assert!(ks.set_expire(b"k", deadline + Duration::from_secs(1)));
        assert!(ks.key_version(b"k") > v1);
    }

    #[test]
    fn set_clears_ttl_unless_kept() {
        let ks = Keyspace::new();
        ks.set(b"k", string_value(b"v"));
        ks.set_expire(b"k", Instant::now() + Duration::from_secs(100));
        assert!(matches!(ks.ttl(b"k"), TtlStatus::ExpiresIn(_)));

        ks.set(b"k", string_value(b"w"));
        assert_eq!(ks.ttl(b"k"), TtlStatus::NoExpiry);

        ks.set_expire(b"k", Instant::now() + Duration::from_secs(100));
        ks.set_keep_ttl(b"k", string_value(b"x"));
        assert!(matches!(ks.ttl(b"k"), TtlStatus::ExpiresIn(_)));
    }

    #[test]
    fn persist_clears_ttl_index() {
        let ks = Keyspace::new();
        ks.set(b"k", string_value(b"v"));
        ks.set_expire(b"k", Instant::now() + Duration::from_secs(100));
        assert_eq!(ks.expires_size(), 1);
        assert!(ks.persist(b"k"));
        assert!(!ks.persist(b"k"));
        assert_eq!(ks.expires_size(), 0);
        assert_eq!(ks.ttl(b"k"), TtlStatus::NoExpiry);
    }

    #[test]
    fn rename_carries_value_ttl_and_new_version() {
        let ks = Keyspace::new();
        ks.set(b"src", string_value(b"v"));
        ks.set_expire(b"src", Instant::now() + Duration::from_secs(100));
        assert!(ks.rename(b"src", b"dst"));
        assert!(!ks.exists(b"src"));
        assert!(matches!(ks.ttl(b"dst"), TtlStatus::ExpiresIn(_)));
        let bytes = ks.view(b"dst", |v| v.as_string().unwrap().bytes()).unwrap();
        assert_eq!(bytes, b"v");
        assert!(!ks.rename(b"missing", b"other"));
        assert_eq!(ks.expires_size(), 1);
    }

    #[test]
    fn update_or_insert_deletes_emptied_containers() {
        let ks = Keyspace::new();
        ks.update_or_insert(
            b"list",
            || Value::List(ListValue::new()),
            |v| v.as_list_mut().unwrap().push_tail(b"only".to_vec()),
        );
        assert!(ks.exists(b"list"));
        ks.update_or_insert(
            b"list",
            || Value::List(ListValue::new()),
            |v| v.as_list_mut().unwrap().pop_head(),
        );
        assert!(!ks.exists(b"list"));
    }

    #[test]
    fn cleanup_expired_sweeps_dead_keys() {
        let ks = Keyspace::new();
        let deadline = Instant::now() + Duration::from_millis(5);
        for i in 0..50 {
            let key = format!("dead:{i}");
            ks.set(key.as_bytes(), string_value(b"v"));
            ks.set_expire(key.as_bytes(), deadline);
        }
        for i in 0..10 {
            let key = format!("live:{i}");
            ks.set(key.as_bytes(), string_value(b"v"));
        }
        std::thread::sleep(Duration::from_millis(15));

        let removed = ks.cleanup_expired(20, 4);
        assert!(removed > 0, "sweep removed nothing");
        // Repeat passes converge on zero expired keys.
        ks.cleanup_expired(20, 4);
        ks.cleanup_expired(20, 4);
        assert_eq!(ks.expires_size(), 0);
        assert_eq!(ks.dbsize(), 10);
    }

    #[test]
    fn sample_keys_returns_distinct_keys() {
        let ks = Keyspace::new();
        for i in 0..100 {
            ks.set(format!("k{i}").as_bytes(), string_value(b"v"));
        }
        let sample = ks.sample_keys(20);
        assert_eq!(sample.len(), 20);
        let unique: std::collections::HashSet<_> = sample.iter().collect();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn memory_accounting_tracks_mutations() {
        let ks = Keyspace::new();
        assert_eq!(ks.used_memory(), 0);
        ks.set(b"k", string_value(b"hello"));
        let after_set = ks.used_memory();
        assert_eq!(after_set, 1 + 24 + 5);

        ks.update(b"k", |v| {
            v.as_string_mut().unwrap().append(b" world");
        });
        assert_eq!(ks.used_memory(), after_set + 6);

        ks.delete(b"k");
        assert_eq!(ks.used_memory(), 0);
        assert_eq!(ks.recount_memory(), 0);
    }

    #[test]
    fn flush_empties_every_shard() {
        let ks = Keyspace::new();
        for i in 0..200 {
            ks.set(format!("k{i}").as_bytes(), string_value(b"v"));
        }
        ks.set_expire(b"k1", Instant::now() + Duration::from_secs(100));
        ks.flush();
        assert_eq!(ks.dbsize(), 0);
        assert_eq!(ks.expires_size(), 0);
        assert_eq!(ks.used_memory(), 0);
    }

    #[test]
    fn partitions_cover_all_slots_contiguously() {
        let ks = Keyspace::with_partitions(4);
        assert_eq!(ks.partition_count(), 4);
        assert_eq!(ks.partition_of_slot(0), 0);
        assert_eq!(ks.partition_of_slot((SLOT_COUNT - 1) as u16), 3);
        let mut last = 0;
        for slot in 0..SLOT_COUNT as u16 {
            let p = ks.partition_of_slot(slot);
            assert!(p >= last && p < 4);
            last = p;
        }
    }

    #[test]
    fn random_key_skips_expired() {
        let ks = Keyspace::new();
        assert!(ks.random_key().is_none());
        ks.set(b"gone", string_value(b"v"));
        ks.set_expire(b"gone", Instant::now() + Duration::from_millis(1));
        ks.set(b"alive", string_value(b"v"));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(ks.random_key(), Some(b"alive".to_vec()));
    }

    #[test]
    fn keys_matches_glob() {
        let ks = Keyspace::new();
        ks.set(b"cache:a", string_value(b"1"));
        ks.set(b"cache:b", string_value(b"2"));
        ks.set(b"other:c", string_value(b"3"));
        let mut matched = ks.keys(b"cache:*");
        matched.sort();
        assert_eq!(matched, vec![b"cache:a".to_vec(), b"cache:b".to_vec()]);
        assert_eq!(ks.keys(b"*").len(), 3);
    }
}
