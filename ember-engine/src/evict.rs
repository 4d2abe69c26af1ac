//! # Eviction Engine
//!
//! Purpose: Keep used memory near the configured budget with the sampled
//! approximation Redis uses: draw 4N candidate keys, rank them under the
//! active policy, delete the worst N, repeat until usage falls to 90% of
//! the limit or the per-cycle cap is hit.
//!
//! ## Design Principles
//!
//! 1. **Sampling Over Bookkeeping**: No global LRU list; candidates come
//!    from `Keyspace::sample_entries`, so eviction cost is bounded by the
//!    sample size, not the keyspace.
//! 2. **24-bit Idle Clock**: Idle time is the wrapping distance between the
//!    keyspace clock and the entry's `lru_clock` at 1 s resolution.
//! 3. **Decayed Morris Counters**: LFU ranks by
//!    `counter * exp(-idle_minutes / half_life)`, so stale hot keys cool
//!    off smoothly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::debug;

use ember_common::MaxmemoryPolicy;

use crate::keyspace::{Keyspace, SampledKey};

const LRU_CLOCK_MASK: u32 = (1 << 24) - 1;

/// Tunables for one eviction engine.
#[derive(Debug, Clone)]
pub struct EvictionParams {
    /// Memory budget in bytes; 0 disables eviction.
    pub maxmemory: u64,
    pub policy: MaxmemoryPolicy,
    /// Sample constant N; each cycle draws 4N candidates and evicts up to N.
    pub samples: usize,
    /// LFU half-life in minutes for the exponential decay.
    pub lfu_decay_minutes: u64,
    /// Hard cap on deletions per `evict` call.
    pub max_evictions: usize,
}

impl Default for EvictionParams {
    fn default() -> Self {
        EvictionParams {
            maxmemory: 0,
            policy: MaxmemoryPolicy::NoEviction,
            samples: 5,
            lfu_decay_minutes: 60,
            max_evictions: 32,
        }
    }
}

/// Memory-bounded admission controller.
pub struct EvictionEngine {
    params: parking_lot::RwLock<EvictionParams>,
    evicted_total: AtomicU64,
    cycles_total: AtomicU64,
    sets_observed: AtomicU64,
    deletes_observed: AtomicU64,
    accesses_observed: AtomicU64,
}

impl EvictionEngine {
    pub fn new(params: EvictionParams) -> EvictionEngine {
        EvictionEngine {
            params: parking_lot::RwLock::new(params),
            evicted_total: AtomicU64::new(0),
            cycles_total: AtomicU64::new(0),
            sets_observed: AtomicU64::new(0),
            deletes_observed: AtomicU64::new(0),
            accesses_observed: AtomicU64::new(0),
        }
    }

    /// Replaces the tunables (CONFIG SET maxmemory / maxmemory-policy).
    pub fn reconfigure(&self, params: EvictionParams) {
        *self.params.write() = params;
    }

    /// Snapshot of the current tunables.
    pub fn params(&self) -> EvictionParams {
        self.params.read().clone()
    }

    /// Admission hook for writes. Byte accounting lives with the keyspace;
    /// the engine tracks traffic counts for its own pressure telemetry.
    pub fn on_set(&self, _key: &[u8], _size_estimate: usize) {
        self.sets_observed.fetch_add(1, Ordering::Relaxed);
    }

    /// Deletion hook.
    pub fn on_delete(&self, _key: &[u8]) {
        self.deletes_observed.fetch_add(1, Ordering::Relaxed);
    }

    /// Access hook; LRU/LFU entry metadata updates happen on the keyspace
    /// read path itself.
    pub fn on_access(&self, _key: &[u8]) {
        self.accesses_observed.fetch_add(1, Ordering::Relaxed);
    }

    /// (sets, deletes, accesses) observed through the admission hooks.
    pub fn traffic(&self) -> (u64, u64, u64) {
        (
            self.sets_observed.load(Ordering::Relaxed),
            self.deletes_observed.load(Ordering::Relaxed),
            self.accesses_observed.load(Ordering::Relaxed),
        )
    }

    /// True when used memory exceeds the budget under an evicting policy.
    pub fn needs_eviction(&self, keyspace: &Keyspace) -> bool {
        let params = self.params.read();
        params.maxmemory > 0
            && params.policy != MaxmemoryPolicy::NoEviction
            && keyspace.used_memory() as u64 > params.maxmemory
    }

    /// True when a write must be refused (over budget under NoEviction).
    pub fn write_refused(&self, keyspace: &Keyspace) -> bool {
        let params = self.params.read();
        params.maxmemory > 0
            && params.policy == MaxmemoryPolicy::NoEviction
            && keyspace.used_memory() as u64 > params.maxmemory
    }

    /// Runs eviction cycles until usage drops to 90% of the budget or the
    /// per-call cap is reached. Returns the evicted keys.
    pub fn evict(&self, keyspace: &Keyspace) -> Vec<Vec<u8>> {
        let params = self.params.read().clone();
        let mut evicted = Vec::new();
        if params.maxmemory == 0 || params.policy == MaxmemoryPolicy::NoEviction {
            return evicted;
        }
        let target = params.maxmemory - params.maxmemory / 10;

        while keyspace.used_memory() as u64 > target && evicted.len() < params.max_evictions {
            self.cycles_total.fetch_add(1, Ordering::Relaxed);
            let mut candidates = keyspace.sample_entries(params.samples * 4);
            if params.policy.is_volatile() {
                candidates.retain(|c| c.expire_at.is_some());
            }
            if candidates.is_empty() {
                break;
            }

            rank_candidates(&mut candidates, &params, keyspace.lru_clock());

            let mut progressed = false;
            for candidate in candidates.into_iter().take(params.samples) {
                if evicted.len() >= params.max_evictions {
                    break;
                }
                if keyspace.delete(&candidate.key) {
                    progressed = true;
                    evicted.push(candidate.key);
                }
                if keyspace.used_memory() as u64 <= target {
                    break;
                }
            }
            if !progressed {
                break;
            }
        }

        if !evicted.is_empty() {
            self.evicted_total
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            debug!(count = evicted.len(), "evicted keys under memory pressure");
        }
        evicted
    }

    /// Keys evicted over the engine's lifetime.
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total.load(Ordering::Relaxed)
    }
}

/// Sorts candidates so the best eviction victim comes first.
fn rank_candidates(candidates: &mut [SampledKey], params: &EvictionParams, clock: u32) {
    match params.policy {
        MaxmemoryPolicy::AllKeysLru | MaxmemoryPolicy::VolatileLru => {
            // Largest idle time first.
            candidates.sort_by_key(|c| std::cmp::Reverse(idle_seconds(clock, c.lru_clock)));
        }
        MaxmemoryPolicy::AllKeysLfu | MaxmemoryPolicy::VolatileLfu => {
            // Smallest decayed frequency first.
            candidates.sort_by(|a, b| {
                let fa = decayed_frequency(a, params, clock);
                let fb = decayed_frequency(b, params, clock);
                fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        MaxmemoryPolicy::VolatileTtl => {
            // Nearest expiration first; no-TTL keys were filtered out.
            candidates.sort_by_key(|c| c.expire_at.unwrap_or_else(far_future));
        }
        MaxmemoryPolicy::AllKeysRandom
        | MaxmemoryPolicy::VolatileRandom
        | MaxmemoryPolicy::NoEviction => {}
    }
}

/// Idle seconds with 24-bit wraparound.
fn idle_seconds(clock: u32, entry_clock: u32) -> u32 {
    clock.wrapping_sub(entry_clock) & LRU_CLOCK_MASK
}

/// Morris counter decayed by `exp(-idle_minutes / half_life_minutes)`.
fn decayed_frequency(candidate: &SampledKey, params: &EvictionParams, clock: u32) -> f64 {
    let idle_minutes = idle_seconds(clock, candidate.lru_clock) as f64 / 60.0;
    let half_life = params.lfu_decay_minutes.max(1) as f64;
    candidate.lfu_counter as f64 * (-idle_minutes / half_life).exp()
}

fn far_future() -> Instant {
    Instant::now() + std::time::Duration::from_secs(60 * 60 * 24 * 365)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{StringValue, Value};
    use std::time::Duration;

    fn params(policy: MaxmemoryPolicy, maxmemory: u64) -> EvictionParams {
        EvictionParams {
            maxmemory,
            policy,
            samples: 5,
            lfu_decay_minutes: 60,
            max_evictions: 1024,
        }
    }

    fn fill(keyspace: &Keyspace, count: usize, payload: usize) {
        let payload = vec![b'x'; payload];
        for i in 0..count {
            keyspace.set(
                format!("key:{i:05}").as_bytes(),
                Value::String(StringValue::from_bytes(&payload)),
            );
        }
    }

    #[test]
    fn no_eviction_policy_never_evicts() {
        let keyspace = Keyspace::new();
        fill(&keyspace, 100, 200);
        let engine = EvictionEngine::new(params(MaxmemoryPolicy::NoEviction, 1024));
        assert!(!engine.needs_eviction(&keyspace));
        assert!(engine.write_refused(&keyspace));
        assert!(engine.evict(&keyspace).is_empty());
        assert_eq!(keyspace.dbsize(), 100);
    }

    #[test]
    fn evicts_down_to_ninety_percent() {
        let keyspace = Keyspace::new();
        fill(&keyspace, 200, 200);
        let budget = keyspace.used_memory() as u64 / 2;
        let engine = EvictionEngine::new(params(MaxmemoryPolicy::AllKeysRandom, budget));
        assert!(engine.needs_eviction(&keyspace));

        while engine.needs_eviction(&keyspace) {
            let evicted = engine.evict(&keyspace);
            assert!(!evicted.is_empty(), "eviction made no progress");
        }
        assert!(keyspace.used_memory() as u64 <= budget);
        assert!(keyspace.dbsize() < 200);
        assert!(engine.evicted_total() > 0);
    }

    #[test]
    fn volatile_policies_only_touch_ttl_keys() {
        let keyspace = Keyspace::new();
        fill(&keyspace, 50, 200);
        for i in 0..25 {
            keyspace.set_expire(
                format!("key:{i:05}").as_bytes(),
                Instant::now() + Duration::from_secs(1000),
            );
        }
        let engine = EvictionEngine::new(params(MaxmemoryPolicy::VolatileRandom, 1024));

        let mut evicted = Vec::new();
        loop {
            let round = engine.evict(&keyspace);
            if round.is_empty() {
                break;
            }
            evicted.extend(round);
        }
        // Everything evicted carried a TTL: the survivors are exactly the
        // 25 persistent keys.
        assert_eq!(evicted.len(), 25);
        assert_eq!(keyspace.dbsize(), 25);
        assert_eq!(keyspace.expires_size(), 0);
    }

    #[test]
    fn lru_prefers_idle_keys() {
        let clock = 1000u32;
        let mut candidates = vec![
            SampledKey {
                key: b"recent".to_vec(),
                expire_at: None,
                lru_clock: 990,
                lfu_counter: 5,
            },
            SampledKey {
                key: b"idle".to_vec(),
                expire_at: None,
                lru_clock: 100,
                lfu_counter: 5,
            },
        ];
        rank_candidates(
            &mut candidates,
            &params(MaxmemoryPolicy::AllKeysLru, 1),
            clock,
        );
        assert_eq!(candidates[0].key, b"idle".to_vec());
    }

    #[test]
    fn lru_idle_time_handles_wraparound() {
        // Entry touched just before the 24-bit clock wrapped.
        assert_eq!(idle_seconds(5, LRU_CLOCK_MASK - 5), 11);
        assert_eq!(idle_seconds(100, 40), 60);
    }

    #[test]
    fn lfu_prefers_cold_counters_with_decay() {
        let p = params(MaxmemoryPolicy::AllKeysLfu, 1);
        let clock = 7200u32; // two hours in
        let hot_recent = SampledKey {
            key: b"hot".to_vec(),
            expire_at: None,
            lru_clock: 7100,
            lfu_counter: 200,
        };
        let hot_stale = SampledKey {
            key: b"stale".to_vec(),
            expire_at: None,
            lru_clock: 0,
            lfu_counter: 200,
        };
        // Two hours idle at a 60-minute half-life decays e^-2.
        assert!(
            decayed_frequency(&hot_stale, &p, clock) < decayed_frequency(&hot_recent, &p, clock)
        );

        let mut candidates = vec![hot_recent, hot_stale];
        rank_candidates(&mut candidates, &p, clock);
        assert_eq!(candidates[0].key, b"stale".to_vec());
    }

    #[test]
    fn ttl_policy_prefers_nearest_deadline() {
        let soon = Instant::now() + Duration::from_secs(10);
        let later = Instant::now() + Duration::from_secs(1000);
        let mut candidates = vec![
            SampledKey {
                key: b"later".to_vec(),
                expire_at: Some(later),
                lru_clock: 0,
                lfu_counter: 0,
            },
            SampledKey {
                key: b"soon".to_vec(),
                expire_at: Some(soon),
                lru_clock: 0,
                lfu_counter: 0,
            },
        ];
        rank_candidates(
            &mut candidates,
            &params(MaxmemoryPolicy::VolatileTtl, 1),
            0,
        );
        assert_eq!(candidates[0].key, b"soon".to_vec());
    }
}
