//! # Server Configuration
//!
//! Purpose: One typed configuration struct covering the runtime knobs the
//! engine and server consume. Values load from TOML at startup and can be
//! read or rewritten at runtime through `CONFIG GET` / `CONFIG SET`, so
//! every field also has a canonical string form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EmberError, EmberResult};

/// Eviction policy applied when used memory exceeds `maxmemory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MaxmemoryPolicy {
    NoEviction,
    AllKeysLru,
    VolatileLru,
    AllKeysLfu,
    VolatileLfu,
    AllKeysRandom,
    VolatileRandom,
    VolatileTtl,
}

impl MaxmemoryPolicy {
    /// Canonical configuration string for the policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            MaxmemoryPolicy::NoEviction => "noeviction",
            MaxmemoryPolicy::AllKeysLru => "allkeys-lru",
            MaxmemoryPolicy::VolatileLru => "volatile-lru",
            MaxmemoryPolicy::AllKeysLfu => "allkeys-lfu",
            MaxmemoryPolicy::VolatileLfu => "volatile-lfu",
            MaxmemoryPolicy::AllKeysRandom => "allkeys-random",
            MaxmemoryPolicy::VolatileRandom => "volatile-random",
            MaxmemoryPolicy::VolatileTtl => "volatile-ttl",
        }
    }

    /// Returns true for the `volatile-*` family, which only considers keys
    /// carrying a TTL.
    pub fn is_volatile(&self) -> bool {
        matches!(
            self,
            MaxmemoryPolicy::VolatileLru
                | MaxmemoryPolicy::VolatileLfu
                | MaxmemoryPolicy::VolatileRandom
                | MaxmemoryPolicy::VolatileTtl
        )
    }
}

impl FromStr for MaxmemoryPolicy {
    type Err = EmberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "noeviction" => Ok(MaxmemoryPolicy::NoEviction),
            "allkeys-lru" => Ok(MaxmemoryPolicy::AllKeysLru),
            "volatile-lru" => Ok(MaxmemoryPolicy::VolatileLru),
            "allkeys-lfu" => Ok(MaxmemoryPolicy::AllKeysLfu),
            "volatile-lfu" => Ok(MaxmemoryPolicy::VolatileLfu),
            "allkeys-random" => Ok(MaxmemoryPolicy::AllKeysRandom),
            "volatile-random" => Ok(MaxmemoryPolicy::VolatileRandom),
            "volatile-ttl" => Ok(MaxmemoryPolicy::VolatileTtl),
            other => Err(EmberError::BadConfig(other.to_string())),
        }
    }
}

impl fmt::Display for MaxmemoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MaxmemoryPolicy {
    type Error = EmberError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MaxmemoryPolicy> for String {
    fn from(policy: MaxmemoryPolicy) -> String {
        policy.as_str().to_string()
    }
}

/// Runtime configuration for an EmberKV server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Interface the TCP listener binds to.
    pub bind: String,
    /// TCP port.
    pub port: u16,
    /// Memory budget in bytes; 0 means unbounded.
    pub maxmemory: u64,
    /// Eviction policy applied when over budget.
    pub maxmemory_policy: MaxmemoryPolicy,
    /// Sample constant N for approximated eviction (candidates drawn = 4N).
    pub maxmemory_samples: usize,
    /// Morris-counter log factor for LFU increments.
    pub lfu_log_factor: u32,
    /// LFU half-life in minutes for exponential decay.
    pub lfu_decay_time_minutes: u64,
    /// I/O worker count; 0 = auto (max(2, cores - 1)), 1 = single worker.
    pub io_threads: usize,
    /// Keys sampled per shard per active-expire iteration.
    pub active_expire_cycle_effort: usize,
    /// Free-effort threshold above which destruction goes to the reclaimer.
    pub lazyfree_threshold_effort: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: 6379,
            maxmemory: 0,
            maxmemory_policy: MaxmemoryPolicy::NoEviction,
            maxmemory_samples: 5,
            lfu_log_factor: 10,
            lfu_decay_time_minutes: 60,
            io_threads: 0,
            active_expire_cycle_effort: 20,
            lazyfree_threshold_effort: 64,
        }
    }
}

impl Config {
    /// Parses a TOML document into a configuration, filling omitted fields
    /// with defaults.
    pub fn from_toml_str(text: &str) -> EmberResult<Config> {
        toml::from_str(text).map_err(|e| EmberError::Internal(format!("config parse: {e}")))
    }

    /// Resolves the effective I/O worker count.
    pub fn effective_io_threads(&self, cores: usize) -> usize {
        match self.io_threads {
            0 => cores.saturating_sub(1).max(2),
            n => n,
        }
    }

    /// Returns the value of a parameter by its configuration name.
    pub fn get_param(&self, name: &str) -> Option<String> {
        match name.to_ascii_lowercase().as_str() {
            "maxmemory" => Some(self.maxmemory.to_string()),
            "maxmemory-policy" => Some(self.maxmemory_policy.to_string()),
            "maxmemory-samples" => Some(self.maxmemory_samples.to_string()),
            "lfu-log-factor" => Some(self.lfu_log_factor.to_string()),
            "lfu-decay-time-minutes" => Some(self.lfu_decay_time_minutes.to_string()),
            "io-threads" => Some(self.io_threads.to_string()),
            "active-expire-cycle-effort" => Some(self.active_expire_cycle_effort.to_string()),
            "lazyfree-threshold-effort" => Some(self.lazyfree_threshold_effort.to_string()),
            _ => None,
        }
    }

    /// Applies a `CONFIG SET` style update. `io-threads` is start-time only
    /// and rejected here, matching the Redis behavior for thread counts.
    pub fn set_param(&mut self, name: &str, value: &str) -> EmberResult<()> {
        match name.to_ascii_lowercase().as_str() {
            "maxmemory" => {
                self.maxmemory = parse_memory(value)?;
                Ok(())
            }
            "maxmemory-policy" => {
                self.maxmemory_policy = value.parse()?;
                Ok(())
            }
            "maxmemory-samples" => {
                self.maxmemory_samples = parse_positive(name, value)?;
                Ok(())
            }
            "lfu-log-factor" => {
                self.lfu_log_factor = parse_positive(name, value)? as u32;
                Ok(())
            }
            "lfu-decay-time-minutes" => {
                self.lfu_decay_time_minutes = parse_positive(name, value)? as u64;
                Ok(())
            }
            "active-expire-cycle-effort" => {
                self.active_expire_cycle_effort = parse_positive(name, value)?;
                Ok(())
            }
            "lazyfree-threshold-effort" => {
                self.lazyfree_threshold_effort = parse_positive(name, value)?;
                Ok(())
            }
            other => Err(EmberError::BadConfig(other.to_string())),
        }
    }
}

fn parse_positive(name: &str, value: &str) -> EmberResult<usize> {
    let parsed: usize = value
        .parse()
        .map_err(|_| EmberError::BadConfig(name.to_string()))?;
    if parsed == 0 {
        return Err(EmberError::BadConfig(name.to_string()));
    }
    Ok(parsed)
}

/// Parses a memory size with optional Redis-style unit suffix.
///
/// `k`/`m`/`g` are powers of 1000, `kb`/`mb`/`gb` powers of 1024; a bare
/// number is bytes.
pub fn parse_memory(value: &str) -> EmberResult<u64> {
    let value = value.trim().to_ascii_lowercase();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    if digits.is_empty() {
        return Err(EmberError::BadConfig("maxmemory".to_string()));
    }
    let base: u64 = digits
        .parse()
        .map_err(|_| EmberError::BadConfig("maxmemory".to_string()))?;
    let multiplier: u64 = match unit {
        "" | "b" => 1,
        "k" => 1_000,
        "kb" => 1 << 10,
        "m" => 1_000_000,
        "mb" => 1 << 20,
        "g" => 1_000_000_000,
        "gb" => 1 << 30,
        _ => return Err(EmberError::BadConfig("maxmemory".to_string())),
    };
    base.checked_mul(multiplier)
        .ok_or_else(|| EmberError::BadConfig("maxmemory".to_string()))
}
