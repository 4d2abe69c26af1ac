//! # Expiration Sweeper
//!
//! Purpose: Active TTL maintenance on a 100 ms cadence. Lazy read-path
//! expiry already guarantees correctness; the sweeper exists to reclaim
//! memory held by keys nobody reads again. Each tick samples the expiry
//! index per shard and repeats while the expired ratio stays above 25%,
//! capped at roughly a quarter of the tick's wall time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use crate::keyspace::Keyspace;

/// Sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);
/// CPU soft cap per tick: ~25% of the cadence.
const SWEEP_BUDGET: Duration = Duration::from_millis(25);
/// Iteration cap per shard within one tick.
const MAX_ITERATIONS: usize = 16;
/// Memory estimates are recounted every this many ticks to fix drift.
const RECOUNT_EVERY: u64 = 100;

/// Handle for the background expiration sweeper.
///
/// Call `stop` to signal shutdown and join the thread.
pub struct ExpirationHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    removed: Arc<AtomicUsize>,
}

impl ExpirationHandle {
    /// Stops the sweeper and waits for the thread to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    /// Total keys removed by active sweeps so far.
    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::Relaxed)
    }
}

/// Starts the maintenance thread: active expiration on every tick plus a
/// periodic memory recount. `effort` is the per-shard sample size
/// (`active-expire-cycle-effort`).
pub fn start_sweeper(keyspace: &Arc<Keyspace>, effort: usize) -> ExpirationHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let removed = Arc::new(AtomicUsize::new(0));
    let stop_thread = Arc::clone(&stop);
    let removed_thread = Arc::clone(&removed);
    let keyspace = Arc::clone(keyspace);

    let join = std::thread::Builder::new()
        .name("ember-sweeper".to_string())
        .spawn(move || {
            let mut ticks: u64 = 0;
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(SWEEP_INTERVAL);
                ticks += 1;

                let swept =
                    keyspace.cleanup_expired_with_budget(effort, MAX_ITERATIONS, SWEEP_BUDGET);
                if swept > 0 {
                    removed_thread.fetch_add(swept, Ordering::Relaxed);
                    debug!(swept, "active expire cycle");
                }

                if ticks % RECOUNT_EVERY == 0 {
                    keyspace.recount_memory();
                }
            }
        })
        .expect("spawn sweeper thread");

    ExpirationHandle {
        stop,
        join: Some(join),
        removed,
    }
}
