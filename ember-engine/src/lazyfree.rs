//! # Lazy-Free Reclaimer
//!
//! Purpose: Asynchronous destruction of large values. Deleting a list with
//! a million elements releases a million allocations; doing that inline
//! would stall the command loop. Destruction jobs above the effort
//! threshold go to two dedicated worker threads consuming an unbounded MPSC
//! queue; small values are destroyed inline by the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::value::Value;

/// A queued destruction job.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Number of dedicated destruction workers.
const WORKER_COUNT: usize = 2;
/// How long shutdown waits for the queue to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Background reclaimer with two worker threads.
pub struct Reclaimer {
    tx: Mutex<Option<Sender<Job>>>,
    pending: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
    threshold: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Reclaimer {
    /// Starts the reclaimer. `threshold` is the free-effort above which a
    /// value is destroyed in the background instead of inline.
    pub fn start(threshold: usize) -> Arc<Reclaimer> {
        let (tx, rx) = unbounded::<Job>();
        let pending = Arc::new(AtomicU64::new(0));
        let completed = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(WORKER_COUNT);
        for worker_id in 0..WORKER_COUNT {
            let rx: Receiver<Job> = rx.clone();
            let pending = Arc::clone(&pending);
            let completed = Arc::clone(&completed);
            workers.push(std::thread::spawn(move || {
                debug!(worker_id, "lazy-free worker started");
                // Runs until the sender side is dropped and the queue drains.
                while let Ok(job) = rx.recv() {
                    job();
                    pending.fetch_sub(1, Ordering::Release);
                    completed.fetch_add(1, Ordering::Relaxed);
                }
                debug!(worker_id, "lazy-free worker stopped");
            }));
        }

        Arc::new(Reclaimer {
            tx: Mutex::new(Some(tx)),
            pending,
            completed,
            threshold,
            workers: Mutex::new(workers),
        })
    }

    /// Destroys a value: inline when cheap, on a worker when its free-effort
    /// exceeds the threshold.
    pub fn queue_free(&self, value: Value) {
        if value.free_effort() <= self.threshold {
            drop(value);
            return;
        }
        self.defer(move || drop(value));
    }

    /// Destroys an arbitrary container (a flushed shard map) in the
    /// background. The caller applies the shard-size threshold.
    pub fn queue_flush<T: Send + 'static>(&self, container: T) {
        self.defer(move || drop(container));
    }

    fn defer(&self, job: impl FnOnce() + Send + 'static) {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                self.pending.fetch_add(1, Ordering::Acquire);
                if tx.send(Box::new(job)).is_err() {
                    // Workers already gone; destroy inline as a last resort.
                    self.pending.fetch_sub(1, Ordering::Release);
                }
            }
            // Shutdown already started; destroy inline.
            None => {}
        }
    }

    /// Jobs queued but not yet destroyed.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Jobs destroyed so far.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Stops accepting jobs and waits up to 5 s for the queue to drain,
    /// then joins the workers. Safe to call more than once.
    pub fn shutdown(&self) {
        let sender = self.tx.lock().take();
        drop(sender);

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if self.pending() > 0 {
            warn!(
                pending = self.pending(),
                "lazy-free drain timed out; detaching workers"
            );
            return;
        }
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ListValue, StringValue};

    fn big_list(elements: usize) -> Value {
        let mut list = ListValue::new();
        for i in 0..elements {
            list.push_tail(i.to_string().into_bytes());
        }
        Value::List(list)
    }

    #[test]
    fn small_values_free_inline() {
        let reclaimer = Reclaimer::start(64);
        reclaimer.queue_free(Value::String(StringValue::from_bytes(b"x")));
        reclaimer.queue_free(big_list(10));
        assert_eq!(reclaimer.pending(), 0);
        assert_eq!(reclaimer.completed(), 0);
        reclaimer.shutdown();
    }

    #[test]
    fn large_values_free_on_workers() {
        let reclaimer = Reclaimer::start(64);
        for _ in 0..10 {
            reclaimer.queue_free(big_list(500));
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while reclaimer.completed() < 10 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(reclaimer.completed(), 10);
        assert_eq!(reclaimer.pending(), 0);
        reclaimer.shutdown();
    }

    #[test]
    fn shutdown_drains_queue() {
        let reclaimer = Reclaimer::start(0);
        for _ in 0..100 {
            reclaimer.queue_free(big_list(100));
        }
        reclaimer.shutdown();
        assert_eq!(reclaimer.pending(), 0);
        assert_eq!(reclaimer.completed(), 100);
        // Jobs after shutdown are destroyed inline without panicking.
        reclaimer.queue_free(big_list(100));
    }

    #[test]
    fn flush_containers_are_deferred() {
        let reclaimer = Reclaimer::start(64);
        let map: Vec<(Vec<u8>, Value)> = (0..100)
            .map(|i| (format!("k{i}").into_bytes(), big_list(2)))
            .collect();
        reclaimer.queue_flush(map);
        reclaimer.shutdown();
        assert_eq!(reclaimer.completed(), 1);
    }
}
