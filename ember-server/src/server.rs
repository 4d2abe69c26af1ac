//! # Server Core
//!
//! Purpose: The accept loop, the worker affinity counter, and the
//! partitioned command loops. Connection tasks parse and enqueue; one OS
//! thread per keyspace partition pops its bounded queue and executes
//! commands to completion, giving single-threaded command semantics per
//! partition.
//!
//! Shutdown order: stop accepting, signal connections, let command loops
//! drain their queues (5 s hard timeout), stop the sweeper, drain the
//! reclaimer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use ember_common::{Config, EmberError, Reply};
use ember_engine::expire::{ExpirationHandle, start_sweeper};

use crate::commands;
use crate::conn::handle_connection;
use crate::state::{ConnState, ServerState};

/// Bound on each partition's command queue; overflow rejects the command
/// with an overload error instead of blocking the I/O worker.
const COMMAND_QUEUE_DEPTH: usize = 10_000;
/// Hard cap on shutdown drain time.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// One queued command awaiting its partition's command loop.
pub struct CommandJob {
    pub argv: Vec<Vec<u8>>,
    pub conn: Arc<Mutex<ConnState>>,
    pub reply_tx: tokio::sync::oneshot::Sender<Reply>,
}

/// The partitioned command loops and their input queues.
pub struct Dispatcher {
    queues: Vec<Sender<CommandJob>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Spawns one command-loop thread per keyspace partition.
    pub fn start(state: Arc<ServerState>) -> Arc<Dispatcher> {
        let partitions = state.keyspace.partition_count();
        let stopping = Arc::new(AtomicBool::new(false));
        let mut queues = Vec::with_capacity(partitions);
        let mut loops = Vec::with_capacity(partitions);

        for partition in 0..partitions {
            let (tx, rx) = bounded::<CommandJob>(COMMAND_QUEUE_DEPTH);
            queues.push(tx);
            let state = Arc::clone(&state);
            let stopping = Arc::clone(&stopping);
            let handle = std::thread::Builder::new()
                .name(format!("ember-cmd-{partition}"))
                .spawn(move || command_loop(partition, state, rx, stopping))
                .expect("spawn command loop");
            loops.push(handle);
        }

        Arc::new(Dispatcher {
            queues,
            loops: Mutex::new(loops),
            stopping,
        })
    }

    /// Enqueues a job on a partition; a full queue reports overload.
    pub fn dispatch(&self, partition: usize, job: CommandJob) -> Result<(), EmberError> {
        let queue = self
            .queues
            .get(partition)
            .ok_or_else(|| EmberError::Internal(format!("no partition {partition}")))?;
        match queue.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(EmberError::Overload)
            }
        }
    }

    /// Signals the loops to drain and waits up to the shutdown timeout.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        let mut loops = self.loops.lock();
        for handle in loops.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("command loop did not drain in time; detaching");
            }
        }
    }
}

/// One partition's executor: pops jobs in FIFO order and runs each to
/// completion. Commands are never aborted mid-flight.
fn command_loop(
    partition: usize,
    state: Arc<ServerState>,
    rx: Receiver<CommandJob>,
    stopping: Arc<AtomicBool>,
) {
    debug!(partition, "command loop started");
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => run_job(&state, job),
            Err(RecvTimeoutError::Timeout) => {
                if stopping.load(Ordering::Acquire) {
                    // Drain whatever is still queued, then exit.
                    while let Ok(job) = rx.try_recv() {
                        run_job(&state, job);
                    }
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(partition, "command loop stopped");
}

fn run_job(state: &ServerState, job: CommandJob) {
    let started = Instant::now();
    state.metrics.record_command_start();
    let reply = {
        let mut conn = job.conn.lock();
        commands::execute(state, &mut conn, &job.argv)
    };
    state.metrics.record_command_end(started.elapsed());
    // The client may have disconnected while the command was queued.
    let _ = job.reply_tx.send(reply);
}

/// A configured, not-yet-started server.
pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Server {
        Server { config }
    }

    /// Binds the listener and spawns the accept loop, command loops, and
    /// maintenance thread. Returns a handle owning the whole lifecycle.
    pub async fn start(self) -> anyhow::Result<ServerHandle> {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        let io_workers = self.config.effective_io_threads(cores);
        // One command loop per partition; partitions track core count.
        let partitions = cores.max(1);

        let effort = self.config.active_expire_cycle_effort;
        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let state = ServerState::initialize(self.config, partitions);
        let dispatcher = Dispatcher::start(Arc::clone(&state));
        let sweeper = start_sweeper(&state.keyspace, effort);

        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, io_workers, partitions, "emberkv listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_state = Arc::clone(&state);
        let accept_dispatcher = Arc::clone(&dispatcher);
        let mut accept_shutdown = shutdown_rx.clone();
        let accept_task = tokio::spawn(async move {
            // Round-robin affinity: each accepted client sticks to one
            // worker index for its lifetime.
            let next_worker = AtomicUsize::new(0);
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else { continue };
                        let _ = stream.set_nodelay(true);
                        let worker_id =
                            next_worker.fetch_add(1, Ordering::Relaxed) % io_workers.max(1);
                        debug!(%peer, worker_id, "accepted connection");
                        let state = Arc::clone(&accept_state);
                        let dispatcher = Arc::clone(&accept_dispatcher);
                        let shutdown = accept_shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(err) =
                                handle_connection(stream, state, dispatcher, shutdown, worker_id)
                                    .await
                            {
                                debug!(error = %err, "connection ended with error");
                            }
                        });
                    }
                    _ = accept_shutdown.changed() => break,
                }
            }
        });

        Ok(ServerHandle {
            state,
            local_addr,
            dispatcher,
            sweeper: Some(sweeper),
            shutdown_tx,
            accept_task,
        })
    }
}

/// Owns a running server's lifecycle.
pub struct ServerHandle {
    pub state: Arc<ServerState>,
    pub local_addr: std::net::SocketAddr,
    dispatcher: Arc<Dispatcher>,
    sweeper: Option<ExpirationHandle>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Graceful shutdown: accept stops, connections unwind, command loops
    /// drain, maintenance and reclaimer stop last.
    pub async fn shutdown(mut self) {
        info!("shutting down");
        let _ = self.shutdown_tx.send(true);
        let _ = self.accept_task.await;
        self.dispatcher.shutdown();
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
        self.state.reclaimer.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_runs_jobs_in_order() {
        let state = ServerState::initialize(Config::default(), 2);
        let dispatcher = Dispatcher::start(Arc::clone(&state));
        let conn = Arc::new(Mutex::new(ConnState::new(state.next_client_id(), &state)));

        let mut receivers = Vec::new();
        for i in 0..10 {
            let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
            let argv = vec![
                b"SET".to_vec(),
                b"counter".to_vec(),
                i.to_string().into_bytes(),
            ];
            dispatcher
                .dispatch(0, CommandJob {
                    argv,
                    conn: Arc::clone(&conn),
                    reply_tx,
                })
                .unwrap();
            receivers.push(reply_rx);
        }
        for rx in receivers {
            assert_eq!(rx.blocking_recv().unwrap(), Reply::ok());
        }
        // FIFO per partition: the last write wins.
        let value = state
            .keyspace
            .view(b"counter", |v| v.as_string().unwrap().bytes())
            .unwrap();
        assert_eq!(value, b"9");
        dispatcher.shutdown();
    }

    #[test]
    fn dispatch_to_missing_partition_fails() {
        let state = ServerState::initialize(Config::default(), 1);
        let dispatcher = Dispatcher::start(Arc::clone(&state));
        let conn = Arc::new(Mutex::new(ConnState::new(state.next_client_id(), &state)));
        let (reply_tx, _reply_rx) = tokio::sync::oneshot::channel();
        let result = dispatcher.dispatch(
            9,
            CommandJob {
                argv: vec![b"PING".to_vec()],
                conn,
                reply_tx,
            },
        );
        assert!(result.is_err());
        dispatcher.shutdown();
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let state = ServerState::initialize(Config::default(), 1);
        let dispatcher = Dispatcher::start(Arc::clone(&state));
        let conn = Arc::new(Mutex::new(ConnState::new(state.next_client_id(), &state)));

        let mut receivers = Vec::new();
        for i in 0..100 {
            let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
            dispatcher
                .dispatch(0, CommandJob {
                    argv: vec![b"SET".to_vec(), format!("k{i}").into_bytes(), b"v".to_vec()],
                    conn: Arc::clone(&conn),
                    reply_tx,
                })
                .unwrap();
            receivers.push(reply_rx);
        }
        dispatcher.shutdown();
        // Every queued job completed before the loops exited.
        for rx in receivers {
            assert!(rx.blocking_recv().is_ok());
        }
        assert_eq!(state.keyspace.dbsize(), 100);
    }
}
