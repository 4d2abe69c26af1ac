//! # Server State
//!
//! Purpose: The single shared context threaded through every connection and
//! command loop. The ACL table and Pub/Sub router are cross-shard
//! singletons owned here — explicit handles, not process globals.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use ember_common::Config;
use ember_engine::acl::{AclAuthorizer, AclUser};
use ember_engine::evict::{EvictionEngine, EvictionParams};
use ember_engine::keyspace::Keyspace;
use ember_engine::lazyfree::Reclaimer;
use ember_engine::pubsub::{ClientId, PubSubRouter};

use crate::metrics::Metrics;

/// Shared server-wide state.
pub struct ServerState {
    pub keyspace: Arc<Keyspace>,
    pub config: Mutex<Config>,
    pub acl: AclAuthorizer,
    pub pubsub: PubSubRouter,
    pub evictor: EvictionEngine,
    pub reclaimer: Arc<Reclaimer>,
    pub metrics: Metrics,
    pub started_at: Instant,
    next_client_id: AtomicU64,
}

impl ServerState {
    /// Wires the engine subsystems together from a configuration.
    pub fn initialize(config: Config, partitions: usize) -> Arc<ServerState> {
        let keyspace = Arc::new(Keyspace::with_partitions(partitions));
        keyspace.set_lfu_log_factor(config.lfu_log_factor);

        let reclaimer = Reclaimer::start(config.lazyfree_threshold_effort);
        keyspace.attach_reclaimer(Arc::clone(&reclaimer));

        let evictor = EvictionEngine::new(EvictionParams {
            maxmemory: config.maxmemory,
            policy: config.maxmemory_policy,
            samples: config.maxmemory_samples,
            lfu_decay_minutes: config.lfu_decay_time_minutes,
            max_evictions: 32,
        });

        Arc::new(ServerState {
            keyspace,
            config: Mutex::new(config),
            acl: AclAuthorizer::new(),
            pubsub: PubSubRouter::new(),
            evictor,
            reclaimer,
            metrics: Metrics::new(),
            started_at: Instant::now(),
            next_client_id: AtomicU64::new(1),
        })
    }

    /// Allocates a fresh connection identifier.
    pub fn next_client_id(&self) -> ClientId {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Pushes the current config into the eviction engine after a
    /// CONFIG SET.
    pub fn refresh_eviction_params(&self) {
        let config = self.config.lock();
        self.evictor.reconfigure(EvictionParams {
            maxmemory: config.maxmemory,
            policy: config.maxmemory_policy,
            samples: config.maxmemory_samples,
            lfu_decay_minutes: config.lfu_decay_time_minutes,
            max_evictions: 32,
        });
        self.keyspace.set_lfu_log_factor(config.lfu_log_factor);
    }
}

/// Per-connection state: authentication, protocol version, transaction
/// bookkeeping, and Pub/Sub mode.
pub struct ConnState {
    pub id: ClientId,
    /// Authenticated user; starts as the default user when it is open.
    pub user: Option<Arc<AclUser>>,
    /// Negotiated RESP protocol version (2 or 3).
    pub proto: u8,
    pub in_multi: bool,
    /// Commands queued since MULTI.
    pub queued: Vec<Vec<Vec<u8>>>,
    /// Set when a queued command failed to validate; EXEC must abort.
    pub multi_error: bool,
    /// WATCHed keys with the version observed at WATCH time.
    pub watches: Vec<(Vec<u8>, u64)>,
    /// Channels + patterns this connection subscribed to.
    pub subscriptions: usize,
}

impl ConnState {
    pub fn new(id: ClientId, state: &ServerState) -> ConnState {
        // The default user authenticates implicitly while it is passwordless.
        let user = state
            .acl
            .get_user("default")
            .filter(|user| user.enabled && user.nopass);
        ConnState {
            id,
            user,
            proto: 2,
            in_multi: false,
            queued: Vec::new(),
            multi_error: false,
            watches: Vec::new(),
            subscriptions: 0,
        }
    }

    /// Clears transaction state (EXEC, DISCARD, RESET).
    pub fn clear_transaction(&mut self) {
        self.in_multi = false;
        self.queued.clear();
        self.multi_error = false;
        self.watches.clear();
    }
}
