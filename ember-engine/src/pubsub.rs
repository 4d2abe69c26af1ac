//! # Pub/Sub Router
//!
//! Purpose: Channel and glob-pattern subscription fan-out. The forward
//! tables map channel→subscribers and pattern→subscribers in insertion
//! order; a reverse index mirrors both per client so disconnect costs
//! O(subscriptions-of-client), not O(all-subscriptions).
//!
//! The router holds weak subscriber handles: the connection owns the strong
//! reference, so a dropped client can never be kept alive by its own
//! subscriptions. A failed delivery is logged and counted, never
//! propagated; `publish` still reports the subscriber count observed under
//! the router lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use ember_common::glob_match;

/// Identifies one connected client.
pub type ClientId = u64;

/// A frame delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubMessage {
    /// `message <channel> <payload>` from an exact subscription.
    Message {
        channel: Vec<u8>,
        payload: Vec<u8>,
    },
    /// `pmessage <pattern> <channel> <payload>` from a pattern subscription.
    PatternMessage {
        pattern: Vec<u8>,
        channel: Vec<u8>,
        payload: Vec<u8>,
    },
}

/// Delivery seam between the router and the connection layer. The server
/// implements this with its outbound queue; a delivery returning false
/// (dropped client, full queue) is counted and skipped.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, message: PubSubMessage) -> bool;
}

struct ClientSubs {
    handle: Weak<dyn Subscriber>,
    channels: Vec<Vec<u8>>,
    patterns: Vec<Vec<u8>>,
}

impl ClientSubs {
    fn new(handle: &Arc<dyn Subscriber>) -> ClientSubs {
        ClientSubs {
            handle: Arc::downgrade(handle),
            channels: Vec::new(),
            patterns: Vec::new(),
        }
    }

    fn total(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

#[derive(Default)]
struct RouterInner {
    /// channel -> subscribers, insertion order.
    channels: HashMap<Vec<u8>, Vec<ClientId>, RandomState>,
    /// pattern -> subscribers, insertion order.
    patterns: HashMap<Vec<u8>, Vec<ClientId>, RandomState>,
    /// Reverse index, kept in lockstep with the forward maps.
    clients: HashMap<ClientId, ClientSubs, RandomState>,
}

/// The Pub/Sub router.
#[derive(Default)]
pub struct PubSubRouter {
    inner: RwLock<RouterInner>,
    delivery_failures: AtomicU64,
}

impl PubSubRouter {
    pub fn new() -> PubSubRouter {
        PubSubRouter::default()
    }

    /// Subscribes a client to exact channels. Returns, per channel, the
    /// client's total subscription count after that channel was added (the
    /// confirmation frame payload).
    pub fn subscribe(
        &self,
        client: ClientId,
        handle: &Arc<dyn Subscriber>,
        channels: &[Vec<u8>],
    ) -> Vec<(Vec<u8>, usize)> {
        let mut inner = self.inner.write();
        let mut confirmations = Vec::with_capacity(channels.len());
        for channel in channels {
            let subs = inner.channels.entry(channel.clone()).or_default();
            if !subs.contains(&client) {
                subs.push(client);
            }
            let entry = inner
                .clients
                .entry(client)
                .or_insert_with(|| ClientSubs::new(handle));
            entry.handle = Arc::downgrade(handle);
            if !entry.channels.contains(channel) {
                entry.channels.push(channel.clone());
            }
            confirmations.push((channel.clone(), entry.total()));
        }
        confirmations
    }

    /// Subscribes a client to glob patterns; same confirmation shape.
    pub fn psubscribe(
        &self,
        client: ClientId,
        handle: &Arc<dyn Subscriber>,
        patterns: &[Vec<u8>],
    ) -> Vec<(Vec<u8>, usize)> {
        let mut inner = self.inner.write();
        let mut confirmations = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let subs = inner.patterns.entry(pattern.clone()).or_default();
            if !subs.contains(&client) {
                subs.push(client);
            }
            let entry = inner
                .clients
                .entry(client)
                .or_insert_with(|| ClientSubs::new(handle));
            entry.handle = Arc::downgrade(handle);
            if !entry.patterns.contains(pattern) {
                entry.patterns.push(pattern.clone());
            }
            confirmations.push((pattern.clone(), entry.total()));
        }
        confirmations
    }

    /// Unsubscribes from the given channels, or from all channels when
    /// `channels` is empty. Returns confirmations with the remaining count.
    pub fn unsubscribe(&self, client: ClientId, channels: &[Vec<u8>]) -> Vec<(Vec<u8>, usize)> {
        let mut inner = self.inner.write();
        let targets: Vec<Vec<u8>> = if channels.is_empty() {
            inner
                .clients
                .get(&client)
                .map(|c| c.channels.clone())
                .unwrap_or_default()
        } else {
            channels.to_vec()
        };

        let mut confirmations = Vec::with_capacity(targets.len().max(1));
        for channel in &targets {
            Self::detach(&mut inner.channels, channel, client);
            let remaining = match inner.clients.get_mut(&client) {
                Some(entry) => {
                    entry.channels.retain(|c| c != channel);
                    entry.total()
                }
                None => 0,
            };
            confirmations.push((channel.clone(), remaining));
        }
        // Redis still confirms an UNSUBSCRIBE with no subscriptions.
        if confirmations.is_empty() {
            confirmations.push((Vec::new(), Self::count_of(&inner, client)));
        }
        Self::drop_if_empty(&mut inner, client);
        confirmations
    }

    /// Pattern counterpart of `unsubscribe`.
    pub fn punsubscribe(&self, client: ClientId, patterns: &[Vec<u8>]) -> Vec<(Vec<u8>, usize)> {
        let mut inner = self.inner.write();
        let targets: Vec<Vec<u8>> = if patterns.is_empty() {
            inner
                .clients
                .get(&client)
                .map(|c| c.patterns.clone())
                .unwrap_or_default()
        } else {
            patterns.to_vec()
        };

        let mut confirmations = Vec::with_capacity(targets.len().max(1));
        for pattern in &targets {
            Self::detach(&mut inner.patterns, pattern, client);
            let remaining = match inner.clients.get_mut(&client) {
                Some(entry) => {
                    entry.patterns.retain(|p| p != pattern);
                    entry.total()
                }
                None => 0,
            };
            confirmations.push((pattern.clone(), remaining));
        }
        if confirmations.is_empty() {
            confirmations.push((Vec::new(), Self::count_of(&inner, client)));
        }
        Self::drop_if_empty(&mut inner, client);
        confirmations
    }

    /// Publishes to every matching exact and pattern subscriber, in
    /// insertion order. Returns the number of subscribers observed under
    /// the lock; delivery failures are counted, not subtracted.
    pub fn publish(&self, channel: &[u8], payload: &[u8]) -> usize {
        let inner = self.inner.read();
        let mut delivered = 0;
        let mut failures = 0;

        if let Some(subs) = inner.channels.get(channel) {
            for &client in subs {
                delivered += 1;
                let message = PubSubMessage::Message {
                    channel: channel.to_vec(),
                    payload: payload.to_vec(),
                };
                if !Self::send_to(&inner, client, message) {
                    failures += 1;
                }
            }
        }

        for (pattern, subs) in inner.patterns.iter() {
            if !glob_match(pattern, channel) {
                continue;
            }
            for &client in subs {
                delivered += 1;
                let message = PubSubMessage::PatternMessage {
                    pattern: pattern.clone(),
                    channel: channel.to_vec(),
                    payload: payload.to_vec(),
                };
                if !Self::send_to(&inner, client, message) {
                    failures += 1;
                }
            }
        }
        drop(inner);

        if failures > 0 {
            self.delivery_failures.fetch_add(failures, Ordering::Relaxed);
            debug!(failures, "pub/sub deliveries dropped");
        }
        delivered
    }

    /// Detaches every subscription of a disconnecting client atomically.
    pub fn remove_client(&self, client: ClientId) {
        let mut inner = self.inner.write();
        let Some(entry) = inner.clients.remove(&client) else {
            return;
        };
        // The reverse index names exactly the forward buckets to touch.
        for channel in &entry.channels {
            Self::detach(&mut inner.channels, channel, client);
        }
        for pattern in &entry.patterns {
            Self::detach(&mut inner.patterns, pattern, client);
        }
    }

    /// Number of subscriptions (channels + patterns) a client holds.
    pub fn subscription_count(&self, client: ClientId) -> usize {
        Self::count_of(&self.inner.read(), client)
    }

    /// Live channels, optionally filtered by a glob pattern (PUBSUB
    /// CHANNELS).
    pub fn channels(&self, filter: Option<&[u8]>) -> Vec<Vec<u8>> {
        let inner = self.inner.read();
        inner
            .channels
            .iter()
            .filter(|(channel, subs)| {
                !subs.is_empty() && filter.map_or(true, |f| glob_match(f, channel))
            })
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Subscriber counts for the given channels (PUBSUB NUMSUB).
    pub fn numsub(&self, channels: &[Vec<u8>]) -> Vec<(Vec<u8>, usize)> {
        let inner = self.inner.read();
        channels
            .iter()
            .map(|channel| {
                let count = inner.channels.get(channel).map(|s| s.len()).unwrap_or(0);
                (channel.clone(), count)
            })
            .collect()
    }

    /// Number of distinct live patterns (PUBSUB NUMPAT).
    pub fn numpat(&self) -> usize {
        self.inner
            .read()
            .patterns
            .values()
            .filter(|subs| !subs.is_empty())
            .count()
    }

    /// Deliveries dropped because a subscriber was gone or refused.
    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }

    /// True when the router holds no subscriptions at all.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.channels.is_empty() && inner.patterns.is_empty() && inner.clients.is_empty()
    }

    fn send_to(inner: &RouterInner, client: ClientId, message: PubSubMessage) -> bool {
        match inner.clients.get(&client).and_then(|c| c.handle.upgrade()) {
            Some(handle) => handle.deliver(message),
            None => false,
        }
    }

    fn detach(
        map: &mut HashMap<Vec<u8>, Vec<ClientId>, RandomState>,
        target: &[u8],
        client: ClientId,
    ) {
        if let Some(subs) = map.get_mut(target) {
            subs.retain(|&c| c != client);
            if subs.is_empty() {
                map.remove(target);
            }
        }
    }

    fn count_of(inner: &RouterInner, client: ClientId) -> usize {
        inner.clients.get(&client).map(|c| c.total()).unwrap_or(0)
    }

    fn drop_if_empty(inner: &mut RouterInner, client: ClientId) {
        let empty = inner
            .clients
            .get(&client)
            .map(|c| c.total() == 0)
            .unwrap_or(false);
        if empty {
            inner.clients.remove(&client);
        }
    }
}
