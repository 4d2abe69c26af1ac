//! # EmberKV Engine
//!
//! The runtime core: polymorphic encoded values, the 16,384-slot sharded
//! keyspace with per-key versioning, probabilistic expiration, memory-aware
//! eviction, the lazy-free reclaimer, the Pub/Sub router, and the ACL
//! authorizer. The engine is protocol-agnostic; the server crate layers the
//! RESP codec and command dispatch on top.

pub mod acl;
pub mod evict;
pub mod expire;
pub mod keyspace;
pub mod lazyfree;
pub mod pubsub;
pub mod value;

pub use acl::{AclAuthorizer, AclLogEntry, AclUser};
pub use evict::{EvictionEngine, EvictionParams};
pub use expire::{ExpirationHandle, start_sweeper};
pub use keyspace::{KeyEntry, Keyspace, SLOT_COUNT, slot_of};
pub use lazyfree::Reclaimer;
pub use pubsub::{ClientId, PubSubMessage, PubSubRouter, Subscriber};
pub use value::Value;
