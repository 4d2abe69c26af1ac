//! # EmberKV Server
//!
//! The network face of the engine: RESP2/RESP3 codec, command dispatch,
//! connection handling with Pub/Sub and transactions, the partitioned
//! command loops, and server metrics.

pub mod commands;
pub mod conn;
pub mod metrics;
pub mod resp;
pub mod server;
pub mod state;

pub use server::{Server, ServerHandle};
pub use state::ServerState;
