// ember-common - Shared error, reply, config, and pattern types for EmberKV
//
// This crate defines the vocabulary shared by the engine and the server.

pub mod config;
pub mod error;
pub mod glob;
pub mod reply;

// Re-export for convenience
pub use config::{Config, MaxmemoryPolicy};
pub use error::{EmberError, EmberResult};
pub use glob::glob_match;
pub use reply::Reply;
