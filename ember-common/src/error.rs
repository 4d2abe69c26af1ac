//! # Error Types
//!
//! Purpose: Define the error vocabulary shared by the engine and server.
//! Every variant renders as the exact RESP error line a client receives,
//! so command handlers can turn any failure into a reply without mapping
//! tables.

use thiserror::Error;

/// Result alias used across the EmberKV crates.
pub type EmberResult<T> = Result<T, EmberError>;

/// Errors produced by the engine and the command layer.
///
/// `Display` strings are the wire messages. Variants that carry a payload
/// interpolate it into the message; the server writes `Display` output
/// verbatim after the `-` marker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmberError {
    /// Command issued against a key holding an incompatible value type.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Malformed argument list or option combination.
    #[error("ERR syntax error")]
    Syntax,

    /// Argument expected to be an integer could not be parsed as one.
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    /// Argument expected to be a float could not be parsed as one.
    #[error("ERR value is not a valid float")]
    NotAFloat,

    /// Numeric overflow on INCR/DECR or score arithmetic.
    #[error("ERR increment or decrement would overflow")]
    OutOfRange,

    /// Index outside the addressable range of the value.
    #[error("ERR index out of range")]
    IndexOutOfRange,

    /// Expire argument that cannot be represented as a deadline.
    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(String),

    /// Operation referenced a key that must exist (e.g. RENAME source).
    #[error("ERR no such key")]
    NoSuchKey,

    /// Authentication failed or the user is disabled.
    #[error("WRONGPASS invalid username-password pair or user is disabled.")]
    AuthFailed,

    /// The authenticated user may not run this command or touch this key.
    #[error("NOPERM this user has no permissions to run the '{0}' command or access the requested resource")]
    NoPermission(String),

    /// Authentication required before any other command.
    #[error("NOAUTH Authentication required.")]
    AuthRequired,

    /// A queued transaction command failed to parse; EXEC refuses to run.
    #[error("EXECABORT Transaction discarded because of previous errors.")]
    ExecAborted,

    /// Command arrived while the partition queue was full or a write timed out.
    #[error("OVERLOAD server command queue is full")]
    Overload,

    /// Wrong number of arguments for a known command.
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    /// Command name not present in the dispatch table.
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Stream IDs must be strictly greater than the last entry.
    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    /// Invalid stream ID format.
    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidStreamId,

    /// Memory limit reached and the active policy refuses writes.
    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    OutOfMemory,

    /// Unknown or read-only configuration parameter.
    #[error("ERR Unknown option or number of arguments for CONFIG SET - '{0}'")]
    BadConfig(String),

    /// Catch-all for internal invariant failures; logged with context.
    #[error("ERR internal error: {0}")]
    Internal(String),
}

impl EmberError {
    /// Returns true when the error should be counted as a client fault
    /// rather than a server fault in metrics.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EmberError::Internal(_) | EmberError::Overload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_messages_match_redis_conventions() {
        assert_eq!(
            EmberError::WrongType.to_string(),
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        );
        assert_eq!(
            EmberError::WrongArity("get".into()).to_string(),
            "ERR wrong number of arguments for 'get' command"
        );
        assert!(EmberError::ExecAborted.to_string().starts_with("EXECABORT"));
        assert!(EmberError::AuthFailed.to_string().starts_with("WRONGPASS"));
    }

    #[test]
    fn internal_errors_are_server_faults() {
        assert!(!EmberError::Internal("boom".into()).is_client_error());
        assert!(EmberError::WrongType.is_client_error());
    }
}
