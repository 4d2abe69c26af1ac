//! # Reply Model
//!
//! Purpose: Represent every outbound reply shape the command layer can
//! produce, independent of the wire encoding. The server serializes a
//! `Reply` as RESP2 or RESP3 depending on the protocol negotiated with
//! `HELLO`; RESP3-only shapes degrade to RESP2 equivalents.

use crate::error::EmberError;

/// A typed reply produced by a command implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// +OK style simple strings.
    Simple(String),
    /// -ERR style error lines (full message, including the prefix word).
    Error(String),
    /// :123 integers.
    Integer(i64),
    /// $-prefixed bulk strings; `None` is the null bulk.
    Bulk(Option<Vec<u8>>),
    /// *-prefixed arrays; `None` is the null array (RESP2 WATCH abort).
    Array(Option<Vec<Reply>>),
    /// RESP3 null (`_`); sent as a null bulk on RESP2 connections.
    Null,
    /// RESP3 boolean (`#`); sent as :1/:0 on RESP2 connections.
    Boolean(bool),
    /// RESP3 double (`,`); sent as a bulk string on RESP2 connections.
    Double(f64),
    /// RESP3 map (`%`); sent as a flat array on RESP2 connections.
    Map(Vec<(Reply, Reply)>),
    /// RESP3 set (`~`); sent as an array on RESP2 connections.
    Set(Vec<Reply>),
    /// RESP3 push frame (`>`); Pub/Sub messages on RESP2 use a plain array.
    Push(Vec<Reply>),
}

impl Reply {
    /// The canonical +OK reply.
    pub fn ok() -> Reply {
        Reply::Simple("OK".to_string())
    }

    /// A bulk reply holding a copy of `data`.
    pub fn bulk(data: &[u8]) -> Reply {
        Reply::Bulk(Some(data.to_vec()))
    }

    /// A bulk reply from a UTF-8 string.
    pub fn bulk_string(data: impl Into<String>) -> Reply {
        Reply::Bulk(Some(data.into().into_bytes()))
    }

    /// The null bulk reply (absent key, per Redis convention).
    pub fn nil() -> Reply {
        Reply::Bulk(None)
    }

    /// An array reply from the given items.
    pub fn array(items: Vec<Reply>) -> Reply {
        Reply::Array(Some(items))
    }

    /// An empty array reply.
    pub fn empty_array() -> Reply {
        Reply::Array(Some(Vec::new()))
    }

    /// Returns true for `Error` replies.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl From<EmberError> for Reply {
    fn from(err: EmberError) -> Reply {
        Reply::Error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_converts_to_error_reply() {
        let reply: Reply = EmberError::WrongType.into();
        assert!(reply.is_error());
        match reply {
            Reply::Error(msg) => assert!(msg.starts_with("WRONGTYPE")),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn helpers_build_expected_shapes() {
        assert_eq!(Reply::ok(), Reply::Simple("OK".into()));
        assert_eq!(Reply::nil(), Reply::Bulk(None));
        assert_eq!(Reply::bulk(b"x"), Reply::Bulk(Some(b"x".to_vec())));
    }
}
