//! # Stream Values
//!
//! Purpose: Append-only entry log with `ms-seq` identifiers. Entry IDs are
//! strictly increasing; auto-generated IDs take the wall-clock millisecond
//! and bump the sequence when several entries land in the same millisecond.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use ember_common::{EmberError, EmberResult};

/// A stream entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    /// Parses `ms`, `ms-seq`, or the range shorthands `-` / `+`. When the
    /// sequence is omitted it defaults to `default_seq` (0 for range starts,
    /// u64::MAX for range ends).
    pub fn parse(text: &[u8], default_seq: u64) -> EmberResult<StreamId> {
        match text {
            b"-" => return Ok(StreamId::MIN),
            b"+" => return Ok(StreamId::MAX),
            _ => {}
        }
        let text = std::str::from_utf8(text).map_err(|_| EmberError::InvalidStreamId)?;
        let (ms_text, seq_text) = match text.split_once('-') {
            Some((ms, seq)) => (ms, Some(seq)),
            None => (text, None),
        };
        let ms: u64 = ms_text.parse().map_err(|_| EmberError::InvalidStreamId)?;
        let seq: u64 = match seq_text {
            Some(seq) => seq.parse().map_err(|_| EmberError::InvalidStreamId)?,
            None => default_seq,
        };
        Ok(StreamId { ms, seq })
    }

    fn next_after(self) -> Option<StreamId> {
        if self.seq < u64::MAX {
            Some(StreamId {
                ms: self.ms,
                seq: self.seq + 1,
            })
        } else if self.ms < u64::MAX {
            Some(StreamId {
                ms: self.ms + 1,
                seq: 0,
            })
        } else {
            None
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One stream entry: an ID plus field/value pairs.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

/// An append-only stream value.
#[derive(Debug, Clone, Default)]
pub struct StreamValue {
    entries: Vec<StreamEntry>,
    last_id: Option<StreamId>,
}

impl StreamValue {
    /// Creates an empty stream.
    pub fn new() -> StreamValue {
        StreamValue::default()
    }

    /// Appends an entry. `id` of None asks for an auto-generated ID;
    /// an explicit ID must be strictly greater than the last one.
    pub fn append(
        &mut self,
        id: Option<StreamId>,
        fields: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> EmberResult<StreamId> {
        let id = match id {
            Some(explicit) => {
                if let Some(last) = self.last_id {
                    if explicit <= last {
                        return Err(EmberError::StreamIdTooSmall);
                    }
                }
                explicit
            }
            None => self.generate_id()?,
        };
        self.entries.push(StreamEntry { id, fields });
        self.last_id = Some(id);
        Ok(id)
    }

    fn generate_id(&self) -> EmberResult<StreamId> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let candidate = StreamId { ms: now_ms, seq: 0 };
        match self.last_id {
            Some(last) if candidate <= last => last
                .next_after()
                .ok_or_else(|| EmberError::Internal("stream id space exhausted".to_string())),
            _ => Ok(candidate),
        }
    }

    /// Entries with IDs in the inclusive range `[start, end]`, capped at
    /// `count` when given.
    pub fn range(&self, start: StreamId, end: StreamId, count: Option<usize>) -> Vec<&StreamEntry> {
        let from = self.entries.partition_point(|e| e.id < start);
        let iter = self.entries[from..]
            .iter()
            .take_while(move |e| e.id <= end);
        match count {
            Some(cap) => iter.take(cap).collect(),
            None => iter.collect(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the stream holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// ID of the newest entry.
    pub fn last_id(&self) -> Option<StreamId> {
        self.last_id
    }
}
