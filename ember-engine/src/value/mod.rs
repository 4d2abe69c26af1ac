//! # Encoded Values
//!
//! Purpose: The polymorphic value layer. `Value` is a tagged enum over the
//! seven data-structure variants; each variant carries its own encoding enum
//! internally. Commands dispatch with one outer match (here) plus one inner
//! match (inside the variant), so hot paths never touch a vtable.
//!
//! Encoding upgrades happen at the end of write operations inside each
//! variant; read paths never transition. Downgrades only happen through
//! full replacement of the value.

pub mod hash;
pub mod hll;
pub mod intset;
pub mod list;
pub mod set;
pub mod skiplist;
pub mod stream;
pub mod string;
pub mod zset;

pub use hash::{FieldTtl, HashValue};
pub use hll::HllValue;
pub use list::ListValue;
pub use set::SetValue;
pub use stream::{StreamEntry, StreamId, StreamValue};
pub use string::StringValue;
pub use zset::{ScoreBound, SortedSetValue, ZAddOutcome};

use ember_common::{EmberError, EmberResult};

/// A keyspace value: one of the seven data-structure variants.
#[derive(Debug, Clone)]
pub enum Value {
    String(StringValue),
    List(ListValue),
    Set(SetValue),
    SortedSet(SortedSetValue),
    Hash(HashValue),
    Stream(StreamValue),
    HyperLogLog(HllValue),
}

impl Value {
    /// TYPE reply name for the variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
            Value::Hash(_) => "hash",
            Value::Stream(_) => "stream",
            // HLLs read as strings on the wire, matching the PF* commands.
            Value::HyperLogLog(_) => "string",
        }
    }

    /// OBJECT ENCODING reply name for the current representation.
    pub fn encoding_name(&self) -> &'static str {
        match self {
            Value::String(s) => s.encoding_name(),
            Value::List(l) => l.encoding_name(),
            Value::Set(s) => s.encoding_name(),
            Value::SortedSet(z) => z.encoding_name(),
            Value::Hash(h) => h.encoding_name(),
            Value::Stream(_) => "stream",
            Value::HyperLogLog(_) => "dense",
        }
    }

    /// Element count used for the free-effort and size computations.
    fn element_count(&self) -> usize {
        match self {
            Value::String(_) => 1,
            Value::List(l) => l.len(),
            Value::Set(s) => s.len(),
            Value::SortedSet(z) => z.len(),
            Value::Hash(h) => h.encoding_len(),
            Value::Stream(s) => s.len(),
            Value::HyperLogLog(_) => 1,
        }
    }

    /// Approximate heap footprint in bytes, per the per-type estimates used
    /// for eviction accounting. Drift against the allocator is reconciled
    /// periodically, not per operation.
    pub fn size_estimate(&self) -> usize {
        match self {
            Value::String(s) => 24 + s.length(),
            Value::List(l) => 24 + 16 * l.len(),
            Value::Set(s) => 24 + 16 * s.len(),
            Value::SortedSet(z) => 24 + 32 * z.len(),
            Value::Hash(h) => 24 + 24 * h.encoding_len(),
            Value::Stream(s) => 24 + 128 * s.len(),
            Value::HyperLogLog(_) => 24 + HllValue::dense_bytes(),
        }
    }

    /// Logical destruction cost: the number of allocations a destructor
    /// must release. Values above the lazy-free threshold are reclaimed on
    /// a background worker instead of inline.
    pub fn free_effort(&self) -> usize {
        match self {
            Value::String(_) => 1,
            Value::HyperLogLog(_) => 1,
            Value::Stream(_) => 100,
            other => other.element_count(),
        }
    }

    /// Borrows the string variant or fails with WrongType.
    pub fn as_string(&self) -> EmberResult<&StringValue> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(EmberError::WrongType),
        }
    }

    /// Mutably borrows the string variant or fails with WrongType.
    pub fn as_string_mut(&mut self) -> EmberResult<&mut StringValue> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(EmberError::WrongType),
        }
    }

    pub fn as_list(&self) -> EmberResult<&ListValue> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(EmberError::WrongType),
        }
    }

    pub fn as_list_mut(&mut self) -> EmberResult<&mut ListValue> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(EmberError::WrongType),
        }
    }

    pub fn as_set(&self) -> EmberResult<&SetValue> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(EmberError::WrongType),
        }
    }

    pub fn as_set_mut(&mut self) -> EmberResult<&mut SetValue> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(EmberError::WrongType),
        }
    }

    pub fn as_zset(&self) -> EmberResult<&SortedSetValue> {
        match self {
            Value::SortedSet(z) => Ok(z),
            _ => Err(EmberError::WrongType),
        }
    }

    pub fn as_zset_mut(&mut self) -> EmberResult<&mut SortedSetValue> {
        match self {
            Value::SortedSet(z) => Ok(z),
            _ => Err(EmberError::WrongType),
        }
    }

    pub fn as_hash_mut(&mut self) -> EmberResult<&mut HashValue> {
        match self {
            Value::Hash(h) => Ok(h),
            _ => Err(EmberError::WrongType),
        }
    }

    pub fn as_stream(&self) -> EmberResult<&StreamValue> {
        match self {
            Value::Stream(s) => Ok(s),
            _ => Err(EmberError::WrongType),
        }
    }

    pub fn as_stream_mut(&mut self) -> EmberResult<&mut StreamValue> {
        match self {
            Value::Stream(s) => Ok(s),
            _ => Err(EmberError::WrongType),
        }
    }

    pub fn as_hll(&self) -> EmberResult<&HllValue> {
        match self {
            Value::HyperLogLog(h) => Ok(h),
            _ => Err(EmberError::WrongType),
        }
    }

    pub fn as_hll_mut(&mut self) -> EmberResult<&mut HllValue> {
        match self {
            Value::HyperLogLog(h) => Ok(h),
            _ => Err(EmberError::WrongType),
        }
    }
}
