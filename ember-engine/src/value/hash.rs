//! # Hash Values
//!
//! Purpose: Field/value maps with a listpack encoding for small hashes and a
//! hash-table encoding above the thresholds. Fields may carry their own
//! expiration instant, tracked in a side map that is independent of the
//! encoding; reading an expired field deletes it transparently.

use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;

use ember_common::{EmberError, EmberResult};

use super::string::parse_strict_i64;

/// Field count above which a listpack hash converts to a table.
pub const HASH_MAX_LISTPACK_ENTRIES: usize = 128;
/// Field or value size above which a listpack hash converts to a table.
pub const HASH_MAX_LISTPACK_VALUE: usize = 64;

/// TTL state of one hash field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTtl {
    /// The field does not exist.
    NoField,
    /// The field exists without an expiration.
    NoTtl,
    /// Remaining lifetime.
    ExpiresIn(Duration),
}

#[derive(Debug, Clone)]
enum HashRepr {
    Listpack(Vec<(Vec<u8>, Vec<u8>)>),
    Table(HashMap<Vec<u8>, Vec<u8>, RandomState>),
}

/// A hash value with encoding transitions and per-field TTLs.
#[derive(Debug, Clone)]
pub struct HashValue {
    repr: HashRepr,
    /// field -> absolute expiration; independent of the encoding.
    field_ttls: HashMap<Vec<u8>, Instant, RandomState>,
}

impl Default for HashValue {
    fn default() -> Self {
        HashValue::new()
    }
}

impl HashValue {
    /// Creates an empty listpack-encoded hash.
    pub fn new() -> HashValue {
        HashValue {
            repr: HashRepr::Listpack(Vec::new()),
            field_ttls: HashMap::default(),
        }
    }

    /// Drops the field if its TTL has passed; returns true when it did.
    fn expire_field_if_due(&mut self, field: &[u8], now: Instant) -> bool {
        match self.field_ttls.get(field) {
            Some(&deadline) if now >= deadline => {
                self.remove_raw(field);
                self.field_ttls.remove(field);
                true
            }
            _ => false,
        }
    }

    fn remove_raw(&mut self, field: &[u8]) -> bool {
        match &mut self.repr {
            HashRepr::Listpack(items) => {
                let before = items.len();
                items.retain(|(f, _)| f != field);
                items.len() != before
            }
            HashRepr::Table(table) => table.remove(field).is_some(),
        }
    }

    /// Sets a field; returns true when the field was new. A write clears any
    /// pending TTL on the field, matching the whole-key SET behavior.
    pub fn hset(&mut self, field: &[u8], value: Vec<u8>, now: Instant) -> bool {
        self.expire_field_if_due(field, now);
        self.field_ttls.remove(field);
        let new = match &mut self.repr {
            HashRepr::Listpack(items) => match items.iter_mut().find(|(f, _)| f == field) {
                Some((_, existing)) => {
                    *existing = value;
                    false
                }
                None => {
                    items.push((field.to_vec(), value));
                    true
                }
            },
            HashRepr::Table(table) => table.insert(field.to_vec(), value).is_none(),
        };
        self.maybe_upgrade();
        new
    }

    /// Sets a field only when absent; returns true on insert.
    pub fn hset_if_absent(&mut self, field: &[u8], value: Vec<u8>, now: Instant) -> bool {
        self.expire_field_if_due(field, now);
        if self.get_raw(field).is_some() {
            return false;
        }
        self.hset(field, value, now)
    }

    fn get_raw(&self, field: &[u8]) -> Option<&[u8]> {
        match &self.repr {
            HashRepr::Listpack(items) => items
                .iter()
                .find(|(f, _)| f == field)
                .map(|(_, v)| v.as_slice()),
            HashRepr::Table(table) => table.get(field).map(|v| v.as_slice()),
        }
    }

    /// Reads a field, transparently deleting it when expired.
    pub fn hget(&mut self, field: &[u8], now: Instant) -> Option<Vec<u8>> {
        self.expire_field_if_due(field, now);
        self.get_raw(field).map(|v| v.to_vec())
    }

    /// Deletes a field; returns true when a live field was removed.
    pub fn hdel(&mut self, field: &[u8], now: Instant) -> bool {
        if self.expire_field_if_due(field, now) {
            return false;
        }
        self.field_ttls.remove(field);
        self.remove_raw(field)
    }

    /// Existence test with lazy field expiry.
    pub fn hexists(&mut self, field: &[u8], now: Instant) -> bool {
        self.expire_field_if_due(field, now);
        self.get_raw(field).is_some()
    }

    /// Raw stored field count, ignoring pending field expirations. Used for
    /// size estimates and free-effort, which tolerate slight staleness.
    pub fn encoding_len(&self) -> usize {
        match &self.repr {
            HashRepr::Listpack(items) => items.len(),
            HashRepr::Table(table) => table.len(),
        }
    }

    /// Live field count.
    pub fn hlen(&mut self, now: Instant) -> usize {
        self.purge_expired_fields(now);
        match &self.repr {
            HashRepr::Listpack(items) => items.len(),
            HashRepr::Table(table) => table.len(),
        }
    }

    /// All live field names.
    pub fn hkeys(&mut self, now: Instant) -> Vec<Vec<u8>> {
        self.purge_expired_fields(now);
        match &self.repr {
            HashRepr::Listpack(items) => items.iter().map(|(f, _)| f.clone()).collect(),
            HashRepr::Table(table) => table.keys().cloned().collect(),
        }
    }

    /// All live values.
    pub fn hvals(&mut self, now: Instant) -> Vec<Vec<u8>> {
        self.purge_expired_fields(now);
        match &self.repr {
            HashRepr::Listpack(items) => items.iter().map(|(_, v)| v.clone()).collect(),
            HashRepr::Table(table) => table.values().cloned().collect(),
        }
    }

    /// All live field/value pairs.
    pub fn hgetall(&mut self, now: Instant) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.purge_expired_fields(now);
        match &self.repr {
            HashRepr::Listpack(items) => items.clone(),
            HashRepr::Table(table) => table.iter().map(|(f, v)| (f.clone(), v.clone())).collect(),
        }
    }

    /// Adds `delta` to an integer field, creating it at `delta` when absent.
    pub fn hincr_by(&mut self, field: &[u8], delta: i64, now: Instant) -> EmberResult<i64> {
        self.expire_field_if_due(field, now);
        let next = match self.get_raw(field) {
            Some(raw) => {
                let current = parse_strict_i64(raw).ok_or(EmberError::NotAnInteger)?;
                current.checked_add(delta).ok_or(EmberError::OutOfRange)?
            }
            None => delta,
        };
        let had_ttl = self.field_ttls.get(field).copied();
        self.hset(field, next.to_string().into_bytes(), now);
        // HINCRBY preserves a live field TTL; only full HSET clears it.
        if let Some(deadline) = had_ttl {
            self.field_ttls.insert(field.to_vec(), deadline);
        }
        Ok(next)
    }

    /// Sets an absolute expiration on a field; false when the field is gone.
    pub fn expire_field(&mut self, field: &[u8], at: Instant, now: Instant) -> bool {
        self.expire_field_if_due(field, now);
        if self.get_raw(field).is_none() {
            return false;
        }
        self.field_ttls.insert(field.to_vec(), at);
        true
    }

    /// Clears a field's expiration; false when there was none to clear.
    pub fn persist_field(&mut self, field: &[u8], now: Instant) -> bool {
        self.expire_field_if_due(field, now);
        self.field_ttls.remove(field).is_some()
    }

    /// TTL state of a field.
    pub fn ttl_field(&mut self, field: &[u8], now: Instant) -> FieldTtl {
        self.expire_field_if_due(field, now);
        if self.get_raw(field).is_none() {
            return FieldTtl::NoField;
        }
        match self.field_ttls.get(field) {
            Some(&deadline) => FieldTtl::ExpiresIn(deadline.saturating_duration_since(now)),
            None => FieldTtl::NoTtl,
        }
    }

    /// OBJECT ENCODING name for the current representation.
    pub fn encoding_name(&self) -> &'static str {
        match &self.repr {
            HashRepr::Listpack(_) => "listpack",
            HashRepr::Table(_) => "hashtable",
        }
    }

    fn purge_expired_fields(&mut self, now: Instant) {
        if self.field_ttls.is_empty() {
            return;
        }
        let due: Vec<Vec<u8>> = self
            .field_ttls
            .iter()
            .filter(|(_, &deadline)| now >= deadline)
            .map(|(f, _)| f.clone())
            .collect();
        for field in due {
            self.remove_raw(&field);
            self.field_ttls.remove(&field);
        }
    }

    /// Checked at the end of every write; the transition is one-way.
    fn maybe_upgrade(&mut self) {
        let HashRepr::Listpack(items) = &mut self.repr else {
            return;
        };
        let oversized = items.len() > HASH_MAX_LISTPACK_ENTRIES
            || items
                .iter()
                .any(|(f, v)| f.len() > HASH_MAX_LISTPACK_VALUE || v.len() > HASH_MAX_LISTPACK_VALUE);
        if oversized {
            let mut table: HashMap<Vec<u8>, Vec<u8>, RandomState> = HashMap::default();
            table.extend(std::mem::take(items));
            self.repr = HashRepr::Table(table);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Instant {
        Instant::now()
    }

    #[test]
    fn set_get_delete() {
        let mut hash = HashValue::new();
        assert!(hash.hset(b"f", b"v".to_vec(), now()));
        assert!(!hash.hset(b"f", b"w".to_vec(), now()));
        assert_eq!(hash.hget(b"f", now()), Some(b"w".to_vec()));
        assert!(hash.hdel(b"f", now()));
        assert!(!hash.hdel(b"f", now()));
        assert_eq!(hash.hget(b"f", now()), None);
    }

    #[test]
    fn hset_if_absent_only_inserts() {
        let mut hash = HashValue::new();
        assert!(hash.hset_if_absent(b"f", b"v".to_vec(), now()));
        assert!(!hash.hset_if_absent(b"f", b"w".to_vec(), now()));
        assert_eq!(hash.hget(b"f", now()), Some(b"v".to_vec()));
    }

    #[test]
    fn hincr_by_creates_and_overflows() {
        let mut hash = HashValue::new();
        assert_eq!(hash.hincr_by(b"n", 5, now()).unwrap(), 5);
        assert_eq!(hash.hincr_by(b"n", -2, now()).unwrap(), 3);
        hash.hset(b"s", b"abc".to_vec(), now());
        assert_eq!(
            hash.hincr_by(b"s", 1, now()),
            Err(EmberError::NotAnInteger)
        );
        hash.hset(b"max", i64::MAX.to_string().into_bytes(), now());
        assert_eq!(hash.hincr_by(b"max", 1, now()), Err(EmberError::OutOfRange));
    }

    #[test]
    fn expired_field_reads_as_missing() {
        let mut hash = HashValue::new();
        let t0 = now();
        hash.hset(b"f", b"v".to_vec(), t0);
        assert!(hash.expire_field(b"f", t0 + Duration::from_millis(10), t0));

        let later = t0 + Duration::from_millis(20);
        assert_eq!(hash.hget(b"f", later), None);
        assert!(!hash.hexists(b"f", later));
        assert_eq!(hash.ttl_field(b"f", later), FieldTtl::NoField);
        assert_eq!(hash.hlen(later), 0);
    }

    #[test]
    fn field_ttl_lifecycle() {
        let mut hash = HashValue::new();
        let t0 = now();
        hash.hset(b"f", b"v".to_vec(), t0);
        assert_eq!(hash.ttl_field(b"f", t0), FieldTtl::NoTtl);

        assert!(hash.expire_field(b"f", t0 + Duration::from_secs(100), t0));
        match hash.ttl_field(b"f", t0) {
            FieldTtl::ExpiresIn(left) => assert!(left <= Duration::from_secs(100)),
            other => panic!("unexpected ttl {other:?}"),
        }

        assert!(hash.persist_field(b"f", t0));
        assert_eq!(hash.ttl_field(b"f", t0), FieldTtl::NoTtl);
        assert!(!hash.persist_field(b"f", t0));
        assert!(!hash.expire_field(b"missing", t0 + Duration::from_secs(1), t0));
    }

    #[test]
    fn overwrite_clears_field_ttl_but_hincr_keeps_it() {
        let mut hash = HashValue::new();
        let t0 = now();
        hash.hset(b"f", b"1".to_vec(), t0);
        hash.expire_field(b"f", t0 + Duration::from_secs(100), t0);

        hash.hincr_by(b"f", 1, t0).unwrap();
        assert!(matches!(hash.ttl_field(b"f", t0), FieldTtl::ExpiresIn(_)));

        hash.hset(b"f", b"9".to_vec(), t0);
        assert_eq!(hash.ttl_field(b"f", t0), FieldTtl::NoTtl);
    }

    #[test]
    fn upgrades_on_thresholds() {
        let mut hash = HashValue::new();
        for i in 0..=HASH_MAX_LISTPACK_ENTRIES {
            hash.hset(format!("f{i}").as_bytes(), b"v".to_vec(), now());
        }
        assert_eq!(hash.encoding_name(), "hashtable");

        let mut big = HashValue::new();
        big.hset(b"f", vec![b'x'; HASH_MAX_LISTPACK_VALUE + 1], now());
        assert_eq!(big.encoding_name(), "hashtable");
    }

    #[test]
    fn listpack_preserves_insertion_order() {
        let mut hash = HashValue::new();
        for f in ["one", "two", "three"] {
            hash.hset(f.as_bytes(), b"v".to_vec(), now());
        }
        assert_eq!(
            hash.hkeys(now()),
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
    }
}
