//! # Slot Hashing
//!
//! Purpose: Map keys onto the 16,384 logical slots with the Redis-compatible
//! CRC16 (XMODEM polynomial) and hash-tag semantics: when a key contains a
//! non-empty `{...}` section, only that section is hashed, so callers can
//! pin related keys to one slot.

use crc::{CRC_16_XMODEM, Crc};

/// Number of logical keyspace slots.
pub const SLOT_COUNT: usize = 16_384;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Returns the slot a key belongs to.
pub fn slot_of(key: &[u8]) -> u16 {
    (CRC16.checksum(hash_tag(key)) as usize & (SLOT_COUNT - 1)) as u16
}

/// Extracts the hash-tag section of a key, or the whole key when there is
/// no non-empty `{...}` pair. Only the first `{` and the first `}` after it
/// count, matching the Redis rules.
fn hash_tag(key: &[u8]) -> &[u8] {
    let Some(open) = key.iter().position(|&b| b == b'{') else {
        return key;
    };
    let Some(close_offset) = key[open + 1..].iter().position(|&b| b == b'}') else {
        return key;
    };
    if close_offset == 0 {
        // "{}" hashes the whole key.
        return key;
    }
    &key[open + 1..open + 1 + close_offset]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_crc16_slots() {
        // Reference values from the Redis cluster specification.
        assert_eq!(slot_of(b"123456789"), 0x31C3 & (SLOT_COUNT as u16 - 1));
        assert_eq!(slot_of(b"foo"), slot_of(b"foo"));
    }

    #[test]
    fn hash_tags_pin_keys_together() {
        assert_eq!(slot_of(b"{user1000}.following"), slot_of(b"{user1000}.followers"));
        assert_eq!(slot_of(b"foo{bar}baz"), slot_of(b"bar"));
    }

    #[test]
    fn empty_or_unclosed_tags_hash_whole_key() {
        assert_eq!(hash_tag(b"foo{}bar"), b"foo{}bar");
        assert_eq!(hash_tag(b"foo{bar"), b"foo{bar");
        assert_eq!(hash_tag(b"foo}bar{"), b"foo}bar{");
        assert_eq!(hash_tag(b"plain"), b"plain");
    }

    #[test]
    fn only_first_tag_counts() {
        assert_eq!(hash_tag(b"{a}{b}"), b"a");
        assert_eq!(hash_tag(b"x{a}y{b}z"), b"a");
    }

    #[test]
    fn slots_stay_in_range() {
        for i in 0..1000 {
            let key = format!("key:{i}");
            assert!((slot_of(key.as_bytes()) as usize) < SLOT_COUNT);
        }
    }
}
