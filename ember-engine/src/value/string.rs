//! # String Values
//!
//! Purpose: Redis-compatible string values with three internal encodings.
//!
//! ## Design Principles
//!
//! 1. **Int Fast Path**: Values that parse as a signed 64-bit integer are
//!    stored as the integer itself; INCR-family commands never re-parse.
//! 2. **Embedded Short Strings**: Payloads up to 44 bytes live in a fixed
//!    inline buffer (length-prefixed buffer pattern), avoiding a heap
//!    allocation per small value.
//! 3. **One-Way Downgrades**: Int may degrade to Raw (e.g. APPEND); the
//!    reverse only happens on full replacement.

use ember_common::{EmberError, EmberResult};

/// Longest payload stored inline without a heap allocation.
pub const EMBEDDED_MAX: usize = 44;

/// Inline buffer for short strings.
#[derive(Clone)]
struct EmbeddedBuf {
    len: u8,
    data: [u8; EMBEDDED_MAX],
}

impl EmbeddedBuf {
    fn new(payload: &[u8]) -> EmbeddedBuf {
        debug_assert!(payload.len() <= EMBEDDED_MAX);
        let mut buf = EmbeddedBuf {
            len: payload.len() as u8,
            data: [0u8; EMBEDDED_MAX],
        };
        buf.data[..payload.len()].copy_from_slice(payload);
        buf
    }

    fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// Internal representation of a string value.
#[derive(Clone)]
enum StringRepr {
    /// Fits a signed 64-bit integer.
    Int(i64),
    /// Short payload stored inline.
    Embedded(EmbeddedBuf),
    /// General heap-allocated payload.
    Raw(Vec<u8>),
}

/// A string value with encoding transitions.
#[derive(Clone)]
pub struct StringValue {
    repr: StringRepr,
}

impl std::fmt::Debug for StringValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StringValue({}, {:?})",
            self.encoding_name(),
            String::from_utf8_lossy(&self.bytes())
        )
    }
}

impl StringValue {
    /// Creates a string value, picking the densest encoding for the payload.
    pub fn from_bytes(payload: &[u8]) -> StringValue {
        let repr = match parse_strict_i64(payload) {
            Some(n) => StringRepr::Int(n),
            None if payload.len() <= EMBEDDED_MAX => StringRepr::Embedded(EmbeddedBuf::new(payload)),
            None => StringRepr::Raw(payload.to_vec()),
        };
        StringValue { repr }
    }

    /// Creates an int-encoded string value.
    pub fn from_int(n: i64) -> StringValue {
        StringValue {
            repr: StringRepr::Int(n),
        }
    }

    /// Replaces the payload entirely. Full replacement may re-enter any
    /// encoding, including Int.
    pub fn set_bytes(&mut self, payload: &[u8]) {
        *self = StringValue::from_bytes(payload);
    }

    /// Replaces the payload with an integer.
    pub fn set_int(&mut self, n: i64) {
        self.repr = StringRepr::Int(n);
    }

    /// Materializes the payload as bytes.
    pub fn bytes(&self) -> Vec<u8> {
        match &self.repr {
            StringRepr::Int(n) => n.to_string().into_bytes(),
            StringRepr::Embedded(buf) => buf.as_bytes().to_vec(),
            StringRepr::Raw(data) => data.clone(),
        }
    }

    /// Payload length in bytes.
    pub fn length(&self) -> usize {
        match &self.repr {
            StringRepr::Int(n) => decimal_len(*n),
            StringRepr::Embedded(buf) => buf.len as usize,
            StringRepr::Raw(data) => data.len(),
        }
    }

    /// Interprets the payload as a signed 64-bit integer.
    pub fn try_as_int(&self) -> EmberResult<i64> {
        match &self.repr {
            StringRepr::Int(n) => Ok(*n),
            StringRepr::Embedded(buf) => {
                parse_strict_i64(buf.as_bytes()).ok_or(EmberError::NotAnInteger)
            }
            StringRepr::Raw(data) => parse_strict_i64(data).ok_or(EmberError::NotAnInteger),
        }
    }

    /// Interprets the payload as a float.
    pub fn try_as_float(&self) -> EmberResult<f64> {
        match &self.repr {
            StringRepr::Int(n) => Ok(*n as f64),
            StringRepr::Embedded(buf) => parse_strict_f64(buf.as_bytes()),
            StringRepr::Raw(data) => parse_strict_f64(data),
        }
    }

    /// Adds `delta` to the integer payload, failing on parse or overflow.
    pub fn incr_by(&mut self, delta: i64) -> EmberResult<i64> {
        let current = self.try_as_int()?;
        let next = current.checked_add(delta).ok_or(EmberError::OutOfRange)?;
        self.repr = StringRepr::Int(next);
        Ok(next)
    }

    /// Adds `delta` to the float payload, failing on parse, NaN, or infinity.
    pub fn incr_by_float(&mut self, delta: f64) -> EmberResult<f64> {
        let current = self.try_as_float()?;
        let next = current + delta;
        if !next.is_finite() {
            return Err(EmberError::OutOfRange);
        }
        self.set_bytes(format_float(next).as_bytes());
        Ok(next)
    }

    /// Appends `payload` and returns the new length. The result is always
    /// Raw-encoded, whatever the previous encoding was; only full
    /// replacement re-enters a compact encoding.
    pub fn append(&mut self, payload: &[u8]) -> usize {
        let mut data = self.bytes();
        data.extend_from_slice(payload);
        let len = data.len();
        self.repr = StringRepr::Raw(data);
        len
    }

    /// Returns the inclusive byte range `[start, end]` with negative indices
    /// counting from the tail; empty when the normalized range is inverted.
    pub fn range(&self, start: i64, end: i64) -> Vec<u8> {
        let data = self.bytes();
        let len = data.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let start = normalize_index(start, len).max(0);
        let end = normalize_index(end, len).min(len - 1);
        if start > end {
            return Vec::new();
        }
        data[start as usize..=end as usize].to_vec()
    }

    /// Writes `payload` at `offset`, zero-padding any gap, and returns the
    /// new length.
    pub fn set_range(&mut self, offset: usize, payload: &[u8]) -> usize {
        let mut data = self.bytes();
        let needed = offset + payload.len();
        if data.len() < needed {
            data.resize(needed, 0);
        }
        data[offset..needed].copy_from_slice(payload);
        let len = data.len();
        self.set_bytes(&data);
        len
    }

    /// OBJECT ENCODING name for the current representation.
    pub fn encoding_name(&self) -> &'static str {
        match &self.repr {
            StringRepr::Int(_) => "int",
            StringRepr::Embedded(_) => "embstr",
            StringRepr::Raw(_) => "raw",
        }
    }
}

/// Normalizes a possibly-negative index against `len` without clamping.
fn normalize_index(idx: i64, len: i64) -> i64 {
    if idx < 0 { len + idx } else { idx }
}

/// Strict base-10 i64 parse: optional sign, no leading zeros beyond "0",
/// no surrounding whitespace. Mirrors the Redis string-to-long rules so
/// "07" stays a plain string and round-trips byte-identically.
pub(crate) fn parse_strict_i64(data: &[u8]) -> Option<i64> {
    if data.is_empty() || data.len() > 20 {
        return None;
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return None;
    }
    if digits.len() > 1 && digits[0] == b'0' {
        return None;
    }
    if negative && digits == b"0" {
        return None;
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?;
        let digit = (b - b'0') as i64;
        value = if negative {
            value.checked_sub(digit)?
        } else {
            value.checked_add(digit)?
        };
    }
    Some(value)
}

fn parse_strict_f64(data: &[u8]) -> EmberResult<f64> {
    let text = std::str::from_utf8(data).map_err(|_| EmberError::NotAFloat)?;
    let trimmed = text.trim();
    if trimmed != text || trimmed.is_empty() {
        return Err(EmberError::NotAFloat);
    }
    let value: f64 = trimmed.parse().map_err(|_| EmberError::NotAFloat)?;
    if value.is_nan() {
        return Err(EmberError::NotAFloat);
    }
    Ok(value)
}

/// Formats a float the way Redis replies do: integral values drop the
/// fractional part ("3" not "3.0").
pub fn format_float(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e17 {
        format!("{}", value as i64)
    } else {
        let mut text = format!("{value:.17}");
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
        text
    }
}

fn decimal_len(n: i64) -> usize {
    // itoa-free digit count; i64::MIN has 20 characters with the sign.
    let mut len = if n < 0 { 1 } else { 0 };
    let mut magnitude = (n as i128).unsigned_abs();
    loop {
        len += 1;
        magnitude /= 10;
        if magnitude == 0 {
            break;
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_densest_encoding() {
        assert_eq!(StringValue::from_bytes(b"123").encoding_name(), "int");
        assert_eq!(StringValue::from_bytes(b"hello").encoding_name(), "embstr");
        let long = vec![b'x'; EMBEDDED_MAX + 1];
        assert_eq!(StringValue::from_bytes(&long).encoding_name(), "raw");
    }

    #[test]
    fn leading_zeros_are_not_ints() {
        assert_eq!(StringValue::from_bytes(b"07").encoding_name(), "embstr");
        assert_eq!(StringValue::from_bytes(b"-0").encoding_name(), "embstr");
        assert_eq!(StringValue::from_bytes(b"0").encoding_name(), "int");
    }

    #[test]
    fn round_trips_bytes() {
        for payload in [&b"42"[..], b"hello", b"", b"  spaced  "] {
            let value = StringValue::from_bytes(payload);
            assert_eq!(value.bytes(), payload);
            assert_eq!(value.length(), payload.len());
        }
    }

    #[test]
    fn incr_by_updates_and_overflows() {
        let mut value = StringValue::from_bytes(b"10");
        assert_eq!(value.incr_by(5).unwrap(), 15);
        assert_eq!(value.bytes(), b"15");

        let mut max = StringValue::from_int(i64::MAX);
        assert_eq!(max.incr_by(1), Err(EmberError::OutOfRange));

        let mut text = StringValue::from_bytes(b"abc");
        assert_eq!(text.incr_by(1), Err(EmberError::NotAnInteger));
    }

    #[test]
    fn incr_by_float_formats_like_redis() {
        let mut value = StringValue::from_bytes(b"10.5");
        assert_eq!(value.incr_by_float(0.1).unwrap(), 10.6);
        assert_eq!(value.bytes(), b"10.6");

        let mut whole = StringValue::from_bytes(b"5");
        whole.incr_by_float(5.0).unwrap();
        assert_eq!(whole.bytes(), b"10");
        assert_eq!(whole.encoding_name(), "int");
    }

    #[test]
    fn append_always_downgrades_to_raw() {
        let mut value = StringValue::from_int(12);
        let len = value.append(b"ab");
        assert_eq!(len, 4);
        assert_eq!(value.bytes(), b"12ab");
        assert_eq!(value.encoding_name(), "raw");

        let mut short = StringValue::from_bytes(b"hi");
        short.append(b"!");
        assert_eq!(short.encoding_name(), "raw");
    }

    #[test]
    fn range_handles_negative_indices() {
        let value = StringValue::from_bytes(b"Hello World");
        assert_eq!(value.range(0, 4), b"Hello");
        assert_eq!(value.range(-5, -1), b"World");
        assert_eq!(value.range(0, -1), b"Hello World");
        assert_eq!(value.range(6, 3), b"");
        assert_eq!(value.range(0, 1000), b"Hello World");
    }

    #[test]
    fn set_range_zero_pads() {
        let mut value = StringValue::from_bytes(b"Hello");
        let len = value.set_range(7, b"World");
        assert_eq!(len, 12);
        assert_eq!(value.bytes(), b"Hello\0\0World");
    }

    #[test]
    fn full_replacement_may_return_to_int() {
        let mut value = StringValue::from_bytes(b"notanumber");
        value.set_bytes(b"77");
        assert_eq!(value.encoding_name(), "int");
        assert_eq!(value.try_as_int().unwrap(), 77);
    }
}
