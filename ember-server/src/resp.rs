//! # RESP Codec
//!
//! Purpose: Parse inbound RESP2 command frames incrementally and serialize
//! typed replies as RESP2 or RESP3 depending on the protocol the client
//! negotiated with HELLO.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: A frame split across reads parses once it is
//!    complete; nothing is consumed from the buffer until then.
//! 2. **Binary-Safe**: Bulk strings are raw bytes end to end.
//! 3. **Fail Fast**: Invalid framing surfaces immediately as a protocol
//!    error; the connection is closed after reporting it.
//! 4. **Graceful Degradation**: RESP3-only reply shapes have defined RESP2
//!    encodings, so command handlers never branch on the protocol.

use bytes::{Buf, BytesMut};

use ember_common::Reply;

/// Upper bound on a single bulk argument (512 MiB, the Redis limit).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Upper bound on arguments per command frame.
const MAX_ARGS: i64 = 1024 * 1024;

/// Framing failure; the connection reports it and closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    Protocol,
}

/// Incremental RESP2 request parser.
///
/// Commands arrive as arrays of bulk strings. `parse` returns `Ok(None)`
/// until a whole frame is buffered, then consumes it and returns the argv.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> RespParser {
        RespParser
    }

    /// Tries to parse one complete command from the front of `buffer`.
    pub fn parse(&mut self, buffer: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let mut pos = 0usize;
        let Some(line) = read_line(buffer, &mut pos)? else {
            return Ok(None);
        };
        if line.first() != Some(&b'*') {
            return Err(RespError::Protocol);
        }
        let count = parse_i64(&line[1..])?;
        if count < 0 || count > MAX_ARGS {
            return Err(RespError::Protocol);
        }

        let mut args = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let Some(header) = read_line(buffer, &mut pos)? else {
                return Ok(None);
            };
            if header.first() != Some(&b'$') {
                return Err(RespError::Protocol);
            }
            let len = parse_i64(&header[1..])?;
            if len < 0 || len > MAX_BULK_LEN {
                return Err(RespError::Protocol);
            }
            let len = len as usize;
            if buffer.len() < pos + len + 2 {
                return Ok(None);
            }
            let data = buffer[pos..pos + len].to_vec();
            if &buffer[pos + len..pos + len + 2] != b"\r\n" {
                return Err(RespError::Protocol);
            }
            pos += len + 2;
            args.push(data);
        }

        buffer.advance(pos);
        Ok(Some(args))
    }
}

/// Reads one CRLF-terminated line starting at `*pos` without consuming the
/// buffer; advances `*pos` past the terminator on success.
fn read_line<'a>(buffer: &'a BytesMut, pos: &mut usize) -> Result<Option<&'a [u8]>, RespError> {
    let data = &buffer[*pos..];
    let Some(nl) = data.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    if nl == 0 || data[nl - 1] != b'\r' {
        return Err(RespError::Protocol);
    }
    let line = &data[..nl - 1];
    *pos += nl + 1;
    Ok(Some(line))
}

fn parse_i64(data: &[u8]) -> Result<i64, RespError> {
    if data.is_empty() {
        return Err(RespError::Protocol);
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(RespError::Protocol);
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value
            .saturating_mul(10)
            .saturating_add((b - b'0') as i64);
    }
    Ok(if negative { -value } else { value })
}

/// Serializes a reply for the given protocol version (2 or 3).
pub fn encode_reply(reply: &Reply, proto: u8, out: &mut Vec<u8>) {
    match reply {
        Reply::Simple(text) => {
            out.push(b'+');
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Error(message) => {
            out.push(b'-');
            out.extend_from_slice(message.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Integer(value) => {
            out.push(b':');
            out.extend_from_slice(value.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Bulk(Some(data)) => write_bulk(data, out),
        Reply::Bulk(None) => {
            if proto >= 3 {
                out.extend_from_slice(b"_\r\n");
            } else {
                out.extend_from_slice(b"$-1\r\n");
            }
        }
        Reply::Array(Some(items)) => {
            out.push(b'*');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode_reply(item, proto, out);
            }
        }
        Reply::Array(None) => {
            if proto >= 3 {
                out.extend_from_slice(b"_\r\n");
            } else {
                out.extend_from_slice(b"*-1\r\n");
            }
        }
        Reply::Null => {
            if proto >= 3 {
                out.extend_from_slice(b"_\r\n");
            } else {
                out.extend_from_slice(b"$-1\r\n");
            }
        }
        Reply::Boolean(value) => {
            if proto >= 3 {
                out.extend_from_slice(if *value { b"#t\r\n" } else { b"#f\r\n" });
            } else {
                out.extend_from_slice(if *value { b":1\r\n" } else { b":0\r\n" });
            }
        }
        Reply::Double(value) => {
            let text = format_double(*value);
            if proto >= 3 {
                out.push(b',');
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"\r\n");
            } else {
                write_bulk(text.as_bytes(), out);
            }
        }
        Reply::Map(pairs) => {
            if proto >= 3 {
                out.push(b'%');
                out.extend_from_slice(pairs.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for (key, value) in pairs {
                    encode_reply(key, proto, out);
                    encode_reply(value, proto, out);
                }
            } else {
                // RESP2 renders a map as a flat key/value array.
                out.push(b'*');
                out.extend_from_slice((pairs.len() * 2).to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for (key, value) in pairs {
                    encode_reply(key, proto, out);
                    encode_reply(value, proto, out);
                }
            }
        }
        Reply::Set(items) => {
            out.push(if proto >= 3 { b'~' } else { b'*' });
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode_reply(item, proto, out);
            }
        }
        Reply::Push(items) => {
            // Pub/Sub frames: push type on RESP3, plain array on RESP2.
            out.push(if proto >= 3 { b'>' } else { b'*' });
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode_reply(item, proto, out);
            }
        }
    }
}

fn write_bulk(data: &[u8], out: &mut Vec<u8>) {
    out.push(b'$');
    out.extend_from_slice(data.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

fn format_double(value: f64) -> String {
    if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        ember_engine::value::string::format_float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Vec<Vec<u8>>> {
        let mut parser = RespParser::new();
        let mut buffer = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Ok(Some(args)) = parser.parse(&mut buffer) {
            frames.push(args);
        }
        frames
    }

    #[test]
    fn parses_complete_command() {
        let frames = parse_all(b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
        assert_eq!(frames, vec![vec![b"GET".to_vec(), b"key".to_vec()]]);
    }

    #[test]
    fn parses_pipelined_commands() {
        let frames = parse_all(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn waits_for_partial_frames() {
        let mut parser = RespParser::new();
        let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nke"[..]);
        assert_eq!(parser.parse(&mut buffer), Ok(None));
        // The partial frame stays buffered.
        assert!(!buffer.is_empty());

        buffer.extend_from_slice(b"y\r\n");
        let args = parser.parse(&mut buffer).unwrap().unwrap();
        assert_eq!(args[1], b"key");
        assert!(buffer.is_empty());
    }

    #[test]
    fn rejects_bad_framing() {
        let mut parser = RespParser::new();
        let mut buffer = BytesMut::from(&b"GET key\r\n"[..]);
        assert_eq!(parser.parse(&mut buffer), Err(RespError::Protocol));

        let mut buffer = BytesMut::from(&b"*1\r\n:5\r\n"[..]);
        assert_eq!(parser.parse(&mut buffer), Err(RespError::Protocol));
    }

    #[test]
    fn binary_safe_bulk_strings() {
        let frames = parse_all(b"*2\r\n$3\r\nSET\r\n$5\r\na\0\r\nb\r\n");
        assert_eq!(frames[0][1], b"a\0\r\nb");
    }

    fn encoded(reply: &Reply, proto: u8) -> Vec<u8> {
        let mut out = Vec::new();
        encode_reply(reply, proto, &mut out);
        out
    }

    #[test]
    fn encodes_resp2_basics() {
        assert_eq!(encoded(&Reply::ok(), 2), b"+OK\r\n");
        assert_eq!(encoded(&Reply::Integer(42), 2), b":42\r\n");
        assert_eq!(encoded(&Reply::bulk(b"hi"), 2), b"$2\r\nhi\r\n");
        assert_eq!(encoded(&Reply::nil(), 2), b"$-1\r\n");
        assert_eq!(encoded(&Reply::Array(None), 2), b"*-1\r\n");
        assert_eq!(
            encoded(&Reply::Error("ERR boom".to_string()), 2),
            b"-ERR boom\r\n"
        );
    }

    #[test]
    fn resp3_shapes_degrade_on_resp2() {
        assert_eq!(encoded(&Reply::Null, 2), b"$-1\r\n");
        assert_eq!(encoded(&Reply::Null, 3), b"_\r\n");
        assert_eq!(encoded(&Reply::Boolean(true), 2), b":1\r\n");
        assert_eq!(encoded(&Reply::Boolean(true), 3), b"#t\r\n");
        assert_eq!(encoded(&Reply::Double(1.5), 3), b",1.5\r\n");
        assert_eq!(encoded(&Reply::Double(1.5), 2), b"$3\r\n1.5\r\n");

        let map = Reply::Map(vec![(Reply::bulk(b"k"), Reply::Integer(1))]);
        assert_eq!(encoded(&map, 3), b"%1\r\n$1\r\nk\r\n:1\r\n");
        assert_eq!(encoded(&map, 2), b"*2\r\n$1\r\nk\r\n:1\r\n");

        let push = Reply::Push(vec![Reply::bulk(b"message")]);
        assert!(encoded(&push, 3).starts_with(b">1\r\n"));
        assert!(encoded(&push, 2).starts_with(b"*1\r\n"));
    }

    #[test]
    fn nested_arrays_encode_depth_first() {
        let nested = Reply::array(vec![
            Reply::Integer(1),
            Reply::array(vec![Reply::bulk(b"a"), Reply::bulk(b"b")]),
        ]);
        assert_eq!(
            encoded(&nested, 2),
            b"*2\r\n:1\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n"
        );
    }
}
