//! String command implementations (GET, SET and friends, INCR family).

use std::time::{Duration, Instant};

use ember_common::{EmberError, EmberResult, Reply};
use ember_engine::value::{StringValue, Value};

use crate::state::{ConnState, ServerState};

use super::{arg_f64, arg_i64, arg_str, reply_from};

pub fn get(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_string().map(|s| s.bytes()))
    {
        Some(Ok(bytes)) => Reply::Bulk(Some(bytes)),
        Some(Err(err)) => err.into(),
        None => Reply::nil(),
    }
}

/// SET key value [EX s] [PX ms] [NX|XX] [KEEPTTL] [GET]
pub fn set(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from(set_inner(state, argv))
}

fn set_inner(state: &ServerState, argv: &[Vec<u8>]) -> EmberResult<Reply> {
    let key = &argv[1];
    let payload = &argv[2];

    let mut expire: Option<Instant> = None;
    let mut nx = false;
    let mut xx = false;
    let mut keep_ttl = false;
    let mut want_old = false;

    let mut idx = 3;
    while idx < argv.len() {
        let option = arg_str(argv, idx)?.to_ascii_uppercase();
        match option.as_str() {
            "EX" | "PX" => {
                let amount = arg_i64(argv, idx + 1).map_err(|_| EmberError::Syntax)?;
                if amount <= 0 {
                    return Err(EmberError::InvalidExpireTime("set".to_string()));
                }
                // Same overflow rules as EXPIRE: a deadline that cannot be
                // represented rejects the command before any mutation.
                let millis = if option == "EX" {
                    amount
                        .checked_mul(1_000)
                        .ok_or_else(|| EmberError::InvalidExpireTime("set".to_string()))?
                } else {
                    amount
                };
                let at = Instant::now()
                    .checked_add(Duration::from_millis(millis as u64))
                    .ok_or_else(|| EmberError::InvalidExpireTime("set".to_string()))?;
                expire = Some(at);
                idx += 2;
            }
            "NX" => {
                nx = true;
                idx += 1;
            }
            "XX" => {
                xx = true;
                idx += 1;
            }
            "KEEPTTL" => {
                keep_ttl = true;
                idx += 1;
            }
            "GET" => {
                want_old = true;
                idx += 1;
            }
            _ => return Err(EmberError::Syntax),
        }
    }
    if nx && xx {
        return Err(EmberError::Syntax);
    }

    let old = if want_old {
        match state
            .keyspace
            .view(key, |v| v.as_string().map(|s| s.bytes()))
        {
            Some(Ok(bytes)) => Some(Some(bytes)),
            Some(Err(err)) => return Err(err),
            None => Some(None),
        }
    } else {
        None
    };

    let exists = state.keyspace.exists(key);
    if (nx && exists) || (xx && !exists) {
        return Ok(match old {
            Some(previous) => Reply::Bulk(previous),
            None => Reply::nil(),
        });
    }

    let value = Value::String(StringValue::from_bytes(payload));
    if keep_ttl {
        state.keyspace.set_keep_ttl(key, value);
    } else {
        state.keyspace.set(key, value);
    }
    if let Some(at) = expire {
        state.keyspace.set_expire(key, at);
    }

    Ok(match old {
        Some(previous) => Reply::Bulk(previous),
        None => Reply::ok(),
    })
}

pub fn setnx(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let value = Value::String(StringValue::from_bytes(&argv[2]));
    match state.keyspace.set_if_absent(&argv[1], value) {
        Some(_) => Reply::Integer(1),
        None => Reply::Integer(0),
    }
}

pub fn append(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let payload = argv[2].clone();
    let result = state.keyspace.update_or_insert(
        &argv[1],
        || Value::String(StringValue::from_bytes(b"")),
        |v| v.as_string_mut().map(|s| s.append(&payload)),
    );
    match result {
        Ok(len) => Reply::Integer(len as i64),
        Err(err) => err.into(),
    }
}

pub fn strlen(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_string().map(|s| s.length()))
    {
        Some(Ok(len)) => Reply::Integer(len as i64),
        Some(Err(err)) => err.into(),
        None => Reply::Integer(0),
    }
}

pub fn getrange(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let start = arg_i64(argv, 2)?;
        let end = arg_i64(argv, 3)?;
        match state
            .keyspace
            .view(&argv[1], |v| v.as_string().map(|s| s.range(start, end)))
        {
            Some(Ok(slice)) => Ok(Reply::Bulk(Some(slice))),
            Some(Err(err)) => Err(err),
            None => Ok(Reply::bulk(b"")),
        }
    })())
}

pub fn setrange(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let offset = arg_i64(argv, 2)?;
        if offset < 0 {
            return Err(EmberError::IndexOutOfRange);
        }
        let payload = argv[3].clone();
        let result = state.keyspace.update_or_insert(
            &argv[1],
            || Value::String(StringValue::from_bytes(b"")),
            |v| {
                v.as_string_mut()
                    .map(|s| s.set_range(offset as usize, &payload))
            },
        );
        result.map(|len| Reply::Integer(len as i64))
    })())
}

fn incr_decr(state: &ServerState, argv: &[Vec<u8>], delta: i64) -> Reply {
    let result = state.keyspace.update_or_insert(
        &argv[1],
        || Value::String(StringValue::from_int(0)),
        |v| v.as_string_mut().and_then(|s| s.incr_by(delta)),
    );
    match result {
        Ok(next) => Reply::Integer(next),
        Err(err) => err.into(),
    }
}

pub fn incr(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    incr_decr(state, argv, 1)
}

pub fn decr(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    incr_decr(state, argv, -1)
}

pub fn incrby(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match arg_i64(argv, 2) {
        Ok(delta) => incr_decr(state, argv, delta),
        Err(err) => err.into(),
    }
}

pub fn decrby(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match arg_i64(argv, 2) {
        Ok(delta) => match delta.checked_neg() {
            Some(delta) => incr_decr(state, argv, delta),
            None => EmberError::OutOfRange.into(),
        },
        Err(err) => err.into(),
    }
}

pub fn incrbyfloat(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let delta = arg_f64(argv, 2)?;
        let result = state.keyspace.update_or_insert(
            &argv[1],
            || Value::String(StringValue::from_int(0)),
            |v| v.as_string_mut().and_then(|s| s.incr_by_float(delta)),
        );
        result.map(|next| {
            Reply::Bulk(Some(
                ember_engine::value::string::format_float(next).into_bytes(),
            ))
        })
    })())
}

pub fn mget(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let replies = argv[1..]
        .iter()
        .map(|key| {
            match state.keyspace.view(key, |v| v.as_string().map(|s| s.bytes())) {
                Some(Ok(bytes)) => Reply::Bulk(Some(bytes)),
                // Wrong-typed keys read as nil in MGET, per Redis.
                _ => Reply::nil(),
            }
        })
        .collect();
    Reply::array(replies)
}

pub fn mset(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    if argv.len() % 2 != 1 {
        return EmberError::WrongArity("mset".to_string()).into();
    }
    for pair in argv[1..].chunks(2) {
        state
            .keyspace
            .set(&pair[0], Value::String(StringValue::from_bytes(&pair[1])));
    }
    Reply::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::execute;
    use ember_common::Config;

    fn setup() -> (std::sync::Arc<ServerState>, ConnState) {
        let state = ServerState::initialize(Config::default(), 1);
        let conn = ConnState::new(state.next_client_id(), &state);
        (state, conn)
    }

    fn run(state: &ServerState, conn: &mut ConnState, parts: &[&str]) -> Reply {
        let argv: Vec<Vec<u8>> = parts.iter().map(|p| p.as_bytes().to_vec()).collect();
        execute(state, conn, &argv)
    }

    #[test]
    fn set_get_roundtrip() {
        let (state, mut conn) = setup();
        assert_eq!(run(&state, &mut conn, &["SET", "k", "v"]), Reply::ok());
        assert_eq!(run(&state, &mut conn, &["GET", "k"]), Reply::bulk(b"v"));
        assert_eq!(run(&state, &mut conn, &["GET", "missing"]), Reply::nil());
    }

    #[test]
    fn set_nx_xx_options() {
        let (state, mut conn) = setup();
        assert_eq!(run(&state, &mut conn, &["SET", "k", "a", "NX"]), Reply::ok());
        assert_eq!(run(&state, &mut conn, &["SET", "k", "b", "NX"]), Reply::nil());
        assert_eq!(run(&state, &mut conn, &["GET", "k"]), Reply::bulk(b"a"));

        assert_eq!(run(&state, &mut conn, &["SET", "k", "c", "XX"]), Reply::ok());
        assert_eq!(run(&state, &mut conn, &["SET", "nope", "x", "XX"]), Reply::nil());
        assert!(run(&state, &mut conn, &["SET", "k", "v", "NX", "XX"]).is_error());
    }

    #[test]
    fn set_px_expires() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["SET", "k", "v", "PX", "50"]);
        assert_eq!(run(&state, &mut conn, &["EXISTS", "k"]), Reply::Integer(1));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(run(&state, &mut conn, &["EXISTS", "k"]), Reply::Integer(0));
    }

    #[test]
    fn set_rejects_unrepresentable_expire() {
        let (state, mut conn) = setup();
        let huge = run(
            &state,
            &mut conn,
            &["SET", "k", "v", "EX", "9000000000000000000"],
        );
        assert!(matches!(huge, Reply::Error(ref m) if m.contains("invalid expire time")));
        // The rejected SET never stored the value.
        assert_eq!(run(&state, &mut conn, &["EXISTS", "k"]), Reply::Integer(0));

        let zero = run(&state, &mut conn, &["SET", "k", "v", "EX", "0"]);
        assert!(matches!(zero, Reply::Error(ref m) if m.contains("invalid expire time")));
    }

    #[test]
    fn set_get_option_returns_previous() {
        let (state, mut conn) = setup();
        assert_eq!(
            run(&state, &mut conn, &["SET", "k", "new", "GET"]),
            Reply::nil()
        );
        assert_eq!(
            run(&state, &mut conn, &["SET", "k", "newer", "GET"]),
            Reply::bulk(b"new")
        );
    }

    #[test]
    fn incr_family() {
        let (state, mut conn) = setup();
        assert_eq!(run(&state, &mut conn, &["INCR", "n"]), Reply::Integer(1));
        assert_eq!(run(&state, &mut conn, &["INCRBY", "n", "9"]), Reply::Integer(10));
        assert_eq!(run(&state, &mut conn, &["DECR", "n"]), Reply::Integer(9));
        assert_eq!(run(&state, &mut conn, &["DECRBY", "n", "4"]), Reply::Integer(5));

        run(&state, &mut conn, &["SET", "s", "abc"]);
        assert!(run(&state, &mut conn, &["INCR", "s"]).is_error());
    }

    #[test]
    fn incrbyfloat_formats_result() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["SET", "f", "10.5"]);
        assert_eq!(
            run(&state, &mut conn, &["INCRBYFLOAT", "f", "0.1"]),
            Reply::bulk(b"10.6")
        );
    }

    #[test]
    fn append_and_ranges() {
        let (state, mut conn) = setup();
        assert_eq!(run(&state, &mut conn, &["APPEND", "k", "Hello"]), Reply::Integer(5));
        assert_eq!(
            run(&state, &mut conn, &["APPEND", "k", " World"]),
            Reply::Integer(11)
        );
        assert_eq!(run(&state, &mut conn, &["STRLEN", "k"]), Reply::Integer(11));
        assert_eq!(
            run(&state, &mut conn, &["GETRANGE", "k", "0", "4"]),
            Reply::bulk(b"Hello")
        );
        assert_eq!(
            run(&state, &mut conn, &["GETRANGE", "k", "-5", "-1"]),
            Reply::bulk(b"World")
        );
        assert_eq!(
            run(&state, &mut conn, &["SETRANGE", "k", "6", "Ember"]),
            Reply::Integer(11)
        );
        assert_eq!(run(&state, &mut conn, &["GET", "k"]), Reply::bulk(b"Hello Ember"));
    }

    #[test]
    fn mset_mget() {
        let (state, mut conn) = setup();
        assert_eq!(
            run(&state, &mut conn, &["MSET", "a", "1", "b", "2"]),
            Reply::ok()
        );
        assert_eq!(
            run(&state, &mut conn, &["MGET", "a", "missing", "b"]),
            Reply::array(vec![Reply::bulk(b"1"), Reply::nil(), Reply::bulk(b"2")])
        );
        assert!(run(&state, &mut conn, &["MSET", "a", "1", "b"]).is_error());
    }

    #[test]
    fn wrongtype_against_list() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["LPUSH", "l", "x"]);
        let reply = run(&state, &mut conn, &["GET", "l"]);
        assert!(matches!(reply, Reply::Error(ref m) if m.starts_with("WRONGTYPE")));
        assert!(run(&state, &mut conn, &["APPEND", "l", "x"]).is_error());
    }

    #[test]
    fn setnx_only_first_wins() {
        let (state, mut conn) = setup();
        assert_eq!(run(&state, &mut conn, &["SETNX", "k", "a"]), Reply::Integer(1));
        assert_eq!(run(&state, &mut conn, &["SETNX", "k", "b"]), Reply::Integer(0));
        assert_eq!(run(&state, &mut conn, &["GET", "k"]), Reply::bulk(b"a"));
    }
}
