//! Key-level command implementations (DEL, EXPIRE, TYPE, OBJECT, ...).

use std::time::{Duration, Instant};

use ember_common::{EmberError, Reply};
use ember_engine::keyspace::TtlStatus;

use crate::state::{ConnState, ServerState};

use super::{arg_i64, arg_str, reply_from};

pub fn del(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let mut removed = 0i64;
    for key in &argv[1..] {
        if state.keyspace.delete(key) {
            state.evictor.on_delete(key);
            removed += 1;
        }
    }
    Reply::Integer(removed)
}

pub fn exists(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let count = argv[1..]
        .iter()
        .filter(|key| state.keyspace.exists(key))
        .count();
    Reply::Integer(count as i64)
}

pub fn type_cmd(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state.keyspace.type_of(&argv[1]) {
        Some(name) => Reply::Simple(name.to_string()),
        None => Reply::Simple("none".to_string()),
    }
}

pub fn rename(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    if state.keyspace.rename(&argv[1], &argv[2]) {
        Reply::ok()
    } else {
        EmberError::NoSuchKey.into()
    }
}

pub fn randomkey(state: &ServerState, _conn: &mut ConnState, _argv: &[Vec<u8>]) -> Reply {
    match state.keyspace.random_key() {
        Some(key) => Reply::Bulk(Some(key)),
        None => Reply::nil(),
    }
}

pub fn keys(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let matched = state.keyspace.keys(&argv[1]);
    Reply::array(matched.into_iter().map(|k| Reply::Bulk(Some(k))).collect())
}

fn expire_generic(state: &ServerState, argv: &[Vec<u8>], unit_ms: i64, cmd: &str) -> Reply {
    reply_from((|| {
        let amount = arg_i64(argv, 2)?;
        // A parseable but unrepresentable deadline is a client error, not a
        // panic: overflow on the unit conversion or on the instant addition
        // rejects the command before any keyspace access.
        let deadline = if amount > 0 {
            let millis = amount
                .checked_mul(unit_ms)
                .ok_or_else(|| EmberError::InvalidExpireTime(cmd.to_string()))?;
            let at = Instant::now()
                .checked_add(Duration::from_millis(millis as u64))
                .ok_or_else(|| EmberError::InvalidExpireTime(cmd.to_string()))?;
            Some(at)
        } else {
            None
        };
        if !state.keyspace.exists(&argv[1]) {
            return Ok(Reply::Integer(0));
        }
        match deadline {
            Some(at) => {
                let applied = state.keyspace.set_expire(&argv[1], at);
                Ok(Reply::Integer(if applied { 1 } else { 0 }))
            }
            // A non-positive TTL deletes immediately, per EXPIRE semantics.
            None => {
                state.keyspace.delete(&argv[1]);
                Ok(Reply::Integer(1))
            }
        }
    })())
}

pub fn expire(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    expire_generic(state, argv, 1_000, "expire")
}

pub fn pexpire(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    expire_generic(state, argv, 1, "pexpire")
}

fn ttl_generic(state: &ServerState, argv: &[Vec<u8>], in_millis: bool) -> Reply {
    match state.keyspace.ttl(&argv[1]) {
        TtlStatus::Missing => Reply::Integer(-2),
        TtlStatus::NoExpiry => Reply::Integer(-1),
        TtlStatus::ExpiresIn(left) => Reply::Integer(if in_millis {
            left.as_millis() as i64
        } else {
            left.as_secs() as i64
        }),
    }
}

pub fn ttl(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    ttl_generic(state, argv, false)
}

pub fn pttl(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    ttl_generic(state, argv, true)
}

pub fn persist(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    Reply::Integer(if state.keyspace.persist(&argv[1]) { 1 } else { 0 })
}

/// OBJECT ENCODING|FREQ|IDLETIME key
pub fn object(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let sub = arg_str(argv, 1)?.to_ascii_uppercase();
        if argv.len() != 3 {
            return Err(EmberError::WrongArity("object".to_string()));
        }
        let key = &argv[2];
        match sub.as_str() {
            "ENCODING" => match state.keyspace.view(key, |v| v.encoding_name()) {
                Some(name) => Ok(Reply::bulk(name.as_bytes())),
                None => Err(EmberError::NoSuchKey),
            },
            "IDLETIME" => match state.keyspace.object_metadata(key) {
                Some((idle, _)) => Ok(Reply::Integer(idle as i64)),
                None => Err(EmberError::NoSuchKey),
            },
            "FREQ" => match state.keyspace.object_metadata(key) {
                Some((_, freq)) => Ok(Reply::Integer(freq as i64)),
                None => Err(EmberError::NoSuchKey),
            },
            _ => Err(EmberError::Syntax),
        }
    })())
}

pub fn dbsize(state: &ServerState, _conn: &mut ConnState, _argv: &[Vec<u8>]) -> Reply {
    Reply::Integer(state.keyspace.dbsize() as i64)
}

pub fn flushdb(state: &ServerState, _conn: &mut ConnState, _argv: &[Vec<u8>]) -> Reply {
    state.keyspace.flush();
    Reply::ok()
}
