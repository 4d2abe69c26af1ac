//! Hash command implementations, including the per-field TTL family
//! (HEXPIRE / HPERSIST / HTTL use the FIELDS block syntax).

use std::time::{Duration, Instant};

use ember_common::{EmberError, EmberResult, Reply};
use ember_engine::value::{FieldTtl, HashValue, Value};

use crate::state::{ConnState, ServerState};

use super::{arg_i64, arg_str, reply_from};

pub fn hset(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    if argv.len() % 2 != 0 {
        return EmberError::WrongArity("hset".to_string()).into();
    }
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = argv[2..]
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    let result = state.keyspace.update_or_insert(
        &argv[1],
        || Value::Hash(HashValue::new()),
        |v| {
            let hash = v.as_hash_mut()?;
            let now = Instant::now();
            let mut created = 0i64;
            for (field, value) in pairs {
                if hash.hset(&field, value, now) {
                    created += 1;
                }
            }
            Ok::<i64, EmberError>(created)
        },
    );
    match result {
        Ok(created) => Reply::Integer(created),
        Err(err) => err.into(),
    }
}

pub fn hsetnx(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let field = argv[2].clone();
    let value = argv[3].clone();
    let result = state.keyspace.update_or_insert(
        &argv[1],
        || Value::Hash(HashValue::new()),
        |v| {
            v.as_hash_mut()
                .map(|h| h.hset_if_absent(&field, value, Instant::now()))
        },
    );
    match result {
        Ok(created) => Reply::Integer(if created { 1 } else { 0 }),
        Err(err) => err.into(),
    }
}

pub fn hget(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_hash_mut().map(|h| h.hget(&argv[2], Instant::now())))
    {
        Some(Ok(Some(value))) => Reply::Bulk(Some(value)),
        Some(Ok(None)) => Reply::nil(),
        Some(Err(err)) => err.into(),
        None => Reply::nil(),
    }
}

pub fn hmget(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let fields: Vec<Vec<u8>> = argv[2..].to_vec();
    match state.keyspace.view(&argv[1], |v| {
        let hash = v.as_hash_mut()?;
        let now = Instant::now();
        Ok::<Vec<Option<Vec<u8>>>, EmberError>(
            fields.iter().map(|f| hash.hget(f, now)).collect(),
        )
    }) {
        Some(Ok(values)) => Reply::array(values.into_iter().map(Reply::Bulk).collect()),
        Some(Err(err)) => err.into(),
        None => Reply::array(argv[2..].iter().map(|_| Reply::nil()).collect()),
    }
}

pub fn hdel(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let result = state.keyspace.update(&argv[1], |v| {
        let hash = v.as_hash_mut()?;
        let now = Instant::now();
        let mut removed = 0i64;
        for field in &argv[2..] {
            if hash.hdel(field, now) {
                removed += 1;
            }
        }
        Ok::<i64, EmberError>(removed)
    });
    let reply = match result {
        Some(Ok(removed)) => Reply::Integer(removed),
        Some(Err(err)) => return err.into(),
        None => Reply::Integer(0),
    };
    if state
        .keyspace
        .view(&argv[1], |v| match v {
            Value::Hash(h) => h.encoding_len() == 0,
            _ => false,
        })
        .unwrap_or(false)
    {
        state.keyspace.delete(&argv[1]);
    }
    reply
}

pub fn hexists(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_hash_mut().map(|h| h.hexists(&argv[2], Instant::now())))
    {
        Some(Ok(found)) => Reply::Integer(if found { 1 } else { 0 }),
        Some(Err(err)) => err.into(),
        None => Reply::Integer(0),
    }
}

pub fn hlen(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_hash_mut().map(|h| h.hlen(Instant::now())))
    {
        Some(Ok(len)) => Reply::Integer(len as i64),
        Some(Err(err)) => err.into(),
        None => Reply::Integer(0),
    }
}

pub fn hkeys(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_hash_mut().map(|h| h.hkeys(Instant::now())))
    {
        Some(Ok(fields)) => {
            Reply::array(fields.into_iter().map(|f| Reply::Bulk(Some(f))).collect())
        }
        Some(Err(err)) => err.into(),
        None => Reply::empty_array(),
    }
}

pub fn hvals(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_hash_mut().map(|h| h.hvals(Instant::now())))
    {
        Some(Ok(values)) => {
            Reply::array(values.into_iter().map(|v| Reply::Bulk(Some(v))).collect())
        }
        Some(Err(err)) => err.into(),
        None => Reply::empty_array(),
    }
}

pub fn hgetall(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_hash_mut().map(|h| h.hgetall(Instant::now())))
    {
        Some(Ok(pairs)) => Reply::Map(
            pairs
                .into_iter()
                .map(|(f, v)| (Reply::Bulk(Some(f)), Reply::Bulk(Some(v))))
                .collect(),
        ),
        Some(Err(err)) => err.into(),
        None => Reply::Map(Vec::new()),
    }
}

pub fn hincrby(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let delta = arg_i64(argv, 3)?;
        let field = argv[2].clone();
        let next = state.keyspace.update_or_insert(
            &argv[1],
            || Value::Hash(HashValue::new()),
            |v| v.as_hash_mut()?.hincr_by(&field, delta, Instant::now()),
        )?;
        Ok(Reply::Integer(next))
    })())
}

/// Parses the trailing `FIELDS numfields field [field ...]` block.
fn parse_fields_block(argv: &[Vec<u8>], at: usize) -> EmberResult<Vec<Vec<u8>>> {
    if !argv[at].eq_ignore_ascii_case(b"FIELDS") {
        return Err(EmberError::Syntax);
    }
    let count = arg_i64(argv, at + 1)?;
    let fields = &argv[at + 2..];
    if count <= 0 || fields.len() != count as usize {
        return Err(EmberError::Syntax);
    }
    Ok(fields.to_vec())
}

/// HEXPIRE key seconds FIELDS numfields field [field ...]
///
/// Per-field results: 1 applied, -2 no such field (0 = condition not met is
/// unused here since conditions are not supported).
pub fn hexpire(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let seconds = arg_i64(argv, 2)?;
        let fields = parse_fields_block(argv, 3)?;
        let deadline = Instant::now()
            .checked_add(Duration::from_secs(seconds.max(0) as u64))
            .ok_or_else(|| EmberError::InvalidExpireTime("hexpire".to_string()))?;

        let results = state.keyspace.view(&argv[1], |v| {
            let hash = v.as_hash_mut()?;
            let now = Instant::now();
            Ok::<Vec<i64>, EmberError>(
                fields
                    .iter()
                    .map(|field| {
                        if hash.expire_field(field, deadline, now) {
                            1
                        } else {
                            -2
                        }
                    })
                    .collect(),
            )
        });
        match results {
            Some(Ok(results)) => Ok(Reply::array(
                results.into_iter().map(Reply::Integer).collect(),
            )),
            Some(Err(err)) => Err(err),
            None => Ok(Reply::array(fields.iter().map(|_| Reply::Integer(-2)).collect())),
        }
    })())
}

/// HPERSIST key FIELDS numfields field [field ...]
pub fn hpersist(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let fields = parse_fields_block(argv, 2)?;
        let results = state.keyspace.view(&argv[1], |v| {
            let hash = v.as_hash_mut()?;
            let now = Instant::now();
            Ok::<Vec<i64>, EmberError>(
                fields
                    .iter()
                    .map(|field| match hash.ttl_field(field, now) {
                        FieldTtl::NoField => -2,
                        FieldTtl::NoTtl => -1,
                        FieldTtl::ExpiresIn(_) => {
                            hash.persist_field(field, now);
                            1
                        }
                    })
                    .collect(),
            )
        });
        match results {
            Some(Ok(results)) => Ok(Reply::array(
                results.into_iter().map(Reply::Integer).collect(),
            )),
            Some(Err(err)) => Err(err),
            None => Ok(Reply::array(fields.iter().map(|_| Reply::Integer(-2)).collect())),
        }
    })())
}

/// HTTL key FIELDS numfields field [field ...]
pub fn httl(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let fields = parse_fields_block(argv, 2)?;
        let results = state.keyspace.view(&argv[1], |v| {
            let hash = v.as_hash_mut()?;
            let now = Instant::now();
            Ok::<Vec<i64>, EmberError>(
                fields
                    .iter()
                    .map(|field| match hash.ttl_field(field, now) {
                        FieldTtl::NoField => -2,
                        FieldTtl::NoTtl => -1,
                        FieldTtl::ExpiresIn(left) => left.as_secs() as i64,
                    })
                    .collect(),
            )
        });
        match results {
            Some(Ok(results)) => Ok(Reply::array(
                results.into_iter().map(Reply::Integer).collect(),
            )),
            Some(Err(err)) => Err(err),
            None => Ok(Reply::array(fields.iter().map(|_| Reply::Integer(-2)).collect())),
        }
    })())
}
