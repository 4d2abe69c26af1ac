//! Sorted-set command implementations (ZADD, ZRANGE, ZRANK, ...).

use ember_common::{EmberError, Reply};
use ember_engine::value::string::format_float;
use ember_engine::value::{ScoreBound, SortedSetValue, Value, ZAddOutcome};

use crate::state::{ConnState, ServerState};

use super::{arg_f64, arg_i64, arg_str, reply_from};

/// ZADD key [NX|XX] score member [score member ...]
pub fn zadd(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let mut idx = 2;
        let mut nx = false;
        let mut xx = false;
        while idx < argv.len() {
            match arg_str(argv, idx)?.to_ascii_uppercase().as_str() {
                "NX" => {
                    nx = true;
                    idx += 1;
                }
                "XX" => {
                    xx = true;
                    idx += 1;
                }
                _ => break,
            }
        }
        if nx && xx {
            return Err(EmberError::Syntax);
        }
        let pairs = &argv[idx..];
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(EmberError::Syntax);
        }

        let mut scored: Vec<(f64, Vec<u8>)> = Vec::with_capacity(pairs.len() / 2);
        for (offset, pair) in pairs.chunks(2).enumerate() {
            let score = arg_f64(argv, idx + offset * 2)?;
            scored.push((score, pair[1].clone()));
        }

        let added = state.keyspace.update_or_insert(
            &argv[1],
            || Value::SortedSet(SortedSetValue::new()),
            |v| {
                let zset = v.as_zset_mut()?;
                let mut added = 0i64;
                for (score, member) in scored {
                    let exists = zset.score_of(&member).is_some();
                    if (nx && exists) || (xx && !exists) {
                        continue;
                    }
                    if zset.add(&member, score) == ZAddOutcome::Added {
                        added += 1;
                    }
                }
                Ok::<i64, EmberError>(added)
            },
        )?;
        Ok(Reply::Integer(added))
    })())
}

pub fn zrem(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let result = state.keyspace.update(&argv[1], |v| {
        let zset = v.as_zset_mut()?;
        let mut removed = 0i64;
        for member in &argv[2..] {
            if zset.remove(member) {
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
        .view(&argv[1], |v| v.as_zset().map(|z| z.is_empty()).unwrap_or(false))
        .unwrap_or(false)
    {
        state.keyspace.delete(&argv[1]);
    }
    reply
}

pub fn zscore(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_zset().map(|z| z.score_of(&argv[2])))
    {
        Some(Ok(Some(score))) => Reply::Bulk(Some(format_float(score).into_bytes())),
        Some(Ok(None)) => Reply::nil(),
        Some(Err(err)) => err.into(),
        None => Reply::nil(),
    }
}

pub fn zincrby(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let delta = arg_f64(argv, 2)?;
        let member = argv[3].clone();
        let next = state.keyspace.update_or_insert(
            &argv[1],
            || Value::SortedSet(SortedSetValue::new()),
            |v| v.as_zset_mut()?.incr_score(&member, delta),
        )?;
        Ok(Reply::Bulk(Some(format_float(next).into_bytes())))
    })())
}

pub fn zcard(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state.keyspace.view(&argv[1], |v| v.as_zset().map(|z| z.len())) {
        Some(Ok(len)) => Reply::Integer(len as i64),
        Some(Err(err)) => err.into(),
        None => Reply::Integer(0),
    }
}

fn rank_generic(state: &ServerState, argv: &[Vec<u8>], reverse: bool) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_zset().map(|z| z.rank(&argv[2], reverse)))
    {
        Some(Ok(Some(rank))) => Reply::Integer(rank as i64),
        Some(Ok(None)) => Reply::nil(),
        Some(Err(err)) => err.into(),
        None => Reply::nil(),
    }
}

pub fn zrank(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    rank_generic(state, argv, false)
}

pub fn zrevrank(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    rank_generic(state, argv, true)
}

fn with_scores_requested(argv: &[Vec<u8>], at: usize) -> Result<bool, EmberError> {
    match argv.get(at) {
        None => Ok(false),
        Some(option) => {
            if option.eq_ignore_ascii_case(b"WITHSCORES") {
                Ok(true)
            } else {
                Err(EmberError::Syntax)
            }
        }
    }
}

fn render_pairs(pairs: Vec<(Vec<u8>, f64)>, with_scores: bool) -> Reply {
    let mut items = Vec::with_capacity(pairs.len() * if with_scores { 2 } else { 1 });
    for (member, score) in pairs {
        items.push(Reply::Bulk(Some(member)));
        if with_scores {
            items.push(Reply::Bulk(Some(format_float(score).into_bytes())));
        }
    }
    Reply::array(items)
}

fn range_generic(state: &ServerState, argv: &[Vec<u8>], reverse: bool) -> Reply {
    reply_from((|| {
        let start = arg_i64(argv, 2)?;
        let stop = arg_i64(argv, 3)?;
        let with_scores = with_scores_requested(argv, 4)?;
        match state.keyspace.view(&argv[1], |v| {
            v.as_zset().map(|z| z.range_by_rank(start, stop, reverse))
        }) {
            Some(Ok(pairs)) => Ok(render_pairs(pairs, with_scores)),
            Some(Err(err)) => Err(err),
            None => Ok(Reply::empty_array()),
        }
    })())
}

pub fn zrange(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    range_generic(state, argv, false)
}

pub fn zrevrange(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    range_generic(state, argv, true)
}

pub fn zrangebyscore(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let min = ScoreBound::parse(&argv[2])?;
        let max = ScoreBound::parse(&argv[3])?;
        let with_scores = with_scores_requested(argv, 4)?;
        match state.keyspace.view(&argv[1], |v| {
            v.as_zset().map(|z| z.range_by_score(min, max, false))
        }) {
            Some(Ok(pairs)) => Ok(render_pairs(pairs, with_scores)),
            Some(Err(err)) => Err(err),
            None => Ok(Reply::empty_array()),
        }
    })())
}

pub fn zcount(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let min = ScoreBound::parse(&argv[2])?;
        let max = ScoreBound::parse(&argv[3])?;
        match state
            .keyspace
            .view(&argv[1], |v| v.as_zset().map(|z| z.count_by_score(min, max)))
        {
            Some(Ok(count)) => Ok(Reply::Integer(count as i64)),
            Some(Err(err)) => Err(err),
            None => Ok(Reply::Integer(0)),
        }
    })())
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
    fn zadd_returns_new_member_count() {
        let (state, mut conn) = setup();
        assert_eq!(
            run(&state, &mut conn, &["ZADD", "z", "1", "a", "2", "b"]),
            Reply::Integer(2)
        );
        // Rescoring an existing member adds nothing.
        assert_eq!(run(&state, &mut conn, &["ZADD", "z", "5", "a"]), Reply::Integer(0));
        assert_eq!(run(&state, &mut conn, &["ZSCORE", "z", "a"]), Reply::bulk(b"5"));
        assert_eq!(run(&state, &mut conn, &["ZCARD", "z"]), Reply::Integer(2));
    }

    #[test]
    fn zadd_nx_xx_flags() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["ZADD", "z", "1", "a"]);
        assert_eq!(
            run(&state, &mut conn, &["ZADD", "z", "NX", "9", "a"]),
            Reply::Integer(0)
        );
        assert_eq!(run(&state, &mut conn, &["ZSCORE", "z", "a"]), Reply::bulk(b"1"));
        assert_eq!(
            run(&state, &mut conn, &["ZADD", "z", "XX", "9", "ghost"]),
            Reply::Integer(0)
        );
        assert_eq!(run(&state, &mut conn, &["ZSCORE", "z", "ghost"]), Reply::nil());
        assert!(run(&state, &mut conn, &["ZADD", "z", "NX", "XX", "1", "m"]).is_error());
    }

    #[test]
    fn zrank_and_ranges() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]);
        assert_eq!(run(&state, &mut conn, &["ZRANK", "z", "a"]), Reply::Integer(0));
        assert_eq!(run(&state, &mut conn, &["ZREVRANK", "z", "a"]), Reply::Integer(2));
        assert_eq!(run(&state, &mut conn, &["ZRANK", "z", "ghost"]), Reply::nil());

        assert_eq!(
            run(&state, &mut conn, &["ZRANGE", "z", "0", "-1"]),
            Reply::array(vec![Reply::bulk(b"a"), Reply::bulk(b"b"), Reply::bulk(b"c")])
        );
        assert_eq!(
            run(&state, &mut conn, &["ZREVRANGE", "z", "0", "0"]),
            Reply::array(vec![Reply::bulk(b"c")])
        );
        assert_eq!(
            run(&state, &mut conn, &["ZRANGE", "z", "0", "0", "WITHSCORES"]),
            Reply::array(vec![Reply::bulk(b"a"), Reply::bulk(b"1")])
        );
    }

    #[test]
    fn zrangebyscore_and_zcount() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]);
        assert_eq!(
            run(&state, &mut conn, &["ZRANGEBYSCORE", "z", "2", "+inf"]),
            Reply::array(vec![Reply::bulk(b"b"), Reply::bulk(b"c")])
        );
        assert_eq!(
            run(&state, &mut conn, &["ZRANGEBYSCORE", "z", "(1", "(3"]),
            Reply::array(vec![Reply::bulk(b"b")])
        );
        assert_eq!(
            run(&state, &mut conn, &["ZCOUNT", "z", "-inf", "+inf"]),
            Reply::Integer(3)
        );
        assert_eq!(run(&state, &mut conn, &["ZCOUNT", "z", "(1", "3"]), Reply::Integer(2));
    }

    #[test]
    fn zincrby_and_zrem() {
        let (state, mut conn) = setup();
        assert_eq!(
            run(&state, &mut conn, &["ZINCRBY", "z", "2.5", "m"]),
            Reply::bulk(b"2.5")
        );
        assert_eq!(
            run(&state, &mut conn, &["ZINCRBY", "z", "1.5", "m"]),
            Reply::bulk(b"4")
        );
        assert_eq!(run(&state, &mut conn, &["ZREM", "z", "m", "ghost"]), Reply::Integer(1));
        assert_eq!(run(&state, &mut conn, &["EXISTS", "z"]), Reply::Integer(0));
    }

    #[test]
    fn wrongtype_guard() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["SET", "s", "v"]);
        assert!(run(&state, &mut conn, &["ZADD", "s", "1", "m"]).is_error());
        assert!(run(&state, &mut conn, &["ZRANGE", "s", "0", "-1"]).is_error());
    }
}
