//! Set command implementations (SADD, SMEMBERS, set algebra, ...).

use rand::thread_rng;

use ember_common::{EmberError, EmberResult, Reply};
use ember_engine::value::{SetValue, Value};

use crate::state::{ConnState, ServerState};

use super::{arg_i64, reply_from};

pub fn sadd(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let members: Vec<Vec<u8>> = argv[2..].to_vec();
    let result = state.keyspace.update_or_insert(
        &argv[1],
        || Value::Set(SetValue::new()),
        |v| {
            let set = v.as_set_mut()?;
            let mut added = 0i64;
            for member in &members {
                if set.add(member) {
                    added += 1;
                }
            }
            Ok::<i64, EmberError>(added)
        },
    );
    match result {
        Ok(added) => Reply::Integer(added),
        Err(err) => err.into(),
    }
}

pub fn srem(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let result = state.keyspace.update(&argv[1], |v| {
        let set = v.as_set_mut()?;
        let mut removed = 0i64;
        for member in &argv[2..] {
            if set.remove(member) {
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
    drop_if_empty(state, &argv[1]);
    reply
}

pub fn sismember(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_set().map(|s| s.contains(&argv[2])))
    {
        Some(Ok(found)) => Reply::Integer(if found { 1 } else { 0 }),
        Some(Err(err)) => err.into(),
        None => Reply::Integer(0),
    }
}

pub fn scard(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state.keyspace.view(&argv[1], |v| v.as_set().map(|s| s.len())) {
        Some(Ok(len)) => Reply::Integer(len as i64),
        Some(Err(err)) => err.into(),
        None => Reply::Integer(0),
    }
}

pub fn smembers(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_set().map(|s| s.members()))
    {
        Some(Ok(members)) => {
            Reply::array(members.into_iter().map(|m| Reply::Bulk(Some(m))).collect())
        }
        Some(Err(err)) => err.into(),
        None => Reply::empty_array(),
    }
}

pub fn spop(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let count = match argv.get(2) {
            Some(_) => {
                let count = arg_i64(argv, 2)?;
                if count < 0 {
                    return Err(EmberError::OutOfRange);
                }
                Some(count as usize)
            }
            None => None,
        };

        let popped = state.keyspace.update(&argv[1], |v| {
            let set = v.as_set_mut()?;
            let take = count.unwrap_or(1).min(set.len());
            let mut rng = thread_rng();
            let mut members = Vec::with_capacity(take);
            for _ in 0..take {
                match set.pop_random(&mut rng) {
                    Some(member) => members.push(member),
                    None => break,
                }
            }
            Ok::<Vec<Vec<u8>>, EmberError>(members)
        });
        drop_if_empty(state, &argv[1]);

        match popped {
            Some(Ok(members)) => Ok(match count {
                None => match members.into_iter().next() {
                    Some(member) => Reply::Bulk(Some(member)),
                    None => Reply::nil(),
                },
                Some(_) => {
                    Reply::array(members.into_iter().map(|m| Reply::Bulk(Some(m))).collect())
                }
            }),
            Some(Err(err)) => Err(err),
            None => Ok(if count.is_none() {
                Reply::nil()
            } else {
                Reply::empty_array()
            }),
        }
    })())
}

pub fn srandmember(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let count = match argv.get(2) {
            Some(_) => Some(arg_i64(argv, 2)?),
            None => None,
        };
        let picked = state.keyspace.view(&argv[1], |v| {
            let set = v.as_set()?;
            let mut rng = thread_rng();
            Ok::<Vec<Vec<u8>>, EmberError>(match count {
                None => set.random_member(&mut rng).into_iter().collect(),
                Some(n) if n >= 0 => {
                    // Distinct members, capped at the set size.
                    let mut pool = set.members();
                    let take = (n as usize).min(pool.len());
                    let mut out = Vec::with_capacity(take);
                    for _ in 0..take {
                        let at = rand::Rng::gen_range(&mut rng, 0..pool.len());
                        out.push(pool.swap_remove(at));
                    }
                    out
                }
                // Negative count allows repeats.
                Some(n) => (0..n.unsigned_abs() as usize)
                    .filter_map(|_| set.random_member(&mut rng))
                    .collect(),
            })
        });

        match picked {
            Some(Ok(members)) => Ok(match count {
                None => match members.into_iter().next() {
                    Some(member) => Reply::Bulk(Some(member)),
                    None => Reply::nil(),
                },
                Some(_) => {
                    Reply::array(members.into_iter().map(|m| Reply::Bulk(Some(m))).collect())
                }
            }),
            Some(Err(err)) => Err(err),
            None => Ok(if count.is_none() {
                Reply::nil()
            } else {
                Reply::empty_array()
            }),
        }
    })())
}

/// Collects the set values named by `keys`; a missing key reads as an empty
/// set, a wrong-typed key fails the whole command.
fn collect_sets(state: &ServerState, keys: &[Vec<u8>]) -> EmberResult<Vec<SetValue>> {
    let mut sets = Vec::with_capacity(keys.len());
    for key in keys {
        match state.keyspace.view(key, |v| v.as_set().map(|s| s.clone())) {
            Some(Ok(set)) => sets.push(set),
            Some(Err(err)) => return Err(err),
            None => sets.push(SetValue::new()),
        }
    }
    Ok(sets)
}

fn algebra(
    state: &ServerState,
    argv: &[Vec<u8>],
    op: fn(&SetValue, &[&SetValue]) -> SetValue,
) -> Reply {
    reply_from((|| {
        let sets = collect_sets(state, &argv[1..])?;
        let (first, rest) = sets.split_first().expect("arity checked");
        let rest: Vec<&SetValue> = rest.iter().collect();
        let result = op(first, &rest);
        Ok(Reply::array(
            result
                .members()
                .into_iter()
                .map(|m| Reply::Bulk(Some(m)))
                .collect(),
        ))
    })())
}

pub fn sunion(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    algebra(state, argv, SetValue::union)
}

pub fn sinter(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    algebra(state, argv, SetValue::intersect)
}

pub fn sdiff(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    algebra(state, argv, SetValue::difference)
}

fn drop_if_empty(state: &ServerState, key: &[u8]) {
    if state
        .keyspace
        .view(key, |v| v.as_set().map(|s| s.is_empty()).unwrap_or(false))
        .unwrap_or(false)
    {
        state.keyspace.delete(key);
    }
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
    fn encoding_upgrade_scenario() {
        // SADD s 1 2 3 -> intset; SADD s hello -> hashtable; SCARD -> 4.
        let (state, mut conn) = setup();
        assert_eq!(
            run(&state, &mut conn, &["SADD", "s", "1", "2", "3"]),
            Reply::Integer(3)
        );
        assert_eq!(
            run(&state, &mut conn, &["OBJECT", "ENCODING", "s"]),
            Reply::bulk(b"intset")
        );
        assert_eq!(run(&state, &mut conn, &["SADD", "s", "hello"]), Reply::Integer(1));
        assert_eq!(
            run(&state, &mut conn, &["OBJECT", "ENCODING", "s"]),
            Reply::bulk(b"hashtable")
        );
        assert_eq!(run(&state, &mut conn, &["SCARD", "s"]), Reply::Integer(4));
        assert_eq!(run(&state, &mut conn, &["SISMEMBER", "s", "2"]), Reply::Integer(1));
    }

    #[test]
    fn srem_deletes_emptied_set() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["SADD", "s", "a", "b"]);
        assert_eq!(
            run(&state, &mut conn, &["SREM", "s", "a", "b", "ghost"]),
            Reply::Integer(2)
        );
        assert_eq!(run(&state, &mut conn, &["EXISTS", "s"]), Reply::Integer(0));
        assert_eq!(run(&state, &mut conn, &["SREM", "s", "a"]), Reply::Integer(0));
    }

    #[test]
    fn spop_shrinks_set() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["SADD", "s", "a", "b", "c"]);
        assert!(!run(&state, &mut conn, &["SPOP", "s"]).is_error());
        assert_eq!(run(&state, &mut conn, &["SCARD", "s"]), Reply::Integer(2));
        match run(&state, &mut conn, &["SPOP", "s", "5"]) {
            Reply::Array(Some(items)) => assert_eq!(items.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(run(&state, &mut conn, &["EXISTS", "s"]), Reply::Integer(0));
        assert_eq!(run(&state, &mut conn, &["SPOP", "s"]), Reply::nil());
    }

    #[test]
    fn srandmember_does_not_mutate() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["SADD", "s", "a", "b", "c"]);
        for _ in 0..5 {
            assert!(!run(&state, &mut conn, &["SRANDMEMBER", "s"]).is_error());
        }
        assert_eq!(run(&state, &mut conn, &["SCARD", "s"]), Reply::Integer(3));
        match run(&state, &mut conn, &["SRANDMEMBER", "s", "-7"]) {
            Reply::Array(Some(items)) => assert_eq!(items.len(), 7),
            other => panic!("unexpected {other:?}"),
        }
        match run(&state, &mut conn, &["SRANDMEMBER", "s", "2"]) {
            Reply::Array(Some(items)) => assert_eq!(items.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn set_algebra_commands() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["SADD", "a", "1", "2", "3"]);
        run(&state, &mut conn, &["SADD", "b", "2", "3", "4"]);

        match run(&state, &mut conn, &["SUNION", "a", "b"]) {
            Reply::Array(Some(items)) => assert_eq!(items.len(), 4),
            other => panic!("unexpected {other:?}"),
        }
        match run(&state, &mut conn, &["SINTER", "a", "b"]) {
            Reply::Array(Some(items)) => assert_eq!(items.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        match run(&state, &mut conn, &["SDIFF", "a", "b"]) {
            Reply::Array(Some(items)) => assert_eq!(items, vec![Reply::bulk(b"1")]),
            other => panic!("unexpected {other:?}"),
        }
        // Missing keys behave as empty sets.
        match run(&state, &mut conn, &["SDIFF", "a", "missing"]) {
            Reply::Array(Some(items)) => assert_eq!(items.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn intset_members_sorted() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["SADD", "s", "30", "10", "20"]);
        assert_eq!(
            run(&state, &mut conn, &["SMEMBERS", "s"]),
            Reply::array(vec![
                Reply::bulk(b"10"),
                Reply::bulk(b"20"),
                Reply::bulk(b"30"),
            ])
        );
    }
}
