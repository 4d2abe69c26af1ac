//! List command implementations (LPUSH, LRANGE, LTRIM, ...).

use ember_common::{EmberError, Reply};
use ember_engine::value::{ListValue, Value};

use crate::state::{ConnState, ServerState};

use super::{arg_i64, reply_from};

fn push(state: &ServerState, argv: &[Vec<u8>], head: bool) -> Reply {
    let elements: Vec<Vec<u8>> = argv[2..].to_vec();
    let result = state.keyspace.update_or_insert(
        &argv[1],
        || Value::List(ListValue::new()),
        |v| {
            let list = v.as_list_mut()?;
            let mut len = list.len();
            for element in elements {
                len = if head {
                    list.push_head(element)
                } else {
                    list.push_tail(element)
                };
            }
            Ok::<usize, EmberError>(len)
        },
    );
    match result {
        Ok(len) => Reply::Integer(len as i64),
        Err(err) => err.into(),
    }
}

pub fn lpush(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    push(state, argv, true)
}

pub fn rpush(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    push(state, argv, false)
}

fn pop(state: &ServerState, argv: &[Vec<u8>], head: bool) -> Reply {
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
            let list = v.as_list_mut()?;
            let take = count.unwrap_or(1).min(list.len());
            let mut items = Vec::with_capacity(take);
            for _ in 0..take {
                let item = if head { list.pop_head() } else { list.pop_tail() };
                match item {
                    Some(item) => items.push(item),
                    None => break,
                }
            }
            Ok::<Vec<Vec<u8>>, EmberError>(items)
        });

        // Popping the last element leaves an empty list; drop the key like
        // every container command does.
        if state
            .keyspace
            .view(&argv[1], |v| v.as_list().map(|l| l.is_empty()).unwrap_or(false))
            .unwrap_or(false)
        {
            state.keyspace.delete(&argv[1]);
        }

        match popped {
            Some(Ok(items)) => Ok(match count {
                None => match items.into_iter().next() {
                    Some(item) => Reply::Bulk(Some(item)),
                    None => Reply::nil(),
                },
                Some(_) if items.is_empty() => Reply::Array(None),
                Some(_) => {
                    Reply::array(items.into_iter().map(|i| Reply::Bulk(Some(i))).collect())
                }
            }),
            Some(Err(err)) => Err(err),
            None => Ok(if count.is_none() {
                Reply::nil()
            } else {
                Reply::Array(None)
            }),
        }
    })())
}

pub fn lpop(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    pop(state, argv, true)
}

pub fn rpop(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    pop(state, argv, false)
}

pub fn llen(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state.keyspace.view(&argv[1], |v| v.as_list().map(|l| l.len())) {
        Some(Ok(len)) => Reply::Integer(len as i64),
        Some(Err(err)) => err.into(),
        None => Reply::Integer(0),
    }
}

pub fn lindex(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let index = arg_i64(argv, 2)?;
        match state
            .keyspace
            .view(&argv[1], |v| v.as_list().map(|l| l.get_at(index).map(|e| e.to_vec())))
        {
            Some(Ok(Some(element))) => Ok(Reply::Bulk(Some(element))),
            Some(Ok(None)) => Ok(Reply::nil()),
            Some(Err(err)) => Err(err),
            None => Ok(Reply::nil()),
        }
    })())
}

pub fn lset(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let index = arg_i64(argv, 2)?;
        let element = argv[3].clone();
        match state
            .keyspace
            .update(&argv[1], |v| v.as_list_mut().and_then(|l| l.set_at(index, element)))
        {
            Some(Ok(())) => Ok(Reply::ok()),
            Some(Err(err)) => Err(err),
            None => Err(EmberError::NoSuchKey),
        }
    })())
}

pub fn lrange(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let left = arg_i64(argv, 2)?;
        let right = arg_i64(argv, 3)?;
        match state
            .keyspace
            .view(&argv[1], |v| v.as_list().map(|l| l.range(left, right)))
        {
            Some(Ok(items)) => Ok(Reply::array(
                items.into_iter().map(|i| Reply::Bulk(Some(i))).collect(),
            )),
            Some(Err(err)) => Err(err),
            None => Ok(Reply::empty_array()),
        }
    })())
}

pub fn ltrim(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let left = arg_i64(argv, 2)?;
        let right = arg_i64(argv, 3)?;
        let trimmed = state.keyspace.update(&argv[1], |v| {
            v.as_list_mut().map(|l| l.trim(left, right))
        });
        match trimmed {
            Some(Err(err)) => return Err(err),
            Some(Ok(())) | None => {}
        }
        if state
            .keyspace
            .view(&argv[1], |v| v.as_list().map(|l| l.is_empty()).unwrap_or(false))
            .unwrap_or(false)
        {
            state.keyspace.delete(&argv[1]);
        }
        Ok(Reply::ok())
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
    fn push_pop_both_ends() {
        let (state, mut conn) = setup();
        assert_eq!(run(&state, &mut conn, &["RPUSH", "l", "b", "c"]), Reply::Integer(2));
        assert_eq!(run(&state, &mut conn, &["LPUSH", "l", "a"]), Reply::Integer(3));
        assert_eq!(run(&state, &mut conn, &["LPOP", "l"]), Reply::bulk(b"a"));
        assert_eq!(run(&state, &mut conn, &["RPOP", "l"]), Reply::bulk(b"c"));
        assert_eq!(run(&state, &mut conn, &["LLEN", "l"]), Reply::Integer(1));
    }

    #[test]
    fn popping_last_element_deletes_key() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["RPUSH", "l", "only"]);
        assert_eq!(run(&state, &mut conn, &["LPOP", "l"]), Reply::bulk(b"only"));
        assert_eq!(run(&state, &mut conn, &["EXISTS", "l"]), Reply::Integer(0));
        assert_eq!(run(&state, &mut conn, &["LPOP", "l"]), Reply::nil());
    }

    #[test]
    fn pop_with_count() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["RPUSH", "l", "a", "b", "c"]);
        assert_eq!(
            run(&state, &mut conn, &["LPOP", "l", "2"]),
            Reply::array(vec![Reply::bulk(b"a"), Reply::bulk(b"b")])
        );
        assert_eq!(run(&state, &mut conn, &["LPOP", "missing", "2"]), Reply::Array(None));
    }

    #[test]
    fn lrange_and_negative_indices() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["RPUSH", "l", "a", "b", "c", "d"]);
        assert_eq!(
            run(&state, &mut conn, &["LRANGE", "l", "0", "-1"]),
            Reply::array(vec![
                Reply::bulk(b"a"),
                Reply::bulk(b"b"),
                Reply::bulk(b"c"),
                Reply::bulk(b"d"),
            ])
        );
        assert_eq!(
            run(&state, &mut conn, &["LRANGE", "l", "-2", "-1"]),
            Reply::array(vec![Reply::bulk(b"c"), Reply::bulk(b"d")])
        );
        assert_eq!(run(&state, &mut conn, &["LRANGE", "missing", "0", "-1"]), Reply::empty_array());
    }

    #[test]
    fn lindex_lset() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["RPUSH", "l", "a", "b"]);
        assert_eq!(run(&state, &mut conn, &["LINDEX", "l", "-1"]), Reply::bulk(b"b"));
        assert_eq!(run(&state, &mut conn, &["LINDEX", "l", "5"]), Reply::nil());
        assert_eq!(run(&state, &mut conn, &["LSET", "l", "0", "z"]), Reply::ok());
        assert_eq!(run(&state, &mut conn, &["LINDEX", "l", "0"]), Reply::bulk(b"z"));
        assert!(run(&state, &mut conn, &["LSET", "l", "9", "w"]).is_error());
        assert!(run(&state, &mut conn, &["LSET", "missing", "0", "w"]).is_error());
    }

    #[test]
    fn ltrim_window_and_empty_delete() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["RPUSH", "l", "a", "b", "c", "d", "e"]);
        assert_eq!(run(&state, &mut conn, &["LTRIM", "l", "1", "3"]), Reply::ok());
        assert_eq!(
            run(&state, &mut conn, &["LRANGE", "l", "0", "-1"]),
            Reply::array(vec![Reply::bulk(b"b"), Reply::bulk(b"c"), Reply::bulk(b"d")])
        );
        assert_eq!(run(&state, &mut conn, &["LTRIM", "l", "5", "3"]), Reply::ok());
        assert_eq!(run(&state, &mut conn, &["EXISTS", "l"]), Reply::Integer(0));
    }

    #[test]
    fn wrongtype_guard() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["SET", "s", "v"]);
        assert!(run(&state, &mut conn, &["LPUSH", "s", "x"]).is_error());
        assert!(run(&state, &mut conn, &["LRANGE", "s", "0", "-1"]).is_error());
    }
}
