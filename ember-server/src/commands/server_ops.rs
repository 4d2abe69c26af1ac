//! Server-level commands (PING, ECHO, INFO, CONFIG, COMMAND, MEMORY).

use ember_common::{EmberError, Reply};

use crate::state::{ConnState, ServerState};

use super::{arg_str, reply_from};

pub fn ping(_state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match argv.len() {
        1 => Reply::Simple("PONG".to_string()),
        2 => Reply::Bulk(Some(argv[1].clone())),
        _ => EmberError::WrongArity("ping".to_string()).into(),
    }
}

pub fn echo(_state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    Reply::Bulk(Some(argv[1].clone()))
}

pub fn info(state: &ServerState, _conn: &mut ConnState, _argv: &[Vec<u8>]) -> Reply {
    let snapshot = state.metrics.snapshot();
    let mut text = String::new();
    text.push_str("# Server\r\n");
    text.push_str("role:master\r\nengine:emberkv\r\nversion:0.1.0\r\n");
    text.push_str(&format!(
        "uptime_in_seconds:{}\r\n",
        state.started_at.elapsed().as_secs()
    ));
    text.push_str("# Clients\r\n");
    text.push_str(&format!(
        "connected_clients:{}\r\n",
        snapshot.connections_current
    ));
    text.push_str("# Memory\r\n");
    text.push_str(&format!("used_memory:{}\r\n", state.keyspace.used_memory()));
    text.push_str(&format!(
        "maxmemory:{}\r\n",
        state.config.lock().maxmemory
    ));
    text.push_str(&format!(
        "maxmemory_policy:{}\r\n",
        state.config.lock().maxmemory_policy
    ));
    text.push_str("# Stats\r\n");
    text.push_str(&format!("total_commands_processed:{}\r\n", snapshot.commands_total));
    text.push_str(&format!("total_errors:{}\r\n", snapshot.errors_total));
    text.push_str(&format!(
        "evicted_keys:{}\r\n",
        state.evictor.evicted_total()
    ));
    text.push_str(&format!(
        "lazyfree_pending_objects:{}\r\n",
        state.reclaimer.pending()
    ));
    text.push_str("# Keyspace\r\n");
    text.push_str(&format!(
        "db0:keys={},expires={}\r\n",
        state.keyspace.dbsize(),
        state.keyspace.expires_size()
    ));
    Reply::Bulk(Some(text.into_bytes()))
}

/// CONFIG GET pattern | CONFIG SET param value
pub fn config(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let sub = arg_str(argv, 1)?.to_ascii_uppercase();
        match sub.as_str() {
            "GET" => {
                if argv.len() != 3 {
                    return Err(EmberError::WrongArity("config|get".to_string()));
                }
                let pattern = argv[2].to_ascii_lowercase();
                let config = state.config.lock();
                let mut pairs = Vec::new();
                for name in [
                    "maxmemory",
                    "maxmemory-policy",
                    "maxmemory-samples",
                    "lfu-log-factor",
                    "lfu-decay-time-minutes",
                    "io-threads",
                    "active-expire-cycle-effort",
                    "lazyfree-threshold-effort",
                ] {
                    if ember_common::glob_match(&pattern, name.as_bytes()) {
                        if let Some(value) = config.get_param(name) {
                            pairs.push((Reply::bulk(name.as_bytes()), Reply::bulk_string(value)));
                        }
                    }
                }
                Ok(Reply::Map(pairs))
            }
            "SET" => {
                if argv.len() != 4 {
                    return Err(EmberError::WrongArity("config|set".to_string()));
                }
                let name = arg_str(argv, 2)?.to_string();
                let value = arg_str(argv, 3)?.to_string();
                state.config.lock().set_param(&name, &value)?;
                state.refresh_eviction_params();
                Ok(Reply::ok())
            }
            _ => Err(EmberError::Syntax),
        }
    })())
}

/// COMMAND [COUNT] — a minimal surface for client handshakes.
pub fn command(_state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        match argv.get(1) {
            None => Ok(Reply::array(
                super::COMMANDS
                    .iter()
                    .map(|spec| Reply::bulk(spec.name.as_bytes()))
                    .collect(),
            )),
            Some(sub) if sub.eq_ignore_ascii_case(b"COUNT") => {
                Ok(Reply::Integer(super::COMMANDS.len() as i64))
            }
            Some(_) => Err(EmberError::Syntax),
        }
    })())
}

/// MEMORY USAGE key
pub fn memory(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let sub = arg_str(argv, 1)?.to_ascii_uppercase();
        match sub.as_str() {
            "USAGE" => {
                if argv.len() != 3 {
                    return Err(EmberError::WrongArity("memory|usage".to_string()));
                }
                match state.keyspace.memory_usage(&argv[2]) {
                    Some(bytes) => Ok(Reply::Integer(bytes as i64)),
                    None => Ok(Reply::nil()),
                }
            }
            _ => Err(EmberError::Syntax),
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
    fn ping_and_echo() {
        let (state, mut conn) = setup();
        assert_eq!(run(&state, &mut conn, &["PING"]), Reply::Simple("PONG".into()));
        assert_eq!(run(&state, &mut conn, &["PING", "hi"]), Reply::bulk(b"hi"));
        assert_eq!(run(&state, &mut conn, &["ECHO", "x"]), Reply::bulk(b"x"));
    }

    #[test]
    fn config_get_set_roundtrip() {
        let (state, mut conn) = setup();
        assert_eq!(
            run(&state, &mut conn, &["CONFIG", "SET", "maxmemory", "1mb"]),
            Reply::ok()
        );
        match run(&state, &mut conn, &["CONFIG", "GET", "maxmemory"]) {
            Reply::Map(pairs) => {
                assert_eq!(pairs.len(), 1);
                assert_eq!(pairs[0].1, Reply::bulk_string("1048576"));
            }
            other => panic!("unexpected {other:?}"),
        }
        // The eviction engine sees the new budget.
        assert_eq!(state.evictor.params().maxmemory, 1 << 20);

        assert_eq!(
            run(
                &state,
                &mut conn,
                &["CONFIG", "SET", "maxmemory-policy", "allkeys-lru"]
            ),
            Reply::ok()
        );
        assert!(run(&state, &mut conn, &["CONFIG", "SET", "bogus", "1"]).is_error());
    }

    #[test]
    fn config_get_glob_matches_families() {
        let (state, mut conn) = setup();
        match run(&state, &mut conn, &["CONFIG", "GET", "lfu-*"]) {
            Reply::Map(pairs) => assert_eq!(pairs.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn info_reports_keyspace() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["SET", "k", "v"]);
        match run(&state, &mut conn, &["INFO"]) {
            Reply::Bulk(Some(text)) => {
                let text = String::from_utf8_lossy(&text).to_string();
                assert!(text.contains("engine:emberkv"));
                assert!(text.contains("db0:keys=1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn memory_usage_and_command_count() {
        let (state, mut conn) = setup();
        run(&state, &mut conn, &["SET", "k", "hello"]);
        match run(&state, &mut conn, &["MEMORY", "USAGE", "k"]) {
            Reply::Integer(bytes) => assert!(bytes > 0),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(run(&state, &mut conn, &["MEMORY", "USAGE", "ghost"]), Reply::nil());
        match run(&state, &mut conn, &["COMMAND", "COUNT"]) {
            Reply::Integer(count) => assert!(count > 50),
            other => panic!("unexpected {other:?}"),
        }
    }
}
