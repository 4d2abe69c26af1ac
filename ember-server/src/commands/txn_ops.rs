//! Transaction command implementations (MULTI, EXEC, DISCARD, WATCH).
//!
//! Queuing happens on the connection: while MULTI is open the connection
//! buffers commands instead of dispatching them, and EXEC replays the
//! buffer after the optimistic WATCH versions re-check.

use ember_common::{EmberError, Reply};

use crate::state::{ConnState, ServerState};

pub fn multi(_state: &ServerState, conn: &mut ConnState, _argv: &[Vec<u8>]) -> Reply {
    if conn.in_multi {
        return Reply::Error("ERR MULTI calls can not be nested".to_string());
    }
    conn.in_multi = true;
    conn.queued.clear();
    conn.multi_error = false;
    Reply::ok()
}

pub fn exec(state: &ServerState, conn: &mut ConnState, _argv: &[Vec<u8>]) -> Reply {
    if !conn.in_multi {
        return Reply::Error("ERR EXEC without MULTI".to_string());
    }
    if conn.multi_error {
        conn.clear_transaction();
        return EmberError::ExecAborted.into();
    }

    // Optimistic check: any watched key whose version moved aborts the
    // transaction with a null array, not an error.
    for (key, version) in &conn.watches {
        if !state.keyspace.watch_check(key, *version) {
            conn.clear_transaction();
            return Reply::Array(None);
        }
    }

    let queued = std::mem::take(&mut conn.queued);
    conn.in_multi = false;
    let mut replies = Vec::with_capacity(queued.len());
    for argv in queued {
        replies.push(super::execute(state, conn, &argv));
    }
    conn.clear_transaction();
    Reply::array(replies)
}

pub fn discard(_state: &ServerState, conn: &mut ConnState, _argv: &[Vec<u8>]) -> Reply {
    if !conn.in_multi {
        return Reply::Error("ERR DISCARD without MULTI".to_string());
    }
    conn.clear_transaction();
    Reply::ok()
}

pub fn watch(state: &ServerState, conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    if conn.in_multi {
        return Reply::Error("ERR WATCH inside MULTI is not allowed".to_string());
    }
    for key in &argv[1..] {
        let version = state.keyspace.key_version(key);
        conn.watches.push((key.clone(), version));
    }
    Reply::ok()
}

pub fn unwatch(_state: &ServerState, conn: &mut ConnState, _argv: &[Vec<u8>]) -> Reply {
    conn.watches.clear();
    Reply::ok()
}
