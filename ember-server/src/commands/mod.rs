//! # Command Dispatch
//!
//! Purpose: The table mapping command names to handlers, plus the shared
//! execute pipeline: lookup → arity → authentication → ACL → memory
//! admission → handler. Handlers are plain functions composing engine
//! primitives; they return a typed `Reply` and never panic.
//!
//! Implementations are split by type family, one module per family.

pub mod acl_ops;
pub mod hash_ops;
pub mod hll_ops;
pub mod key_ops;
pub mod list_ops;
pub mod pubsub_ops;
pub mod server_ops;
pub mod set_ops;
pub mod stream_ops;
pub mod string_ops;
pub mod txn_ops;
pub mod zset_ops;

use ember_common::{EmberError, EmberResult, Reply};

use crate::state::{ConnState, ServerState};

/// Handler signature shared by every command.
pub type Handler = fn(&ServerState, &mut ConnState, &[Vec<u8>]) -> Reply;

/// Static description of one command.
pub struct CommandSpec {
    pub name: &'static str,
    /// Minimum argv length including the command name.
    pub min_args: usize,
    /// argv index of the key checked against ACL key patterns.
    pub key_pos: Option<usize>,
    /// Write commands go through memory admission before running.
    pub is_write: bool,
    pub handler: Handler,
}

macro_rules! spec {
    ($name:literal, $min:expr, $key:expr, $write:expr, $handler:path) => {
        CommandSpec {
            name: $name,
            min_args: $min,
            key_pos: $key,
            is_write: $write,
            handler: $handler,
        }
    };
}

/// The dispatch table. Kept sorted by family for maintenance; lookup is a
/// linear scan, cheap next to any command's real work.
pub static COMMANDS: &[CommandSpec] = &[
    // Connection / server
    spec!("ping", 1, None, false, server_ops::ping),
    spec!("echo", 2, None, false, server_ops::echo),
    spec!("hello", 1, None, false, acl_ops::hello),
    spec!("auth", 2, None, false, acl_ops::auth),
    spec!("info", 1, None, false, server_ops::info),
    spec!("config", 2, None, false, server_ops::config),
    spec!("command", 1, None, false, server_ops::command),
    spec!("memory", 2, None, false, server_ops::memory),
    spec!("dbsize", 1, None, false, key_ops::dbsize),
    spec!("flushdb", 1, None, true, key_ops::flushdb),
    // Strings
    spec!("get", 2, Some(1), false, string_ops::get),
    spec!("set", 3, Some(1), true, string_ops::set),
    spec!("setnx", 3, Some(1), true, string_ops::setnx),
    spec!("append", 3, Some(1), true, string_ops::append),
    spec!("strlen", 2, Some(1), false, string_ops::strlen),
    spec!("getrange", 4, Some(1), false, string_ops::getrange),
    spec!("setrange", 4, Some(1), true, string_ops::setrange),
    spec!("incr", 2, Some(1), true, string_ops::incr),
    spec!("decr", 2, Some(1), true, string_ops::decr),
    spec!("incrby", 3, Some(1), true, string_ops::incrby),
    spec!("decrby", 3, Some(1), true, string_ops::decrby),
    spec!("incrbyfloat", 3, Some(1), true, string_ops::incrbyfloat),
    spec!("mget", 2, Some(1), false, string_ops::mget),
    spec!("mset", 3, Some(1), true, string_ops::mset),
    // Keys
    spec!("del", 2, Some(1), true, key_ops::del),
    spec!("unlink", 2, Some(1), true, key_ops::del),
    spec!("exists", 2, Some(1), false, key_ops::exists),
    spec!("type", 2, Some(1), false, key_ops::type_cmd),
    spec!("rename", 3, Some(1), true, key_ops::rename),
    spec!("randomkey", 1, None, false, key_ops::randomkey),
    spec!("keys", 2, None, false, key_ops::keys),
    spec!("expire", 3, Some(1), true, key_ops::expire),
    spec!("pexpire", 3, Some(1), true, key_ops::pexpire),
    spec!("ttl", 2, Some(1), false, key_ops::ttl),
    spec!("pttl", 2, Some(1), false, key_ops::pttl),
    spec!("persist", 2, Some(1), true, key_ops::persist),
    spec!("object", 2, Some(2), false, key_ops::object),
    // Lists
    spec!("lpush", 3, Some(1), true, list_ops::lpush),
    spec!("rpush", 3, Some(1), true, list_ops::rpush),
    spec!("lpop", 2, Some(1), true, list_ops::lpop),
    spec!("rpop", 2, Some(1), true, list_ops::rpop),
    spec!("llen", 2, Some(1), false, list_ops::llen),
    spec!("lindex", 3, Some(1), false, list_ops::lindex),
    spec!("lset", 4, Some(1), true, list_ops::lset),
    spec!("lrange", 4, Some(1), false, list_ops::lrange),
    spec!("ltrim", 4, Some(1), true, list_ops::ltrim),
    // Sets
    spec!("sadd", 3, Some(1), true, set_ops::sadd),
    spec!("srem", 3, Some(1), true, set_ops::srem),
    spec!("sismember", 3, Some(1), false, set_ops::sismember),
    spec!("scard", 2, Some(1), false, set_ops::scard),
    spec!("smembers", 2, Some(1), false, set_ops::smembers),
    spec!("spop", 2, Some(1), true, set_ops::spop),
    spec!("srandmember", 2, Some(1), false, set_ops::srandmember),
    spec!("sunion", 2, Some(1), false, set_ops::sunion),
    spec!("sinter", 2, Some(1), false, set_ops::sinter),
    spec!("sdiff", 2, Some(1), false, set_ops::sdiff),
    // Sorted sets
    spec!("zadd", 4, Some(1), true, zset_ops::zadd),
    spec!("zrem", 3, Some(1), true, zset_ops::zrem),
    spec!("zscore", 3, Some(1), false, zset_ops::zscore),
    spec!("zincrby", 4, Some(1), true, zset_ops::zincrby),
    spec!("zcard", 2, Some(1), false, zset_ops::zcard),
    spec!("zrank", 3, Some(1), false, zset_ops::zrank),
    spec!("zrevrank", 3, Some(1), false, zset_ops::zrevrank),
    spec!("zrange", 4, Some(1), false, zset_ops::zrange),
    spec!("zrevrange", 4, Some(1), false, zset_ops::zrevrange),
    spec!("zrangebyscore", 4, Some(1), false, zset_ops::zrangebyscore),
    spec!("zcount", 4, Some(1), false, zset_ops::zcount),
    // Hashes
    spec!("hset", 4, Some(1), true, hash_ops::hset),
    spec!("hsetnx", 4, Some(1), true, hash_ops::hsetnx),
    spec!("hget", 3, Some(1), false, hash_ops::hget),
    spec!("hmget", 3, Some(1), false, hash_ops::hmget),
    spec!("hdel", 3, Some(1), true, hash_ops::hdel),
    spec!("hexists", 3, Some(1), false, hash_ops::hexists),
    spec!("hlen", 2, Some(1), false, hash_ops::hlen),
    spec!("hkeys", 2, Some(1), false, hash_ops::hkeys),
    spec!("hvals", 2, Some(1), false, hash_ops::hvals),
    spec!("hgetall", 2, Some(1), false, hash_ops::hgetall),
    spec!("hincrby", 4, Some(1), true, hash_ops::hincrby),
    spec!("hexpire", 6, Some(1), true, hash_ops::hexpire),
    spec!("hpersist", 5, Some(1), true, hash_ops::hpersist),
    spec!("httl", 5, Some(1), false, hash_ops::httl),
    // HyperLogLog
    spec!("pfadd", 2, Some(1), true, hll_ops::pfadd),
    spec!("pfcount", 2, Some(1), false, hll_ops::pfcount),
    spec!("pfmerge", 2, Some(1), true, hll_ops::pfmerge),
    // Streams
    spec!("xadd", 5, Some(1), true, stream_ops::xadd),
    spec!("xlen", 2, Some(1), false, stream_ops::xlen),
    spec!("xrange", 4, Some(1), false, stream_ops::xrange),
    // Pub/Sub (executor side)
    spec!("publish", 3, None, false, pubsub_ops::publish),
    spec!("pubsub", 2, None, false, pubsub_ops::pubsub),
    // Transactions
    spec!("multi", 1, None, false, txn_ops::multi),
    spec!("exec", 1, None, false, txn_ops::exec),
    spec!("discard", 1, None, false, txn_ops::discard),
    spec!("watch", 2, Some(1), false, txn_ops::watch),
    spec!("unwatch", 1, None, false, txn_ops::unwatch),
    // ACL administration
    spec!("acl", 2, None, false, acl_ops::acl),
];

/// Finds a command by its lowercase name.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Commands allowed before authentication.
fn allowed_unauthenticated(name: &str) -> bool {
    matches!(name, "auth" | "hello" | "quit" | "reset")
}

/// Runs one command through the full pipeline.
pub fn execute(state: &ServerState, conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let reply = execute_inner(state, conn, argv);
    if reply.is_error() {
        state.metrics.record_error();
    }
    reply
}

fn execute_inner(state: &ServerState, conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let Some(first) = argv.first() else {
        return EmberError::Syntax.into();
    };
    let name = String::from_utf8_lossy(first).to_ascii_lowercase();

    let Some(spec) = lookup(&name) else {
        return EmberError::UnknownCommand(name).into();
    };
    if argv.len() < spec.min_args {
        return EmberError::WrongArity(name).into();
    }

    if conn.user.is_none() && !allowed_unauthenticated(&name) {
        return EmberError::AuthRequired.into();
    }
    if let Some(user) = conn.user.clone() {
        let key = spec.key_pos.and_then(|pos| argv.get(pos)).map(|k| k.as_slice());
        if !state.acl.can_execute(&user, &name, key) {
            return EmberError::NoPermission(name).into();
        }
    }

    if let Some(key) = spec.key_pos.and_then(|pos| argv.get(pos)) {
        if spec.is_write {
            let payload: usize = argv.iter().skip(2).map(|a| a.len()).sum();
            state.evictor.on_set(key, payload);
        } else {
            state.evictor.on_access(key);
        }
    }
    if spec.is_write {
        if state.evictor.needs_eviction(&state.keyspace) {
            state.evictor.evict(&state.keyspace);
        }
        if state.evictor.write_refused(&state.keyspace) {
            return EmberError::OutOfMemory.into();
        }
    }

    (spec.handler)(state, conn, argv)
}

// --- Shared argument helpers -------------------------------------------------

/// Parses an argv entry as UTF-8.
pub(crate) fn arg_str(argv: &[Vec<u8>], index: usize) -> EmberResult<&str> {
    std::str::from_utf8(&argv[index]).map_err(|_| EmberError::Syntax)
}

/// Parses an argv entry as a signed 64-bit integer.
pub(crate) fn arg_i64(argv: &[Vec<u8>], index: usize) -> EmberResult<i64> {
    arg_str(argv, index)?
        .parse()
        .map_err(|_| EmberError::NotAnInteger)
}

/// Parses an argv entry as a float (NaN rejected).
pub(crate) fn arg_f64(argv: &[Vec<u8>], index: usize) -> EmberResult<f64> {
    let value: f64 = arg_str(argv, index)?
        .parse()
        .map_err(|_| EmberError::NotAFloat)?;
    if value.is_nan() {
        return Err(EmberError::NotAFloat);
    }
    Ok(value)
}

/// Converts a fallible handler body into a reply.
pub(crate) fn reply_from(result: EmberResult<Reply>) -> Reply {
    match result {
        Ok(reply) => reply,
        Err(err) => err.into(),
    }
}
