//! HyperLogLog command implementations (PFADD, PFCOUNT, PFMERGE).

use ember_common::{EmberError, EmberResult, Reply};
use ember_engine::value::{HllValue, Value};

use crate::state::{ConnState, ServerState};

use super::reply_from;

pub fn pfadd(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let elements: Vec<Vec<u8>> = argv[2..].to_vec();
    let result = state.keyspace.update_or_insert(
        &argv[1],
        || Value::HyperLogLog(HllValue::new()),
        |v| {
            let hll = v.as_hll_mut()?;
            let mut modified = false;
            for element in &elements {
                modified |= hll.add(element);
            }
            Ok::<bool, EmberError>(modified)
        },
    );
    match result {
        Ok(modified) => Reply::Integer(if modified { 1 } else { 0 }),
        Err(err) => err.into(),
    }
}

pub fn pfcount(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let hlls = collect(state, &argv[1..])?;
        let count = match hlls.split_first() {
            None => 0,
            Some((first, [])) => first.cardinality(),
            Some((first, rest)) => {
                // Multi-key counts merge into a scratch HLL, leaving the
                // stored values untouched.
                let mut merged = first.clone();
                let refs: Vec<&HllValue> = rest.iter().collect();
                merged.merge(&refs);
                merged.cardinality()
            }
        };
        Ok(Reply::Integer(count as i64))
    })())
}

pub fn pfmerge(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let sources = collect(state, &argv[2..])?;
        state.keyspace.update_or_insert(
            &argv[1],
            || Value::HyperLogLog(HllValue::new()),
            |v| {
                let hll = v.as_hll_mut()?;
                let refs: Vec<&HllValue> = sources.iter().collect();
                hll.merge(&refs);
                Ok::<(), EmberError>(())
            },
        )?;
        Ok(Reply::ok())
    })())
}

/// Reads the named HLLs; missing keys are skipped, wrong types fail.
fn collect(state: &ServerState, keys: &[Vec<u8>]) -> EmberResult<Vec<HllValue>> {
    let mut hlls = Vec::with_capacity(keys.len());
    for key in keys {
        match state.keyspace.view(key, |v| v.as_hll().map(|h| h.clone())) {
            Some(Ok(hll)) => hlls.push(hll),
            Some(Err(err)) => return Err(err),
            None => {}
        }
    }
    Ok(hlls)
}
