//! Stream command implementations (XADD, XLEN, XRANGE).

use ember_common::{EmberError, Reply};
use ember_engine::value::{StreamId, StreamValue, Value};

use crate::state::{ConnState, ServerState};

use super::{arg_i64, reply_from};

/// XADD key <id|*> field value [field value ...]
pub fn xadd(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let id = if argv[2] == b"*" {
            None
        } else {
            Some(StreamId::parse(&argv[2], 0)?)
        };
        let pairs = &argv[3..];
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(EmberError::WrongArity("xadd".to_string()));
        }
        let fields: Vec<(Vec<u8>, Vec<u8>)> = pairs
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();

        let assigned = state.keyspace.update_or_insert(
            &argv[1],
            || Value::Stream(StreamValue::new()),
            |v| v.as_stream_mut()?.append(id, fields),
        )?;
        Ok(Reply::Bulk(Some(assigned.to_string().into_bytes())))
    })())
}

pub fn xlen(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    match state
        .keyspace
        .view(&argv[1], |v| v.as_stream().map(|s| s.len()))
    {
        Some(Ok(len)) => Reply::Integer(len as i64),
        Some(Err(err)) => err.into(),
        None => Reply::Integer(0),
    }
}

/// XRANGE key start end [COUNT n]
pub fn xrange(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let start = StreamId::parse(&argv[2], 0)?;
        let end = StreamId::parse(&argv[3], u64::MAX)?;
        let count = match argv.get(4) {
            Some(option) if option.eq_ignore_ascii_case(b"COUNT") => {
                let count = arg_i64(argv, 5).map_err(|_| EmberError::Syntax)?;
                if count < 0 {
                    return Err(EmberError::Syntax);
                }
                Some(count as usize)
            }
            Some(_) => return Err(EmberError::Syntax),
            None => None,
        };

        let entries = state.keyspace.view(&argv[1], |v| {
            let stream = v.as_stream()?;
            Ok::<Vec<Reply>, EmberError>(
                stream
                    .range(start, end, count)
                    .into_iter()
                    .map(|entry| {
                        let mut fields = Vec::with_capacity(entry.fields.len() * 2);
                        for (field, value) in &entry.fields {
                            fields.push(Reply::Bulk(Some(field.clone())));
                            fields.push(Reply::Bulk(Some(value.clone())));
                        }
                        Reply::array(vec![
                            Reply::Bulk(Some(entry.id.to_string().into_bytes())),
                            Reply::array(fields),
                        ])
                    })
                    .collect(),
            )
        });
        match entries {
            Some(Ok(entries)) => Ok(Reply::array(entries)),
            Some(Err(err)) => Err(err),
            None => Ok(Reply::empty_array()),
        }
    })())
}
