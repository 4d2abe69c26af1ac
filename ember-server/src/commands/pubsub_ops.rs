//! Executor-side Pub/Sub commands: PUBLISH and the PUBSUB introspection
//! family. Subscription commands live on the connection, which owns the
//! delivery handle.

use ember_common::{EmberError, Reply};

use crate::state::{ConnState, ServerState};

use super::{arg_str, reply_from};

pub fn publish(state: &ServerState, conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    if let Some(user) = conn.user.clone() {
        if !state.acl.can_access_channel(&user, &argv[1]) {
            return EmberError::NoPermission("publish".to_string()).into();
        }
    }
    let delivered = state.pubsub.publish(&argv[1], &argv[2]);
    Reply::Integer(delivered as i64)
}

/// PUBSUB CHANNELS [pattern] | NUMSUB [channel ...] | NUMPAT
pub fn pubsub(state: &ServerState, _conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let sub = arg_str(argv, 1)?.to_ascii_uppercase();
        match sub.as_str() {
            "CHANNELS" => {
                let filter = argv.get(2).map(|p| p.as_slice());
                let mut channels = state.pubsub.channels(filter);
                channels.sort();
                Ok(Reply::array(
                    channels.into_iter().map(|c| Reply::Bulk(Some(c))).collect(),
                ))
            }
            "NUMSUB" => {
                let counts = state.pubsub.numsub(&argv[2..]);
                let mut items = Vec::with_capacity(counts.len() * 2);
                for (channel, count) in counts {
                    items.push(Reply::Bulk(Some(channel)));
                    items.push(Reply::Integer(count as i64));
                }
                Ok(Reply::array(items))
            }
            "NUMPAT" => Ok(Reply::Integer(state.pubsub.numpat() as i64)),
            _ => Err(EmberError::Syntax),
        }
    })())
}
