//! # Connection Handling
//!
//! Purpose: One task per client connection. The task reads RESP frames,
//! runs connection-local commands (handshake, transactions bookkeeping,
//! subscriptions) inline, forwards everything else to the owning
//! partition's command loop, and interleaves Pub/Sub push frames with
//! command replies on the write side.
//!
//! Per-client ordering holds because the task awaits each command's reply
//! before parsing the next frame.

use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use ember_common::{EmberError, Reply};
use ember_engine::pubsub::{ClientId, PubSubMessage, Subscriber};

use crate::commands;
use crate::resp::{RespError, RespParser, encode_reply};
use crate::server::{CommandJob, Dispatcher};
use crate::state::{ConnState, ServerState};

/// Delivery handle handed to the router; the connection task drains the
/// queue into push frames. A send only fails when the connection is gone.
struct PushSubscriber {
    tx: mpsc::UnboundedSender<PubSubMessage>,
}

impl Subscriber for PushSubscriber {
    fn deliver(&self, message: PubSubMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Commands the connection runs inline instead of queueing to a partition.
fn is_local(name: &str) -> bool {
    matches!(
        name,
        "ping" | "echo" | "hello" | "auth" | "multi" | "discard" | "watch" | "unwatch"
    )
}

/// Commands allowed while a RESP2 connection is in subscriber mode.
fn allowed_in_subscribe(name: &str) -> bool {
    matches!(
        name,
        "subscribe" | "unsubscribe" | "psubscribe" | "punsubscribe" | "ping" | "quit" | "reset"
    )
}

/// Commands excluded from MULTI queueing.
fn is_txn_control(name: &str) -> bool {
    matches!(
        name,
        "multi" | "exec" | "discard" | "watch" | "unwatch" | "quit" | "reset"
    )
}

/// Handles one client connection until EOF, protocol error, or shutdown.
pub async fn handle_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
    worker_id: usize,
) -> std::io::Result<()> {
    let client_id = state.next_client_id();
    debug!(client_id, worker_id, "client connected");
    state.metrics.record_connection_opened();

    let conn = Arc::new(Mutex::new(ConnState::new(client_id, &state)));
    let (push_tx, mut push_rx) = mpsc::unbounded_channel();
    let subscriber: Arc<dyn Subscriber> = Arc::new(PushSubscriber { tx: push_tx });

    let (mut read_half, mut write_half) = stream.into_split();
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut out = Vec::with_capacity(4 * 1024);

    let driver = ConnDriver {
        state: Arc::clone(&state),
        dispatcher,
        conn: Arc::clone(&conn),
        subscriber,
        client_id,
    };

    'outer: loop {
        tokio::select! {
            read = read_half.read_buf(&mut buffer) => {
                if read? == 0 {
                    break;
                }
                loop {
                    match parser.parse(&mut buffer) {
                        Ok(Some(argv)) => {
                            let (replies, quit) = driver.run_command(argv).await;
                            let proto = conn.lock().proto;
                            out.clear();
                            for reply in &replies {
                                encode_reply(reply, proto, &mut out);
                            }
                            write_half.write_all(&out).await?;
                            if quit {
                                break 'outer;
                            }
                        }
                        Ok(None) => break,
                        Err(RespError::Protocol) => {
                            out.clear();
                            encode_reply(
                                &Reply::Error("ERR Protocol error".to_string()),
                                conn.lock().proto,
                                &mut out,
                            );
                            let _ = write_half.write_all(&out).await;
                            break 'outer;
                        }
                    }
                }
            }
            message = push_rx.recv() => {
                let Some(message) = message else { break };
                let proto = conn.lock().proto;
                out.clear();
                encode_reply(&push_frame(message), proto, &mut out);
                write_half.write_all(&out).await?;
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }

    state.pubsub.remove_client(client_id);
    state.metrics.record_connection_closed();
    debug!(client_id, "client disconnected");
    Ok(())
}

/// Renders a routed Pub/Sub message as its wire frame.
fn push_frame(message: PubSubMessage) -> Reply {
    match message {
        PubSubMessage::Message { channel, payload } => Reply::Push(vec![
            Reply::bulk(b"message"),
            Reply::Bulk(Some(channel)),
            Reply::Bulk(Some(payload)),
        ]),
        PubSubMessage::PatternMessage {
            pattern,
            channel,
            payload,
        } => Reply::Push(vec![
            Reply::bulk(b"pmessage"),
            Reply::Bulk(Some(pattern)),
            Reply::Bulk(Some(channel)),
            Reply::Bulk(Some(payload)),
        ]),
    }
}

/// Per-connection command router.
struct ConnDriver {
    state: Arc<ServerState>,
    dispatcher: Arc<Dispatcher>,
    conn: Arc<Mutex<ConnState>>,
    subscriber: Arc<dyn Subscriber>,
    client_id: ClientId,
}

impl ConnDriver {
    /// Runs one parsed command, returning the replies to write and whether
    /// the connection should close.
    async fn run_command(&self, argv: Vec<Vec<u8>>) -> (Vec<Reply>, bool) {
        let Some(first) = argv.first() else {
            return (vec![EmberError::Syntax.into()], false);
        };
        let name = String::from_utf8_lossy(first).to_ascii_lowercase();

        if name == "quit" {
            return (vec![Reply::ok()], true);
        }
        if name == "reset" {
            let mut conn = self.conn.lock();
            conn.clear_transaction();
            conn.subscriptions = 0;
            drop(conn);
            self.state.pubsub.remove_client(self.client_id);
            return (vec![Reply::Simple("RESET".to_string())], false);
        }

        // MULTI buffers everything except transaction control.
        {
            let mut conn = self.conn.lock();
            if conn.in_multi && !is_txn_control(&name) {
                match commands::lookup(&name) {
                    Some(spec) if argv.len() >= spec.min_args => {
                        conn.queued.push(argv);
                        return (vec![Reply::Simple("QUEUED".to_string())], false);
                    }
                    Some(_) => {
                        conn.multi_error = true;
                        return (vec![EmberError::WrongArity(name).into()], false);
                    }
                    None => {
                        conn.multi_error = true;
                        return (vec![EmberError::UnknownCommand(name).into()], false);
                    }
                }
            }
            // RESP2 subscriber mode restricts the command set.
            if conn.subscriptions > 0 && conn.proto == 2 && !allowed_in_subscribe(&name) {
                return (
                    vec![Reply::Error(format!(
                        "ERR Can't execute '{name}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT / RESET are allowed in subscribe mode"
                    ))],
                    false,
                );
            }
        }

        match name.as_str() {
            "subscribe" | "psubscribe" => (self.subscribe(&name, &argv), false),
            "unsubscribe" | "punsubscribe" => (self.unsubscribe(&name, &argv), false),
            _ if is_local(&name) => {
                let mut conn = self.conn.lock();
                (vec![commands::execute(&self.state, &mut conn, &argv)], false)
            }
            _ => (vec![self.dispatch(&name, argv).await], false),
        }
    }

    /// Forwards a command to its partition's command loop and awaits the
    /// reply.
    async fn dispatch(&self, name: &str, argv: Vec<Vec<u8>>) -> Reply {
        let partition = match commands::lookup(name) {
            Some(spec) => {
                let routing_key = match spec.name {
                    // PUBLISH orders by channel slot.
                    "publish" => argv.get(1),
                    _ => spec.key_pos.and_then(|pos| argv.get(pos)),
                };
                routing_key
                    .map(|key| self.state.keyspace.partition_of_key(key))
                    .unwrap_or(0)
            }
            None => 0,
        };

        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        let job = CommandJob {
            argv,
            conn: Arc::clone(&self.conn),
            reply_tx,
        };
        if let Err(err) = self.dispatcher.dispatch(partition, job) {
            self.state.metrics.record_overload();
            return err.into();
        }
        match reply_rx.await {
            Ok(reply) => reply,
            // The command loop went away mid-flight (shutdown).
            Err(_) => EmberError::Overload.into(),
        }
    }

    fn subscribe(&self, name: &str, argv: &[Vec<u8>]) -> Vec<Reply> {
        if argv.len() < 2 {
            return vec![EmberError::WrongArity(name.to_string()).into()];
        }
        let targets: Vec<Vec<u8>> = argv[1..].to_vec();

        // Channel ACL applies at subscribe time.
        let user = self.conn.lock().user.clone();
        if let Some(user) = user {
            for target in &targets {
                if !self.state.acl.can_access_channel(&user, target) {
                    return vec![EmberError::NoPermission(name.to_string()).into()];
                }
            }
        } else {
            return vec![EmberError::AuthRequired.into()];
        }

        let confirmations = if name == "subscribe" {
            self.state
                .pubsub
                .subscribe(self.client_id, &self.subscriber, &targets)
        } else {
            self.state
                .pubsub
                .psubscribe(self.client_id, &self.subscriber, &targets)
        };

        let mut conn = self.conn.lock();
        confirmations
            .into_iter()
            .map(|(target, total)| {
                conn.subscriptions = total;
                Reply::Push(vec![
                    Reply::bulk(name.as_bytes()),
                    Reply::Bulk(Some(target)),
                    Reply::Integer(total as i64),
                ])
            })
            .collect()
    }

    fn unsubscribe(&self, name: &str, argv: &[Vec<u8>]) -> Vec<Reply> {
        let targets: Vec<Vec<u8>> = argv[1..].to_vec();
        let confirmations = if name == "unsubscribe" {
            self.state.pubsub.unsubscribe(self.client_id, &targets)
        } else {
            self.state.pubsub.punsubscribe(self.client_id, &targets)
        };

        let mut conn = self.conn.lock();
        confirmations
            .into_iter()
            .map(|(target, total)| {
                conn.subscriptions = total;
                let target_reply = if target.is_empty() {
                    Reply::nil()
                } else {
                    Reply::Bulk(Some(target))
                };
                Reply::Push(vec![
                    Reply::bulk(name.as_bytes()),
                    target_reply,
                    Reply::Integer(total as i64),
                ])
            })
            .collect()
    }
}
