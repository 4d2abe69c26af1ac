//! Authentication and ACL administration (AUTH, HELLO, ACL subcommands).

use ember_common::{EmberError, Reply};

use crate::state::{ConnState, ServerState};

use super::{arg_str, reply_from};

/// AUTH [username] password
pub fn auth(state: &ServerState, conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    let (username, password) = match argv.len() {
        2 => ("default".to_string(), argv[1].clone()),
        3 => (
            String::from_utf8_lossy(&argv[1]).to_string(),
            argv[2].clone(),
        ),
        _ => return EmberError::WrongArity("auth".to_string()).into(),
    };
    match state.acl.authenticate(&username, Some(&password)) {
        Some(user) => {
            conn.user = Some(user);
            Reply::ok()
        }
        None => EmberError::AuthFailed.into(),
    }
}

/// HELLO [protover [AUTH username password]]
pub fn hello(state: &ServerState, conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        if argv.len() > 1 {
            let proto: u8 = arg_str(argv, 1)?.parse().map_err(|_| {
                EmberError::Internal("NOPROTO unsupported protocol version".to_string())
            })?;
            if proto != 2 && proto != 3 {
                return Ok(Reply::Error(
                    "NOPROTO unsupported protocol version".to_string(),
                ));
            }
            let mut idx = 2;
            while idx < argv.len() {
                match arg_str(argv, idx)?.to_ascii_uppercase().as_str() {
                    "AUTH" if idx + 2 < argv.len() => {
                        let username = String::from_utf8_lossy(&argv[idx + 1]).to_string();
                        match state.acl.authenticate(&username, Some(&argv[idx + 2])) {
                            Some(user) => conn.user = Some(user),
                            None => return Err(EmberError::AuthFailed),
                        }
                        idx += 3;
                    }
                    _ => return Err(EmberError::Syntax),
                }
            }
            conn.proto = proto;
        }
        if conn.user.is_none() {
            return Err(EmberError::AuthRequired);
        }

        Ok(Reply::Map(vec![
            (Reply::bulk(b"server"), Reply::bulk(b"emberkv")),
            (Reply::bulk(b"version"), Reply::bulk(b"0.1.0")),
            (
                Reply::bulk(b"proto"),
                Reply::Integer(conn.proto as i64),
            ),
            (Reply::bulk(b"id"), Reply::Integer(conn.id as i64)),
            (Reply::bulk(b"mode"), Reply::bulk(b"standalone")),
            (Reply::bulk(b"role"), Reply::bulk(b"master")),
        ]))
    })())
}

/// ACL WHOAMI|LIST|USERS|SETUSER|GETUSER|DELUSER|LOG
pub fn acl(state: &ServerState, conn: &mut ConnState, argv: &[Vec<u8>]) -> Reply {
    reply_from((|| {
        let sub = arg_str(argv, 1)?.to_ascii_uppercase();
        match sub.as_str() {
            "WHOAMI" => {
                let name = conn
                    .user
                    .as_ref()
                    .map(|u| u.name.clone())
                    .unwrap_or_default();
                Ok(Reply::bulk(name.as_bytes()))
            }
            "LIST" => Ok(Reply::array(
                state
                    .acl
                    .list()
                    .into_iter()
                    .map(Reply::bulk_string)
                    .collect(),
            )),
            "USERS" => Ok(Reply::array(
                state
                    .acl
                    .usernames()
                    .into_iter()
                    .map(Reply::bulk_string)
                    .collect(),
            )),
            "SETUSER" => {
                if argv.len() < 3 {
                    return Err(EmberError::WrongArity("acl|setuser".to_string()));
                }
                let username = arg_str(argv, 2)?.to_string();
                let mut rules = Vec::with_capacity(argv.len() - 3);
                for idx in 3..argv.len() {
                    rules.push(arg_str(argv, idx)?);
                }
                state.acl.set_user(&username, &rules)?;
                Ok(Reply::ok())
            }
            "GETUSER" => {
                if argv.len() != 3 {
                    return Err(EmberError::WrongArity("acl|getuser".to_string()));
                }
                match state.acl.get_user(arg_str(argv, 2)?) {
                    Some(user) => Ok(Reply::bulk(user.describe().as_bytes())),
                    None => Ok(Reply::nil()),
                }
            }
            "DELUSER" => {
                if argv.len() != 3 {
                    return Err(EmberError::WrongArity("acl|deluser".to_string()));
                }
                let removed = state.acl.del_user(arg_str(argv, 2)?)?;
                Ok(Reply::Integer(if removed { 1 } else { 0 }))
            }
            "LOG" => {
                let entries = state.acl.log_entries();
                Ok(Reply::array(
                    entries
                        .into_iter()
                        .map(|entry| {
                            Reply::Map(vec![
                                (
                                    Reply::bulk(b"username"),
                                    Reply::bulk_string(entry.username),
                                ),
                                (
                                    Reply::bulk(b"reason"),
                                    Reply::bulk_string(format!("{:?}", entry.denial).to_lowercase()),
                                ),
                                (Reply::bulk(b"object"), Reply::bulk_string(entry.object)),
                            ])
                        })
                        .collect(),
                ))
            }
            _ => Err(EmberError::Syntax),
        }
    })())
}
