//! # ACL Authorizer
//!
//! Purpose: User authentication and per-command, per-key, per-channel
//! authorization. Passwords are stored only as SHA-256 hex digests and
//! compared in constant time. A bounded log keeps the most recent denials
//! for diagnostics.
//!
//! Check order for a command: user enabled → command allowed (allow-all or
//! allow-set) → command not denied → key matches a pattern (or allow-all
//! keys). Channel access is an independent pattern set.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use ahash::RandomState;
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use tracing::info;

use ember_common::{EmberError, EmberResult, glob_match};

/// Number of denial records retained for diagnostics.
const ACL_LOG_CAPACITY: usize = 128;

/// What an ACL denial was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclDenial {
    Auth,
    Command,
    Key,
    Channel,
}

/// One retained denial record.
#[derive(Debug, Clone)]
pub struct AclLogEntry {
    pub username: String,
    pub denial: AclDenial,
    /// Command name, key, or channel the denial was about.
    pub object: String,
    pub at: Instant,
}

/// One ACL user.
#[derive(Debug, Clone)]
pub struct AclUser {
    pub name: String,
    pub enabled: bool,
    pub nopass: bool,
    /// SHA-256 hex digests of accepted passwords.
    pub password_hashes: Vec<String>,
    pub allow_all_commands: bool,
    pub allowed_commands: HashSet<String, RandomState>,
    pub denied_commands: HashSet<String, RandomState>,
    pub allow_all_keys: bool,
    pub key_patterns: Vec<Vec<u8>>,
    pub allow_all_channels: bool,
    pub channel_patterns: Vec<Vec<u8>>,
}

impl AclUser {
    fn disabled(name: &str) -> AclUser {
        AclUser {
            name: name.to_string(),
            enabled: false,
            nopass: false,
            password_hashes: Vec::new(),
            allow_all_commands: false,
            allowed_commands: HashSet::default(),
            denied_commands: HashSet::default(),
            allow_all_keys: false,
            key_patterns: Vec::new(),
            allow_all_channels: false,
            channel_patterns: Vec::new(),
        }
    }

    /// The default user: enabled, passwordless, unrestricted.
    fn default_user() -> AclUser {
        AclUser {
            name: "default".to_string(),
            enabled: true,
            nopass: true,
            password_hashes: Vec::new(),
            allow_all_commands: true,
            allowed_commands: HashSet::default(),
            denied_commands: HashSet::default(),
            allow_all_keys: true,
            key_patterns: Vec::new(),
            allow_all_channels: true,
            channel_patterns: Vec::new(),
        }
    }

    fn accepts_password(&self, password: &[u8]) -> bool {
        if self.nopass {
            return true;
        }
        let digest = sha256_hex(password);
        self.password_hashes
            .iter()
            .any(|hash| constant_time_eq(hash.as_bytes(), digest.as_bytes()))
    }

    /// Describes the user in `ACL LIST` rule syntax.
    pub fn describe(&self) -> String {
        let mut parts = vec![format!("user {}", self.name)];
        parts.push(if self.enabled { "on" } else { "off" }.to_string());
        if self.nopass {
            parts.push("nopass".to_string());
        }
        for hash in &self.password_hashes {
            parts.push(format!("#{hash}"));
        }
        if self.allow_all_commands {
            parts.push("+@all".to_string());
        } else {
            let mut allowed: Vec<&String> = self.allowed_commands.iter().collect();
            allowed.sort();
            for command in allowed {
                parts.push(format!("+{command}"));
            }
        }
        let mut denied: Vec<&String> = self.denied_commands.iter().collect();
        denied.sort();
        for command in denied {
            parts.push(format!("-{command}"));
        }
        if self.allow_all_keys {
            parts.push("~*".to_string());
        } else {
            for pattern in &self.key_patterns {
                parts.push(format!("~{}", String::from_utf8_lossy(pattern)));
            }
        }
        if self.allow_all_channels {
            parts.push("&*".to_string());
        } else {
            for pattern in &self.channel_patterns {
                parts.push(format!("&{}", String::from_utf8_lossy(pattern)));
            }
        }
        parts.join(" ")
    }
}

/// The ACL table plus denial log.
pub struct AclAuthorizer {
    users: RwLock<HashMap<String, Arc<AclUser>, RandomState>>,
    log: Mutex<VecDeque<AclLogEntry>>,
}

impl Default for AclAuthorizer {
    fn default() -> Self {
        AclAuthorizer::new()
    }
}

impl AclAuthorizer {
    /// Creates the table with the undeletable default user.
    pub fn new() -> AclAuthorizer {
        let mut users: HashMap<String, Arc<AclUser>, RandomState> = HashMap::default();
        users.insert("default".to_string(), Arc::new(AclUser::default_user()));
        AclAuthorizer {
            users: RwLock::new(users),
            log: Mutex::new(VecDeque::with_capacity(ACL_LOG_CAPACITY)),
        }
    }

    /// Authenticates a user; None on unknown user, disabled user, or wrong
    /// password. Failures land in the denial log.
    pub fn authenticate(&self, username: &str, password: Option<&[u8]>) -> Option<Arc<AclUser>> {
        let user = self.users.read().get(username).cloned();
        let accepted = match &user {
            Some(user) if user.enabled => match password {
                Some(password) => user.accepts_password(password),
                None => user.nopass,
            },
            _ => false,
        };
        if accepted {
            user
        } else {
            self.log_denial(username, AclDenial::Auth, "auth");
            None
        }
    }

    /// Authorizes one command invocation, optionally against a key.
    pub fn can_execute(&self, user: &AclUser, command: &str, key: Option<&[u8]>) -> bool {
        if !user.enabled {
            self.log_denial(&user.name, AclDenial::Command, command);
            return false;
        }
        let command = command.to_ascii_lowercase();
        if !user.allow_all_commands && !user.allowed_commands.contains(&command) {
            self.log_denial(&user.name, AclDenial::Command, &command);
            return false;
        }
        if user.denied_commands.contains(&command) {
            self.log_denial(&user.name, AclDenial::Command, &command);
            return false;
        }
        if let Some(key) = key {
            let allowed = user.allow_all_keys
                || user.key_patterns.iter().any(|p| glob_match(p, key));
            if !allowed {
                self.log_denial(&user.name, AclDenial::Key, &String::from_utf8_lossy(key));
                return false;
            }
        }
        true
    }

    /// Authorizes Pub/Sub access to a channel.
    pub fn can_access_channel(&self, user: &AclUser, channel: &[u8]) -> bool {
        if !user.enabled {
            return false;
        }
        let allowed = user.allow_all_channels
            || user.channel_patterns.iter().any(|p| glob_match(p, channel));
        if !allowed {
            self.log_denial(
                &user.name,
                AclDenial::Channel,
                &String::from_utf8_lossy(channel),
            );
        }
        allowed
    }

    /// Applies `ACL SETUSER` rules to a user, creating it when absent.
    pub fn set_user(&self, username: &str, rules: &[&str]) -> EmberResult<()> {
        let mut users = self.users.write();
        let mut user = users
            .get(username)
            .map(|u| (**u).clone())
            .unwrap_or_else(|| AclUser::disabled(username));

        for rule in rules {
            apply_rule(&mut user, rule)?;
        }
        users.insert(username.to_string(), Arc::new(user));
        info!(user = username, "acl user updated");
        Ok(())
    }

    /// Deletes a user; the default user is undeletable.
    pub fn del_user(&self, username: &str) -> EmberResult<bool> {
        if username == "default" {
            return Err(EmberError::Internal(
                "the 'default' user cannot be removed".to_string(),
            ));
        }
        Ok(self.users.write().remove(username).is_some())
    }

    /// Fetches a user by name.
    pub fn get_user(&self, username: &str) -> Option<Arc<AclUser>> {
        self.users.read().get(username).cloned()
    }

    /// `ACL LIST`: one rule line per user, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let users = self.users.read();
        let mut lines: Vec<String> = users.values().map(|u| u.describe()).collect();
        lines.sort();
        lines
    }

    /// All usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let users = self.users.read();
        let mut names: Vec<String> = users.keys().cloned().collect();
        names.sort();
        names
    }

    /// Most recent denials, newest first.
    pub fn log_entries(&self) -> Vec<AclLogEntry> {
        self.log.lock().iter().cloned().collect()
    }

    fn log_denial(&self, username: &str, denial: AclDenial, object: &str) {
        let mut log = self.log.lock();
        if log.len() == ACL_LOG_CAPACITY {
            log.pop_back();
        }
        log.push_front(AclLogEntry {
            username: username.to_string(),
            denial,
            object: object.to_string(),
            at: Instant::now(),
        });
    }
}

/// Applies a single SETUSER rule token.
fn apply_rule(user: &mut AclUser, rule: &str) -> EmberResult<()> {
    match rule {
        "on" => user.enabled = true,
        "off" => user.enabled = false,
        "nopass" => {
            user.nopass = true;
            user.password_hashes.clear();
        }
        "resetpass" => {
            user.nopass = false;
            user.password_hashes.clear();
        }
        "allcommands" | "+@all" => {
            user.allow_all_commands = true;
            user.denied_commands.clear();
        }
        "nocommands" | "-@all" => {
            user.allow_all_commands = false;
            user.allowed_commands.clear();
        }
        "allkeys" | "~*" => {
            user.allow_all_keys = true;
            user.key_patterns.clear();
        }
        "resetkeys" => {
            user.allow_all_keys = false;
            user.key_patterns.clear();
        }
        "allchannels" | "&*" => {
            user.allow_all_channels = true;
            user.channel_patterns.clear();
        }
        "resetchannels" => {
            user.allow_all_channels = false;
            user.channel_patterns.clear();
        }
        "reset" => {
            let name = user.name.clone();
            *user = AclUser::disabled(&name);
        }
        _ => {
            if let Some(password) = rule.strip_prefix('>') {
                user.nopass = false;
                user.password_hashes.push(sha256_hex(password.as_bytes()));
            } else if let Some(hash) = rule.strip_prefix('#') {
                if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(EmberError::Syntax);
                }
                user.nopass = false;
                user.password_hashes.push(hash.to_ascii_lowercase());
            } else if let Some(command) = rule.strip_prefix('+') {
                user.allowed_commands.insert(command.to_ascii_lowercase());
            } else if let Some(command) = rule.strip_prefix('-') {
                user.denied_commands.insert(command.to_ascii_lowercase());
            } else if let Some(pattern) = rule.strip_prefix('~') {
                user.allow_all_keys = false;
                user.key_patterns.push(pattern.as_bytes().to_vec());
            } else if let Some(pattern) = rule.strip_prefix('&') {
                user.allow_all_channels = false;
                user.channel_patterns.push(pattern.as_bytes().to_vec());
            } else {
                return Err(EmberError::Syntax);
            }
        }
    }
    Ok(())
}

/// SHA-256 digest as lowercase hex.
fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Length-safe constant-time byte comparison; the scan never short-circuits
/// on a mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b) {
        acc |= x ^ y;
    }
    acc == 0
}
