//! ServerQuery line protocol codec.
//!
//! Commands and replies are single lines of space separated `key=value` pairs with
//! the values escaped. Replies holding several entries separate them with `|`, and
//! every command ends with an `error id=.. msg=..` status line. Lines starting with
//! `notify` are events and may arrive between a command and its status.

use std::collections::HashMap;
use std::fmt::Display;

/// Status id of a successful command.
pub const STATUS_OK: u32 = 0;
/// Query returned no rows.
pub const STATUS_EMPTY_RESULT: u32 = 1281;
/// Client already in the group.
pub const STATUS_DUPLICATE_ENTRY: u32 = 2561;
/// Channel name already taken.
pub const STATUS_CHANNEL_NAME_IN_USE: u32 = 771;
/// Query client banned.
pub const STATUS_BANNED: u32 = 3329;

/// Escape a value for the query protocol.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            ' ' => out.push_str("\\s"),
            '|' => out.push_str("\\p"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0B}' => out.push_str("\\v"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape`].
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('s') => out.push(' '),
            Some('p') => out.push('|'),
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0C}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{0B}'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// A query command under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<(String, String)>,
    options: Vec<String>,
}

impl Command {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
            options: Vec::new(),
        }
    }

    /// Add a `key=value` argument.
    pub fn arg(mut self, key: &str, value: impl Display) -> Self {
        self.args.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a `-option` flag.
    pub fn option(mut self, option: &str) -> Self {
        self.options.push(option.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire form without the line terminator.
    pub fn to_line(&self) -> String {
        let mut line = self.name.clone();
        for (key, value) in &self.args {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(&escape(value));
        }
        for option in &self.options {
            line.push_str(" -");
            line.push_str(option);
        }
        line
    }
}

/// One reply entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRecord {
    fields: HashMap<String, String>,
}

impl QueryRecord {
    /// Parse one `|`-free entry.
    pub fn parse(entry: &str) -> Self {
        let fields = entry
            .split(' ')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), unescape(value)),
                None => (pair.to_string(), String::new()),
            })
            .collect();
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Comma separated id list such as `client_servergroups`.
    pub fn get_id_list(&self, key: &str) -> Vec<u64> {
        self.get(key)
            .map(|v| v.split(',').filter_map(|id| id.trim().parse().ok()).collect())
            .unwrap_or_default()
    }
}

/// Split a data line into its entries.
pub fn parse_records(line: &str) -> Vec<QueryRecord> {
    line.split('|').map(QueryRecord::parse).collect()
}

/// Status line closing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStatus {
    pub id: u32,
    pub message: String,
}

impl QueryStatus {
    pub fn is_ok(&self) -> bool {
        self.id == STATUS_OK
    }
}

/// Parse an `error id=.. msg=..` line.
pub fn parse_status(line: &str) -> Option<QueryStatus> {
    let rest = line.strip_prefix("error ")?;
    let record = QueryRecord::parse(rest);
    Some(QueryStatus {
        id: record.get("id")?.parse().ok()?,
        message: record.get("msg").unwrap_or_default().to_string(),
    })
}

/// Server-pushed event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: String,
    pub record: QueryRecord,
}

/// Parse a `notify...` line.
pub fn parse_notification(line: &str) -> Option<Notification> {
    if !line.starts_with("notify") {
        return None;
    }
    let (kind, rest) = line.split_once(' ').unwrap_or((line, ""));
    Some(Notification {
        kind: kind.to_string(),
        record: QueryRecord::parse(rest),
    })
}

/// Why a client left the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Timeout,
    Kicked,
    Banned,
    Quit,
    ServerShutdown,
    Other(u32),
}

impl LeaveReason {
    pub fn from_id(id: u32) -> Self {
        match id {
            3 => LeaveReason::Timeout,
            5 => LeaveReason::Kicked,
            6 => LeaveReason::Banned,
            8 => LeaveReason::Quit,
            11 => LeaveReason::ServerShutdown,
            other => LeaveReason::Other(other),
        }
    }
}

/// Presence-relevant server events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Joined {
        clid: u64,
        database_id: Option<u64>,
        unique_id: String,
        nickname: String,
        /// Regular voice clients report type 0, query clients 1
        regular: bool,
        server_groups: Option<Vec<u64>>,
    },
    Left {
        clid: u64,
        reason: LeaveReason,
    },
}

impl ClientEvent {
    /// Interpret a notification; events other than enter/leave yield `None`.
    pub fn from_notification(notification: &Notification) -> Option<Self> {
        let record = &notification.record;
        match notification.kind.as_str() {
            "notifycliententerview" => Some(ClientEvent::Joined {
                clid: record.get_u64("clid")?,
                database_id: record.get_u64("client_database_id"),
                unique_id: record.get("client_unique_identifier")?.to_string(),
                nickname: record.get("client_nickname").unwrap_or_default().to_string(),
                regular: record.get("client_type").unwrap_or("0") == "0",
                server_groups: record
                    .get("client_servergroups")
                    .map(|_| record.get_id_list("client_servergroups")),
            }),
            "notifyclientleftview" => Some(ClientEvent::Left {
                clid: record.get_u64("clid")?,
                reason: LeaveReason::from_id(record.get_u64("reasonid").unwrap_or(8) as u32),
            }),
            _ => None,
        }
    }
}
