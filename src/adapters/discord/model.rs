//! Gateway and REST payloads.
//!
//! Only the fields the adapter reads are modelled; everything else is ignored.
//! Snowflakes travel as strings and are parsed with [`snowflake`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway opcodes.
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// GUILDS | GUILD_MEMBERS | GUILD_VOICE_STATES
pub const GATEWAY_INTENTS: u64 = 1 | (1 << 1) | (1 << 7);

/// Audit log action recorded when a member is moved between voice channels.
pub const AUDIT_MEMBER_MOVE: u32 = 26;

/// Guild voice channel type.
pub const CHANNEL_TYPE_VOICE: u8 = 2;

/// Permission bits used in channel overwrites.
pub mod permission {
    pub const MANAGE_CHANNELS: u64 = 1 << 4;
    pub const VIEW_CHANNEL: u64 = 1 << 10;
    pub const CONNECT: u64 = 1 << 20;
    pub const MOVE_MEMBERS: u64 = 1 << 24;
    pub const MANAGE_ROLES: u64 = 1 << 28;
}

/// Parse a snowflake id.
pub fn snowflake(id: &str) -> Option<u64> {
    id.parse().ok()
}

/// Parse a list of snowflakes, skipping malformed entries.
pub fn snowflakes(ids: &[String]) -> Vec<u64> {
    ids.iter().filter_map(|id| snowflake(id)).collect()
}

/// One gateway frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn new(op: u8, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Member {
    pub fn user_id(&self) -> Option<u64> {
        self.user.as_ref().and_then(|u| snowflake(&u.id))
    }

    /// Nickname, then global name, then username.
    pub fn display_name(&self) -> String {
        if let Some(nick) = &self.nick {
            return nick.clone();
        }
        match &self.user {
            Some(user) => user
                .global_name
                .clone()
                .unwrap_or_else(|| user.username.clone()),
            None => String::new(),
        }
    }

    pub fn is_bot(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.bot)
    }

    pub fn role_ids(&self) -> Vec<u64> {
        snowflakes(&self.roles)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub member: Option<Member>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuildCreate {
    pub id: String,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuildMember {
    pub guild_id: String,
    #[serde(flatten)]
    pub member: Member,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuildMemberRemove {
    pub guild_id: String,
    pub user: User,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ready {
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogOptions {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub count: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub action_type: u32,
    #[serde(default)]
    pub options: Option<AuditLogOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLog {
    #[serde(default)]
    pub audit_log_entries: Vec<AuditLogEntry>,
}

/// Dispatch events the adapter acts on.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready(Ready),
    GuildCreate(GuildCreate),
    VoiceStateUpdate(VoiceState),
    GuildMemberAdd(GuildMember),
    GuildMemberUpdate(GuildMember),
    GuildMemberRemove(GuildMemberRemove),
    /// Any other dispatch, by name
    Other(String),
}

impl GatewayEvent {
    /// Decode a dispatch by its event name.
    pub fn from_dispatch(name: &str, data: Value) -> Result<Self, serde_json::Error> {
        Ok(match name {
            "READY" => GatewayEvent::Ready(serde_json::from_value(data)?),
            "GUILD_CREATE" => GatewayEvent::GuildCreate(serde_json::from_value(data)?),
            "VOICE_STATE_UPDATE" => GatewayEvent::VoiceStateUpdate(serde_json::from_value(data)?),
            "GUILD_MEMBER_ADD" => GatewayEvent::GuildMemberAdd(serde_json::from_value(data)?),
            "GUILD_MEMBER_UPDATE" => GatewayEvent::GuildMemberUpdate(serde_json::from_value(data)?),
            "GUILD_MEMBER_REMOVE" => GatewayEvent::GuildMemberRemove(serde_json::from_value(data)?),
            other => GatewayEvent::Other(other.to_string()),
        })
    }
}
