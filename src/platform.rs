//! Chat platforms tracked by the ranking system.

use serde::{Deserialize, Serialize};

/// A chat platform with its own presence, identifiers and group state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Gateway-based chat/voice service.
    Discord,
    /// Voice server reached over the ServerQuery interface.
    Teamspeak,
}

impl Platform {
    /// Both platforms, in tick order.
    pub const ALL: [Platform; 2] = [Platform::Discord, Platform::Teamspeak];

    /// Lowercase identifier used in keys, channel names and stored rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Discord => "discord",
            Platform::Teamspeak => "teamspeak",
        }
    }

    /// Pub/sub channel the command responder for this platform listens on.
    pub fn command_channel(&self) -> String {
        format!("{}:commands", self.as_str())
    }

    /// Key holding the published list of online user ids.
    pub fn online_users_key(&self) -> String {
        format!("{}:online_users", self.as_str())
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Discord => write!(f, "Discord"),
            Platform::Teamspeak => write!(f, "TeamSpeak"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discord" => Ok(Platform::Discord),
            "teamspeak" => Ok(Platform::Teamspeak),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}
