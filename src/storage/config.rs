//! Application configuration.
//!
//! Loaded from `config.toml` in the project data directory (or the file named by
//! `VOICERANK_CONFIG`). Every section has defaults so a partial file is enough.
//! Secrets are never required in the file: they fall back to environment variables
//! and then the OS keyring.

use crate::ranks::{RankGroups, DEFAULT_DIVISION_THRESHOLDS, DEFAULT_LEVEL_THRESHOLDS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Keyring service name under which secrets are stored.
pub const KEYRING_SERVICE: &str = "voicerank";

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "VOICERANK_CONFIG";

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    pub database: DatabaseSettings,
    pub teamspeak: TeamspeakSettings,
    pub discord: DiscordSettings,
    pub bus: BusSettings,
    pub ranks: RankSettings,
    pub orchestrator: OrchestratorSettings,
}

impl AppConfig {
    /// Resolved database file path.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("voicerank.db"))
    }
}

/// Database settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Explicit database file; defaults to `<data_dir>/voicerank.db`
    pub path: Option<PathBuf>,
}

/// Voice server (ServerQuery) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamspeakSettings {
    pub enabled: bool,
    pub host: String,
    /// ServerQuery port (raw TCP)
    pub port: u16,
    pub username: String,
    /// Falls back to `VOICERANK_TEAMSPEAK_PASSWORD`, then the keyring
    pub password: Option<String>,
    /// Virtual server id selected with `use`
    pub server_id: u32,
    /// Members of this server group are never tracked
    pub excluded_group_id: Option<u64>,
    /// Parent channel for newly created owned channels
    pub parent_channel_id: u64,
    /// Parent channel owned channels move to when promoted
    pub apex_parent_channel_id: u64,
    /// Channel group given to the owner of a created channel
    pub owner_channel_group_id: u64,
    /// Server group that blocks other users from moving the member
    pub move_block_group_id: Option<u64>,
    pub reconnect_floor_secs: u64,
    pub reconnect_ceiling_secs: u64,
    /// Fixed wait after the server reports the query client as banned
    pub banned_wait_secs: u64,
    /// How long one event wait blocks before it counts as an idle poll
    pub event_wait_secs: u64,
    /// Interval of the full client list reconciliation
    pub rescan_interval_secs: u64,
    pub groups: RankGroups,
    pub reputation: ReputationSettings,
}

impl Default for TeamspeakSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 10011,
            username: "serveradmin".to_string(),
            password: None,
            server_id: 1,
            excluded_group_id: None,
            parent_channel_id: 0,
            apex_parent_channel_id: 0,
            owner_channel_group_id: 5,
            move_block_group_id: None,
            reconnect_floor_secs: 30,
            reconnect_ceiling_secs: 300,
            banned_wait_secs: 300,
            event_wait_secs: 240,
            rescan_interval_secs: 600,
            groups: RankGroups::default(),
            reputation: ReputationSettings::default(),
        }
    }
}

/// Origin address reputation lookup for low-level voice server users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationSettings {
    pub enabled: bool,
    /// Lookup endpoint; the address is appended as the last path segment
    pub api_url: String,
    /// Falls back to `VOICERANK_REPUTATION_KEY`, then the keyring
    pub api_key: Option<String>,
    /// Users below this level are checked
    pub below_level: u8,
    /// Risk score at or above which a user is flagged
    pub risk_threshold: u8,
    pub kick_reason: String,
}

impl Default for ReputationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "https://proxycheck.io/v3".to_string(),
            api_key: None,
            below_level: 5,
            risk_threshold: 67,
            kick_reason: "VPN or proxy connections are not allowed".to_string(),
        }
    }
}

/// Gateway platform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordSettings {
    pub enabled: bool,
    /// Falls back to `VOICERANK_DISCORD_TOKEN`, then the keyring
    pub token: Option<String>,
    pub guild_id: u64,
    /// Members holding this role are never tracked
    pub excluded_role_id: Option<u64>,
    /// Category for newly created owned channels
    pub parent_channel_id: Option<u64>,
    /// Category owned channels move to when promoted
    pub apex_parent_channel_id: Option<u64>,
    /// Role that protects the member from being moved
    pub move_block_role_id: Option<u64>,
    /// Roles allowed to move shielded members
    pub elevated_role_ids: Vec<u64>,
    /// Interval of the voice channel drift scan
    pub scan_interval_secs: u64,
    pub gateway_url: String,
    pub api_base: String,
    pub groups: RankGroups,
}

impl Default for DiscordSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            guild_id: 0,
            excluded_role_id: None,
            parent_channel_id: None,
            apex_parent_channel_id: None,
            move_block_role_id: None,
            elevated_role_ids: Vec::new(),
            scan_interval_secs: 300,
            gateway_url: "wss://gateway.discord.gg/?v=10&encoding=json".to_string(),
            api_base: "https://discord.com/api/v10".to_string(),
            groups: RankGroups::default(),
        }
    }
}

/// Which pub/sub medium carries the command bus and snapshot keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// In-process medium, usable when requester and responder share a process
    #[default]
    Memory,
    /// MQTT broker
    Mqtt,
}

/// Command bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub backend: BusBackend,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    /// Password lives in `VOICERANK_BROKER_PASSWORD` or the keyring
    pub keep_alive_secs: u64,
    /// Expiry of reply keys
    pub reply_ttl_secs: u64,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            backend: BusBackend::Memory,
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: format!(
                "voicerank-{}",
                uuid::Uuid::new_v4()
                    .simple()
                    .to_string()
                    .get(..8)
                    .unwrap_or("bot")
            ),
            username: None,
            keep_alive_secs: 60,
            reply_ttl_secs: 30,
            poll_interval_ms: 1000,
            max_poll_attempts: 30,
        }
    }
}

/// Rank threshold tables and top division size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankSettings {
    /// Minimum total minutes for levels 1..=25
    pub level_thresholds: Vec<u64>,
    /// Minimum season minutes for divisions 1..=5
    pub division_thresholds: Vec<u64>,
    /// Number of users holding the top division
    pub top_division_size: usize,
}

impl Default for RankSettings {
    fn default() -> Self {
        Self {
            level_thresholds: DEFAULT_LEVEL_THRESHOLDS.to_vec(),
            division_thresholds: DEFAULT_DIVISION_THRESHOLDS.to_vec(),
            top_division_size: 10,
        }
    }
}

/// Main loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub tick_secs: u64,
    pub sub_tick_secs: u64,
    /// Expiry of the published online user lists
    pub snapshot_ttl_secs: u64,
    /// Weekday of the weekly reset, 0 = Monday
    pub weekly_reset_day: u8,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            sub_tick_secs: 2,
            snapshot_ttl_secs: 10,
            weekly_reset_day: 0,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "voicerank", "VoiceRank")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| get_data_dir().join("config.toml"))
}

/// Load application configuration from file.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load configuration from an explicit path; a missing file yields defaults.
pub fn load_config_from(path: &std::path::Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig {
            data_dir: get_data_dir(),
            ..Default::default()
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    let mut config = parse_config(&content)?;
    config.data_dir = get_data_dir();

    Ok(config)
}

/// Parse configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save application configuration to file.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    let path = get_config_path();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Resolve a secret: explicit value, then environment variable, then OS keyring entry.
pub fn resolve_secret(
    configured: Option<&str>,
    env_var: &str,
    keyring_user: &str,
) -> Result<String, ConfigError> {
    if let Some(value) = configured.filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }

    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Ok(value);
        }
    }

    let entry = keyring::Entry::new(KEYRING_SERVICE, keyring_user)
        .map_err(|e| ConfigError::KeyringError(e.to_string()))?;

    match entry.get_password() {
        Ok(password) => Ok(password),
        Err(keyring::Error::NoEntry) => Err(ConfigError::MissingSecret(format!(
            "{} (set {} or keyring entry {}/{})",
            keyring_user, env_var, KEYRING_SERVICE, keyring_user
        ))),
        Err(e) => Err(ConfigError::KeyringError(e.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Missing secret: {0}")]
    MissingSecret(String),

    #[error("Keyring error: {0}")]
    KeyringError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = parse_config(
            r#"
            [teamspeak]
            enabled = true
            host = "voice.example.org"

            [ranks]
            top_division_size = 3
            "#,
        )
        .unwrap();

        assert!(config.teamspeak.enabled);
        assert_eq!(config.teamspeak.host, "voice.example.org");
        assert_eq!(config.teamspeak.port, 10011);
        assert_eq!(config.teamspeak.reconnect_floor_secs, 30);
        assert_eq!(config.ranks.top_division_size, 3);
        assert_eq!(config.ranks.level_thresholds.len(), 25);
        assert_eq!(config.bus.backend, BusBackend::Memory);
        assert_eq!(config.orchestrator.tick_secs, 60);
    }

    #[test]
    fn test_group_tables_parse() {
        let config = parse_config(
            r#"
            [discord]
            guild_id = 42

            [discord.groups]
            levels = [101, 102, 103]
            divisions = [201, 202, 203, 204, 205, 206]
            "#,
        )
        .unwrap();

        assert_eq!(config.discord.guild_id, 42);
        assert_eq!(config.discord.groups.level_group(2), Some(102));
        assert_eq!(config.discord.groups.division_group(6), Some(206));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let result = parse_config("[teamspeak\nport = ");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_configured_secret_wins() {
        let secret = resolve_secret(Some("hunter2"), "VOICERANK_TEST_UNUSED", "unused").unwrap();
        assert_eq!(secret, "hunter2");
    }

    #[test]
    fn test_env_secret_fallback() {
        std::env::set_var("VOICERANK_TEST_SECRET_ENV", "from-env");
        let secret = resolve_secret(None, "VOICERANK_TEST_SECRET_ENV", "unused").unwrap();
        assert_eq!(secret, "from-env");
    }

    #[test]
    fn test_database_path_default() {
        let config = AppConfig {
            data_dir: PathBuf::from("/var/lib/voicerank"),
            ..Default::default()
        };
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/voicerank/voicerank.db")
        );
    }
}
