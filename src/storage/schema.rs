//! Database schema definitions for VoiceRank.

/// SQL schema for creating all database tables.
pub const SCHEMA: &str = r#"
-- One record per person; each external identifier belongs to at most one record
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sso_id TEXT UNIQUE,
    discord_id TEXT UNIQUE,
    teamspeak_id TEXT UNIQUE,
    name TEXT,
    level INTEGER NOT NULL DEFAULT 1,
    division INTEGER NOT NULL DEFAULT 1,
    discord_channel INTEGER,
    teamspeak_channel INTEGER,
    discord_moveable INTEGER NOT NULL DEFAULT 1,
    teamspeak_moveable INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_division ON users(division);

-- Presence minutes per platform identity
CREATE TABLE IF NOT EXISTS time_counters (
    platform TEXT NOT NULL,
    platform_id TEXT NOT NULL,
    total_minutes INTEGER NOT NULL DEFAULT 0,
    daily_minutes INTEGER NOT NULL DEFAULT 0,
    weekly_minutes INTEGER NOT NULL DEFAULT 0,
    monthly_minutes INTEGER NOT NULL DEFAULT 0,
    season_minutes INTEGER NOT NULL DEFAULT 0,
    last_update TEXT,
    PRIMARY KEY (platform, platform_id)
);

-- Login streaks per platform identity
CREATE TABLE IF NOT EXISTS login_streaks (
    platform TEXT NOT NULL,
    platform_id TEXT NOT NULL,
    logins INTEGER NOT NULL DEFAULT 0,
    current_streak INTEGER NOT NULL DEFAULT 0,
    longest_streak INTEGER NOT NULL DEFAULT 0,
    last_login TEXT NOT NULL,
    PRIMARY KEY (platform, platform_id)
);

-- Minutes per weekday and time of day
CREATE TABLE IF NOT EXISTS activity_heatmap (
    platform TEXT NOT NULL,
    platform_id TEXT NOT NULL,
    day_of_week INTEGER NOT NULL CHECK (day_of_week BETWEEN 0 AND 6),
    time_of_day TEXT NOT NULL,
    minutes INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (platform, platform_id, day_of_week, time_of_day)
);

-- Hourly online user counts
CREATE TABLE IF NOT EXISTS usage_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_at TEXT NOT NULL,
    platform TEXT NOT NULL,
    user_count INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_usage_stats_recorded ON usage_stats(platform, recorded_at);

-- Period reset watermarks (single row)
CREATE TABLE IF NOT EXISTS reset_log (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_daily TEXT,
    last_weekly TEXT,
    last_monthly TEXT
);

-- Last credited tick per platform
CREATE TABLE IF NOT EXISTS accrual_ticks (
    platform TEXT PRIMARY KEY,
    last_tick INTEGER NOT NULL
);
"#;

/// Schema version table.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;
