//! SQL statements.
//!
//! Statements that differ per platform only by column live in one [`PlatformQueries`]
//! set per platform, so callers pick a set instead of splicing column names.

use crate::platform::Platform;

/// Selects `(id, level, division, total minutes, season minutes)` summed over both
/// platform identities of each user, followed by the given filter.
macro_rules! totals_query {
    ($filter:literal) => {
        concat!(
            "SELECT u.id, u.level, u.division, ",
            "COALESCE(d.total_minutes, 0) + COALESCE(t.total_minutes, 0), ",
            "COALESCE(d.season_minutes, 0) + COALESCE(t.season_minutes, 0) ",
            "FROM users u ",
            "LEFT JOIN time_counters d ON d.platform = 'discord' AND d.platform_id = u.discord_id ",
            "LEFT JOIN time_counters t ON t.platform = 'teamspeak' AND t.platform_id = u.teamspeak_id ",
            $filter
        )
    };
}

/// Identity record columns, in [`crate::storage::identity::IdentityRecord`] order.
macro_rules! record_query {
    ($filter:literal) => {
        concat!(
            "SELECT id, sso_id, discord_id, teamspeak_id, name, level, division, ",
            "discord_channel, teamspeak_channel, discord_moveable, teamspeak_moveable ",
            "FROM users ",
            $filter
        )
    };
}

/// Statements keyed by one platform's identifier column.
#[derive(Debug)]
pub(crate) struct PlatformQueries {
    pub upsert_user: &'static str,
    pub select_totals: &'static str,
    pub select_ranks: &'static str,
    pub select_record: &'static str,
    pub set_platform_id: &'static str,
    pub set_channel: &'static str,
    pub set_moveable: &'static str,
}

const DISCORD_QUERIES: PlatformQueries = PlatformQueries {
    upsert_user: "INSERT INTO users (discord_id, name, created_at) VALUES (?1, ?2, ?3)
                  ON CONFLICT(discord_id) DO UPDATE SET name = excluded.name",
    select_totals: totals_query!("WHERE u.discord_id = ?1"),
    select_ranks: "SELECT level, division FROM users WHERE discord_id = ?1",
    select_record: record_query!("WHERE discord_id = ?1"),
    set_platform_id: "UPDATE users SET discord_id = ?2 WHERE id = ?1",
    set_channel: "UPDATE users SET discord_channel = ?2 WHERE discord_id = ?1",
    set_moveable: "UPDATE users SET discord_moveable = ?2 WHERE discord_id = ?1",
};

const TEAMSPEAK_QUERIES: PlatformQueries = PlatformQueries {
    upsert_user: "INSERT INTO users (teamspeak_id, name, created_at) VALUES (?1, ?2, ?3)
                  ON CONFLICT(teamspeak_id) DO UPDATE SET name = excluded.name",
    select_totals: totals_query!("WHERE u.teamspeak_id = ?1"),
    select_ranks: "SELECT level, division FROM users WHERE teamspeak_id = ?1",
    select_record: record_query!("WHERE teamspeak_id = ?1"),
    set_platform_id: "UPDATE users SET teamspeak_id = ?2 WHERE id = ?1",
    set_channel: "UPDATE users SET teamspeak_channel = ?2 WHERE teamspeak_id = ?1",
    set_moveable: "UPDATE users SET teamspeak_moveable = ?2 WHERE teamspeak_id = ?1",
};

/// Statement set for a platform.
pub(crate) fn queries(platform: Platform) -> &'static PlatformQueries {
    match platform {
        Platform::Discord => &DISCORD_QUERIES,
        Platform::Teamspeak => &TEAMSPEAK_QUERIES,
    }
}

pub(crate) const SELECT_TOP_CANDIDATES: &str =
    totals_query!("WHERE u.division >= 5 ORDER BY 5 DESC, u.id ASC");

pub(crate) const SELECT_RECORD_BY_SSO: &str = record_query!("WHERE sso_id = ?1");

pub(crate) const SELECT_PLATFORM_IDS: &str =
    "SELECT discord_id, teamspeak_id FROM users WHERE id = ?1";

pub(crate) const UPDATE_LEVEL: &str = "UPDATE users SET level = ?2 WHERE id = ?1";

pub(crate) const UPDATE_DIVISION: &str = "UPDATE users SET division = ?2 WHERE id = ?1";

pub(crate) const INSERT_SSO_USER: &str =
    "INSERT INTO users (sso_id, created_at) VALUES (?1, ?2)";

pub(crate) const SET_SSO_ID: &str = "UPDATE users SET sso_id = ?2 WHERE id = ?1";

pub(crate) const UPDATE_RECORD: &str = "UPDATE users SET
    sso_id = ?2, discord_id = ?3, teamspeak_id = ?4, name = ?5, level = ?6, division = ?7,
    discord_channel = ?8, teamspeak_channel = ?9, discord_moveable = ?10, teamspeak_moveable = ?11
    WHERE id = ?1";

pub(crate) const DELETE_USER: &str = "DELETE FROM users WHERE id = ?1";

pub(crate) const ACCRUE_TIME: &str = "INSERT INTO time_counters
    (platform, platform_id, total_minutes, daily_minutes, weekly_minutes, monthly_minutes,
     season_minutes, last_update)
    VALUES (?1, ?2, 1, 1, 1, 1, 1, ?3)
    ON CONFLICT(platform, platform_id) DO UPDATE SET
        total_minutes = total_minutes + 1,
        daily_minutes = daily_minutes + 1,
        weekly_minutes = weekly_minutes + 1,
        monthly_minutes = monthly_minutes + 1,
        season_minutes = season_minutes + 1,
        last_update = excluded.last_update";

pub(crate) const ACCRUE_HEATMAP: &str = "INSERT INTO activity_heatmap
    (platform, platform_id, day_of_week, time_of_day, minutes)
    VALUES (?1, ?2, ?3, ?4, 1)
    ON CONFLICT(platform, platform_id, day_of_week, time_of_day) DO UPDATE SET
        minutes = minutes + 1";

pub(crate) const SELECT_LAST_TICK: &str =
    "SELECT last_tick FROM accrual_ticks WHERE platform = ?1";

pub(crate) const UPSERT_LAST_TICK: &str = "INSERT INTO accrual_ticks (platform, last_tick)
    VALUES (?1, ?2) ON CONFLICT(platform) DO UPDATE SET last_tick = excluded.last_tick";

pub(crate) const SELECT_TIME_COUNTERS: &str = "SELECT total_minutes, daily_minutes,
    weekly_minutes, monthly_minutes, season_minutes, last_update
    FROM time_counters WHERE platform = ?1 AND platform_id = ?2";

pub(crate) const SELECT_HEATMAP: &str = "SELECT day_of_week, time_of_day, minutes
    FROM activity_heatmap WHERE platform = ?1 AND platform_id = ?2
    ORDER BY day_of_week, time_of_day";

pub(crate) const SELECT_STREAK: &str = "SELECT logins, current_streak, longest_streak, last_login
    FROM login_streaks WHERE platform = ?1 AND platform_id = ?2";

pub(crate) const UPSERT_STREAK: &str = "INSERT INTO login_streaks
    (platform, platform_id, logins, current_streak, longest_streak, last_login)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(platform, platform_id) DO UPDATE SET
        logins = excluded.logins,
        current_streak = excluded.current_streak,
        longest_streak = excluded.longest_streak,
        last_login = excluded.last_login";

pub(crate) const INSERT_USAGE: &str =
    "INSERT INTO usage_stats (recorded_at, platform, user_count) VALUES (?1, ?2, ?3)";

pub(crate) const SELECT_USAGE: &str = "SELECT recorded_at, user_count FROM usage_stats
    WHERE platform = ?1 ORDER BY recorded_at";

pub(crate) const SELECT_RESET_LOG: &str =
    "SELECT last_daily, last_weekly, last_monthly FROM reset_log WHERE id = 1";

pub(crate) const RESET_DAILY: &str = "UPDATE time_counters SET daily_minutes = 0";
pub(crate) const RESET_WEEKLY: &str = "UPDATE time_counters SET weekly_minutes = 0";
pub(crate) const RESET_MONTHLY: &str = "UPDATE time_counters SET monthly_minutes = 0";

pub(crate) const MARK_DAILY: &str = "INSERT INTO reset_log (id, last_daily) VALUES (1, ?1)
    ON CONFLICT(id) DO UPDATE SET last_daily = excluded.last_daily";
pub(crate) const MARK_WEEKLY: &str = "INSERT INTO reset_log (id, last_weekly) VALUES (1, ?1)
    ON CONFLICT(id) DO UPDATE SET last_weekly = excluded.last_weekly";
pub(crate) const MARK_MONTHLY: &str = "INSERT INTO reset_log (id, last_monthly) VALUES (1, ?1)
    ON CONFLICT(id) DO UPDATE SET last_monthly = excluded.last_monthly";

