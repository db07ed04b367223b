//! Persistent presence counters.
//!
//! Time counters, login streaks and the activity heatmap are keyed by
//! (platform, platform id); levels and divisions live on the identity record and are
//! computed from the minutes of all of a user's platform identities.

use crate::platform::Platform;
use crate::ranks::{DivisionCandidate, RankChange, RankEngine, RankKind, StoredRanks};
use crate::storage::database::{Database, DatabaseError, DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::storage::heatmap::{heatmap_slot, HeatmapCell, TimeOfDay};
use crate::storage::queries::{self, queries};
use crate::storage::reset::{due_resets, ResetPeriod, ResetWatermark};
use crate::storage::streak::LoginStreak;
use chrono::{NaiveDate, NaiveDateTime, Timelike, Weekday};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

/// Accumulated minutes of one platform identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeCounters {
    pub total: u64,
    pub daily: u64,
    pub weekly: u64,
    pub monthly: u64,
    pub season: u64,
    pub last_update: Option<NaiveDateTime>,
}

/// Platform identifiers of one identity record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformIds {
    pub discord: Option<String>,
    pub teamspeak: Option<String>,
}

impl PlatformIds {
    pub fn get(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::Discord => self.discord.as_deref(),
            Platform::Teamspeak => self.teamspeak.as_deref(),
        }
    }
}

/// One hourly online user count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSample {
    pub recorded_at: NaiveDateTime,
    pub user_count: u32,
}

/// Counter store shared by the orchestrator, the workers and the command responders.
#[derive(Clone)]
pub struct AccrualStore {
    pub(crate) db: Arc<Database>,
}

impl AccrualStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create or rename the identity record of a platform user.
    pub fn upsert_identity(
        &self,
        platform: Platform,
        platform_id: &str,
        name: &str,
        now: NaiveDateTime,
    ) -> Result<(), DatabaseError> {
        let created_at = format_timestamp(now);
        self.db.with_connection(|conn| {
            conn.execute(
                queries(platform).upsert_user,
                params![platform_id, name, created_at],
            )?;
            Ok(())
        })
    }

    /// Count a login and advance the user's streak.
    pub fn record_login(
        &self,
        platform: Platform,
        platform_id: &str,
        today: NaiveDate,
    ) -> Result<LoginStreak, DatabaseError> {
        self.db.with_transaction(|tx| {
            let streak = match load_streak(tx, platform, platform_id)? {
                Some(previous) => previous.advance(today),
                None => LoginStreak::first(today),
            };

            tx.execute(
                queries::UPSERT_STREAK,
                params![
                    platform.as_str(),
                    platform_id,
                    streak.logins,
                    streak.current,
                    streak.longest,
                    streak.last_login.format(DATE_FORMAT).to_string(),
                ],
            )?;
            Ok(streak)
        })
    }

    /// Credit one tick of presence to every listed user.
    ///
    /// Adds a minute to all time counters and to the heatmap cell of `at`. The tick
    /// number is persisted per platform, so crediting the same (or an older) tick again
    /// does nothing. Returns false when nothing was credited; an empty list never touches
    /// the database.
    pub fn accrue(
        &self,
        platform: Platform,
        tick: i64,
        at: NaiveDateTime,
        platform_ids: &[String],
    ) -> Result<bool, DatabaseError> {
        if platform_ids.is_empty() {
            return Ok(false);
        }

        let (day_of_week, time_of_day) = heatmap_slot(at);
        let updated_at = format_timestamp(at);

        self.db.with_transaction(|tx| {
            let last_tick: Option<i64> = tx
                .query_row(queries::SELECT_LAST_TICK, [platform.as_str()], |row| row.get(0))
                .optional()?;
            if last_tick.is_some_and(|last| last >= tick) {
                tracing::debug!("{} tick {} already credited", platform, tick);
                return Ok(false);
            }

            let mut time = tx.prepare_cached(queries::ACCRUE_TIME)?;
            let mut heatmap = tx.prepare_cached(queries::ACCRUE_HEATMAP)?;
            for platform_id in platform_ids {
                time.execute(params![platform.as_str(), platform_id, updated_at])?;
                heatmap.execute(params![
                    platform.as_str(),
                    platform_id,
                    day_of_week,
                    time_of_day.as_str()
                ])?;
            }

            tx.execute(queries::UPSERT_LAST_TICK, params![platform.as_str(), tick])?;
            Ok(true)
        })
    }

    /// Recompute levels and divisions of the listed users, then reallocate the top division.
    ///
    /// Every stored rank that moved is returned, in the order it was written.
    pub fn recompute_ranks(
        &self,
        platform: Platform,
        platform_ids: &[String],
        engine: &RankEngine,
    ) -> Result<Vec<RankChange>, DatabaseError> {
        self.db.with_transaction(|tx| {
            let mut changes = Vec::new();

            {
                let mut select = tx.prepare_cached(queries(platform).select_totals)?;
                for platform_id in platform_ids {
                    let row = select
                        .query_row([platform_id], |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                tier(row.get(1)?),
                                tier(row.get(2)?),
                                minutes(row.get(3)?),
                                minutes(row.get(4)?),
                            ))
                        })
                        .optional()?;
                    let Some((user_id, level, division, total, season)) = row else {
                        continue;
                    };

                    let next_level = engine.level_for(total);
                    if next_level != level {
                        changes.push(RankChange {
                            user_id,
                            kind: RankKind::Level,
                            from: level,
                            to: next_level,
                        });
                    }

                    let next_division = engine.next_division(division, season);
                    if next_division != division {
                        changes.push(RankChange {
                            user_id,
                            kind: RankKind::Division,
                            from: division,
                            to: next_division,
                        });
                    }
                }
            }
            apply_changes(tx, &changes)?;

            let candidates = load_top_candidates(tx)?;
            let top = engine.reconcile_top_division(&candidates);
            apply_changes(tx, &top)?;
            changes.extend(top);

            Ok(changes)
        })
    }

    /// Stored level and division of a platform user.
    pub fn stored_ranks(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<StoredRanks>, DatabaseError> {
        self.db.with_connection(|conn| {
            Ok(conn
                .query_row(queries(platform).select_ranks, [platform_id], |row| {
                    Ok(StoredRanks {
                        level: tier(row.get(0)?),
                        division: tier(row.get(1)?),
                    })
                })
                .optional()?)
        })
    }

    /// Platform identifiers of an identity record.
    pub fn platform_ids(&self, user_id: i64) -> Result<PlatformIds, DatabaseError> {
        self.db.with_connection(|conn| {
            conn.query_row(queries::SELECT_PLATFORM_IDS, [user_id], |row| {
                Ok(PlatformIds {
                    discord: row.get(0)?,
                    teamspeak: row.get(1)?,
                })
            })
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound(format!("user {}", user_id)))
        })
    }

    /// Record an hourly usage sample, truncated to the minute.
    pub fn record_usage(
        &self,
        platform: Platform,
        user_count: usize,
        at: NaiveDateTime,
    ) -> Result<(), DatabaseError> {
        let recorded_at = format_timestamp(truncate_to_minute(at));
        self.db.with_connection(|conn| {
            conn.execute(
                queries::INSERT_USAGE,
                params![recorded_at, platform.as_str(), user_count as i64],
            )?;
            Ok(())
        })
    }

    /// Usage samples of a platform, oldest first.
    pub fn usage_samples(&self, platform: Platform) -> Result<Vec<UsageSample>, DatabaseError> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(queries::SELECT_USAGE)?;
            let rows = stmt.query_map([platform.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut samples = Vec::new();
            for row in rows {
                let (recorded_at, user_count) = row?;
                if let Some(recorded_at) = parse_timestamp(&recorded_at) {
                    samples.push(UsageSample {
                        recorded_at,
                        user_count: user_count.max(0) as u32,
                    });
                }
            }
            Ok(samples)
        })
    }

    /// Persisted reset watermark.
    pub fn reset_watermark(&self) -> Result<ResetWatermark, DatabaseError> {
        self.db.with_connection(|conn| load_watermark(conn))
    }

    /// Zero every period counter whose boundary the watermark does not cover yet.
    ///
    /// Counters and watermark change in one transaction; the periods reset are returned.
    pub fn apply_due_resets(
        &self,
        now: NaiveDateTime,
        weekly_reset_day: Weekday,
    ) -> Result<Vec<ResetPeriod>, DatabaseError> {
        let stamp = format_timestamp(now);
        let due = self.db.with_transaction(|tx| {
            let due = due_resets(&load_watermark(tx)?, now, weekly_reset_day);
            for period in &due {
                let (reset, mark) = match period {
                    ResetPeriod::Daily => (queries::RESET_DAILY, queries::MARK_DAILY),
                    ResetPeriod::Weekly => (queries::RESET_WEEKLY, queries::MARK_WEEKLY),
                    ResetPeriod::Monthly => (queries::RESET_MONTHLY, queries::MARK_MONTHLY),
                };
                tx.execute(reset, [])?;
                tx.execute(mark, [&stamp])?;
            }
            Ok(due)
        })?;

        for period in &due {
            tracing::info!("Reset {} counters", period);
        }
        Ok(due)
    }

    /// Remember the channel created for a user.
    pub fn set_owned_channel(
        &self,
        platform: Platform,
        platform_id: &str,
        channel_id: u64,
    ) -> Result<bool, DatabaseError> {
        self.db.with_connection(|conn| {
            let updated = conn.execute(
                queries(platform).set_channel,
                params![platform_id, channel_id as i64],
            )?;
            Ok(updated > 0)
        })
    }

    /// Flag whether other users may move this user.
    pub fn set_moveable(
        &self,
        platform: Platform,
        platform_id: &str,
        moveable: bool,
    ) -> Result<bool, DatabaseError> {
        self.db.with_connection(|conn| {
            let updated = conn.execute(
                queries(platform).set_moveable,
                params![platform_id, moveable],
            )?;
            Ok(updated > 0)
        })
    }

    /// Time counters of a platform user.
    pub fn time_counters(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<TimeCounters>, DatabaseError> {
        self.db.with_connection(|conn| {
            Ok(conn
                .query_row(
                    queries::SELECT_TIME_COUNTERS,
                    params![platform.as_str(), platform_id],
                    |row| {
                        Ok(TimeCounters {
                            total: minutes(row.get(0)?),
                            daily: minutes(row.get(1)?),
                            weekly: minutes(row.get(2)?),
                            monthly: minutes(row.get(3)?),
                            season: minutes(row.get(4)?),
                            last_update: row
                                .get::<_, Option<String>>(5)?
                                .as_deref()
                                .and_then(parse_timestamp),
                        })
                    },
                )
                .optional()?)
        })
    }

    /// Heatmap cells of a platform user.
    pub fn heatmap(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Vec<HeatmapCell>, DatabaseError> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(queries::SELECT_HEATMAP)?;
            let rows = stmt.query_map(params![platform.as_str(), platform_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut cells = Vec::new();
            for row in rows {
                let (day_of_week, bucket, count) = row?;
                if let Some(time_of_day) = TimeOfDay::parse(&bucket) {
                    cells.push(HeatmapCell {
                        day_of_week: day_of_week.clamp(0, 6) as u8,
                        time_of_day,
                        minutes: minutes(count),
                    });
                }
            }
            Ok(cells)
        })
    }

    /// Login streak of a platform user.
    pub fn login_streak(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<LoginStreak>, DatabaseError> {
        self.db
            .with_connection(|conn| load_streak(conn, platform, platform_id))
    }
}

fn load_streak(
    conn: &Connection,
    platform: Platform,
    platform_id: &str,
) -> Result<Option<LoginStreak>, DatabaseError> {
    let row = conn
        .query_row(
            queries::SELECT_STREAK,
            params![platform.as_str(), platform_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((logins, current, longest, last_login)) = row else {
        return Ok(None);
    };
    let last_login = NaiveDate::parse_from_str(&last_login, DATE_FORMAT)
        .map_err(|e| DatabaseError::QueryFailed(format!("bad last_login: {}", e)))?;

    Ok(Some(LoginStreak {
        logins: logins.max(0) as u32,
        current: current.max(0) as u32,
        longest: longest.max(0) as u32,
        last_login,
    }))
}

fn load_watermark(conn: &Connection) -> Result<ResetWatermark, DatabaseError> {
    let row = conn
        .query_row(queries::SELECT_RESET_LOG, [], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })
        .optional()?;

    Ok(match row {
        Some((daily, weekly, monthly)) => ResetWatermark {
            daily: daily.as_deref().and_then(parse_timestamp),
            weekly: weekly.as_deref().and_then(parse_timestamp),
            monthly: monthly.as_deref().and_then(parse_timestamp),
        },
        None => ResetWatermark::default(),
    })
}

fn load_top_candidates(conn: &Connection) -> Result<Vec<DivisionCandidate>, DatabaseError> {
    let mut stmt = conn.prepare_cached(queries::SELECT_TOP_CANDIDATES)?;
    let rows = stmt.query_map([], |row| {
        Ok(DivisionCandidate {
            user_id: row.get(0)?,
            division: tier(row.get(2)?),
            season_minutes: minutes(row.get(4)?),
        })
    })?;

    let mut candidates = Vec::new();
    for row in rows {
        candidates.push(row?);
    }
    Ok(candidates)
}

fn apply_changes(conn: &Connection, changes: &[RankChange]) -> Result<(), DatabaseError> {
    for change in changes {
        let sql = match change.kind {
            RankKind::Level => queries::UPDATE_LEVEL,
            RankKind::Division => queries::UPDATE_DIVISION,
        };
        conn.execute(sql, params![change.user_id, change.to])?;
    }
    Ok(())
}

pub(crate) fn tier(value: i64) -> u8 {
    value.clamp(1, u8::MAX as i64) as u8
}

pub(crate) fn minutes(value: i64) -> u64 {
    value.max(0) as u64
}

pub(crate) fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok()
}

fn truncate_to_minute(at: NaiveDateTime) -> NaiveDateTime {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}
