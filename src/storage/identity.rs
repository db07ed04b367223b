//! Identity records and linking of platform identities.
//!
//! A record unifies one identifier per platform plus an optional single-sign-on id.
//! Linking a platform id to an SSO id that already owns another record merges the two.

use crate::platform::Platform;
use crate::storage::accrual::{format_timestamp, tier, AccrualStore};
use crate::storage::database::DatabaseError;
use crate::storage::queries::{self, queries};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Stored identity record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub id: i64,
    pub sso_id: Option<String>,
    pub discord_id: Option<String>,
    pub teamspeak_id: Option<String>,
    pub name: Option<String>,
    pub level: u8,
    pub division: u8,
    pub discord_channel: Option<u64>,
    pub teamspeak_channel: Option<u64>,
    pub discord_moveable: bool,
    pub teamspeak_moveable: bool,
}

impl IdentityRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sso_id: row.get(1)?,
            discord_id: row.get(2)?,
            teamspeak_id: row.get(3)?,
            name: row.get(4)?,
            level: tier(row.get(5)?),
            division: tier(row.get(6)?),
            discord_channel: row.get::<_, Option<i64>>(7)?.map(|c| c as u64),
            teamspeak_channel: row.get::<_, Option<i64>>(8)?.map(|c| c as u64),
            discord_moveable: row.get(9)?,
            teamspeak_moveable: row.get(10)?,
        })
    }

    pub fn platform_id(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::Discord => self.discord_id.as_deref(),
            Platform::Teamspeak => self.teamspeak_id.as_deref(),
        }
    }
}

/// First platform on which the two records hold different identifiers.
pub fn conflicting_platform(keep: &IdentityRecord, other: &IdentityRecord) -> Option<Platform> {
    Platform::ALL.into_iter().find(|&platform| {
        matches!(
            (keep.platform_id(platform), other.platform_id(platform)),
            (Some(a), Some(b)) if a != b
        )
    })
}

/// Combine two records into `keep`.
///
/// Identifiers missing on `keep` are taken from `other`. Ranks and owned channels take
/// the maximum; a user shielded from moves on either record stays shielded.
pub fn merge_records(keep: &IdentityRecord, other: &IdentityRecord) -> IdentityRecord {
    IdentityRecord {
        id: keep.id,
        sso_id: keep.sso_id.clone().or_else(|| other.sso_id.clone()),
        discord_id: keep.discord_id.clone().or_else(|| other.discord_id.clone()),
        teamspeak_id: keep.teamspeak_id.clone().or_else(|| other.teamspeak_id.clone()),
        name: keep.name.clone().or_else(|| other.name.clone()),
        level: keep.level.max(other.level),
        division: keep.division.max(other.division),
        discord_channel: keep.discord_channel.max(other.discord_channel),
        teamspeak_channel: keep.teamspeak_channel.max(other.teamspeak_channel),
        discord_moveable: keep.discord_moveable && other.discord_moveable,
        teamspeak_moveable: keep.teamspeak_moveable && other.teamspeak_moveable,
    }
}

impl AccrualStore {
    /// Attach a platform identity to the record owning `sso_id`.
    ///
    /// Creates the record when neither side exists and merges the two records when the
    /// platform identity already belongs to a different one. Returns the surviving id.
    /// Fails with [`DatabaseError::Conflict`] when the SSO record already holds another
    /// identifier on `platform`, or when the two records disagree on any platform.
    pub fn link_identity(
        &self,
        sso_id: &str,
        platform: Platform,
        platform_id: &str,
        now: NaiveDateTime,
    ) -> Result<i64, DatabaseError> {
        let created_at = format_timestamp(now);

        self.db.with_transaction(|tx| {
            let by_sso = load_record(tx, queries::SELECT_RECORD_BY_SSO, sso_id)?;
            let by_platform = load_record(tx, queries(platform).select_record, platform_id)?;

            match (by_sso, by_platform) {
                (None, None) => {
                    tx.execute(queries::INSERT_SSO_USER, params![sso_id, created_at])?;
                    let id = tx.last_insert_rowid();
                    tx.execute(queries(platform).set_platform_id, params![id, platform_id])?;
                    Ok(id)
                }
                (Some(record), None) => {
                    if let Some(existing) = record.platform_id(platform) {
                        return Err(DatabaseError::Conflict(format!(
                            "{} already linked to {} id {}",
                            sso_id, platform, existing
                        )));
                    }
                    tx.execute(
                        queries(platform).set_platform_id,
                        params![record.id, platform_id],
                    )?;
                    Ok(record.id)
                }
                (None, Some(record)) => {
                    tx.execute(queries::SET_SSO_ID, params![record.id, sso_id])?;
                    Ok(record.id)
                }
                (Some(keep), Some(other)) if keep.id == other.id => Ok(keep.id),
                (Some(keep), Some(other)) => merge_into(tx, &keep, &other),
            }
        })
    }

    /// Identity record holding a platform id.
    pub fn identity(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<IdentityRecord>, DatabaseError> {
        self.db
            .with_connection(|conn| load_record(conn, queries(platform).select_record, platform_id))
    }
}

fn load_record(
    conn: &Connection,
    sql: &str,
    key: &str,
) -> Result<Option<IdentityRecord>, DatabaseError> {
    Ok(conn
        .query_row(sql, [key], IdentityRecord::from_row)
        .optional()?)
}

/// Merge `other` into `keep` and delete `other`.
fn merge_into(
    conn: &Connection,
    keep: &IdentityRecord,
    other: &IdentityRecord,
) -> Result<i64, DatabaseError> {
    if let Some(platform) = conflicting_platform(keep, other) {
        return Err(DatabaseError::Conflict(format!(
            "records {} and {} hold different {} ids",
            keep.id, other.id, platform
        )));
    }
    let merged = merge_records(keep, other);

    // Free the unique identifiers before the kept record takes them over.
    conn.execute(queries::DELETE_USER, [other.id])?;
    conn.execute(
        queries::UPDATE_RECORD,
        params![
            merged.id,
            merged.sso_id,
            merged.discord_id,
            merged.teamspeak_id,
            merged.name,
            merged.level,
            merged.division,
            merged.discord_channel.map(|c| c as i64),
            merged.teamspeak_channel.map(|c| c as i64),
            merged.discord_moveable,
            merged.teamspeak_moveable,
        ],
    )?;

    tracing::info!("Merged identity {} into {}", other.id, keep.id);
    Ok(merged.id)
}
