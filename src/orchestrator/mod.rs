//! Main loop.
//!
//! Every sub-tick the live presence of each adapter is republished as a short-lived
//! snapshot key. Every full tick each platform's presence is credited: newcomers get
//! their identity and login streak updated, everyone present gets a minute, ranks are
//! recomputed and changed tiers are pushed to every platform the user is linked on.

pub mod schedule;

use crate::adapters::PlatformAdapter;
use crate::bus::BusMedium;
use crate::platform::Platform;
use crate::ranks::{assign_rank, RankChange, RankEngine};
use crate::storage::config::OrchestratorSettings;
use crate::storage::reset::weekday_from_index;
use crate::storage::{AccrualStore, DatabaseError, PlatformIds, ResetPeriod};
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

pub use schedule::{is_top_of_hour, tick_index, until_next_tick};

/// Errors that abort one platform's share of a tick.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Stored result of crediting one platform for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformTick {
    /// False when the tick was already credited or nobody was present
    pub credited: bool,
    /// Rank changes with the identifiers needed to correct them
    pub changes: Vec<(RankChange, PlatformIds)>,
}

/// Summary of one full tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Users credited per platform
    pub credited: Vec<(Platform, usize)>,
    pub rank_changes: usize,
    /// Group assignments that changed on a platform
    pub corrections: usize,
    pub resets: Vec<ResetPeriod>,
    /// Platforms whose work was aborted
    pub failed: Vec<Platform>,
}

/// Upsert identities and count logins of users who arrived since the last tick.
///
/// Runs on a blocking thread. `newcomers` are (id, name) pairs; each id is pushed onto
/// `registered` once its login is stored, so a later failure does not count it twice.
pub fn register_newcomers(
    store: &AccrualStore,
    platform: Platform,
    now: NaiveDateTime,
    newcomers: &[(String, String)],
    registered: &mut Vec<String>,
) -> Result<(), DatabaseError> {
    for (platform_id, name) in newcomers {
        store.upsert_identity(platform, platform_id, name, now)?;
        store.record_login(platform, platform_id, now.date())?;
        registered.push(platform_id.clone());
    }
    Ok(())
}

/// Credit one tick of presence for a platform.
///
/// Runs on a blocking thread.
pub fn credit_tick(
    store: &AccrualStore,
    engine: &RankEngine,
    platform: Platform,
    tick: i64,
    now: NaiveDateTime,
    present: &[String],
    record_usage: bool,
) -> Result<PlatformTick, DatabaseError> {
    if record_usage {
        store.record_usage(platform, present.len(), now)?;
    }

    let credited = store.accrue(platform, tick, now, present)?;
    if !credited {
        return Ok(PlatformTick::default());
    }

    let mut changes = Vec::new();
    for change in store.recompute_ranks(platform, present, engine)? {
        match store.platform_ids(change.user_id) {
            Ok(ids) => changes.push((change, ids)),
            // Merged away since the recompute
            Err(DatabaseError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(PlatformTick { credited, changes })
}

/// Drives accrual, rank updates and snapshot publishing for both platforms.
pub struct Orchestrator<D: PlatformAdapter, T: PlatformAdapter> {
    discord: Option<Arc<D>>,
    teamspeak: Option<Arc<T>>,
    store: AccrualStore,
    engine: RankEngine,
    medium: Arc<dyn BusMedium>,
    settings: OrchestratorSettings,
    /// Users present at the previous tick, per platform
    last_seen: HashMap<Platform, HashSet<String>>,
}

impl<D: PlatformAdapter, T: PlatformAdapter> Orchestrator<D, T> {
    pub fn new(
        store: AccrualStore,
        engine: RankEngine,
        medium: Arc<dyn BusMedium>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            discord: None,
            teamspeak: None,
            store,
            engine,
            medium,
            settings,
            last_seen: HashMap::new(),
        }
    }

    pub fn with_discord(mut self, adapter: Arc<D>) -> Self {
        self.discord = Some(adapter);
        self
    }

    pub fn with_teamspeak(mut self, adapter: Arc<T>) -> Self {
        self.teamspeak = Some(adapter);
        self
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let tick_secs = self.settings.tick_secs.max(1);
        let mut sub_tick =
            tokio::time::interval(Duration::from_secs(self.settings.sub_tick_secs.max(1)));
        sub_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_tick = tick_index(chrono::Utc::now().timestamp(), tick_secs);
        tracing::info!(
            "Orchestrator started, first tick in {:?}",
            until_next_tick(chrono::Utc::now().timestamp_millis(), tick_secs)
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = sub_tick.tick() => {
                    self.publish_snapshots();

                    let tick = tick_index(chrono::Utc::now().timestamp(), tick_secs);
                    if tick != last_tick {
                        last_tick = tick;
                        let now = chrono::Local::now().naive_local();
                        let report = self.tick_at(tick, now).await;
                        tracing::debug!("Tick {}: {:?}", tick, report);
                    }
                }
            }
        }
        tracing::info!("Orchestrator stopped");
    }

    /// Write each platform's online user list with a short expiry.
    pub fn publish_snapshots(&self) {
        if let Some(adapter) = &self.discord {
            self.publish_snapshot(adapter.platform(), adapter.presence().ids());
        }
        if let Some(adapter) = &self.teamspeak {
            self.publish_snapshot(adapter.platform(), adapter.presence().ids());
        }
    }

    fn publish_snapshot(&self, platform: Platform, ids: Vec<String>) {
        let ttl = Duration::from_secs(self.settings.snapshot_ttl_secs);
        let result = serde_json::to_string(&ids)
            .map_err(|e| e.to_string())
            .and_then(|body| {
                self.medium
                    .set_ex(&platform.online_users_key(), &body, ttl)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            tracing::warn!("Could not publish {} snapshot: {}", platform, e);
        }
    }

    /// Run one full tick at local time `now`.
    pub async fn tick_at(&mut self, tick: i64, now: NaiveDateTime) -> TickReport {
        let mut report = TickReport::default();

        let store = self.store.clone();
        let weekday = weekday_from_index(self.settings.weekly_reset_day);
        match tokio::task::spawn_blocking(move || store.apply_due_resets(now, weekday)).await {
            Ok(Ok(resets)) => report.resets = resets,
            Ok(Err(e)) => tracing::error!("Period reset failed: {}", e),
            Err(e) => tracing::error!("Period reset task failed: {}", e),
        }

        let mut changes = Vec::new();
        if let Some(adapter) = self.discord.clone() {
            self.sync_into(&*adapter, tick, now, &mut report, &mut changes)
                .await;
        }
        if let Some(adapter) = self.teamspeak.clone() {
            self.sync_into(&*adapter, tick, now, &mut report, &mut changes)
                .await;
        }

        report.rank_changes = changes.len();
        for (change, ids) in &changes {
            report.corrections += self.correct(change, ids).await;
        }
        report
    }

    async fn sync_into<A: PlatformAdapter>(
        &mut self,
        adapter: &A,
        tick: i64,
        now: NaiveDateTime,
        report: &mut TickReport,
        changes: &mut Vec<(RankChange, PlatformIds)>,
    ) {
        let platform = adapter.platform();
        match self.sync_platform(adapter, tick, now).await {
            Ok((count, result)) => {
                if result.credited {
                    report.credited.push((platform, count));
                }
                changes.extend(result.changes);
            }
            Err(e) => {
                tracing::error!("{} tick {} aborted: {}", platform, tick, e);
                report.failed.push(platform);
            }
        }
    }

    async fn sync_platform<A: PlatformAdapter>(
        &mut self,
        adapter: &A,
        tick: i64,
        now: NaiveDateTime,
    ) -> Result<(usize, PlatformTick), OrchestratorError> {
        let platform = adapter.platform();
        let snapshot = adapter.presence().snapshot();

        let seen = self.last_seen.get(&platform);
        let newcomers: Vec<(String, String)> = snapshot
            .users
            .iter()
            .filter(|(id, _)| !seen.is_some_and(|seen| seen.contains(*id)))
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect();
        let present = snapshot.ids();
        let count = present.len();

        let store = self.store.clone();
        let engine = self.engine.clone();
        let hourly = is_top_of_hour(now);
        let (result, present, registered) = tokio::task::spawn_blocking(move || {
            let mut registered = Vec::new();
            let result = register_newcomers(&store, platform, now, &newcomers, &mut registered)
                .and_then(|()| credit_tick(&store, &engine, platform, tick, now, &present, hourly));
            (result, present, registered)
        })
        .await
        .map_err(|e| OrchestratorError::Task(e.to_string()))?;

        // Users whose login is stored count as seen even when the tick fails
        let seen = self.last_seen.entry(platform).or_default();
        match &result {
            Ok(_) => *seen = present.into_iter().collect(),
            Err(_) => {
                seen.retain(|id| present.contains(id));
                seen.extend(registered);
            }
        }

        Ok((count, result?))
    }

    /// Push a changed tier to every platform the user is linked on.
    async fn correct(&self, change: &RankChange, ids: &PlatformIds) -> usize {
        let mut corrected = 0;
        if let Some(adapter) = &self.discord {
            corrected += correct_on(&**adapter, change, ids).await;
        }
        if let Some(adapter) = &self.teamspeak {
            corrected += correct_on(&**adapter, change, ids).await;
        }
        corrected
    }
}

async fn correct_on<A: PlatformAdapter>(adapter: &A, change: &RankChange, ids: &PlatformIds) -> usize {
    let Some(platform_id) = ids.get(adapter.platform()) else {
        return 0;
    };
    match assign_rank(adapter, platform_id, change.kind, change.to).await {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            tracing::warn!(
                "Could not set {} {} of {} to {}: {}",
                adapter.platform(),
                change.kind,
                platform_id,
                change.to,
                e
            );
            0
        }
    }
}
