//! Orchestrator ticks against mock adapters and an in-memory database.

use crate::mock_adapter::{division_group, level_group, MockAdapter};
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;
use voicerank::bus::{BusMedium, MemoryMedium};
use voicerank::ranks::{RankEngine, RankThresholds};
use voicerank::storage::config::OrchestratorSettings;
use voicerank::storage::{AccrualStore, Database};
use voicerank::{Orchestrator, Platform};

struct Setup {
    discord: Arc<MockAdapter>,
    teamspeak: Arc<MockAdapter>,
    store: AccrualStore,
    db: Arc<Database>,
    medium: Arc<MemoryMedium>,
    orchestrator: Orchestrator<MockAdapter, MockAdapter>,
}

/// Level 2 at two minutes, divisions at one minute apart, one top division slot.
fn fast_engine() -> RankEngine {
    RankEngine::new(
        RankThresholds::new(vec![0, 2], vec![0, 1, 2, 3, 4]).unwrap(),
        1,
    )
}

fn setup(engine: RankEngine) -> Setup {
    let discord = Arc::new(MockAdapter::new(Platform::Discord));
    let teamspeak = Arc::new(MockAdapter::new(Platform::Teamspeak));
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = AccrualStore::new(Arc::clone(&db));
    let medium = Arc::new(MemoryMedium::new());

    let orchestrator = Orchestrator::new(
        store.clone(),
        engine,
        medium.clone(),
        OrchestratorSettings::default(),
    )
    .with_discord(Arc::clone(&discord))
    .with_teamspeak(Arc::clone(&teamspeak));

    Setup {
        discord,
        teamspeak,
        store,
        db,
        medium,
        orchestrator,
    }
}

/// 2024-06-03 is a Monday
fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

#[tokio::test]
async fn test_tick_credits_present_users_once() {
    let mut s = setup(RankEngine::new(RankThresholds::default(), 10));
    s.discord.join("d1", "Anna");
    s.teamspeak.join("t1", "Ben");
    s.teamspeak.join("t2", "Cem");

    let report = s.orchestrator.tick_at(100, at(10, 30)).await;
    assert_eq!(
        report.credited,
        vec![(Platform::Discord, 1), (Platform::Teamspeak, 2)]
    );
    assert!(report.failed.is_empty());

    // Same tick again, e.g. after a restart
    let report = s.orchestrator.tick_at(100, at(10, 30)).await;
    assert!(report.credited.is_empty());

    let counters = s.store.time_counters(Platform::Teamspeak, "t2").unwrap().unwrap();
    assert_eq!((counters.total, counters.daily, counters.season), (1, 1, 1));
    let record = s.store.identity(Platform::Discord, "d1").unwrap().unwrap();
    assert_eq!(record.name.as_deref(), Some("Anna"));
}

#[tokio::test]
async fn test_empty_presence_credits_nothing() {
    let mut s = setup(RankEngine::new(RankThresholds::default(), 10));

    let report = s.orchestrator.tick_at(1, at(10, 30)).await;

    assert!(report.credited.is_empty());
    assert_eq!(report.rank_changes, 0);
    assert!(s.discord.calls().is_empty());
}

/// Newcomers get a login; staying present does not count again
#[tokio::test]
async fn test_logins_counted_on_arrival() {
    let mut s = setup(RankEngine::new(RankThresholds::default(), 10));
    s.discord.join("d1", "Anna");

    s.orchestrator.tick_at(1, at(10, 30)).await;
    s.orchestrator.tick_at(2, at(10, 31)).await;
    assert_eq!(s.store.login_streak(Platform::Discord, "d1").unwrap().unwrap().logins, 1);

    s.discord.leave("d1");
    s.orchestrator.tick_at(3, at(10, 32)).await;
    s.discord.join("d1", "Anna");
    s.orchestrator.tick_at(4, at(10, 33)).await;

    let streak = s.store.login_streak(Platform::Discord, "d1").unwrap().unwrap();
    assert_eq!(streak.logins, 2);
    assert_eq!(streak.current, 1);
    assert_eq!(s.store.time_counters(Platform::Discord, "d1").unwrap().unwrap().total, 3);
}

fn rename_table(db: &Database, from: &str, to: &str) {
    db.with_connection(|conn| {
        conn.execute_batch(&format!("ALTER TABLE {} RENAME TO {}", from, to))?;
        Ok(())
    })
    .unwrap();
}

/// A tick that fails after logins were stored does not count them again
#[tokio::test]
async fn test_failed_tick_does_not_repeat_logins() {
    let mut s = setup(RankEngine::new(RankThresholds::default(), 10));
    s.discord.join("d1", "Anna");

    rename_table(&s.db, "time_counters", "time_counters_off");
    let report = s.orchestrator.tick_at(1, at(10, 30)).await;
    assert_eq!(report.failed, vec![Platform::Discord]);
    assert_eq!(s.store.login_streak(Platform::Discord, "d1").unwrap().unwrap().logins, 1);

    rename_table(&s.db, "time_counters_off", "time_counters");
    let report = s.orchestrator.tick_at(2, at(10, 31)).await;
    assert!(report.failed.is_empty());

    assert_eq!(s.store.login_streak(Platform::Discord, "d1").unwrap().unwrap().logins, 1);
    assert_eq!(s.store.time_counters(Platform::Discord, "d1").unwrap().unwrap().total, 1);
}

#[tokio::test]
async fn test_level_up_corrects_groups() {
    let mut s = setup(fast_engine());
    s.discord.join("d1", "Anna");
    s.discord.set_groups("d1", vec![level_group(1)]);

    s.orchestrator.tick_at(1, at(10, 30)).await;
    let report = s.orchestrator.tick_at(2, at(10, 31)).await;

    assert!(report.corrections >= 1);
    let groups = s.discord.groups_of("d1");
    assert!(groups.contains(&level_group(2)));
    assert!(!groups.contains(&level_group(1)));
}

/// A rank earned on one platform is applied on every linked platform
#[tokio::test]
async fn test_linked_identity_corrected_everywhere() {
    let mut s = setup(fast_engine());
    s.discord.join("d1", "Anna");
    s.orchestrator.tick_at(1, at(10, 30)).await;

    s.store
        .link_identity("sso-anna", Platform::Discord, "d1", at(10, 30))
        .unwrap();
    s.store
        .link_identity("sso-anna", Platform::Teamspeak, "t1", at(10, 30))
        .unwrap();

    s.orchestrator.tick_at(2, at(10, 31)).await;

    assert!(s.discord.groups_of("d1").contains(&level_group(2)));
    assert!(s.teamspeak.groups_of("t1").contains(&level_group(2)));
}

/// One correction failing does not stop the others
#[tokio::test]
async fn test_correction_failures_are_skipped() {
    let mut s = setup(fast_engine());
    s.discord.join("d1", "Anna");
    s.discord.join("d2", "Ben");
    s.discord.forget("d1");

    s.orchestrator.tick_at(1, at(10, 30)).await;
    let report = s.orchestrator.tick_at(2, at(10, 31)).await;

    assert!(report.failed.is_empty());
    assert!(s.discord.groups_of("d1").is_empty());
    assert!(s.discord.groups_of("d2").contains(&level_group(2)));
}

#[tokio::test]
async fn test_top_division_goes_to_one_user() {
    let mut s = setup(fast_engine());
    s.discord.join("d1", "Anna");
    s.discord.join("d2", "Ben");

    for tick in 1..=5 {
        s.orchestrator.tick_at(tick, at(10, 30 + tick as u32)).await;
    }

    let first = s.store.identity(Platform::Discord, "d1").unwrap().unwrap();
    let second = s.store.identity(Platform::Discord, "d2").unwrap().unwrap();
    let mut divisions = vec![first.division, second.division];
    divisions.sort();
    assert_eq!(divisions, vec![5, 6]);

    let holder = if first.division == 6 { "d1" } else { "d2" };
    assert!(s.discord.groups_of(holder).contains(&division_group(6)));
    assert!(!s.discord.groups_of(holder).contains(&division_group(5)));
}

#[tokio::test]
async fn test_usage_sampled_at_top_of_hour() {
    let mut s = setup(RankEngine::new(RankThresholds::default(), 10));
    s.teamspeak.join("t1", "Ben");
    s.teamspeak.join("t2", "Cem");

    s.orchestrator.tick_at(1, at(10, 59)).await;
    s.orchestrator.tick_at(2, at(11, 0)).await;
    s.orchestrator.tick_at(3, at(11, 1)).await;

    let samples = s.store.usage_samples(Platform::Teamspeak).unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].user_count, 2);
    assert_eq!(samples[0].recorded_at, at(11, 0));
    assert_eq!(s.store.usage_samples(Platform::Discord).unwrap()[0].user_count, 0);
}

#[tokio::test]
async fn test_snapshots_published() {
    let s = setup(RankEngine::new(RankThresholds::default(), 10));
    s.discord.join("d2", "Ben");
    s.discord.join("d1", "Anna");

    s.orchestrator.publish_snapshots();

    assert_eq!(
        s.medium.get("discord:online_users").unwrap().as_deref(),
        Some(r#"["d1","d2"]"#)
    );
    assert_eq!(
        s.medium.get("teamspeak:online_users").unwrap().as_deref(),
        Some("[]")
    );
}

#[tokio::test]
async fn test_first_tick_resets_periods() {
    let mut s = setup(RankEngine::new(RankThresholds::default(), 10));

    let report = s.orchestrator.tick_at(1, at(10, 30)).await;
    assert_eq!(report.resets.len(), 3);

    let report = s.orchestrator.tick_at(2, at(10, 31)).await;
    assert!(report.resets.is_empty());
}
