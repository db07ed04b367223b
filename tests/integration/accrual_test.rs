//! Accrual store against an on-disk database.

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use std::sync::Arc;
use voicerank::ranks::{RankEngine, RankThresholds};
use voicerank::storage::{AccrualStore, Database, ResetPeriod};
use voicerank::Platform;

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, d)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn open(path: &std::path::Path) -> AccrualStore {
    AccrualStore::new(Arc::new(Database::open(path).unwrap()))
}

/// The credited tick survives a restart
#[test]
fn test_tick_watermark_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("voicerank.db");
    let users = vec!["d1".to_string()];

    {
        let store = open(&path);
        store
            .upsert_identity(Platform::Discord, "d1", "Anna", at(3, 10, 0))
            .unwrap();
        assert!(store.accrue(Platform::Discord, 42, at(3, 10, 0), &users).unwrap());
    }

    let store = open(&path);
    assert!(!store.accrue(Platform::Discord, 42, at(3, 10, 0), &users).unwrap());
    assert!(!store.accrue(Platform::Discord, 41, at(3, 10, 0), &users).unwrap());
    assert!(store.accrue(Platform::Discord, 43, at(3, 10, 1), &users).unwrap());

    let counters = store.time_counters(Platform::Discord, "d1").unwrap().unwrap();
    assert_eq!(counters.total, 2);
    assert_eq!(counters.last_update, Some(at(3, 10, 1)));
}

/// Ticks on one platform do not block the other platform
#[test]
fn test_watermark_is_per_platform() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("voicerank.db"));

    assert!(store
        .accrue(Platform::Discord, 7, at(3, 10, 0), &["d1".to_string()])
        .unwrap());
    assert!(store
        .accrue(Platform::Teamspeak, 7, at(3, 10, 0), &["t1".to_string()])
        .unwrap());
}

/// Daily counters reset at midnight while totals keep growing
#[test]
fn test_daily_reset_keeps_totals() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("voicerank.db"));
    let users = vec!["t1".to_string()];

    store.apply_due_resets(at(3, 23, 0), Weekday::Mon).unwrap();
    store.accrue(Platform::Teamspeak, 1, at(3, 23, 0), &users).unwrap();
    store.accrue(Platform::Teamspeak, 2, at(3, 23, 1), &users).unwrap();

    let due = store.apply_due_resets(at(4, 0, 0), Weekday::Mon).unwrap();
    assert_eq!(due, vec![ResetPeriod::Daily]);
    store.accrue(Platform::Teamspeak, 3, at(4, 0, 0), &users).unwrap();

    let counters = store.time_counters(Platform::Teamspeak, "t1").unwrap().unwrap();
    assert_eq!(counters.daily, 1);
    assert_eq!(counters.weekly, 3);
    assert_eq!(counters.total, 3);
    assert_eq!(counters.season, 3);
}

/// Ranks are computed from the minutes of both linked identities
#[test]
fn test_linked_identities_share_level() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("voicerank.db"));
    let engine = RankEngine::new(RankThresholds::new(vec![0, 4], vec![0]).unwrap(), 10);

    store
        .upsert_identity(Platform::Discord, "d1", "Anna", at(3, 10, 0))
        .unwrap();
    store
        .upsert_identity(Platform::Teamspeak, "t1", "Anna", at(3, 10, 0))
        .unwrap();
    for tick in 1..=2 {
        store
            .accrue(Platform::Discord, tick, at(3, 10, 0), &["d1".to_string()])
            .unwrap();
        store
            .accrue(Platform::Teamspeak, tick, at(3, 10, 0), &["t1".to_string()])
            .unwrap();
    }

    // Separate records: two minutes each, still level 1
    let changes = store
        .recompute_ranks(Platform::Discord, &["d1".to_string()], &engine)
        .unwrap();
    assert!(changes.is_empty());

    let kept = store
        .link_identity("sso-anna", Platform::Discord, "d1", at(3, 11, 0))
        .unwrap();
    let merged = store
        .link_identity("sso-anna", Platform::Teamspeak, "t1", at(3, 11, 0))
        .unwrap();
    assert_eq!(kept, merged);

    let changes = store
        .recompute_ranks(Platform::Teamspeak, &["t1".to_string()], &engine)
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].to, 2);

    let ids = store.platform_ids(merged).unwrap();
    assert_eq!(ids.get(Platform::Discord), Some("d1"));
    assert_eq!(ids.get(Platform::Teamspeak), Some("t1"));
    assert_eq!(store.stored_ranks(Platform::Discord, "d1").unwrap().unwrap().level, 2);
}
