//! Unit tests for level and division thresholds and top division allocation

use voicerank::ranks::{
    DivisionCandidate, RankEngine, RankKind, RankThresholds, DEFAULT_LEVEL_THRESHOLDS, MAX_LEVEL,
    TOP_DIVISION,
};

fn candidate(user_id: i64, season_minutes: u64, division: u8) -> DivisionCandidate {
    DivisionCandidate {
        user_id,
        season_minutes,
        division,
    }
}

/// Zero minutes is level 1
#[test]
fn test_level_floor() {
    let thresholds = RankThresholds::default();
    assert_eq!(thresholds.level_for(0), 1);
    assert_eq!(thresholds.division_for(0), 1);
}

/// Reaching a threshold exactly qualifies for the tier
#[test]
fn test_exact_threshold_qualifies() {
    let thresholds = RankThresholds::default();
    assert_eq!(thresholds.level_for(DEFAULT_LEVEL_THRESHOLDS[8]), 9);
    assert_eq!(thresholds.level_for(DEFAULT_LEVEL_THRESHOLDS[8] - 1), 8);
    assert_eq!(thresholds.division_for(600), 2);
    assert_eq!(thresholds.division_for(599), 1);
}

#[test]
fn test_levels_cap_at_max() {
    let thresholds = RankThresholds::default();
    assert_eq!(thresholds.level_for(u64::MAX), MAX_LEVEL);
    assert_eq!(thresholds.division_for(u64::MAX), 5);
}

/// Tiers never go down as minutes grow
#[test]
fn test_tiers_monotonic() {
    let thresholds = RankThresholds::default();
    let mut last_level = 0;
    let mut last_division = 0;
    for minutes in (0..50_000).step_by(37) {
        let level = thresholds.level_for(minutes);
        let division = thresholds.division_for(minutes);
        assert!(level >= last_level);
        assert!(division >= last_division);
        last_level = level;
        last_division = division;
    }
}

#[test]
fn test_invalid_tables_rejected() {
    assert!(RankThresholds::new(vec![0, 100, 50], vec![0, 600, 1800, 3600, 6000]).is_err());
    assert!(RankThresholds::new(DEFAULT_LEVEL_THRESHOLDS.to_vec(), vec![0, 10, 5]).is_err());
}

#[test]
fn test_minutes_to_next_tier() {
    let thresholds = RankThresholds::default();
    assert_eq!(thresholds.minutes_to_next_level(0), Some(60));
    assert_eq!(thresholds.minutes_to_next_level(42_000), None);
    assert_eq!(thresholds.minutes_to_next_division(1_000), Some(800));
}

/// With 15 candidates and 10 slots, the top 10 hold division 6
#[test]
fn test_top_division_allocation() {
    let engine = RankEngine::new(RankThresholds::default(), 10);
    let candidates: Vec<DivisionCandidate> = (1..=15)
        .map(|id| candidate(id, 10_000 - id as u64 * 100, 5))
        .collect();

    let changes = engine.reconcile_top_division(&candidates);

    assert_eq!(changes.len(), 10);
    assert!(changes
        .iter()
        .all(|c| c.kind == RankKind::Division && c.to == TOP_DIVISION));
    let promoted: Vec<i64> = changes.iter().map(|c| c.user_id).collect();
    assert_eq!(promoted, (1..=10).collect::<Vec<_>>());
}

/// Fewer eligible users than slots: all of them hold division 6
#[test]
fn test_top_division_with_few_candidates() {
    let engine = RankEngine::new(RankThresholds::default(), 10);
    let candidates = vec![candidate(1, 7_000, 5), candidate(2, 8_000, 6), candidate(3, 500, 1)];

    let changes = engine.reconcile_top_division(&candidates);

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].user_id, 1);
    assert_eq!(changes[0].to, TOP_DIVISION);
}

/// A holder overtaken by a newcomer drops back to division 5
#[test]
fn test_top_division_demotion() {
    let engine = RankEngine::new(RankThresholds::default(), 1);
    let candidates = vec![candidate(1, 6_500, 6), candidate(2, 9_000, 5)];

    let changes = engine.reconcile_top_division(&candidates);

    assert_eq!(changes.len(), 2);
    let demoted = changes.iter().find(|c| c.user_id == 1).unwrap();
    assert_eq!((demoted.from, demoted.to), (6, 5));
    let promoted = changes.iter().find(|c| c.user_id == 2).unwrap();
    assert_eq!((promoted.from, promoted.to), (5, 6));
}

/// Reconciling an already settled allocation changes nothing
#[test]
fn test_top_division_fixed_point() {
    let engine = RankEngine::new(RankThresholds::default(), 2);
    let candidates = vec![candidate(1, 9_000, 6), candidate(2, 8_000, 6), candidate(3, 7_000, 5)];
    assert!(engine.reconcile_top_division(&candidates).is_empty());
}

#[test]
fn test_next_division_keeps_top_holder() {
    let engine = RankEngine::new(RankThresholds::default(), 10);
    assert_eq!(engine.next_division(6, 6_500), 6);
    assert_eq!(engine.next_division(6, 3_600), 4);
    assert_eq!(engine.next_division(2, 6_500), 5);
}
