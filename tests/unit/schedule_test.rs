//! Unit tests for tick numbering and period boundaries

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use voicerank::orchestrator::{is_top_of_hour, tick_index};
use voicerank::storage::reset::{due_resets, weekday_from_index};
use voicerank::storage::{ResetPeriod, ResetWatermark};

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, d)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

/// Two instants in the same minute share a tick
#[test]
fn test_same_minute_same_tick() {
    let start = 1_700_000_040;
    assert_eq!(tick_index(start, 60), tick_index(start + 59, 60));
    assert_eq!(tick_index(start + 60, 60), tick_index(start, 60) + 1);
}

#[test]
fn test_hourly_sample_minute() {
    assert!(is_top_of_hour(at(4, 9, 0)));
    assert!(!is_top_of_hour(at(4, 9, 59)));
}

#[test]
fn test_weekday_index() {
    assert_eq!(weekday_from_index(0), Weekday::Mon);
    assert_eq!(weekday_from_index(6), Weekday::Sun);
    assert_eq!(weekday_from_index(7), Weekday::Mon);
}

/// An empty watermark makes every period due
#[test]
fn test_all_due_without_watermark() {
    let due = due_resets(&ResetWatermark::default(), at(7, 12, 0), Weekday::Mon);
    assert_eq!(due, ResetPeriod::ALL.to_vec());
}

/// A watermark inside the current periods suppresses every reset
#[test]
fn test_nothing_due_after_reset() {
    let watermark = ResetWatermark {
        daily: Some(at(7, 0, 1)),
        weekly: Some(at(7, 0, 1)),
        monthly: Some(at(7, 0, 1)),
    };
    assert!(due_resets(&watermark, at(7, 23, 59), Weekday::Mon).is_empty());
}

/// Crossing midnight into Monday makes daily and weekly due, not monthly
#[test]
fn test_new_week() {
    // 2024-03-10 is a Sunday
    let watermark = ResetWatermark {
        daily: Some(at(10, 0, 0)),
        weekly: Some(at(4, 0, 0)),
        monthly: Some(at(1, 0, 0)),
    };
    let due = due_resets(&watermark, at(11, 0, 1), Weekday::Mon);
    assert_eq!(due, vec![ResetPeriod::Daily, ResetPeriod::Weekly]);
}
