//! Unit tests for login streak transitions

use chrono::NaiveDate;
use voicerank::storage::LoginStreak;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

#[test]
fn test_first_login() {
    let streak = LoginStreak::first(day(1));
    assert_eq!((streak.logins, streak.current, streak.longest), (1, 1, 1));
    assert_eq!(streak.last_login, day(1));
}

/// Same-day login only counts the login
#[test]
fn test_same_day_keeps_streak() {
    let streak = LoginStreak::first(day(1)).advance(day(1));
    assert_eq!(streak.logins, 2);
    assert_eq!(streak.current, 1);
    assert_eq!(streak.last_login, day(1));
}

/// Consecutive days extend the streak and the record
#[test]
fn test_next_day_extends() {
    let streak = LoginStreak::first(day(1)).advance(day(2)).advance(day(3));
    assert_eq!(streak.current, 3);
    assert_eq!(streak.longest, 3);
    assert_eq!(streak.last_login, day(3));
}

/// A gap resets the current streak but keeps the longest
#[test]
fn test_gap_resets_current() {
    let streak = LoginStreak::first(day(1))
        .advance(day(2))
        .advance(day(3))
        .advance(day(10));
    assert_eq!(streak.current, 1);
    assert_eq!(streak.longest, 3);
    assert_eq!(streak.logins, 4);
}

#[test]
fn test_clock_going_backwards_is_same_day() {
    let streak = LoginStreak::first(day(5)).advance(day(4));
    assert_eq!(streak.current, 1);
    assert_eq!(streak.last_login, day(5));
}
