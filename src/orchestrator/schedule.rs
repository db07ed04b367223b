//! Tick arithmetic.
//!
//! Ticks are numbered by wall-clock time so that a tick of 60 seconds always starts on
//! the minute and a restarted process resumes the same numbering.

use chrono::{NaiveDateTime, Timelike};
use std::time::Duration;

/// Index of the tick containing `unix_secs`.
pub fn tick_index(unix_secs: i64, tick_secs: u64) -> i64 {
    unix_secs.div_euclid(tick_secs.max(1) as i64)
}

/// Time left until the next tick boundary.
pub fn until_next_tick(unix_millis: i64, tick_secs: u64) -> Duration {
    let period = tick_secs.max(1) as i64 * 1000;
    let left = period - unix_millis.rem_euclid(period);
    Duration::from_millis(left as u64)
}

/// Whether `now` falls in the first minute of an hour.
pub fn is_top_of_hour(now: NaiveDateTime) -> bool {
    now.minute() == 0
}
