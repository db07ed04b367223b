//! Period boundaries for daily, weekly and monthly counter resets.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};

/// A period-scoped counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl ResetPeriod {
    pub const ALL: [ResetPeriod; 3] = [ResetPeriod::Daily, ResetPeriod::Weekly, ResetPeriod::Monthly];
}

impl std::fmt::Display for ResetPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetPeriod::Daily => write!(f, "daily"),
            ResetPeriod::Weekly => write!(f, "weekly"),
            ResetPeriod::Monthly => write!(f, "monthly"),
        }
    }
}

/// Last time each period was reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetWatermark {
    pub daily: Option<NaiveDateTime>,
    pub weekly: Option<NaiveDateTime>,
    pub monthly: Option<NaiveDateTime>,
}

impl ResetWatermark {
    pub fn get(&self, period: ResetPeriod) -> Option<NaiveDateTime> {
        match period {
            ResetPeriod::Daily => self.daily,
            ResetPeriod::Weekly => self.weekly,
            ResetPeriod::Monthly => self.monthly,
        }
    }
}

/// Convert a stored `0 = Monday` day number into a weekday.
pub fn weekday_from_index(index: u8) -> Weekday {
    match index % 7 {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

/// Start of the period containing `now`.
pub fn period_start(period: ResetPeriod, now: NaiveDateTime, weekly_reset_day: Weekday) -> NaiveDateTime {
    let today = now.date();
    let start: NaiveDate = match period {
        ResetPeriod::Daily => today,
        ResetPeriod::Weekly => {
            let back = (7 + today.weekday().num_days_from_monday()
                - weekly_reset_day.num_days_from_monday())
                % 7;
            today - Duration::days(back as i64)
        }
        ResetPeriod::Monthly => today.with_day(1).unwrap_or(today),
    };
    start.and_hms_opt(0, 0, 0).unwrap_or(now)
}

/// Periods whose current boundary is not yet covered by the watermark.
pub fn due_resets(
    watermark: &ResetWatermark,
    now: NaiveDateTime,
    weekly_reset_day: Weekday,
) -> Vec<ResetPeriod> {
    ResetPeriod::ALL
        .into_iter()
        .filter(|period| match watermark.get(*period) {
            Some(last) => last < period_start(*period, now, weekly_reset_day),
            None => true,
        })
        .collect()
}
