//! Activity heatmap buckets.

use chrono::{Datelike, NaiveDateTime, Timelike};

/// Time-of-day bucket of the activity heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeOfDay {
    /// 06:00 to 11:59
    Morning,
    /// 12:00 to 17:59
    Noon,
    /// 18:00 to 23:59
    Evening,
    /// 00:00 to 05:59
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Noon,
            18..=23 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Noon => "noon",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "morning" => Some(TimeOfDay::Morning),
            "noon" => Some(TimeOfDay::Noon),
            "evening" => Some(TimeOfDay::Evening),
            "night" => Some(TimeOfDay::Night),
            _ => None,
        }
    }
}

/// Heatmap cell a local wall-clock instant falls into: (weekday with Monday = 0, bucket).
pub fn heatmap_slot(at: NaiveDateTime) -> (u8, TimeOfDay) {
    (
        at.weekday().num_days_from_monday() as u8,
        TimeOfDay::from_hour(at.hour()),
    )
}

/// Accumulated minutes of one heatmap cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeatmapCell {
    pub day_of_week: u8,
    pub time_of_day: TimeOfDay,
    pub minutes: u64,
}
