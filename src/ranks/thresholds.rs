//! Threshold tables mapping accumulated minutes to levels and divisions.

use super::RankError;

/// Highest level.
pub const MAX_LEVEL: u8 = 25;

/// Highest division reachable through minutes alone.
pub const MAX_THRESHOLD_DIVISION: u8 = 5;

/// Scarce division held only by the top of the leaderboard.
pub const TOP_DIVISION: u8 = 6;

/// Minimum total minutes for levels 1..=25.
pub const DEFAULT_LEVEL_THRESHOLDS: [u64; 25] = [
    0, 60, 180, 360, 600, 900, 1320, 1800, 2400, 3000, 3900, 4800, 6000, 7200, 8700, 10200,
    12000, 14400, 17100, 20100, 23400, 27000, 31200, 36000, 42000,
];

/// Minimum season minutes for divisions 1..=5.
pub const DEFAULT_DIVISION_THRESHOLDS: [u64; 5] = [0, 600, 1800, 3600, 6000];

/// Ordered level and division tables.
///
/// Each table is indexed by tier - 1 and must be non-decreasing. A user's tier is the
/// highest tier whose threshold does not exceed the user's minutes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankThresholds {
    levels: Vec<u64>,
    divisions: Vec<u64>,
}

impl Default for RankThresholds {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LEVEL_THRESHOLDS.to_vec(),
            divisions: DEFAULT_DIVISION_THRESHOLDS.to_vec(),
        }
    }
}

impl RankThresholds {
    /// Build validated tables.
    pub fn new(levels: Vec<u64>, divisions: Vec<u64>) -> Result<Self, RankError> {
        validate_table("level", &levels, MAX_LEVEL)?;
        validate_table("division", &divisions, MAX_THRESHOLD_DIVISION)?;
        Ok(Self { levels, divisions })
    }

    /// Level for the given total minutes.
    pub fn level_for(&self, total_minutes: u64) -> u8 {
        highest_tier(&self.levels, total_minutes)
    }

    /// Division for the given season minutes, never above division 5.
    pub fn division_for(&self, season_minutes: u64) -> u8 {
        highest_tier(&self.divisions, season_minutes).min(MAX_THRESHOLD_DIVISION)
    }

    /// Minimum total minutes for a level.
    pub fn level_requirement(&self, level: u8) -> Option<u64> {
        tier_requirement(&self.levels, level)
    }

    /// Minimum season minutes for a division (1..=5).
    pub fn division_requirement(&self, division: u8) -> Option<u64> {
        tier_requirement(&self.divisions, division)
    }

    /// Minutes still missing for the next level, `None` at the top.
    pub fn minutes_to_next_level(&self, total_minutes: u64) -> Option<u64> {
        let next = self.level_for(total_minutes) + 1;
        self.level_requirement(next)
            .map(|required| required.saturating_sub(total_minutes))
    }

    /// Minutes still missing for the next threshold division, `None` at division 5.
    pub fn minutes_to_next_division(&self, season_minutes: u64) -> Option<u64> {
        let next = self.division_for(season_minutes) + 1;
        self.division_requirement(next)
            .map(|required| required.saturating_sub(season_minutes))
    }

    /// Number of levels in the table.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}

fn highest_tier(table: &[u64], minutes: u64) -> u8 {
    // Tables are sorted, so the count of thresholds <= minutes is the tier.
    let reached = table.partition_point(|&threshold| threshold <= minutes);
    reached.max(1) as u8
}

fn tier_requirement(table: &[u64], tier: u8) -> Option<u64> {
    if tier == 0 {
        return None;
    }
    table.get(tier as usize - 1).copied()
}

fn validate_table(name: &str, table: &[u64], max_tiers: u8) -> Result<(), RankError> {
    if table.is_empty() {
        return Err(RankError::InvalidThresholds(format!("{} table is empty", name)));
    }
    if table.len() > max_tiers as usize {
        return Err(RankError::InvalidThresholds(format!(
            "{} table has {} tiers, maximum is {}",
            name,
            table.len(),
            max_tiers
        )));
    }
    if let Some(index) = table.windows(2).position(|pair| pair[1] < pair[0]) {
        return Err(RankError::InvalidThresholds(format!(
            "{} threshold for tier {} is lower than tier {}",
            name,
            index + 2,
            index + 1
        )));
    }
    Ok(())
}
