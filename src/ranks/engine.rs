//! Rank computation and the scarce top division.

use super::thresholds::{RankThresholds, MAX_THRESHOLD_DIVISION, TOP_DIVISION};
use serde::{Deserialize, Serialize};

/// Which rank a change or group belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankKind {
    /// Tier derived from total minutes across both platforms
    Level,
    /// Tier derived from season minutes
    Division,
}

impl std::fmt::Display for RankKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RankKind::Level => write!(f, "level"),
            RankKind::Division => write!(f, "division"),
        }
    }
}

/// A stored rank that moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankChange {
    /// Internal identity id
    pub user_id: i64,
    pub kind: RankKind,
    pub from: u8,
    pub to: u8,
}

/// A user eligible for the top division.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivisionCandidate {
    pub user_id: i64,
    pub season_minutes: u64,
    pub division: u8,
}

/// Pure rank computation.
#[derive(Debug, Clone)]
pub struct RankEngine {
    thresholds: RankThresholds,
    top_division_size: usize,
}

impl RankEngine {
    /// Create an engine holding `top_division_size` slots in the top division.
    pub fn new(thresholds: RankThresholds, top_division_size: usize) -> Self {
        Self {
            thresholds,
            top_division_size,
        }
    }

    pub fn thresholds(&self) -> &RankThresholds {
        &self.thresholds
    }

    pub fn top_division_size(&self) -> usize {
        self.top_division_size
    }

    pub fn level_for(&self, total_minutes: u64) -> u8 {
        self.thresholds.level_for(total_minutes)
    }

    pub fn division_for(&self, season_minutes: u64) -> u8 {
        self.thresholds.division_for(season_minutes)
    }

    /// Division a present user should hold given the stored one.
    ///
    /// Top-division holders stay put while their minutes still reach division 5;
    /// only [`RankEngine::reconcile_top_division`] moves users between 5 and 6.
    pub fn next_division(&self, stored: u8, season_minutes: u64) -> u8 {
        let computed = self.division_for(season_minutes);
        if stored == TOP_DIVISION && computed == MAX_THRESHOLD_DIVISION {
            stored
        } else {
            computed
        }
    }

    /// Allocate the top division among users currently in divisions 5 and 6.
    ///
    /// Candidates are ordered by season minutes, descending, with ties keeping their
    /// input order. The first N hold division 6 and everyone else division 5. Only users
    /// whose division actually changes are returned.
    pub fn reconcile_top_division(&self, candidates: &[DivisionCandidate]) -> Vec<RankChange> {
        let mut eligible: Vec<&DivisionCandidate> = candidates
            .iter()
            .filter(|c| c.division >= MAX_THRESHOLD_DIVISION)
            .collect();
        eligible.sort_by(|a, b| b.season_minutes.cmp(&a.season_minutes));

        eligible
            .into_iter()
            .enumerate()
            .filter_map(|(position, candidate)| {
                let target = if position < self.top_division_size {
                    TOP_DIVISION
                } else {
                    MAX_THRESHOLD_DIVISION
                };
                (candidate.division != target).then(|| RankChange {
                    user_id: candidate.user_id,
                    kind: RankKind::Division,
                    from: candidate.division,
                    to: target,
                })
            })
            .collect()
    }
}
