//! Rank computation and platform group correction.
//!
//! Levels (1..=25) follow total minutes across both platforms, divisions (1..=5)
//! follow season minutes, and division 6 is reserved for the top of the season
//! leaderboard.

pub mod correction;
pub mod engine;
pub mod thresholds;

use thiserror::Error;

pub use correction::{
    assign_rank, check_and_correct, plan_correction, CorrectionOutcome, GroupPlan, RankGroups,
    StoredRanks,
};
pub use engine::{DivisionCandidate, RankChange, RankEngine, RankKind};
pub use thresholds::{
    RankThresholds, DEFAULT_DIVISION_THRESHOLDS, DEFAULT_LEVEL_THRESHOLDS, MAX_LEVEL,
    MAX_THRESHOLD_DIVISION, TOP_DIVISION,
};

/// Rank configuration errors.
#[derive(Debug, Error)]
pub enum RankError {
    #[error("Invalid thresholds: {0}")]
    InvalidThresholds(String),
}
