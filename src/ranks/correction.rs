//! Keeping platform group state consistent with stored ranks.

use super::engine::RankKind;
use crate::adapters::{AdapterError, PlatformAdapter};
use serde::{Deserialize, Serialize};

/// Group or role ids per tier for one platform.
///
/// `levels[0]` is the group for level 1, `divisions[5]` the group for the top division.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankGroups {
    pub levels: Vec<u64>,
    pub divisions: Vec<u64>,
}

impl RankGroups {
    pub fn level_group(&self, level: u8) -> Option<u64> {
        self.group_for(RankKind::Level, level)
    }

    pub fn division_group(&self, division: u8) -> Option<u64> {
        self.group_for(RankKind::Division, division)
    }

    /// Group for a tier, if configured.
    pub fn group_for(&self, kind: RankKind, tier: u8) -> Option<u64> {
        if tier == 0 {
            return None;
        }
        self.category(kind).get(tier as usize - 1).copied()
    }

    /// All groups of one category.
    pub fn category(&self, kind: RankKind) -> &[u64] {
        match kind {
            RankKind::Level => &self.levels,
            RankKind::Division => &self.divisions,
        }
    }
}

/// Group mutations that bring one category back to exactly the target group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPlan {
    pub remove: Vec<u64>,
    pub add: Option<u64>,
}

/// Compare held groups against the target.
///
/// Returns `None` when the user holds exactly the target group of the category. A
/// missing target, duplicates or a wrong group yield a plan that strips every other
/// group of the category and grants the target.
pub fn plan_correction(held: &[u64], category: &[u64], target: u64) -> Option<GroupPlan> {
    let mut in_category: Vec<u64> = held
        .iter()
        .copied()
        .filter(|group| category.contains(group))
        .collect();
    in_category.sort_unstable();
    in_category.dedup();

    if in_category == [target] {
        return None;
    }

    Some(GroupPlan {
        add: (!in_category.contains(&target)).then_some(target),
        remove: in_category.into_iter().filter(|g| *g != target).collect(),
    })
}

/// Stored ranks of a user. Users without a record count as level 1, division 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredRanks {
    pub level: u8,
    pub division: u8,
}

impl Default for StoredRanks {
    fn default() -> Self {
        Self {
            level: 1,
            division: 1,
        }
    }
}

/// What a correction changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrectionOutcome {
    pub level_corrected: bool,
    pub division_corrected: bool,
}

/// Make the user hold exactly the group of `tier` within the `kind` category.
///
/// Returns `Ok(false)` when nothing had to change or no group is configured for the tier.
pub async fn assign_rank<A: PlatformAdapter>(
    adapter: &A,
    platform_id: &str,
    kind: RankKind,
    tier: u8,
) -> Result<bool, AdapterError> {
    let groups = adapter.rank_groups();
    let Some(target) = groups.group_for(kind, tier) else {
        tracing::debug!("No {} group configured for {} {}", adapter.platform(), kind, tier);
        return Ok(false);
    };

    let held = adapter.member_groups(platform_id).await?;
    let Some(plan) = plan_correction(&held, groups.category(kind), target) else {
        return Ok(false);
    };

    for group in &plan.remove {
        adapter.remove_group(platform_id, *group).await?;
    }
    if let Some(group) = plan.add {
        adapter.add_group(platform_id, group).await?;
    }

    tracing::info!(
        "{} {} of {} set to {} (removed {:?})",
        adapter.platform(),
        kind,
        platform_id,
        tier,
        plan.remove
    );
    Ok(true)
}

/// Compare stored ranks with the platform's group assignment and repair both categories.
///
/// Each category is corrected on its own; a failure is logged and the first one is
/// returned after both were attempted.
pub async fn check_and_correct<A: PlatformAdapter>(
    adapter: &A,
    platform_id: &str,
    stored: StoredRanks,
) -> Result<CorrectionOutcome, AdapterError> {
    let level = assign_rank(adapter, platform_id, RankKind::Level, stored.level).await;
    let division = assign_rank(adapter, platform_id, RankKind::Division, stored.division).await;

    for (kind, result) in [(RankKind::Level, &level), (RankKind::Division, &division)] {
        if let Err(e) = result {
            tracing::warn!(
                "Could not correct {} {} of {}: {}",
                adapter.platform(),
                kind,
                platform_id,
                e
            );
        }
    }

    Ok(CorrectionOutcome {
        level_corrected: level?,
        division_corrected: division?,
    })
}
