//! Milestones: height-activated network parameters.
//!
//! The schedule is sourced from network configuration and never mutated by
//! the consensus core. Each milestone applies from its height until the next
//! one.

use crate::TypesError;
use serde::{Deserialize, Serialize};

/// Parameters in effect from `height` onward.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub height: u64,
    pub active_delegates: u64,
    /// Seconds per slot.
    pub blocktime: u64,
    #[serde(default)]
    pub reward: u64,
}

/// An ordered, immutable milestone schedule starting at height 1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Milestone>", into = "Vec<Milestone>")]
pub struct MilestoneSchedule {
    milestones: Vec<Milestone>,
}

impl MilestoneSchedule {
    pub fn new(milestones: Vec<Milestone>) -> Result<Self, TypesError> {
        let first = milestones
            .first()
            .ok_or_else(|| TypesError::InvalidMilestones("schedule is empty".into()))?;
        if first.height != 1 {
            return Err(TypesError::InvalidMilestones(format!(
                "first milestone must start at height 1, got {}",
                first.height
            )));
        }
        for pair in milestones.windows(2) {
            if pair[1].height <= pair[0].height {
                return Err(TypesError::InvalidMilestones(format!(
                    "milestone heights must strictly increase ({} then {})",
                    pair[0].height, pair[1].height
                )));
            }
        }
        if let Some(m) = milestones
            .iter()
            .find(|m| m.active_delegates == 0 || m.blocktime == 0)
        {
            return Err(TypesError::InvalidMilestones(format!(
                "milestone at height {} has a zero delegate count or block time",
                m.height
            )));
        }
        Ok(Self { milestones })
    }

    /// A schedule with one genesis milestone. Zero counts are raised to 1.
    pub fn single(active_delegates: u64, blocktime: u64, reward: u64) -> Self {
        Self {
            milestones: vec![Milestone {
                height: 1,
                active_delegates: active_delegates.max(1),
                blocktime: blocktime.max(1),
                reward,
            }],
        }
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    /// The milestone in effect at `height`. Heights below 1 map to genesis.
    pub fn milestone_at(&self, height: u64) -> &Milestone {
        let idx = self
            .milestones
            .partition_point(|m| m.height <= height)
            .saturating_sub(1);
        &self.milestones[idx]
    }

    pub fn genesis(&self) -> &Milestone {
        &self.milestones[0]
    }
}

impl TryFrom<Vec<Milestone>> for MilestoneSchedule {
    type Error = TypesError;

    fn try_from(milestones: Vec<Milestone>) -> Result<Self, Self::Error> {
        Self::new(milestones)
    }
}

impl From<MilestoneSchedule> for Vec<Milestone> {
    fn from(schedule: MilestoneSchedule) -> Self {
        schedule.milestones
    }
}
