//! Round calculation over a schedule of active-delegate changes.
//!
//! A round is `active_delegates` consecutive heights. The schedule is split
//! into segments, each starting where the delegate count changes; a change
//! is only legal on a round boundary, otherwise nodes would disagree about
//! where rounds start.

use crate::RoundError;
use dpos_types::MilestoneSchedule;
use serde::{Deserialize, Serialize};

/// Round data derived from a height. Never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub round: u64,
    /// First height of `round`.
    pub round_height: u64,
    /// `round + 1` when the height is the last one of its round.
    pub next_round: u64,
    pub max_delegates: u64,
}

/// Start and delegate count of the segment containing a height.
#[derive(Clone, Copy, Debug)]
struct Segment {
    start: u64,
    active_delegates: u64,
}

#[derive(Clone, Debug)]
pub struct RoundCalculator {
    schedule: MilestoneSchedule,
}

impl RoundCalculator {
    pub fn new(schedule: MilestoneSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &MilestoneSchedule {
        &self.schedule
    }

    /// Check every delegate-count change in the schedule is round aligned.
    pub fn validate(&self) -> Result<(), RoundError> {
        let last = self
            .schedule
            .milestones()
            .last()
            .map_or(1, |m| m.height);
        self.calculate_round(last).map(|_| ())
    }

    pub fn calculate_round(&self, height: u64) -> Result<RoundInfo, RoundError> {
        if height == 0 {
            return Err(RoundError::ZeroHeight);
        }

        let genesis = self.schedule.genesis();
        let mut round = 1;
        let mut round_height = 1;
        let mut segment = Segment {
            start: genesis.height,
            active_delegates: genesis.active_delegates,
        };

        for milestone in self.schedule.milestones().iter().skip(1) {
            if milestone.height > height {
                break;
            }
            if milestone.active_delegates == segment.active_delegates {
                continue;
            }
            let span = milestone.height - segment.start;
            if span % segment.active_delegates != 0 {
                return Err(RoundError::MisalignedMilestone {
                    height: milestone.height,
                    span,
                    active: segment.active_delegates,
                    next: milestone.active_delegates,
                });
            }
            round += span / segment.active_delegates;
            round_height = milestone.height;
            segment = Segment {
                start: milestone.height,
                active_delegates: milestone.active_delegates,
            };
        }

        let into_segment = height - segment.start;
        let rounds_in_segment = into_segment / segment.active_delegates;
        round += rounds_in_segment;
        round_height += rounds_in_segment * segment.active_delegates;
        let ends_round = (into_segment + 1) % segment.active_delegates == 0;

        Ok(RoundInfo {
            round,
            round_height,
            next_round: round + u64::from(ends_round),
            max_delegates: segment.active_delegates,
        })
    }

    /// `true` iff `height` is the first height of a round.
    pub fn is_new_round(&self, height: u64) -> bool {
        if height == 0 {
            return false;
        }
        if height == 1 {
            return true;
        }
        let segment = self.segment_of(height);
        (height - segment.start) % segment.active_delegates == 0
    }

    fn segment_of(&self, height: u64) -> Segment {
        let genesis = self.schedule.genesis();
        let mut segment = Segment {
            start: genesis.height,
            active_delegates: genesis.active_delegates,
        };
        for milestone in self.schedule.milestones().iter().skip(1) {
            if milestone.height > height {
                break;
            }
            if milestone.active_delegates != segment.active_delegates {
                segment = Segment {
                    start: milestone.height,
                    active_delegates: milestone.active_delegates,
                };
            }
        }
        segment
    }
}
