//! Chain adjacency: does a candidate block legally extend its predecessor?

use dpos_types::Block;
use thiserror::Error;

/// Why a block does not extend its predecessor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainBreak {
    #[error("previous block id does not match predecessor {expected}")]
    PreviousMismatch { expected: String },

    #[error("expected height {expected}, got {actual}")]
    HeightGap { expected: u64, actual: u64 },

    #[error("slot {next_slot} does not follow slot {previous_slot}")]
    SlotNotAdvanced { previous_slot: u64, next_slot: u64 },
}

/// Pure adjacency check against a fixed block time.
#[derive(Clone, Copy, Debug)]
pub struct ChainValidator {
    blocktime: u64,
}

impl ChainValidator {
    pub fn new(blocktime: u64) -> Self {
        Self { blocktime }
    }

    pub fn blocktime(&self) -> u64 {
        self.blocktime
    }

    /// `true` iff `next` links to `previous`, is exactly one height above it
    /// and was forged in a strictly later slot.
    pub fn is_chained(&self, previous: &Block, next: &Block) -> bool {
        self.check(previous, next).is_ok()
    }

    /// Like [`is_chained`](Self::is_chained) but reports the first failed rule.
    pub fn check(&self, previous: &Block, next: &Block) -> Result<(), ChainBreak> {
        if next.previous_block_id != Some(previous.id) {
            return Err(ChainBreak::PreviousMismatch {
                expected: previous.id.to_string(),
            });
        }
        if next.height != previous.height + 1 {
            return Err(ChainBreak::HeightGap {
                expected: previous.height + 1,
                actual: next.height,
            });
        }
        let previous_slot = previous.timestamp.slot(self.blocktime);
        let next_slot = next.timestamp.slot(self.blocktime);
        // Same-slot and regressing timestamps are both rejected here.
        if next_slot <= previous_slot {
            return Err(ChainBreak::SlotNotAdvanced {
                previous_slot,
                next_slot,
            });
        }
        Ok(())
    }
}
