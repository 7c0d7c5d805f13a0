//! Block storage trait (the Database collaborator).

use crate::{SavedRound, StoreError};
use dpos_types::Block;

/// Persistent chain storage as seen by the consensus core.
///
/// Blocks only ever change at the tip: [`save_block`](Self::save_block)
/// appends and [`delete_block`](Self::delete_block) pops.
pub trait BlockStore: Send + Sync {
    /// The highest stored block, if any.
    fn last_block(&self) -> Result<Option<Block>, StoreError>;

    /// Append a block at the tip; it becomes the new last block.
    fn save_block(&self, block: &Block) -> Result<(), StoreError>;

    /// Retrieve the block at `height`.
    fn block_at(&self, height: u64) -> Result<Option<Block>, StoreError>;

    /// Up to `limit` consecutive blocks starting at `height`.
    fn blocks_from(&self, height: u64, limit: usize) -> Result<Vec<Block>, StoreError>;

    /// Remove the tip block. Deleting anything other than the tip is an error.
    fn delete_block(&self, block: &Block) -> Result<(), StoreError>;

    /// Check that the stored chain is internally consistent.
    fn verify_blockchain(&self) -> Result<bool, StoreError>;

    /// Persist the ranked delegate list of a round, replacing any previous one.
    fn save_round(&self, round: &SavedRound) -> Result<(), StoreError>;

    fn round(&self, round: u64) -> Result<Option<SavedRound>, StoreError>;

    fn delete_round(&self, round: u64) -> Result<(), StoreError>;

    /// Delete `round` and every later round.
    fn delete_rounds_from(&self, round: u64) -> Result<(), StoreError>;
}
