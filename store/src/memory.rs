//! In-memory block store.

use crate::{BlockStore, SavedRound, StoreError};
use dpos_types::Block;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    blocks: BTreeMap<u64, Block>,
    rounds: BTreeMap<u64, SavedRound>,
}

/// A [`BlockStore`] kept entirely in memory.
#[derive(Default)]
pub struct MemoryBlockStore {
    inner: Mutex<Inner>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a block without tip checks.
    ///
    /// Used to load pre-existing chains, including deliberately corrupt ones.
    pub fn insert_unchecked(&self, block: Block) -> Result<(), StoreError> {
        self.lock()?.blocks.insert(block.height, block);
        Ok(())
    }

    pub fn block_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.blocks.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

impl BlockStore for MemoryBlockStore {
    fn last_block(&self) -> Result<Option<Block>, StoreError> {
        Ok(self.lock()?.blocks.values().next_back().cloned())
    }

    fn save_block(&self, block: &Block) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let tip = inner.blocks.keys().next_back().copied().unwrap_or(0);
        if block.height != tip + 1 {
            return Err(StoreError::NotTip {
                height: block.height,
                tip,
            });
        }
        inner.blocks.insert(block.height, block.clone());
        Ok(())
    }

    fn block_at(&self, height: u64) -> Result<Option<Block>, StoreError> {
        Ok(self.lock()?.blocks.get(&height).cloned())
    }

    fn blocks_from(&self, height: u64, limit: usize) -> Result<Vec<Block>, StoreError> {
        Ok(self
            .lock()?
            .blocks
            .range(height..)
            .take(limit)
            .map(|(_, b)| b.clone())
            .collect())
    }

    fn delete_block(&self, block: &Block) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let tip = inner.blocks.keys().next_back().copied().unwrap_or(0);
        match inner.blocks.get(&block.height) {
            Some(stored) if block.height == tip && stored.id == block.id => {
                inner.blocks.remove(&block.height);
                Ok(())
            }
            Some(_) if block.height != tip => Err(StoreError::NotTip {
                height: block.height,
                tip,
            }),
            _ => Err(StoreError::NotFound(block.id.to_string())),
        }
    }

    fn verify_blockchain(&self) -> Result<bool, StoreError> {
        let inner = self.lock()?;
        let mut previous: Option<&Block> = None;
        for (height, block) in &inner.blocks {
            let linked = match previous {
                None => *height == 1 && block.previous_block_id.is_none(),
                Some(prev) => {
                    *height == prev.height + 1 && block.previous_block_id == Some(prev.id)
                }
            };
            if !linked {
                tracing::warn!(height, block_id = %block.id, "stored chain is not linked");
                return Ok(false);
            }
            previous = Some(block);
        }
        Ok(true)
    }

    fn save_round(&self, round: &SavedRound) -> Result<(), StoreError> {
        self.lock()?.rounds.insert(round.round, round.clone());
        Ok(())
    }

    fn round(&self, round: u64) -> Result<Option<SavedRound>, StoreError> {
        Ok(self.lock()?.rounds.get(&round).cloned())
    }

    fn delete_round(&self, round: u64) -> Result<(), StoreError> {
        self.lock()?.rounds.remove(&round);
        Ok(())
    }

    fn delete_rounds_from(&self, round: u64) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let _ = inner.rounds.split_off(&round);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoundDelegate;
    use dpos_types::{BlockId, PublicKey, Timestamp};

    fn block(height: u64, previous: Option<u8>) -> Block {
        Block {
            height,
            id: BlockId::new([height as u8; 32]),
            previous_block_id: previous.map(|p| BlockId::new([p; 32])),
            timestamp: Timestamp::new(height * 8),
            generator_public_key: PublicKey::new([1; 32]),
            reward: 0,
            total_fee: 0,
            transactions: Vec::new(),
        }
    }

    #[test]
    fn save_block_only_extends_tip() {
        let store = MemoryBlockStore::new();
        store.save_block(&block(1, None)).expect("genesis");
        store.save_block(&block(2, Some(1))).expect("child");
        assert!(matches!(
            store.save_block(&block(4, Some(3))),
            Err(StoreError::NotTip { height: 4, tip: 2 })
        ));
        assert_eq!(store.last_block().unwrap().map(|b| b.height), Some(2));
    }

    #[test]
    fn delete_block_only_pops_tip() {
        let store = MemoryBlockStore::new();
        store.save_block(&block(1, None)).unwrap();
        store.save_block(&block(2, Some(1))).unwrap();
        assert!(store.delete_block(&block(1, None)).is_err());
        store.delete_block(&block(2, Some(1))).expect("tip delete");
        assert_eq!(store.last_block().unwrap().map(|b| b.height), Some(1));
    }

    #[test]
    fn verify_detects_broken_links() {
        let store = MemoryBlockStore::new();
        store.save_block(&block(1, None)).unwrap();
        store.save_block(&block(2, Some(1))).unwrap();
        assert!(store.verify_blockchain().unwrap());

        store.insert_unchecked(block(3, Some(9))).unwrap();
        assert!(!store.verify_blockchain().unwrap());
    }

    #[test]
    fn delete_rounds_from_drops_later_rounds() {
        let store = MemoryBlockStore::new();
        for round in 1..=4 {
            store
                .save_round(&SavedRound {
                    round,
                    delegates: vec![RoundDelegate {
                        public_key: PublicKey::new([round as u8; 32]),
                        vote_balance: 0,
                        rank: 1,
                    }],
                })
                .unwrap();
        }
        store.delete_rounds_from(3).unwrap();
        assert!(store.round(2).unwrap().is_some());
        assert!(store.round(3).unwrap().is_none());
        assert!(store.round(4).unwrap().is_none());
    }
}
