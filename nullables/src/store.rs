//! Nullable block store: in-memory storage with injectable failures.

use dpos_store::{BlockStore, MemoryBlockStore, SavedRound, StoreError};
use dpos_types::Block;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Wraps a [`MemoryBlockStore`]; block and round deletes can be made to
/// fail on demand.
#[derive(Default)]
pub struct NullBlockStore {
    inner: MemoryBlockStore,
    fail_deletes: AtomicBool,
    fail_round_deletes: AtomicBool,
    deletes: AtomicUsize,
}

impl NullBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryBlockStore {
        &self.inner
    }

    /// Make every `delete_block` fail with a backend error.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Make every `delete_round` fail with a backend error.
    pub fn fail_round_deletes(&self, fail: bool) {
        self.fail_round_deletes.store(fail, Ordering::SeqCst);
    }

    /// Successful block deletions so far.
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl BlockStore for NullBlockStore {
    fn last_block(&self) -> Result<Option<Block>, StoreError> {
        self.inner.last_block()
    }

    fn save_block(&self, block: &Block) -> Result<(), StoreError> {
        self.inner.save_block(block)
    }

    fn block_at(&self, height: u64) -> Result<Option<Block>, StoreError> {
        self.inner.block_at(height)
    }

    fn blocks_from(&self, height: u64, limit: usize) -> Result<Vec<Block>, StoreError> {
        self.inner.blocks_from(height, limit)
    }

    fn delete_block(&self, block: &Block) -> Result<(), StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("scripted delete failure".into()));
        }
        self.inner.delete_block(block)?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn verify_blockchain(&self) -> Result<bool, StoreError> {
        self.inner.verify_blockchain()
    }

    fn save_round(&self, round: &SavedRound) -> Result<(), StoreError> {
        self.inner.save_round(round)
    }

    fn round(&self, round: u64) -> Result<Option<SavedRound>, StoreError> {
        self.inner.round(round)
    }

    fn delete_round(&self, round: u64) -> Result<(), StoreError> {
        if self.fail_round_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("scripted round delete failure".into()));
        }
        self.inner.delete_round(round)
    }

    fn delete_rounds_from(&self, round: u64) -> Result<(), StoreError> {
        self.inner.delete_rounds_from(round)
    }
}
