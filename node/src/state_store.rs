//! In-process chain bookkeeping shared by the state machine, its actions and
//! the block worker.

use std::collections::VecDeque;

use dpos_types::{Block, BlockId, Timestamp};

use crate::machine::BlockchainState;

/// How often the current tip has been received again since it was
/// accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockPing {
    pub height: u64,
    pub block_id: BlockId,
    pub count: u32,
    pub first: Timestamp,
    pub last: Timestamp,
}

#[derive(Debug)]
pub struct StateStore {
    pub blockchain: BlockchainState,
    /// Most recent accepted blocks, ascending by height.
    last_blocks: VecDeque<Block>,
    max_last_blocks: usize,
    last_downloaded_block: Option<Block>,
    number_of_blocks_to_rollback: Option<u64>,
    /// Set by the worker when a block forks the local chain.
    pub forked_block: Option<Block>,
    /// Set once the node finished its first sync.
    pub started: bool,
    /// Start a new network from genesis instead of syncing.
    pub network_start: bool,
    pub no_block_counter: u32,
    pub p2p_update_counter: u32,
    block_ping: Option<BlockPing>,
}

impl StateStore {
    pub fn new(max_last_blocks: usize, network_start: bool) -> Self {
        Self {
            blockchain: BlockchainState::Uninitialized,
            last_blocks: VecDeque::new(),
            max_last_blocks: max_last_blocks.max(1),
            last_downloaded_block: None,
            number_of_blocks_to_rollback: None,
            forked_block: None,
            started: false,
            network_start,
            no_block_counter: 0,
            p2p_update_counter: 0,
            block_ping: None,
        }
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.last_blocks.back()
    }

    pub fn last_height(&self) -> u64 {
        self.last_block().map_or(0, |b| b.height)
    }

    /// Record a new tip. Cached blocks at or above its height are dropped,
    /// which covers rollbacks.
    pub fn set_last_block(&mut self, block: Block) {
        while self
            .last_blocks
            .back()
            .is_some_and(|b| b.height >= block.height)
        {
            self.last_blocks.pop_back();
        }
        self.last_blocks.push_back(block);
        while self.last_blocks.len() > self.max_last_blocks {
            self.last_blocks.pop_front();
        }
        self.no_block_counter = 0;
        self.p2p_update_counter = 0;
    }

    /// Recent blocks, oldest first.
    pub fn last_blocks(&self) -> impl Iterator<Item = &Block> {
        self.last_blocks.iter()
    }

    pub fn clear_last_blocks(&mut self) {
        self.last_blocks.clear();
    }

    /// The newest block handed to the queue, falling back to the tip.
    pub fn last_downloaded_block(&self) -> Option<&Block> {
        self.last_downloaded_block
            .as_ref()
            .or_else(|| self.last_block())
    }

    pub fn set_last_downloaded_block(&mut self, block: Option<Block>) {
        self.last_downloaded_block = block;
    }

    pub fn number_of_blocks_to_rollback(&self) -> Option<u64> {
        self.number_of_blocks_to_rollback
    }

    pub fn set_number_of_blocks_to_rollback(&mut self, blocks: Option<u64>) {
        self.number_of_blocks_to_rollback = blocks;
    }

    /// Consume the stored rollback depth. Only a positive value counts.
    pub fn take_blocks_to_rollback(&mut self) -> Option<u64> {
        self.number_of_blocks_to_rollback.take().filter(|n| *n > 0)
    }

    pub fn block_ping(&self) -> Option<&BlockPing> {
        self.block_ping.as_ref()
    }

    /// Count another copy of the pinged block. Returns false when `block`
    /// is not the pinged one.
    pub fn ping_block(&mut self, block: &Block, now: Timestamp) -> bool {
        match self.block_ping.as_mut() {
            Some(ping) if ping.height == block.height && ping.block_id == block.id => {
                ping.count += 1;
                ping.last = now;
                true
            }
            _ => false,
        }
    }

    /// Start tracking `block`, replacing the previous ping. A block forged
    /// locally starts at zero; one received from a peer counts itself.
    pub fn push_ping_block(&mut self, block: &Block, now: Timestamp, from_forger: bool) {
        if let Some(previous) = &self.block_ping {
            tracing::debug!(
                height = previous.height,
                count = previous.count,
                "previous block pinged blockchain"
            );
        }
        self.block_ping = Some(BlockPing {
            height: block.height,
            block_id: block.id,
            count: u32::from(!from_forger),
            first: now,
            last: now,
        });
    }
}
