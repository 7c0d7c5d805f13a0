//! Per-block validation and application.
//!
//! A block that chains onto the tip is checked against the round's forging
//! order and applied. A block that does not chain is classified: too new,
//! already known, out of order, a fork by an active delegate, or garbage.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use dpos_consensus::{expected_generator, ChainBreak, ChainValidator};
use dpos_state::WalletRepository;
use dpos_store::BlockStore;
use dpos_types::{Block, MilestoneSchedule};

use crate::metrics::ConsensusMetrics;
use crate::rounds::RoundManager;
use crate::state_store::StateStore;
use crate::{lock, NodeError};

/// Result of processing a single block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    /// Applied to wallets and store; the block is the new tip.
    Accepted,
    /// Already part of the chain. Peers may still want it.
    DiscardedButCanBeBroadcasted,
    Rejected(RejectReason),
    /// An active delegate signed a block that conflicts with the local chain.
    Fork,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Height is more than one above the tip.
    NotReady,
    /// Timestamp before the tip's.
    InvalidTimestamp,
    /// Not signed by the delegate owning the slot.
    InvalidGenerator,
    NotChained(ChainBreak),
    /// Wallets refused the block's effects.
    ApplyFailed(String),
    /// The chain has no tip yet.
    NoLastBlock,
}

pub struct BlockProcessor {
    schedule: MilestoneSchedule,
    store: Arc<dyn BlockStore>,
    wallets: Arc<Mutex<WalletRepository>>,
    state: Arc<Mutex<StateStore>>,
    rounds: Arc<Mutex<RoundManager>>,
    metrics: Arc<ConsensusMetrics>,
}

impl BlockProcessor {
    pub fn new(
        schedule: MilestoneSchedule,
        store: Arc<dyn BlockStore>,
        wallets: Arc<Mutex<WalletRepository>>,
        state: Arc<Mutex<StateStore>>,
        rounds: Arc<Mutex<RoundManager>>,
        metrics: Arc<ConsensusMetrics>,
    ) -> Self {
        Self {
            schedule,
            store,
            wallets,
            state,
            rounds,
            metrics,
        }
    }

    /// Validate `block` against the tip and apply it if it chains.
    ///
    /// Only store failures and invariant violations are errors; everything
    /// wrong with the block itself is a [`ProcessResult`].
    pub fn process(&self, block: &Block) -> Result<ProcessResult, NodeError> {
        let started = Instant::now();
        let result = self.classify_and_apply(block);
        self.metrics
            .block_process_time_ms
            .observe(started.elapsed().as_secs_f64() * 1000.0);

        match &result {
            Ok(ProcessResult::Accepted) => {
                self.metrics.blocks_accepted.inc();
                // Saturates far beyond any reachable height.
                self.metrics
                    .chain_height
                    .set(i64::try_from(block.height).unwrap_or(i64::MAX));
            }
            Ok(ProcessResult::Fork) => self.metrics.forks_detected.inc(),
            Ok(_) => self.metrics.blocks_rejected.inc(),
            Err(_) => {}
        }
        result
    }

    fn classify_and_apply(&self, block: &Block) -> Result<ProcessResult, NodeError> {
        let Some(last) = lock(&self.state).last_block().cloned() else {
            return Ok(ProcessResult::Rejected(RejectReason::NoLastBlock));
        };
        let blocktime = self.schedule.milestone_at(block.height).blocktime;
        let validator = ChainValidator::new(blocktime);

        match validator.check(&last, block) {
            Ok(()) => {
                if !self.is_expected_generator(block, blocktime) {
                    tracing::warn!(
                        height = block.height,
                        block_id = %block.id,
                        generator = %block.generator_public_key,
                        "block not forged by the delegate owning its slot"
                    );
                    return Ok(ProcessResult::Rejected(RejectReason::InvalidGenerator));
                }
                self.accept(block)
            }
            Err(chain_break) => Ok(self.classify_unchained(&last, block, chain_break)),
        }
    }

    fn is_expected_generator(&self, block: &Block, blocktime: u64) -> bool {
        let rounds = lock(&self.rounds);
        let slot = block.timestamp.slot(blocktime);
        expected_generator(rounds.forging_order(), slot) == Some(&block.generator_public_key)
    }

    fn accept(&self, block: &Block) -> Result<ProcessResult, NodeError> {
        let mut wallets = lock(&self.wallets);
        if let Err(e) = wallets.apply_block(block) {
            tracing::warn!(
                height = block.height,
                block_id = %block.id,
                error = %e,
                "block refused by wallet state"
            );
            return Ok(ProcessResult::Rejected(RejectReason::ApplyFailed(
                e.to_string(),
            )));
        }

        if let Err(e) = self.store.save_block(block) {
            if let Err(revert) = wallets.revert_block(block) {
                tracing::error!(
                    height = block.height,
                    error = %revert,
                    "failed to undo wallet changes after store failure"
                );
            }
            return Err(e.into());
        }

        lock(&self.state).set_last_block(block.clone());
        lock(&self.rounds).apply_round(block.height, &mut wallets)?;

        tracing::debug!(
            height = block.height,
            block_id = %block.id,
            transactions = block.transactions.len(),
            "block accepted"
        );
        Ok(ProcessResult::Accepted)
    }

    fn classify_unchained(&self, last: &Block, block: &Block, chain_break: ChainBreak) -> ProcessResult {
        if block.height > last.height + 1 {
            tracing::debug!(
                height = block.height,
                last_height = last.height,
                "block too far ahead, not ready to accept it"
            );
            return ProcessResult::Rejected(RejectReason::NotReady);
        }

        if block.height < last.height || (block.height == last.height && block.id == last.id) {
            tracing::debug!(
                height = block.height,
                block_id = %block.id,
                "block already in chain"
            );
            return ProcessResult::DiscardedButCanBeBroadcasted;
        }

        if block.timestamp < last.timestamp {
            tracing::warn!(
                height = block.height,
                block_id = %block.id,
                timestamp = %block.timestamp,
                last_timestamp = %last.timestamp,
                "block timestamp before the last block's"
            );
            return ProcessResult::Rejected(RejectReason::InvalidTimestamp);
        }

        // Same height with another id, or the next height on another parent.
        let by_active_delegate = lock(&self.rounds)
            .forging_order()
            .contains(&block.generator_public_key);
        if by_active_delegate {
            tracing::info!(
                height = block.height,
                block_id = %block.id,
                last_block_id = %last.id,
                generator = %block.generator_public_key,
                reason = %chain_break,
                "fork detected"
            );
            return ProcessResult::Fork;
        }

        tracing::warn!(
            height = block.height,
            block_id = %block.id,
            reason = %chain_break,
            "block does not chain and is not from an active delegate"
        );
        ProcessResult::Rejected(RejectReason::NotChained(chain_break))
    }
}
