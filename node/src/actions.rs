//! Handlers for the actions the state machine requests.
//!
//! Handlers are looked up in an [`ActionRegistry`] built once at startup. A
//! kind with no handler is logged and skipped; the transition still stands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dpos_consensus::{build_vote_balances, ChainValidator};
use dpos_types::{Block, RandomSource};

use crate::fork_recovery::ForkRecoveryAction;
use crate::machine::{ActionKind, Event};
use crate::{Blockchain, NodeError};

/// Replayed blocks are read from the store in batches of this size.
const REPLAY_BATCH: usize = 1000;

#[async_trait]
pub trait Action: Send + Sync {
    async fn handle(&self, chain: &Blockchain) -> Result<(), NodeError>;
}

pub struct ActionRegistry {
    actions: HashMap<ActionKind, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn empty() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Every action kind bound to its built-in handler.
    pub fn with_defaults(random: Arc<dyn RandomSource>) -> Self {
        let mut registry = Self::empty();
        for kind in [
            ActionKind::Init,
            ActionKind::RollbackDatabase,
            ActionKind::BlockchainReady,
            ActionKind::CheckLater,
            ActionKind::CheckLastBlockSynced,
            ActionKind::CheckLastDownloadedBlockSynced,
            ActionKind::DownloadBlocks,
            ActionKind::DownloadFinished,
            ActionKind::DownloadPaused,
            ActionKind::Stopped,
            ActionKind::SyncingComplete,
            ActionKind::ConfirmFork,
            ActionKind::ExitApp,
        ] {
            registry.register(kind, Arc::new(BuiltinAction(kind)));
        }
        registry.register(
            ActionKind::StartForkRecovery,
            Arc::new(ForkRecoveryAction::new(random)),
        );
        registry
    }

    pub fn register(&mut self, kind: ActionKind, action: Arc<dyn Action>) {
        self.actions.insert(kind, action);
    }

    pub fn unregister(&mut self, kind: ActionKind) -> Option<Arc<dyn Action>> {
        self.actions.remove(&kind)
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn Action>> {
        self.actions.get(&kind).cloned()
    }
}

#[async_trait]
impl Action for ForkRecoveryAction {
    async fn handle(&self, chain: &Blockchain) -> Result<(), NodeError> {
        self.run(chain).await;
        Ok(())
    }
}

/// The node's own handler for an action kind.
struct BuiltinAction(ActionKind);

#[async_trait]
impl Action for BuiltinAction {
    async fn handle(&self, chain: &Blockchain) -> Result<(), NodeError> {
        match self.0 {
            ActionKind::Init => {
                if let Err(e) = init(chain).await {
                    tracing::error!(error = %e, "blockchain initialisation failed");
                    chain.dispatch(Event::Failure);
                }
                Ok(())
            }
            ActionKind::RollbackDatabase => {
                if let Err(e) = rollback_database(chain) {
                    tracing::error!(error = %e, "database rollback failed");
                    chain.dispatch(Event::Failure);
                }
                Ok(())
            }
            ActionKind::BlockchainReady => {
                let mut state = chain.lock_state();
                if !state.started {
                    state.started = true;
                    tracing::info!(height = state.last_height(), "blockchain ready");
                }
                Ok(())
            }
            ActionKind::CheckLater => {
                chain.set_wake_up();
                Ok(())
            }
            ActionKind::CheckLastBlockSynced => {
                let last = chain.last_block().ok_or(NodeError::NotInitialized)?;
                let event = if chain.is_synced(&last).await {
                    Event::Synced
                } else {
                    Event::NotSynced
                };
                chain.dispatch(event);
                Ok(())
            }
            ActionKind::CheckLastDownloadedBlockSynced => {
                check_last_downloaded_block_synced(chain).await
            }
            ActionKind::DownloadBlocks => download_blocks(chain).await,
            ActionKind::DownloadFinished => {
                tracing::info!("block download finished");
                let network_start = {
                    let mut state = chain.lock_state();
                    std::mem::replace(&mut state.network_start, false)
                };
                if network_start {
                    chain.dispatch(Event::SyncFinished);
                } else if chain.queue().is_idle() {
                    chain.dispatch(Event::ProcessFinished);
                }
                Ok(())
            }
            ActionKind::DownloadPaused => {
                tracing::info!(queued = chain.queue().len(), "block download paused");
                Ok(())
            }
            ActionKind::Stopped => {
                tracing::info!("blockchain stopped");
                Ok(())
            }
            ActionKind::SyncingComplete => {
                tracing::info!(height = chain.last_height(), "blockchain in sync");
                chain.dispatch(Event::SyncFinished);
                Ok(())
            }
            ActionKind::ConfirmFork => confirm_fork(chain).await,
            ActionKind::StartForkRecovery => Err(NodeError::Invariant(
                "fork recovery has no built-in handler".into(),
            )),
            ActionKind::ExitApp => {
                chain
                    .shutdown()
                    .terminate("failed to start the blockchain");
                Ok(())
            }
        }
    }
}

async fn init(chain: &Blockchain) -> Result<(), NodeError> {
    chain.calculator().validate()?;

    let store = chain.store();
    if !chain.restored_database_integrity() {
        tracing::info!("verifying database integrity");
        if !store.verify_blockchain()? {
            tracing::warn!("stored chain is corrupt");
            chain.dispatch(Event::Rollback);
            return Ok(());
        }
    }

    let genesis = chain.config().genesis.as_ref();
    let last = match store.last_block()? {
        Some(last) => last,
        None => {
            let genesis = genesis.ok_or_else(|| {
                NodeError::Genesis("store is empty and no genesis block is configured".into())
            })?;
            tracing::info!(block_id = %genesis.block.id, "saving genesis block");
            store.save_block(&genesis.block)?;
            genesis.block.clone()
        }
    };

    if let Some(genesis) = genesis {
        let stored = store
            .block_at(1)?
            .ok_or_else(|| NodeError::Genesis("stored chain has no genesis block".into()))?;
        if stored.id != genesis.block.id {
            return Err(NodeError::Genesis(format!(
                "stored genesis {} differs from configured genesis {}",
                stored.id, genesis.block.id
            )));
        }
    }

    tracing::info!(height = last.height, "last block in database");

    {
        let mut wallets = chain.lock_wallets();
        wallets.clear();
        for wallet in genesis.map(|g| g.wallets.clone()).unwrap_or_default() {
            wallets.index(wallet);
        }

        let mut height = 1;
        while height <= last.height {
            let batch = store.blocks_from(height, REPLAY_BATCH)?;
            let Some(tail) = batch.last().map(|b| b.height) else {
                break;
            };
            for block in &batch {
                wallets.apply_block(block)?;
            }
            height = tail + 1;
        }
        build_vote_balances(&mut wallets)?;

        let mut rounds = chain.lock_rounds();
        rounds.delete_future_rounds(last.height)?;
        rounds.restore_current_round(last.height, &mut wallets)?;
    }

    {
        let mut state = chain.lock_state();
        state.clear_last_blocks();
        state.set_last_block(last.clone());
        state.set_last_downloaded_block(None);
    }
    chain.metrics().chain_height.set(i64::try_from(last.height).unwrap_or(i64::MAX));

    chain.disconnect_invalid_peers().await;
    chain.dispatch(Event::Started);
    Ok(())
}

fn rollback_database(chain: &Blockchain) -> Result<(), NodeError> {
    tracing::info!("trying to restore database integrity");
    let rollback = chain.config().database_rollback;
    let steps = rollback.steps.max(1);
    let store = chain.store();

    let mut rewound = 0;
    while rewound <= rollback.max_block_rewind {
        chain.remove_top_blocks(steps)?;
        rewound += steps;
        if store.verify_blockchain()? {
            break;
        }
    }

    if !store.verify_blockchain()? {
        tracing::error!(rewound, "database still corrupt after rollback");
        chain.dispatch(Event::Failure);
        return Ok(());
    }

    chain.set_restored_database_integrity();
    let height = store.last_block()?.map_or(0, |b| b.height);
    tracing::info!(height, "database integrity verified after rollback");
    chain.dispatch(Event::Success);
    Ok(())
}

async fn check_last_downloaded_block_synced(chain: &Blockchain) -> Result<(), NodeError> {
    let config = chain.config();
    let queued = chain.queue().len();
    tracing::debug!(queued, "queued blocks");

    let mut event = Event::NotSynced;
    if queued > config.queue_pause_threshold {
        event = Event::Paused;
    }

    let halted = {
        let mut state = chain.lock_state();
        let halted = state.no_block_counter > config.max_no_block_attempts && chain.queue().is_idle();
        if halted {
            state.no_block_counter = 0;
        }
        halted
    };

    if halted {
        tracing::info!(
            attempts = config.max_no_block_attempts,
            "network seems to be missing blocks"
        );
        event = Event::NetworkHalted;

        let check_health = {
            let mut state = chain.lock_state();
            if state.p2p_update_counter + 1 > config.max_p2p_update_attempts {
                state.p2p_update_counter = 0;
                true
            } else {
                state.p2p_update_counter += 1;
                false
            }
        };

        if check_health {
            tracing::info!("network keeps missing blocks, checking network health");
            match chain.network().check_network_health().await {
                Ok(status) if status.forked => {
                    chain
                        .lock_state()
                        .set_number_of_blocks_to_rollback(status.blocks_to_rollback);
                    event = Event::Fork;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "network health check failed"),
            }
        }
    } else {
        let last_downloaded = chain.lock_state().last_downloaded_block().cloned();
        if let Some(block) = last_downloaded {
            if chain.is_synced(&block).await {
                let mut state = chain.lock_state();
                state.no_block_counter = 0;
                state.p2p_update_counter = 0;
                event = Event::Synced;
            }
        }
    }

    if chain.lock_state().network_start {
        event = Event::Synced;
    }

    chain.dispatch(event);
    Ok(())
}

async fn download_blocks(chain: &Blockchain) -> Result<(), NodeError> {
    let last_downloaded = chain
        .lock_state()
        .last_downloaded_block()
        .cloned()
        .ok_or(NodeError::NotInitialized)?;

    let blocks = match chain.network().download_blocks(last_downloaded.height).await {
        Ok(blocks) => blocks,
        Err(e) => {
            tracing::warn!(height = last_downloaded.height, error = %e, "block download failed");
            Vec::new()
        }
    };

    if chain.is_stopped() {
        return Ok(());
    }

    // A rollback may have moved the download position meanwhile.
    let current = chain.lock_state().last_downloaded_block().map(|b| b.id);
    if current != Some(last_downloaded.id) {
        tracing::debug!(
            height = last_downloaded.height,
            "download position changed, dropping downloaded blocks"
        );
        return Ok(());
    }

    let chained = blocks.first().is_some_and(|first| {
        let blocktime = chain.calculator().schedule().milestone_at(first.height).blocktime;
        ChainValidator::new(blocktime).is_chained(&last_downloaded, first)
    });

    if chained {
        let transactions: usize = blocks.iter().map(|b| b.transactions.len()).sum();
        tracing::info!(
            blocks = blocks.len(),
            transactions,
            from_height = last_downloaded.height + 1,
            "downloaded new blocks"
        );
        chain.enqueue_blocks(blocks);
        chain.dispatch(Event::Downloaded);
        return Ok(());
    }

    match blocks.first() {
        None => tracing::info!(
            height = last_downloaded.height + 1,
            "could not download any blocks from any peer"
        ),
        Some(first) => {
            tracing::warn!(
                block = %block_json(first),
                last_downloaded = %block_json(&last_downloaded),
                "downloaded block not accepted"
            );
            chain.queue().clear();
        }
    }

    if chain.queue().is_empty() {
        let mut state = chain.lock_state();
        state.no_block_counter += 1;
        let tip = state.last_block().cloned();
        state.set_last_downloaded_block(tip);
    }

    let retry = chain.config().download_retry_ms;
    if retry > 0 {
        tokio::time::sleep(Duration::from_millis(retry)).await;
    }
    chain.dispatch(Event::NoBlock);
    Ok(())
}

async fn confirm_fork(chain: &Blockchain) -> Result<(), NodeError> {
    let (forked_block, depth) = {
        let mut state = chain.lock_state();
        (state.forked_block.take(), state.number_of_blocks_to_rollback())
    };

    if let Some(block) = &forked_block {
        tracing::info!(height = block.height, block_id = %block.id, "fork confirmed by block");
    }
    if forked_block.is_some() || depth.is_some_and(|n| n > 0) {
        chain.dispatch(Event::Recover);
        return Ok(());
    }

    match chain.network().check_network_health().await {
        Ok(status) if status.forked => {
            tracing::info!(depth = ?status.blocks_to_rollback, "network confirms fork");
            chain
                .lock_state()
                .set_number_of_blocks_to_rollback(status.blocks_to_rollback);
            chain.dispatch(Event::Recover);
        }
        Ok(_) => {
            tracing::info!("no fork after all");
            chain.resume_queue();
            chain.dispatch(Event::NoFork);
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not confirm fork, assuming none");
            chain.resume_queue();
            chain.dispatch(Event::NoFork);
        }
    }
    Ok(())
}

fn block_json(block: &Block) -> String {
    serde_json::to_string(block).unwrap_or_else(|_| format!("{{\"height\":{}}}", block.height))
}
