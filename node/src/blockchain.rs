//! The blockchain handle: state machine dispatch, the block worker and the
//! chain operations actions call back into.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dpos_consensus::RoundCalculator;
use dpos_network::{PeerDisconnect, PeerGuard, PeerNetwork};
use dpos_state::WalletRepository;
use dpos_store::BlockStore;
use dpos_types::{Block, Clock, PublicKey, RandomSource};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::actions::ActionRegistry;
use crate::block_processor::{BlockProcessor, ProcessResult};
use crate::block_queue::BlockQueue;
use crate::fork_recovery::RecoveryPipeline;
use crate::machine::{transition, ActionKind, BlockchainState, Event};
use crate::metrics::ConsensusMetrics;
use crate::rounds::{ActiveRound, RoundManager};
use crate::shutdown::ShutdownController;
use crate::state_store::{BlockPing, StateStore};
use crate::{lock, NodeConfig, NodeError};

/// External collaborators the blockchain drives.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn BlockStore>,
    pub network: Arc<dyn PeerNetwork>,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn RandomSource>,
}

/// What a dispatch did: the committed state and the spawned action tasks.
#[derive(Debug)]
pub struct Transition {
    pub state: BlockchainState,
    pub tasks: Vec<JoinHandle<()>>,
}

impl Transition {
    /// Wait for this transition's own actions. Actions they dispatch in turn
    /// are not awaited; see [`Blockchain::wait_until_settled`].
    pub async fn settle(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "action task did not complete");
            }
        }
    }
}

/// Cheap, clonable handle to one node's consensus core.
#[derive(Clone)]
pub struct Blockchain {
    inner: Arc<Inner>,
}

struct Inner {
    config: NodeConfig,
    calculator: RoundCalculator,
    store: Arc<dyn BlockStore>,
    network: Arc<dyn PeerNetwork>,
    clock: Arc<dyn Clock>,
    wallets: Arc<Mutex<WalletRepository>>,
    state: Arc<Mutex<StateStore>>,
    rounds: Arc<Mutex<RoundManager>>,
    queue: BlockQueue,
    processor: BlockProcessor,
    registry: ActionRegistry,
    metrics: Arc<ConsensusMetrics>,
    shutdown: Arc<ShutdownController>,
    guard: PeerGuard,
    restored_database_integrity: AtomicBool,
    /// Action tasks spawned and not yet finished.
    pending: AtomicUsize,
    settled: Notify,
    wake_up: Mutex<Option<JoinHandle<()>>>,
}

/// Decrements the pending action count when an action task ends, however
/// it ends.
struct PendingGuard(Arc<Inner>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.settled.notify_waiters();
        }
    }
}

impl Blockchain {
    pub fn new(
        config: NodeConfig,
        collaborators: Collaborators,
        shutdown: Arc<ShutdownController>,
    ) -> Result<Self, NodeError> {
        let registry = ActionRegistry::with_defaults(Arc::clone(&collaborators.random));
        Self::with_registry(config, collaborators, shutdown, registry)
    }

    /// Like [`new`](Self::new) with a caller-supplied action registry.
    pub fn with_registry(
        config: NodeConfig,
        collaborators: Collaborators,
        shutdown: Arc<ShutdownController>,
        registry: ActionRegistry,
    ) -> Result<Self, NodeError> {
        let Collaborators {
            store,
            network,
            clock,
            random: _,
        } = collaborators;

        let guard = PeerGuard::from_config(&config.minimum_versions, config.whitelist.clone())?;
        let calculator = RoundCalculator::new(config.milestones.clone());
        let metrics = Arc::new(ConsensusMetrics::new()?);
        let wallets = Arc::new(Mutex::new(WalletRepository::new()));
        let state = Arc::new(Mutex::new(StateStore::new(
            config.max_last_blocks,
            config.network_start,
        )));
        let rounds = Arc::new(Mutex::new(RoundManager::new(
            calculator.clone(),
            Arc::clone(&store),
        )));
        let processor = BlockProcessor::new(
            config.milestones.clone(),
            Arc::clone(&store),
            Arc::clone(&wallets),
            Arc::clone(&state),
            Arc::clone(&rounds),
            Arc::clone(&metrics),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                calculator,
                store,
                network,
                clock,
                wallets,
                state,
                rounds,
                queue: BlockQueue::new(),
                processor,
                registry,
                metrics,
                shutdown,
                guard,
                restored_database_integrity: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                settled: Notify::new(),
                wake_up: Mutex::new(None),
            }),
        })
    }

    // ── State machine ──────────────────────────────────────────────────

    /// Apply `event` to the state machine.
    ///
    /// The new state is committed before this returns. Actions run as
    /// spawned tasks and are not awaited; must be called within a tokio
    /// runtime.
    pub fn dispatch(&self, event: Event) -> Transition {
        let (from, to, actions) = {
            let mut state = lock(&self.inner.state);
            let from = state.blockchain;
            match transition(from, event) {
                Some((to, actions)) => {
                    state.blockchain = to;
                    (from, to, actions)
                }
                None => {
                    tracing::debug!(state = %from, event = %event, "event ignored");
                    return Transition {
                        state: from,
                        tasks: Vec::new(),
                    };
                }
            }
        };

        self.inner
            .metrics
            .state_transitions
            .with_label_values(&[event.as_str()])
            .inc();
        tracing::debug!(event = %event, from = %from, to = %to, "state transition");

        let tasks = actions
            .iter()
            .filter_map(|kind| self.spawn_action(*kind, event))
            .collect();
        Transition { state: to, tasks }
    }

    fn spawn_action(&self, kind: ActionKind, event: Event) -> Option<JoinHandle<()>> {
        let Some(action) = self.inner.registry.get(kind) else {
            tracing::error!(action = %kind, event = %event, "no handler registered for action");
            return None;
        };

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let pending = PendingGuard(Arc::clone(&self.inner));
        let chain = self.clone();
        Some(tokio::spawn(async move {
            let _pending = pending;
            if let Err(e) = action.handle(&chain).await {
                tracing::error!(action = %kind, event = %event, error = %e, "action failed");
            }
        }))
    }

    /// Wait until every dispatched action, including those dispatched by
    /// other actions, has finished. The wake-up timer does not count.
    pub async fn wait_until_settled(&self) {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn start(&self) -> Transition {
        tracing::info!("starting blockchain");
        self.dispatch(Event::Start)
    }

    /// Stop the state machine and the queue.
    pub fn stop(&self) -> Transition {
        if let Some(timer) = lock(&self.inner.wake_up).take() {
            timer.abort();
        }
        let transition = self.dispatch(Event::Stop);
        self.inner.queue.clear_and_stop();
        transition
    }

    /// Stop the node because its consensus view can no longer be trusted.
    pub fn terminate(&self, reason: String) {
        self.inner.shutdown.terminate(reason);
        self.stop();
    }

    pub fn state(&self) -> BlockchainState {
        lock(&self.inner.state).blockchain
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == BlockchainState::Terminating
    }

    /// Arm the wake-up timer unless one is pending or the node stopped.
    pub fn set_wake_up(&self) {
        if self.is_stopped() {
            return;
        }
        let mut wake_up = lock(&self.inner.wake_up);
        if wake_up.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let chain = self.clone();
        let delay = Duration::from_secs(self.inner.config.wake_up_secs);
        *wake_up = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            chain.dispatch(Event::Wakeup);
        }));
    }

    /// Cancel a pending wake-up and sync now.
    pub fn force_wake_up(&self) -> Transition {
        if let Some(timer) = lock(&self.inner.wake_up).take() {
            timer.abort();
        }
        self.dispatch(Event::Wakeup)
    }

    // ── Blocks ─────────────────────────────────────────────────────────

    /// A block pushed by a peer. Returns whether it was queued.
    pub fn handle_incoming_block(&self, block: Block) -> bool {
        let blocktime = self.inner.calculator.schedule().milestone_at(block.height).blocktime;
        let current_slot = self.inner.clock.now().slot(blocktime);
        if block.timestamp.slot(blocktime) > current_slot {
            tracing::info!(
                height = block.height,
                block_id = %block.id,
                "block disregarded because it is from a future slot"
            );
            return false;
        }

        if !lock(&self.inner.state).started {
            tracing::info!(
                height = block.height,
                block_id = %block.id,
                "block disregarded because the blockchain is not ready"
            );
            return false;
        }

        self.dispatch(Event::NewBlock);
        self.enqueue_blocks(vec![block]) == 1
    }

    /// Queue blocks for the worker and advance the download position.
    pub fn enqueue_blocks(&self, blocks: Vec<Block>) -> usize {
        let Some(last) = blocks.last().cloned() else {
            return 0;
        };
        let accepted = self.inner.queue.submit_all(blocks);
        if accepted > 0 {
            lock(&self.inner.state).set_last_downloaded_block(Some(last));
        }
        self.update_queue_gauge();
        accepted
    }

    /// Record a fork and hand it to the state machine. The queue is stopped
    /// until the fork is resolved.
    pub fn fork_block(&self, block: Block, blocks_to_rollback: Option<u64>) -> Transition {
        {
            let mut state = lock(&self.inner.state);
            state.forked_block = Some(block);
            if blocks_to_rollback.is_some() {
                state.set_number_of_blocks_to_rollback(blocks_to_rollback);
            }
        }
        self.clear_and_stop_queue();

        let transition = self.dispatch(Event::Fork);
        if transition.state != BlockchainState::ForkDetected || transition.tasks.is_empty() {
            tracing::warn!(state = %transition.state, "fork not handled in this state");
            lock(&self.inner.state).forked_block = None;
            self.resume_queue();
        }
        transition
    }

    /// Drop pending blocks, stop the queue and rewind the download position
    /// to the tip.
    pub fn clear_and_stop_queue(&self) {
        self.inner.queue.clear_and_stop();
        let mut state = lock(&self.inner.state);
        let tip = state.last_block().cloned();
        state.set_last_downloaded_block(tip);
        drop(state);
        self.update_queue_gauge();
    }

    pub fn resume_queue(&self) {
        self.inner.queue.resume();
    }

    /// Process queued blocks until the queue is empty or stopped. Returns
    /// the number of blocks processed.
    pub fn process_queue(&self) -> usize {
        let mut processed = 0;
        while let Some(block) = self.inner.queue.try_pop() {
            self.process_block(block);
            processed += 1;
        }
        processed
    }

    fn process_block(&self, block: Block) {
        let height = block.height;
        let block_id = block.id;
        let result = self.inner.processor.process(&block);
        self.inner.queue.finish();
        self.update_queue_gauge();

        match result {
            Ok(ProcessResult::Fork) => {
                self.fork_block(block, None);
                return;
            }
            Ok(ProcessResult::Rejected(reason)) => {
                tracing::debug!(height, block_id = %block_id, reason = ?reason, "block rejected");
            }
            Ok(ProcessResult::Accepted) => {
                let now = self.inner.clock.now();
                lock(&self.inner.state).push_ping_block(&block, now, false);
            }
            Ok(ProcessResult::DiscardedButCanBeBroadcasted) => {
                let now = self.inner.clock.now();
                lock(&self.inner.state).ping_block(&block, now);
            }
            Err(e) if e.is_invariant_violation() => {
                tracing::error!(height, block_id = %block_id, error = %e, "consensus invariant violated");
                self.terminate(e.to_string());
                return;
            }
            Err(e) => {
                tracing::error!(height, block_id = %block_id, error = %e, "block processing failed");
            }
        }

        if self.inner.queue.is_idle() && !self.inner.queue.is_stopped() {
            self.dispatch(Event::ProcessFinished);
        }
    }

    /// Run the block worker until shutdown.
    pub fn spawn_worker(&self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let chain = self.clone();
        tokio::spawn(async move {
            loop {
                let block = tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("block worker shutting down");
                        break;
                    }
                    block = chain.inner.queue.pop() => block,
                };
                chain.process_block(block);
            }
        })
    }

    /// Revert the newest `count` blocks. Never removes the genesis block.
    pub fn remove_blocks(&self, count: u64) -> Result<(), NodeError> {
        let last_height = lock(&self.inner.state).last_height();
        if last_height == 0 {
            return Err(NodeError::NotInitialized);
        }
        let count = count.min(last_height - 1);
        tracing::info!(count, from_height = last_height, "removing blocks");

        let mut wallets = lock(&self.inner.wallets);
        for _ in 0..count {
            let tip = self
                .inner
                .store
                .last_block()?
                .ok_or(NodeError::NotInitialized)?;
            let previous = self.inner.store.block_at(tip.height - 1)?.ok_or_else(|| {
                NodeError::Invariant(format!("block {} missing below the tip", tip.height - 1))
            })?;

            self.revert_tip(&tip, &mut wallets)?;

            let mut state = lock(&self.inner.state);
            state.set_last_block(previous.clone());
            state.set_last_downloaded_block(Some(previous));
            drop(state);

            self.inner.metrics.blocks_rolled_back.inc();
            self.inner
                .metrics
                .chain_height
                .set(i64::try_from(tip.height - 1).unwrap_or(i64::MAX));
        }

        tracing::info!(
            removed = count,
            height = last_height - count,
            "blocks removed"
        );
        Ok(())
    }

    /// Revert `tip` from wallets and rounds, then delete it from the store.
    /// On failure the block is re-applied so memory still matches the store;
    /// if that fails too the error is an invariant violation.
    fn revert_tip(&self, tip: &Block, wallets: &mut WalletRepository) -> Result<(), NodeError> {
        wallets.revert_block(tip)?;

        let reverted = lock(&self.inner.rounds)
            .revert_round(tip.height, wallets)
            .and_then(|()| self.inner.store.delete_block(tip).map_err(NodeError::from));
        let Err(e) = reverted else {
            return Ok(());
        };

        tracing::warn!(height = tip.height, error = %e, "rollback step failed, restoring block");
        wallets
            .apply_block(tip)
            .map_err(NodeError::from)
            .and_then(|()| lock(&self.inner.rounds).apply_round(tip.height, wallets))
            .map_err(|restore| {
                NodeError::Invariant(format!(
                    "block {} could not be restored after a failed rollback ({e}): {restore}",
                    tip.height
                ))
            })?;
        Err(e)
    }

    /// Delete the newest `count` blocks from the store only. Used to repair
    /// a corrupt store before wallets are built.
    pub fn remove_top_blocks(&self, count: u64) -> Result<(), NodeError> {
        let mut removed = 0;
        while removed < count {
            let Some(tip) = self.inner.store.last_block()? else {
                break;
            };
            if tip.height <= 1 {
                break;
            }
            self.inner.store.delete_block(&tip)?;
            removed += 1;
        }
        tracing::info!(removed, "top blocks removed from store");
        Ok(())
    }

    /// Whether `block` is recent enough to consider the node in sync. A
    /// node without peers is always in sync.
    pub async fn is_synced(&self, block: &Block) -> bool {
        if self.inner.network.peers().await.is_empty() {
            return true;
        }
        let blocktime = self.inner.calculator.schedule().milestone_at(block.height).blocktime;
        block.timestamp.elapsed_since(self.inner.clock.now()) < 3 * blocktime
    }

    /// Disconnect every peer running a version below the minimum.
    pub async fn disconnect_invalid_peers(&self) -> Vec<PeerDisconnect> {
        let peers = self.inner.network.peers().await;
        let disconnects = self.inner.guard.check_versions(&peers);
        for disconnect in &disconnects {
            tracing::info!(
                peer = %disconnect.peer,
                version = %disconnect.peer.version,
                "disconnecting peer with invalid version"
            );
            self.inner.network.disconnect_peer(disconnect).await;
        }
        disconnects
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn calculator(&self) -> &RoundCalculator {
        &self.inner.calculator
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.inner.store
    }

    pub fn network(&self) -> &Arc<dyn PeerNetwork> {
        &self.inner.network
    }

    pub fn queue(&self) -> &BlockQueue {
        &self.inner.queue
    }

    pub fn metrics(&self) -> &ConsensusMetrics {
        &self.inner.metrics
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.inner.shutdown
    }

    pub fn last_block(&self) -> Option<Block> {
        lock(&self.inner.state).last_block().cloned()
    }

    pub fn last_height(&self) -> u64 {
        lock(&self.inner.state).last_height()
    }

    pub fn is_started(&self) -> bool {
        lock(&self.inner.state).started
    }

    /// Copies received of the latest accepted block.
    pub fn block_ping(&self) -> Option<BlockPing> {
        lock(&self.inner.state).block_ping().copied()
    }

    pub fn current_round(&self) -> Option<ActiveRound> {
        lock(&self.inner.rounds).current().cloned()
    }

    pub fn forging_order(&self) -> Vec<PublicKey> {
        lock(&self.inner.rounds).forging_order().to_vec()
    }

    /// Read the wallet repository.
    pub fn with_wallets<R>(&self, f: impl FnOnce(&WalletRepository) -> R) -> R {
        f(&lock(&self.inner.wallets))
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StateStore> {
        lock(&self.inner.state)
    }

    pub(crate) fn lock_wallets(&self) -> MutexGuard<'_, WalletRepository> {
        lock(&self.inner.wallets)
    }

    pub(crate) fn lock_rounds(&self) -> MutexGuard<'_, RoundManager> {
        lock(&self.inner.rounds)
    }

    pub(crate) fn restored_database_integrity(&self) -> bool {
        self.inner.restored_database_integrity.load(Ordering::SeqCst)
    }

    pub(crate) fn set_restored_database_integrity(&self) {
        self.inner
            .restored_database_integrity
            .store(true, Ordering::SeqCst);
    }

    fn update_queue_gauge(&self) {
        let queued = i64::try_from(self.inner.queue.len()).unwrap_or(i64::MAX);
        self.inner.metrics.queue_length.set(queued);
    }
}

#[async_trait]
impl RecoveryPipeline for Blockchain {
    fn take_blocks_to_rollback(&self) -> Option<u64> {
        lock(&self.inner.state).take_blocks_to_rollback()
    }

    fn clear_and_stop_queue(&self) {
        Blockchain::clear_and_stop_queue(self);
    }

    fn remove_blocks(&self, count: u64) -> Result<(), NodeError> {
        Blockchain::remove_blocks(self, count)
    }

    async fn refresh_peers_after_fork(&self) -> Result<(), NodeError> {
        self.inner.network.refresh_peers_after_fork().await?;
        Ok(())
    }

    fn dispatch(&self, event: Event) {
        Blockchain::dispatch(self, event);
    }

    fn resume_queue(&self) {
        Blockchain::resume_queue(self);
    }

    fn terminate(&self, reason: String) {
        Blockchain::terminate(self, reason);
    }
}
