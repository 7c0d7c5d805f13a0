//! End-to-end tests of the blockchain state machine, driven through
//! nullable collaborators.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use dpos_consensus::{expected_generator, shuffle_delegates};
use dpos_network::{DisconnectReason, Peer, PeerNetwork};
use dpos_node::{
    ActionKind, ActionRegistry, Blockchain, BlockchainState, Collaborators, GenesisConfig,
    NodeConfig, ShutdownController, SyncPhase,
};
use dpos_nullables::{NullBlockStore, NullClock, NullPeerNetwork, NullRandom};
use dpos_state::{DelegateAttributes, Wallet};
use dpos_store::BlockStore;
use dpos_types::{Address, Block, BlockId, Milestone, MilestoneSchedule, PublicKey, Timestamp};

const BLOCKTIME: u64 = 8;

// ── Fixtures ───────────────────────────────────────────────────────────

fn key(n: u8) -> PublicKey {
    PublicKey::new([n; 32])
}

/// Distinct ids per height and branch.
fn block_id(height: u64, branch: u8) -> BlockId {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_be_bytes());
    bytes[8] = branch;
    bytes[31] = 0xd0;
    BlockId::new(bytes)
}

fn block(height: u64, previous: Option<BlockId>, slot: u64, generator: PublicKey) -> Block {
    Block {
        height,
        id: block_id(height, 0),
        previous_block_id: previous,
        timestamp: Timestamp::new(slot * BLOCKTIME),
        generator_public_key: generator,
        reward: 0,
        total_fee: 0,
        transactions: Vec::new(),
    }
}

fn genesis() -> Block {
    block(1, None, 0, key(1))
}

fn delegate_wallet(n: u8) -> Wallet {
    let mut wallet = Wallet::new(Address::new(format!("genesis_{n}")));
    wallet.public_key = Some(key(n));
    wallet.balance = 1_000;
    wallet.vote = Some(key(n));
    wallet.delegate = Some(DelegateAttributes {
        username: format!("genesis_{n}"),
        ..DelegateAttributes::default()
    });
    wallet
}

fn config() -> NodeConfig {
    NodeConfig {
        milestones: MilestoneSchedule::single(3, BLOCKTIME, 0),
        genesis: Some(GenesisConfig {
            block: genesis(),
            wallets: (1..=3).map(delegate_wallet).collect(),
        }),
        whitelist: Vec::new(),
        wake_up_secs: 3600,
        download_retry_ms: 0,
        ..NodeConfig::default()
    }
}

fn peer(last_octet: u8, version: &str) -> Peer {
    Peer::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), 4002, version)
}

/// Genesis plus `count` linked blocks, all by the same generator.
fn stored_chain(count: u64) -> NullBlockStore {
    let store = NullBlockStore::new();
    let mut last = genesis();
    store.save_block(&last).unwrap();
    for height in 2..=count + 1 {
        let next = block(height, Some(last.id), height - 1, key(1));
        store.save_block(&next).unwrap();
        last = next;
    }
    store
}

struct Harness {
    chain: Blockchain,
    store: Arc<NullBlockStore>,
    network: Arc<NullPeerNetwork>,
    clock: Arc<NullClock>,
    random: Arc<NullRandom>,
    shutdown: Arc<ShutdownController>,
}

impl Harness {
    fn new(config: NodeConfig) -> Self {
        Self::build(config, NullPeerNetwork::new(), NullBlockStore::new(), None)
    }

    fn build(
        config: NodeConfig,
        network: NullPeerNetwork,
        store: NullBlockStore,
        registry: Option<ActionRegistry>,
    ) -> Self {
        let store = Arc::new(store);
        let network = Arc::new(network);
        let clock = Arc::new(NullClock::new(1_000_000));
        let random = Arc::new(NullRandom::constant(0.0));
        let shutdown = Arc::new(ShutdownController::new());

        let collaborators = Collaborators {
            store: store.clone(),
            network: network.clone(),
            clock: clock.clone(),
            random: random.clone(),
        };
        let chain = match registry {
            Some(registry) => {
                Blockchain::with_registry(config, collaborators, shutdown.clone(), registry)
            }
            None => Blockchain::new(config, collaborators, shutdown.clone()),
        }
        .expect("blockchain should build");

        Self {
            chain,
            store,
            network,
            clock,
            random,
            shutdown,
        }
    }

    async fn boot(&self) {
        self.chain.start();
        self.chain.wait_until_settled().await;
    }

    /// Forge `count` valid blocks on the tip, one slot apart.
    async fn forge(&self, count: u64) {
        for _ in 0..count {
            let last = self.chain.last_block().expect("chain should be booted");
            let slot = last.timestamp.slot(BLOCKTIME) + 1;
            let order = self.chain.forging_order();
            let generator = *expected_generator(&order, slot).expect("active round");
            let next = block(last.height + 1, Some(last.id), slot, generator);

            assert!(self.chain.handle_incoming_block(next));
            assert_eq!(self.chain.process_queue(), 1);
            self.chain.wait_until_settled().await;
        }
    }

    /// A block at the tip's height, signed by an active delegate, that
    /// differs from the tip.
    fn rival_of_tip(&self) -> Block {
        let tip = self.chain.last_block().expect("tip");
        let mut rival = tip.clone();
        rival.id = block_id(tip.height, 7);
        rival.timestamp = Timestamp::new(tip.timestamp.as_secs() + BLOCKTIME);
        rival.generator_public_key = self.chain.forging_order()[0];
        rival
    }
}

// ── Bootstrap ──────────────────────────────────────────────────────────

#[tokio::test]
async fn boots_from_genesis_to_idle() {
    let h = Harness::new(config());
    h.boot().await;

    assert_eq!(h.chain.state(), BlockchainState::Idle);
    assert!(h.chain.is_started());
    assert_eq!(h.chain.last_height(), 1);
    assert_eq!(h.store.last_block().unwrap(), Some(genesis()));

    let round = h.chain.current_round().expect("round 1 active");
    assert_eq!(round.round, 1);
    assert_eq!(round.forging_order.len(), 3);
    assert!(h.store.round(1).unwrap().is_some());

    h.chain.with_wallets(|wallets| {
        let delegate = wallets.find_by_username("genesis_2").unwrap();
        assert_eq!(delegate.delegate.as_ref().unwrap().vote_balance, 1_000);
    });
    assert_eq!(h.chain.metrics().chain_height.get(), 1);
}

#[tokio::test]
async fn network_start_skips_download_and_drops_old_peers() {
    let mut config = config();
    config.network_start = true;
    config.minimum_versions = vec!["^3.0.0".into()];
    let network = NullPeerNetwork::with_peers(vec![peer(1, "3.0.1"), peer(2, "2.9.0")]);
    let h = Harness::build(config, network, NullBlockStore::new(), None);
    h.boot().await;

    assert_eq!(h.chain.state(), BlockchainState::Idle);
    assert!(h.network.download_requests().is_empty());

    let disconnects = h.network.disconnects();
    assert_eq!(disconnects.len(), 1);
    assert_eq!(disconnects[0].peer, peer(2, "2.9.0"));
    assert_eq!(disconnects[0].reason, DisconnectReason::InvalidVersion);
    assert_eq!(h.network.peers().await, vec![peer(1, "3.0.1")]);
}

#[tokio::test]
async fn restarts_from_a_stored_chain() {
    let h = Harness::build(config(), NullPeerNetwork::new(), stored_chain(4), None);
    h.boot().await;

    assert_eq!(h.chain.state(), BlockchainState::Idle);
    assert_eq!(h.chain.last_height(), 5);
    // Block 3 closed round 1; height 6 belongs to round 2.
    assert_eq!(h.chain.current_round().unwrap().round, 2);
    h.chain.with_wallets(|wallets| {
        let forger = wallets.find_by_public_key(&key(1)).unwrap();
        assert_eq!(forger.delegate.as_ref().unwrap().produced_blocks, 5);
    });
}

#[tokio::test]
async fn corrupt_store_is_rolled_back_before_startup() {
    let store = stored_chain(4);
    let mut orphan = block(6, Some(block_id(99, 0)), 6, key(1));
    orphan.id = block_id(6, 3);
    store.memory().insert_unchecked(orphan).unwrap();

    let mut config = config();
    config.database_rollback.steps = 1;
    config.database_rollback.max_block_rewind = 10;
    let h = Harness::build(config, NullPeerNetwork::new(), store, None);
    h.boot().await;

    assert_eq!(h.chain.state(), BlockchainState::Idle);
    assert_eq!(h.store.deletes(), 1);
    assert_eq!(h.chain.last_height(), 5);
    assert!(h.store.verify_blockchain().unwrap());
}

#[tokio::test]
async fn misaligned_milestones_stop_the_node() {
    let mut config = config();
    config.milestones = MilestoneSchedule::new(vec![
        Milestone {
            height: 1,
            active_delegates: 3,
            blocktime: BLOCKTIME,
            reward: 0,
        },
        Milestone {
            height: 5,
            active_delegates: 4,
            blocktime: BLOCKTIME,
            reward: 0,
        },
    ])
    .unwrap();
    let h = Harness::new(config);
    h.boot().await;

    assert_eq!(h.chain.state(), BlockchainState::Terminating);
    assert!(h.shutdown.failure().is_some());
    assert_eq!(h.chain.last_height(), 0);
}

#[tokio::test]
async fn empty_store_without_genesis_fails_to_start() {
    let mut config = config();
    config.genesis = None;
    let h = Harness::new(config);
    h.boot().await;

    assert_eq!(h.chain.state(), BlockchainState::Terminating);
    assert!(h.shutdown.failure().is_some());
}

#[tokio::test]
async fn missing_action_handler_is_not_fatal() {
    let mut registry = ActionRegistry::with_defaults(Arc::new(NullRandom::constant(0.0)));
    assert!(registry.unregister(ActionKind::CheckLater).is_some());
    let h = Harness::build(config(), NullPeerNetwork::new(), NullBlockStore::new(), Some(registry));
    h.boot().await;

    assert_eq!(h.chain.state(), BlockchainState::Idle);
    assert!(h.chain.is_started());
    assert!(h.shutdown.failure().is_none());
}

// ── Syncing ────────────────────────────────────────────────────────────

#[tokio::test]
async fn downloads_and_processes_blocks_before_going_idle() {
    let mut order = vec![key(1), key(2), key(3)];
    shuffle_delegates(1, &mut order);
    let second = block(2, Some(genesis().id), 10, *expected_generator(&order, 10).unwrap());
    let third = block(3, Some(second.id), 11, *expected_generator(&order, 11).unwrap());

    let network = NullPeerNetwork::with_peers(vec![peer(1, "3.0.0")]);
    network.enqueue_download(vec![second, third.clone()]);
    let h = Harness::build(config(), network, NullBlockStore::new(), None);
    h.clock.set(100);
    h.boot().await;

    // Downloaded up to a recent block, nothing processed yet.
    assert_eq!(
        h.chain.state(),
        BlockchainState::SyncingWithNetwork(SyncPhase::DownloadFinished)
    );
    assert!(!h.chain.is_started());
    assert_eq!(h.chain.queue().len(), 2);
    assert_eq!(h.network.download_requests(), vec![1]);

    assert_eq!(h.chain.process_queue(), 2);
    h.chain.wait_until_settled().await;

    assert_eq!(h.chain.state(), BlockchainState::Idle);
    assert!(h.chain.is_started());
    assert_eq!(h.chain.last_block(), Some(third));
    assert_eq!(h.chain.current_round().unwrap().round, 2);
}

#[tokio::test]
async fn halted_network_ends_sync_after_a_health_check() {
    let mut config = config();
    config.max_no_block_attempts = 2;
    config.max_p2p_update_attempts = 0;
    let network = NullPeerNetwork::with_peers(vec![peer(1, "3.0.0")]);
    let h = Harness::build(config, network, NullBlockStore::new(), None);
    h.boot().await;

    assert_eq!(h.chain.state(), BlockchainState::Idle);
    assert_eq!(h.network.download_requests(), vec![1, 1, 1]);
    assert_eq!(h.network.health_checks(), 1);
    assert_eq!(h.chain.last_height(), 1);
}

// ── Block processing ───────────────────────────────────────────────────

#[tokio::test]
async fn accepts_blocks_and_rotates_rounds() {
    let h = Harness::new(config());
    h.boot().await;
    h.forge(4).await;

    assert_eq!(h.chain.state(), BlockchainState::Idle);
    assert_eq!(h.chain.last_height(), 5);
    assert_eq!(h.chain.current_round().unwrap().round, 2);
    assert!(h.store.round(2).unwrap().is_some());
    assert_eq!(h.chain.metrics().blocks_accepted.get(), 4);
    assert_eq!(h.chain.metrics().chain_height.get(), 5);

    let produced: u64 = h.chain.with_wallets(|wallets| {
        wallets
            .all()
            .filter_map(|w| w.delegate.as_ref())
            .map(|d| d.produced_blocks)
            .sum()
    });
    // Four forged plus genesis.
    assert_eq!(produced, 5);
}

#[tokio::test]
async fn copies_of_the_tip_are_counted_as_pings() {
    let h = Harness::new(config());
    h.boot().await;
    h.forge(2).await;
    let tip = h.chain.last_block().unwrap();

    let ping = h.chain.block_ping().expect("accepted block is pinged");
    assert_eq!((ping.height, ping.block_id, ping.count), (3, tip.id, 1));

    for _ in 0..2 {
        assert!(h.chain.handle_incoming_block(tip.clone()));
        assert_eq!(h.chain.process_queue(), 1);
        h.chain.wait_until_settled().await;
    }
    assert_eq!(h.chain.last_height(), 3);
    assert_eq!(h.chain.block_ping().unwrap().count, 3);
}

#[tokio::test]
async fn bad_block_does_not_stall_the_queue() {
    let h = Harness::new(config());
    h.boot().await;

    let tip = h.chain.last_block().unwrap();
    let order = h.chain.forging_order();
    let owner = *expected_generator(&order, 1).unwrap();
    let intruder = *order.iter().find(|pk| **pk != owner).unwrap();

    let mut forged_by_intruder = block(2, Some(tip.id), 1, intruder);
    forged_by_intruder.id = block_id(2, 5);
    let valid = block(2, Some(tip.id), 1, owner);

    assert!(h.chain.handle_incoming_block(forged_by_intruder));
    assert!(h.chain.handle_incoming_block(valid.clone()));
    assert_eq!(h.chain.process_queue(), 2);
    h.chain.wait_until_settled().await;

    assert_eq!(h.chain.last_block(), Some(valid));
    assert_eq!(h.chain.metrics().blocks_rejected.get(), 1);
    assert_eq!(h.chain.state(), BlockchainState::Idle);
}

#[tokio::test]
async fn future_blocks_are_disregarded() {
    let h = Harness::new(config());
    h.boot().await;

    let tip = h.chain.last_block().unwrap();
    h.clock.set(BLOCKTIME * 5);
    let early = block(2, Some(tip.id), 6, key(1));
    assert!(!h.chain.handle_incoming_block(early));
    assert!(h.chain.queue().is_empty());
    assert_eq!(h.chain.state(), BlockchainState::Idle);
}

#[tokio::test]
async fn blocks_are_refused_before_the_chain_is_ready() {
    let h = Harness::new(config());
    assert!(!h.chain.handle_incoming_block(block(2, Some(genesis().id), 1, key(1))));
    assert_eq!(h.chain.state(), BlockchainState::Uninitialized);
}

#[tokio::test]
async fn unfillable_round_stops_the_node() {
    let mut config = config();
    // Round 2 needs four delegates but only three exist.
    config.milestones = MilestoneSchedule::new(vec![
        Milestone {
            height: 1,
            active_delegates: 3,
            blocktime: BLOCKTIME,
            reward: 0,
        },
        Milestone {
            height: 4,
            active_delegates: 4,
            blocktime: BLOCKTIME,
            reward: 0,
        },
    ])
    .unwrap();
    let h = Harness::new(config);
    h.boot().await;
    assert_eq!(h.chain.state(), BlockchainState::Idle);

    let tip = h.chain.last_block().unwrap();
    let order = h.chain.forging_order();
    let second = block(2, Some(tip.id), 1, *expected_generator(&order, 1).unwrap());
    let third = block(3, Some(second.id), 2, *expected_generator(&order, 2).unwrap());
    h.chain.enqueue_blocks(vec![second, third]);
    h.chain.process_queue();
    h.chain.wait_until_settled().await;

    assert_eq!(h.chain.state(), BlockchainState::Terminating);
    assert!(h.shutdown.failure().is_some());
    assert!(h.chain.queue().is_stopped());
}

// ── Forks ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn fork_with_known_depth_rolls_back_that_many_blocks() {
    let h = Harness::new(config());
    h.boot().await;
    h.forge(9).await;
    assert_eq!(h.chain.last_height(), 10);

    let forked = h.rival_of_tip();
    let transition = h.chain.fork_block(forked, Some(7));
    assert_eq!(transition.state, BlockchainState::ForkDetected);
    h.chain.wait_until_settled().await;

    assert_eq!(h.chain.state(), BlockchainState::Idle);
    assert_eq!(h.chain.last_height(), 3);
    assert_eq!(h.store.deletes(), 7);
    assert_eq!(h.network.refresh_calls(), 1);
    assert_eq!(h.random.calls(), 0);
    assert!(!h.chain.queue().is_stopped());
    assert_eq!(h.chain.metrics().blocks_rolled_back.get(), 7);
    // Block 3 closed round 1, so round 2 is current again.
    assert_eq!(h.chain.current_round().unwrap().round, 2);
    assert!(h.store.round(3).unwrap().is_none());
}

#[tokio::test]
async fn fork_block_from_an_active_delegate_triggers_random_rollback() {
    let h = Harness::new(config());
    h.boot().await;
    h.forge(9).await;

    let rival = h.rival_of_tip();
    assert!(h.chain.handle_incoming_block(rival));
    h.chain.process_queue();
    h.chain.wait_until_settled().await;

    // A unit value of zero gives the smallest random depth, four.
    assert_eq!(h.random.calls(), 1);
    assert_eq!(h.chain.last_height(), 6);
    assert_eq!(h.chain.metrics().forks_detected.get(), 1);
    assert_eq!(h.chain.state(), BlockchainState::Idle);
    assert!(!h.chain.queue().is_stopped());
}

#[tokio::test]
async fn rollback_never_removes_genesis() {
    let h = Harness::new(config());
    h.boot().await;
    h.forge(2).await;

    h.chain.fork_block(h.rival_of_tip(), Some(50));
    h.chain.wait_until_settled().await;

    assert_eq!(h.chain.last_height(), 1);
    assert_eq!(h.chain.last_block(), Some(genesis()));
    assert_eq!(h.chain.current_round().unwrap().round, 1);
}

#[tokio::test]
async fn failed_rollback_still_resumes_the_queue() {
    let h = Harness::new(config());
    h.boot().await;
    h.forge(5).await;
    h.store.fail_deletes(true);

    h.chain.fork_block(h.rival_of_tip(), Some(3));
    h.chain.wait_until_settled().await;

    assert_eq!(h.chain.last_height(), 6);
    assert_eq!(h.store.deletes(), 0);
    assert_eq!(h.network.refresh_calls(), 0);
    assert!(!h.chain.queue().is_stopped());
    assert_eq!(h.chain.state(), BlockchainState::Idle);
}

#[tokio::test]
async fn failed_round_revert_keeps_memory_and_store_aligned() {
    let h = Harness::new(config());
    h.boot().await;
    h.forge(3).await;
    h.store.fail_round_deletes(true);

    // Height 4 comes off; height 3 closed round 1 and cannot be reverted.
    assert!(h.chain.remove_blocks(2).is_err());
    assert_eq!(h.chain.last_height(), 3);
    assert_eq!(h.store.last_block().unwrap().map(|b| b.height), Some(3));
    assert_eq!(h.chain.current_round().map(|r| r.round), Some(2));
    assert!(h.shutdown.failure().is_none());

    h.store.fail_round_deletes(false);
    h.forge(1).await;
    assert_eq!(h.chain.last_height(), 4);
    assert_eq!(h.store.last_block().unwrap().map(|b| b.height), Some(4));
}

#[tokio::test]
async fn refresh_failure_does_not_fail_recovery() {
    let h = Harness::new(config());
    h.boot().await;
    h.forge(4).await;
    h.network.fail_refresh(true);

    h.chain.fork_block(h.rival_of_tip(), Some(2));
    h.chain.wait_until_settled().await;

    assert_eq!(h.chain.last_height(), 3);
    assert_eq!(h.network.refresh_calls(), 1);
    assert_eq!(h.chain.state(), BlockchainState::Idle);
}

#[tokio::test]
async fn fork_outside_a_forkable_state_is_dropped() {
    let h = Harness::new(config());
    let transition = h.chain.fork_block(genesis(), Some(3));

    assert_eq!(transition.state, BlockchainState::Uninitialized);
    assert!(transition.tasks.is_empty());
    assert!(!h.chain.queue().is_stopped());
}

// ── Lifecycle ──────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_terminates_and_refuses_blocks() {
    let h = Harness::new(config());
    h.boot().await;

    let transition = h.chain.stop();
    assert_eq!(transition.state, BlockchainState::Terminating);
    transition.settle().await;

    assert!(h.chain.is_stopped());
    assert!(h.chain.queue().is_stopped());
    let tip = h.chain.last_block().unwrap();
    assert!(!h.chain.handle_incoming_block(block(2, Some(tip.id), 1, key(1))));
    assert!(h.shutdown.failure().is_none());

    // Stopping twice is a no-op.
    assert!(h.chain.stop().tasks.is_empty());
}

#[tokio::test]
async fn worker_processes_blocks_until_shutdown() {
    let h = Harness::new(config());
    h.boot().await;
    let worker = h.chain.spawn_worker(h.shutdown.subscribe());

    let tip = h.chain.last_block().unwrap();
    let order = h.chain.forging_order();
    let next = block(2, Some(tip.id), 1, *expected_generator(&order, 1).unwrap());
    assert!(h.chain.handle_incoming_block(next.clone()));

    for _ in 0..100 {
        if h.chain.last_height() == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(h.chain.last_block(), Some(next));

    h.shutdown.shutdown();
    worker.await.unwrap();
}

#[tokio::test]
async fn wake_up_resyncs_from_idle() {
    let network = NullPeerNetwork::with_peers(vec![peer(1, "3.0.0")]);
    let mut config = config();
    config.network_start = true;
    let h = Harness::build(config, network, NullBlockStore::new(), None);
    h.boot().await;
    assert_eq!(h.chain.state(), BlockchainState::Idle);
    assert!(h.network.download_requests().is_empty());

    let transition = h.chain.force_wake_up();
    assert_eq!(
        transition.state,
        BlockchainState::SyncingWithNetwork(SyncPhase::Syncing)
    );
    h.chain.wait_until_settled().await;

    // Peers have nothing: six empty downloads count as a halted network.
    assert_eq!(h.network.download_requests(), vec![1; 6]);
    assert_eq!(h.network.health_checks(), 0);
    assert_eq!(h.chain.state(), BlockchainState::Idle);
}
