//! DPoS node core: the blockchain lifecycle state machine and everything it
//! drives.
//!
//! The [`Blockchain`] handle:
//! - Sequences bootstrap, network sync, block ingestion and fork handling
//! - Runs the single block worker over the [`BlockQueue`]
//! - Keeps round bookkeeping in step with the chain
//! - Rolls the chain back when it forked from the network

pub mod actions;
pub mod block_processor;
pub mod block_queue;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod fork_recovery;
pub mod logging;
pub mod machine;
pub mod metrics;
pub mod random;
pub mod rounds;
pub mod shutdown;
pub mod state_store;

pub use actions::{Action, ActionRegistry};
pub use block_processor::{BlockProcessor, ProcessResult, RejectReason};
pub use block_queue::BlockQueue;
pub use blockchain::{Blockchain, Collaborators, Transition};
pub use config::{DatabaseRollbackConfig, GenesisConfig, NodeConfig};
pub use error::NodeError;
pub use fork_recovery::{ForkRecoveryAction, RecoveryPipeline};
pub use logging::{init_logging, LogFormat};
pub use machine::{transition, ActionKind, BlockchainState, Event, SyncPhase};
pub use metrics::ConsensusMetrics;
pub use random::ThreadRandom;
pub use rounds::{ActiveRound, RoundManager};
pub use shutdown::ShutdownController;
pub use state_store::{BlockPing, StateStore};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex; a poisoned lock still yields its data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
