//! Rolling the chain back after a fork.

use std::sync::Arc;

use async_trait::async_trait;
use dpos_types::RandomSource;

use crate::machine::Event;
use crate::NodeError;

/// Smallest random rollback depth.
const MIN_RANDOM_DEPTH: u64 = 4;
/// Number of distinct random depths, giving `[4, 102]`.
const RANDOM_DEPTH_SPAN: f64 = 99.0;

/// The chain operations fork recovery needs.
#[async_trait]
pub trait RecoveryPipeline: Send + Sync {
    /// Consume the rollback depth requested by whoever detected the fork.
    fn take_blocks_to_rollback(&self) -> Option<u64>;

    fn clear_and_stop_queue(&self);

    fn remove_blocks(&self, count: u64) -> Result<(), NodeError>;

    async fn refresh_peers_after_fork(&self) -> Result<(), NodeError>;

    fn dispatch(&self, event: Event);

    fn resume_queue(&self);

    /// Stop the node for good.
    fn terminate(&self, reason: String);
}

/// Roll back a known or random number of blocks, then rejoin the network.
pub struct ForkRecoveryAction {
    random: Arc<dyn RandomSource>,
}

impl ForkRecoveryAction {
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }

    /// Rollback depth when nobody asked for a specific one.
    pub fn random_depth(&self) -> u64 {
        let unit = self.random.next_unit().clamp(0.0, 1.0 - f64::EPSILON);
        MIN_RANDOM_DEPTH + (unit * RANDOM_DEPTH_SPAN).floor() as u64
    }

    /// The queue is resumed unless the rollback hit a consensus invariant
    /// violation, which terminates the node instead.
    pub async fn run(&self, chain: &dyn RecoveryPipeline) {
        let depth = match chain.take_blocks_to_rollback() {
            Some(depth) => depth,
            None => self.random_depth(),
        };
        tracing::info!(depth, "starting fork recovery");

        chain.clear_and_stop_queue();

        match chain.remove_blocks(depth) {
            Ok(()) => {
                if let Err(e) = chain.refresh_peers_after_fork().await {
                    tracing::warn!(error = %e, "failed to refresh peers after fork");
                }
                chain.dispatch(Event::Success);
            }
            Err(e) if e.is_invariant_violation() => {
                tracing::error!(depth, error = %e, "consensus invariant violated during fork recovery");
                chain.terminate(e.to_string());
                return;
            }
            Err(e) => {
                tracing::error!(depth, error = %e, "fork recovery rollback failed");
                chain.dispatch(Event::Failure);
            }
        }

        chain.resume_queue();
    }
}
