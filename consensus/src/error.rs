use dpos_state::StateError;
use thiserror::Error;

/// Milestone schedule problems. Every variant is an invariant violation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoundError {
    #[error("height 0 has no round")]
    ZeroHeight,

    #[error(
        "milestone at height {height} changes active delegates to {next}, \
         but the previous span of {span} blocks is not a multiple of {active}"
    )]
    MisalignedMilestone {
        height: u64,
        span: u64,
        active: u64,
        next: u64,
    },
}

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error(transparent)]
    Round(#[from] RoundError),

    #[error("expected {required} active delegates but only {available} are eligible")]
    InsufficientDelegates { required: u64, available: u64 },

    #[error("delegate {public_key} appears twice with vote balance {vote_balance}")]
    DuplicateDelegate {
        public_key: String,
        vote_balance: u64,
    },

    #[error("wallet {voter} votes for {delegate}, which is not a delegate")]
    UnknownVoteTarget { voter: String, delegate: String },

    #[error("wallet state: {0}")]
    State(#[from] StateError),
}

impl ConsensusError {
    /// Whether the error means the local consensus view can no longer be
    /// trusted and the node must stop.
    pub fn is_invariant_violation(&self) -> bool {
        !matches!(self, ConsensusError::State(_))
    }
}
