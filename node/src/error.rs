use dpos_consensus::{ConsensusError, RoundError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("store error: {0}")]
    Store(#[from] dpos_store::StoreError),

    #[error("wallet state error: {0}")]
    State(#[from] dpos_state::StateError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("network error: {0}")]
    Network(#[from] dpos_network::NetworkError),

    #[error("invalid types: {0}")]
    Types(#[from] dpos_types::TypesError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The local consensus view is inconsistent; the node must stop.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("genesis error: {0}")]
    Genesis(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("no last block; the chain has not been initialised")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RoundError> for NodeError {
    fn from(e: RoundError) -> Self {
        NodeError::Consensus(e.into())
    }
}

impl NodeError {
    /// Errors that must escalate to process termination.
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            NodeError::Invariant(_) => true,
            NodeError::Consensus(e) => e.is_invariant_violation(),
            _ => false,
        }
    }
}
