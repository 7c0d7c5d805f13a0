use crate::{NetworkError, Peer, PeerDisconnect};
use async_trait::async_trait;
use dpos_types::Block;

/// Outcome of asking the network whether this node is on a minority chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkStatus {
    pub forked: bool,
    /// Rollback depth suggested by the network, when it could tell.
    pub blocks_to_rollback: Option<u64>,
}

impl NetworkStatus {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn forked(blocks_to_rollback: Option<u64>) -> Self {
        Self {
            forked: true,
            blocks_to_rollback,
        }
    }
}

/// The peer network collaborator.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Currently connected peers.
    async fn peers(&self) -> Vec<Peer>;

    /// Drop and re-discover peers after this node recovered from a fork.
    async fn refresh_peers_after_fork(&self) -> Result<(), NetworkError>;

    /// Blocks following `from_height`, as served by some peer. Empty when no
    /// peer has anything newer.
    async fn download_blocks(&self, from_height: u64) -> Result<Vec<Block>, NetworkError>;

    /// Compare the local chain with the peers' view.
    async fn check_network_health(&self) -> Result<NetworkStatus, NetworkError>;

    /// Drop a peer the node refuses to talk to.
    async fn disconnect_peer(&self, disconnect: &PeerDisconnect);
}
